//! Alignment arithmetic shared by the allocators.

/// Round `value` up to the next multiple of `alignment`.
///
/// An alignment of zero is treated as one. Values that are already aligned
/// are returned unchanged.
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    match value % alignment {
        0 => value,
        rem => value + (alignment - rem),
    }
}

/// Returns true if `value` is a multiple of `alignment` (zero counts as one).
#[inline]
pub const fn is_aligned(value: u64, alignment: u64) -> bool {
    alignment <= 1 || value % alignment == 0
}

/// Round a byte count up to whole chunks, never returning less than one chunk.
#[inline]
pub const fn round_to_chunks(bytes: u64, chunk: u64) -> u64 {
    let rounded = align_up(bytes, chunk);
    if rounded == 0 {
        if chunk == 0 {
            1
        } else {
            chunk
        }
    } else {
        rounded
    }
}
