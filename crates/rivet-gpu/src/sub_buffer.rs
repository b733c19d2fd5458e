//! Sub-allocation of one large buffer into aligned ranges.
//!
//! The allocator only tracks offsets; it never touches buffer memory. The
//! buffer is partitioned into contiguous regions, each either owned by a live
//! [`SubBuffer`] or free. Every region spans a whole number of chunks.

use crate::error::{GpuError, Result};
use crate::memory::BackingBuffer;
use ash::vk;
use rivet_core::math::{align_up, round_to_chunks};
use rivet_core::{FitStrategy, SubBufferConfig};
use slotmap::SlotMap;
use std::fmt;

slotmap::new_key_type! {
    /// Generational handle of a live sub-buffer.
    pub struct SubBufferId;
}

/// An aligned range handed out by a [`SubBufferAllocator`].
///
/// This is a plain descriptor. The range stays reserved until it is passed
/// back to [`SubBufferAllocator::release`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubBuffer {
    id: SubBufferId,
    allocation_offset: u64,
    allocation_size: u64,
    offset: u64,
    size: u64,
    alignment: u64,
}

impl SubBuffer {
    /// Handle to pass back to [`SubBufferAllocator::release`].
    pub fn id(&self) -> SubBufferId {
        self.id
    }

    /// Start of the aligned range, in bytes from the start of the buffer.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Requested size rounded up to the alignment.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Alignment the range was placed with.
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Start of the reserved span, including alignment padding.
    pub fn allocation_offset(&self) -> u64 {
        self.allocation_offset
    }

    /// Reserved span in bytes, a whole number of chunks.
    pub fn allocation_size(&self) -> u64 {
        self.allocation_size
    }

    /// Element index of [`Self::offset`] when the buffer is viewed as an
    /// array of `alignment`-sized elements in a shader.
    pub fn shader_storage_array_start_index(&self) -> u64 {
        self.offset / self.alignment
    }
}

/// One entry of the buffer partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    /// Start of the span.
    pub allocation_offset: u64,
    /// Span length, a whole number of chunks.
    pub allocation_size: u64,
    /// Start of the aligned range inside the span.
    pub offset: u64,
    /// Length of the aligned range.
    pub size: u64,
    /// Alignment of `offset`; 1 for free regions.
    pub alignment: u64,
    /// `None` when the region is free.
    pub owner: Option<SubBufferId>,
}

impl Region {
    fn free(allocation_offset: u64, allocation_size: u64) -> Self {
        Self {
            allocation_offset,
            allocation_size,
            offset: allocation_offset,
            size: allocation_size,
            alignment: 1,
            owner: None,
        }
    }

    /// Returns true if no sub-buffer owns this region.
    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }

    /// One past the last byte of the span.
    pub fn end(&self) -> u64 {
        self.allocation_offset + self.allocation_size
    }
}

/// Occupancy summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubBufferStats {
    /// Size of the backing buffer.
    pub buffer_size: u64,
    /// Bytes in owned spans.
    pub used_bytes: u64,
    /// Bytes in free spans.
    pub free_bytes: u64,
    /// Largest run of adjacent free regions.
    pub largest_free_run: u64,
    /// Entries in the partition.
    pub region_count: usize,
    /// Live sub-buffers.
    pub live_allocations: usize,
}

/// A free run that can hold a request.
struct Candidate {
    /// First region of the run.
    index: usize,
    /// Regions that must be merged to cover `needed`.
    merge_count: usize,
    run_size: u64,
    aligned_offset: u64,
    needed: u64,
}

/// Carves aligned sub-ranges out of a single backing buffer.
///
/// Not thread-safe.
pub struct SubBufferAllocator {
    buffer: vk::Buffer,
    buffer_size: u64,
    config: SubBufferConfig,
    regions: Vec<Region>,
    live: SlotMap<SubBufferId, SubBuffer>,
}

impl SubBufferAllocator {
    /// Track `buffer` as a single free region.
    pub fn new<B>(buffer: &B, config: SubBufferConfig) -> Result<Self>
    where
        B: BackingBuffer + ?Sized,
    {
        config.validate()?;
        let mut allocator = Self {
            buffer: vk::Buffer::null(),
            buffer_size: 0,
            config,
            regions: Vec::new(),
            live: SlotMap::with_key(),
        };
        allocator.reset_to(buffer);
        Ok(allocator)
    }

    /// Switch to a new backing buffer and chunk granularity.
    ///
    /// Every outstanding [`SubBuffer`] is forgotten; their ids become stale.
    pub fn set_buffer<B>(&mut self, buffer: &B, chunk_granularity: u64) -> Result<()>
    where
        B: BackingBuffer + ?Sized,
    {
        let config = SubBufferConfig {
            chunk_granularity,
            ..self.config.clone()
        };
        config.validate()?;
        self.config = config;
        self.reset_to(buffer);
        Ok(())
    }

    fn reset_to<B>(&mut self, buffer: &B)
    where
        B: BackingBuffer + ?Sized,
    {
        if !self.live.is_empty() {
            tracing::debug!(
                dropped = self.live.len(),
                "backing buffer replaced with live sub-buffers"
            );
        }
        self.buffer = buffer.raw();
        self.buffer_size = buffer.size();
        self.live.clear();
        self.regions.clear();
        if self.buffer_size > 0 {
            self.regions.push(Region::free(0, self.buffer_size));
        }
    }

    /// Native buffer the sub-ranges live in.
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size of the backing buffer in bytes.
    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    /// Unit every span is a multiple of.
    pub fn chunk_granularity(&self) -> u64 {
        self.config.chunk_granularity
    }

    /// Reserve `size` bytes at an offset that is a multiple of `alignment`.
    ///
    /// An alignment of zero is treated as one. Returns `None` when no free
    /// run can hold the request; the partition is left unchanged in that case.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<SubBuffer> {
        let alignment = alignment.max(1);
        if size > self.buffer_size || alignment > self.buffer_size {
            tracing::debug!(
                size,
                alignment,
                buffer_size = self.buffer_size,
                "request exceeds buffer"
            );
            return None;
        }
        let size = align_up(size, alignment);

        let Some(candidate) = self.find_candidate(size, alignment) else {
            tracing::debug!(size, alignment, "no free region fits");
            return None;
        };

        let index = candidate.index;
        if candidate.merge_count > 1 {
            self.regions.drain(index + 1..index + candidate.merge_count);
            self.regions[index] =
                Region::free(self.regions[index].allocation_offset, candidate.run_size);
        }

        let start = self.regions[index].allocation_offset;
        let remainder = self.regions[index].allocation_size - candidate.needed;

        let id = self.live.insert_with_key(|id| SubBuffer {
            id,
            allocation_offset: start,
            allocation_size: candidate.needed,
            offset: candidate.aligned_offset,
            size,
            alignment,
        });
        let sub_buffer = self.live[id];

        self.regions[index] = Region {
            allocation_offset: start,
            allocation_size: candidate.needed,
            offset: candidate.aligned_offset,
            size,
            alignment,
            owner: Some(id),
        };
        if remainder > 0 {
            self.regions
                .insert(index + 1, Region::free(start + candidate.needed, remainder));
        }

        tracing::trace!(
            offset = sub_buffer.offset,
            size,
            span = candidate.needed,
            "allocated sub-buffer"
        );
        Some(sub_buffer)
    }

    /// Reserve room for `count` values of `T`, aligned to `size_of::<T>()`.
    pub fn allocate_typed<T>(&mut self, count: u64) -> Option<SubBuffer> {
        let element = std::mem::size_of::<T>() as u64;
        let size = element.checked_mul(count)?;
        self.allocate(size, element)
    }

    fn find_candidate(&self, size: u64, alignment: u64) -> Option<Candidate> {
        let chunk = self.config.chunk_granularity;
        let mut best: Option<Candidate> = None;

        for (index, region) in self.regions.iter().enumerate() {
            if !region.is_free() {
                continue;
            }

            let start = region.allocation_offset;
            let aligned_offset = align_up(start, alignment);
            let needed = round_to_chunks(aligned_offset - start + size, chunk);

            // Grow forward over adjacent free regions until the request fits.
            let mut run_size = 0;
            let mut merge_count = 0;
            for next in self.regions[index..].iter().take_while(|r| r.is_free()) {
                run_size += next.allocation_size;
                merge_count += 1;
                if run_size >= needed {
                    break;
                }
            }
            if run_size < needed {
                continue;
            }

            let candidate = Candidate {
                index,
                merge_count,
                run_size,
                aligned_offset,
                needed,
            };
            match self.config.strategy {
                FitStrategy::FirstFit => return Some(candidate),
                FitStrategy::BestFit => {
                    if best.as_ref().map_or(true, |b| candidate.run_size < b.run_size) {
                        best = Some(candidate);
                    }
                }
            }
        }

        best
    }

    /// Return a sub-buffer's range to the free pool.
    ///
    /// The range becomes reusable immediately; adjacent free regions are only
    /// coalesced by [`Self::condense`] or by a later allocation that needs them.
    pub fn release(&mut self, id: SubBufferId) -> Result<()> {
        let sub_buffer = self.live.remove(id).ok_or(GpuError::UnknownSubBuffer)?;
        let region = self
            .regions
            .iter_mut()
            .find(|r| r.owner == Some(id))
            .ok_or_else(|| GpuError::InvalidState("live sub-buffer has no region".to_string()))?;
        *region = Region::free(region.allocation_offset, region.allocation_size);

        tracing::trace!(
            offset = sub_buffer.offset,
            span = sub_buffer.allocation_size,
            "released sub-buffer"
        );
        Ok(())
    }

    /// Live sub-buffer by id.
    pub fn get(&self, id: SubBufferId) -> Option<SubBuffer> {
        self.live.get(id).copied()
    }

    /// Merge every run of adjacent free regions into one region.
    ///
    /// Call at a point where no submitted work is using the buffer.
    pub fn condense(&mut self) {
        let before = self.regions.len();
        let mut merged: Vec<Region> = Vec::with_capacity(before);
        for region in self.regions.drain(..) {
            match merged.last_mut() {
                Some(last) if last.is_free() && region.is_free() => {
                    let merged_size = last.allocation_size + region.allocation_size;
                    *last = Region::free(last.allocation_offset, merged_size);
                }
                _ => merged.push(region),
            }
        }
        self.regions = merged;

        if self.regions.len() != before {
            tracing::debug!(before, after = self.regions.len(), "condensed sub-buffer regions");
        }
    }

    /// Alias of [`Self::condense`].
    pub fn merge_free_allocations(&mut self) {
        self.condense();
    }

    /// Current partition, ordered by offset.
    pub fn allocations(&self) -> &[Region] {
        &self.regions
    }

    /// Number of live sub-buffers.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Current occupancy.
    pub fn stats(&self) -> SubBufferStats {
        let mut stats = SubBufferStats {
            buffer_size: self.buffer_size,
            region_count: self.regions.len(),
            live_allocations: self.live.len(),
            ..SubBufferStats::default()
        };

        let mut run = 0;
        for region in &self.regions {
            if region.is_free() {
                stats.free_bytes += region.allocation_size;
                run += region.allocation_size;
                stats.largest_free_run = stats.largest_free_run.max(run);
            } else {
                stats.used_bytes += region.allocation_size;
                run = 0;
            }
        }
        stats
    }
}

/// One glyph per chunk. Used regions cycle through `#X@` and free regions
/// through `_.-`, so neighbouring regions stay distinguishable.
impl fmt::Display for SubBufferAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const USED: [char; 3] = ['#', 'X', '@'];
        const FREE: [char; 3] = ['_', '.', '-'];

        let chunk = self.config.chunk_granularity;
        let (mut used, mut free) = (0, 0);
        for region in &self.regions {
            let glyph = if region.is_free() {
                free += 1;
                FREE[(free - 1) % FREE.len()]
            } else {
                used += 1;
                USED[(used - 1) % USED.len()]
            };
            for _ in 0..region.allocation_size.div_ceil(chunk) {
                write!(f, "{glyph}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SubBufferAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubBufferAllocator")
            .field("buffer", &self.buffer)
            .field("buffer_size", &self.buffer_size)
            .field("chunk_granularity", &self.config.chunk_granularity)
            .field("regions", &self.regions.len())
            .field("live", &self.live.len())
            .finish()
    }
}
