//! Sampler keys.

use super::{ObjectCache, ObjectFactory, StructuralKey};
use crate::error::Result;
use ash::vk;
use std::hash::{Hash, Hasher};

/// Every parameter of a `VkSamplerCreateInfo`.
///
/// Float fields compare and hash by bit pattern, so `0.0` and `-0.0` are
/// distinct keys and a NaN key matches itself.
#[derive(Clone, Copy, Debug)]
pub struct SamplerKey {
    pub flags: vk::SamplerCreateFlags,
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub mip_lod_bias: f32,
    pub anisotropy_enable: bool,
    pub max_anisotropy: f32,
    pub compare_enable: bool,
    pub compare_op: vk::CompareOp,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: vk::BorderColor,
    pub unnormalized_coordinates: bool,
}

impl Default for SamplerKey {
    fn default() -> Self {
        Self {
            flags: vk::SamplerCreateFlags::empty(),
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            mip_lod_bias: 0.0,
            anisotropy_enable: false,
            max_anisotropy: 1.0,
            compare_enable: false,
            compare_op: vk::CompareOp::ALWAYS,
            min_lod: 0.0,
            max_lod: vk::LOD_CLAMP_NONE,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
            unnormalized_coordinates: false,
        }
    }
}

impl SamplerKey {
    /// Sampler using one filter for min/mag and one address mode on all axes.
    pub fn new(filter: vk::Filter, address_mode: vk::SamplerAddressMode) -> Self {
        Self {
            mag_filter: filter,
            min_filter: filter,
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            ..Self::default()
        }
    }

    /// Native create info for this key.
    pub fn to_create_info(&self) -> vk::SamplerCreateInfo<'static> {
        vk::SamplerCreateInfo::default()
            .flags(self.flags)
            .mag_filter(self.mag_filter)
            .min_filter(self.min_filter)
            .mipmap_mode(self.mipmap_mode)
            .address_mode_u(self.address_mode_u)
            .address_mode_v(self.address_mode_v)
            .address_mode_w(self.address_mode_w)
            .mip_lod_bias(self.mip_lod_bias)
            .anisotropy_enable(self.anisotropy_enable)
            .max_anisotropy(self.max_anisotropy)
            .compare_enable(self.compare_enable)
            .compare_op(self.compare_op)
            .min_lod(self.min_lod)
            .max_lod(self.max_lod)
            .border_color(self.border_color)
            .unnormalized_coordinates(self.unnormalized_coordinates)
    }

    fn float_fields(&self) -> [u32; 4] {
        [
            self.mip_lod_bias.to_bits(),
            self.max_anisotropy.to_bits(),
            self.min_lod.to_bits(),
            self.max_lod.to_bits(),
        ]
    }
}

impl From<&vk::SamplerCreateInfo<'_>> for SamplerKey {
    fn from(info: &vk::SamplerCreateInfo<'_>) -> Self {
        Self {
            flags: info.flags,
            mag_filter: info.mag_filter,
            min_filter: info.min_filter,
            mipmap_mode: info.mipmap_mode,
            address_mode_u: info.address_mode_u,
            address_mode_v: info.address_mode_v,
            address_mode_w: info.address_mode_w,
            mip_lod_bias: info.mip_lod_bias,
            anisotropy_enable: info.anisotropy_enable == vk::TRUE,
            max_anisotropy: info.max_anisotropy,
            compare_enable: info.compare_enable == vk::TRUE,
            compare_op: info.compare_op,
            min_lod: info.min_lod,
            max_lod: info.max_lod,
            border_color: info.border_color,
            unnormalized_coordinates: info.unnormalized_coordinates == vk::TRUE,
        }
    }
}

impl PartialEq for SamplerKey {
    fn eq(&self, other: &Self) -> bool {
        self.flags == other.flags
            && self.mag_filter == other.mag_filter
            && self.min_filter == other.min_filter
            && self.mipmap_mode == other.mipmap_mode
            && self.address_mode_u == other.address_mode_u
            && self.address_mode_v == other.address_mode_v
            && self.address_mode_w == other.address_mode_w
            && self.anisotropy_enable == other.anisotropy_enable
            && self.compare_enable == other.compare_enable
            && self.compare_op == other.compare_op
            && self.border_color == other.border_color
            && self.unnormalized_coordinates == other.unnormalized_coordinates
            && self.float_fields() == other.float_fields()
    }
}

impl Eq for SamplerKey {}

impl Hash for SamplerKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.flags.hash(state);
        self.mag_filter.hash(state);
        self.min_filter.hash(state);
        self.mipmap_mode.hash(state);
        self.address_mode_u.hash(state);
        self.address_mode_v.hash(state);
        self.address_mode_w.hash(state);
        self.anisotropy_enable.hash(state);
        self.compare_enable.hash(state);
        self.compare_op.hash(state);
        self.border_color.hash(state);
        self.unnormalized_coordinates.hash(state);
        self.float_fields().hash(state);
    }
}

impl StructuralKey for SamplerKey {
    type Handle = vk::Sampler;
    const KIND: &'static str = "sampler";
}

impl ObjectFactory<SamplerKey> for ash::Device {
    fn create_object(&self, key: &SamplerKey) -> Result<vk::Sampler> {
        let info = key.to_create_info();
        let sampler = unsafe { self.create_sampler(&info, None)? };
        Ok(sampler)
    }

    unsafe fn destroy_object(&self, handle: vk::Sampler) {
        unsafe { self.destroy_sampler(handle, None) };
    }
}

/// Cache of samplers keyed by their full parameter set.
pub type SamplerCache = ObjectCache<SamplerKey>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(key: &SamplerKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn separately_built_keys_are_equal() {
        let a = SamplerKey::new(vk::Filter::LINEAR, vk::SamplerAddressMode::REPEAT);
        let b = SamplerKey::new(vk::Filter::LINEAR, vk::SamplerAddressMode::REPEAT);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        // The default recipe is linear + repeat.
        assert_eq!(a, SamplerKey::default());
    }

    #[test]
    fn every_field_participates() {
        let base = SamplerKey::default();
        let variants = [
            SamplerKey {
                min_filter: vk::Filter::NEAREST,
                ..base
            },
            SamplerKey {
                address_mode_w: vk::SamplerAddressMode::MIRRORED_REPEAT,
                ..base
            },
            SamplerKey {
                max_anisotropy: 16.0,
                ..base
            },
            SamplerKey {
                compare_enable: true,
                ..base
            },
            SamplerKey {
                max_lod: 4.0,
                ..base
            },
        ];
        for variant in variants {
            assert_ne!(variant, base);
        }
    }

    #[test]
    fn floats_compare_by_bits() {
        let positive = SamplerKey {
            mip_lod_bias: 0.0,
            ..SamplerKey::default()
        };
        let negative = SamplerKey {
            mip_lod_bias: -0.0,
            ..SamplerKey::default()
        };
        assert_ne!(positive, negative);

        let nan = SamplerKey {
            min_lod: f32::NAN,
            ..SamplerKey::default()
        };
        let same_bits = SamplerKey {
            min_lod: f32::NAN,
            ..SamplerKey::default()
        };
        assert_eq!(nan, same_bits);
    }

    #[test]
    fn create_info_round_trip() {
        let key = SamplerKey {
            anisotropy_enable: true,
            max_anisotropy: 8.0,
            ..SamplerKey::new(vk::Filter::NEAREST, vk::SamplerAddressMode::CLAMP_TO_BORDER)
        };
        let info = key.to_create_info();
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_eq!(SamplerKey::from(&info), key);
    }
}
