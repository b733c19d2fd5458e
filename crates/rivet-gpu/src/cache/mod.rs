//! Memoizing caches for immutable Vulkan objects.
//!
//! Each cached object kind has a structural key: a plain value describing
//! every creation parameter, hashed and compared field by field. Asking a
//! cache for the same key twice yields the same native handle, and the
//! device is only asked to create the object once.

mod descriptor_set_layout;
mod pipeline_layout;
mod render_pass;
mod sampler;

pub use descriptor_set_layout::{
    DescriptorSetLayoutBuilder, DescriptorSetLayoutCache, DescriptorSetLayoutKey, LayoutBinding,
};
pub use pipeline_layout::{PipelineLayoutCache, PipelineLayoutKey, PushConstantRange};
pub use render_pass::{
    AttachmentDescription, AttachmentReference, RenderPassCache, RenderPassKey,
    SubpassDependency, SubpassDescription,
};
pub use sampler::{SamplerCache, SamplerKey};

use crate::error::{GpuError, Result};
use ash::vk::Handle;
use hashbrown::HashMap;
use std::fmt;
use std::hash::Hash;

/// A hashable description of a native object.
///
/// Two keys that compare equal must describe objects that are
/// interchangeable, and must hash identically.
pub trait StructuralKey: Clone + Eq + Hash + fmt::Debug {
    /// Native handle type produced for this key.
    type Handle: Handle + Copy + Eq + Hash + fmt::Debug;

    /// Short object kind name used in logs and errors.
    const KIND: &'static str;
}

/// Creates and destroys the native objects described by `K`.
///
/// `ash::Device` implements this for every key kind in this module.
pub trait ObjectFactory<K: StructuralKey> {
    /// Create a native object for `key`.
    fn create_object(&self, key: &K) -> Result<K::Handle>;

    /// Destroy a native object previously returned by [`Self::create_object`].
    ///
    /// # Safety
    /// `handle` must come from this factory and must no longer be in use by
    /// the device or by any object created from it.
    unsafe fn destroy_object(&self, handle: K::Handle);
}

/// Memoizing factory from structural keys to native handles.
///
/// The cache is the only owner allowed to destroy the handles it hands out,
/// and it never evicts individual entries. It does not track who still uses
/// a handle; [`ObjectCache::destroy`] must only run once every user is done.
pub struct ObjectCache<K: StructuralKey> {
    entries: HashMap<K, K::Handle>,
}

impl<K: StructuralKey> ObjectCache<K> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Return the handle for `key`, creating it through `factory` on a miss.
    ///
    /// A failed creation is not cached and not retried.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn create<F>(&mut self, factory: &F, key: &K) -> Result<K::Handle>
    where
        F: ObjectFactory<K> + ?Sized,
    {
        if let Some(&handle) = self.entries.get(key) {
            tracing::trace!(kind = K::KIND, ?handle, "cache hit");
            return Ok(handle);
        }

        let handle = factory.create_object(key)?;
        if handle.as_raw() == 0 {
            return Err(GpuError::ObjectCreation(format!(
                "{} factory returned a null handle",
                K::KIND
            )));
        }

        self.entries.insert(key.clone(), handle);
        tracing::debug!(
            kind = K::KIND,
            ?handle,
            cached = self.entries.len(),
            "created cached object"
        );
        Ok(handle)
    }

    /// Look up a handle without creating anything.
    pub fn get(&self, key: &K) -> Option<K::Handle> {
        self.entries.get(key).copied()
    }

    /// Reverse lookup: the key a handle was created from.
    ///
    /// This is a linear scan, meant for setup paths such as sizing
    /// descriptor pools from a layout.
    pub fn create_info(&self, handle: K::Handle) -> Result<&K> {
        self.entries
            .iter()
            .find_map(|(key, &h)| (h == handle).then_some(key))
            .ok_or_else(|| {
                GpuError::ResourceNotFound(format!(
                    "{} {handle:?} was not created by this cache",
                    K::KIND
                ))
            })
    }

    /// Returns true if `handle` was produced by this cache.
    pub fn contains(&self, handle: K::Handle) -> bool {
        self.entries.values().any(|&h| h == handle)
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been created yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over every cached handle.
    pub fn handles(&self) -> impl Iterator<Item = K::Handle> + '_ {
        self.entries.values().copied()
    }

    /// Destroy every cached object and empty the cache.
    ///
    /// # Safety
    /// `factory` must be the one the objects were created with, and no handle
    /// handed out by this cache may still be in use.
    pub unsafe fn destroy<F>(&mut self, factory: &F)
    where
        F: ObjectFactory<K> + ?Sized,
    {
        let count = self.entries.len();
        for (_, handle) in self.entries.drain() {
            unsafe { factory.destroy_object(handle) };
        }
        if count > 0 {
            tracing::debug!(kind = K::KIND, count, "destroyed cached objects");
        }
    }
}

impl<K: StructuralKey> Default for ObjectCache<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StructuralKey> fmt::Debug for ObjectCache<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCache")
            .field("kind", &K::KIND)
            .field("len", &self.entries.len())
            .finish()
    }
}

impl<K: StructuralKey> Drop for ObjectCache<K> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            tracing::warn!(
                kind = K::KIND,
                leaked = self.entries.len(),
                "object cache dropped without destroy()"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;
    use ash::vk;

    #[test]
    fn equal_keys_share_one_handle() {
        let device = MockDevice::new();
        let mut cache = SamplerCache::new();

        let a = SamplerKey::new(vk::Filter::LINEAR, vk::SamplerAddressMode::REPEAT);
        let b = SamplerKey::new(vk::Filter::LINEAR, vk::SamplerAddressMode::REPEAT);

        let first = cache.create(&device, &a).unwrap();
        let second = cache.create(&device, &b).unwrap();

        assert_eq!(first, second);
        assert_eq!(device.created(SamplerKey::KIND), 1);
        assert_eq!(cache.len(), 1);
        unsafe { cache.destroy(&device) };
    }

    #[test]
    fn different_keys_get_different_handles() {
        let device = MockDevice::new();
        let mut cache = SamplerCache::new();

        let a = SamplerKey::default();
        let b = SamplerKey {
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            ..SamplerKey::default()
        };

        let first = cache.create(&device, &a).unwrap();
        let second = cache.create(&device, &b).unwrap();

        assert_ne!(first, second);
        assert_eq!(device.created(SamplerKey::KIND), 2);
        unsafe { cache.destroy(&device) };
    }

    #[test]
    fn reverse_lookup() {
        let device = MockDevice::new();
        let mut cache = SamplerCache::new();
        let key = SamplerKey::new(vk::Filter::NEAREST, vk::SamplerAddressMode::CLAMP_TO_EDGE);

        let handle = cache.create(&device, &key).unwrap();
        assert_eq!(cache.create_info(handle).unwrap(), &key);
        assert!(cache.contains(handle));

        let foreign = vk::Sampler::from_raw(0xdead);
        assert!(matches!(
            cache.create_info(foreign),
            Err(GpuError::ResourceNotFound(_))
        ));
        unsafe { cache.destroy(&device) };
    }

    #[test]
    fn failed_creation_is_not_cached() {
        let device = MockDevice::new();
        let mut cache = SamplerCache::new();
        let key = SamplerKey::default();

        device.fail_next_creation();
        assert!(cache.create(&device, &key).is_err());
        assert!(cache.is_empty());

        // Next attempt goes back to the device.
        cache.create(&device, &key).unwrap();
        assert_eq!(device.created(SamplerKey::KIND), 1);
        unsafe { cache.destroy(&device) };
    }

    #[test]
    fn destroy_releases_every_handle() {
        let device = MockDevice::new();
        let mut cache = SamplerCache::new();

        for filter in [vk::Filter::LINEAR, vk::Filter::NEAREST] {
            cache.create(&device, &SamplerKey::new(filter, vk::SamplerAddressMode::REPEAT))
                .unwrap();
        }
        unsafe { cache.destroy(&device) };

        assert!(cache.is_empty());
        assert_eq!(device.destroyed(SamplerKey::KIND), 2);
        assert_eq!(device.live_objects(), 0);
    }
}
