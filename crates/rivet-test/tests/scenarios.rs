//! End-to-end behaviour of the caches, descriptor pools, and sub-buffers.

use ash::vk;
use rivet_core::SubBufferConfig;
use rivet_gpu::{GpuError, GpuResources, ObjectCache, SamplerKey, StructuralKey, SubBufferAllocator};
use rivet_test::{check_partition, init_tracing, DescriptorScenario, MockBuffer, MockDevice};

#[test]
fn equal_sampler_keys_create_one_sampler() {
    init_tracing();
    let device = MockDevice::new();
    let mut cache: ObjectCache<SamplerKey> = ObjectCache::new();

    let first = SamplerKey::new(vk::Filter::LINEAR, vk::SamplerAddressMode::REPEAT);
    let second = SamplerKey::new(vk::Filter::LINEAR, vk::SamplerAddressMode::REPEAT);

    let a = cache.create(&device, &first).unwrap();
    let b = cache.create(&device, &second).unwrap();
    assert_eq!(a, b);
    assert_eq!(device.created(SamplerKey::KIND), 1);
    assert_eq!(cache.create_info(a).unwrap(), &first);

    unsafe { cache.destroy(&device) };
    assert_eq!(device.live_objects(), 0);
}

#[test]
fn full_pool_spills_then_is_reused_after_reset() {
    init_tracing();
    let mut scenario = DescriptorScenario::new(10).unwrap();

    let first_generation: Vec<_> = (0..10).map(|_| scenario.allocate().unwrap()).collect();
    assert_eq!(scenario.pool.pool_count(), 1);
    let first_pool = scenario.pool.pool_of(first_generation[0]).unwrap();

    let spill = scenario.allocate().unwrap();
    assert_eq!(scenario.pool.pool_count(), 2);
    let second_pool = scenario.pool.pool_of(spill).unwrap();
    assert_ne!(first_pool, second_pool);
    scenario.check_counters().unwrap();

    // Release in an order unrelated to allocation.
    for set in first_generation.iter().rev().step_by(2) {
        scenario.release(*set).unwrap();
    }
    for set in first_generation.iter().rev().skip(1).step_by(2) {
        scenario.release(*set).unwrap();
    }
    scenario.check_counters().unwrap();

    let stats = scenario.pool.pool_stats();
    assert_eq!((stats[0].allocated, stats[0].returned), (0, 0));
    assert_eq!(scenario.device.pool_resets(), 1);

    let next = scenario.allocate().unwrap();
    assert_eq!(scenario.pool.pool_of(next), Some(first_pool));
    assert_eq!(scenario.pool.pool_count(), 2);
}

#[test]
fn sub_buffer_reuses_released_range() {
    init_tracing();
    let buffer = MockBuffer::new(1024);
    let mut allocator = SubBufferAllocator::new(&buffer, SubBufferConfig::default()).unwrap();

    let first = allocator.allocate(100, 256).unwrap();
    assert_eq!((first.offset(), first.size()), (0, 256));
    let second = allocator.allocate(100, 256).unwrap();
    assert_eq!((second.offset(), second.size()), (256, 256));
    insta::assert_snapshot!(allocator.to_string(), @"#X__");

    allocator.release(first.id()).unwrap();
    let third = allocator.allocate(50, 256).unwrap();
    assert_eq!((third.offset(), third.size()), (0, 256));
    assert_eq!(allocator.stats().used_bytes, 512);
    check_partition(&allocator).unwrap();
}

#[test]
fn oversized_sub_buffer_request_fails_cleanly() {
    init_tracing();
    let buffer = MockBuffer::new(1024);
    let mut allocator = SubBufferAllocator::new(&buffer, SubBufferConfig::default()).unwrap();
    let before = allocator.allocations().to_vec();

    assert!(allocator.allocate(2000, 256).is_none());
    assert_eq!(allocator.allocations(), before.as_slice());
    check_partition(&allocator).unwrap();
}

#[test]
fn adjacent_released_ranges_coalesce() {
    init_tracing();
    let buffer = MockBuffer::new(4096);
    let mut allocator = SubBufferAllocator::new(&buffer, SubBufferConfig::default()).unwrap();

    let a = allocator.allocate(700, 4).unwrap();
    let b = allocator.allocate(100, 16).unwrap();
    let _pinned = allocator.allocate(1, 1).unwrap();
    allocator.release(a.id()).unwrap();
    allocator.release(b.id()).unwrap();
    allocator.merge_free_allocations();

    let head = allocator.allocations()[0];
    assert!(head.is_free());
    assert_eq!(head.allocation_size, a.allocation_size() + b.allocation_size());
    check_partition(&allocator).unwrap();
}

#[test]
fn registry_deduplicates_across_kinds() {
    init_tracing();
    let device = MockDevice::new();
    let resources = GpuResources::new(Default::default()).unwrap();

    let layout = rivet_gpu::DescriptorSetLayoutKey::builder()
        .storage_buffer(0, vk::ShaderStageFlags::COMPUTE)
        .storage_image(1, vk::ShaderStageFlags::COMPUTE)
        .build();

    let p1 = resources
        .pipeline_layout_for(&device, std::slice::from_ref(&layout), &[])
        .unwrap();
    let p2 = resources
        .pipeline_layout_for(&device, std::slice::from_ref(&layout), &[])
        .unwrap();
    assert_eq!(p1, p2);

    let sets: Vec<_> = (0..25)
        .map(|_| resources.allocate_descriptor_set_for_key(&device, &layout).unwrap())
        .collect();
    for set in &sets {
        unsafe { resources.release_descriptor_set(&device, *set).unwrap() };
    }
    // Two full generations were returned and reset; the third is partial.
    assert_eq!(device.pool_resets(), 2);
    assert!(matches!(
        unsafe { resources.release_descriptor_set(&device, sets[0]) },
        Err(GpuError::UnknownDescriptorSet(_))
    ));
    assert!(matches!(
        unsafe { resources.release_descriptor_set(&device, sets[24]) },
        Err(GpuError::DescriptorSetAlreadyReleased(_))
    ));

    unsafe { resources.destroy(&device) };
    assert_eq!(device.live_objects(), 0);
    assert_eq!(device.live_pools(), 0);
}
