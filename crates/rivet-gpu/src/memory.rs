//! Backing buffers for sub-allocation.

use crate::error::{GpuError, Result};
use crate::sub_buffer::SubBuffer;
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;

/// A buffer that can be carved up by a [`crate::SubBufferAllocator`].
///
/// The allocator only reads the handle and size; it never creates or
/// destroys the buffer.
pub trait BackingBuffer {
    /// Native buffer handle, for binding.
    fn raw(&self) -> vk::Buffer;

    /// Total size in bytes.
    fn size(&self) -> u64;
}

/// A buffer bound to memory from a `gpu_allocator` allocator.
pub struct DeviceBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
}

impl DeviceBuffer {
    /// Create a buffer of `size` bytes and bind fresh memory to it.
    pub fn new(
        device: &ash::Device,
        allocator: &mut Allocator,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = match allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(GpuError::AllocationFailed(e.to_string()));
            }
        };

        if let Err(e) =
            unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
        {
            unsafe { device.destroy_buffer(buffer, None) };
            allocator
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
            return Err(e.into());
        }

        tracing::debug!(name, size, ?location, "created backing buffer");
        Ok(Self {
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Host pointer to the start of the buffer, if it is mapped.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .map(|p| p.as_ptr().cast::<u8>())
    }

    /// Copy `data` to the start of `sub_buffer` (must be host-visible).
    pub fn write_sub_buffer<T: Copy>(&self, sub_buffer: &SubBuffer, data: &[T]) -> Result<()> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;

        let byte_size = std::mem::size_of_val(data) as u64;
        if byte_size > sub_buffer.size() {
            return Err(GpuError::InvalidState(
                "Data too large for sub-buffer".to_string(),
            ));
        }
        if sub_buffer.offset() + byte_size > self.size {
            return Err(GpuError::InvalidState(
                "Sub-buffer lies outside this buffer".to_string(),
            ));
        }

        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr().cast::<u8>(),
                ptr.add(sub_buffer.offset() as usize),
                byte_size as usize,
            );
        }
        Ok(())
    }

    /// Free the memory and destroy the buffer.
    ///
    /// # Safety
    /// No pending work may use the buffer, and `device` and `allocator`
    /// must be the ones it was created with.
    pub unsafe fn destroy(mut self, device: &ash::Device, allocator: &mut Allocator) -> Result<()> {
        if let Some(allocation) = self.allocation.take() {
            allocator
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        }
        unsafe { device.destroy_buffer(self.buffer, None) };
        self.buffer = vk::Buffer::null();
        Ok(())
    }
}

impl BackingBuffer for DeviceBuffer {
    fn raw(&self) -> vk::Buffer {
        self.buffer
    }

    fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if self.buffer != vk::Buffer::null() {
            tracing::warn!(buffer = ?self.buffer, "backing buffer dropped without destroy()");
        }
    }
}
