// Buffer utilities for vertex, index, and uniform buffers
//
// Memory comes from the device's gpu-allocator instance. Host-visible
// buffers stay mapped for their whole life.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::commands::{one_time_submit, CommandPool};
use super::VulkanDevice;

pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Allocation,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    /// Create a buffer and bind fresh memory from `location`
    pub fn new(
        device: &Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e).with_context(|| format!("Failed to allocate memory for '{}'", name));
            }
        };

        // From here on Drop owns both handles
        let gpu_buffer = Self {
            buffer,
            size,
            allocation,
            device: device.clone(),
        };

        unsafe {
            device
                .device
                .bind_buffer_memory(buffer, gpu_buffer.allocation.memory(), gpu_buffer.allocation.offset())
        }
        .with_context(|| format!("Failed to bind memory for '{}'", name))?;

        Ok(gpu_buffer)
    }

    /// Host-visible buffer filled with `data`, used as a copy source
    pub fn staging<T: Pod>(device: &Arc<VulkanDevice>, name: &str, data: &[T]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = Self::new(
            device,
            name,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        buffer.write_bytes(bytes)?;
        Ok(buffer)
    }

    /// Device-local buffer with `usage`, filled through a staging copy
    pub fn device_local<T: Pod>(
        device: &Arc<VulkanDevice>,
        pool: &CommandPool,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        if data.is_empty() {
            anyhow::bail!("Refusing to create empty buffer '{}'", name);
        }

        let staging = Self::staging(device, &format!("{} staging", name), data)?;
        let buffer = Self::new(
            device,
            name,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )?;

        copy_buffer(device, pool, &staging, &buffer)?;

        log::debug!("Uploaded '{}' ({} bytes)", name, buffer.size);
        Ok(buffer)
    }

    /// Host-visible uniform buffer sized for one `T`
    pub fn uniform<T: Pod>(device: &Arc<VulkanDevice>, name: &str) -> Result<Self> {
        Self::new(
            device,
            name,
            std::mem::size_of::<T>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )
    }

    /// Copy `value` into the start of a mapped buffer
    pub fn write<T: Pod>(&mut self, value: &T) -> Result<()> {
        self.write_bytes(bytemuck::bytes_of(value))
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let mapped = self
            .allocation
            .mapped_slice_mut()
            .context("Buffer memory is not host visible")?;

        if bytes.len() > mapped.len() {
            anyhow::bail!("Write of {} bytes overflows buffer of {}", bytes.len(), mapped.len());
        }
        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
        let allocation = std::mem::take(&mut self.allocation);
        if let Err(e) = self.device.allocator.lock().free(allocation) {
            log::error!("Failed to free buffer memory: {}", e);
        }
    }
}

/// One uniform buffer per swapchain image
pub fn create_uniform_buffers<T: Pod>(device: &Arc<VulkanDevice>, count: usize) -> Result<Vec<GpuBuffer>> {
    (0..count)
        .map(|i| GpuBuffer::uniform::<T>(device, &format!("uniform buffer {}", i)))
        .collect()
}

fn copy_buffer(device: &VulkanDevice, pool: &CommandPool, src: &GpuBuffer, dst: &GpuBuffer) -> Result<()> {
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size: src.size.min(dst.size),
    };

    one_time_submit(device, pool, |command_buffer| unsafe {
        device
            .device
            .cmd_copy_buffer(command_buffer, src.buffer, dst.buffer, &[region]);
    })
}
