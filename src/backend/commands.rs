// Command pools and command buffers
//
// Per-image draw buffers are recorded once after each swapchain build and
// replayed every frame. Uploads go through short-lived one-time buffers.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

pub struct CommandPool {
    pub pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    /// Pool on the graphics queue family
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_families.graphics);

        let pool = unsafe { device.device.create_command_pool(&create_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self {
            pool,
            device: device.clone(),
        })
    }

    pub fn allocate(&self, count: usize) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);

        unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")
    }

    pub fn free(&self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        unsafe { self.device.device.free_command_buffers(self.pool, buffers) };
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Record `record` into a throwaway buffer, submit it to the graphics queue
/// and block until the queue is idle.
pub fn one_time_submit<F>(device: &VulkanDevice, pool: &CommandPool, record: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let command_buffer = pool
        .allocate(1)?
        .into_iter()
        .next()
        .context("Driver returned no command buffer")?;

    let result = submit_and_wait(device, command_buffer, record);
    pool.free(&[command_buffer]);
    result
}

fn submit_and_wait<F>(device: &VulkanDevice, command_buffer: vk::CommandBuffer, record: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    unsafe {
        device
            .device
            .begin_command_buffer(command_buffer, &begin_info)
            .context("Failed to begin one-time command buffer")?;

        record(command_buffer);

        device
            .device
            .end_command_buffer(command_buffer)
            .context("Failed to end one-time command buffer")?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        device
            .device
            .queue_submit(device.graphics_queue, &[submit_info], vk::Fence::null())
            .context("Failed to submit one-time command buffer")?;
        device
            .device
            .queue_wait_idle(device.graphics_queue)
            .context("Failed to wait for graphics queue")?;
    }

    Ok(())
}

/// Everything a per-image draw buffer needs to know
pub struct DrawRecording<'a> {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub framebuffers: &'a [vk::Framebuffer],
    pub descriptor_sets: &'a [vk::DescriptorSet],
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

/// Allocate and record one draw buffer per framebuffer
pub fn record_draw_buffers(
    device: &VulkanDevice,
    pool: &CommandPool,
    recording: &DrawRecording<'_>,
) -> Result<Vec<vk::CommandBuffer>> {
    if recording.framebuffers.len() != recording.descriptor_sets.len() {
        anyhow::bail!(
            "{} framebuffers but {} descriptor sets",
            recording.framebuffers.len(),
            recording.descriptor_sets.len()
        );
    }

    let command_buffers = pool.allocate(recording.framebuffers.len())?;

    for (i, &command_buffer) in command_buffers.iter().enumerate() {
        if let Err(e) = record_draw(device, command_buffer, recording, i) {
            pool.free(&command_buffers);
            return Err(e);
        }
    }

    log::debug!("Recorded {} draw command buffers", command_buffers.len());
    Ok(command_buffers)
}

fn record_draw(
    device: &VulkanDevice,
    command_buffer: vk::CommandBuffer,
    recording: &DrawRecording<'_>,
    image: usize,
) -> Result<()> {
    let clear_values = [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: recording.clear_color,
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ];

    let render_pass_info = vk::RenderPassBeginInfo::default()
        .render_pass(recording.render_pass)
        .framebuffer(recording.framebuffers[image])
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: recording.extent,
        })
        .clear_values(&clear_values);

    let begin_info = vk::CommandBufferBeginInfo::default();

    unsafe {
        let d = &device.device;

        d.begin_command_buffer(command_buffer, &begin_info)
            .context("Failed to begin command buffer")?;

        d.cmd_begin_render_pass(command_buffer, &render_pass_info, vk::SubpassContents::INLINE);
        d.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, recording.pipeline);
        d.cmd_bind_vertex_buffers(command_buffer, 0, &[recording.vertex_buffer], &[0]);
        d.cmd_bind_index_buffer(command_buffer, recording.index_buffer, 0, vk::IndexType::UINT32);
        d.cmd_bind_descriptor_sets(
            command_buffer,
            vk::PipelineBindPoint::GRAPHICS,
            recording.pipeline_layout,
            0,
            &[recording.descriptor_sets[image]],
            &[],
        );
        d.cmd_draw_indexed(command_buffer, recording.index_count, 1, 0, 0, 0);
        d.cmd_end_render_pass(command_buffer);

        d.end_command_buffer(command_buffer)
            .context("Failed to record command buffer")?;
    }

    Ok(())
}
