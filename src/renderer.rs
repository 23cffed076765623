// Renderer - owns every Vulkan object and drives the frame loop
//
// Swapchain-sized state lives in `SwapchainResources` and is rebuilt as a
// unit whenever the surface changes. Everything else lives as long as the
// renderer.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use winit::window::Window;

use crate::backend::buffer::{create_uniform_buffers, GpuBuffer};
use crate::backend::commands::{record_draw_buffers, CommandPool, DrawRecording};
use crate::backend::descriptor::{DescriptorSetLayout, DescriptorSets};
use crate::backend::device::device_name;
use crate::backend::image::{GpuImage, DEPTH_FORMATS};
use crate::backend::pipeline::{Framebuffers, GraphicsPipeline, PipelineDesc, RenderPass};
use crate::backend::shader::ShaderModule;
use crate::backend::swapchain::AcquireOutcome;
use crate::backend::sync::{FramePacer, FrameSync};
use crate::backend::texture::Texture;
use crate::backend::{Surface, Swapchain, VulkanDevice, VulkanInstance};
use crate::camera::{Camera, UniformBufferObject};
use crate::config::{AssetsConfig, Config};
use crate::model::{Mesh, Vertex};

/// Objects whose size or count follows the swapchain.
/// Fields drop top to bottom, dependents first.
struct SwapchainResources {
    // Underscored fields are only referenced by the recorded command buffers
    command_buffers: Vec<vk::CommandBuffer>,
    _descriptor_sets: DescriptorSets,
    uniform_buffers: Vec<GpuBuffer>,
    _framebuffers: Framebuffers,
    _depth: GpuImage,
    _color: GpuImage,
    _pipeline: GraphicsPipeline,
    _render_pass: RenderPass,
    swapchain: Swapchain,
}

pub struct Renderer {
    // Drop order matters: fields are destroyed top to bottom
    resources: Option<SwapchainResources>,
    frames: Vec<FrameSync>,
    index_buffer: GpuBuffer,
    vertex_buffer: GpuBuffer,
    index_count: u32,
    texture: Texture,
    set_layout: DescriptorSetLayout,
    copy_pool: CommandPool,
    draw_pool: CommandPool,
    device: Arc<VulkanDevice>,
    surface: Surface,
    _instance: Arc<VulkanInstance>,

    pacer: FramePacer,
    depth_format: vk::Format,
    present_mode: vk::PresentModeKHR,
    clear_color: [f32; 4],
    assets: AssetsConfig,
    window_size: (u32, u32),
    resized: bool,
    minimized: bool,
}

impl Renderer {
    pub fn new(window: &Window, config: &Config) -> Result<Self> {
        log::info!("Initializing renderer...");

        let display_handle = window
            .display_handle()
            .context("Window has no display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Window has no window handle")?
            .as_raw();

        let instance = VulkanInstance::new(
            &config.window.title,
            display_handle,
            config.debug.validation_layers,
        )?;
        let surface = Surface::new(&instance, display_handle, window_handle)?;
        let device = VulkanDevice::new(instance.clone(), &surface, config.msaa_cap())?;

        let depth_format = device.find_supported_format(
            &DEPTH_FORMATS,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;
        log::info!("Depth format: {:?}", depth_format);

        let set_layout = DescriptorSetLayout::new(&device)?;
        let draw_pool = CommandPool::new(&device)?;
        let copy_pool = CommandPool::new(&device)?;

        let anisotropy = config.graphics.max_anisotropy;
        let texture = if config.assets.texture_path.is_empty() {
            Texture::white(&device, &copy_pool, anisotropy)?
        } else {
            Texture::load(&device, &copy_pool, &config.assets.texture_path, anisotropy)?
        };

        let mesh = if config.assets.model_path.is_empty() {
            log::info!("No model configured, using built-in quad");
            Mesh::quad()
        } else {
            Mesh::load_obj(&config.assets.model_path)?
        };

        let vertex_buffer = GpuBuffer::device_local(
            &device,
            &copy_pool,
            "vertex buffer",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &mesh.vertices,
        )?;
        let index_buffer = GpuBuffer::device_local(
            &device,
            &copy_pool,
            "index buffer",
            vk::BufferUsageFlags::INDEX_BUFFER,
            &mesh.indices,
        )?;

        let frames_in_flight = config.graphics.max_frames_in_flight;
        let frames = FrameSync::create_frames(&device, frames_in_flight)?;

        let size = window.inner_size();

        let mut renderer = Self {
            resources: None,
            frames,
            index_buffer,
            vertex_buffer,
            index_count: mesh.index_count(),
            texture,
            set_layout,
            copy_pool,
            draw_pool,
            device,
            surface,
            _instance: instance,
            pacer: FramePacer::new(frames_in_flight, 0),
            depth_format,
            present_mode: config.present_mode(),
            clear_color: config.graphics.clear_color,
            assets: config.assets.clone(),
            window_size: (size.width, size.height),
            resized: false,
            minimized: size.width == 0 || size.height == 0,
        };

        renderer.recreate_swapchain()?;

        log::info!("Renderer ready ({} frames in flight)", renderer.pacer.frames_in_flight());
        Ok(renderer)
    }

    /// Record a new window size; a zero dimension pauses rendering
    pub fn notify_resized(&mut self, width: u32, height: u32) {
        self.window_size = (width, height);
        if width == 0 || height == 0 {
            self.minimized = true;
        } else {
            self.minimized = false;
            self.resized = true;
        }
    }

    pub fn device_name(&self) -> String {
        device_name(&self.device.properties)
    }

    /// Draw one frame. Returns `false` when nothing was presented.
    pub fn render_frame(&mut self, camera: &Camera) -> Result<bool> {
        if self.minimized {
            return Ok(false);
        }
        if self.resources.is_none() {
            self.recreate_swapchain()?;
            if self.resources.is_none() {
                return Ok(false);
            }
        }

        let frame = self.pacer.current_frame();
        let (image_available, render_finished, in_flight) = {
            let sync = &self.frames[frame];
            sync.wait()?;
            (sync.image_available, sync.render_finished, sync.in_flight)
        };

        let outcome = self.resources()?.swapchain.acquire_next_image(image_available)?;
        let (image_index, acquire_suboptimal) = match outcome {
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire");
                self.recreate_swapchain()?;
                return Ok(false);
            }
            AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
        };

        // A previous slot may still be rendering into this image
        if let Some(owner) = self.pacer.claim_image(image_index as usize) {
            self.frames[owner].wait()?;
        }

        let device = self.device.clone();
        let resources = self
            .resources
            .as_mut()
            .context("Swapchain resources missing")?;

        let ubo: UniformBufferObject = camera.uniforms(resources.swapchain.extent);
        resources
            .uniform_buffers
            .get_mut(image_index as usize)
            .context("Acquired image has no uniform buffer")?
            .write(&ubo)?;

        self.frames[frame].reset()?;

        let wait_semaphores = [image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [resources.command_buffers[image_index as usize]];
        let signal_semaphores = [render_finished];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info], in_flight)
                .context("Failed to submit draw command buffer")?;
        }

        let presented = resources
            .swapchain
            .present(device.present_queue, image_index, &signal_semaphores)?;

        if self.resized || acquire_suboptimal || presented.needs_recreate() {
            log::debug!(
                "Recreating swapchain (resized={}, present={:?})",
                self.resized,
                presented
            );
            self.recreate_swapchain()?;
        }

        self.pacer.advance();
        Ok(true)
    }

    /// Tear down and rebuild everything sized by the swapchain
    pub fn recreate_swapchain(&mut self) -> Result<()> {
        self.resized = false;
        self.device.wait_idle()?;
        self.destroy_swapchain_resources();

        if self.minimized {
            return Ok(());
        }

        let caps = self.surface.capabilities(self.device.physical_device)?;
        if caps.current_extent.width == 0 || caps.current_extent.height == 0 {
            log::debug!("Surface has zero extent, waiting for a resize");
            self.minimized = true;
            return Ok(());
        }

        let resources = self.build_swapchain_resources()?;
        self.pacer.reset_images(resources.swapchain.image_count());
        self.resources = Some(resources);
        Ok(())
    }

    fn resources(&self) -> Result<&SwapchainResources> {
        self.resources.as_ref().context("Swapchain resources missing")
    }

    fn destroy_swapchain_resources(&mut self) {
        if let Some(resources) = self.resources.take() {
            self.draw_pool.free(&resources.command_buffers);
        }
    }

    fn build_swapchain_resources(&self) -> Result<SwapchainResources> {
        let device = &self.device;

        let swapchain = Swapchain::new(
            device.clone(),
            &self.surface,
            self.window_size,
            self.present_mode,
        )?;
        let extent = swapchain.extent;

        let render_pass = RenderPass::new(device, swapchain.format, self.depth_format)?;

        let vertex_shader = ShaderModule::load(device, &self.assets.vertex_shader)?;
        let fragment_shader = ShaderModule::load(device, &self.assets.fragment_shader)?;
        let pipeline = GraphicsPipeline::new(
            device,
            &render_pass,
            &PipelineDesc {
                vertex_shader: &vertex_shader,
                fragment_shader: &fragment_shader,
                vertex_bindings: &Vertex::binding_descriptions(),
                vertex_attributes: &Vertex::attribute_descriptions(),
                set_layout: self.set_layout.layout,
                extent,
            },
        )?;

        let color = GpuImage::color_target(device, extent, swapchain.format)?;
        let depth = GpuImage::depth_target(device, &self.copy_pool, extent, self.depth_format)?;

        let framebuffers = Framebuffers::new(
            device,
            &render_pass,
            &swapchain.image_views,
            color.view,
            depth.view,
            extent,
        )?;

        let uniform_buffers =
            create_uniform_buffers::<UniformBufferObject>(device, swapchain.image_count())?;
        let descriptor_sets =
            DescriptorSets::new(device, &self.set_layout, &uniform_buffers, &self.texture)?;

        let command_buffers = record_draw_buffers(
            device,
            &self.draw_pool,
            &DrawRecording {
                render_pass: render_pass.render_pass,
                pipeline: pipeline.pipeline,
                pipeline_layout: pipeline.layout,
                framebuffers: &framebuffers.framebuffers,
                descriptor_sets: &descriptor_sets.sets,
                vertex_buffer: self.vertex_buffer.buffer,
                index_buffer: self.index_buffer.buffer,
                index_count: self.index_count,
                extent,
                clear_color: self.clear_color,
            },
        )?;

        log::info!(
            "Swapchain resources ready: {}x{}, {} images",
            extent.width,
            extent.height,
            swapchain.image_count()
        );

        Ok(SwapchainResources {
            command_buffers,
            uniform_buffers,
            swapchain,
            _descriptor_sets: descriptor_sets,
            _framebuffers: framebuffers,
            _depth: depth,
            _color: color,
            _pipeline: pipeline,
            _render_pass: render_pass,
        })
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Shutting down renderer...");

        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle: {:#}", e);
        }
        self.destroy_swapchain_resources();
        // Remaining fields drop in declaration order
    }
}
