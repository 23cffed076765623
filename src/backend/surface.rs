// Window surface
//
// The surface is the bridge between Vulkan and the platform window.
// Swapchain support is always queried against it.

use anyhow::{Context, Result};
use ash::{khr, vk};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use super::VulkanInstance;

pub struct Surface {
    pub loader: khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
    // Keeps the instance alive until the surface is gone
    _instance: Arc<VulkanInstance>,
}

/// What a physical device can do with this surface
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// A surface with no formats or no present modes cannot host a swapchain
    pub fn new(
        capabilities: vk::SurfaceCapabilitiesKHR,
        formats: Vec<vk::SurfaceFormatKHR>,
        present_modes: Vec<vk::PresentModeKHR>,
    ) -> Result<Self> {
        if formats.is_empty() {
            anyhow::bail!("Surface reports no formats");
        }
        if present_modes.is_empty() {
            anyhow::bail!("Surface reports no present modes");
        }
        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }
}

impl Surface {
    pub fn new(
        instance: &Arc<VulkanInstance>,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Self> {
        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                display_handle,
                window_handle,
                None,
            )
        }
        .context("Failed to create window surface")?;

        let loader = khr::surface::Instance::new(&instance.entry, &instance.instance);

        Ok(Self {
            loader,
            surface,
            _instance: instance.clone(),
        })
    }

    /// Whether queue family `family` of `physical_device` can present here
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> Result<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.surface)
                .context("Failed to query surface support")
        }
    }

    pub fn swapchain_support(&self, physical_device: vk::PhysicalDevice) -> Result<SwapchainSupport> {
        let (capabilities, formats, present_modes) = unsafe {
            (
                self.loader
                    .get_physical_device_surface_capabilities(physical_device, self.surface)
                    .context("Failed to query surface capabilities")?,
                self.loader
                    .get_physical_device_surface_formats(physical_device, self.surface)
                    .context("Failed to query surface formats")?,
                self.loader
                    .get_physical_device_surface_present_modes(physical_device, self.surface)
                    .context("Failed to query surface present modes")?,
            )
        };
        SwapchainSupport::new(capabilities, formats, present_modes)
    }

    /// Current surface capabilities, used to spot a zero extent
    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .context("Failed to query surface capabilities")
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srgb() -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn support_with_formats_and_modes_is_accepted() {
        let support = SwapchainSupport::new(
            vk::SurfaceCapabilitiesKHR::default(),
            vec![srgb()],
            vec![vk::PresentModeKHR::FIFO],
        )
        .unwrap();
        assert_eq!(support.formats.len(), 1);
        assert_eq!(support.present_modes, vec![vk::PresentModeKHR::FIFO]);
    }

    #[test]
    fn empty_format_list_is_an_error() {
        let err = SwapchainSupport::new(
            vk::SurfaceCapabilitiesKHR::default(),
            Vec::new(),
            vec![vk::PresentModeKHR::FIFO],
        );
        assert!(err.is_err());
    }

    #[test]
    fn empty_present_mode_list_is_an_error() {
        let err = SwapchainSupport::new(vk::SurfaceCapabilitiesKHR::default(), vec![srgb()], Vec::new());
        assert!(err.is_err());
    }
}
