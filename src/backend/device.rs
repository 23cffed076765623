// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (prefer discrete GPU)
// - Graphics + present queue family lookup
// - Logical device + queue creation
// - MSAA sample count selection
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::{khr, vk};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use super::instance::missing_names;
use super::{Surface, VulkanInstance};

/// Device extensions the renderer cannot run without
const DEVICE_EXTENSIONS: &[&CStr] = &[khr::swapchain::NAME];

/// Queue family indices used by the renderer. They may be equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Pick the first graphics-capable family and the first family that
    /// can present. Returns `None` if either is missing.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> Result<bool>,
    ) -> Result<Option<Self>> {
        let mut graphics = None;
        let mut present = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;

            if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }
            if present.is_none() && supports_present(index)? {
                present = Some(index);
            }
            if graphics.is_some() && present.is_some() {
                break;
            }
        }

        Ok(graphics
            .zip(present)
            .map(|(graphics, present)| Self { graphics, present }))
    }

    /// Distinct family indices, one queue is created per entry
    pub fn unique(&self) -> Vec<u32> {
        BTreeSet::from([self.graphics, self.present]).into_iter().collect()
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// Highest sample count supported by both color and depth framebuffers,
/// never above `cap`
pub fn max_usable_sample_count(
    limits: &vk::PhysicalDeviceLimits,
    cap: vk::SampleCountFlags,
) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;

    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&samples| samples.as_raw() <= cap.as_raw() && counts.contains(samples))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Index of the device to use: the first suitable discrete GPU, otherwise
/// the first suitable device of any kind
pub fn select_device(candidates: &[(vk::PhysicalDeviceType, bool)]) -> Option<usize> {
    candidates
        .iter()
        .position(|&(kind, suitable)| suitable && kind == vk::PhysicalDeviceType::DISCRETE_GPU)
        .or_else(|| candidates.iter().position(|&(_, suitable)| suitable))
}

/// Queue families of a checked device. A device whose queries fail is
/// skipped as unsuitable so selection can move on to the next one.
fn usable(name: &str, checked: Result<Option<QueueFamilies>>) -> Option<QueueFamilies> {
    checked.unwrap_or_else(|e| {
        log::warn!("Skipping GPU {}: {:#}", name, e);
        None
    })
}

/// First format in `candidates` whose `tiling` features include `features`
pub fn find_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    mut properties: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| {
        let props = properties(format);
        match tiling {
            vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
            vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
            _ => false,
        }
    })
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Dropped by hand before the device goes away
    pub allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: Arc<VulkanInstance>,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilies,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
    pub msaa_samples: vk::SampleCountFlags,
}

impl VulkanDevice {
    /// Pick a GPU that can render to `surface` and create the logical device.
    pub fn new(
        instance: Arc<VulkanInstance>,
        surface: &Surface,
        msaa_cap: vk::SampleCountFlags,
    ) -> Result<Arc<Self>> {
        let (physical_device, queue_families) = Self::pick_physical_device(&instance, surface)?;

        let properties = unsafe {
            instance.instance.get_physical_device_properties(physical_device)
        };
        let msaa_samples = max_usable_sample_count(&properties.limits, msaa_cap);

        log::info!("Selected GPU: {}", device_name(&properties));
        log::info!("API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version));
        log::info!("Queue families: graphics={} present={}",
            queue_families.graphics, queue_families.present);
        log::info!("MSAA samples: {:?}", msaa_samples);

        let device = Self::create_logical_device(&instance, physical_device, &queue_families)?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create GPU memory allocator")?;

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            instance,
            graphics_queue,
            present_queue,
            queue_families,
            properties,
            msaa_samples,
        }))
    }

    fn pick_physical_device(
        instance: &VulkanInstance,
        surface: &Surface,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let devices = unsafe { instance.instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let mut candidates = Vec::with_capacity(devices.len());
        let mut families = Vec::with_capacity(devices.len());

        for &device in &devices {
            let props = unsafe { instance.instance.get_physical_device_properties(device) };
            let found = usable(&device_name(&props), Self::check_device(instance, surface, device));

            log::debug!("GPU candidate: {} ({:?}) suitable={}",
                device_name(&props), props.device_type, found.is_some());

            candidates.push((props.device_type, found.is_some()));
            families.push(found);
        }

        let index = select_device(&candidates)
            .context("No GPU supports the swapchain, anisotropic sampling and presentation")?;

        if candidates[index].0 != vk::PhysicalDeviceType::DISCRETE_GPU {
            log::warn!("No suitable discrete GPU, using fallback device");
        }

        let families = families[index].context("Selected device lost its queue families")?;
        Ok((devices[index], families))
    }

    /// Queue families of `device` if it meets every requirement
    fn check_device(
        instance: &VulkanInstance,
        surface: &Surface,
        device: vk::PhysicalDevice,
    ) -> Result<Option<QueueFamilies>> {
        let features = unsafe { instance.instance.get_physical_device_features(device) };
        if features.sampler_anisotropy != vk::TRUE {
            return Ok(None);
        }

        let extensions = unsafe { instance.instance.enumerate_device_extension_properties(device) }
            .context("Failed to enumerate device extensions")?;
        let available: Vec<&CStr> = extensions
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .collect();
        if !missing_names(DEVICE_EXTENSIONS, &available).is_empty() {
            return Ok(None);
        }

        // Fails when the surface offers no formats or present modes
        surface.swapchain_support(device)?;

        let queue_families = unsafe {
            instance.instance.get_physical_device_queue_family_properties(device)
        };
        QueueFamilies::find(&queue_families, |index| surface.supports_present(device, index))
    }

    fn create_logical_device(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
        queue_families: &QueueFamilies,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions: Vec<_> = DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        unsafe { instance.instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Result<vk::Format> {
        find_supported_format(candidates, tiling, features, |format| self.format_properties(format))
            .with_context(|| format!("None of {:?} supports {:?}", candidates, features))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}

pub fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    properties
        .device_name_as_c_str()
        .ok()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "<unnamed>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn shared_graphics_and_present_family() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let found = QueueFamilies::find(&families, |_| Ok(true)).unwrap().unwrap();
        assert_eq!(found, QueueFamilies { graphics: 0, present: 0 });
        assert!(found.is_shared());
        assert_eq!(found.unique(), vec![0]);
    }

    #[test]
    fn separate_present_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let found = QueueFamilies::find(&families, |index| Ok(index == 2))
            .unwrap()
            .unwrap();
        assert_eq!(found, QueueFamilies { graphics: 1, present: 2 });
        assert!(!found.is_shared());
        assert_eq!(found.unique(), vec![1, 2]);
    }

    #[test]
    fn flags_without_graphics_are_not_graphics() {
        let families = [family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        assert_eq!(QueueFamilies::find(&families, |_| Ok(true)).unwrap(), None);
    }

    #[test]
    fn stops_querying_once_complete() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::GRAPHICS)];
        let mut queried = Vec::new();
        QueueFamilies::find(&families, |index| {
            queried.push(index);
            Ok(true)
        })
        .unwrap();
        assert_eq!(queried, vec![0]);
    }

    #[test]
    fn present_query_errors_propagate() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(QueueFamilies::find(&families, |_| anyhow::bail!("lost")).is_err());
    }

    fn limits(color: vk::SampleCountFlags, depth: vk::SampleCountFlags) -> vk::PhysicalDeviceLimits {
        vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: color,
            framebuffer_depth_sample_counts: depth,
            ..Default::default()
        }
    }

    #[test]
    fn sample_count_uses_common_maximum() {
        let l = limits(
            vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_2 | vk::SampleCountFlags::TYPE_4 | vk::SampleCountFlags::TYPE_8,
            vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_2 | vk::SampleCountFlags::TYPE_4,
        );
        assert_eq!(
            max_usable_sample_count(&l, vk::SampleCountFlags::TYPE_64),
            vk::SampleCountFlags::TYPE_4
        );
    }

    #[test]
    fn sample_count_respects_cap() {
        let all = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4
            | vk::SampleCountFlags::TYPE_8;
        let l = limits(all, all);
        assert_eq!(
            max_usable_sample_count(&l, vk::SampleCountFlags::TYPE_2),
            vk::SampleCountFlags::TYPE_2
        );
        assert_eq!(
            max_usable_sample_count(&l, vk::SampleCountFlags::TYPE_1),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn sample_count_falls_back_to_one() {
        let l = limits(vk::SampleCountFlags::TYPE_1, vk::SampleCountFlags::TYPE_1);
        assert_eq!(
            max_usable_sample_count(&l, vk::SampleCountFlags::TYPE_64),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn prefers_suitable_discrete_gpu() {
        use vk::PhysicalDeviceType as T;
        let candidates = [
            (T::INTEGRATED_GPU, true),
            (T::DISCRETE_GPU, false),
            (T::DISCRETE_GPU, true),
        ];
        assert_eq!(select_device(&candidates), Some(2));
    }

    #[test]
    fn falls_back_to_first_suitable_device() {
        use vk::PhysicalDeviceType as T;
        let candidates = [(T::DISCRETE_GPU, false), (T::CPU, true), (T::INTEGRATED_GPU, true)];
        assert_eq!(select_device(&candidates), Some(1));
        assert_eq!(select_device(&[(T::DISCRETE_GPU, false)]), None);
        assert_eq!(select_device(&[]), None);
    }

    #[test]
    fn failing_device_is_skipped_for_the_next_one() {
        use vk::PhysicalDeviceType as T;
        let families = QueueFamilies { graphics: 0, present: 0 };
        let checked = [
            (T::CPU, usable("software", Err(anyhow::anyhow!("surface formats unavailable")))),
            (T::DISCRETE_GPU, usable("discrete", Ok(Some(families)))),
        ];
        let candidates: Vec<_> = checked.iter().map(|(kind, found)| (*kind, found.is_some())).collect();

        assert_eq!(candidates, vec![(T::CPU, false), (T::DISCRETE_GPU, true)]);
        assert_eq!(select_device(&candidates), Some(1));
        assert_eq!(checked[1].1, Some(families));
    }

    #[test]
    fn unsuitable_device_stays_unsuitable() {
        assert_eq!(usable("integrated", Ok(None)), None);
    }

    #[test]
    fn unnamed_device_gets_placeholder() {
        let mut properties = vk::PhysicalDeviceProperties::default();
        assert_eq!(device_name(&properties), "<unnamed>");

        for (dst, src) in properties.device_name.iter_mut().zip(b"Test GPU") {
            *dst = *src as std::ffi::c_char;
        }
        assert_eq!(device_name(&properties), "Test GPU");
    }

    #[test]
    fn supported_format_respects_tiling() {
        let props = |format: vk::Format| match format {
            vk::Format::D32_SFLOAT => vk::FormatProperties {
                linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                ..Default::default()
            },
            vk::Format::D24_UNORM_S8_UINT => vk::FormatProperties {
                optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                ..Default::default()
            },
            _ => vk::FormatProperties::default(),
        };
        let candidates = [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ];
        let features = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;

        assert_eq!(
            find_supported_format(&candidates, vk::ImageTiling::OPTIMAL, features, props),
            Some(vk::Format::D24_UNORM_S8_UINT)
        );
        assert_eq!(
            find_supported_format(&candidates, vk::ImageTiling::LINEAR, features, props),
            Some(vk::Format::D32_SFLOAT)
        );
        assert_eq!(
            find_supported_format(
                &candidates,
                vk::ImageTiling::OPTIMAL,
                vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR,
                props
            ),
            None
        );
    }
}
