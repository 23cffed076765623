// Sampled textures
//
// Decoded with the `image` crate, uploaded through a staging buffer, then
// mipmapped on the GPU.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::buffer::GpuBuffer;
use super::commands::CommandPool;
use super::image::{GpuImage, ImageDesc, Sampler};
use super::VulkanDevice;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Number of levels in a full mip chain down to 1x1
pub fn mip_levels(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

pub struct Texture {
    // Sampler first, it does not reference the image
    pub sampler: Sampler,
    pub image: GpuImage,
}

impl Texture {
    pub fn load(
        device: &Arc<VulkanDevice>,
        pool: &CommandPool,
        path: impl AsRef<Path>,
        max_anisotropy: f32,
    ) -> Result<Self> {
        let path = path.as_ref();
        let pixels = image::open(path)
            .with_context(|| format!("Failed to load texture image {}", path.display()))?
            .to_rgba8();
        let (width, height) = pixels.dimensions();

        log::info!("Loaded texture {} ({}x{})", path.display(), width, height);

        Self::from_rgba8(device, pool, width, height, pixels.as_raw(), max_anisotropy)
    }

    pub fn from_rgba8(
        device: &Arc<VulkanDevice>,
        pool: &CommandPool,
        width: u32,
        height: u32,
        pixels: &[u8],
        max_anisotropy: f32,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            anyhow::bail!(
                "Texture data is {} bytes, expected {} for {}x{} RGBA",
                pixels.len(),
                expected,
                width,
                height
            );
        }

        let staging = GpuBuffer::staging(device, "texture staging", pixels)?;
        let levels = mip_levels(width, height);

        let image = GpuImage::new(
            device,
            "texture",
            &ImageDesc {
                extent: vk::Extent2D { width, height },
                mip_levels: levels,
                samples: vk::SampleCountFlags::TYPE_1,
                format: TEXTURE_FORMAT,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::SAMPLED,
            },
        )?;

        image.transition_layout(
            pool,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        image.copy_from_buffer(pool, &staging)?;
        image.generate_mipmaps(pool)?;

        let sampler = Sampler::new(device, levels, max_anisotropy)?;

        log::debug!("Texture ready with {} mip levels", levels);
        Ok(Self { sampler, image })
    }

    /// Plain white 1x1 texture for meshes without one
    pub fn white(device: &Arc<VulkanDevice>, pool: &CommandPool, max_anisotropy: f32) -> Result<Self> {
        Self::from_rgba8(device, pool, 1, 1, &[255, 255, 255, 255], max_anisotropy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_lengths() {
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(2, 1), 2);
        assert_eq!(mip_levels(3, 3), 2);
        assert_eq!(mip_levels(256, 256), 9);
        assert_eq!(mip_levels(4096, 1024), 13);
        assert_eq!(mip_levels(1000, 600), 10);
    }

    #[test]
    fn mip_levels_match_log2() {
        for size in [1u32, 7, 64, 513, 2048, 3000] {
            let expected = (size as f32).log2().floor() as u32 + 1;
            assert_eq!(mip_levels(size, 1), expected, "size {}", size);
        }
    }
}
