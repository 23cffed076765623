// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. Modules are read from disk at runtime and
// only live until the pipeline that uses them is built.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::VulkanDevice;

pub struct ShaderModule {
    pub module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    pub fn load(device: &Arc<VulkanDevice>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = read_shader_file(path)?;

        Self::from_bytes(device, &bytes)
            .with_context(|| format!("Invalid shader {}", path.display()))
    }

    pub fn from_bytes(device: &Arc<VulkanDevice>, bytes: &[u8]) -> Result<Self> {
        let code = read_spirv(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        Ok(Self {
            module,
            device: device.clone(),
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}

/// SPIR-V is produced by build.rs through glslc; without it nothing is on disk
pub fn read_shader_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| {
        format!(
            "Failed to read shader {} (compile shaders/*.vert and *.frag with glslc)",
            path.display()
        )
    })
}

/// Re-align raw bytes into SPIR-V words, checking size and magic number
pub fn read_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).context("Malformed SPIR-V")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_aligned_spirv() {
        // Magic number, version 1.0, generator, bound, schema
        let words: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        assert_eq!(read_spirv(&bytes).unwrap(), words.to_vec());
    }

    #[test]
    fn missing_shader_names_the_compiler() {
        let err = read_shader_file(Path::new("shaders/not-built.spv")).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("shaders/not-built.spv"), "{}", message);
        assert!(message.contains("glslc"), "{}", message);
    }

    #[test]
    fn rejects_truncated_input() {
        assert!(read_spirv(&[0x03, 0x02, 0x23]).is_err());
    }
}
