use std::ffi::CStr;
use std::io::Cursor;
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

const ENTRY_POINT: &CStr = c"main";

#[derive(Debug, Error)]
pub enum CreateShaderModuleError {
    #[error("SPIR-V is {0} bytes, not a whole number of words")]
    InvalidLength(usize),

    #[error("SPIR-V module is empty")]
    Empty,

    #[error("Not a SPIR-V module: first word is {0:#010x}")]
    InvalidMagic(u32),

    #[error("Vulkan error creating shader module: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl From<ShaderStage> for vk::ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => Self::VERTEX,
            ShaderStage::Fragment => Self::FRAGMENT,
        }
    }
}

/// Decode a SPIR-V binary of either byte order into native words.
fn decode_spirv(bytes: &[u8]) -> Result<Vec<u32>, CreateShaderModuleError> {
    if !bytes.len().is_multiple_of(4) {
        return Err(CreateShaderModuleError::InvalidLength(bytes.len()));
    }
    let first = match bytes.first_chunk::<4>() {
        Some(&first) => u32::from_le_bytes(first),
        None => return Err(CreateShaderModuleError::Empty),
    };
    if first != SPIRV_MAGIC && first.swap_bytes() != SPIRV_MAGIC {
        return Err(CreateShaderModuleError::InvalidMagic(first));
    }
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|_| CreateShaderModuleError::InvalidLength(bytes.len()))
}

/// Compiled SPIR-V on the device. Only needed until the pipelines using it
/// are built.
pub struct ShaderModule {
    device: Arc<Device>,
    raw: vk::ShaderModule,
}

impl std::fmt::Debug for ShaderModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ShaderModule").field(&self.raw).finish()
    }
}

impl ShaderModule {
    pub fn new(
        device: &Arc<Device>,
        spirv: &[u8],
        name: Option<&str>,
    ) -> Result<Self, CreateShaderModuleError> {
        let words = decode_spirv(spirv)?;
        // SAFETY: words is a SPIR-V module with a valid header.
        let raw = unsafe {
            device.create_raw_shader_module(
                &vk::ShaderModuleCreateInfo::default().code(&words),
            )
        }
        .map_err(CreateShaderModuleError::Vulkan)?;

        // SAFETY: raw was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(raw, name) } {
            tracing::warn!("Failed to name shader module {raw:?}: {e}");
        }
        tracing::debug!("Created shader module {raw:?} ({} words)", words.len());

        Ok(Self {
            device: Arc::clone(device),
            raw,
        })
    }

    /// The module's `main` function as `stage`.
    pub fn main_entry_point(&self, stage: ShaderStage) -> EntryPoint<'_> {
        EntryPoint {
            module: self,
            stage,
        }
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        tracing::debug!("Dropping shader module {:?}", self.raw);
        // SAFETY: pipelines do not reference their modules after creation.
        unsafe { self.device.destroy_raw_shader_module(self.raw) };
    }
}

/// One pipeline stage: a borrowed module run as `stage`.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoint<'a> {
    module: &'a ShaderModule,
    stage: ShaderStage,
}

impl EntryPoint<'_> {
    pub fn as_pipeline_stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.into())
            .module(self.module.raw)
            .name(ENTRY_POINT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_bytes(words: &[u32], to_word: fn(u32) -> [u8; 4]) -> Vec<u8> {
        words.iter().copied().flat_map(to_word).collect()
    }

    #[test]
    fn partial_words_are_rejected() {
        let mut bytes = to_bytes(&[SPIRV_MAGIC, 0x0001_0000], u32::to_le_bytes);
        bytes.pop();
        assert!(matches!(
            decode_spirv(&bytes),
            Err(CreateShaderModuleError::InvalidLength(7))
        ));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(decode_spirv(&[]), Err(CreateShaderModuleError::Empty)));
    }

    #[test]
    fn foreign_data_is_rejected() {
        let bytes = to_bytes(&[0xdead_beef, 0], u32::to_le_bytes);
        assert!(matches!(
            decode_spirv(&bytes),
            Err(CreateShaderModuleError::InvalidMagic(0xdead_beef))
        ));
    }

    #[test]
    fn both_byte_orders_decode() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 42];
        for to_word in [u32::to_le_bytes, u32::to_be_bytes] {
            let decoded = decode_spirv(&to_bytes(&words, to_word)).unwrap();
            assert_eq!(decoded, words);
        }
    }

    #[test]
    fn unaligned_input_decodes() {
        let words = [SPIRV_MAGIC, 7];
        let mut storage = vec![0u8];
        storage.extend(to_bytes(&words, u32::to_le_bytes));
        assert_eq!(decode_spirv(&storage[1..]).unwrap(), words);
    }

    #[test]
    fn stages_map_to_flags() {
        assert_eq!(
            vk::ShaderStageFlags::from(ShaderStage::Vertex),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            vk::ShaderStageFlags::from(ShaderStage::Fragment),
            vk::ShaderStageFlags::FRAGMENT
        );
    }
}
