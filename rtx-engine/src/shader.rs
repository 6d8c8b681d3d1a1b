//! Shader binaries and the data layouts they share with the host.

use std::{path::Path, sync::Arc};

use vulkano::{
    device::Device,
    shader::{ShaderModule, ShaderModuleCreateInfo},
};

use crate::error::DeviceError;

mod layout;

pub use layout::{
    Emitter, Material, MatrixUniforms, ObjectDescriptor, PushConstantRay, Vertex,
    ALIGNMENT_SENTINEL,
};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decodes a SPIR-V binary into 32-bit words, accepting either byte order.
pub fn spirv_words(path: &Path, bytes: &[u8]) -> Result<Vec<u32>, DeviceError> {
    let invalid = |message: &str| DeviceError::InvalidShader {
        path: path.to_path_buf(),
        message: message.to_string(),
    };

    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(invalid("size is not a multiple of 4 bytes"));
    }

    let mut words = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect::<Vec<_>>();

    if words[0] == SPIRV_MAGIC.swap_bytes() {
        for word in &mut words {
            *word = word.swap_bytes();
        }
    }
    if words[0] != SPIRV_MAGIC {
        return Err(invalid("missing SPIR-V magic number"));
    }

    Ok(words)
}

/// Loads a precompiled shader binary from disk into a shader module.
pub fn load_module(device: &Arc<Device>, path: &Path) -> Result<Arc<ShaderModule>, DeviceError> {
    let bytes = std::fs::read(path).map_err(|source| DeviceError::ShaderBinary {
        path: path.to_path_buf(),
        source,
    })?;
    let words = spirv_words(path, &bytes)?;

    // SAFETY: the words come from a SPIR-V binary produced by the shader compiler
    let module = unsafe { ShaderModule::new(device.clone(), ShaderModuleCreateInfo::new(&words)) }
        .map_err(DeviceError::vulkan("create shader module"))?;

    tracing::trace!("Shader module {} loaded", path.display());

    Ok(module)
}
