//! The accelerator boundary.
//!
//! Everything the scene and dispatch code needs from the GPU goes through the
//! [`Accelerator`] and [`FrameCommands`] traits, so the core can be driven by the
//! vulkano backend in [`crate::context`] or by an in-memory double in tests.

use std::path::Path;

use bytemuck::{Pod, Zeroable};

use crate::dispatch::ImageHandoff;
use crate::error::DeviceError;
use crate::sbt::ShaderBindingTableRegions;
use crate::shader::PushConstantRay;

/// A 64-bit device address of a buffer.
///
/// The address is a capability copied by value into descriptor records and
/// shader-visible blocks. It does not own anything: the buffer it was read from
/// decides how long it stays valid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
#[repr(transparent)]
pub struct DeviceAddress(u64);

impl DeviceAddress {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the address `offset` bytes past this one.
    #[must_use]
    pub const fn offset(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }
}

impl From<DeviceAddress> for u64 {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

/// What an uploaded buffer is used for. The backend derives usage flags and
/// alignment from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferRole {
    Vertices,
    Indices,
    Materials,
    MaterialIndices,
    Emitters,
    ObjectDescriptors,
    ShaderBindingTable,
}

/// The three device-reported constants that shape the shader binding table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RayTracingProperties {
    /// Size in bytes of one shader group handle.
    pub handle_size: u32,
    /// Each handle inside a region is padded up to this boundary.
    pub handle_alignment: u32,
    /// Each region starts on, and is sized to, a multiple of this boundary.
    pub base_alignment: u32,
}

/// A device-resident buffer.
pub trait DeviceBuffer {
    /// The device address of the first byte of the buffer.
    fn device_address(&self) -> DeviceAddress;

    /// Size of the buffer contents in bytes.
    fn size(&self) -> u64;
}

/// Setup-time services of the accelerator.
pub trait Accelerator {
    type Buffer: DeviceBuffer;
    type Texture;

    /// The shader group handle size and alignments of the device.
    fn ray_tracing_properties(&self) -> RayTracingProperties;

    /// Stages `data` into a new device-resident buffer and waits for the copy to
    /// complete. Staging memory and the one-shot command buffer are released on
    /// every exit path.
    fn upload(&self, role: BufferRole, data: &[u8]) -> Result<Self::Buffer, DeviceError>;

    /// Decodes the image at `path` into a sampled device texture.
    fn load_texture(&self, path: &Path) -> Result<Self::Texture, DeviceError>;
}

/// Per-frame commands recorded by the frame dispatcher.
///
/// The implementor owns the pipeline, descriptor sets and images being bound;
/// the dispatcher only decides the order and the per-frame data.
pub trait FrameCommands {
    fn bind_pipeline(&mut self) -> Result<(), DeviceError>;

    /// Binds the ray tracing set (set 0) and the scene set (set 1).
    fn bind_descriptor_sets(&mut self) -> Result<(), DeviceError>;

    fn push_constants(&mut self, constants: &PushConstantRay) -> Result<(), DeviceError>;

    fn trace_rays(
        &mut self,
        regions: &ShaderBindingTableRegions,
        dimensions: [u32; 3],
    ) -> Result<(), DeviceError>;

    /// Copies the ray traced output into the presentation image.
    fn copy_to_presentation(&mut self, handoff: &ImageHandoff) -> Result<(), DeviceError>;
}
