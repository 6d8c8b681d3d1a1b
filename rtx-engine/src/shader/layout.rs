//! Structures shared byte-for-byte with the ray tracing shaders.
//!
//! All of them are `#[repr(C)]` with only 4-byte scalars (and 8-byte device
//! addresses), matching the scalar block layout the shaders declare. Any
//! reordering or width change breaks host/device agreement, so the sizes are
//! pinned at compile time below.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

use crate::device::DeviceAddress;

/// Value stamped into [`PushConstantRay::alignment_test`] every frame. The ray
/// generation shader paints a marker colour when it reads anything else.
pub const ALIGNMENT_SENTINEL: i32 = 1234;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tex_coord: Vec2,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Material {
    pub diffuse: Vec3,
    pub specular: Vec3,
    pub emission: Vec3,
    pub shininess: f32,
    /// Index into the object's textures, `-1` when untextured.
    pub texture_id: i32,
}

impl Material {
    pub const UNTEXTURED: i32 = -1;

    #[must_use]
    pub fn is_emissive(&self) -> bool {
        self.emission.length_squared() > 0.0
    }
}

/// A light emitting triangle.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Emitter {
    /// Scratch slot written by the ray generation shader while sampling.
    pub point: Vec3,
    pub v0: Vec3,
    pub v1: Vec3,
    pub v2: Vec3,
    pub emission: Vec3,
    pub normal: Vec3,
    pub area: f32,
    /// Index of the triangle in its object's index buffer.
    pub index: u32,
}

/// Per-object record used by shaders for bindless access to geometry.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ObjectDescriptor {
    /// Offset of the object's first texture in the global texture array.
    pub texture_offset: i32,
    pub _padding: u32,
    pub vertex_address: DeviceAddress,
    pub index_address: DeviceAddress,
    pub material_address: DeviceAddress,
    pub material_index_address: DeviceAddress,
}

/// Per-frame state pushed to the ray tracing stages.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PushConstantRay {
    pub frame_seed: i32,
    /// Russian roulette threshold.
    pub rr: f32,
    /// Maximum bounce depth.
    pub depth: i32,
    /// Boolean stored in 4 bytes.
    pub explicit_light: u32,
    /// Boolean stored in 4 bytes: start accumulation from scratch.
    pub clear: u32,
    pub exposure: f32,
    pub alignment_test: i32,
}

/// Camera matrices, shared with the rasterization path.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MatrixUniforms {
    pub view_proj: Mat4,
    pub prior_view_proj: Mat4,
    pub view_inverse: Mat4,
    pub proj_inverse: Mat4,
}

const _: () = {
    assert!(std::mem::size_of::<Vertex>() == 32);
    assert!(std::mem::size_of::<Material>() == 44);
    assert!(std::mem::size_of::<Emitter>() == 80);
    assert!(std::mem::size_of::<ObjectDescriptor>() == 40);
    assert!(std::mem::size_of::<PushConstantRay>() == 28);
    assert!(std::mem::size_of::<MatrixUniforms>() == 256);
};
