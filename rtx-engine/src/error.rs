//! Error types for scene loading, pipeline assembly and device work.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors raised while importing and flattening a scene file.
///
/// Any of these aborts the load entirely: no partial object is kept.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The scene file does not exist or cannot be accessed
    #[error("Scene file not found: {0}")]
    NotFound(PathBuf),

    /// The importer could not open or parse the file
    #[error("Failed to import {path}: {message}")]
    Import { path: PathBuf, message: String },

    /// The importer returned a scene without a usable root node
    #[error("Scene {0} has no root node")]
    NoRootNode(PathBuf),

    /// A face references a vertex the mesh does not have
    #[error("Mesh {mesh} references vertex {index} but has {vertex_count} vertices")]
    InvalidFaceIndex {
        mesh: usize,
        index: u32,
        vertex_count: usize,
    },

    /// A mesh references a material the scene does not have
    #[error("Mesh {mesh} references material {material} out of {material_count}")]
    InvalidMaterial {
        mesh: usize,
        material: usize,
        material_count: usize,
    },

    /// A node references a mesh the scene does not have
    #[error("Node references mesh {mesh} out of {mesh_count}")]
    InvalidMesh { mesh: usize, mesh_count: usize },

    /// The flattened vertex array no longer fits 32-bit indices
    #[error("Scene has too many vertices for 32-bit indices")]
    TooManyVertices,
}

/// Fatal errors reported by the accelerator.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// No physical device exposes the ray tracing extensions
    #[error("No ray tracing capable device found")]
    NoSuitableDevice,

    /// The device did not report its shader group handle properties
    #[error("Device does not report ray tracing pipeline properties")]
    RayTracingUnsupported,

    /// A Vulkan call failed
    #[error("{operation} failed: {message}")]
    Vulkan {
        operation: &'static str,
        message: String,
    },

    /// A shader binary could not be read
    #[error("Failed to read shader binary {path}: {source}")]
    ShaderBinary {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A shader binary is not valid SPIR-V or lacks its entry point
    #[error("Invalid shader binary {path}: {message}")]
    InvalidShader { path: PathBuf, message: String },

    /// The pipeline returned fewer shader group handles than the table needs
    #[error("Expected {expected} bytes of shader group handles, got {actual}")]
    ShaderGroupHandles { expected: usize, actual: usize },

    /// A texture file could not be decoded
    #[error("Failed to load texture {path}: {message}")]
    Texture { path: PathBuf, message: String },

    /// A rendered frame could not be written out
    #[error("Failed to write frame to {path}: {message}")]
    Output { path: PathBuf, message: String },
}

impl DeviceError {
    /// Wraps any displayable device error with the name of the failed operation.
    pub fn vulkan<E: std::fmt::Display>(operation: &'static str) -> impl FnOnce(E) -> Self {
        move |err| Self::Vulkan {
            operation,
            message: err.to_string(),
        }
    }
}

/// Errors in the declarative shader stage list.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PipelineError {
    /// The stage list has no ray generation shader
    #[error("Pipeline needs exactly one ray generation shader, found none")]
    MissingRayGen,

    /// The stage list has more than one ray generation shader
    #[error("Pipeline needs exactly one ray generation shader, found {0}")]
    MultipleRayGen(usize),
}

/// Main error type for the engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The window or its event loop failed
    #[error("Window error: {0}")]
    Window(String),
}

/// Result type for engine operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
