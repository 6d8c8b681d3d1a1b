//! The ray tracing pipeline.
//!
//! The pipeline is described by a list of shader stages. Every raygen and miss
//! stage gets a general group and every closest hit stage a triangles hit
//! group, so adding a shadow miss shader or another hit group only changes the
//! list.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use vulkano::{
    descriptor_set::layout::{
        DescriptorSetLayout, DescriptorSetLayoutBinding, DescriptorSetLayoutCreateInfo,
        DescriptorType,
    },
    device::Device,
    pipeline::{
        layout::{PipelineLayoutCreateInfo, PushConstantRange},
        ray_tracing::{
            RayTracingPipeline, RayTracingPipelineCreateInfo, RayTracingShaderGroupCreateInfo,
        },
        PipelineLayout, PipelineShaderStageCreateInfo,
    },
    shader::ShaderStages,
};

use crate::{
    error::{DeviceError, PipelineError},
    shader::PushConstantRay,
};

/// Descriptor set and binding numbers shared with the shaders.
pub mod bindings {
    /// Set holding the acceleration structure and the output image.
    pub const RAY_TRACING_SET: u32 = 0;
    pub const TOP_LEVEL_AS: u32 = 0;
    pub const OUTPUT_IMAGE: u32 = 1;

    /// Set shared with the rasterization path.
    pub const SCENE_SET: u32 = 1;
    pub const MATRICES: u32 = 0;
    pub const OBJECT_DESCRIPTORS: u32 = 1;
    pub const TEXTURES: u32 = 2;
    pub const EMITTERS: u32 = 3;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShaderStageKind {
    RayGen,
    Miss,
    ClosestHit,
}

impl ShaderStageKind {
    #[must_use]
    pub const fn stages(self) -> ShaderStages {
        match self {
            Self::RayGen => ShaderStages::RAYGEN,
            Self::Miss => ShaderStages::MISS,
            Self::ClosestHit => ShaderStages::CLOSEST_HIT,
        }
    }
}

/// A precompiled shader binary and the stage it runs in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderStageDesc {
    pub kind: ShaderStageKind,
    /// File name of the SPIR-V binary inside the shader directory.
    pub binary: String,
}

impl ShaderStageDesc {
    #[must_use]
    pub fn new(kind: ShaderStageKind, binary: impl Into<String>) -> Self {
        Self {
            kind,
            binary: binary.into(),
        }
    }

    /// One raygen, one miss and one closest hit shader.
    #[must_use]
    pub fn default_stages() -> Vec<Self> {
        vec![
            Self::new(ShaderStageKind::RayGen, "raytrace.rgen.spv"),
            Self::new(ShaderStageKind::Miss, "raytrace.rmiss.spv"),
            Self::new(ShaderStageKind::ClosestHit, "raytrace.rchit.spv"),
        ]
    }
}

/// A shader group, referencing stages by index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderGroup {
    General { stage: u32 },
    TrianglesHit { closest_hit: u32 },
}

/// The validated stage list and the groups built from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineDescription {
    stages: Vec<ShaderStageDesc>,
    groups: Vec<ShaderGroup>,
    miss_count: u32,
    hit_count: u32,
    max_recursion_depth: u32,
}

impl PipelineDescription {
    /// Orders the stages raygen first, then misses, then hits, keeping the
    /// declaration order within each kind.
    pub fn new(
        mut stages: Vec<ShaderStageDesc>,
        max_recursion_depth: u32,
    ) -> Result<Self, PipelineError> {
        stages.sort_by_key(|stage| stage.kind);

        let count = |kind| {
            #[allow(clippy::cast_possible_truncation)]
            let count = stages.iter().filter(|stage| stage.kind == kind).count() as u32;
            count
        };
        match count(ShaderStageKind::RayGen) {
            0 => return Err(PipelineError::MissingRayGen),
            1 => {}
            n => return Err(PipelineError::MultipleRayGen(n as usize)),
        }
        let miss_count = count(ShaderStageKind::Miss);
        let hit_count = count(ShaderStageKind::ClosestHit);

        let groups = (0u32..)
            .zip(&stages)
            .map(|(index, stage)| match stage.kind {
                ShaderStageKind::RayGen | ShaderStageKind::Miss => {
                    ShaderGroup::General { stage: index }
                }
                ShaderStageKind::ClosestHit => ShaderGroup::TrianglesHit { closest_hit: index },
            })
            .collect();

        Ok(Self {
            stages,
            groups,
            miss_count,
            hit_count,
            max_recursion_depth,
        })
    }

    #[must_use]
    pub fn stages(&self) -> &[ShaderStageDesc] {
        &self.stages
    }

    /// Groups in shader binding table order.
    #[must_use]
    pub fn groups(&self) -> &[ShaderGroup] {
        &self.groups
    }

    #[must_use]
    pub const fn miss_count(&self) -> u32 {
        self.miss_count
    }

    #[must_use]
    pub const fn hit_count(&self) -> u32 {
        self.hit_count
    }

    #[must_use]
    pub const fn max_recursion_depth(&self) -> u32 {
        self.max_recursion_depth
    }
}

/// Stages that read the push constants.
#[must_use]
pub fn push_constant_stages() -> ShaderStages {
    ShaderStages::RAYGEN | ShaderStages::CLOSEST_HIT | ShaderStages::MISS
}

#[allow(clippy::cast_possible_truncation)]
const PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<PushConstantRay>() as u32;

fn binding(
    descriptor_type: DescriptorType,
    stages: ShaderStages,
    descriptor_count: u32,
) -> DescriptorSetLayoutBinding {
    DescriptorSetLayoutBinding {
        stages,
        descriptor_count,
        ..DescriptorSetLayoutBinding::descriptor_type(descriptor_type)
    }
}

fn set_layout(
    device: &Arc<Device>,
    bindings: impl IntoIterator<Item = (u32, DescriptorSetLayoutBinding)>,
) -> Result<Arc<DescriptorSetLayout>, DeviceError> {
    DescriptorSetLayout::new(
        device.clone(),
        DescriptorSetLayoutCreateInfo {
            bindings: bindings.into_iter().collect::<BTreeMap<_, _>>(),
            ..Default::default()
        },
    )
    .map_err(DeviceError::vulkan("create descriptor set layout"))
}

/// Creates the pipeline layout: the ray tracing set, the scene set holding
/// `texture_count` textures, and the push constant range.
pub fn create_layout(
    device: &Arc<Device>,
    texture_count: u32,
) -> Result<Arc<PipelineLayout>, DeviceError> {
    let shading = ShaderStages::RAYGEN | ShaderStages::CLOSEST_HIT;

    let ray_tracing_set = set_layout(
        device,
        [
            (
                bindings::TOP_LEVEL_AS,
                binding(DescriptorType::AccelerationStructure, shading, 1),
            ),
            (
                bindings::OUTPUT_IMAGE,
                binding(DescriptorType::StorageImage, ShaderStages::RAYGEN, 1),
            ),
        ],
    )?;
    let scene_set = set_layout(
        device,
        [
            (
                bindings::MATRICES,
                binding(DescriptorType::UniformBuffer, ShaderStages::RAYGEN, 1),
            ),
            (
                bindings::OBJECT_DESCRIPTORS,
                binding(DescriptorType::StorageBuffer, shading, 1),
            ),
            (
                bindings::TEXTURES,
                binding(
                    DescriptorType::CombinedImageSampler,
                    shading,
                    texture_count.max(1),
                ),
            ),
            (
                bindings::EMITTERS,
                binding(DescriptorType::StorageBuffer, shading, 1),
            ),
        ],
    )?;

    PipelineLayout::new(
        device.clone(),
        PipelineLayoutCreateInfo {
            set_layouts: vec![ray_tracing_set, scene_set],
            push_constant_ranges: vec![PushConstantRange {
                stages: push_constant_stages(),
                offset: 0,
                size: PUSH_CONSTANT_SIZE,
            }],
            ..Default::default()
        },
    )
    .map_err(DeviceError::vulkan("create pipeline layout"))
}

/// Loads the stage binaries from `shader_dir` and creates the pipeline.
///
/// The shader modules are released as soon as the pipeline exists.
pub fn create_pipeline(
    device: &Arc<Device>,
    layout: Arc<PipelineLayout>,
    description: &PipelineDescription,
    shader_dir: &Path,
) -> Result<Arc<RayTracingPipeline>, DeviceError> {
    let stages = description
        .stages()
        .iter()
        .map(|stage| {
            let path = shader_dir.join(&stage.binary);
            let module = crate::shader::load_module(device, &path)?;
            let entry_point = module
                .entry_point("main")
                .ok_or_else(|| DeviceError::InvalidShader {
                    path,
                    message: "no `main` entry point".to_string(),
                })?;
            Ok(PipelineShaderStageCreateInfo::new(entry_point))
        })
        .collect::<Result<Vec<_>, DeviceError>>()?;

    let groups = description
        .groups()
        .iter()
        .map(|group| match *group {
            ShaderGroup::General { stage } => RayTracingShaderGroupCreateInfo::General {
                general_shader: stage,
            },
            ShaderGroup::TrianglesHit { closest_hit } => {
                RayTracingShaderGroupCreateInfo::TrianglesHit {
                    closest_hit_shader: Some(closest_hit),
                    any_hit_shader: None,
                }
            }
        })
        .collect::<Vec<_>>();

    let pipeline = RayTracingPipeline::new(
        device.clone(),
        None,
        RayTracingPipelineCreateInfo {
            stages: stages.into_iter().collect(),
            groups: groups.into_iter().collect(),
            max_pipeline_ray_recursion_depth: description.max_recursion_depth(),
            ..RayTracingPipelineCreateInfo::layout(layout)
        },
    )
    .map_err(DeviceError::vulkan("create ray tracing pipeline"))?;

    tracing::debug!(
        "Ray tracing pipeline created with {} groups",
        description.groups().len()
    );

    Ok(pipeline)
}

/// The raw handles of every group of `pipeline`, back to back.
pub fn group_handles(pipeline: &RayTracingPipeline) -> Result<Vec<u8>, DeviceError> {
    let group_count = u32::try_from(pipeline.groups().len()).map_err(|_| DeviceError::Vulkan {
        operation: "get shader group handles",
        message: "too many shader groups".to_string(),
    })?;
    let handles = pipeline
        .group_handles(0, group_count)
        .map_err(DeviceError::vulkan("get shader group handles"))?;
    Ok(handles.data().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stages_groups() {
        let description = PipelineDescription::new(ShaderStageDesc::default_stages(), 10).unwrap();
        assert_eq!(
            description.groups(),
            &[
                ShaderGroup::General { stage: 0 },
                ShaderGroup::General { stage: 1 },
                ShaderGroup::TrianglesHit { closest_hit: 2 },
            ]
        );
        assert_eq!(description.miss_count(), 1);
        assert_eq!(description.hit_count(), 1);
        assert_eq!(description.max_recursion_depth(), 10);
    }

    #[test]
    fn test_stages_sorted_by_kind() {
        let stages = vec![
            ShaderStageDesc::new(ShaderStageKind::ClosestHit, "a.rchit.spv"),
            ShaderStageDesc::new(ShaderStageKind::Miss, "scene.rmiss.spv"),
            ShaderStageDesc::new(ShaderStageKind::RayGen, "raytrace.rgen.spv"),
            ShaderStageDesc::new(ShaderStageKind::Miss, "shadow.rmiss.spv"),
            ShaderStageDesc::new(ShaderStageKind::ClosestHit, "b.rchit.spv"),
        ];
        let description = PipelineDescription::new(stages, 2).unwrap();

        let binaries = description
            .stages()
            .iter()
            .map(|stage| stage.binary.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            binaries,
            vec![
                "raytrace.rgen.spv",
                "scene.rmiss.spv",
                "shadow.rmiss.spv",
                "a.rchit.spv",
                "b.rchit.spv",
            ]
        );
        assert_eq!(description.miss_count(), 2);
        assert_eq!(description.hit_count(), 2);
        assert_eq!(
            description.groups()[3],
            ShaderGroup::TrianglesHit { closest_hit: 3 }
        );
    }

    #[test]
    fn test_raygen_count() {
        let no_raygen = vec![ShaderStageDesc::new(ShaderStageKind::Miss, "raytrace.rmiss.spv")];
        assert_eq!(
            PipelineDescription::new(no_raygen, 1),
            Err(PipelineError::MissingRayGen)
        );

        let two_raygen = vec![
            ShaderStageDesc::new(ShaderStageKind::RayGen, "a.rgen.spv"),
            ShaderStageDesc::new(ShaderStageKind::RayGen, "b.rgen.spv"),
        ];
        assert_eq!(
            PipelineDescription::new(two_raygen, 1),
            Err(PipelineError::MultipleRayGen(2))
        );
    }

    #[test]
    fn test_push_constant_range() {
        assert_eq!(PUSH_CONSTANT_SIZE, 28);
        let stages = push_constant_stages();
        assert!(stages.contains(ShaderStages::RAYGEN));
        assert!(stages.contains(ShaderStages::MISS));
        assert!(stages.contains(ShaderStages::CLOSEST_HIT));
    }
}
