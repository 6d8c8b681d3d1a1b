//! Bottom and top level acceleration structures over the loaded objects.

use std::sync::Arc;

use glam::Mat4;
use vulkano::{
    acceleration_structure::{
        AccelerationStructure, AccelerationStructureBuildGeometryInfo,
        AccelerationStructureBuildRangeInfo, AccelerationStructureBuildSizesInfo,
        AccelerationStructureBuildType, AccelerationStructureCreateInfo,
        AccelerationStructureGeometries, AccelerationStructureGeometryInstancesData,
        AccelerationStructureGeometryInstancesDataType, AccelerationStructureGeometryTrianglesData,
        AccelerationStructureInstance, AccelerationStructureType, BuildAccelerationStructureFlags,
        BuildAccelerationStructureMode, GeometryFlags,
    },
    buffer::{Buffer, BufferCreateInfo, BufferUsage, IndexBuffer, Subbuffer},
    command_buffer::{AutoCommandBufferBuilder, PrimaryAutoCommandBuffer},
    format::Format,
    memory::allocator::{AllocationCreateInfo, MemoryAllocator, MemoryTypeFilter},
    DeviceSize, Packed24_8,
};

use crate::{
    buffer::{self, DeviceLocalBuffer},
    error::DeviceError,
    model::{Object, ObjectInstance},
    shader::Vertex,
};

type Builder = AutoCommandBufferBuilder<PrimaryAutoCommandBuffer>;

/// The acceleration structures of a scene.
pub struct AccelerationStructures {
    /// One per object, in object order.
    bottom_level: Vec<Arc<AccelerationStructure>>,
    top_level: Arc<AccelerationStructure>,
}

impl AccelerationStructures {
    /// Builds one bottom level structure per object and a top level structure
    /// with one instance per object instance, then waits for the builds.
    pub fn build(
        context: &crate::context::Context,
        objects: &[Object<DeviceLocalBuffer>],
        instances: &[ObjectInstance],
    ) -> Result<Self, DeviceError> {
        let memory_allocator: Arc<dyn MemoryAllocator> = context.memory_allocator().clone();

        let mut structures = None;
        buffer::submit_and_wait(
            context.command_buffer_allocator(),
            context.queue(),
            |builder| {
                let bottom_level = objects
                    .iter()
                    .map(|object| create_bottom_level(builder, &memory_allocator, object))
                    .collect::<Result<Vec<_>, _>>()?;
                let top_level =
                    create_top_level(builder, &memory_allocator, &bottom_level, instances)?;
                structures = Some(Self {
                    bottom_level,
                    top_level,
                });
                Ok(())
            },
        )?;

        let structures = structures.ok_or(DeviceError::Vulkan {
            operation: "build acceleration structures",
            message: "nothing was recorded".to_string(),
        })?;
        tracing::debug!(
            "Acceleration structures built: {} bottom level, {} instances",
            structures.bottom_level.len(),
            instances.len()
        );

        Ok(structures)
    }

    #[must_use]
    pub const fn top_level(&self) -> &Arc<AccelerationStructure> {
        &self.top_level
    }
}

/// Row-major 3x4 matrix of an instance transform.
fn instance_transform(transform: Mat4) -> [[f32; 4]; 3] {
    let rows = transform.transpose().to_cols_array_2d();
    [rows[0], rows[1], rows[2]]
}

fn create_bottom_level(
    builder: &mut Builder,
    memory_allocator: &Arc<dyn MemoryAllocator>,
    object: &Object<DeviceLocalBuffer>,
) -> Result<Arc<AccelerationStructure>, DeviceError> {
    let primitive_count = object.index_count / 3;

    #[allow(clippy::cast_possible_truncation)]
    let triangles = AccelerationStructureGeometryTrianglesData {
        flags: GeometryFlags::OPAQUE,
        vertex_data: Some(object.vertices.subbuffer().clone()),
        vertex_stride: std::mem::size_of::<Vertex>() as u32,
        max_vertex: object.vertex_count.saturating_sub(1),
        index_data: Some(IndexBuffer::U32(object.indices.typed::<u32>())),
        ..AccelerationStructureGeometryTrianglesData::new(Format::R32G32B32_SFLOAT)
    };

    let build_info = AccelerationStructureBuildGeometryInfo {
        flags: BuildAccelerationStructureFlags::PREFER_FAST_TRACE,
        mode: BuildAccelerationStructureMode::Build,
        ..AccelerationStructureBuildGeometryInfo::new(AccelerationStructureGeometries::Triangles(
            vec![triangles],
        ))
    };

    build_acceleration_structure(
        builder,
        memory_allocator,
        AccelerationStructureType::BottomLevel,
        build_info,
        &[primitive_count],
        AccelerationStructureBuildRangeInfo {
            primitive_count,
            primitive_offset: 0,
            first_vertex: 0,
            transform_offset: 0,
        },
    )
}

fn create_top_level(
    builder: &mut Builder,
    memory_allocator: &Arc<dyn MemoryAllocator>,
    bottom_level: &[Arc<AccelerationStructure>],
    instances: &[ObjectInstance],
) -> Result<Arc<AccelerationStructure>, DeviceError> {
    let values = instances
        .iter()
        .filter_map(|instance| {
            let blas = bottom_level.get(instance.object_index as usize)?;
            Some(AccelerationStructureInstance {
                transform: instance_transform(instance.transform),
                // The custom index lets shaders find the object descriptor
                instance_custom_index_and_mask: Packed24_8::new(instance.object_index, 0xff),
                instance_shader_binding_table_record_offset_and_flags: Packed24_8::new(0, 0),
                acceleration_structure_reference: blas.device_address().get(),
            })
        })
        .collect::<Vec<_>>();
    #[allow(clippy::cast_possible_truncation)]
    let primitive_count = values.len() as u32;

    // An empty iterator cannot be uploaded, keep one zeroed instance around
    let values = if values.is_empty() {
        vec![AccelerationStructureInstance::default()]
    } else {
        values
    };
    let values = Buffer::from_iter(
        memory_allocator.clone(),
        BufferCreateInfo {
            usage: BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY
                | BufferUsage::SHADER_DEVICE_ADDRESS,
            ..Default::default()
        },
        AllocationCreateInfo {
            memory_type_filter: MemoryTypeFilter::PREFER_DEVICE
                | MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
            ..Default::default()
        },
        values,
    )
    .map_err(DeviceError::vulkan("allocate instance buffer"))?;

    let geometries =
        AccelerationStructureGeometries::Instances(AccelerationStructureGeometryInstancesData {
            flags: GeometryFlags::OPAQUE,
            ..AccelerationStructureGeometryInstancesData::new(
                AccelerationStructureGeometryInstancesDataType::Values(Some(values)),
            )
        });

    let build_info = AccelerationStructureBuildGeometryInfo {
        flags: BuildAccelerationStructureFlags::PREFER_FAST_TRACE,
        mode: BuildAccelerationStructureMode::Build,
        ..AccelerationStructureBuildGeometryInfo::new(geometries)
    };

    build_acceleration_structure(
        builder,
        memory_allocator,
        AccelerationStructureType::TopLevel,
        build_info,
        &[primitive_count],
        AccelerationStructureBuildRangeInfo {
            primitive_count,
            primitive_offset: 0,
            first_vertex: 0,
            transform_offset: 0,
        },
    )
}

fn create_acceleration_structure(
    memory_allocator: &Arc<dyn MemoryAllocator>,
    ty: AccelerationStructureType,
    size: DeviceSize,
) -> Result<Arc<AccelerationStructure>, DeviceError> {
    let buffer = Buffer::new_slice::<u8>(
        memory_allocator.clone(),
        BufferCreateInfo {
            usage: BufferUsage::ACCELERATION_STRUCTURE_STORAGE | BufferUsage::SHADER_DEVICE_ADDRESS,
            ..Default::default()
        },
        AllocationCreateInfo {
            memory_type_filter: MemoryTypeFilter::PREFER_DEVICE,
            ..Default::default()
        },
        size,
    )
    .map_err(DeviceError::vulkan("allocate acceleration structure storage"))?;

    // SAFETY: the storage buffer is sized from the build size query
    unsafe {
        AccelerationStructure::new(
            memory_allocator.device().clone(),
            AccelerationStructureCreateInfo {
                ty,
                ..AccelerationStructureCreateInfo::new(buffer)
            },
        )
    }
    .map_err(DeviceError::vulkan("create acceleration structure"))
}

fn create_scratch_buffer(
    memory_allocator: &Arc<dyn MemoryAllocator>,
    size: DeviceSize,
) -> Result<Subbuffer<[u8]>, DeviceError> {
    let alignment = DeviceSize::from(
        memory_allocator
            .device()
            .physical_device()
            .properties()
            .min_acceleration_structure_scratch_offset_alignment
            .unwrap_or(1),
    );

    let subbuffer = Buffer::new_slice::<u8>(
        memory_allocator.clone(),
        BufferCreateInfo {
            usage: BufferUsage::STORAGE_BUFFER | BufferUsage::SHADER_DEVICE_ADDRESS,
            ..Default::default()
        },
        AllocationCreateInfo {
            memory_type_filter: MemoryTypeFilter::PREFER_DEVICE,
            ..Default::default()
        },
        size.max(1) + alignment,
    )
    .map_err(DeviceError::vulkan("allocate scratch buffer"))?;

    let address = subbuffer
        .device_address()
        .map_err(DeviceError::vulkan("query scratch buffer address"))?
        .get();
    let offset = crate::sbt::align_up(address, alignment) - address;

    Ok(subbuffer.slice(offset..offset + size.max(1)))
}

/// Records the build of one acceleration structure.
///
/// Geometry buffers referenced by `build_info` must outlive the returned
/// structure's use.
fn build_acceleration_structure(
    builder: &mut Builder,
    memory_allocator: &Arc<dyn MemoryAllocator>,
    ty: AccelerationStructureType,
    mut build_info: AccelerationStructureBuildGeometryInfo,
    max_primitive_counts: &[u32],
    build_range_info: AccelerationStructureBuildRangeInfo,
) -> Result<Arc<AccelerationStructure>, DeviceError> {
    let AccelerationStructureBuildSizesInfo {
        acceleration_structure_size,
        build_scratch_size,
        ..
    } = memory_allocator
        .device()
        .acceleration_structure_build_sizes(
            AccelerationStructureBuildType::Device,
            &build_info,
            max_primitive_counts,
        )
        .map_err(DeviceError::vulkan("query acceleration structure sizes"))?;

    let acceleration_structure =
        create_acceleration_structure(memory_allocator, ty, acceleration_structure_size)?;
    let scratch_buffer = create_scratch_buffer(memory_allocator, build_scratch_size)?;

    build_info.dst_acceleration_structure = Some(acceleration_structure.clone());
    build_info.scratch_data = Some(scratch_buffer);

    // SAFETY: the object buffers are owned by the scene state, which outlives
    // the acceleration structures
    unsafe {
        builder
            .build_acceleration_structure(build_info, [build_range_info].into_iter().collect())
            .map_err(DeviceError::vulkan("record acceleration structure build"))?;
    }

    Ok(acceleration_structure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_instance_transform_rows() {
        let transform = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let rows = instance_transform(transform);
        assert_eq!(rows[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(rows[1], [0.0, 1.0, 0.0, 2.0]);
        assert_eq!(rows[2], [0.0, 0.0, 1.0, 3.0]);
    }
}
