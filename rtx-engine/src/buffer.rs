use std::sync::Arc;

use vulkano::{
    buffer::{Buffer, BufferContents, BufferCreateInfo, BufferUsage, Subbuffer},
    command_buffer::{
        allocator::StandardCommandBufferAllocator, AutoCommandBufferBuilder, CommandBufferUsage,
        CopyBufferInfo, PrimaryAutoCommandBuffer, PrimaryCommandBufferAbstract,
    },
    device::Queue,
    memory::allocator::{AllocationCreateInfo, DeviceLayout, MemoryTypeFilter, StandardMemoryAllocator},
    sync::GpuFuture,
    DeviceSize,
};

use crate::{
    device::{BufferRole, DeviceAddress, DeviceBuffer},
    error::DeviceError,
};

/// Smallest buffer ever allocated, so empty tables still get a valid address.
const MIN_BUFFER_SIZE: DeviceSize = 16;
const DEFAULT_ALIGNMENT: DeviceSize = 16;

/// A device-local buffer with a device address.
#[derive(Clone, Debug)]
pub struct DeviceLocalBuffer {
    buffer: Subbuffer<[u8]>,
    address: DeviceAddress,
    size: u64,
}

impl DeviceLocalBuffer {
    #[must_use]
    pub const fn subbuffer(&self) -> &Subbuffer<[u8]> {
        &self.buffer
    }

    /// The buffer viewed as an array of `T`.
    #[must_use]
    pub fn typed<T: BufferContents>(&self) -> Subbuffer<[T]> {
        self.buffer.clone().reinterpret::<[T]>()
    }
}

impl DeviceBuffer for DeviceLocalBuffer {
    fn device_address(&self) -> DeviceAddress {
        self.address
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Usage flags for a buffer playing `role`, on top of the transfer destination.
#[must_use]
pub fn role_usage(role: BufferRole) -> BufferUsage {
    let usage = match role {
        BufferRole::Vertices | BufferRole::Indices => {
            BufferUsage::STORAGE_BUFFER | BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY
        }
        BufferRole::Materials
        | BufferRole::MaterialIndices
        | BufferRole::Emitters
        | BufferRole::ObjectDescriptors => BufferUsage::STORAGE_BUFFER,
        BufferRole::ShaderBindingTable => BufferUsage::SHADER_BINDING_TABLE,
    };
    usage | BufferUsage::SHADER_DEVICE_ADDRESS | BufferUsage::TRANSFER_DST
}

/// Records commands into a one-shot command buffer, submits it and waits for
/// it to complete.
pub fn submit_and_wait(
    command_buffer_allocator: &Arc<StandardCommandBufferAllocator>,
    queue: &Arc<Queue>,
    record: impl FnOnce(&mut AutoCommandBufferBuilder<PrimaryAutoCommandBuffer>) -> Result<(), DeviceError>,
) -> Result<(), DeviceError> {
    let mut builder = AutoCommandBufferBuilder::primary(
        command_buffer_allocator.clone(),
        queue.queue_family_index(),
        CommandBufferUsage::OneTimeSubmit,
    )
    .map_err(DeviceError::vulkan("allocate command buffer"))?;

    record(&mut builder)?;

    let command_buffer = builder
        .build()
        .map_err(DeviceError::vulkan("build command buffer"))?;

    command_buffer
        .execute(queue.clone())
        .map_err(DeviceError::vulkan("execute command buffer"))?
        .then_signal_fence_and_flush()
        .map_err(DeviceError::vulkan("flush command buffer"))?
        .wait(None)
        .map_err(DeviceError::vulkan("wait for command buffer"))
}

/// Sends the given bytes to a new device-local buffer and waits for the copy.
///
/// The staging buffer lives only for the duration of the call.
pub fn send_to_device(
    memory_allocator: &Arc<StandardMemoryAllocator>,
    command_buffer_allocator: &Arc<StandardCommandBufferAllocator>,
    queue: &Arc<Queue>,
    data: &[u8],
    usage: BufferUsage,
    alignment: DeviceSize,
) -> Result<DeviceLocalBuffer, DeviceError> {
    let size = (data.len() as DeviceSize).max(MIN_BUFFER_SIZE);
    let mut contents = data.to_vec();
    #[allow(clippy::cast_possible_truncation)]
    contents.resize(size as usize, 0);

    let staging_buffer = Buffer::from_iter(
        memory_allocator.clone(),
        BufferCreateInfo {
            usage: BufferUsage::TRANSFER_SRC,
            ..Default::default()
        },
        AllocationCreateInfo {
            memory_type_filter: MemoryTypeFilter::PREFER_HOST
                | MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
            ..Default::default()
        },
        contents,
    )
    .map_err(DeviceError::vulkan("allocate staging buffer"))?;

    let layout = DeviceLayout::from_size_alignment(size, alignment.max(DEFAULT_ALIGNMENT))
        .ok_or_else(|| DeviceError::Vulkan {
            operation: "allocate device buffer",
            message: format!("invalid layout of {size} bytes aligned to {alignment}"),
        })?;
    let destination_buffer = Subbuffer::new(
        Buffer::new(
            memory_allocator.clone(),
            BufferCreateInfo {
                usage: usage | BufferUsage::TRANSFER_DST,
                ..Default::default()
            },
            AllocationCreateInfo {
                memory_type_filter: MemoryTypeFilter::PREFER_DEVICE,
                ..Default::default()
            },
            layout,
        )
        .map_err(DeviceError::vulkan("allocate device buffer"))?,
    );

    submit_and_wait(command_buffer_allocator, queue, |builder| {
        builder
            .copy_buffer(CopyBufferInfo::buffers(
                staging_buffer,
                destination_buffer.clone(),
            ))
            .map_err(DeviceError::vulkan("record buffer copy"))?;
        Ok(())
    })?;

    let address = destination_buffer
        .device_address()
        .map_err(DeviceError::vulkan("query buffer device address"))?;

    Ok(DeviceLocalBuffer {
        buffer: destination_buffer,
        address: DeviceAddress::new(address.get()),
        size: data.len() as u64,
    })
}

/// Creates a new host-writable uniform buffer.
pub fn new_uniform<T>(
    memory_allocator: &Arc<StandardMemoryAllocator>,
    data: T,
) -> Result<Subbuffer<T>, DeviceError>
where
    T: BufferContents,
{
    Buffer::from_data(
        memory_allocator.clone(),
        BufferCreateInfo {
            usage: BufferUsage::UNIFORM_BUFFER,
            ..Default::default()
        },
        AllocationCreateInfo {
            memory_type_filter: MemoryTypeFilter::PREFER_DEVICE
                | MemoryTypeFilter::HOST_RANDOM_ACCESS,
            ..Default::default()
        },
        data,
    )
    .map_err(DeviceError::vulkan("allocate uniform buffer"))
}
