use std::{path::Path, sync::Arc};

use vulkano::{
    buffer::{Buffer, BufferCreateInfo, BufferUsage},
    command_buffer::{
        allocator::{StandardCommandBufferAllocator, StandardCommandBufferAllocatorCreateInfo},
        CopyBufferToImageInfo,
    },
    descriptor_set::allocator::{
        StandardDescriptorSetAllocator, StandardDescriptorSetAllocatorCreateInfo,
    },
    device::{
        physical::{PhysicalDevice, PhysicalDeviceType},
        Device, DeviceCreateInfo, DeviceExtensions, DeviceFeatures, Queue, QueueCreateInfo,
        QueueFlags,
    },
    format::Format,
    image::{view::ImageView, Image, ImageCreateInfo, ImageType, ImageUsage},
    instance::{Instance, InstanceCreateFlags, InstanceCreateInfo, InstanceExtensions},
    memory::allocator::{AllocationCreateInfo, MemoryTypeFilter, StandardMemoryAllocator},
    Version, VulkanLibrary,
};

use crate::{
    buffer::{self, DeviceLocalBuffer},
    device::{Accelerator, BufferRole, RayTracingProperties},
    error::DeviceError,
};

/// A sampled device texture.
pub type Texture = Arc<ImageView>;

/// The Vulkan device and the allocators everything else is created from.
pub struct Context {
    device: Arc<Device>,
    queue: Arc<Queue>,
    memory_allocator: Arc<StandardMemoryAllocator>,
    descriptor_set_allocator: Arc<StandardDescriptorSetAllocator>,
    command_buffer_allocator: Arc<StandardCommandBufferAllocator>,
    properties: RayTracingProperties,
}

impl Context {
    /// Picks a ray tracing capable device and creates it.
    ///
    /// `presentation` requests swapchain support, for which the surface
    /// extensions must be part of `instance_extensions`.
    pub fn new(
        instance_extensions: InstanceExtensions,
        presentation: bool,
    ) -> Result<Self, DeviceError> {
        let library = VulkanLibrary::new().map_err(DeviceError::vulkan("load Vulkan library"))?;

        tracing::debug!("Vulkan library loaded");

        let instance = Instance::new(
            library,
            InstanceCreateInfo {
                flags: InstanceCreateFlags::ENUMERATE_PORTABILITY,
                application_version: Version::major_minor(1, 0),
                enabled_extensions: instance_extensions,
                ..Default::default()
            },
        )
        .map_err(DeviceError::vulkan("create instance"))?;

        tracing::debug!("Vulkan instance created");

        let device_extensions = DeviceExtensions {
            khr_acceleration_structure: true,
            khr_ray_tracing_pipeline: true,
            khr_deferred_host_operations: true,
            khr_swapchain: presentation,
            ..DeviceExtensions::empty()
        };
        let device_features = DeviceFeatures {
            acceleration_structure: true,
            ray_tracing_pipeline: true,
            buffer_device_address: true,
            scalar_block_layout: true,
            shader_int64: true,
            runtime_descriptor_array: true,
            shader_sampled_image_array_non_uniform_indexing: true,
            ..DeviceFeatures::empty()
        };

        let physical_device = instance
            .enumerate_physical_devices()
            .map_err(DeviceError::vulkan("enumerate physical devices"))?
            .filter(|p| p.api_version() >= Version::V1_2)
            .filter(|p| p.supported_extensions().contains(&device_extensions))
            .filter(|p| p.supported_features().contains(&device_features))
            .min_by_key(|p| match p.properties().device_type {
                PhysicalDeviceType::DiscreteGpu => 1,
                PhysicalDeviceType::IntegratedGpu => 2,
                PhysicalDeviceType::VirtualGpu => 3,
                PhysicalDeviceType::Cpu => 4,
                PhysicalDeviceType::Other => 5,
                _ => 6,
            })
            .ok_or(DeviceError::NoSuitableDevice)?;

        tracing::info!("Using device {}", physical_device.properties().device_name);

        let properties = Self::ray_tracing_properties_of(&physical_device)?;
        let (device, queue) =
            Self::create_device(physical_device, &device_extensions, &device_features)?;

        tracing::debug!("Vulkan device created");

        Ok(Self {
            device: device.clone(),
            queue,
            memory_allocator: Arc::new(StandardMemoryAllocator::new_default(device.clone())),
            descriptor_set_allocator: Arc::new(StandardDescriptorSetAllocator::new(
                device.clone(),
                StandardDescriptorSetAllocatorCreateInfo::default(),
            )),
            command_buffer_allocator: Arc::new(StandardCommandBufferAllocator::new(
                device,
                StandardCommandBufferAllocatorCreateInfo::default(),
            )),
            properties,
        })
    }

    fn ray_tracing_properties_of(
        physical_device: &PhysicalDevice,
    ) -> Result<RayTracingProperties, DeviceError> {
        let properties = physical_device.properties();
        match (
            properties.shader_group_handle_size,
            properties.shader_group_handle_alignment,
            properties.shader_group_base_alignment,
        ) {
            (Some(handle_size), Some(handle_alignment), Some(base_alignment)) => {
                Ok(RayTracingProperties {
                    handle_size,
                    handle_alignment,
                    base_alignment,
                })
            }
            _ => Err(DeviceError::RayTracingUnsupported),
        }
    }

    fn create_device(
        physical_device: Arc<PhysicalDevice>,
        device_extensions: &DeviceExtensions,
        device_features: &DeviceFeatures,
    ) -> Result<(Arc<Device>, Arc<Queue>), DeviceError> {
        // Tracing, copies and blits all happen on one queue
        let queue_family_index = physical_device
            .queue_family_properties()
            .iter()
            .position(|q| {
                q.queue_flags
                    .contains(QueueFlags::GRAPHICS | QueueFlags::COMPUTE)
            })
            .and_then(|i| u32::try_from(i).ok())
            .ok_or(DeviceError::NoSuitableDevice)?;

        let (device, mut queues) = Device::new(
            physical_device,
            DeviceCreateInfo {
                queue_create_infos: vec![QueueCreateInfo {
                    queue_family_index,
                    ..Default::default()
                }],
                enabled_extensions: *device_extensions,
                enabled_features: *device_features,
                ..Default::default()
            },
        )
        .map_err(DeviceError::vulkan("create device"))?;

        let queue = queues.next().ok_or(DeviceError::NoSuitableDevice)?;

        Ok((device, queue))
    }

    #[must_use]
    pub const fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[must_use]
    pub const fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    #[must_use]
    pub const fn memory_allocator(&self) -> &Arc<StandardMemoryAllocator> {
        &self.memory_allocator
    }

    #[must_use]
    pub const fn descriptor_set_allocator(&self) -> &Arc<StandardDescriptorSetAllocator> {
        &self.descriptor_set_allocator
    }

    #[must_use]
    pub const fn command_buffer_allocator(&self) -> &Arc<StandardCommandBufferAllocator> {
        &self.command_buffer_allocator
    }

    /// A 1x1 white texture, bound when the scene has no textures.
    pub fn placeholder_texture(&self) -> Result<Texture, DeviceError> {
        self.upload_texture(Path::new("<placeholder>"), [1, 1], vec![u8::MAX; 4])
    }

    fn upload_texture(
        &self,
        path: &Path,
        [width, height]: [u32; 2],
        pixels: Vec<u8>,
    ) -> Result<Texture, DeviceError> {
        let texture_error = |message: String| DeviceError::Texture {
            path: path.to_path_buf(),
            message,
        };

        let staging_buffer = Buffer::from_iter(
            self.memory_allocator.clone(),
            BufferCreateInfo {
                usage: BufferUsage::TRANSFER_SRC,
                ..Default::default()
            },
            AllocationCreateInfo {
                memory_type_filter: MemoryTypeFilter::PREFER_HOST
                    | MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
                ..Default::default()
            },
            pixels,
        )
        .map_err(|err| texture_error(err.to_string()))?;

        let image = Image::new(
            self.memory_allocator.clone(),
            ImageCreateInfo {
                image_type: ImageType::Dim2d,
                format: Format::R8G8B8A8_SRGB,
                extent: [width, height, 1],
                usage: ImageUsage::TRANSFER_DST | ImageUsage::SAMPLED,
                ..Default::default()
            },
            AllocationCreateInfo::default(),
        )
        .map_err(|err| texture_error(err.to_string()))?;

        buffer::submit_and_wait(&self.command_buffer_allocator, &self.queue, |builder| {
            builder
                .copy_buffer_to_image(CopyBufferToImageInfo::buffer_image(
                    staging_buffer,
                    image.clone(),
                ))
                .map_err(DeviceError::vulkan("record texture copy"))?;
            Ok(())
        })?;

        tracing::trace!("Texture {} uploaded ({}x{})", path.display(), width, height);

        ImageView::new_default(image).map_err(|err| texture_error(err.to_string()))
    }
}

impl Accelerator for Context {
    type Buffer = DeviceLocalBuffer;
    type Texture = Texture;

    fn ray_tracing_properties(&self) -> RayTracingProperties {
        self.properties
    }

    fn upload(&self, role: BufferRole, data: &[u8]) -> Result<Self::Buffer, DeviceError> {
        let alignment = match role {
            BufferRole::ShaderBindingTable => u64::from(self.properties.base_alignment),
            _ => 16,
        };
        let buffer = buffer::send_to_device(
            &self.memory_allocator,
            &self.command_buffer_allocator,
            &self.queue,
            data,
            buffer::role_usage(role),
            alignment,
        )?;

        tracing::trace!("{:?} buffer uploaded ({} bytes)", role, data.len());

        Ok(buffer)
    }

    fn load_texture(&self, path: &Path) -> Result<Self::Texture, DeviceError> {
        let decoded = image::open(path)
            .map_err(|err| DeviceError::Texture {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?
            .to_rgba8();
        let extent = [decoded.width(), decoded.height()];

        self.upload_texture(path, extent, decoded.into_raw())
    }
}
