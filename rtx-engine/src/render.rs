use std::{path::Path, sync::Arc};

use vulkano::{
    command_buffer::{
        allocator::StandardCommandBufferAllocator, AutoCommandBufferBuilder, CommandBufferUsage,
        CopyImageInfo, PrimaryAutoCommandBuffer,
    },
    descriptor_set::{allocator::StandardDescriptorSetAllocator, DescriptorSet, WriteDescriptorSet},
    device::Queue,
    format::Format,
    image::{
        sampler::{Sampler, SamplerCreateInfo},
        view::ImageView,
        Image, ImageCreateInfo, ImageLayout as VkImageLayout, ImageType, ImageUsage,
    },
    memory::allocator::{AllocationCreateInfo, StandardMemoryAllocator},
    pipeline::{
        ray_tracing::{RayTracingPipeline, ShaderBindingTableAddresses},
        Pipeline, PipelineBindPoint, PipelineLayout,
    },
    sync::GpuFuture,
    StridedDeviceAddressRegion,
};

use crate::{
    acceleration::AccelerationStructures,
    buffer::{self, DeviceLocalBuffer},
    camera::CameraDescriptor,
    context::Context,
    device::{Accelerator, BufferRole, FrameCommands},
    dispatch::{FrameDispatcher, ImageHandoff, ImageLayout, RaySettings},
    error::DeviceError,
    model::SceneState,
    pipeline::{self, bindings, PipelineDescription},
    sbt::{ShaderBindingTable, ShaderBindingTableLayout, ShaderBindingTableRegions, StridedRegion},
    shader::{MatrixUniforms, PushConstantRay},
};

#[cfg(feature = "headless")]
pub mod image;
pub mod window;

#[allow(clippy::module_name_repetitions)]
pub type RenderCommandBuilder = AutoCommandBufferBuilder<PrimaryAutoCommandBuffer>;

/// Format of the traced output and of the presentation image.
pub const OUTPUT_FORMAT: Format = Format::R32G32B32A32_SFLOAT;

/// Where finished frames go.
#[allow(clippy::module_name_repetitions)]
pub trait RenderSurface {
    /// Size in pixels of the surface.
    fn extent(&self) -> [u32; 2];

    /// Acquires the target of the next frame.
    ///
    /// Returns `None` when the frame should be skipped, for example while the
    /// swapchain is out of date.
    fn acquire(&mut self) -> Result<Option<Box<dyn GpuFuture>>, DeviceError>;

    /// Records the transfer of the presentation image to the acquired target.
    fn record_blit(
        &self,
        builder: &mut RenderCommandBuilder,
        presentation: &Arc<Image>,
    ) -> Result<(), DeviceError>;

    fn present(
        &mut self,
        render_future: Box<dyn GpuFuture>,
        queue: &Arc<Queue>,
    ) -> Result<(), DeviceError>;

    /// Asks for another frame to be drawn.
    fn request_redraw(&self) {}

    /// Called once after the last frame of a fixed-length run.
    fn finish(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// The output image the rays are traced into and the image it is handed to.
struct FrameImages {
    extent: [u32; 2],
    output: Arc<Image>,
    presentation: Arc<Image>,
    ray_tracing_set: Arc<DescriptorSet>,
}

impl FrameImages {
    fn new(
        memory_allocator: &Arc<StandardMemoryAllocator>,
        descriptor_set_allocator: &Arc<StandardDescriptorSetAllocator>,
        layout: &PipelineLayout,
        acceleration_structures: &AccelerationStructures,
        extent: [u32; 2],
    ) -> Result<Self, DeviceError> {
        let create_image = |usage| {
            Image::new(
                memory_allocator.clone(),
                ImageCreateInfo {
                    image_type: ImageType::Dim2d,
                    format: OUTPUT_FORMAT,
                    extent: [extent[0], extent[1], 1],
                    usage,
                    ..Default::default()
                },
                AllocationCreateInfo::default(),
            )
            .map_err(DeviceError::vulkan("create frame image"))
        };
        let output = create_image(ImageUsage::STORAGE | ImageUsage::TRANSFER_SRC)?;
        let presentation = create_image(ImageUsage::TRANSFER_DST | ImageUsage::TRANSFER_SRC)?;

        let set_layout = layout
            .set_layouts()
            .get(bindings::RAY_TRACING_SET as usize)
            .ok_or(DeviceError::Vulkan {
                operation: "create ray tracing descriptor set",
                message: "pipeline layout has no ray tracing set".to_string(),
            })?;
        let ray_tracing_set = DescriptorSet::new(
            descriptor_set_allocator.clone(),
            set_layout.clone(),
            [
                WriteDescriptorSet::acceleration_structure(
                    bindings::TOP_LEVEL_AS,
                    acceleration_structures.top_level().clone(),
                ),
                WriteDescriptorSet::image_view(
                    bindings::OUTPUT_IMAGE,
                    ImageView::new_default(output.clone())
                        .map_err(DeviceError::vulkan("create output image view"))?,
                ),
            ],
            [],
        )
        .map_err(DeviceError::vulkan("create ray tracing descriptor set"))?;

        tracing::debug!("Frame images created ({}x{})", extent[0], extent[1]);

        Ok(Self {
            extent,
            output,
            presentation,
            ray_tracing_set,
        })
    }
}

pub struct Renderer {
    queue: Arc<Queue>,
    memory_allocator: Arc<StandardMemoryAllocator>,
    descriptor_set_allocator: Arc<StandardDescriptorSetAllocator>,
    command_buffer_allocator: Arc<StandardCommandBufferAllocator>,
    pipeline: Arc<RayTracingPipeline>,
    shader_binding_table: ShaderBindingTable<DeviceLocalBuffer>,
    acceleration_structures: AccelerationStructures,
    camera: CameraDescriptor,
    camera_uniform: vulkano::buffer::Subbuffer<MatrixUniforms>,
    scene_set: Arc<DescriptorSet>,
    frame: FrameImages,
    dispatcher: FrameDispatcher,
    render_surface: Box<dyn RenderSurface>,
}

impl Renderer {
    /// Creates the pipeline, shader binding table, acceleration structures and
    /// descriptor sets for `scene`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: &Context,
        scene: &SceneState<Context>,
        render_surface: Box<dyn RenderSurface>,
        description: &PipelineDescription,
        shader_dir: &Path,
        settings: &RaySettings,
        camera: &CameraDescriptor,
    ) -> Result<Self, DeviceError> {
        let device = context.device();

        #[allow(clippy::cast_possible_truncation)]
        let texture_count = scene.textures().len() as u32;
        let layout = pipeline::create_layout(device, texture_count)?;
        let pipeline = pipeline::create_pipeline(device, layout.clone(), description, shader_dir)?;

        let sbt_layout = ShaderBindingTableLayout::new(
            context.ray_tracing_properties(),
            description.miss_count(),
            description.hit_count(),
        );
        let shader_binding_table =
            ShaderBindingTable::new(context, sbt_layout, &pipeline::group_handles(&pipeline)?)?;

        let acceleration_structures =
            AccelerationStructures::build(context, scene.objects(), scene.instances())?;

        let extent = render_surface.extent();
        let camera_uniform =
            buffer::new_uniform(context.memory_allocator(), camera.uniforms(extent, None))?;
        let scene_set = Self::create_scene_set(context, scene, &layout, &camera_uniform)?;

        let frame = FrameImages::new(
            context.memory_allocator(),
            context.descriptor_set_allocator(),
            &layout,
            &acceleration_structures,
            extent,
        )?;

        tracing::debug!("Renderer created");

        Ok(Self {
            queue: context.queue().clone(),
            memory_allocator: context.memory_allocator().clone(),
            descriptor_set_allocator: context.descriptor_set_allocator().clone(),
            command_buffer_allocator: context.command_buffer_allocator().clone(),
            pipeline,
            shader_binding_table,
            acceleration_structures,
            camera: *camera,
            camera_uniform,
            scene_set,
            frame,
            dispatcher: FrameDispatcher::new(settings),
            render_surface,
        })
    }

    fn create_scene_set(
        context: &Context,
        scene: &SceneState<Context>,
        layout: &PipelineLayout,
        camera_uniform: &vulkano::buffer::Subbuffer<MatrixUniforms>,
    ) -> Result<Arc<DescriptorSet>, DeviceError> {
        // Empty scenes still need buffers to bind
        let descriptors = match scene.descriptor_buffer() {
            Some(buffer) => buffer.clone(),
            None => context.upload(BufferRole::ObjectDescriptors, &[])?,
        };
        let emitters = match scene.emitter_buffer() {
            Some(buffer) => buffer.clone(),
            None => context.upload(BufferRole::Emitters, &[])?,
        };

        let textures = if scene.textures().is_empty() {
            vec![context.placeholder_texture()?]
        } else {
            scene.textures().to_vec()
        };
        let sampler = Sampler::new(
            context.device().clone(),
            SamplerCreateInfo::simple_repeat_linear(),
        )
        .map_err(DeviceError::vulkan("create sampler"))?;

        let set_layout = layout
            .set_layouts()
            .get(bindings::SCENE_SET as usize)
            .ok_or(DeviceError::Vulkan {
                operation: "create scene descriptor set",
                message: "pipeline layout has no scene set".to_string(),
            })?;

        DescriptorSet::new(
            context.descriptor_set_allocator().clone(),
            set_layout.clone(),
            [
                WriteDescriptorSet::buffer(bindings::MATRICES, camera_uniform.clone()),
                WriteDescriptorSet::buffer(
                    bindings::OBJECT_DESCRIPTORS,
                    descriptors.subbuffer().clone(),
                ),
                WriteDescriptorSet::image_view_sampler_array(
                    bindings::TEXTURES,
                    0,
                    textures
                        .into_iter()
                        .map(|texture| (texture, sampler.clone())),
                ),
                WriteDescriptorSet::buffer(bindings::EMITTERS, emitters.subbuffer().clone()),
            ],
            [],
        )
        .map_err(DeviceError::vulkan("create scene descriptor set"))
    }

    /// Rewrites the camera uniforms for the current frame size.
    fn write_camera(&self) -> Result<(), DeviceError> {
        let mut uniforms = self
            .camera_uniform
            .write()
            .map_err(DeviceError::vulkan("write camera uniforms"))?;
        *uniforms = self.camera.uniforms(self.frame.extent, None);
        Ok(())
    }

    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.dispatcher.frame_count()
    }

    pub fn request_redraw(&self) {
        self.render_surface.request_redraw();
    }

    /// Recreates the frame images for a new surface size.
    fn resize(&mut self, extent: [u32; 2]) -> Result<(), DeviceError> {
        self.frame = FrameImages::new(
            &self.memory_allocator,
            &self.descriptor_set_allocator,
            self.pipeline.layout(),
            &self.acceleration_structures,
            extent,
        )?;
        self.write_camera()?;
        self.dispatcher.reset_accumulation();
        Ok(())
    }

    /// Traces one frame and hands it to the render surface.
    pub fn render(&mut self) -> Result<(), DeviceError> {
        let extent = self.render_surface.extent();
        if extent.contains(&0) {
            return Ok(());
        }
        if extent != self.frame.extent {
            self.resize(extent)?;
        }

        let Some(acquire_future) = self.render_surface.acquire()? else {
            return Ok(());
        };

        let mut builder = AutoCommandBufferBuilder::primary(
            self.command_buffer_allocator.clone(),
            self.queue.queue_family_index(),
            CommandBufferUsage::OneTimeSubmit,
        )
        .map_err(DeviceError::vulkan("allocate command buffer"))?;

        let mut commands = VulkanFrameCommands {
            builder: &mut builder,
            pipeline: &self.pipeline,
            ray_tracing_set: &self.frame.ray_tracing_set,
            scene_set: &self.scene_set,
            output: &self.frame.output,
            presentation: &self.frame.presentation,
        };
        self.dispatcher.dispatch(
            &mut commands,
            self.shader_binding_table.regions(),
            self.frame.extent,
        )?;

        self.render_surface
            .record_blit(&mut builder, &self.frame.presentation)?;

        let command_buffer = builder
            .build()
            .map_err(DeviceError::vulkan("build command buffer"))?;
        let render_future = acquire_future
            .then_execute(self.queue.clone(), command_buffer)
            .map_err(DeviceError::vulkan("execute frame"))?;

        self.render_surface
            .present(render_future.boxed(), &self.queue)
    }
}

/// A renderer driven for a fixed number of frames.
pub(crate) trait FrameSequence {
    fn render_frame(&mut self) -> Result<(), DeviceError>;

    fn finish(&mut self) -> Result<(), DeviceError>;
}

impl FrameSequence for Renderer {
    fn render_frame(&mut self) -> Result<(), DeviceError> {
        self.render()
    }

    fn finish(&mut self) -> Result<(), DeviceError> {
        tracing::debug!("{} frames accumulated", self.frame_count());
        self.render_surface.finish()
    }
}

/// Renders `frames` frames, then lets the surface write out its result once.
pub(crate) fn render_frames(
    sequence: &mut impl FrameSequence,
    frames: u32,
) -> Result<(), DeviceError> {
    for _ in 0..frames {
        sequence.render_frame()?;
    }
    sequence.finish()
}

const fn vk_layout(layout: ImageLayout) -> VkImageLayout {
    match layout {
        ImageLayout::General => VkImageLayout::General,
        ImageLayout::TransferSrc => VkImageLayout::TransferSrcOptimal,
        ImageLayout::TransferDst => VkImageLayout::TransferDstOptimal,
    }
}

const fn vk_region(region: &StridedRegion) -> StridedDeviceAddressRegion {
    StridedDeviceAddressRegion {
        device_address: region.device_address.get(),
        stride: region.stride,
        size: region.size,
    }
}

/// Records frame commands into a vulkano command buffer.
struct VulkanFrameCommands<'a> {
    builder: &'a mut RenderCommandBuilder,
    pipeline: &'a Arc<RayTracingPipeline>,
    ray_tracing_set: &'a Arc<DescriptorSet>,
    scene_set: &'a Arc<DescriptorSet>,
    output: &'a Arc<Image>,
    presentation: &'a Arc<Image>,
}

impl FrameCommands for VulkanFrameCommands<'_> {
    fn bind_pipeline(&mut self) -> Result<(), DeviceError> {
        self.builder
            .bind_pipeline_ray_tracing(self.pipeline.clone())
            .map_err(DeviceError::vulkan("bind ray tracing pipeline"))?;
        Ok(())
    }

    fn bind_descriptor_sets(&mut self) -> Result<(), DeviceError> {
        self.builder
            .bind_descriptor_sets(
                PipelineBindPoint::RayTracing,
                self.pipeline.layout().clone(),
                bindings::RAY_TRACING_SET,
                vec![self.ray_tracing_set.clone(), self.scene_set.clone()],
            )
            .map_err(DeviceError::vulkan("bind descriptor sets"))?;
        Ok(())
    }

    fn push_constants(&mut self, constants: &PushConstantRay) -> Result<(), DeviceError> {
        self.builder
            .push_constants(self.pipeline.layout().clone(), 0, *constants)
            .map_err(DeviceError::vulkan("push constants"))?;
        Ok(())
    }

    fn trace_rays(
        &mut self,
        regions: &ShaderBindingTableRegions,
        dimensions: [u32; 3],
    ) -> Result<(), DeviceError> {
        let addresses = ShaderBindingTableAddresses {
            raygen: vk_region(&regions.raygen),
            miss: vk_region(&regions.miss),
            hit: vk_region(&regions.hit),
            callable: vk_region(&regions.callable),
        };
        // SAFETY: the table regions were built from this pipeline's handles
        unsafe {
            self.builder
                .trace_rays(addresses, dimensions)
                .map_err(DeviceError::vulkan("trace rays"))?;
        }
        Ok(())
    }

    fn copy_to_presentation(&mut self, handoff: &ImageHandoff) -> Result<(), DeviceError> {
        self.builder
            .copy_image(CopyImageInfo {
                src_image_layout: vk_layout(handoff.source_layout),
                dst_image_layout: vk_layout(handoff.destination_layout),
                ..CopyImageInfo::images(self.output.clone(), self.presentation.clone())
            })
            .map_err(DeviceError::vulkan("copy output image"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        rendered: u32,
        finished_after: Option<u32>,
    }

    impl FrameSequence for Counter {
        fn render_frame(&mut self) -> Result<(), DeviceError> {
            assert!(self.finished_after.is_none());
            self.rendered += 1;
            Ok(())
        }

        fn finish(&mut self) -> Result<(), DeviceError> {
            assert!(self.finished_after.is_none(), "finished twice");
            self.finished_after = Some(self.rendered);
            Ok(())
        }
    }

    #[test]
    fn test_output_written_once_after_last_frame() {
        let mut counter = Counter::default();
        render_frames(&mut counter, 64).unwrap();
        assert_eq!(counter.rendered, 64);
        assert_eq!(counter.finished_after, Some(64));
    }

    #[test]
    fn test_vk_region_fields() {
        let region = vk_region(&StridedRegion {
            device_address: crate::device::DeviceAddress::new(0x1_0000),
            stride: 64,
            size: 128,
        });
        assert_eq!(region.device_address, 0x1_0000);
        assert_eq!(region.stride, 64);
        assert_eq!(region.size, 128);
    }
}
