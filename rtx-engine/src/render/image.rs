use std::{fs::File, io::BufWriter, path::PathBuf, sync::Arc};

use vulkano::{
    buffer::{Buffer, BufferCreateInfo, BufferUsage, Subbuffer},
    command_buffer::{BlitImageInfo, CopyImageToBufferInfo},
    device::{Device, Queue},
    format::Format,
    image::{sampler::Filter, Image as VkImage, ImageCreateInfo, ImageType, ImageUsage},
    memory::allocator::{AllocationCreateInfo, MemoryTypeFilter, StandardMemoryAllocator},
    sync::{self, GpuFuture},
};

use crate::error::DeviceError;

/// Renders into an offscreen image, written to a PNG file after the last frame.
pub struct Image {
    device: Arc<Device>,
    path: PathBuf,
    width: u32,
    height: u32,
    target: Arc<VkImage>,
    readback: Subbuffer<[u8]>,
}

impl Image {
    pub fn new(
        device: &Arc<Device>,
        memory_allocator: &Arc<StandardMemoryAllocator>,
        image_descriptor: &ImageDescriptor,
    ) -> Result<Self, DeviceError> {
        let ImageDescriptor {
            path,
            width,
            height,
            ..
        } = image_descriptor;

        let target = VkImage::new(
            memory_allocator.clone(),
            ImageCreateInfo {
                image_type: ImageType::Dim2d,
                format: Format::R8G8B8A8_UNORM,
                extent: [*width, *height, 1],
                usage: ImageUsage::TRANSFER_DST | ImageUsage::TRANSFER_SRC,
                ..Default::default()
            },
            AllocationCreateInfo::default(),
        )
        .map_err(DeviceError::vulkan("create offscreen image"))?;

        let readback = Buffer::new_slice::<u8>(
            memory_allocator.clone(),
            BufferCreateInfo {
                usage: BufferUsage::TRANSFER_DST,
                ..Default::default()
            },
            AllocationCreateInfo {
                memory_type_filter: MemoryTypeFilter::PREFER_HOST
                    | MemoryTypeFilter::HOST_RANDOM_ACCESS,
                ..Default::default()
            },
            u64::from(*width) * u64::from(*height) * 4,
        )
        .map_err(DeviceError::vulkan("allocate readback buffer"))?;

        Ok(Self {
            device: device.clone(),
            path: path.clone(),
            width: *width,
            height: *height,
            target,
            readback,
        })
    }

    fn write_png(&self) -> Result<(), DeviceError> {
        let png_error = |err: &dyn std::fmt::Display| DeviceError::Output {
            path: self.path.clone(),
            message: err.to_string(),
        };

        let file = File::create(&self.path).map_err(|err| png_error(&err))?;
        let mut encoder = png::Encoder::new(BufWriter::new(file), self.width, self.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);

        let mut writer = encoder.write_header().map_err(|err| png_error(&err))?;
        let data = self
            .readback
            .read()
            .map_err(DeviceError::vulkan("read back frame"))?;
        writer.write_image_data(&data).map_err(|err| png_error(&err))?;

        tracing::info!("Frame written to {}", self.path.display());

        Ok(())
    }
}

impl super::RenderSurface for Image {
    fn extent(&self) -> [u32; 2] {
        [self.width, self.height]
    }

    fn acquire(&mut self) -> Result<Option<Box<dyn GpuFuture>>, DeviceError> {
        Ok(Some(sync::now(self.device.clone()).boxed()))
    }

    fn record_blit(
        &self,
        builder: &mut super::RenderCommandBuilder,
        presentation: &Arc<VkImage>,
    ) -> Result<(), DeviceError> {
        builder
            .blit_image(BlitImageInfo {
                filter: Filter::Nearest,
                ..BlitImageInfo::images(presentation.clone(), self.target.clone())
            })
            .map_err(DeviceError::vulkan("blit to offscreen image"))?
            .copy_image_to_buffer(CopyImageToBufferInfo::image_buffer(
                self.target.clone(),
                self.readback.clone(),
            ))
            .map_err(DeviceError::vulkan("copy offscreen image"))?;
        Ok(())
    }

    fn present(
        &mut self,
        render_future: Box<dyn GpuFuture>,
        _queue: &Arc<Queue>,
    ) -> Result<(), DeviceError> {
        render_future
            .then_signal_fence_and_flush()
            .map_err(DeviceError::vulkan("flush frame"))?
            .wait(None)
            .map_err(DeviceError::vulkan("wait for frame"))?;

        Ok(())
    }

    fn finish(&mut self) -> Result<(), DeviceError> {
        self.write_png()
    }
}

#[derive(Clone, Debug)]
pub struct ImageDescriptor {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Frames accumulated before rendering stops.
    pub frames: u32,
}
