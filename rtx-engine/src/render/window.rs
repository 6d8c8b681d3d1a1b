use std::sync::Arc;

use vulkano::{
    command_buffer::BlitImageInfo,
    device::{Device, DeviceOwned, Queue},
    format::Format,
    image::{sampler::Filter, Image, ImageUsage},
    swapchain::{self, Surface, SurfaceInfo, Swapchain, SwapchainCreateInfo, SwapchainPresentInfo},
    sync::{self, GpuFuture},
    Validated, VulkanError,
};
use winit::{dpi::LogicalSize, event_loop::ActiveEventLoop};

use crate::error::DeviceError;

/// Swapchain formats that can be blitted to, in order of preference.
const SURFACE_FORMATS: [Format; 2] = [Format::B8G8R8A8_UNORM, Format::R8G8B8A8_UNORM];

/// Represents a window.
pub struct Window {
    /// Inner `winit` window.
    window: Arc<winit::window::Window>,
    swapchain: Arc<Swapchain>,
    images: Vec<Arc<Image>>,
    /// Whether the swapchain needs to be recreated.
    recreate_swapchain: bool,
    /// The index of the image being rendered.
    image_index: u32,
    /// Completion of the previous frame.
    previous_frame_end: Option<Box<dyn GpuFuture>>,
}

impl Window {
    /// Creates a new window with its swapchain.
    pub fn new(
        event_loop: &ActiveEventLoop,
        device: &Arc<Device>,
        window_descriptor: &WindowDescriptor,
    ) -> Result<Self, DeviceError> {
        let mut attributes = winit::window::Window::default_attributes()
            .with_title(&window_descriptor.title)
            .with_resizable(window_descriptor.resizable);

        attributes = match window_descriptor.mode {
            Mode::BorderlessFullscreen => attributes.with_fullscreen(Some(
                winit::window::Fullscreen::Borderless(event_loop.primary_monitor()),
            )),
            Mode::Windowed => attributes.with_inner_size(LogicalSize::new(
                window_descriptor.width,
                window_descriptor.height,
            )),
        };

        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .map_err(DeviceError::vulkan("create window"))?,
        );

        if let Some(name) = window.current_monitor().and_then(|monitor| monitor.name()) {
            tracing::info!("Window created on monitor {}", name);
        }

        let (swapchain, images) =
            Self::create_swapchain(device.clone(), &window, window_descriptor.present_mode)?;

        Ok(Self {
            window,
            swapchain,
            images,
            recreate_swapchain: false,
            image_index: 0,
            previous_frame_end: Some(sync::now(device.clone()).boxed()),
        })
    }

    fn create_swapchain(
        device: Arc<Device>,
        window: &Arc<winit::window::Window>,
        requested_present_mode: PresentMode,
    ) -> Result<(Arc<Swapchain>, Vec<Arc<Image>>), DeviceError> {
        let surface = Surface::from_window(device.instance().clone(), window.clone())
            .map_err(DeviceError::vulkan("create surface"))?;
        let physical_device = device.physical_device();
        let surface_capabilities = physical_device
            .surface_capabilities(&surface, SurfaceInfo::default())
            .map_err(DeviceError::vulkan("query surface capabilities"))?;

        let supported_formats = physical_device
            .surface_formats(&surface, SurfaceInfo::default())
            .map_err(DeviceError::vulkan("query surface formats"))?;
        let image_format = SURFACE_FORMATS
            .into_iter()
            .find(|format| supported_formats.iter().any(|(supported, _)| supported == format))
            .ok_or(DeviceError::Vulkan {
                operation: "create swapchain",
                message: "no supported 8-bit UNORM surface format".to_string(),
            })?;

        let present_mode = if physical_device
            .surface_present_modes(&surface, SurfaceInfo::default())
            .map_err(DeviceError::vulkan("query present modes"))?
            .into_iter()
            .any(|mode| mode == requested_present_mode.into())
        {
            requested_present_mode
        } else {
            /// This present mode is guaranteed to be supported.
            const FALLBACK_PRESENT_MODE: PresentMode = PresentMode::Fifo;
            tracing::warn!(
                "Requested present mode {:?} not supported, falling back to {:?}",
                requested_present_mode,
                FALLBACK_PRESENT_MODE
            );
            FALLBACK_PRESENT_MODE
        };

        Swapchain::new(
            device,
            surface,
            SwapchainCreateInfo {
                min_image_count: surface_capabilities.min_image_count + 1,
                image_format,
                image_extent: window.inner_size().into(),
                image_usage: ImageUsage::TRANSFER_DST | ImageUsage::COLOR_ATTACHMENT,
                present_mode: present_mode.into(),
                ..Default::default()
            },
        )
        .map_err(DeviceError::vulkan("create swapchain"))
    }

    /// Recreates the swapchain at the current window size.
    fn recreate_swapchain(&mut self) -> Result<(), DeviceError> {
        let [width, height]: [u32; 2] = self.window.inner_size().into();
        if width == 0 || height == 0 {
            return Ok(());
        }

        let (swapchain, images) = self
            .swapchain
            .recreate(SwapchainCreateInfo {
                image_extent: [width, height],
                ..self.swapchain.create_info()
            })
            .map_err(DeviceError::vulkan("recreate swapchain"))?;

        self.swapchain = swapchain;
        self.images = images;
        self.recreate_swapchain = false;

        tracing::debug!("Swapchain recreated ({}x{})", width, height);

        Ok(())
    }
}

impl super::RenderSurface for Window {
    fn extent(&self) -> [u32; 2] {
        self.window.inner_size().into()
    }

    fn acquire(&mut self) -> Result<Option<Box<dyn GpuFuture>>, DeviceError> {
        if let Some(previous_frame_end) = &mut self.previous_frame_end {
            previous_frame_end.cleanup_finished();
        }

        if self.recreate_swapchain || self.swapchain.image_extent() != self.extent() {
            self.recreate_swapchain()?;
        }

        let (image_index, suboptimal, acquire_future) =
            match swapchain::acquire_next_image(self.swapchain.clone(), None)
                .map_err(Validated::unwrap)
            {
                Ok(r) => r,
                Err(VulkanError::OutOfDate) => {
                    self.recreate_swapchain = true;
                    return Ok(None);
                }
                Err(err) => return Err(DeviceError::vulkan("acquire next image")(err)),
            };

        self.recreate_swapchain |= suboptimal;
        self.image_index = image_index;

        let previous_frame_end = self
            .previous_frame_end
            .take()
            .unwrap_or_else(|| sync::now(self.swapchain.device().clone()).boxed());

        Ok(Some(previous_frame_end.join(acquire_future).boxed()))
    }

    fn record_blit(
        &self,
        builder: &mut super::RenderCommandBuilder,
        presentation: &Arc<Image>,
    ) -> Result<(), DeviceError> {
        let target = self
            .images
            .get(self.image_index as usize)
            .ok_or(DeviceError::Vulkan {
                operation: "blit to swapchain",
                message: format!("no swapchain image {}", self.image_index),
            })?;

        builder
            .blit_image(BlitImageInfo {
                filter: Filter::Nearest,
                ..BlitImageInfo::images(presentation.clone(), target.clone())
            })
            .map_err(DeviceError::vulkan("blit to swapchain"))?;
        Ok(())
    }

    fn present(
        &mut self,
        render_future: Box<dyn GpuFuture>,
        queue: &Arc<Queue>,
    ) -> Result<(), DeviceError> {
        let future = render_future
            .then_swapchain_present(
                queue.clone(),
                SwapchainPresentInfo::swapchain_image_index(
                    self.swapchain.clone(),
                    self.image_index,
                ),
            )
            .then_signal_fence_and_flush();

        match future.map_err(Validated::unwrap) {
            Ok(future) => {
                self.previous_frame_end = Some(future.boxed());
                Ok(())
            }
            Err(VulkanError::OutOfDate) => {
                self.recreate_swapchain = true;
                self.previous_frame_end = Some(sync::now(queue.device().clone()).boxed());
                Ok(())
            }
            Err(err) => {
                self.previous_frame_end = Some(sync::now(queue.device().clone()).boxed());
                Err(DeviceError::vulkan("present frame")(err))
            }
        }
    }

    fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Represents the mode of the window.
pub enum Mode {
    Windowed,
    BorderlessFullscreen,
}

#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone)]
/// Represents a window descriptor.
pub struct WindowDescriptor {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub resizable: bool,
    pub mode: Mode,
    pub present_mode: PresentMode,
}

impl Default for WindowDescriptor {
    fn default() -> Self {
        Self {
            title: "rtx-viewer".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
            mode: Mode::Windowed,
            present_mode: PresentMode::Fifo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Represents the present mode of the window.
pub enum PresentMode {
    /// The image is presented immediately.
    Immediate,
    /// Images get queued and the latest one is presented.
    Mailbox,
    /// Images are presented in order, one per vertical blank.
    ///
    /// This present mode is the only one guaranteed to be supported.
    Fifo,
}

impl From<PresentMode> for vulkano::swapchain::PresentMode {
    fn from(mode: PresentMode) -> Self {
        match mode {
            PresentMode::Immediate => Self::Immediate,
            PresentMode::Mailbox => Self::Mailbox,
            PresentMode::Fifo => Self::Fifo,
        }
    }
}
