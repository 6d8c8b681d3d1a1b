#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

use std::path::PathBuf;

#[cfg(feature = "headless")]
use render::image::{Image, ImageDescriptor};

use render::{
    window::{Window, WindowDescriptor},
    RenderSurface, Renderer,
};
use vulkano::swapchain::Surface;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{Key, NamedKey},
    window::WindowId,
};

pub mod acceleration;
pub mod buffer;
pub mod camera;
pub mod context;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod render;
pub mod sbt;
pub mod shader;

pub use camera::CameraDescriptor;
pub use context::Context;
pub use dispatch::RaySettings;
pub use error::{Error, Result};
pub use model::{import::ObjImporter, ModelDescriptor, SceneDescriptor, SceneState};
pub use pipeline::{PipelineDescription, ShaderStageDesc, ShaderStageKind};

pub struct RayTracingApp {
    // Declared before the scene: descriptor sets reference scene buffers
    renderer: Option<Renderer>,
    scene: SceneState<Context>,
    context: Context,
    config: RayTracingAppConfig,
    description: PipelineDescription,
    event_loop: Option<EventLoop<()>>,
    error: Option<Error>,
}

impl RayTracingApp {
    /// Creates the device and loads the scene. Window rendering starts when
    /// [`RayTracingApp::run`] is called.
    pub fn new(config: RayTracingAppConfig) -> Result<Self> {
        let description =
            PipelineDescription::new(config.stages.clone(), config.ray_settings.max_recursion_depth)?;

        let (event_loop, instance_extensions) = match &config.render_surface_type {
            RenderSurfaceType::Window(_) => {
                let event_loop = EventLoop::new().map_err(|err| Error::Window(err.to_string()))?;
                let extensions = Surface::required_extensions(&event_loop)
                    .map_err(|err| Error::Window(err.to_string()))?;
                (Some(event_loop), extensions)
            }
            #[cfg(feature = "headless")]
            RenderSurfaceType::Image(_) => (None, vulkano::instance::InstanceExtensions::empty()),
        };
        let context = Context::new(instance_extensions, event_loop.is_some())?;

        let scene = SceneState::load(&context, &ObjImporter, &config.scene)?;
        tracing::info!(
            "Scene loaded: {} objects, {} textures, {} emitters",
            scene.objects().len(),
            scene.textures().len(),
            scene.emitters().len()
        );

        #[cfg_attr(not(feature = "headless"), allow(unused_mut))]
        let mut app = Self {
            renderer: None,
            scene,
            context,
            config,
            description,
            event_loop,
            error: None,
        };

        #[cfg(feature = "headless")]
        if let RenderSurfaceType::Image(descriptor) = &app.config.render_surface_type {
            let surface = Image::new(
                app.context.device(),
                app.context.memory_allocator(),
                descriptor,
            )?;
            app.renderer = Some(app.create_renderer(Box::new(surface))?);
        }

        tracing::debug!("Successfully initialized");

        Ok(app)
    }

    fn create_renderer(&self, surface: Box<dyn RenderSurface>) -> Result<Renderer> {
        Ok(Renderer::new(
            &self.context,
            &self.scene,
            surface,
            &self.description,
            &self.config.shader_dir,
            &self.config.ray_settings,
            &self.config.camera,
        )?)
    }

    #[must_use]
    pub const fn scene(&self) -> &SceneState<Context> {
        &self.scene
    }

    /// Runs the window event loop, or renders the configured number of frames
    /// when rendering to an image.
    pub fn run(mut self) -> Result<()> {
        match self.event_loop.take() {
            Some(event_loop) => {
                event_loop
                    .run_app(&mut self)
                    .map_err(|err| Error::Window(err.to_string()))?;
                self.error.take().map_or(Ok(()), Err)
            }
            None => {
                let frames = self.config.render_surface_type.frames().unwrap_or(0);
                if let Some(renderer) = &mut self.renderer {
                    render::render_frames(renderer, frames)?;
                }
                Ok(())
            }
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: Error) {
        tracing::error!("{err}");
        self.error = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for RayTracingApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() {
            return;
        }
        let Some(descriptor) = self.config.render_surface_type.window() else {
            return;
        };

        let renderer = Window::new(event_loop, self.context.device(), descriptor)
            .map_err(Error::from)
            .and_then(|window| self.create_renderer(Box::new(window)));
        match renderer {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => event_loop.exit(),
            WindowEvent::RedrawRequested => {
                let rendered = self.renderer.as_mut().map_or(Ok(()), Renderer::render);
                if let Err(err) = rendered {
                    self.fail(event_loop, err.into());
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = &self.renderer {
            renderer.request_redraw();
        }
    }
}

pub struct RayTracingAppConfig {
    pub render_surface_type: RenderSurfaceType,
    pub scene: SceneDescriptor,
    /// Directory holding the compiled shader binaries.
    pub shader_dir: PathBuf,
    pub stages: Vec<ShaderStageDesc>,
    pub camera: CameraDescriptor,
    pub ray_settings: RaySettings,
}

impl Default for RayTracingAppConfig {
    fn default() -> Self {
        Self {
            render_surface_type: RenderSurfaceType::Window(WindowDescriptor::default()),
            scene: SceneDescriptor::default(),
            shader_dir: PathBuf::from("shaders"),
            stages: ShaderStageDesc::default_stages(),
            camera: CameraDescriptor::default(),
            ray_settings: RaySettings::default(),
        }
    }
}

#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum RenderSurfaceType {
    Window(WindowDescriptor),
    #[cfg(feature = "headless")]
    Image(ImageDescriptor),
}

impl RenderSurfaceType {
    #[must_use]
    pub const fn window(&self) -> Option<&WindowDescriptor> {
        match self {
            Self::Window(descriptor) => Some(descriptor),
            #[cfg(feature = "headless")]
            Self::Image(_) => None,
        }
    }

    /// Number of frames to render before returning, for offscreen surfaces.
    #[must_use]
    pub const fn frames(&self) -> Option<u32> {
        match self {
            Self::Window(_) => None,
            #[cfg(feature = "headless")]
            Self::Image(descriptor) => Some(descriptor.frames),
        }
    }
}
