//! Ray traced model viewer

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use glam::{Mat4, Vec3};
use rtx_engine::{
    render::window::WindowDescriptor,
    CameraDescriptor, ModelDescriptor, RaySettings, RayTracingApp, RayTracingAppConfig,
    RenderSurfaceType, SceneDescriptor, ShaderStageDesc,
};
use tracing_subscriber::{fmt, EnvFilter};

/// Path traces Wavefront OBJ models on a ray tracing capable GPU.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Models to load, in order
    #[arg(required = true)]
    models: Vec<PathBuf>,

    /// Position of each model as x,y,z, in model order
    #[arg(long = "position", value_parser = parse_vec3)]
    positions: Vec<Vec3>,

    /// Directory containing the compiled SPIR-V shaders
    #[arg(long, default_value = "shaders")]
    shaders: PathBuf,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    #[arg(long, default_value_t = RaySettings::default().exposure)]
    exposure: f32,

    /// Russian roulette threshold
    #[arg(long, default_value_t = RaySettings::default().rr)]
    rr: f32,

    /// Maximum bounce depth
    #[arg(long, default_value_t = RaySettings::default().depth)]
    depth: i32,

    /// Disable explicit emitter sampling
    #[arg(long)]
    no_explicit_light: bool,

    /// Camera position as x,y,z
    #[arg(long, value_parser = parse_vec3)]
    eye: Option<Vec3>,

    /// Point the camera looks at, as x,y,z
    #[arg(long, value_parser = parse_vec3)]
    target: Option<Vec3>,

    /// Vertical field of view in degrees
    #[arg(long)]
    fov: Option<f32>,

    /// Render offscreen to this PNG file instead of opening a window
    #[cfg(feature = "headless")]
    #[arg(long)]
    output: Option<PathBuf>,

    /// Frames accumulated before the PNG is final
    #[cfg(feature = "headless")]
    #[arg(long, default_value_t = 64)]
    frames: u32,
}

fn parse_vec3(text: &str) -> Result<Vec3, String> {
    let components = text
        .split(',')
        .map(|component| component.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| format!("invalid vector `{text}`: {err}"))?;
    match components[..] {
        [x, y, z] => Ok(Vec3::new(x, y, z)),
        _ => Err(format!("expected x,y,z, got `{text}`")),
    }
}

impl Args {
    fn scene(&self) -> SceneDescriptor {
        SceneDescriptor {
            models: self
                .models
                .iter()
                .enumerate()
                .map(|(i, path)| ModelDescriptor {
                    path: path.clone(),
                    transform: Mat4::from_translation(
                        self.positions.get(i).copied().unwrap_or(Vec3::ZERO),
                    ),
                })
                .collect(),
        }
    }

    fn camera(&self) -> CameraDescriptor {
        let default = CameraDescriptor::default();
        CameraDescriptor {
            eye: self.eye.unwrap_or(default.eye),
            target: self.target.unwrap_or(default.target),
            fov_y: self.fov.unwrap_or(default.fov_y),
            ..default
        }
    }

    fn ray_settings(&self) -> RaySettings {
        RaySettings {
            rr: self.rr,
            depth: self.depth,
            explicit_light: !self.no_explicit_light,
            exposure: self.exposure,
            ..RaySettings::default()
        }
    }

    fn render_surface_type(&self) -> RenderSurfaceType {
        #[cfg(feature = "headless")]
        if let Some(path) = &self.output {
            return RenderSurfaceType::Image(rtx_engine::render::image::ImageDescriptor {
                path: path.clone(),
                width: self.width,
                height: self.height,
                frames: self.frames,
            });
        }

        RenderSurfaceType::Window(WindowDescriptor {
            width: self.width,
            height: self.height,
            ..WindowDescriptor::default()
        })
    }
}

fn main() -> anyhow::Result<()> {
    let default_level = if cfg!(debug_assertions) {
        "trace"
    } else {
        "info"
    };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let args = Args::parse();
    tracing::debug!(?args, "Starting");

    let config = RayTracingAppConfig {
        render_surface_type: args.render_surface_type(),
        scene: args.scene(),
        shader_dir: args.shaders.clone(),
        stages: ShaderStageDesc::default_stages(),
        camera: args.camera(),
        ray_settings: args.ray_settings(),
    };

    let app = RayTracingApp::new(config).context("failed to initialize the renderer")?;
    app.run().context("rendering failed")?;

    Ok(())
}
