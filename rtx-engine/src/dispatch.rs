//! Per-frame recording of the ray tracing dispatch.

use crate::{
    device::FrameCommands,
    error::DeviceError,
    sbt::ShaderBindingTableRegions,
    shader::{PushConstantRay, ALIGNMENT_SENTINEL},
};

/// Path tracing parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaySettings {
    /// Russian roulette threshold.
    pub rr: f32,
    /// Maximum bounce depth used while shading.
    pub depth: i32,
    /// Whether emitters are sampled explicitly at each bounce.
    pub explicit_light: bool,
    pub exposure: f32,
    /// Recursion bound the pipeline is created with.
    pub max_recursion_depth: u32,
}

impl Default for RaySettings {
    fn default() -> Self {
        Self {
            rr: 0.8,
            depth: 5,
            explicit_light: true,
            exposure: 2.0,
            max_recursion_depth: 10,
        }
    }
}

/// Image layouts the output and presentation images go through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageLayout {
    General,
    TransferSrc,
    TransferDst,
}

/// Copy of the traced output into the presentation image.
///
/// The output image is written by the ray generation shader in
/// [`ImageLayout::General`]; the copy reads and writes in the transfer layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageHandoff {
    pub extent: [u32; 2],
    pub source_layout: ImageLayout,
    pub destination_layout: ImageLayout,
}

impl ImageHandoff {
    #[must_use]
    pub const fn new(extent: [u32; 2]) -> Self {
        Self {
            extent,
            source_layout: ImageLayout::TransferSrc,
            destination_layout: ImageLayout::TransferDst,
        }
    }
}

/// Records the commands of each frame and owns the per-frame push constants.
#[derive(Clone, Debug)]
pub struct FrameDispatcher {
    constants: PushConstantRay,
    frame_count: u64,
}

impl FrameDispatcher {
    /// The first frame starts a fresh accumulation.
    #[must_use]
    pub fn new(settings: &RaySettings) -> Self {
        let mut dispatcher = Self {
            constants: PushConstantRay {
                frame_seed: 0,
                rr: 0.0,
                depth: 0,
                explicit_light: 0,
                clear: 1,
                exposure: 0.0,
                alignment_test: ALIGNMENT_SENTINEL,
            },
            frame_count: 0,
        };
        dispatcher.apply_settings(settings);
        dispatcher
    }

    /// Changes the path tracing parameters and restarts accumulation.
    pub fn apply_settings(&mut self, settings: &RaySettings) {
        self.constants.rr = settings.rr;
        self.constants.depth = settings.depth;
        self.constants.explicit_light = u32::from(settings.explicit_light);
        self.constants.exposure = settings.exposure;
        self.reset_accumulation();
    }

    /// Makes the next frame discard the accumulated image.
    pub fn reset_accumulation(&mut self) {
        self.constants.clear = 1;
    }

    /// Records one frame: the trace over the whole `extent`, then the copy into
    /// the presentation image.
    ///
    /// The frame is counted and accumulation continues even if recording the
    /// trace fails.
    pub fn dispatch<C: FrameCommands>(
        &mut self,
        commands: &mut C,
        regions: &ShaderBindingTableRegions,
        extent: [u32; 2],
    ) -> Result<(), DeviceError> {
        self.constants.alignment_test = ALIGNMENT_SENTINEL;
        #[allow(clippy::cast_possible_truncation)]
        {
            self.constants.frame_seed = self.frame_count as i32;
        }

        let traced = self.record_trace(commands, regions, extent);

        self.constants.clear = 0;
        self.frame_count += 1;

        traced?;
        commands.copy_to_presentation(&ImageHandoff::new(extent))
    }

    fn record_trace<C: FrameCommands>(
        &self,
        commands: &mut C,
        regions: &ShaderBindingTableRegions,
        [width, height]: [u32; 2],
    ) -> Result<(), DeviceError> {
        commands.bind_pipeline()?;
        commands.bind_descriptor_sets()?;
        commands.push_constants(&self.constants)?;
        commands.trace_rays(regions, [width, height, 1])
    }

    /// Number of frames dispatched so far.
    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// The constants the next frame will push, apart from its seed.
    #[must_use]
    pub const fn push_constants(&self) -> &PushConstantRay {
        &self.constants
    }
}
