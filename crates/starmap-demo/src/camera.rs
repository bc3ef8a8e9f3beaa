//! Scripted camera paths for the demo.

use glam::DVec3;
use starmap_imageset::DataSetType;
use starmap_math::Viewport;
use starmap_tiles::RenderContext;

/// Degrees turned per frame.
const TURN_RATE: f64 = 0.5;

/// Pans around the sky from the centre, or orbits a globe from outside.
#[derive(Clone, Copy, Debug)]
pub struct OrbitCamera {
    inside: bool,
    distance: f64,
}

impl OrbitCamera {
    #[must_use]
    pub fn for_dataset(data_set_type: DataSetType) -> Self {
        match data_set_type {
            DataSetType::Sky | DataSetType::Panorama => Self {
                inside: true,
                distance: 0.0,
            },
            _ => Self {
                inside: false,
                distance: 2.5,
            },
        }
    }

    /// Eye and look-at target after `frame` frames.
    #[must_use]
    pub fn pose(&self, frame: u32) -> (DVec3, DVec3) {
        let angle = (f64::from(frame) * TURN_RATE).to_radians();
        let heading = DVec3::new(angle.cos(), 0.25, angle.sin()).normalize();
        if self.inside {
            (DVec3::ZERO, heading)
        } else {
            (heading * self.distance, DVec3::ZERO)
        }
    }

    #[must_use]
    pub fn context(
        &self,
        frame: u32,
        viewport: Viewport,
        fov_degrees: f64,
        lod_threshold_px: f64,
    ) -> RenderContext {
        let (eye, target) = self.pose(frame);
        RenderContext::look_at(eye, target, DVec3::Y, fov_degrees, viewport, lod_threshold_px)
    }
}
