//! Per-frame view state handed to the traversal.

use glam::{DMat4, DVec3};
use starmap_math::{Frustum, Viewport};

/// Camera and viewport for one frame, expressed in tile (model) space.
#[derive(Clone, Debug)]
pub struct RenderContext {
    /// World-view-projection matrix.
    pub wvp: DMat4,
    /// Camera position in model space.
    pub camera_position: DVec3,
    pub viewport: Viewport,
    pub frustum: Frustum,
    /// Screen-space edge length (pixels) above which tiles refine.
    pub lod_threshold_px: f64,
}

impl RenderContext {
    /// Build from separate world, view and projection matrices.
    ///
    /// `camera_world` is transformed into model space through the inverse of
    /// `world` so distance ordering works on tile bounds directly.
    #[must_use]
    pub fn new(
        world: DMat4,
        view: DMat4,
        projection: DMat4,
        camera_world: DVec3,
        viewport: Viewport,
        lod_threshold_px: f64,
    ) -> Self {
        let wvp = projection * view * world;
        Self {
            wvp,
            camera_position: world.inverse().transform_point3(camera_world),
            viewport,
            frustum: Frustum::from_view_projection(&wvp),
            lod_threshold_px,
        }
    }

    /// Perspective camera at `eye` looking at `target`, no world transform.
    ///
    /// Depth range is `[0, 1]`.
    #[must_use]
    pub fn look_at(
        eye: DVec3,
        target: DVec3,
        up: DVec3,
        fov_y_degrees: f64,
        viewport: Viewport,
        lod_threshold_px: f64,
    ) -> Self {
        let aspect = if viewport.height > 0.0 {
            viewport.width / viewport.height
        } else {
            1.0
        };
        let near = 1e-4;
        let far = (eye.length() + 2.0).max(10.0);
        let view = DMat4::look_at_rh(eye, target, up);
        let projection = DMat4::perspective_rh(fov_y_degrees.to_radians(), aspect, near, far);
        Self::new(
            DMat4::IDENTITY,
            view,
            projection,
            eye,
            viewport,
            lod_threshold_px,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starmap_math::Intersection;

    #[test]
    fn test_look_at_sees_target() {
        let ctx = RenderContext::look_at(
            DVec3::new(0.0, 0.0, 3.0),
            DVec3::ZERO,
            DVec3::Y,
            60.0,
            Viewport::new(800.0, 600.0),
            300.0,
        );
        assert_ne!(
            ctx.frustum.classify_sphere(DVec3::ZERO, 0.5),
            Intersection::Outside
        );
        assert_eq!(
            ctx.frustum.classify_sphere(DVec3::new(0.0, 0.0, 10.0), 0.5),
            Intersection::Outside
        );
        assert!((ctx.camera_position - DVec3::new(0.0, 0.0, 3.0)).length() < 1e-12);
    }

    #[test]
    fn test_world_transform_moves_camera_into_model_space() {
        let world = DMat4::from_translation(DVec3::new(5.0, 0.0, 0.0));
        let ctx = RenderContext::new(
            world,
            DMat4::IDENTITY,
            DMat4::IDENTITY,
            DVec3::new(5.0, 0.0, 2.0),
            Viewport::new(100.0, 100.0),
            300.0,
        );
        assert!((ctx.camera_position - DVec3::new(0.0, 0.0, 2.0)).length() < 1e-12);
    }
}
