//! Camera rotation and projection.
//!
//! The globe is drawn orthographically: view space is the scene rotated by
//! the camera matrix, the viewer looks down -z, and the globe's radius on
//! screen is `scale` in normalized device units of the shorter axis.

use nalgebra::{Matrix3, Vector3};

pub const MIN_ZOOM: f64 = 0.3;
pub const MAX_ZOOM: f64 = 8.0;
const BASE_SCALE: f64 = 0.75;

pub fn rotation_from_drag(dx: f64, dy: f64) -> Matrix3<f64> {
    let rot_y = Matrix3::new(
        dx.cos(), 0.0, dx.sin(),
        0.0, 1.0, 0.0,
        -dx.sin(), 0.0, dx.cos(),
    );
    let rot_x = Matrix3::new(
        1.0, 0.0, 0.0,
        0.0, dy.cos(), -dy.sin(),
        0.0, dy.sin(), dy.cos(),
    );
    rot_x * rot_y
}

/// Looks at the given latitude/longitude (radians) from above.
pub fn look_at_lat_lon(lat: f64, lon: f64) -> Matrix3<f64> {
    rotation_from_drag(0.0, lat) * rotation_from_drag(std::f64::consts::PI - lon, 0.0)
}

#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    pub rotation: Matrix3<f64>,
    pub zoom: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self { rotation: look_at_lat_lon(0.35, 0.0), zoom: 1.0 }
    }
}

impl Camera {
    pub fn drag(&mut self, dx: f64, dy: f64) {
        self.rotation = rotation_from_drag(dx, dy) * self.rotation;
    }

    pub fn zoom_by(&mut self, factor: f64) {
        self.zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn scale(&self) -> f64 {
        BASE_SCALE * self.zoom
    }

    pub fn to_view(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * point
    }

    /// Inside or behind the unit globe as seen from +z.
    pub fn occluded(view: &Vector3<f64>) -> bool {
        let r2 = view.x * view.x + view.y * view.y;
        r2 < 1.0 && view.z < (1.0 - r2).sqrt()
    }

    /// Normalized device coordinates, or `None` when hidden by the globe.
    pub fn project(&self, point: &Vector3<f64>, aspect: f64) -> Option<[f64; 2]> {
        let view = self.to_view(point);
        if Self::occluded(&view) {
            return None;
        }
        let s = self.scale();
        Some([view.x * s / aspect.max(1.0), view.y * s / (1.0 / aspect).max(1.0)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::geodetic_to_scene;

    fn scene(lat: f64, lon: f64) -> Vector3<f64> {
        let [x, y, z] = geodetic_to_scene(lat, lon, 1.0);
        Vector3::new(x as f64, y as f64, z as f64)
    }

    #[test]
    fn look_at_centers_the_point() {
        for (lat, lon) in [(0.0, 0.0), (0.5, 1.0), (-0.9, -2.5)] {
            let cam = Camera { rotation: look_at_lat_lon(lat, lon), zoom: 1.0 };
            let v = cam.to_view(&scene(lat, lon));
            assert!(v.x.abs() < 1e-6 && v.y.abs() < 1e-6, "{lat},{lon}: {v:?}");
            assert!((v.z - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn far_side_is_occluded() {
        let cam = Camera { rotation: look_at_lat_lon(0.0, 0.0), zoom: 1.0 };
        assert!(cam.project(&(scene(0.0, std::f64::consts::PI) * 1.05), 1.0).is_none());
        assert!(cam.project(&(scene(0.0, 0.0) * 1.05), 1.0).is_some());
        assert!(cam.project(&Vector3::zeros(), 1.0).is_none());
    }

    #[test]
    fn zoom_is_clamped() {
        let mut cam = Camera::default();
        cam.zoom_by(1e6);
        assert_eq!(cam.zoom, MAX_ZOOM);
        cam.zoom_by(1e-9);
        assert_eq!(cam.zoom, MIN_ZOOM);
        cam.reset();
        assert_eq!(cam, Camera::default());
    }

    #[test]
    fn drag_keeps_rotation_orthonormal() {
        let mut cam = Camera::default();
        for i in 0..100 {
            cam.drag(0.01 * i as f64, -0.02);
        }
        let should_be_identity = cam.rotation * cam.rotation.transpose();
        assert!((should_be_identity - Matrix3::identity()).norm() < 1e-9);
    }
}
