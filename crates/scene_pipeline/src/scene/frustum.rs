//! View frustum used for visibility culling

use crate::foundation::math::{Mat4, Vec3, Vec4};
use crate::scene::bounds::AABB;

/// Plane defined by normal and distance from origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Normal vector (normalized)
    pub normal: Vec3,
    /// Distance from origin along the normal
    pub distance: f32,
}

impl Plane {
    /// Create a new plane from normal and distance
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal: normal.normalize(), distance }
    }

    /// Build a plane from `ax + by + cz + d` coefficients, normalizing them
    pub fn from_coefficients(coefficients: Vec4) -> Self {
        let normal = Vec3::new(coefficients.x, coefficients.y, coefficients.z);
        let length = normal.magnitude();
        if length <= f32::EPSILON {
            return Self { normal: Vec3::zeros(), distance: 0.0 };
        }
        Self {
            normal: normal / length,
            distance: coefficients.w / length,
        }
    }

    /// Calculate signed distance from plane to point
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(&point) + self.distance
    }
}

/// Frustum for visibility culling
#[derive(Debug, Clone, PartialEq)]
pub struct Frustum {
    /// Six planes defining the frustum (left, right, bottom, top, near, far),
    /// normals pointing inwards
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Create a frustum from six planes
    pub fn new(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Extract frustum planes from a projection * view matrix
    ///
    /// Gribb-Hartmann extraction for clip space with depth in `[-1, 1]`.
    /// The resulting planes live in the space the matrix maps from (world
    /// space for projection * view).
    pub fn from_matrix(matrix: &Mat4) -> Self {
        let row = |i: usize| matrix.row(i).transpose();
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        Self {
            planes: [
                Plane::from_coefficients(r3 + r0),
                Plane::from_coefficients(r3 - r0),
                Plane::from_coefficients(r3 + r1),
                Plane::from_coefficients(r3 - r1),
                Plane::from_coefficients(r3 + r2),
                Plane::from_coefficients(r3 - r2),
            ],
        }
    }

    /// Check if an AABB is inside or intersects the frustum
    pub fn intersects_aabb(&self, aabb: &AABB) -> bool {
        for plane in &self.planes {
            // Corner of the box furthest along the plane normal
            let mut p = aabb.min;
            if plane.normal.x >= 0.0 { p.x = aabb.max.x; }
            if plane.normal.y >= 0.0 { p.y = aabb.max.y; }
            if plane.normal.z >= 0.0 { p.z = aabb.max.z; }

            if plane.distance_to_point(p) < 0.0 {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4Ext;
    use nalgebra::Perspective3;

    fn looking_down_negative_z() -> Frustum {
        let projection = Perspective3::new(1.0, std::f32::consts::FRAC_PI_2, 0.1, 100.0).to_homogeneous();
        Frustum::from_matrix(&projection)
    }

    #[test]
    fn test_box_in_front_of_camera_is_visible() {
        let frustum = looking_down_negative_z();
        let aabb = AABB::from_center_extents(Vec3::new(0.0, 0.0, -10.0), Vec3::new(1.0, 1.0, 1.0));
        assert!(frustum.intersects_aabb(&aabb));
    }

    #[test]
    fn test_box_behind_camera_is_culled() {
        let frustum = looking_down_negative_z();
        let aabb = AABB::from_center_extents(Vec3::new(0.0, 0.0, 10.0), Vec3::new(1.0, 1.0, 1.0));
        assert!(!frustum.intersects_aabb(&aabb));
    }

    #[test]
    fn test_box_beyond_far_plane_is_culled() {
        let frustum = looking_down_negative_z();
        let aabb = AABB::from_center_extents(Vec3::new(0.0, 0.0, -150.0), Vec3::new(1.0, 1.0, 1.0));
        assert!(!frustum.intersects_aabb(&aabb));
    }

    #[test]
    fn test_box_far_to_the_side_is_culled() {
        let frustum = looking_down_negative_z();
        let aabb = AABB::from_center_extents(Vec3::new(50.0, 0.0, -10.0), Vec3::new(1.0, 1.0, 1.0));
        assert!(!frustum.intersects_aabb(&aabb));
    }

    #[test]
    fn test_view_matrix_moves_frustum() {
        let projection = Perspective3::new(1.0, std::f32::consts::FRAC_PI_2, 0.1, 100.0).to_homogeneous();
        // Camera at z = 20 looking down -z
        let view = Mat4::translation(0.0, 0.0, -20.0);
        let frustum = Frustum::from_matrix(&(projection * view));

        let aabb = AABB::from_center_extents(Vec3::new(0.0, 0.0, 10.0), Vec3::new(1.0, 1.0, 1.0));
        assert!(frustum.intersects_aabb(&aabb));
    }
}
