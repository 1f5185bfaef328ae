//! Bounding volumes
//!
//! Bounds are axis-aligned boxes with a distinguished empty value. A node
//! without geometry reports [`Bounds::Null`], never a zero-sized box at the
//! origin, so that unions are not dragged towards the origin by empty
//! subtrees.

use crate::foundation::math::{Mat4, Point3, Vec3};

/// Axis-Aligned Bounding Box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AABB {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl AABB {
    /// Create a new AABB from two corners, in any order
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.inf(&b),
            max: a.sup(&b),
        }
    }

    /// Create an AABB centered at a point with given extents
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the extents (half-size) of the AABB
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// The eight corner points
    pub fn corners(&self) -> [Vec3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ]
    }

    /// Check if this AABB contains a point
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x && point.x <= self.max.x &&
        point.y >= self.min.y && point.y <= self.max.y &&
        point.z >= self.min.z && point.z <= self.max.z
    }

    /// Check if this AABB intersects another AABB
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Smallest box containing both boxes
    pub fn merged(&self, other: &Self) -> Self {
        Self {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    /// Box enclosing this box after an affine transform
    ///
    /// All eight corners are transformed, so rotations grow the box rather
    /// than clipping it.
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let corners = self.corners();
        let first = matrix.transform_point(&Point3::from(corners[0])).coords;
        let (min, max) = corners[1..].iter().fold((first, first), |(min, max), corner| {
            let p = matrix.transform_point(&Point3::from(*corner)).coords;
            (min.inf(&p), max.sup(&p))
        });
        Self { min, max }
    }
}

/// Bounding volume of a node or subtree
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Bounds {
    /// Nothing to bound
    #[default]
    Null,
    /// Axis-aligned box
    Box(AABB),
}

impl Bounds {
    /// Bounds of a box spanning two corners
    pub fn from_corners(a: Vec3, b: Vec3) -> Self {
        Self::Box(AABB::new(a, b))
    }

    /// Whether this is the null bounds
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The box, if any
    pub fn aabb(&self) -> Option<&AABB> {
        match self {
            Self::Null => None,
            Self::Box(aabb) => Some(aabb),
        }
    }

    /// Union of two bounds; null is the identity element
    pub fn union(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Null, b) => *b,
            (a, Self::Null) => *a,
            (Self::Box(a), Self::Box(b)) => Self::Box(a.merged(b)),
        }
    }

    /// Bounds after an affine transform; null stays null
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        match self {
            Self::Null => Self::Null,
            Self::Box(aabb) => Self::Box(aabb.transformed(matrix)),
        }
    }

    /// Center of the box, if any
    pub fn center(&self) -> Option<Vec3> {
        self.aabb().map(AABB::center)
    }
}

impl From<AABB> for Bounds {
    fn from(aabb: AABB) -> Self {
        Self::Box(aabb)
    }
}

impl FromIterator<Self> for Bounds {
    fn from_iter<I: IntoIterator<Item = Self>>(iter: I) -> Self {
        iter.into_iter().fold(Self::Null, |acc, b| acc.union(&b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4Ext;
    use approx::assert_relative_eq;

    #[test]
    fn test_aabb_contains_point() {
        let aabb = AABB::new(
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, 1.0, 1.0),
        );

        assert!(aabb.contains_point(Vec3::zeros()));
        assert!(aabb.contains_point(Vec3::new(0.5, 0.5, 0.5)));
        assert!(!aabb.contains_point(Vec3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn test_aabb_intersects() {
        let aabb1 = AABB::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 2.0, 2.0));
        let aabb2 = AABB::new(Vec3::new(1.0, 1.0, 1.0), Vec3::new(3.0, 3.0, 3.0));
        let aabb3 = AABB::new(Vec3::new(5.0, 5.0, 5.0), Vec3::new(7.0, 7.0, 7.0));

        assert!(aabb1.intersects(&aabb2));
        assert!(!aabb1.intersects(&aabb3));
    }

    #[test]
    fn test_null_is_union_identity() {
        let b = Bounds::from_corners(Vec3::new(-2.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 1.0));

        assert_eq!(Bounds::Null.union(&b), b);
        assert_eq!(b.union(&Bounds::Null), b);
        assert!(Bounds::Null.union(&Bounds::Null).is_null());
    }

    #[test]
    fn test_union_of_sibling_boxes() {
        let union: Bounds = [
            Bounds::from_corners(Vec3::new(-2.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 1.0)),
            Bounds::from_corners(Vec3::new(0.0, 0.0, 1.0), Vec3::new(2.0, 2.0, 1.0)),
        ]
        .into_iter()
        .collect();

        assert_eq!(union, Bounds::from_corners(Vec3::new(-2.0, 0.0, 0.0), Vec3::new(2.0, 2.0, 1.0)));
    }

    #[test]
    fn test_transformed_box_covers_rotated_corners() {
        let aabb = AABB::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        let rotated = aabb.transformed(&Mat4::rotation_y(std::f32::consts::FRAC_PI_4));

        let diagonal = std::f32::consts::SQRT_2;
        assert_relative_eq!(rotated.max.x, diagonal, epsilon = 1e-5);
        assert_relative_eq!(rotated.max.y, 1.0, epsilon = 1e-5);
        assert_relative_eq!(rotated.min.z, -diagonal, epsilon = 1e-5);
    }

    #[test]
    fn test_null_bounds_ignore_transform() {
        assert!(Bounds::Null.transformed(&Mat4::translation(1.0, 2.0, 3.0)).is_null());
    }
}
