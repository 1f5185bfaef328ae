//! Layer, viewport and scene composition
//!
//! A display holds an ordered list of [`Layer`]s composited back to front.
//! Each layer holds viewports, and each viewport renders one [`Scene`].

use nalgebra::{Orthographic3, Perspective3};

use crate::foundation::math::{Mat4, Vec3};
use crate::scene::NodeId;

/// Projection used by a scene's view
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProjectionType {
    /// Perspective projection
    Perspective {
        /// Vertical field of view in radians
        fov_y: f32,
        /// Near clip distance
        near: f32,
        /// Far clip distance
        far: f32,
    },
    /// Orthographic projection sized by its visible height
    Orthographic {
        /// Visible height in world units; width follows the aspect ratio
        height: f32,
        /// Near clip distance
        near: f32,
        /// Far clip distance
        far: f32,
    },
    /// Caller-supplied projection matrix
    Custom(Mat4),
}

impl Default for ProjectionType {
    fn default() -> Self {
        Self::Perspective {
            fov_y: std::f32::consts::FRAC_PI_4,
            near: 0.1,
            far: 1000.0,
        }
    }
}

/// View settings of a scene
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewEnvironment {
    /// Projection kind and parameters
    pub projection: ProjectionType,
}

impl ViewEnvironment {
    /// Create a view environment with the given projection
    pub fn new(projection: ProjectionType) -> Self {
        Self { projection }
    }

    /// Projection matrix for a viewport aspect ratio
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        match self.projection {
            ProjectionType::Perspective { fov_y, near, far } => {
                Perspective3::new(aspect, fov_y, near, far).to_homogeneous()
            }
            ProjectionType::Orthographic { height, near, far } => {
                let half_height = height * 0.5;
                let half_width = half_height * aspect;
                Orthographic3::new(-half_width, half_width, -half_height, half_height, near, far).to_homogeneous()
            }
            ProjectionType::Custom(matrix) => matrix,
        }
    }
}

/// Linear fog applied to a viewport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fog {
    /// Fog colour
    pub color: Vec3,
    /// Distance at which geometry is fully fogged
    pub visibility_range: f32,
}

/// Root node plus the active environment nodes rendered together
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    /// Root of the rendered subtree
    pub root: NodeId,
    /// Viewpoint node; identity view when unset
    pub active_viewpoint: Option<NodeId>,
    /// Background node drawn before the scene
    pub active_background: Option<NodeId>,
    /// Active fog
    pub fog: Option<Fog>,
    /// Projection settings
    pub view_environment: ViewEnvironment,
}

impl Scene {
    /// Create a scene with default perspective projection
    pub fn new(root: NodeId) -> Self {
        Self {
            root,
            active_viewpoint: None,
            active_background: None,
            fog: None,
            view_environment: ViewEnvironment::default(),
        }
    }

    /// Set the active viewpoint
    pub fn with_viewpoint(mut self, viewpoint: NodeId) -> Self {
        self.active_viewpoint = Some(viewpoint);
        self
    }

    /// Set the active background
    pub fn with_background(mut self, background: NodeId) -> Self {
        self.active_background = Some(background);
        self
    }

    /// Set the active fog
    pub fn with_fog(mut self, fog: Fog) -> Self {
        self.fog = Some(fog);
        self
    }

    /// Set the projection
    pub fn with_projection(mut self, projection: ProjectionType) -> Self {
        self.view_environment.projection = projection;
        self
    }

    /// Every node the scene keeps live
    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::once(self.root)
            .chain(self.active_viewpoint)
            .chain(self.active_background)
    }
}

/// Rectangular region of the output rendering one scene
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    /// Left edge in pixels
    pub x: u32,
    /// Bottom edge in pixels
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Scene rendered into the viewport
    pub scene: Scene,
}

impl Viewport {
    /// Create a viewport
    pub fn new(x: u32, y: u32, width: u32, height: u32, scene: Scene) -> Self {
        Self { x, y, width, height, scene }
    }

    /// Width over height; 1.0 for degenerate viewports
    pub fn aspect_ratio(&self) -> f32 {
        if self.width == 0 || self.height == 0 {
            return 1.0;
        }
        self.width as f32 / self.height as f32
    }
}

/// Ordered group of viewports composited as one layer
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Viewports in draw order
    pub viewports: Vec<Viewport>,
    /// Disabled layers are skipped by the cull stage
    pub enabled: bool,
}

impl Layer {
    /// Create an enabled layer
    pub fn new(viewports: Vec<Viewport>) -> Self {
        Self { viewports, enabled: true }
    }

    /// Layer holding a single viewport
    pub fn single(viewport: Viewport) -> Self {
        Self::new(vec![viewport])
    }

    /// Every node the layer keeps live
    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.viewports.iter().flat_map(|viewport| viewport.scene.roots())
    }
}

/// Live roots for an ordered layer list
pub(crate) fn collect_roots(layers: &[Layer]) -> Vec<NodeId> {
    layers.iter().filter(|layer| layer.enabled).flat_map(Layer::roots).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{NodeKind, SceneGraph};
    use approx::assert_relative_eq;

    #[test]
    fn test_orthographic_width_follows_aspect() {
        let view = ViewEnvironment::new(ProjectionType::Orthographic { height: 2.0, near: 0.1, far: 10.0 });
        let projection = view.projection_matrix(2.0);

        // x spans [-2, 2], y spans [-1, 1]
        assert_relative_eq!(projection.m11, 0.5);
        assert_relative_eq!(projection.m22, 1.0);
    }

    #[test]
    fn test_custom_projection_passes_through() {
        let matrix = Mat4::new_scaling(3.0);
        let view = ViewEnvironment::new(ProjectionType::Custom(matrix));
        assert_eq!(view.projection_matrix(1.5), matrix);
    }

    #[test]
    fn test_degenerate_viewport_aspect() {
        let mut graph = SceneGraph::new();
        let root = graph.create_node(NodeKind::Group);
        let viewport = Viewport::new(0, 0, 0, 100, Scene::new(root));
        assert_relative_eq!(viewport.aspect_ratio(), 1.0);
    }

    #[test]
    fn test_disabled_layers_contribute_no_roots() {
        let mut graph = SceneGraph::new();
        let root = graph.create_node(NodeKind::Group);
        let viewpoint = graph.create_node(NodeKind::Viewpoint);
        let scene = Scene::new(root).with_viewpoint(viewpoint);

        let enabled = Layer::single(Viewport::new(0, 0, 640, 480, scene.clone()));
        let mut disabled = Layer::single(Viewport::new(0, 0, 640, 480, scene));
        disabled.enabled = false;

        assert_eq!(collect_roots(&[enabled, disabled]), vec![root, viewpoint]);
    }
}
