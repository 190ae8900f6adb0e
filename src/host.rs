//! Interfaces to the host UI system and particle simulation.
//!
//! The crate never owns a scene, a simulation or a GPU device. Everything it
//! needs from the outside world goes through these traits, which the host
//! implements on top of its own objects.

use glam::{Mat4, Quat, Vec3};

use crate::camera::BakingCamera;
use crate::material::{MaterialId, PropertyBlock, TextureId};
use crate::mesh::Mesh;
use crate::transform::SimulationSpace;

/// Identifies a UI rendering surface (a root canvas).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

/// How the simulation's renderer draws particles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Billboard,
    Stretch,
    HorizontalBillboard,
    VerticalBillboard,
    Mesh,
    None,
}

/// The particle simulation driving a source.
pub trait ParticleSimulation {
    /// Number of live particles this frame.
    fn particle_count(&self) -> usize;

    fn simulation_space(&self) -> SimulationSpace;

    /// World position of the custom simulation-space node, if one is assigned.
    fn custom_space_origin(&self) -> Option<Vec3> {
        None
    }

    fn trails_enabled(&self) -> bool {
        false
    }

    /// Whether texture-sheet animation runs in sprite mode.
    fn sprites_mode(&self) -> bool {
        false
    }

    /// Texture of the first sprite when running in sprite mode.
    fn sprite_texture(&self) -> Option<TextureId> {
        None
    }
}

/// The simulation's own renderer, used here only to bake geometry.
pub trait ParticleRenderer {
    fn render_mode(&self) -> RenderMode;

    /// Whether a mesh is assigned for [`RenderMode::Mesh`].
    fn has_mesh(&self) -> bool {
        false
    }

    fn shared_material(&self) -> Option<MaterialId>;

    fn trail_material(&self) -> Option<MaterialId> {
        None
    }

    /// Bake the particles' current geometry into `target`.
    fn bake_mesh(&mut self, target: &mut Mesh, camera: &BakingCamera, apply_transform: bool) -> anyhow::Result<()>;

    /// Bake the trails' current geometry into `target`.
    fn bake_trails_mesh(&mut self, target: &mut Mesh, camera: &BakingCamera, apply_transform: bool) -> anyhow::Result<()>;

    /// Copy animated material overrides into `block`.
    fn fill_property_block(&self, _block: &mut PropertyBlock) {}

    /// The native renderer is switched off while a UI source draws for it.
    fn set_enabled(&mut self, _enabled: bool) {}
}

/// Rectangle-transform node hosting a particle source.
pub trait UiNode {
    fn local_scale(&self) -> Vec3;

    fn set_local_scale(&mut self, scale: Vec3);

    fn world_rotation(&self) -> Quat;

    fn lossy_scale(&self) -> Vec3;

    fn world_to_local(&self) -> Mat4;

    /// Surface the node is drawn on; `None` when detached.
    fn surface(&self) -> Option<SurfaceId>;

    /// Local scale of the root canvas, `None` when detached.
    fn root_canvas_scale(&self) -> Option<Vec3>;

    fn is_maskable(&self) -> bool {
        true
    }

    /// Number of enclosing masks up to the nearest sort-override canvas.
    fn stencil_depth(&self) -> u32 {
        0
    }

    /// Whether the node itself carries an enabled mask.
    fn has_active_mask(&self) -> bool {
        false
    }

    /// Whether another particle source sits above this node.
    fn has_particle_ancestor(&self) -> bool {
        false
    }
}

/// Canvas renderer that draws the baked mesh with per-slot materials.
pub trait CanvasRenderer {
    fn set_mesh(&mut self, mesh: &Mesh);

    fn material_count(&self) -> usize;

    fn set_material_count(&mut self, count: usize);

    fn material(&self, slot: usize) -> Option<MaterialId>;

    fn set_material(&mut self, material: Option<MaterialId>, slot: usize);
}
