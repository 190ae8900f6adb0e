//! Per-frame mesh baking.
//!
//! Each refresh the simulation's particles (and trails) are baked into scratch
//! meshes from the shared pool, then combined into the source's own mesh in
//! node-local space.

use glam::Mat4;

use crate::camera::BakingCameras;
use crate::error::{BakeLayer, RefreshError};
use crate::host::{ParticleRenderer, ParticleSimulation, RenderMode, SurfaceId};
use crate::mesh::Mesh;
use crate::scratch_pool::ScratchMeshPool;

/// Material slot for particle geometry.
pub const PARTICLE_SLOT: usize = 0;
/// Material slot for trail geometry.
pub const TRAIL_SLOT: usize = 1;

/// Summary of one bake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BakeStats {
    pub particles_baked: bool,
    pub trails_baked: bool,
    pub vertex_count: usize,
}

/// Whether the renderer's main geometry can be baked safely.
pub fn can_bake_particles(renderer: &dyn ParticleRenderer) -> bool {
    match renderer.render_mode() {
        // Mesh mode with no mesh assigned crashes the simulation's bake.
        RenderMode::Mesh => renderer.has_mesh(),
        RenderMode::None => false,
        _ => true,
    }
}

/// Bakes simulations into source meshes through the shared scratch pool.
#[derive(Debug)]
pub struct MeshBaker {
    pool: ScratchMeshPool,
    cameras: BakingCameras,
}

impl MeshBaker {
    pub fn new(pool: ScratchMeshPool) -> Self {
        Self {
            pool,
            cameras: BakingCameras::new(),
        }
    }

    pub fn pool(&self) -> &ScratchMeshPool {
        &self.pool
    }

    pub fn cameras(&self) -> &BakingCameras {
        &self.cameras
    }

    pub fn cameras_mut(&mut self) -> &mut BakingCameras {
        &mut self.cameras
    }

    /// Bake the current geometry of one simulation into `target`.
    ///
    /// `target` is always cleared; it stays empty when there are no particles.
    pub fn bake(
        &mut self,
        simulation: &dyn ParticleSimulation,
        renderer: &mut dyn ParticleRenderer,
        surface: SurfaceId,
        matrix: &Mat4,
        target: &mut Mesh,
    ) -> Result<BakeStats, RefreshError> {
        let mut pass = self.pool.begin_pass().ok_or(RefreshError::PoolUnavailable)?;
        target.clear();

        let mut stats = BakeStats::default();
        if simulation.particle_count() == 0 {
            return Ok(stats);
        }

        let camera = self.cameras.get_or_create(surface);

        if can_bake_particles(renderer) {
            let scratch = pass.checkout(PARTICLE_SLOT);
            if let Err(source) = renderer.bake_mesh(scratch, camera, true) {
                pass.discard();
                return Err(RefreshError::Bake {
                    layer: BakeLayer::Particles,
                    source,
                });
            }
        }

        if simulation.trails_enabled() {
            let scratch = pass.checkout(TRAIL_SLOT);
            if let Err(source) = renderer.bake_trails_mesh(scratch, camera, true) {
                pass.discard();
                return Err(RefreshError::Bake {
                    layer: BakeLayer::Trails,
                    source,
                });
            }
        }

        let occupancy = pass.occupancy();
        stats.particles_baked = occupancy.contains(PARTICLE_SLOT);
        stats.trails_baked = occupancy.contains(TRAIL_SLOT);
        if pass.checked_out() == 0 {
            return Ok(stats);
        }

        pass.combine_into(target, matrix);
        stats.vertex_count = target.vertex_count();
        Ok(stats)
    }
}
