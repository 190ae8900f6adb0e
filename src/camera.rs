//! Off-screen baking cameras.
//!
//! The simulation's bake call needs a camera to orient billboards and
//! stretched particles. These cameras never render; one is created lazily for
//! each UI surface and reused for every source drawn on it.

use std::collections::HashMap;

use glam::{Quat, Vec3};

use crate::host::SurfaceId;

/// Orthographic camera handed to the simulation's bake calls.
#[derive(Debug, Clone)]
pub struct BakingCamera {
    /// Surface this camera bakes for.
    pub surface: SurfaceId,
    pub position: Vec3,
    pub rotation: Quat,
    /// Half-height of the orthographic view volume.
    pub orthographic_size: f32,
    pub near: f32,
    pub far: f32,
}

impl BakingCamera {
    pub fn new(surface: SurfaceId) -> Self {
        Self {
            surface,
            // Far behind the canvas plane, looking down +Z.
            position: Vec3::new(0.0, 0.0, -1000.0),
            rotation: Quat::IDENTITY,
            orthographic_size: 10.0,
            near: 0.01,
            far: 2000.0,
        }
    }

    /// Screen-right axis in world space; billboards span this and [`up`](Self::up).
    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }
}

/// Lazily populated camera per surface.
#[derive(Debug, Default)]
pub struct BakingCameras {
    cameras: HashMap<SurfaceId, BakingCamera>,
}

impl BakingCameras {
    pub fn new() -> Self {
        Self::default()
    }

    /// Camera for `surface`, created on first use.
    pub fn get_or_create(&mut self, surface: SurfaceId) -> &BakingCamera {
        self.cameras.entry(surface).or_insert_with(|| {
            log::debug!("Creating baking camera for surface {:?}", surface);
            BakingCamera::new(surface)
        })
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn clear(&mut self) {
        self.cameras.clear();
    }
}
