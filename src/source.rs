//! Particle sources attached to UI nodes.
//!
//! A [`ParticleSource`] ties one particle simulation to one UI node and owns
//! the mesh its geometry is baked into. Sources are inert until registered
//! with a [`RefreshDriver`](crate::driver::RefreshDriver), which activates them
//! (baked mesh, pool lease, initial material build) and deactivates them on
//! removal.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::host::{CanvasRenderer, ParticleRenderer, ParticleSimulation, UiNode};
use crate::material::{AnimatableProperty, MaskMaterials, MaterialReconciler, MaterialStore};
use crate::math::{approximately, safe_recip3};
use crate::mesh::Mesh;
use crate::scratch_pool::PoolLease;
use crate::transform::NodePose;

/// Unique identifier of a particle source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub u64);

fn default_scale3d() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

/// Per-source configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    /// Keep the effect's on-screen size independent of root canvas scaling.
    #[serde(default)]
    pub ignore_canvas_scaler: bool,

    /// Ignore the parent source's scale when migrating a legacy scale.
    #[serde(default)]
    pub ignore_parent: bool,

    /// Effect scale per axis, written to the node's local scale.
    #[serde(default = "default_scale3d")]
    pub scale3d: [f32; 3],

    /// Uniform scale from older configurations. Migrated into `scale3d` on
    /// activation when non-zero.
    #[serde(default, rename = "scale")]
    pub legacy_scale: f32,

    /// Material properties copied from the simulation's renderer each frame.
    #[serde(default)]
    pub animatable_properties: Vec<AnimatableProperty>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            ignore_canvas_scaler: false,
            ignore_parent: false,
            scale3d: default_scale3d(),
            legacy_scale: 0.0,
            animatable_properties: Vec::new(),
        }
    }
}

impl SourceConfig {
    /// Builder: uniform scale.
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale3d = [scale; 3];
        self
    }

    /// Builder: ignore root canvas scaling.
    pub fn with_ignore_canvas_scaler(mut self, ignore: bool) -> Self {
        self.ignore_canvas_scaler = ignore;
        self
    }

    /// Builder: add an animatable property binding.
    pub fn with_property(mut self, property: AnimatableProperty) -> Self {
        self.animatable_properties.push(property);
        self
    }

    pub fn scale(&self) -> Vec3 {
        Vec3::from_array(self.scale3d)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.scale3d.iter().all(|v| v.is_finite()) || !self.legacy_scale.is_finite() {
            return Err(ConfigError::NonFiniteScale(self.scale3d));
        }
        for (index, property) in self.animatable_properties.iter().enumerate() {
            if property.name.trim().is_empty() {
                return Err(ConfigError::EmptyPropertyName { index });
            }
        }
        Ok(())
    }
}

/// Why a refresh did nothing for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingSimulation,
    MissingRenderer,
    Detached,
    /// Not registered with a driver.
    Inactive,
}

/// Scale to write on the node: the intended scale, optionally divided by the
/// root canvas scale.
pub fn modified_scale(intent: Vec3, root_canvas_scale: Option<Vec3>, ignore_canvas_scaler: bool) -> Vec3 {
    match root_canvas_scale {
        Some(root) if ignore_canvas_scaler => intent * safe_recip3(root),
        _ => intent,
    }
}

/// One UI-hosted particle effect.
pub struct ParticleSource {
    id: SourceId,
    pub config: SourceConfig,
    pub(crate) node: Box<dyn UiNode>,
    pub(crate) canvas: Box<dyn CanvasRenderer>,
    pub(crate) simulation: Option<Box<dyn ParticleSimulation>>,
    pub(crate) renderer: Option<Box<dyn ParticleRenderer>>,
    /// Present only while active.
    pub(crate) baked_mesh: Option<Mesh>,
    pub(crate) masks: MaskMaterials,
    pub(crate) reconciler: MaterialReconciler,
    pub(crate) material_dirty: bool,
    lease: Option<PoolLease>,
}

impl std::fmt::Debug for ParticleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticleSource")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("active", &self.is_active())
            .field("material_dirty", &self.material_dirty)
            .finish_non_exhaustive()
    }
}

impl ParticleSource {
    pub fn new(
        id: SourceId,
        config: SourceConfig,
        node: Box<dyn UiNode>,
        canvas: Box<dyn CanvasRenderer>,
    ) -> Self {
        Self {
            id,
            config,
            node,
            canvas,
            simulation: None,
            renderer: None,
            baked_mesh: None,
            masks: MaskMaterials::new(),
            reconciler: MaterialReconciler::new(),
            material_dirty: false,
            lease: None,
        }
    }

    /// Builder: attach the particle simulation and its renderer.
    pub fn with_simulation(
        mut self,
        simulation: Box<dyn ParticleSimulation>,
        renderer: Box<dyn ParticleRenderer>,
    ) -> Self {
        self.simulation = Some(simulation);
        self.renderer = Some(renderer);
        self
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.baked_mesh.is_some()
    }

    /// The mesh baked during the last refresh, while active.
    pub fn baked_mesh(&self) -> Option<&Mesh> {
        self.baked_mesh.as_ref()
    }

    pub fn is_material_dirty(&self) -> bool {
        self.material_dirty
    }

    /// Request a material rebuild on the next refresh.
    pub fn set_material_dirty(&mut self) {
        self.material_dirty = true;
    }

    /// Reason the source cannot be refreshed, if any.
    pub fn invalid_reason(&self) -> Option<SkipReason> {
        if self.simulation.is_none() {
            Some(SkipReason::MissingSimulation)
        } else if self.renderer.is_none() {
            Some(SkipReason::MissingRenderer)
        } else if self.node.surface().is_none() {
            Some(SkipReason::Detached)
        } else {
            None
        }
    }

    pub fn is_valid(&self) -> bool {
        self.invalid_reason().is_none()
    }

    pub(crate) fn node_pose(&self) -> NodePose {
        NodePose {
            rotation: self.node.world_rotation(),
            lossy_scale: self.node.lossy_scale(),
            world_to_local: self.node.world_to_local(),
        }
    }

    /// Write the effect scale onto the node unless it is already there.
    ///
    /// Returns whether the node was written.
    pub fn reconcile_scale(&mut self) -> bool {
        let target = modified_scale(
            self.config.scale(),
            self.node.root_canvas_scale(),
            self.config.ignore_canvas_scaler,
        );

        if approximately((self.node.local_scale() - target).length_squared(), 0.0) {
            return false;
        }
        self.node.set_local_scale(target);
        true
    }

    /// Fold a legacy uniform scale into `scale3d`.
    fn migrate_legacy_scale(&mut self) {
        if approximately(self.config.legacy_scale, 0.0) {
            return;
        }

        let local = self.node.local_scale();
        let scale = if self.config.ignore_parent || !self.node.has_particle_ancestor() {
            local * self.config.legacy_scale
        } else {
            local
        };
        log::debug!(
            "Source {:?}: migrated legacy scale {} to {:?}",
            self.id,
            self.config.legacy_scale,
            scale
        );
        self.config.scale3d = scale.to_array();
        self.config.legacy_scale = 0.0;
    }

    /// Compare the renderer's materials with the last observation and mark the
    /// materials dirty on change. Returns whether a change was seen.
    pub(crate) fn check_materials(&mut self) -> bool {
        let (Some(simulation), Some(renderer)) = (self.simulation.as_deref(), self.renderer.as_deref()) else {
            return false;
        };
        let changed = self.reconciler.observe(
            renderer.shared_material(),
            renderer.trail_material(),
            simulation.sprites_mode(),
        );
        if changed {
            self.material_dirty = true;
        }
        changed
    }

    pub(crate) fn activate(&mut self, lease: PoolLease) {
        self.migrate_legacy_scale();

        if let Some(renderer) = self.renderer.as_deref_mut() {
            renderer.set_enabled(false);
        }
        self.check_materials();
        self.material_dirty = true;

        self.baked_mesh = Some(Mesh::new());
        self.lease = Some(lease);
    }

    pub(crate) fn deactivate(&mut self, store: &mut dyn MaterialStore) {
        self.baked_mesh = None;
        self.lease = None;
        self.check_materials();
        self.masks.release_all(store);
    }
}
