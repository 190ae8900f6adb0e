//! Per-frame refresh of all active particle sources.
//!
//! The host calls [`RefreshDriver::refresh_all`] once per frame from its
//! render-preparation phase, before the canvas is composited. Sources are
//! refreshed in registration order; a failure in one source is recorded in the
//! [`RefreshReport`] and does not stop the others.

use serde::{Deserialize, Serialize};

use crate::baker::{BakeStats, MeshBaker};
use crate::color::ColorSpace;
use crate::error::RefreshError;
use crate::material::{push_animatable_properties, rebuild_materials, MaterialStore, PropertyBlock};
use crate::profiling::{should_log_summary, timed};
use crate::scratch_pool::ScratchMeshPool;
use crate::source::{ParticleSource, SkipReason, SourceId};
use crate::transform::select_transform;

/// Frame-wide settings for a refresh pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameContext {
    /// Colour space the host renders in.
    #[serde(default)]
    pub color_space: ColorSpace,
    /// False while editing a static preview; animated material properties are
    /// only pushed while playing.
    #[serde(default = "default_playing")]
    pub playing: bool,
}

fn default_playing() -> bool {
    true
}

impl Default for FrameContext {
    fn default() -> Self {
        Self {
            color_space: ColorSpace::default(),
            playing: default_playing(),
        }
    }
}

/// Successful outcome of refreshing one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    Baked {
        stats: BakeStats,
        /// Canvas materials were rebuilt this refresh.
        materials_rebuilt: bool,
        /// The node's local scale was written this refresh.
        scale_written: bool,
    },
    Skipped(SkipReason),
}

/// Per-source results of the last refresh pass, in refresh order.
#[derive(Debug, Default)]
pub struct RefreshReport {
    entries: Vec<(SourceId, Result<RefreshStatus, RefreshError>)>,
}

impl RefreshReport {
    pub fn entries(&self) -> &[(SourceId, Result<RefreshStatus, RefreshError>)] {
        &self.entries
    }

    pub fn get(&self, id: SourceId) -> Option<&Result<RefreshStatus, RefreshError>> {
        self.entries.iter().find(|(e, _)| *e == id).map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = (SourceId, &RefreshError)> {
        self.entries
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| (*id, e)))
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Total vertices baked across all sources.
    pub fn total_vertices(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|(_, r)| match r {
                Ok(RefreshStatus::Baked { stats, .. }) => Some(stats.vertex_count),
                _ => None,
            })
            .sum()
    }

    /// Log every failed source with its full cause chain.
    pub fn log_failures(&self) {
        for (id, error) in self.failures() {
            log::error!("Particle source {:?} failed to refresh: {}", id, error_chain(error));
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// `error` followed by each of its causes, separated by `": "`.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut cause = error.source();
    while let Some(inner) = cause {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        cause = inner.source();
    }
    message
}

/// Owns the active particle sources of one rendering context.
pub struct RefreshDriver {
    sources: Vec<ParticleSource>,
    baker: MeshBaker,
    materials: Box<dyn MaterialStore>,
    /// Reused every frame for animatable properties.
    property_block: PropertyBlock,
    report: RefreshReport,
}

impl RefreshDriver {
    pub fn new(materials: Box<dyn MaterialStore>) -> Self {
        Self::with_pool(ScratchMeshPool::new(), materials)
    }

    /// Create a driver sharing an existing scratch pool.
    pub fn with_pool(pool: ScratchMeshPool, materials: Box<dyn MaterialStore>) -> Self {
        Self {
            sources: Vec::new(),
            baker: MeshBaker::new(pool),
            materials,
            property_block: PropertyBlock::new(),
            report: RefreshReport::default(),
        }
    }

    /// Activate `source` and append it to the refresh order.
    ///
    /// A source already registered under the same id is removed first.
    pub fn register(&mut self, mut source: ParticleSource) -> SourceId {
        let id = source.id();
        if self.unregister(id).is_some() {
            log::debug!("Particle source {:?} re-registered", id);
        }

        source.activate(self.baker.pool().lease());
        self.sources.push(source);
        log::debug!("Registered particle source {:?} ({} active)", id, self.sources.len());
        id
    }

    /// Deactivate and hand back the source registered under `id`.
    pub fn unregister(&mut self, id: SourceId) -> Option<ParticleSource> {
        let index = self.sources.iter().position(|s| s.id() == id)?;
        let mut source = self.sources.remove(index);
        source.deactivate(&mut *self.materials);

        if self.sources.is_empty() {
            self.baker.cameras_mut().clear();
        }
        log::debug!("Unregistered particle source {:?} ({} active)", id, self.sources.len());
        Some(source)
    }

    /// Deactivate every source.
    pub fn clear(&mut self) {
        while let Some(id) = self.sources.last().map(ParticleSource::id) {
            self.unregister(id);
        }
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.sources.iter().any(|s| s.id() == id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn source(&self, id: SourceId) -> Option<&ParticleSource> {
        self.sources.iter().find(|s| s.id() == id)
    }

    pub fn source_mut(&mut self, id: SourceId) -> Option<&mut ParticleSource> {
        self.sources.iter_mut().find(|s| s.id() == id)
    }

    /// Active sources in refresh order.
    pub fn sources(&self) -> impl Iterator<Item = &ParticleSource> {
        self.sources.iter()
    }

    pub fn pool(&self) -> &ScratchMeshPool {
        self.baker.pool()
    }

    pub fn baker(&self) -> &MeshBaker {
        &self.baker
    }

    /// Results of the most recent [`refresh_all`](Self::refresh_all).
    pub fn report(&self) -> &RefreshReport {
        &self.report
    }

    /// Refresh every active source once. Call once per frame before the UI is
    /// composited.
    pub fn refresh_all(&mut self, frame: &FrameContext) -> &RefreshReport {
        self.report.clear();
        for source in &mut self.sources {
            let result = refresh_source(
                source,
                &mut self.baker,
                &mut *self.materials,
                &mut self.property_block,
                frame,
            );
            self.report.entries.push((source.id(), result));
        }

        if should_log_summary() {
            log::info!(
                "[PERF] refreshed {} sources: {} vertices, {} failures",
                self.report.len(),
                self.report.total_vertices(),
                self.report.failure_count()
            );
        }
        &self.report
    }
}

impl Drop for RefreshDriver {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Refresh one source: scale, materials, transform, bake, upload, properties.
fn refresh_source(
    source: &mut ParticleSource,
    baker: &mut MeshBaker,
    materials: &mut dyn MaterialStore,
    block: &mut PropertyBlock,
    frame: &FrameContext,
) -> Result<RefreshStatus, RefreshError> {
    let scale_written = timed("Modify scale", || source.reconcile_scale());

    if let Some(reason) = source.invalid_reason() {
        return Ok(RefreshStatus::Skipped(reason));
    }

    timed("Check materials", || source.check_materials());
    let pose = source.node_pose();
    let has_animatable_properties = !source.config.animatable_properties.is_empty();

    let ParticleSource {
        config,
        node,
        canvas,
        simulation,
        renderer,
        baked_mesh,
        masks,
        material_dirty,
        ..
    } = source;
    let (Some(simulation), Some(renderer)) = (simulation.as_deref(), renderer.as_deref_mut()) else {
        return Ok(RefreshStatus::Skipped(SkipReason::MissingSimulation));
    };
    let Some(surface) = node.surface() else {
        return Ok(RefreshStatus::Skipped(SkipReason::Detached));
    };
    let Some(mesh) = baked_mesh.as_mut() else {
        return Ok(RefreshStatus::Skipped(SkipReason::Inactive));
    };

    let materials_rebuilt = *material_dirty;
    if materials_rebuilt {
        timed("Rebuild materials", || {
            rebuild_materials(
                simulation,
                &*renderer,
                &**node,
                &mut **canvas,
                &mut *masks,
                has_animatable_properties,
                &mut *materials,
            )
        });
        *material_dirty = false;
        log::debug!("Rebuilt canvas materials");
    }

    let matrix = timed("Make matrix", || {
        select_transform(simulation.simulation_space(), &pose, simulation.custom_space_origin())
    });

    let stats = timed("Bake mesh", || baker.bake(simulation, &mut *renderer, surface, &matrix, &mut *mesh))?;

    if frame.color_space == ColorSpace::Linear {
        timed("Modify color space to linear", || mesh.convert_colors_to_linear());
    }

    timed("Set mesh to canvas", || canvas.set_mesh(mesh));

    if frame.playing {
        timed("Update animatable material properties", || {
            push_animatable_properties(
                &config.animatable_properties,
                &*renderer,
                &**canvas,
                &mut *block,
                &mut *materials,
            )
        });
    }

    Ok(RefreshStatus::Baked {
        stats,
        materials_rebuilt,
        scale_written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BakeLayer;

    #[test]
    fn test_error_chain_lists_host_cause_once() {
        let error = RefreshError::Bake {
            layer: BakeLayer::Trails,
            source: anyhow::anyhow!("trail module disabled"),
        };
        assert_eq!(error.to_string(), "failed to bake trail geometry");
        assert_eq!(error_chain(&error), "failed to bake trail geometry: trail module disabled");
    }
}
