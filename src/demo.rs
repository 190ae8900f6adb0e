//! Headless host for exercising the refresh pipeline without an engine.
//!
//! A [`DemoScene`] is loaded from JSON and turned into particle sources whose
//! simulation is a small deterministic quad emitter. The node, canvas and
//! material store are plain in-memory implementations that record what the
//! driver does to them.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{Context, Result};
use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::camera::BakingCamera;
use crate::driver::FrameContext;
use crate::host::{CanvasRenderer, ParticleRenderer, ParticleSimulation, RenderMode, SurfaceId, UiNode};
use crate::material::{MaterialId, MaterialStore, PropertyBlock, PropertyValue, StencilKey, TextureId};
use crate::mesh::{Mesh, UiVertex};
use crate::source::{ParticleSource, SourceConfig, SourceId};
use crate::transform::SimulationSpace;

fn default_particles() -> usize {
    32
}

fn default_surface() -> u64 {
    1
}

fn default_ones() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

fn default_material() -> u64 {
    1
}

fn default_space() -> SimulationSpace {
    SimulationSpace::Local
}

fn default_particle_size() -> f32 {
    0.5
}

/// One particle effect in a demo scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoSource {
    pub id: SourceId,
    #[serde(default)]
    pub config: SourceConfig,
    /// Maximum live particles.
    #[serde(default = "default_particles")]
    pub particles: usize,
    #[serde(default = "default_space")]
    pub space: SimulationSpace,
    #[serde(default)]
    pub trails: bool,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_particle_size")]
    pub particle_size: f32,
    #[serde(default = "default_surface")]
    pub surface: u64,
    /// Node position in world space.
    #[serde(default)]
    pub position: [f32; 3],
    /// Node rotation around Z, in degrees.
    #[serde(default)]
    pub rotation_degrees: f32,
    #[serde(default = "default_ones")]
    pub canvas_scale: [f32; 3],
    #[serde(default = "default_material")]
    pub material: u64,
    #[serde(default)]
    pub trail_material: Option<u64>,
    /// Number of enclosing masks.
    #[serde(default)]
    pub mask_depth: u32,
}

/// A scene file: frame settings plus the sources to simulate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoScene {
    #[serde(default)]
    pub frame: FrameContext,
    #[serde(default)]
    pub sources: Vec<DemoSource>,
}

impl DemoScene {
    pub fn from_json(json: &str) -> Result<Self> {
        let scene: DemoScene = serde_json::from_str(json).context("Failed to parse demo scene")?;
        for source in &scene.sources {
            source
                .config
                .validate()
                .with_context(|| format!("Invalid config for source {:?}", source.id))?;
        }
        Ok(scene)
    }
}

/// Live particle state shared between the simulation and renderer halves of
/// a [`SyntheticEmitter`].
#[derive(Debug)]
struct EmitterState {
    capacity: usize,
    space: SimulationSpace,
    trails: bool,
    size: f32,
    render_mode: RenderMode,
    material: Option<MaterialId>,
    trail_material: Option<MaterialId>,
    rng_state: u64,
    positions: Vec<Vec3>,
    previous: Vec<Vec3>,
    velocities: Vec<Vec3>,
    colors: Vec<[f32; 4]>,
    enabled: bool,
    fail_next_bake: bool,
}

impl EmitterState {
    fn next_f32(&mut self) -> f32 {
        if self.rng_state == 0 {
            self.rng_state = 0x5DEECE66D;
        }
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        (self.rng_state as f32) / (u64::MAX as f32)
    }

    fn spawn(&mut self) {
        let velocity = Vec3::new(self.next_f32() - 0.5, self.next_f32(), 0.0) * 4.0;
        let color = [self.next_f32(), self.next_f32(), self.next_f32(), 1.0];
        self.positions.push(Vec3::ZERO);
        self.previous.push(Vec3::ZERO);
        self.velocities.push(velocity);
        self.colors.push(color);
    }
}

/// Deterministic quad emitter standing in for a particle simulation.
///
/// Clones share state, so one clone can be boxed as the simulation and another
/// as its renderer while the harness keeps a third to advance time.
#[derive(Debug, Clone)]
pub struct SyntheticEmitter {
    state: Rc<RefCell<EmitterState>>,
}

impl SyntheticEmitter {
    pub fn new(capacity: usize, space: SimulationSpace, seed: u64) -> Self {
        Self {
            state: Rc::new(RefCell::new(EmitterState {
                capacity,
                space,
                trails: false,
                size: default_particle_size(),
                render_mode: RenderMode::Billboard,
                material: Some(MaterialId(default_material())),
                trail_material: None,
                rng_state: seed,
                positions: Vec::new(),
                previous: Vec::new(),
                velocities: Vec::new(),
                colors: Vec::new(),
                enabled: true,
                fail_next_bake: false,
            })),
        }
    }

    pub fn with_trails(self, trail_material: Option<MaterialId>) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.trails = true;
            state.trail_material = trail_material;
        }
        self
    }

    pub fn with_size(self, size: f32) -> Self {
        self.state.borrow_mut().size = size;
        self
    }

    pub fn with_render_mode(self, mode: RenderMode) -> Self {
        self.state.borrow_mut().render_mode = mode;
        self
    }

    pub fn set_material(&self, material: Option<MaterialId>) {
        self.state.borrow_mut().material = material;
    }

    /// Make the next particle bake return an error.
    pub fn fail_next_bake(&self) {
        self.state.borrow_mut().fail_next_bake = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.state.borrow().enabled
    }

    /// Advance every particle by `dt` seconds and emit one new particle until
    /// capacity is reached.
    pub fn step(&self, dt: f32) {
        let mut state = self.state.borrow_mut();
        let state = &mut *state;
        for ((position, previous), velocity) in state
            .positions
            .iter_mut()
            .zip(state.previous.iter_mut())
            .zip(state.velocities.iter())
        {
            *previous = *position;
            *position += *velocity * dt;
        }
        if state.positions.len() < state.capacity {
            state.spawn();
        }
    }

    /// Box clones of this emitter as a source's simulation and renderer.
    pub fn attach(&self, source: ParticleSource) -> ParticleSource {
        source.with_simulation(Box::new(self.clone()), Box::new(self.clone()))
    }
}

impl ParticleSimulation for SyntheticEmitter {
    fn particle_count(&self) -> usize {
        self.state.borrow().positions.len()
    }

    fn simulation_space(&self) -> SimulationSpace {
        self.state.borrow().space
    }

    fn trails_enabled(&self) -> bool {
        self.state.borrow().trails
    }
}

/// Append a camera-facing quad centred on `center` into sub-mesh 0.
fn push_quad(mesh: &mut Mesh, camera: &BakingCamera, center: Vec3, half: Vec3, color: [f32; 4]) {
    let right = camera.right() * half.x;
    let up = camera.up() * half.y;
    let base = mesh.vertex_count() as u32;
    let corners = [
        (center - right - up, [0.0, 0.0]),
        (center + right - up, [1.0, 0.0]),
        (center + right + up, [1.0, 1.0]),
        (center - right + up, [0.0, 1.0]),
    ];
    mesh.vertices_mut()
        .extend(corners.iter().map(|(p, uv)| UiVertex::new(p.to_array(), color, *uv)));
    mesh.indices_mut(0)
        .extend([base, base + 1, base + 2, base, base + 2, base + 3]);
}

impl ParticleRenderer for SyntheticEmitter {
    fn render_mode(&self) -> RenderMode {
        self.state.borrow().render_mode
    }

    fn shared_material(&self) -> Option<MaterialId> {
        self.state.borrow().material
    }

    fn trail_material(&self) -> Option<MaterialId> {
        self.state.borrow().trail_material
    }

    fn bake_mesh(&mut self, target: &mut Mesh, camera: &BakingCamera, _apply_transform: bool) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if std::mem::take(&mut state.fail_next_bake) {
            anyhow::bail!("synthetic bake failure");
        }
        let half = Vec3::splat(state.size * 0.5);
        for (position, color) in state.positions.iter().zip(&state.colors) {
            push_quad(target, camera, *position, half, *color);
        }
        Ok(())
    }

    fn bake_trails_mesh(&mut self, target: &mut Mesh, camera: &BakingCamera, _apply_transform: bool) -> Result<()> {
        let state = self.state.borrow();
        let width = state.size * 0.1;
        for ((position, previous), color) in state.positions.iter().zip(&state.previous).zip(&state.colors) {
            let center = (*position + *previous) * 0.5;
            let half = Vec3::new(width, (*position - *previous).length() * 0.5, 0.0);
            push_quad(target, camera, center, half, [color[0], color[1], color[2], 0.5]);
        }
        Ok(())
    }

    fn fill_property_block(&self, block: &mut PropertyBlock) {
        let state = self.state.borrow();
        block.set("_Alpha", PropertyValue::Float(state.positions.len() as f32 / state.capacity.max(1) as f32));
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.state.borrow_mut().enabled = enabled;
    }
}

/// UI node with a fixed placement on a root canvas.
#[derive(Debug, Clone)]
pub struct HeadlessNode {
    pub position: Vec3,
    pub rotation: Quat,
    pub local_scale: Vec3,
    /// `None` when the node is not under a canvas.
    pub canvas_scale: Option<Vec3>,
    pub surface: SurfaceId,
    pub stencil_depth: u32,
}

impl Default for HeadlessNode {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            local_scale: Vec3::ONE,
            canvas_scale: Some(Vec3::ONE),
            surface: SurfaceId(default_surface()),
            stencil_depth: 0,
        }
    }
}

impl HeadlessNode {
    pub fn local_to_world(&self) -> Mat4 {
        let canvas = Mat4::from_scale(self.canvas_scale.unwrap_or(Vec3::ONE));
        canvas * Mat4::from_scale_rotation_translation(self.local_scale, self.rotation, self.position)
    }
}

impl UiNode for HeadlessNode {
    fn local_scale(&self) -> Vec3 {
        self.local_scale
    }

    fn set_local_scale(&mut self, scale: Vec3) {
        self.local_scale = scale;
    }

    fn world_rotation(&self) -> Quat {
        self.rotation
    }

    fn lossy_scale(&self) -> Vec3 {
        self.canvas_scale.unwrap_or(Vec3::ONE) * self.local_scale
    }

    fn world_to_local(&self) -> Mat4 {
        self.local_to_world().inverse()
    }

    fn surface(&self) -> Option<SurfaceId> {
        self.canvas_scale.map(|_| self.surface)
    }

    fn root_canvas_scale(&self) -> Option<Vec3> {
        self.canvas_scale
    }

    fn stencil_depth(&self) -> u32 {
        self.stencil_depth
    }
}

/// What a [`HeadlessCanvas`] has received so far.
#[derive(Debug, Default, Clone)]
pub struct CanvasLog {
    pub uploads: usize,
    pub last_vertex_count: usize,
    pub last_triangle_count: usize,
    pub last_mesh: Mesh,
    pub materials: Vec<Option<MaterialId>>,
}

/// Canvas renderer that records uploads and material assignments.
#[derive(Debug, Clone, Default)]
pub struct HeadlessCanvas {
    log: Rc<RefCell<CanvasLog>>,
}

impl HeadlessCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the recorded state.
    pub fn log(&self) -> Rc<RefCell<CanvasLog>> {
        Rc::clone(&self.log)
    }
}

impl CanvasRenderer for HeadlessCanvas {
    fn set_mesh(&mut self, mesh: &Mesh) {
        let mut log = self.log.borrow_mut();
        log.uploads += 1;
        log.last_vertex_count = mesh.vertex_count();
        log.last_triangle_count = mesh.triangle_count();
        log.last_mesh.clone_from(mesh);
    }

    fn material_count(&self) -> usize {
        self.log.borrow().materials.len()
    }

    fn set_material_count(&mut self, count: usize) {
        self.log.borrow_mut().materials.resize(count, None);
    }

    fn material(&self, slot: usize) -> Option<MaterialId> {
        self.log.borrow().materials.get(slot).copied().flatten()
    }

    fn set_material(&mut self, material: Option<MaterialId>, slot: usize) {
        let mut log = self.log.borrow_mut();
        if slot < log.materials.len() {
            log.materials[slot] = material;
        }
    }
}

/// Bookkeeping of a [`HeadlessMaterials`] store.
#[derive(Debug, Default)]
pub struct MaterialLedger {
    next_id: u64,
    pub instances: usize,
    /// Live stencil variants with their reference counts.
    stencils: HashMap<(MaterialId, StencilKey), (MaterialId, usize)>,
    pub properties: HashMap<(MaterialId, String), PropertyValue>,
}

impl MaterialLedger {
    fn allocate(&mut self) -> MaterialId {
        self.next_id += 1;
        MaterialId(10_000 + self.next_id)
    }

    /// Number of distinct stencil variants still referenced.
    pub fn live_stencils(&self) -> usize {
        self.stencils.len()
    }

    pub fn property(&self, material: MaterialId, name: &str) -> Option<PropertyValue> {
        self.properties.get(&(material, name.to_string())).copied()
    }
}

/// In-memory material store with reference-counted stencil variants.
#[derive(Debug, Clone, Default)]
pub struct HeadlessMaterials {
    ledger: Rc<RefCell<MaterialLedger>>,
}

impl HeadlessMaterials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger(&self) -> Rc<RefCell<MaterialLedger>> {
        Rc::clone(&self.ledger)
    }
}

impl MaterialStore for HeadlessMaterials {
    fn instantiate(&mut self, _base: MaterialId, _texture: Option<TextureId>) -> MaterialId {
        let mut ledger = self.ledger.borrow_mut();
        ledger.instances += 1;
        ledger.allocate()
    }

    fn acquire_stencil(&mut self, base: MaterialId, key: StencilKey) -> MaterialId {
        let mut ledger = self.ledger.borrow_mut();
        if let Some((material, count)) = ledger.stencils.get_mut(&(base, key)) {
            *count += 1;
            return *material;
        }
        let material = ledger.allocate();
        ledger.stencils.insert((base, key), (material, 1));
        material
    }

    fn release_stencil(&mut self, material: MaterialId) {
        let mut ledger = self.ledger.borrow_mut();
        let Some(key) = ledger
            .stencils
            .iter()
            .find(|(_, (m, _))| *m == material)
            .map(|(k, _)| *k)
        else {
            log::warn!("Released unknown stencil material {:?}", material);
            return;
        };
        if let Some((_, count)) = ledger.stencils.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                ledger.stencils.remove(&key);
            }
        }
    }

    fn set_property(&mut self, material: MaterialId, name: &str, value: PropertyValue) {
        self.ledger.borrow_mut().properties.insert((material, name.to_string()), value);
    }
}

/// A source built from a [`DemoSource`] along with the handles the harness
/// keeps to drive and inspect it.
pub struct DemoInstance {
    pub id: SourceId,
    pub emitter: SyntheticEmitter,
    pub canvas: Rc<RefCell<CanvasLog>>,
}

impl DemoSource {
    /// Build the particle source and its harness handles.
    pub fn build(&self) -> (ParticleSource, DemoInstance) {
        let mut emitter = SyntheticEmitter::new(self.particles, self.space, self.seed).with_size(self.particle_size);
        emitter.set_material(Some(MaterialId(self.material)));
        if self.trails {
            emitter = emitter.with_trails(self.trail_material.map(MaterialId));
        }

        let node = HeadlessNode {
            position: Vec3::from_array(self.position),
            rotation: Quat::from_rotation_z(self.rotation_degrees.to_radians()),
            canvas_scale: Some(Vec3::from_array(self.canvas_scale)),
            surface: SurfaceId(self.surface),
            stencil_depth: self.mask_depth,
            ..HeadlessNode::default()
        };
        let canvas = HeadlessCanvas::new();
        let log = canvas.log();

        let source = emitter.attach(ParticleSource::new(
            self.id,
            self.config.clone(),
            Box::new(node),
            Box::new(canvas),
        ));
        (
            source,
            DemoInstance {
                id: self.id,
                emitter,
                canvas: log,
            },
        )
    }
}
