//! Materials for particle sources drawn on a canvas.
//!
//! Material instantiation (copies, texture assignment, stencil variants) is
//! expensive on the host side, so it only happens when [`MaterialReconciler`]
//! observes that the simulation's materials actually changed. Stencil variants
//! for masking are owned per source in [`MaskMaterials`] and released when the
//! source is deactivated.

use std::collections::HashMap;

use glam::Vec4;
use serde::{Deserialize, Serialize};

use crate::host::{CanvasRenderer, ParticleRenderer, ParticleSimulation, UiNode};

/// Host material handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(pub u64);

/// Host texture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Types of shader properties that can be animated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyKind {
    Float,
    /// RGBA color.
    Color,
    /// 4D vector.
    Vector,
}

/// Runtime value for a shader property.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PropertyValue {
    Float(f32),
    Color(Vec4),
    Vector(Vec4),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Float(_) => PropertyKind::Float,
            PropertyValue::Color(_) => PropertyKind::Color,
            PropertyValue::Vector(_) => PropertyKind::Vector,
        }
    }

    /// Get as float, taking the first component of vector types.
    pub fn as_float(&self) -> f32 {
        match self {
            PropertyValue::Float(v) => *v,
            PropertyValue::Color(v) | PropertyValue::Vector(v) => v.x,
        }
    }

    /// Get as vec4, padding floats with zeros.
    pub fn as_vec4(&self) -> Vec4 {
        match self {
            PropertyValue::Float(v) => Vec4::new(*v, 0.0, 0.0, 0.0),
            PropertyValue::Color(v) | PropertyValue::Vector(v) => *v,
        }
    }

    /// Reinterpret this value as `kind`.
    pub fn coerce(&self, kind: PropertyKind) -> PropertyValue {
        match kind {
            PropertyKind::Float => PropertyValue::Float(self.as_float()),
            PropertyKind::Color => PropertyValue::Color(self.as_vec4()),
            PropertyKind::Vector => PropertyValue::Vector(self.as_vec4()),
        }
    }
}

/// Per-renderer material overrides, filled by the simulation's renderer.
///
/// Reused across frames: [`PropertyBlock::clear`] unsets values but keeps the
/// names, so refilling the same properties does not allocate.
#[derive(Debug, Default)]
pub struct PropertyBlock {
    values: HashMap<String, Option<PropertyValue>>,
}

impl PropertyBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: PropertyValue) {
        if let Some(slot) = self.values.get_mut(name) {
            *slot = Some(value);
        } else {
            self.values.insert(name.to_string(), Some(value));
        }
    }

    /// Value of `name` read as `kind`, if set.
    pub fn get(&self, name: &str, kind: PropertyKind) -> Option<PropertyValue> {
        self.values.get(name).copied().flatten().map(|v| v.coerce(kind))
    }

    /// Number of properties currently set.
    pub fn len(&self) -> usize {
        self.values.values().filter(|v| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(Option::is_none)
    }

    pub fn clear(&mut self) {
        for value in self.values.values_mut() {
            *value = None;
        }
    }
}

/// A material property driven by animation on the simulation's renderer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimatableProperty {
    /// Shader property name.
    pub name: String,
    pub kind: PropertyKind,
}

impl AnimatableProperty {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Copy this property from `block` into `material`. Absent values are skipped.
    pub fn apply(&self, block: &PropertyBlock, material: MaterialId, store: &mut dyn MaterialStore) {
        if let Some(value) = block.get(&self.name, self.kind) {
            store.set_property(material, &self.name, value);
        }
    }
}

/// Stencil comparison for masked materials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilCompare {
    Always,
    Equal,
}

/// Key of a stencil material variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilKey {
    pub reference: u32,
    pub compare: StencilCompare,
    pub read_mask: u32,
    pub write_mask: u32,
}

impl StencilKey {
    /// Key for a graphic nested `depth` masks deep: test against all enclosing
    /// mask bits without writing.
    pub fn masked(depth: u32) -> Self {
        let bits = depth.min(8);
        let reference = (1u32 << bits) - 1;
        Self {
            reference,
            compare: StencilCompare::Equal,
            read_mask: reference,
            write_mask: 0,
        }
    }
}

/// Host-side material services.
pub trait MaterialStore {
    /// Create a private copy of `base`, optionally replacing its main texture.
    fn instantiate(&mut self, base: MaterialId, texture: Option<TextureId>) -> MaterialId;

    /// Get or create the stencil variant of `base`; each call holds a reference.
    fn acquire_stencil(&mut self, base: MaterialId, key: StencilKey) -> MaterialId;

    /// Drop one reference to a stencil variant.
    fn release_stencil(&mut self, material: MaterialId);

    fn set_property(&mut self, material: MaterialId, name: &str, value: PropertyValue);
}

/// Detects changes in the simulation renderer's materials between refreshes.
#[derive(Debug, Default, Clone)]
pub struct MaterialReconciler {
    shared: Option<MaterialId>,
    trail: Option<MaterialId>,
    sprites_mode: bool,
}

impl MaterialReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current state; returns true if anything differs from the
    /// previous observation.
    pub fn observe(&mut self, shared: Option<MaterialId>, trail: Option<MaterialId>, sprites_mode: bool) -> bool {
        let changed = self.shared != shared || self.trail != trail || self.sprites_mode != sprites_mode;
        self.shared = shared;
        self.trail = trail;
        self.sprites_mode = sprites_mode;
        changed
    }
}

/// The two stencil material slots a source owns (particles, trails).
#[derive(Debug, Default)]
pub struct MaskMaterials {
    slots: [Option<MaterialId>; 2],
}

impl MaskMaterials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: usize) -> Option<MaterialId> {
        self.slots.get(slot).copied().flatten()
    }

    /// Material to draw `base` with in `slot`, taking masking into account.
    pub fn resolve(
        &mut self,
        base: Option<MaterialId>,
        slot: usize,
        node: &dyn UiNode,
        store: &mut dyn MaterialStore,
    ) -> Option<MaterialId> {
        let base = base?;
        if slot >= self.slots.len() {
            return Some(base);
        }

        let stencil_value = if node.is_maskable() {
            node.stencil_depth() + slot as u32
        } else {
            0
        };
        if stencil_value == 0 || node.has_active_mask() {
            return Some(base);
        }

        let masked = store.acquire_stencil(base, StencilKey::masked(stencil_value));
        if let Some(previous) = self.slots[slot].replace(masked) {
            store.release_stencil(previous);
        }
        Some(masked)
    }

    /// Release every held stencil variant.
    pub fn release_all(&mut self, store: &mut dyn MaterialStore) {
        for slot in &mut self.slots {
            if let Some(material) = slot.take() {
                store.release_stencil(material);
            }
        }
    }
}

/// Rebuild the canvas materials of one source.
pub fn rebuild_materials(
    simulation: &dyn ParticleSimulation,
    renderer: &dyn ParticleRenderer,
    node: &dyn UiNode,
    canvas: &mut dyn CanvasRenderer,
    masks: &mut MaskMaterials,
    has_animatable_properties: bool,
    store: &mut dyn MaterialStore,
) {
    let trails = simulation.trails_enabled();
    canvas.set_material_count(if trails { 2 } else { 1 });

    let mut main = renderer.shared_material();
    let texture = if simulation.sprites_mode() {
        simulation.sprite_texture()
    } else {
        None
    };
    if has_animatable_properties || texture.is_some() {
        // Animated properties must not leak into the shared asset.
        main = main.map(|base| store.instantiate(base, texture));
    }

    let main = masks.resolve(main, 0, node, store);
    canvas.set_material(main, 0);

    if trails {
        let trail = masks.resolve(renderer.trail_material(), 1, node, store);
        canvas.set_material(trail, 1);
    }
}

/// Copy animated values from the simulation renderer into the canvas material.
pub fn push_animatable_properties(
    properties: &[AnimatableProperty],
    renderer: &dyn ParticleRenderer,
    canvas: &dyn CanvasRenderer,
    block: &mut PropertyBlock,
    store: &mut dyn MaterialStore,
) {
    if properties.is_empty() || canvas.material_count() == 0 {
        return;
    }
    let Some(material) = canvas.material(0) else {
        return;
    };

    renderer.fill_property_block(block);
    for property in properties {
        property.apply(block, material, store);
    }
    block.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Quat, Vec3};

    use crate::camera::BakingCamera;
    use crate::host::{RenderMode, SurfaceId};
    use crate::mesh::Mesh;
    use crate::transform::SimulationSpace;

    #[derive(Default)]
    struct RecordingStore {
        next: u64,
        instantiated: Vec<(MaterialId, Option<TextureId>)>,
        acquired: Vec<(MaterialId, StencilKey)>,
        released: Vec<MaterialId>,
        properties: Vec<(MaterialId, String, PropertyValue)>,
    }

    impl MaterialStore for RecordingStore {
        fn instantiate(&mut self, base: MaterialId, texture: Option<TextureId>) -> MaterialId {
            self.instantiated.push((base, texture));
            self.next += 1;
            MaterialId(1000 + self.next)
        }

        fn acquire_stencil(&mut self, base: MaterialId, key: StencilKey) -> MaterialId {
            self.acquired.push((base, key));
            self.next += 1;
            MaterialId(2000 + self.next)
        }

        fn release_stencil(&mut self, material: MaterialId) {
            self.released.push(material);
        }

        fn set_property(&mut self, material: MaterialId, name: &str, value: PropertyValue) {
            self.properties.push((material, name.to_string(), value));
        }
    }

    struct MaskNode {
        depth: u32,
        maskable: bool,
        own_mask: bool,
    }

    impl UiNode for MaskNode {
        fn local_scale(&self) -> Vec3 {
            Vec3::ONE
        }
        fn set_local_scale(&mut self, _scale: Vec3) {}
        fn world_rotation(&self) -> Quat {
            Quat::IDENTITY
        }
        fn lossy_scale(&self) -> Vec3 {
            Vec3::ONE
        }
        fn world_to_local(&self) -> Mat4 {
            Mat4::IDENTITY
        }
        fn surface(&self) -> Option<SurfaceId> {
            Some(SurfaceId(0))
        }
        fn root_canvas_scale(&self) -> Option<Vec3> {
            Some(Vec3::ONE)
        }
        fn is_maskable(&self) -> bool {
            self.maskable
        }
        fn stencil_depth(&self) -> u32 {
            self.depth
        }
        fn has_active_mask(&self) -> bool {
            self.own_mask
        }
    }

    struct SheetSim {
        sprites: bool,
        texture: Option<TextureId>,
        trails: bool,
    }

    impl ParticleSimulation for SheetSim {
        fn particle_count(&self) -> usize {
            1
        }
        fn simulation_space(&self) -> SimulationSpace {
            SimulationSpace::Local
        }
        fn trails_enabled(&self) -> bool {
            self.trails
        }
        fn sprites_mode(&self) -> bool {
            self.sprites
        }
        fn sprite_texture(&self) -> Option<TextureId> {
            self.texture
        }
    }

    struct FixedRenderer;

    impl ParticleRenderer for FixedRenderer {
        fn render_mode(&self) -> RenderMode {
            RenderMode::Billboard
        }
        fn shared_material(&self) -> Option<MaterialId> {
            Some(MaterialId(5))
        }
        fn trail_material(&self) -> Option<MaterialId> {
            Some(MaterialId(6))
        }
        fn bake_mesh(&mut self, _target: &mut Mesh, _camera: &BakingCamera, _apply: bool) -> anyhow::Result<()> {
            Ok(())
        }
        fn bake_trails_mesh(&mut self, _target: &mut Mesh, _camera: &BakingCamera, _apply: bool) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct SlotCanvas {
        materials: Vec<Option<MaterialId>>,
    }

    impl CanvasRenderer for SlotCanvas {
        fn set_mesh(&mut self, _mesh: &Mesh) {}
        fn material_count(&self) -> usize {
            self.materials.len()
        }
        fn set_material_count(&mut self, count: usize) {
            self.materials.resize(count, None);
        }
        fn material(&self, slot: usize) -> Option<MaterialId> {
            self.materials.get(slot).copied().flatten()
        }
        fn set_material(&mut self, material: Option<MaterialId>, slot: usize) {
            self.materials[slot] = material;
        }
    }

    fn rebuild(sim: &SheetSim, has_properties: bool, store: &mut RecordingStore) -> SlotCanvas {
        let mut canvas = SlotCanvas::default();
        let node = MaskNode { depth: 0, maskable: true, own_mask: false };
        rebuild_materials(
            sim,
            &FixedRenderer,
            &node,
            &mut canvas,
            &mut MaskMaterials::new(),
            has_properties,
            store,
        );
        canvas
    }

    #[test]
    fn test_sprite_sheet_texture_gets_material_copy() {
        let mut store = RecordingStore::default();
        let sim = SheetSim { sprites: true, texture: Some(TextureId(42)), trails: false };

        let canvas = rebuild(&sim, false, &mut store);
        assert_eq!(store.instantiated, vec![(MaterialId(5), Some(TextureId(42)))]);
        assert_eq!(canvas.materials.len(), 1);
        assert_ne!(canvas.materials[0], Some(MaterialId(5)));
        assert!(canvas.materials[0].is_some());
    }

    #[test]
    fn test_shared_material_used_without_texture_or_properties() {
        let mut store = RecordingStore::default();

        // Sprite texture is ignored outside sprite mode.
        let sim = SheetSim { sprites: false, texture: Some(TextureId(42)), trails: true };
        let canvas = rebuild(&sim, false, &mut store);
        assert!(store.instantiated.is_empty());
        assert_eq!(canvas.materials, vec![Some(MaterialId(5)), Some(MaterialId(6))]);

        let sim = SheetSim { sprites: true, texture: None, trails: false };
        let canvas = rebuild(&sim, false, &mut store);
        assert!(store.instantiated.is_empty());
        assert_eq!(canvas.materials, vec![Some(MaterialId(5))]);
    }

    #[test]
    fn test_animatable_properties_get_untextured_copy() {
        let mut store = RecordingStore::default();
        let sim = SheetSim { sprites: false, texture: None, trails: false };

        rebuild(&sim, true, &mut store);
        assert_eq!(store.instantiated, vec![(MaterialId(5), None)]);
    }

    #[test]
    fn test_reconciler_detects_changes_once() {
        let mut reconciler = MaterialReconciler::new();
        let a = Some(MaterialId(1));
        let b = Some(MaterialId(2));

        assert!(reconciler.observe(a, None, false));
        assert!(!reconciler.observe(a, None, false));
        assert!(reconciler.observe(b, None, false));
        assert!(!reconciler.observe(b, None, false));
        assert!(reconciler.observe(b, a, false));
        assert!(reconciler.observe(b, a, true));
        assert!(!reconciler.observe(b, a, true));
    }

    #[test]
    fn test_unmasked_node_uses_base_material() {
        let mut store = RecordingStore::default();
        let mut masks = MaskMaterials::new();
        let node = MaskNode { depth: 0, maskable: true, own_mask: false };

        let m = masks.resolve(Some(MaterialId(7)), 0, &node, &mut store);
        assert_eq!(m, Some(MaterialId(7)));
        assert!(store.acquired.is_empty());
    }

    #[test]
    fn test_masked_node_acquires_stencil_variant() {
        let mut store = RecordingStore::default();
        let mut masks = MaskMaterials::new();
        let node = MaskNode { depth: 2, maskable: true, own_mask: false };

        let first = masks.resolve(Some(MaterialId(7)), 1, &node, &mut store);
        assert_eq!(store.acquired.len(), 1);
        let (base, key) = store.acquired[0];
        assert_eq!(base, MaterialId(7));
        // Depth 2 plus slot 1 gives three mask bits.
        assert_eq!(key.reference, 0b111);
        assert_eq!(key.read_mask, 0b111);
        assert_eq!(key.write_mask, 0);
        assert_eq!(key.compare, StencilCompare::Equal);
        assert_eq!(masks.get(1), first);

        // Re-resolving releases the previous variant.
        masks.resolve(Some(MaterialId(7)), 1, &node, &mut store);
        assert_eq!(store.released, vec![first.unwrap()]);

        masks.release_all(&mut store);
        assert_eq!(store.released.len(), 2);
        assert_eq!(masks.get(1), None);
    }

    #[test]
    fn test_node_with_own_mask_skips_stencil() {
        let mut store = RecordingStore::default();
        let mut masks = MaskMaterials::new();
        let node = MaskNode { depth: 3, maskable: true, own_mask: true };
        assert_eq!(masks.resolve(Some(MaterialId(1)), 0, &node, &mut store), Some(MaterialId(1)));

        let node = MaskNode { depth: 3, maskable: false, own_mask: false };
        assert_eq!(masks.resolve(Some(MaterialId(1)), 0, &node, &mut store), Some(MaterialId(1)));
        assert!(store.acquired.is_empty());
    }

    #[test]
    fn test_property_block_coerces_kinds() {
        let mut block = PropertyBlock::new();
        block.set("_Tint", PropertyValue::Color(Vec4::new(1.0, 0.5, 0.25, 1.0)));
        block.set("_Speed", PropertyValue::Float(2.0));
        block.set("_Speed", PropertyValue::Float(3.0));

        assert_eq!(block.len(), 2);
        assert_eq!(block.get("_Speed", PropertyKind::Float), Some(PropertyValue::Float(3.0)));
        assert_eq!(
            block.get("_Speed", PropertyKind::Vector),
            Some(PropertyValue::Vector(Vec4::new(3.0, 0.0, 0.0, 0.0)))
        );
        assert_eq!(block.get("_Tint", PropertyKind::Float), Some(PropertyValue::Float(1.0)));
        assert_eq!(block.get("_Missing", PropertyKind::Float), None);

        block.clear();
        assert!(block.is_empty());
    }

    #[test]
    fn test_property_block_keeps_names_across_frames() {
        let mut block = PropertyBlock::new();
        block.set("_Alpha", PropertyValue::Float(0.5));
        let key = block.values.keys().next().map(|k| k.as_ptr()).unwrap();

        for frame in 0..100 {
            block.clear();
            assert_eq!(block.get("_Alpha", PropertyKind::Float), None);
            block.set("_Alpha", PropertyValue::Float(frame as f32));
        }

        assert_eq!(block.values.len(), 1);
        assert_eq!(block.values.keys().next().map(|k| k.as_ptr()), Some(key));
        assert_eq!(block.get("_Alpha", PropertyKind::Float), Some(PropertyValue::Float(99.0)));
        assert_eq!(block.len(), 1);
    }

    #[test]
    fn test_animatable_property_skips_absent_values() {
        let mut store = RecordingStore::default();
        let mut block = PropertyBlock::new();
        block.set("_Glow", PropertyValue::Float(0.8));

        AnimatableProperty::new("_Glow", PropertyKind::Float).apply(&block, MaterialId(3), &mut store);
        AnimatableProperty::new("_Other", PropertyKind::Color).apply(&block, MaterialId(3), &mut store);

        assert_eq!(store.properties.len(), 1);
        assert_eq!(store.properties[0].1, "_Glow");
        assert_eq!(store.properties[0].2.kind(), PropertyKind::Float);
    }

    #[test]
    fn test_animatable_property_deserializes() {
        let json = r#"{"name": "_TintColor", "kind": "color"}"#;
        let property: AnimatableProperty = serde_json::from_str(json).unwrap();
        assert_eq!(property, AnimatableProperty::new("_TintColor", PropertyKind::Color));
    }
}
