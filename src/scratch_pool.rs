//! Shared pool of scratch meshes used while baking.
//!
//! Every bake pass checks out one scratch mesh per baked layer (particles,
//! trails), lets the simulation write into it, then merges the checked-out
//! meshes into the source's own baked mesh. The pool is shared by all active
//! sources and only exists while at least one [`PoolLease`] is alive.
//!
//! The pool is driven from the single render-preparation pass, so it is shared
//! through `Rc<RefCell<_>>` rather than any lock.

use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use glam::Mat4;

use crate::mesh::Mesh;

/// Number of scratch meshes in the pool.
pub const POOL_CAPACITY: usize = 8;

/// Compact set of pool slots, one bit per slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotSet(u8);

impl SlotSet {
    pub fn insert(&mut self, slot: usize) {
        self.0 |= 1 << slot.min(POOL_CAPACITY - 1);
    }

    pub fn remove(&mut self, slot: usize) {
        self.0 &= !(1 << slot.min(POOL_CAPACITY - 1));
    }

    pub fn contains(&self, slot: usize) -> bool {
        slot < POOL_CAPACITY && self.0 & (1 << slot) != 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

#[derive(Debug, Default)]
struct ScratchBuffer {
    mesh: Mesh,
    /// Material slot this buffer was checked out for.
    slot: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    leases: usize,
    /// Empty while no lease is held.
    buffers: Vec<ScratchBuffer>,
    cursor: usize,
    occupancy: SlotSet,
    /// Number of times the buffer array has been allocated.
    allocations: usize,
}

impl PoolState {
    fn register(&mut self) {
        if self.leases == 0 {
            self.buffers = (0..POOL_CAPACITY).map(|_| ScratchBuffer::default()).collect();
            self.allocations += 1;
            log::debug!("Scratch mesh pool allocated ({} buffers)", POOL_CAPACITY);
        }
        self.leases += 1;
    }

    fn unregister(&mut self) {
        self.leases = self.leases.saturating_sub(1);
        if self.leases == 0 && !self.buffers.is_empty() {
            self.buffers = Vec::new();
            self.cursor = 0;
            self.occupancy.clear();
            log::debug!("Scratch mesh pool released");
        }
    }
}

/// Handle to the shared scratch pool. Cloning shares the same pool.
#[derive(Debug, Clone, Default)]
pub struct ScratchMeshPool {
    state: Rc<RefCell<PoolState>>,
}

impl ScratchMeshPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the pool allocated for as long as the returned lease lives.
    pub fn lease(&self) -> PoolLease {
        self.state.borrow_mut().register();
        PoolLease {
            state: Rc::clone(&self.state),
        }
    }

    pub fn is_allocated(&self) -> bool {
        !self.state.borrow().buffers.is_empty()
    }

    pub fn lease_count(&self) -> usize {
        self.state.borrow().leases
    }

    /// How many times the buffer array has been allocated over the pool's life.
    pub fn allocation_count(&self) -> usize {
        self.state.borrow().allocations
    }

    /// Start a bake pass: reset all scratch contents, occupancy and cursor.
    ///
    /// Returns `None` when no lease is held and the pool is not allocated.
    pub fn begin_pass(&self) -> Option<BakePass<'_>> {
        let mut state = self.state.borrow_mut();
        if state.buffers.is_empty() {
            return None;
        }

        state.cursor = 0;
        state.occupancy.clear();
        for buffer in state.buffers.iter_mut() {
            buffer.mesh.clear();
            buffer.slot = 0;
        }

        Some(BakePass { state })
    }
}

/// Keeps the scratch pool alive; the last lease dropped frees the buffers.
#[derive(Debug)]
pub struct PoolLease {
    state: Rc<RefCell<PoolState>>,
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.state.borrow_mut().unregister();
    }
}

/// Exclusive access to the pool for the duration of one source's bake.
pub struct BakePass<'a> {
    state: RefMut<'a, PoolState>,
}

impl BakePass<'_> {
    /// Check out the next scratch mesh for material `slot`.
    ///
    /// Past capacity the last buffer is handed out again instead of growing.
    pub fn checkout(&mut self, slot: usize) -> &mut Mesh {
        let state = &mut *self.state;
        let index = state.cursor.min(POOL_CAPACITY - 1);
        if state.cursor >= POOL_CAPACITY {
            log::debug!("Scratch mesh pool over-subscribed, reusing last buffer");
        }
        state.cursor = index + 1;
        state.occupancy.insert(slot);

        let buffer = &mut state.buffers[index];
        buffer.slot = slot.min(POOL_CAPACITY - 1);
        buffer.mesh.clear();
        &mut buffer.mesh
    }

    /// Undo the most recent checkout.
    pub fn discard(&mut self) {
        let state = &mut *self.state;
        if state.cursor == 0 {
            return;
        }
        state.cursor -= 1;
        let buffer = &mut state.buffers[state.cursor];
        state.occupancy.remove(buffer.slot);
        buffer.mesh.clear();
    }

    /// Number of buffers currently checked out.
    pub fn checked_out(&self) -> usize {
        self.state.cursor
    }

    pub fn occupancy(&self) -> SlotSet {
        self.state.occupancy
    }

    /// Merge all checked-out buffers into `target`, one sub-mesh per material
    /// slot, then recompute its bounds. `target` is cleared first.
    pub fn combine_into(&self, target: &mut Mesh, matrix: &Mat4) {
        target.clear();
        for buffer in &self.state.buffers[..self.state.cursor] {
            target.append_transformed(&buffer.mesh, matrix, buffer.slot);
        }
        target.recalculate_bounds();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::UiVertex;

    fn write_quad(mesh: &mut Mesh, x: f32) {
        mesh.vertices_mut().extend([
            UiVertex::new([x, 0.0, 0.0], [1.0; 4], [0.0, 0.0]),
            UiVertex::new([x + 1.0, 0.0, 0.0], [1.0; 4], [1.0, 0.0]),
            UiVertex::new([x + 1.0, 1.0, 0.0], [1.0; 4], [1.0, 1.0]),
            UiVertex::new([x, 1.0, 0.0], [1.0; 4], [0.0, 1.0]),
        ]);
        mesh.indices_mut(0).extend([0, 1, 2, 2, 3, 0]);
    }

    #[test]
    fn test_lease_allocates_once() {
        let pool = ScratchMeshPool::new();
        assert!(!pool.is_allocated());

        let a = pool.lease();
        let b = pool.lease();
        assert!(pool.is_allocated());
        assert_eq!(pool.lease_count(), 2);
        assert_eq!(pool.allocation_count(), 1);

        drop(a);
        assert!(pool.is_allocated());
        drop(b);
        assert!(!pool.is_allocated());
    }

    #[test]
    fn test_balanced_leases_leave_pool_released() {
        let pool = ScratchMeshPool::new();
        for _ in 0..5 {
            let lease = pool.lease();
            drop(lease);
        }
        assert!(!pool.is_allocated());
        assert_eq!(pool.lease_count(), 0);
        assert_eq!(pool.allocation_count(), 5);
    }

    #[test]
    fn test_begin_pass_without_lease() {
        let pool = ScratchMeshPool::new();
        assert!(pool.begin_pass().is_none());
    }

    #[test]
    fn test_begin_pass_resets_occupancy() {
        let pool = ScratchMeshPool::new();
        let _lease = pool.lease();
        {
            let mut pass = pool.begin_pass().unwrap();
            write_quad(pass.checkout(0), 0.0);
            write_quad(pass.checkout(1), 0.0);
            assert_eq!(pass.checked_out(), 2);
            assert!(pass.occupancy().contains(0) && pass.occupancy().contains(1));
        }

        let pass = pool.begin_pass().unwrap();
        assert_eq!(pass.checked_out(), 0);
        assert_eq!(pass.occupancy(), SlotSet::default());
    }

    #[test]
    fn test_over_subscription_is_clamped() {
        let pool = ScratchMeshPool::new();
        let _lease = pool.lease();
        let mut pass = pool.begin_pass().unwrap();

        for i in 0..(POOL_CAPACITY + 3) {
            write_quad(pass.checkout(0), i as f32);
            assert!(pass.checked_out() <= POOL_CAPACITY);
        }
        assert_eq!(pass.checked_out(), POOL_CAPACITY);

        let mut combined = Mesh::new();
        pass.combine_into(&mut combined, &Mat4::IDENTITY);
        assert_eq!(combined.vertex_count(), POOL_CAPACITY * 4);
        // The last buffer holds the most recent checkout.
        assert_eq!(
            combined.vertices()[(POOL_CAPACITY - 1) * 4].position[0],
            (POOL_CAPACITY + 2) as f32
        );
    }

    #[test]
    fn test_discard_rolls_back() {
        let pool = ScratchMeshPool::new();
        let _lease = pool.lease();
        let mut pass = pool.begin_pass().unwrap();

        pass.discard();
        assert_eq!(pass.checked_out(), 0);

        write_quad(pass.checkout(0), 0.0);
        write_quad(pass.checkout(1), 5.0);
        pass.discard();

        assert_eq!(pass.checked_out(), 1);
        assert!(pass.occupancy().contains(0));
        assert!(!pass.occupancy().contains(1));

        let mut combined = Mesh::new();
        pass.combine_into(&mut combined, &Mat4::IDENTITY);
        assert_eq!(combined.vertex_count(), 4);
        assert_eq!(combined.submesh_count(), 1);
    }

    #[test]
    fn test_combine_groups_by_slot() {
        let pool = ScratchMeshPool::new();
        let _lease = pool.lease();
        let mut pass = pool.begin_pass().unwrap();

        // Trail baked without particles still lands in slot 1.
        write_quad(pass.checkout(1), 0.0);

        let mut combined = Mesh::new();
        let scale = Mat4::from_scale(glam::Vec3::splat(2.0));
        pass.combine_into(&mut combined, &scale);

        assert_eq!(combined.submesh_count(), 2);
        assert!(combined.indices(0).is_empty());
        assert_eq!(combined.indices(1).len(), 6);
        assert_eq!(combined.bounds().max, [2.0, 2.0, 0.0]);
    }

    #[test]
    fn test_slot_set() {
        let mut set = SlotSet::default();
        set.insert(0);
        set.insert(3);
        set.insert(3);
        assert!(set.contains(0) && set.contains(3));

        set.remove(0);
        assert!(!set.contains(0));
        assert!(!set.contains(64));
        set.clear();
        assert_eq!(set, SlotSet::default());
    }
}
