//! Axis-Aligned Bounding Boxes
//!
//! Overlap testing and push-out resolution. The same test gates room
//! placement during generation and wall collisions during movement.

use serde::{Deserialize, Serialize};

/// An axis-aligned box in world coordinates, stored as top-left corner
/// plus extent. Y grows downward, matching the tile grid.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Aabb {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Horizontal extent
    pub width: f32,
    /// Vertical extent
    pub height: f32,
}

impl Aabb {
    /// Create a box from its top-left corner and extent.
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Left edge.
    #[inline]
    pub fn left(&self) -> f32 {
        self.x
    }

    /// Right edge.
    #[inline]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// Top edge.
    #[inline]
    pub fn top(&self) -> f32 {
        self.y
    }

    /// Bottom edge.
    #[inline]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Center on the X axis.
    #[inline]
    pub fn center_x(&self) -> f32 {
        self.x + self.width / 2.0
    }

    /// Center on the Y axis.
    #[inline]
    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }
}

/// Check whether two boxes overlap.
///
/// Strict inequalities: boxes that only touch at an edge or corner do not
/// overlap. Symmetric in its arguments.
#[inline]
pub fn overlap(a: &Aabb, b: &Aabb) -> bool {
    a.left() < b.right() && a.right() > b.left() && a.top() < b.bottom() && a.bottom() > b.top()
}

/// Push `mover` out of `obstacle` along the axis of least penetration.
///
/// Computes the overlap depth on each axis and moves `mover` flush against
/// the nearer edge of `obstacle` on the shallower axis, direction chosen by
/// comparing centers. Equal depths resolve on the Y axis.
///
/// Applying this once per obstacle per tick, in obstacle-iteration order, is
/// an order-dependent heuristic, not a simultaneous multi-body solve: a
/// later obstacle may push the mover back into an earlier one.
pub fn resolve_pushout(mover: &mut Aabb, obstacle: &Aabb) {
    if !overlap(mover, obstacle) {
        return;
    }

    let overlap_x = (mover.right() - obstacle.left()).min(obstacle.right() - mover.left());
    let overlap_y = (mover.bottom() - obstacle.top()).min(obstacle.bottom() - mover.top());

    if overlap_x < overlap_y {
        if mover.center_x() < obstacle.center_x() {
            mover.x = obstacle.left() - mover.width;
        } else {
            mover.x = obstacle.right();
        }
    } else if mover.center_y() < obstacle.center_y() {
        mover.y = obstacle.top() - mover.height;
    } else {
        mover.y = obstacle.bottom();
    }
}

/// Stable handle into a [`ColliderRegistry`].
///
/// Handles stay valid across unrelated insertions and removals; a slot is
/// only reused after its occupant has been removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColliderHandle(usize);

/// Registry of live collision boxes with O(1) add and remove.
///
/// Slab storage: removal leaves a hole that the free list recycles on the
/// next insert, so handles are plain indices and iteration skips holes.
#[derive(Debug, Default)]
pub struct ColliderRegistry {
    slots: Vec<Option<Aabb>>,
    free: Vec<usize>,
}

impl ColliderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live colliders.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// True when no colliders are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a box, returning its handle.
    pub fn insert(&mut self, aabb: Aabb) -> ColliderHandle {
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(aabb);
            ColliderHandle(index)
        } else {
            self.slots.push(Some(aabb));
            ColliderHandle(self.slots.len() - 1)
        }
    }

    /// Remove a box. Returns the box if the handle was live; removing an
    /// already-removed handle is a no-op.
    pub fn remove(&mut self, handle: ColliderHandle) -> Option<Aabb> {
        let slot = self.slots.get_mut(handle.0)?;
        let removed = slot.take();
        if removed.is_some() {
            self.free.push(handle.0);
        }
        removed
    }

    /// Look up a live box.
    pub fn get(&self, handle: ColliderHandle) -> Option<&Aabb> {
        self.slots.get(handle.0)?.as_ref()
    }

    /// Mutable lookup, for moving a registered collider.
    pub fn get_mut(&mut self, handle: ColliderHandle) -> Option<&mut Aabb> {
        self.slots.get_mut(handle.0)?.as_mut()
    }

    /// Every unordered overlapping pair, each reported exactly once.
    ///
    /// Scans all C(n,2) combinations; registries here hold tens of boxes,
    /// not thousands, so no spatial index is involved.
    pub fn all_pairs(&self) -> Vec<(ColliderHandle, ColliderHandle)> {
        let live: Vec<(usize, &Aabb)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|aabb| (i, aabb)))
            .collect();

        let mut pairs = Vec::new();
        for i in 0..live.len() {
            for j in (i + 1)..live.len() {
                let (ia, a) = live[i];
                let (ib, b) = live[j];
                if overlap(a, b) {
                    pairs.push((ColliderHandle(ia), ColliderHandle(ib)));
                }
            }
        }
        pairs
    }
}
