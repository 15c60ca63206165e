//! Quantized bounding volume tree over the polygons of a [`NavMesh`](crate::NavMesh).
//!
//! The tree is stored flattened in depth-first order. A leaf stores the index of its polygon,
//! an internal node stores the negated number of nodes in its subtree, so a query can skip
//! the whole subtree when the node does not overlap the query box.

use glam::{U16Vec3, Vec3};

/// A node of the bounding volume tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct BvNode {
    /// Minimum bounds of the node, quantized relative to the mesh origin
    pub min: U16Vec3,
    /// Maximum bounds of the node, quantized relative to the mesh origin
    pub max: U16Vec3,
    /// Polygon index when non-negative, negated escape offset otherwise
    pub index: i32,
}

impl BvNode {
    /// Returns `true` for leaf nodes.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.index >= 0
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct BvItem {
    pub(crate) min: U16Vec3,
    pub(crate) max: U16Vec3,
    pub(crate) index: usize,
}

impl BvItem {
    /// Quantizes world space bounds relative to `origin`.
    pub(crate) fn new(index: usize, min: Vec3, max: Vec3, origin: Vec3, quant_factor: f32) -> Self {
        let quantize = |v: f32| v.clamp(0.0, u16::MAX as f32) as u16;
        let min = (min - origin) * quant_factor;
        let max = ((max - origin) * quant_factor).ceil();
        Self {
            min: U16Vec3::new(quantize(min.x), quantize(min.y), quantize(min.z)),
            max: U16Vec3::new(quantize(max.x), quantize(max.y), quantize(max.z)),
            index,
        }
    }
}

/// Builds the flattened tree. Produces `2 * items.len() - 1` nodes.
pub(crate) fn build(items: &mut [BvItem]) -> Vec<BvNode> {
    let mut nodes = Vec::with_capacity((items.len() * 2).saturating_sub(1));
    if !items.is_empty() {
        subdivide(items, &mut nodes);
    }
    nodes
}

fn subdivide(items: &mut [BvItem], nodes: &mut Vec<BvNode>) {
    let current = nodes.len();
    if let [item] = items {
        nodes.push(BvNode {
            min: item.min,
            max: item.max,
            index: item.index as i32,
        });
        return;
    }

    let (min, max) = items.iter().fold(
        (U16Vec3::MAX, U16Vec3::MIN),
        |(min, max), item| (min.min(item.min), max.max(item.max)),
    );
    nodes.push(BvNode { min, max, index: 0 });

    // Split along the longest axis.
    let extent = max - min;
    let mut axis = 0;
    if extent.y > extent.x {
        axis = 1;
    }
    if extent.z > extent[axis] {
        axis = 2;
    }
    items.sort_by_key(|item| item.min[axis]);

    let (left, right) = items.split_at_mut(items.len() / 2);
    subdivide(left, nodes);
    subdivide(right, nodes);

    let escape = nodes.len() - current;
    nodes[current].index = -(escape as i32);
}

#[inline]
pub(crate) fn overlap_quant_bounds(amin: U16Vec3, amax: U16Vec3, bmin: U16Vec3, bmax: U16Vec3) -> bool {
    amin.cmple(bmax).all() && amax.cmpge(bmin).all()
}

/// Calls `visit` with the polygon index of every leaf overlapping the quantized query box.
pub(crate) fn query(nodes: &[BvNode], min: U16Vec3, max: U16Vec3, mut visit: impl FnMut(usize)) {
    let mut i = 0;
    while i < nodes.len() {
        let node = &nodes[i];
        let overlap = overlap_quant_bounds(min, max, node.min, node.max);
        if node.is_leaf() && overlap {
            visit(node.index as usize);
        }
        if overlap || node.is_leaf() {
            i += 1;
        } else {
            i += (-node.index) as usize;
        }
    }
}
