use bitflags::bitflags;
use glam::Vec3;

use crate::Poly;

bitflags! {
    /// User defined flags of a [`Poly`], matched against a [`QueryFilter`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct PolyFlags: u16 {
        /// Ground the agent can walk on. Every compiled polygon carries this flag by default.
        const WALK = 0x01;
        /// Any other bit is free for the host to use.
        const _ = !0;
    }
}

impl Default for PolyFlags {
    fn default() -> Self {
        Self::WALK
    }
}

/// Decides which polygons a query may visit and what moving between them costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct QueryFilter {
    /// A polygon must share at least one flag with this set to be visited.
    pub include_flags: PolyFlags,
    /// A polygon with any of these flags is never visited.
    pub exclude_flags: PolyFlags,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            include_flags: PolyFlags::all(),
            exclude_flags: PolyFlags::empty(),
        }
    }
}

impl QueryFilter {
    /// Returns `true` if the polygon may be visited.
    #[inline]
    pub fn pass_filter(&self, poly: &Poly) -> bool {
        poly.flags.intersects(self.include_flags) && !poly.flags.intersects(self.exclude_flags)
    }

    /// The cost of moving from `from` to `to`. All walkable polygons cost their travelled distance.
    #[inline]
    pub fn cost(&self, from: Vec3, to: Vec3) -> f32 {
        from.distance(to)
    }
}
