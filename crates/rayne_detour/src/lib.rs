//! Runtime side of rayne-navigation.
//!
//! A [`NavMesh`] is compiled once from the [`PolygonMesh`](rayne_recast::PolygonMesh) and
//! [`DetailPolygonMesh`](rayne_recast::DetailPolygonMesh) produced by `rayne_recast`, and is
//! immutable afterwards. Queries run through a [`NavMeshQuery`], which owns the search state
//! and can be reused for any number of requests against the same mesh.

mod builder;
mod bv_tree;
mod filter;
pub(crate) mod math;
mod nav_mesh;
mod node_pool;
mod poly_ref;
mod query;
#[cfg(test)]
mod test_support;

pub use builder::NavMeshCreateParams;
pub use bv_tree::BvNode;
pub use filter::{PolyFlags, QueryFilter};
pub use nav_mesh::{
    DetailTriangle, Link, NavMesh, NavMeshError, Poly, PolyDetail, VERTS_PER_POLYGON,
};
pub use poly_ref::PolyRef;
pub use query::{
    NavMeshQuery, NearestPoly, PolygonPath, QueryError, StraightPath, StraightPathFlags,
    StraightPathPoint,
};
