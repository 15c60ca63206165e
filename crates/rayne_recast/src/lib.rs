//! Build side of rayne-navigation.
//!
//! Turns a [`TriMesh`] into a [`PolygonMesh`] and a [`DetailPolygonMesh`]: the triangles are
//! rasterized into a [`Heightfield`], filtered, compacted into a [`CompactHeightfield`], partitioned
//! into regions, traced into a [`ContourSet`] and finally triangulated into convex polygons.
//! [`NavmeshConfigBuilder`] derives the voxel parameters of every stage from agent dimensions.

mod compact_cell;
mod compact_heightfield;
mod compact_span;
mod config;
mod contours;
mod detail_mesh;
mod distance_field;
mod erosion;
mod heightfield;
mod layer_regions;
pub(crate) mod math;
mod monotone_regions;
mod poly_mesh;
mod pre_filter;
mod rasterize;
mod region;
mod region_merge;
mod span;
#[cfg(test)]
mod test_support;
mod trimesh;
mod watershed_regions;

pub use compact_cell::CompactCell;
pub use compact_heightfield::{CompactHeightfield, CompactHeightfieldError};
pub use compact_span::CompactSpan;
pub use config::{NavmeshConfig, NavmeshConfigBuilder};
pub use contours::{BuildContoursFlags, Contour, ContourError, ContourSet, RegionVertexId};
pub use detail_mesh::{DETAIL_EDGE_BOUNDARY, DetailPolygonMesh, DetailPolygonMeshError, SubMesh};
pub use heightfield::{Heightfield, HeightfieldBuilder, HeightfieldBuilderError, SpanInsertionError};
pub use math::Aabb3d;
pub use poly_mesh::{MESH_NULL_IDX, PolygonMesh, PolygonMeshError};
pub use rasterize::RasterizationError;
pub use region::{PartitionType, RegionId};
pub use region_merge::RegionError;
pub use span::{AreaType, Span, SpanKey, Spans};
pub use trimesh::TriMesh;
