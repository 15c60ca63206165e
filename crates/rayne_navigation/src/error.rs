use rayne_detour::NavMeshError;
use rayne_recast::{
    CompactHeightfieldError, ContourError, DetailPolygonMeshError, HeightfieldBuilderError,
    PolygonMeshError, RasterizationError, RegionError,
};
use thiserror::Error;

use crate::GeometryError;

/// Errors that can occur while generating a [`NavigationMesh`](crate::NavigationMesh).
/// Each variant names the stage that failed.
#[derive(Error, Debug)]
pub enum BuildError {
    /// No geometry was given, or the given meshes have no vertices.
    #[error("The input geometry is empty")]
    EmptyInput,
    /// The input geometry could not be read.
    #[error("Could not collect geometry: {0}")]
    Geometry(#[from] GeometryError),
    /// The voxel field is too large.
    #[error("Could not create solid heightfield: {0}")]
    Heightfield(#[from] HeightfieldBuilderError),
    /// The triangles could not be rasterized.
    #[error("Could not rasterize triangles: {0}")]
    Rasterization(#[from] RasterizationError),
    /// The voxel field could not be compacted.
    #[error("Could not build compact data: {0}")]
    Compact(#[from] CompactHeightfieldError),
    /// The walkable surface could not be partitioned.
    #[error("Could not build regions: {0}")]
    Regions(#[from] RegionError),
    /// The region outlines could not be traced.
    #[error("Could not create contours: {0}")]
    Contours(#[from] ContourError),
    /// The contours could not be turned into polygons.
    #[error("Could not triangulate contours: {0}")]
    PolygonMesh(#[from] PolygonMeshError),
    /// The height detail could not be sampled.
    #[error("Could not build detail mesh: {0}")]
    DetailMesh(#[from] DetailPolygonMeshError),
    /// The runtime navigation mesh could not be compiled.
    #[error("Could not build Detour navmesh: {0}")]
    NavMesh(#[from] NavMeshError),
}
