#![doc = include_str!("../../../readme.md")]

mod error;
mod geometry;
mod log;
mod mesh;
mod path;

pub use error::BuildError;
pub use geometry::{
    CollectedGeometry, GeometryCollector, GeometryError, IndexWidth, IndexedMesh, MeshSource,
    RawMesh,
};
pub use log::{BuildLog, BuildTimings, LogCategory, NullLog, TimerCategory, TracingLog};
pub use mesh::NavigationMesh;
pub use path::{MAX_PATH_NODES, Path};

pub use rayne_detour as detour;
pub use rayne_recast as recast;
