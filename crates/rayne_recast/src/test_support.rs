//! Small geometry fixtures shared by the unit tests.

use glam::{UVec3, Vec3, Vec3A};

use crate::{Aabb3d, AreaType, CompactHeightfield, Heightfield, HeightfieldBuilder, TriMesh};

/// A walkable quad covering `[0, size]` on the xz-plane at height `y`.
pub(crate) fn flat_trimesh(size: f32, y: f32) -> TriMesh {
    TriMesh {
        vertices: vec![
            Vec3A::new(0.0, y, 0.0),
            Vec3A::new(0.0, y, size),
            Vec3A::new(size, y, size),
            Vec3A::new(size, y, 0.0),
        ],
        indices: vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
        area_types: vec![AreaType::DEFAULT_WALKABLE; 2],
    }
}

/// An empty heightfield of `size` x `size` cells with a cell size of one.
pub(crate) fn heightfield(size: f32) -> Heightfield {
    HeightfieldBuilder {
        aabb: Aabb3d::new(Vec3::ZERO, [size, 4.0, size]),
        cell_size: 1.0,
        cell_height: 0.5,
    }
    .build()
    .unwrap()
}

/// A flat square of `size` x `size` walkable cells.
pub(crate) fn flat_compact_heightfield(size: f32) -> CompactHeightfield {
    let mut heightfield = heightfield(size);
    heightfield
        .rasterize_triangles(&flat_trimesh(size, 1.0), 1)
        .unwrap();
    heightfield.into_compact(2, 1).unwrap()
}
