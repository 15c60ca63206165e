//! Navigation meshes built through the whole pipeline for the unit tests.

use glam::{UVec3, Vec3, Vec3A};
use rayne_recast::{
    AreaType, DetailPolygonMesh, HeightfieldBuilder, NavmeshConfigBuilder, PartitionType, TriMesh,
};

use crate::{NavMesh, NavMeshCreateParams, PolyFlags};

/// An upward facing quad from `min` to `max` on the xz-plane at height `y`.
fn quad(min: [f32; 2], max: [f32; 2], y: f32) -> TriMesh {
    TriMesh {
        vertices: vec![
            Vec3A::new(min[0], y, min[1]),
            Vec3A::new(min[0], y, max[1]),
            Vec3A::new(max[0], y, max[1]),
            Vec3A::new(max[0], y, min[1]),
        ],
        indices: vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
        area_types: vec![AreaType::NOT_WALKABLE; 2],
    }
}

/// A closed box without its bottom face.
fn block(min: Vec3, max: Vec3) -> TriMesh {
    let vertices = vec![
        Vec3A::new(min.x, min.y, min.z),
        Vec3A::new(min.x, min.y, max.z),
        Vec3A::new(max.x, min.y, max.z),
        Vec3A::new(max.x, min.y, min.z),
        Vec3A::new(min.x, max.y, min.z),
        Vec3A::new(min.x, max.y, max.z),
        Vec3A::new(max.x, max.y, max.z),
        Vec3A::new(max.x, max.y, min.z),
    ];
    let indices = vec![
        UVec3::new(4, 5, 6),
        UVec3::new(4, 6, 7),
        UVec3::new(0, 1, 5),
        UVec3::new(0, 5, 4),
        UVec3::new(1, 2, 6),
        UVec3::new(1, 6, 5),
        UVec3::new(2, 3, 7),
        UVec3::new(2, 7, 6),
        UVec3::new(3, 0, 4),
        UVec3::new(3, 4, 7),
    ];
    TriMesh {
        area_types: vec![AreaType::NOT_WALKABLE; indices.len()],
        vertices,
        indices,
    }
}

/// Runs the build pipeline with default agent settings and compiles the result.
pub(crate) fn build_nav_mesh(mut trimesh: TriMesh, partition_type: PartitionType) -> NavMesh {
    let settings = NavmeshConfigBuilder {
        aabb: trimesh.compute_aabb().unwrap(),
        partition_type,
        ..Default::default()
    };
    let config = settings.clone().build();

    trimesh.mark_walkable_triangles(config.walkable_slope_angle);
    let mut heightfield = HeightfieldBuilder {
        aabb: config.aabb,
        cell_size: config.cell_size,
        cell_height: config.cell_height,
    }
    .build()
    .unwrap();
    heightfield
        .rasterize_triangles(&trimesh, config.walkable_climb)
        .unwrap();
    heightfield.filter_low_hanging_walkable_obstacles(config.walkable_climb);
    heightfield.filter_ledge_spans(config.walkable_height, config.walkable_climb);
    heightfield.filter_walkable_low_height_spans(config.walkable_height);

    let mut compact = heightfield
        .into_compact(config.walkable_height, config.walkable_climb)
        .unwrap();
    compact.erode_walkable_area(config.walkable_radius);
    compact
        .partition(
            config.partition_type,
            config.border_size,
            config.min_region_area,
            config.merge_region_area,
        )
        .unwrap();

    let mut poly_mesh = compact
        .build_contours(
            config.max_simplification_error,
            config.max_edge_len,
            config.contour_flags,
        )
        .unwrap()
        .into_polygon_mesh(config.max_vertices_per_polygon)
        .unwrap();
    let detail_mesh = DetailPolygonMesh::new(
        &poly_mesh,
        &compact,
        config.detail_sample_dist,
        config.detail_sample_max_error,
    )
    .unwrap();

    poly_mesh.areas.fill(AreaType(0));
    poly_mesh.flags.fill(PolyFlags::WALK.bits());

    NavMesh::new(&NavMeshCreateParams {
        walkable_height: settings.agent_height,
        walkable_radius: settings.agent_radius,
        walkable_climb: settings.agent_max_climb,
        ..NavMeshCreateParams::new(&poly_mesh, &detail_mesh)
    })
    .unwrap()
}

/// A 10 x 10 floor at height zero centered on the origin.
pub(crate) fn flat_nav_mesh() -> NavMesh {
    build_nav_mesh(quad([-5.0, -5.0], [5.0, 5.0], 0.0), PartitionType::Monotone)
}

/// A floor covering `x < -1` and `z < -1` of the 10 x 10 square around the origin.
pub(crate) fn l_shaped_nav_mesh() -> NavMesh {
    let mut trimesh = quad([-5.0, -5.0], [-1.0, 5.0], 0.0);
    assert!(trimesh.extend(quad([-1.0, -5.0], [5.0, -1.0], 0.0)));
    build_nav_mesh(trimesh, PartitionType::Watershed)
}

/// A 20 x 20 floor with a 6 x 6 block on it whose top is too high to climb.
pub(crate) fn two_level_nav_mesh() -> NavMesh {
    let mut trimesh = quad([-10.0, -10.0], [10.0, 10.0], 0.0);
    assert!(trimesh.extend(block(Vec3::ZERO, Vec3::new(6.0, 1.5, 6.0))));
    build_nav_mesh(trimesh, PartitionType::Watershed)
}
