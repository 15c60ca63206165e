//! Runs the whole build pipeline on generated geometry and on OBJ files.

use std::path::PathBuf;

use anyhow::Context as _;
use glam::{UVec3, Vec3, Vec3A};
use rayne_recast::{
    AreaType, CompactHeightfield, DetailPolygonMesh, HeightfieldBuilder, MESH_NULL_IDX,
    NavmeshConfig, NavmeshConfigBuilder, PartitionType, PolygonMesh, RegionId, TriMesh,
};

fn cuboid(min: Vec3, max: Vec3) -> TriMesh {
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
        // top
        UVec3::new(4, 5, 6),
        UVec3::new(4, 6, 7),
        // sides
        UVec3::new(0, 1, 5),
        UVec3::new(0, 5, 4),
        UVec3::new(1, 2, 6),
        UVec3::new(1, 6, 5),
        UVec3::new(2, 3, 7),
        UVec3::new(2, 7, 6),
        UVec3::new(3, 0, 4),
        UVec3::new(3, 4, 7),
    ];
    let area_types = vec![AreaType::NOT_WALKABLE; indices.len()];
    TriMesh {
        vertices,
        indices,
        area_types,
    }
}

fn floor_with_pillar() -> TriMesh {
    let mut trimesh = TriMesh {
        vertices: vec![
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 10.0),
            Vec3A::new(10.0, 0.0, 10.0),
            Vec3A::new(10.0, 0.0, 0.0),
        ],
        indices: vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
        area_types: vec![AreaType::NOT_WALKABLE; 2],
    };
    assert!(trimesh.extend(cuboid(Vec3::new(4.0, 0.0, 4.0), Vec3::new(6.0, 3.0, 6.0))));
    trimesh
}

fn load_obj(name: &str) -> anyhow::Result<TriMesh> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("assets")
        .join(name);
    let (models, _materials) = tobj::load_obj(
        &path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .with_context(|| format!("failed to load {}", path.display()))?;

    let mut trimesh = TriMesh::default();
    for model in models {
        let mesh = model.mesh;
        let triangles = mesh.indices.len() / 3;
        let part = TriMesh {
            vertices: mesh
                .positions
                .chunks_exact(3)
                .map(|p| Vec3A::new(p[0], p[1], p[2]))
                .collect(),
            indices: mesh
                .indices
                .chunks_exact(3)
                .map(|i| UVec3::new(i[0], i[1], i[2]))
                .collect(),
            area_types: vec![AreaType::NOT_WALKABLE; triangles],
        };
        anyhow::ensure!(trimesh.extend(part), "too many vertices in {name}");
    }
    Ok(trimesh)
}

fn partitioned(
    mut trimesh: TriMesh,
    partition_type: PartitionType,
) -> anyhow::Result<(NavmeshConfig, CompactHeightfield)> {
    let config = NavmeshConfigBuilder {
        aabb: trimesh.compute_aabb().context("empty geometry")?,
        partition_type,
        ..Default::default()
    }
    .build();

    trimesh.mark_walkable_triangles(config.walkable_slope_angle);

    let mut heightfield = HeightfieldBuilder {
        aabb: config.aabb,
        cell_size: config.cell_size,
        cell_height: config.cell_height,
    }
    .build()?;
    heightfield.rasterize_triangles(&trimesh, config.walkable_climb)?;

    heightfield.filter_low_hanging_walkable_obstacles(config.walkable_climb);
    heightfield.filter_ledge_spans(config.walkable_height, config.walkable_climb);
    heightfield.filter_walkable_low_height_spans(config.walkable_height);

    let mut compact = heightfield.into_compact(config.walkable_height, config.walkable_climb)?;
    compact.erode_walkable_area(config.walkable_radius);
    compact.partition(
        config.partition_type,
        config.border_size,
        config.min_region_area,
        config.merge_region_area,
    )?;
    Ok((config, compact))
}

fn build(
    trimesh: TriMesh,
    partition_type: PartitionType,
) -> anyhow::Result<(NavmeshConfig, PolygonMesh, DetailPolygonMesh)> {
    let (config, compact) = partitioned(trimesh, partition_type)?;
    let poly_mesh = compact
        .build_contours(
            config.max_simplification_error,
            config.max_edge_len,
            config.contour_flags,
        )?
        .into_polygon_mesh(config.max_vertices_per_polygon)?;
    let detail_mesh = DetailPolygonMesh::new(
        &poly_mesh,
        &compact,
        config.detail_sample_dist,
        config.detail_sample_max_error,
    )?;
    Ok((config, poly_mesh, detail_mesh))
}

#[track_caller]
fn assert_well_formed(config: &NavmeshConfig, mesh: &PolygonMesh, detail: &DetailPolygonMesh) {
    assert!(mesh.polygon_count() > 0);
    assert_eq!(detail.meshes.len(), mesh.polygon_count());
    for i in 0..mesh.polygon_count() {
        let vertices = mesh.polygon_vertices(i);
        assert!(vertices.len() >= 3);
        assert!(vertices.len() <= config.max_vertices_per_polygon as usize);
        for (edge, &neighbor) in mesh.neighbors(i).iter().enumerate().take(vertices.len()) {
            if neighbor == MESH_NULL_IDX {
                continue;
            }
            // Links are symmetric.
            let neighbor = neighbor as usize;
            assert!(
                mesh.neighbors(neighbor).contains(&(i as u16)),
                "polygon {i} edge {edge} links to {neighbor} without a link back"
            );
        }
    }
}

#[test]
fn floor_with_pillar_builds_for_every_partition() -> anyhow::Result<()> {
    for partition_type in [
        PartitionType::Watershed,
        PartitionType::Monotone,
        PartitionType::Layers,
    ] {
        let (config, mesh, detail) = build(floor_with_pillar(), partition_type)?;
        assert_well_formed(&config, &mesh, &detail);

        // The pillar is cut out of the floor.
        for vertex in &mesh.vertices {
            let x = config.aabb.min.x + vertex.x as f32 * config.cell_size;
            let z = config.aabb.min.z + vertex.z as f32 * config.cell_size;
            let inside = (4.5..5.5).contains(&x) && (4.5..5.5).contains(&z);
            assert!(!inside, "{partition_type:?}: vertex at ({x}, {z})");
        }
    }
    Ok(())
}

#[test]
fn region_borders_are_tagged_on_contours() -> anyhow::Result<()> {
    const OFFSETS: [(i32, i32); 4] = [(-1, 0), (0, 1), (1, 0), (0, -1)];
    for partition_type in [
        PartitionType::Watershed,
        PartitionType::Monotone,
        PartitionType::Layers,
    ] {
        let (config, compact) = partitioned(floor_with_pillar(), partition_type)?;
        let contours = compact.build_contours(
            config.max_simplification_error,
            config.max_edge_len,
            config.contour_flags,
        )?;

        for z in 0..compact.height {
            for x in 0..compact.width {
                for i in compact.cell_at(x, z).index_range() {
                    let region = compact.spans[i].region;
                    if !region.is_region() {
                        continue;
                    }
                    for (dir, (dx, dz)) in OFFSETS.into_iter().enumerate() {
                        let Some(con) = compact.spans[i].con(dir as u8) else {
                            continue;
                        };
                        let (nx, nz) = ((x as i32 + dx) as u16, (z as i32 + dz) as u16);
                        let j = compact.cell_at(nx, nz).index() as usize + con as usize;
                        let neighbor = compact.spans[j].region;
                        if !neighbor.is_region() || neighbor == region {
                            continue;
                        }
                        let tagged = contours
                            .contours
                            .iter()
                            .filter(|contour| contour.region == region)
                            .flat_map(|contour| &contour.raw_vertices)
                            .any(|&(_, tag)| RegionId::from(tag) == neighbor);
                        assert!(
                            tagged,
                            "{partition_type:?}: region {region:?} borders {neighbor:?} at ({x}, {z}) \
                             without a contour edge tagged with it"
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

#[test]
fn rebuilding_is_deterministic() -> anyhow::Result<()> {
    let (_, first_mesh, first_detail) = build(floor_with_pillar(), PartitionType::Watershed)?;
    let (_, second_mesh, second_detail) = build(floor_with_pillar(), PartitionType::Watershed)?;
    assert_eq!(first_mesh.polygon_count(), second_mesh.polygon_count());
    assert_eq!(first_mesh.vertices, second_mesh.vertices);
    assert_eq!(first_detail, second_detail);
    Ok(())
}

#[test]
fn obj_scene_keeps_both_floor_levels() -> anyhow::Result<()> {
    let (config, mesh, detail) = build(load_obj("plaza.obj")?, PartitionType::Watershed)?;
    assert_well_formed(&config, &mesh, &detail);

    // Detail vertices sit about one cell above the floor they were sampled from.
    assert!(detail.vertices.iter().any(|v| v.y < 0.6));
    assert!(detail.vertices.iter().any(|v| v.y > 1.5 && v.y < 2.0));
    assert!(
        detail
            .vertices
            .iter()
            .all(|v| v.y >= config.aabb.min.y && v.y <= config.aabb.max.y + 1.0)
    );
    Ok(())
}

#[test]
fn detail_mesh_obj_export_loads_back() -> anyhow::Result<()> {
    let (_, _, detail) = build(floor_with_pillar(), PartitionType::Monotone)?;
    let mut obj = Vec::new();
    detail.write_obj(&mut obj)?;

    let (models, _) = tobj::load_obj_buf(
        &mut obj.as_slice(),
        &tobj::LoadOptions {
            single_index: true,
            ..Default::default()
        },
        |_| Ok(Default::default()),
    )?;
    assert_eq!(models.len(), 1);
    let mesh = &models[0].mesh;
    assert_eq!(mesh.indices.len(), detail.triangles.len() * 3);
    assert!(mesh.positions.len() <= detail.vertices.len() * 3);
    assert!(mesh.indices.iter().all(|&i| (i as usize) < detail.vertices.len()));
    Ok(())
}

#[cfg(feature = "serialize")]
#[test]
fn built_meshes_survive_json() -> anyhow::Result<()> {
    let (config, mesh, detail) = build(floor_with_pillar(), PartitionType::Watershed)?;
    let config_back: NavmeshConfig = serde_json::from_str(&serde_json::to_string(&config)?)?;
    let mesh_back: PolygonMesh = serde_json::from_str(&serde_json::to_string(&mesh)?)?;
    let detail_back: DetailPolygonMesh = serde_json::from_str(&serde_json::to_string(&detail)?)?;
    assert_eq!(config_back, config);
    assert_eq!(mesh_back, mesh);
    assert_eq!(detail_back, detail);
    Ok(())
}
