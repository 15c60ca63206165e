//! Builds navigation meshes from host geometry and walks paths across them.

use std::{cell::RefCell, path::PathBuf};

use anyhow::Context as _;
use glam::Vec3;
use rayne_navigation::{
    BuildError, IndexWidth, IndexedMesh, LogCategory, NavigationMesh, NullLog, Path, RawMesh,
    recast::{NavmeshConfigBuilder, PartitionType},
};

fn floor(half_size: f32) -> IndexedMesh {
    IndexedMesh {
        positions: vec![
            Vec3::new(-half_size, 0.0, -half_size),
            Vec3::new(-half_size, 0.0, half_size),
            Vec3::new(half_size, 0.0, half_size),
            Vec3::new(half_size, 0.0, -half_size),
        ],
        indices: vec![0, 1, 2, 0, 2, 3],
    }
}

fn load_obj(name: &str) -> anyhow::Result<Vec<IndexedMesh>> {
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
    Ok(models
        .into_iter()
        .map(|model| IndexedMesh {
            positions: model
                .mesh
                .positions
                .chunks_exact(3)
                .map(|p| Vec3::new(p[0], p[1], p[2]))
                .collect(),
            indices: model.mesh.indices,
        })
        .collect())
}

fn build_courtyard(partition_type: PartitionType) -> anyhow::Result<NavigationMesh> {
    let models = load_obj("courtyard.obj")?;
    let sources: Vec<&dyn rayne_navigation::MeshSource> =
        models.iter().map(|model| model as _).collect();
    let mut mesh = NavigationMesh::new(NavmeshConfigBuilder {
        partition_type,
        ..Default::default()
    });
    mesh.generate_from_models(&sources, &NullLog)?;
    Ok(mesh)
}

#[track_caller]
fn assert_within(point: Vec3, expected: Vec3, tolerance: Vec3) {
    let offset = (point - expected).abs();
    assert!(
        offset.cmple(tolerance).all(),
        "{point} is not within {tolerance} of {expected}"
    );
}

#[test]
fn flat_square_leads_to_the_target() -> anyhow::Result<()> {
    let mut mesh = NavigationMesh::new(NavmeshConfigBuilder {
        cell_size: 0.3,
        partition_type: PartitionType::Monotone,
        ..Default::default()
    });
    mesh.generate_from_model(&floor(5.0), &NullLog)?;
    let poly_mesh = mesh.poly_mesh().context("no polygon mesh")?;
    assert!(poly_mesh.polygon_count() >= 1);

    let mut path = Path::new(&mesh);
    let target = Vec3::new(4.0, 0.0, 4.0);
    assert!(path.find_path(Vec3::new(-4.0, 0.0, -4.0), target));
    assert!(!path.is_at_end());
    assert_within(path.points()[0], target, path.tolerance);
    Ok(())
}

#[test]
fn empty_input_fails_immediately() {
    let mut mesh = NavigationMesh::default();
    let messages = RefCell::new(Vec::new());
    let log = |category: LogCategory, message: &str| {
        messages.borrow_mut().push((category, message.to_string()))
    };
    assert!(matches!(
        mesh.generate_from_models(&[], &log),
        Err(BuildError::EmptyInput)
    ));
    assert!(messages.borrow().is_empty());
    assert!(mesh.nav_mesh().is_none());
}

#[test]
fn large_polygons_skip_the_runtime_mesh() -> anyhow::Result<()> {
    let mut mesh = NavigationMesh::new(NavmeshConfigBuilder {
        verts_per_poly: 8.0,
        ..Default::default()
    });
    mesh.generate_from_model(&floor(5.0), &NullLog)?;
    let poly_mesh = mesh.poly_mesh().context("no polygon mesh")?;
    assert_eq!(poly_mesh.max_vertices_per_polygon, 8);
    for polygon in 0..poly_mesh.polygon_count() {
        assert!(poly_mesh.polygon_vertices(polygon).len() <= 8);
    }
    assert!(mesh.detail_mesh().is_some());
    assert!(mesh.nav_mesh().is_none());

    let mut path = Path::new(&mesh);
    assert!(!path.find_path(Vec3::new(-4.0, 0.0, -4.0), Vec3::new(4.0, 0.0, 4.0)));
    assert!(path.is_at_end());
    Ok(())
}

#[test]
fn walls_are_walked_around() -> anyhow::Result<()> {
    for partition_type in [
        PartitionType::Watershed,
        PartitionType::Monotone,
        PartitionType::Layers,
    ] {
        let mesh = build_courtyard(partition_type)?;
        let mut path = Path::new(&mesh);
        let (start, target) = (Vec3::new(-6.0, 0.0, 0.0), Vec3::new(6.0, 0.0, 0.0));
        assert!(path.find_path(start, target), "{partition_type:?}");

        let points = path.points();
        assert!(
            points.iter().any(|point| point.z > 5.0),
            "{partition_type:?} path crosses the wall: {points:?}"
        );
        assert_within(points[0], target, Vec3::new(0.5, 1.0, 0.5));
        assert_within(points[points.len() - 1], start, Vec3::new(0.5, 1.0, 0.5));
    }
    Ok(())
}

#[test]
fn every_pop_removes_one_waypoint() -> anyhow::Result<()> {
    let mesh = build_courtyard(PartitionType::Watershed)?;
    let mut path = Path::new(&mesh);
    assert!(path.find_path(Vec3::new(-6.0, 0.0, -6.0), Vec3::new(6.0, 0.0, -6.0)));

    let mut remaining = path.points().len();
    while let Some(next) = path.closest_point() {
        assert!(!path.is_at_end());
        assert_eq!(path.pop_point(), Some(next));
        remaining -= 1;
        assert_eq!(path.points().len(), remaining);
    }
    assert!(path.is_at_end());
    Ok(())
}

#[test]
fn endpoints_off_the_mesh_fail() -> anyhow::Result<()> {
    let mesh = build_courtyard(PartitionType::Watershed)?;
    let mut path = Path::new(&mesh);
    assert!(!path.find_path(Vec3::new(-6.0, 0.0, 0.0), Vec3::new(30.0, 0.0, 0.0)));
    assert!(!path.find_path(Vec3::new(-6.0, 20.0, 0.0), Vec3::new(6.0, 0.0, 0.0)));
    assert!(path.is_at_end());

    // A wider tolerance reaches the raised start again.
    path.tolerance = Vec3::new(4.0, 24.0, 4.0);
    assert!(path.find_path(Vec3::new(-6.0, 20.0, 0.0), Vec3::new(6.0, 0.0, 0.0)));
    Ok(())
}

#[test]
fn rebuilding_is_deterministic() -> anyhow::Result<()> {
    let first = build_courtyard(PartitionType::Watershed)?;
    let second = build_courtyard(PartitionType::Watershed)?;
    let (a, b) = (
        first.poly_mesh().context("no polygon mesh")?,
        second.poly_mesh().context("no polygon mesh")?,
    );
    assert_eq!(a.vertices.len(), b.vertices.len());
    assert_eq!(a.polygon_count(), b.polygon_count());
    assert_eq!(first.detail_mesh(), second.detail_mesh());
    assert_eq!(first.nav_mesh(), second.nav_mesh());
    Ok(())
}

#[test]
fn raw_buffers_build_the_same_mesh() -> anyhow::Result<()> {
    let typed = floor(5.0);
    // Position after a four byte attribute, followed by a padding float.
    let stride = 20;
    let mut vertices = vec![0u8; typed.positions.len() * stride];
    for (i, position) in typed.positions.iter().enumerate() {
        for (j, value) in position.to_array().iter().enumerate() {
            let at = i * stride + 4 + j * 4;
            vertices[at..at + 4].copy_from_slice(&value.to_ne_bytes());
        }
    }
    let indices = typed
        .indices
        .iter()
        .flat_map(|&index| (index as u16).to_ne_bytes())
        .collect();
    let raw = RawMesh::new(vertices, stride, 4, indices, IndexWidth::U16)?;

    let mut from_typed = NavigationMesh::default();
    from_typed.generate_from_model(&typed, &NullLog)?;
    let mut from_raw = NavigationMesh::default();
    from_raw.generate_from_model(&raw, &NullLog)?;
    assert_eq!(from_typed.poly_mesh(), from_raw.poly_mesh());
    Ok(())
}

#[test]
fn out_of_range_indices_are_reported() {
    let mut broken = floor(5.0);
    broken.indices[4] = 9;
    let mut mesh = NavigationMesh::default();
    assert!(matches!(
        mesh.generate_from_model(&broken, &NullLog),
        Err(BuildError::Geometry(_))
    ));
}

#[test]
fn detail_mesh_dumps_as_obj() -> anyhow::Result<()> {
    let mesh = build_courtyard(PartitionType::Monotone)?;
    let detail = mesh.detail_mesh().context("no detail mesh")?;
    let path = std::env::temp_dir().join(format!("courtyard-{}.obj", std::process::id()));

    mesh.dump_to_obj(&path)?;
    // Dumping again replaces the file.
    mesh.dump_to_obj(&path)?;
    let loaded = tobj::load_obj(
        &path,
        &tobj::LoadOptions {
            single_index: true,
            ..Default::default()
        },
    );
    std::fs::remove_file(&path)?;

    let (models, _) = loaded?;
    let indices: usize = models.iter().map(|model| model.mesh.indices.len()).sum();
    assert_eq!(indices, detail.triangles.len() * 3);
    Ok(())
}
