//! Compilation of a [`NavMesh`] from the output of the build pipeline.

use glam::Vec3;
use rayne_recast::{Aabb3d, DetailPolygonMesh, MESH_NULL_IDX, PolygonMesh};

use crate::{
    DetailTriangle, Link, NavMesh, NavMeshError, Poly, PolyDetail, PolyFlags, PolyRef,
    VERTS_PER_POLYGON,
    bv_tree::{self, BvItem},
};

/// Neighbour entries with this bit set mark edges without an internal neighbour.
const EXTERNAL_EDGE: u16 = 0x8000;

/// The largest vertex count a polygon mesh may have to be compiled.
const MAX_VERTICES: usize = 0xffff;

/// Salt stamped into every [`PolyRef`] of a freshly compiled mesh.
const INITIAL_SALT: u32 = 1;

/// The input of [`NavMesh::new`].
#[derive(Debug, Clone, Copy)]
pub struct NavMeshCreateParams<'a> {
    /// The polygon mesh to compile
    pub poly_mesh: &'a PolygonMesh,
    /// The height detail belonging to `poly_mesh`
    pub detail_mesh: &'a DetailPolygonMesh,
    /// The agent height in world units
    pub walkable_height: f32,
    /// The agent radius in world units
    pub walkable_radius: f32,
    /// The agent's maximum climb in world units
    pub walkable_climb: f32,
    /// The xz-plane cell size of the polygon mesh
    pub cell_size: f32,
    /// The y-axis cell size of the polygon mesh
    pub cell_height: f32,
    /// The world space bounds of the polygon mesh
    pub aabb: Aabb3d,
    /// Build a bounding volume tree to speed up polygon queries
    pub build_bv_tree: bool,
}

impl<'a> NavMeshCreateParams<'a> {
    /// Parameters taking cell sizes and bounds from `poly_mesh`, with zeroed agent dimensions
    /// and a bounding volume tree.
    pub fn new(poly_mesh: &'a PolygonMesh, detail_mesh: &'a DetailPolygonMesh) -> Self {
        Self {
            poly_mesh,
            detail_mesh,
            walkable_height: 0.0,
            walkable_radius: 0.0,
            walkable_climb: 0.0,
            cell_size: poly_mesh.cell_size,
            cell_height: poly_mesh.cell_height,
            aabb: poly_mesh.aabb,
            build_bv_tree: true,
        }
    }
}

impl NavMesh {
    /// Compiles a navigation mesh.
    ///
    /// Vertices are converted to world space, polygon neighbours become links, the per-polygon
    /// detail meshes are copied without the vertices they share with their polygon, and a
    /// bounding volume tree is built if requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the polygon mesh is empty, too large to be indexed,
    /// allows more than [`VERTS_PER_POLYGON`] vertices per polygon,
    /// or does not match the detail mesh.
    pub fn new(params: &NavMeshCreateParams) -> Result<Self, NavMeshError> {
        let mesh = params.poly_mesh;
        let detail = params.detail_mesh;
        let nvp = mesh.max_vertices_per_polygon as usize;
        let polygon_count = mesh.polygon_count();

        if !(3..=VERTS_PER_POLYGON).contains(&nvp) {
            return Err(NavMeshError::InvalidVertsPerPolygon {
                vertices_per_polygon: nvp,
            });
        }
        if mesh.vertices.len() >= MAX_VERTICES {
            return Err(NavMeshError::TooManyVertices {
                vertices: mesh.vertices.len(),
                max: MAX_VERTICES - 1,
            });
        }
        if polygon_count == 0 {
            return Err(NavMeshError::NoPolygons);
        }
        if polygon_count > PolyRef::MAX_POLYGONS {
            return Err(NavMeshError::TooManyPolygons {
                polygons: polygon_count,
                max: PolyRef::MAX_POLYGONS,
            });
        }
        if detail.meshes.len() != polygon_count {
            return Err(NavMeshError::DetailMeshMismatch {
                detail_meshes: detail.meshes.len(),
                polygons: polygon_count,
            });
        }

        let origin = params.aabb.min;
        let cell = Vec3::new(params.cell_size, params.cell_height, params.cell_size);
        let vertices = mesh
            .vertices
            .iter()
            .map(|v| origin + v.as_vec3() * cell)
            .collect();

        let polygons = (0..polygon_count)
            .map(|i| {
                let mut poly = Poly {
                    flags: PolyFlags::from_bits_retain(mesh.flags[i]),
                    area: mesh.areas[i].0,
                    ..Default::default()
                };
                for (j, (&vertex, &neighbor)) in
                    mesh.polygon(i).iter().zip(mesh.neighbors(i)).enumerate()
                {
                    if vertex == MESH_NULL_IDX {
                        break;
                    }
                    poly.vertices[j] = vertex;
                    // Border and portal edges have no internal neighbour.
                    poly.neighbors[j] = if neighbor & EXTERNAL_EDGE != 0 {
                        0
                    } else {
                        neighbor + 1
                    };
                    poly.vertex_count += 1;
                }
                poly
            })
            .collect();

        let quant_factor = 1.0 / params.cell_size;
        let mut nav_mesh = Self {
            salt: INITIAL_SALT,
            aabb: params.aabb,
            walkable_height: params.walkable_height,
            walkable_radius: params.walkable_radius,
            walkable_climb: params.walkable_climb,
            quant_factor,
            vertices,
            polygons,
            links: Vec::new(),
            detail_meshes: Vec::with_capacity(polygon_count),
            detail_vertices: Vec::new(),
            detail_triangles: Vec::with_capacity(detail.triangles.len()),
            bv_tree: Vec::new(),
        };

        nav_mesh.copy_detail(detail);
        nav_mesh.connect_internal_links();
        if params.build_bv_tree {
            nav_mesh.bv_tree = build_bv_tree(detail, origin, quant_factor);
        }

        tracing::debug!(
            "Compiled navigation mesh with {} polygons, {} links and {} tree nodes",
            nav_mesh.polygons.len(),
            nav_mesh.links.len(),
            nav_mesh.bv_tree.len()
        );
        Ok(nav_mesh)
    }

    fn copy_detail(&mut self, detail: &DetailPolygonMesh) {
        for (poly, submesh) in self.polygons.iter().zip(&detail.meshes) {
            // The first vertices of each sub-mesh are the polygon's own.
            let own = poly.vertex_count as usize;
            let extra = submesh.vertex_count.saturating_sub(own);
            self.detail_meshes.push(PolyDetail {
                vertex_base: self.detail_vertices.len() as u32,
                vertex_count: extra as u32,
                triangle_base: submesh.first_triangle_index as u32,
                triangle_count: submesh.triangle_count as u32,
            });
            let first = submesh.first_vertex_index + own;
            self.detail_vertices.extend(
                detail.vertices[first..first + extra]
                    .iter()
                    .map(|&v| Vec3::from(v)),
            );
        }

        self.detail_triangles.extend(
            detail
                .triangles
                .iter()
                .zip(&detail.triangle_flags)
                .map(|(&indices, &flags)| DetailTriangle { indices, flags }),
        );
    }

    fn connect_internal_links(&mut self) {
        let salt = self.salt;
        let mut links = Vec::new();
        for poly in &mut self.polygons {
            poly.first_link = links.len() as u32;
            // Last edge first, so links are visited in the same order as a prepended list.
            for edge in (0..poly.vertex_count as usize).rev() {
                let neighbor = poly.neighbors[edge];
                if neighbor == 0 {
                    continue;
                }
                let Some(poly_ref) = PolyRef::encode(salt, 0, (neighbor - 1) as u32) else {
                    continue;
                };
                links.push(Link {
                    poly_ref,
                    edge: edge as u8,
                });
            }
            poly.link_count = (links.len() as u32 - poly.first_link) as u8;
        }
        self.links = links;
    }
}

fn build_bv_tree(
    detail: &DetailPolygonMesh,
    origin: Vec3,
    quant_factor: f32,
) -> Vec<bv_tree::BvNode> {
    let mut items: Vec<BvItem> = detail
        .meshes
        .iter()
        .enumerate()
        .map(|(index, submesh)| {
            let first = submesh.first_vertex_index;
            let (min, max) = detail.vertices[first..first + submesh.vertex_count]
                .iter()
                .map(|&v| Vec3::from(v))
                .fold((Vec3::MAX, Vec3::MIN), |(min, max), v| {
                    (min.min(v), max.max(v))
                });
            BvItem::new(index, min, max, origin, quant_factor)
        })
        .collect();
    bv_tree::build(&mut items)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rayne_recast::{AreaType, RegionId, SubMesh};

    use super::*;

    /// Two unit squares sharing the edge at x = 1, built by hand.
    fn two_squares(nvp: u16) -> (PolygonMesh, DetailPolygonMesh) {
        use glam::U16Vec3;

        let null = MESH_NULL_IDX;
        let pad = |mut v: Vec<u16>| {
            v.resize(nvp as usize, null);
            v
        };
        let mut polygons = pad(vec![0, 1, 2, 3]);
        polygons.extend(pad(vec![3, 2, 4, 5]));
        let mut polygon_neighbors = pad(vec![null, null, 1, null]);
        polygon_neighbors.extend(pad(vec![0, null, null, 0x8000]));
        let poly_mesh = PolygonMesh {
            vertices: vec![
                U16Vec3::new(0, 0, 0),
                U16Vec3::new(0, 0, 1),
                U16Vec3::new(1, 0, 1),
                U16Vec3::new(1, 0, 0),
                U16Vec3::new(2, 0, 1),
                U16Vec3::new(2, 0, 0),
            ],
            polygons,
            polygon_neighbors,
            regions: vec![RegionId::from(1), RegionId::from(1)],
            flags: vec![1, 1],
            areas: vec![AreaType(0), AreaType(0)],
            max_vertices_per_polygon: nvp,
            aabb: Aabb3d::new(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0)),
            cell_size: 1.0,
            cell_height: 1.0,
            border_size: 0,
            max_edge_error: 1.3,
        };

        let square = |x: f32| {
            [
                Vec3::new(x, 0.0, 0.0),
                Vec3::new(x, 0.0, 1.0),
                Vec3::new(x + 1.0, 0.0, 1.0),
                Vec3::new(x + 1.0, 0.0, 0.0),
            ]
        };
        let vertices = square(0.0)
            .into_iter()
            .chain([Vec3::new(0.5, 0.0, 0.5)])
            .chain(square(1.0))
            .map(Into::into)
            .collect();
        let detail_mesh = DetailPolygonMesh {
            meshes: vec![
                SubMesh {
                    first_vertex_index: 0,
                    vertex_count: 5,
                    first_triangle_index: 0,
                    triangle_count: 4,
                },
                SubMesh {
                    first_vertex_index: 5,
                    vertex_count: 4,
                    first_triangle_index: 4,
                    triangle_count: 2,
                },
            ],
            vertices,
            triangles: vec![[0, 1, 4], [1, 2, 4], [2, 3, 4], [3, 0, 4], [0, 1, 2], [0, 2, 3]],
            triangle_flags: vec![0x1, 0x1, 0x1, 0x1, 0x05, 0x14],
        };
        (poly_mesh, detail_mesh)
    }

    #[test]
    fn polygons_and_links_are_compiled() {
        let (poly_mesh, detail_mesh) = two_squares(6);
        let nav_mesh = NavMesh::new(&NavMeshCreateParams::new(&poly_mesh, &detail_mesh)).unwrap();

        assert_eq!(nav_mesh.polygon_count(), 2);
        assert_eq!(nav_mesh.vertices().len(), 6);
        let first = &nav_mesh.polygons()[0];
        assert_eq!(first.vertex_count, 4);
        assert_eq!(first.neighbors[..4], [0, 0, 2, 0]);
        assert_eq!(first.flags, PolyFlags::WALK);
        // The portal flagged edge of the second square is a border.
        assert_eq!(nav_mesh.polygons()[1].neighbors[..4], [1, 0, 0, 0]);

        let links = nav_mesh.poly_links(first);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].edge, 2);
        assert_eq!(nav_mesh.poly_index(links[0].poly_ref), Some(1));
        assert_eq!(nav_mesh.bv_tree().len(), 3);
    }

    #[test]
    fn only_extra_detail_vertices_are_kept() {
        let (poly_mesh, detail_mesh) = two_squares(6);
        let nav_mesh = NavMesh::new(&NavMeshCreateParams::new(&poly_mesh, &detail_mesh)).unwrap();

        assert_eq!(nav_mesh.detail_vertices().len(), 1);
        assert_relative_eq!(nav_mesh.detail_vertices()[0].x, 0.5);
        assert_eq!(nav_mesh.detail_meshes()[0].vertex_count, 1);
        assert_eq!(nav_mesh.detail_meshes()[1].vertex_count, 0);
        assert_eq!(nav_mesh.detail_meshes()[1].vertex_base, 1);
        assert_eq!(nav_mesh.detail_triangles().len(), 6);
    }

    #[test]
    fn vertices_are_converted_to_world_space() {
        let (mut poly_mesh, detail_mesh) = two_squares(6);
        poly_mesh.aabb.min = Vec3::new(10.0, 1.0, -5.0);
        poly_mesh.cell_size = 0.5;
        poly_mesh.cell_height = 0.25;
        let nav_mesh = NavMesh::new(&NavMeshCreateParams::new(&poly_mesh, &detail_mesh)).unwrap();
        assert_relative_eq!(nav_mesh.vertices()[4].x, 11.0);
        assert_relative_eq!(nav_mesh.vertices()[4].y, 1.0);
        assert_relative_eq!(nav_mesh.vertices()[4].z, -4.5);
    }

    #[test]
    fn bv_tree_is_optional() {
        let (poly_mesh, detail_mesh) = two_squares(6);
        let params = NavMeshCreateParams {
            build_bv_tree: false,
            ..NavMeshCreateParams::new(&poly_mesh, &detail_mesh)
        };
        let nav_mesh = NavMesh::new(&params).unwrap();
        assert!(nav_mesh.bv_tree().is_empty());
    }

    #[test]
    fn invalid_meshes_are_rejected() {
        let (poly_mesh, detail_mesh) = two_squares(8);
        assert!(matches!(
            NavMesh::new(&NavMeshCreateParams::new(&poly_mesh, &detail_mesh)),
            Err(NavMeshError::InvalidVertsPerPolygon {
                vertices_per_polygon: 8
            })
        ));

        let (mut poly_mesh, detail_mesh) = two_squares(6);
        poly_mesh.areas.clear();
        assert!(matches!(
            NavMesh::new(&NavMeshCreateParams::new(&poly_mesh, &detail_mesh)),
            Err(NavMeshError::NoPolygons)
        ));

        let (poly_mesh, mut detail_mesh) = two_squares(6);
        detail_mesh.meshes.pop();
        assert!(matches!(
            NavMesh::new(&NavMeshCreateParams::new(&poly_mesh, &detail_mesh)),
            Err(NavMeshError::DetailMeshMismatch { .. })
        ));
    }
}
