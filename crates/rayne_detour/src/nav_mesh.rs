use std::ops::Deref;

use glam::{U16Vec3, Vec3};
use rayne_recast::Aabb3d;
use thiserror::Error;

use crate::{
    BvNode, PolyFlags, PolyRef, bv_tree,
    math::{
        closest_height_point_triangle, distance_pt_poly_edges_sqr, distance_pt_seg_sqr_2d,
        point_in_polygon,
    },
};

/// The maximum number of vertices per navigation polygon.
pub const VERTS_PER_POLYGON: usize = 6;

/// Flag of a detail triangle edge lying on the boundary of its polygon.
const DETAIL_EDGE_BOUNDARY: u8 = 0x1;

/// A polygon of the navigation mesh.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Poly {
    /// Indices into [`NavMesh::vertices`]. Only the first `vertex_count` are used.
    pub vertices: [u16; VERTS_PER_POLYGON],
    /// Per edge: `0` for a border edge, otherwise the index of the neighbouring polygon plus one.
    pub neighbors: [u16; VERTS_PER_POLYGON],
    /// Number of used vertices
    pub vertex_count: u8,
    /// User defined flags
    pub flags: PolyFlags,
    /// User defined area id
    pub area: u8,
    /// Index of the first link of the polygon in [`NavMesh::links`]
    pub first_link: u32,
    /// Number of links of the polygon
    pub link_count: u8,
}

impl Poly {
    /// The used vertex indices.
    #[inline]
    pub fn vertex_indices(&self) -> &[u16] {
        &self.vertices[..self.vertex_count as usize]
    }
}

/// A connection from a polygon edge to the polygon on the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Link {
    /// The neighbouring polygon
    pub poly_ref: PolyRef,
    /// The edge of the owning polygon the link crosses
    pub edge: u8,
}

/// The range of detail vertices and triangles belonging to one polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyDetail {
    /// Index of the first extra vertex in [`NavMesh::detail_vertices`]
    pub vertex_base: u32,
    /// Number of extra vertices, not counting the polygon's own vertices
    pub vertex_count: u32,
    /// Index of the first triangle in [`NavMesh::detail_triangles`]
    pub triangle_base: u32,
    /// Number of triangles
    pub triangle_count: u32,
}

/// A triangle of the height detail of a polygon.
///
/// Indices below the polygon's vertex count refer to the polygon's own vertices, larger indices
/// refer to the polygon's extra detail vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailTriangle {
    /// Vertex indices
    pub indices: [u8; 3],
    /// Edge flags, two bits per edge starting with the edge from vertex 0 to vertex 1
    pub flags: u8,
}

impl DetailTriangle {
    #[inline]
    fn is_boundary_edge(&self, edge: usize) -> bool {
        (self.flags >> (edge * 2)) & 0x3 & DETAIL_EDGE_BOUNDARY != 0
    }

    #[inline]
    fn has_boundary_edge(&self) -> bool {
        (0..3).any(|edge| self.is_boundary_edge(edge))
    }
}

/// An immutable single tile navigation mesh.
///
/// Built with [`NavMesh::new`] from a [`NavMeshCreateParams`](crate::NavMeshCreateParams).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMesh {
    pub(crate) salt: u32,
    pub(crate) aabb: Aabb3d,
    pub(crate) walkable_height: f32,
    pub(crate) walkable_radius: f32,
    pub(crate) walkable_climb: f32,
    pub(crate) quant_factor: f32,
    pub(crate) vertices: Vec<Vec3>,
    pub(crate) polygons: Vec<Poly>,
    pub(crate) links: Vec<Link>,
    pub(crate) detail_meshes: Vec<PolyDetail>,
    pub(crate) detail_vertices: Vec<Vec3>,
    pub(crate) detail_triangles: Vec<DetailTriangle>,
    pub(crate) bv_tree: Vec<BvNode>,
}

/// Errors that can occur when compiling a [`NavMesh`].
#[derive(Error, Debug)]
pub enum NavMeshError {
    /// The polygon mesh is empty.
    #[error("The polygon mesh contains no polygons")]
    NoPolygons,
    /// The polygon mesh has more vertices than a polygon can index.
    #[error("The polygon mesh has {vertices} vertices, at most {max} are supported")]
    TooManyVertices {
        /// Vertex count of the polygon mesh
        vertices: usize,
        /// The supported maximum
        max: usize,
    },
    /// The polygon mesh has more polygons than a [`PolyRef`] can address.
    #[error("The polygon mesh has {polygons} polygons, at most {max} are supported")]
    TooManyPolygons {
        /// Polygon count of the polygon mesh
        polygons: usize,
        /// The supported maximum
        max: usize,
    },
    /// The polygon mesh allows more vertices per polygon than the navigation mesh supports.
    #[error(
        "The polygon mesh allows {vertices_per_polygon} vertices per polygon, expected 3 to {max}",
        max = VERTS_PER_POLYGON
    )]
    InvalidVertsPerPolygon {
        /// The maximum vertices per polygon of the polygon mesh
        vertices_per_polygon: usize,
    },
    /// The detail mesh does not belong to the polygon mesh.
    #[error("The detail mesh has {detail_meshes} sub-meshes but the polygon mesh has {polygons} polygons")]
    DetailMeshMismatch {
        /// Sub-mesh count of the detail mesh
        detail_meshes: usize,
        /// Polygon count of the polygon mesh
        polygons: usize,
    },
}

/// World space positions of a polygon's vertices.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PolyPositions {
    positions: [Vec3; VERTS_PER_POLYGON],
    len: usize,
}

impl Deref for PolyPositions {
    type Target = [Vec3];

    fn deref(&self) -> &[Vec3] {
        &self.positions[..self.len]
    }
}

impl NavMesh {
    /// The world space bounds of the mesh.
    #[inline]
    pub fn aabb(&self) -> Aabb3d {
        self.aabb
    }

    /// The agent height the mesh was built for, in world units.
    #[inline]
    pub fn walkable_height(&self) -> f32 {
        self.walkable_height
    }

    /// The agent radius the mesh was built for, in world units.
    #[inline]
    pub fn walkable_radius(&self) -> f32 {
        self.walkable_radius
    }

    /// The maximum ledge height the agent can climb, in world units.
    #[inline]
    pub fn walkable_climb(&self) -> f32 {
        self.walkable_climb
    }

    /// The polygon vertices in world space.
    #[inline]
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    /// All polygons, indexed by [`PolyRef::poly`].
    #[inline]
    pub fn polygons(&self) -> &[Poly] {
        &self.polygons
    }

    /// All links. Each polygon owns the range described by [`Poly::first_link`] and [`Poly::link_count`].
    #[inline]
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// The detail sub-mesh ranges, one per polygon.
    #[inline]
    pub fn detail_meshes(&self) -> &[PolyDetail] {
        &self.detail_meshes
    }

    /// The extra detail vertices in world space.
    #[inline]
    pub fn detail_vertices(&self) -> &[Vec3] {
        &self.detail_vertices
    }

    /// The detail triangles.
    #[inline]
    pub fn detail_triangles(&self) -> &[DetailTriangle] {
        &self.detail_triangles
    }

    /// The flattened bounding volume tree. Empty when the mesh was built without one.
    #[inline]
    pub fn bv_tree(&self) -> &[BvNode] {
        &self.bv_tree
    }

    /// The number of polygons.
    #[inline]
    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    /// The reference of the polygon at `index`, if it exists.
    pub fn poly_ref(&self, index: usize) -> Option<PolyRef> {
        if index >= self.polygons.len() {
            return None;
        }
        PolyRef::encode(self.salt, 0, index as u32)
    }

    /// The index of the polygon `poly_ref` points to, if the reference belongs to this mesh.
    pub fn poly_index(&self, poly_ref: PolyRef) -> Option<usize> {
        let index = poly_ref.poly() as usize;
        (poly_ref.salt() == self.salt && poly_ref.tile() == 0 && index < self.polygons.len())
            .then_some(index)
    }

    /// The polygon `poly_ref` points to, if the reference belongs to this mesh.
    #[inline]
    pub fn polygon(&self, poly_ref: PolyRef) -> Option<&Poly> {
        self.poly_index(poly_ref).map(|index| &self.polygons[index])
    }

    /// The links of `poly`.
    #[inline]
    pub fn poly_links(&self, poly: &Poly) -> &[Link] {
        let first = poly.first_link as usize;
        &self.links[first..first + poly.link_count as usize]
    }

    pub(crate) fn poly_positions(&self, poly: &Poly) -> PolyPositions {
        let mut positions = [Vec3::ZERO; VERTS_PER_POLYGON];
        for (position, &index) in positions.iter_mut().zip(poly.vertex_indices()) {
            *position = self.vertices[index as usize];
        }
        PolyPositions {
            positions,
            len: poly.vertex_count as usize,
        }
    }

    fn detail_triangle_positions(
        &self,
        poly: &Poly,
        detail: &PolyDetail,
        triangle: &DetailTriangle,
    ) -> [Vec3; 3] {
        let vertex_count = poly.vertex_count;
        triangle.indices.map(|index| {
            if index < vertex_count {
                self.vertices[poly.vertices[index as usize] as usize]
            } else {
                self.detail_vertices[(detail.vertex_base + (index - vertex_count) as u32) as usize]
            }
        })
    }

    fn detail_triangles_of(&self, index: usize) -> (&PolyDetail, &[DetailTriangle]) {
        let detail = &self.detail_meshes[index];
        let first = detail.triangle_base as usize;
        (
            detail,
            &self.detail_triangles[first..first + detail.triangle_count as usize],
        )
    }

    /// Calls `visit` with the index of every polygon whose bounds overlap the box.
    pub(crate) fn query_polygons(&self, min: Vec3, max: Vec3, mut visit: impl FnMut(usize)) {
        // The box has to touch the tile on the xz-plane first.
        if min.x >= self.aabb.max.x
            || max.x < self.aabb.min.x
            || min.z >= self.aabb.max.z
            || max.z < self.aabb.min.z
        {
            return;
        }

        if self.bv_tree.is_empty() {
            for (index, poly) in self.polygons.iter().enumerate() {
                let positions = self.poly_positions(poly);
                let (poly_min, poly_max) = positions
                    .iter()
                    .fold((Vec3::MAX, Vec3::MIN), |(lo, hi), &p| (lo.min(p), hi.max(p)));
                if min.cmple(poly_max).all() && max.cmpge(poly_min).all() {
                    visit(index);
                }
            }
            return;
        }

        let origin = self.aabb.min;
        let qmin = (min.clamp(self.aabb.min, self.aabb.max) - origin) * self.quant_factor;
        let qmax = (max.clamp(self.aabb.min, self.aabb.max) - origin) * self.quant_factor;
        let quant_min = U16Vec3::new(
            qmin.x as u16 & 0xfffe,
            qmin.y as u16 & 0xfffe,
            qmin.z as u16 & 0xfffe,
        );
        let quant_max = U16Vec3::new(
            (qmax.x + 1.0) as u16 | 1,
            (qmax.y + 1.0) as u16 | 1,
            (qmax.z + 1.0) as u16 | 1,
        );
        bv_tree::query(&self.bv_tree, quant_min, quant_max, visit);
    }

    /// Height of the detail surface of polygon `index` at the xz position of `position`.
    /// Returns `None` if the position is outside the polygon.
    pub(crate) fn poly_height(&self, index: usize, position: Vec3) -> Option<f32> {
        let poly = &self.polygons[index];
        if !point_in_polygon(position, &self.poly_positions(poly)) {
            return None;
        }

        let (detail, triangles) = self.detail_triangles_of(index);
        for triangle in triangles {
            let [a, b, c] = self.detail_triangle_positions(poly, detail, triangle);
            if let Some(height) = closest_height_point_triangle(position, a, b, c) {
                return Some(height);
            }
        }

        // The point is inside the polygon but missed every triangle due to precision.
        // Use the height of the closest detail edge.
        self.closest_point_on_detail_edges(index, position, false)
            .map(|closest| closest.y)
    }

    /// The closest point on polygon `index` to `position`, and whether `position` lies over the polygon.
    pub(crate) fn closest_point_on_poly(&self, index: usize, position: Vec3) -> (Vec3, bool) {
        if let Some(height) = self.poly_height(index, position) {
            return (position.with_y(height), true);
        }
        let closest = self
            .closest_point_on_detail_edges(index, position, true)
            .unwrap_or_else(|| self.closest_point_on_poly_boundary(index, position));
        (closest, false)
    }

    fn closest_point_on_detail_edges(
        &self,
        index: usize,
        position: Vec3,
        only_boundary: bool,
    ) -> Option<Vec3> {
        let poly = &self.polygons[index];
        let (detail, triangles) = self.detail_triangles_of(index);

        let mut best: Option<(f32, f32, Vec3, Vec3)> = None;
        for triangle in triangles {
            if only_boundary && !triangle.has_boundary_edge() {
                continue;
            }
            let positions = self.detail_triangle_positions(poly, detail, triangle);
            let mut j = 2;
            for k in 0..3 {
                let inner_edge = !triangle.is_boundary_edge(j);
                // Inner edges are shared by two triangles, visit them once.
                if inner_edge && (only_boundary || triangle.indices[j] < triangle.indices[k]) {
                    j = k;
                    continue;
                }
                let (distance, t) = distance_pt_seg_sqr_2d(position, positions[j], positions[k]);
                if best.is_none_or(|(min, ..)| distance < min) {
                    best = Some((distance, t, positions[j], positions[k]));
                }
                j = k;
            }
        }
        best.map(|(_, t, p, q)| p.lerp(q, t))
    }

    /// Clamps `position` onto the outline of polygon `index` on the xz-plane.
    /// Positions inside the polygon are returned unchanged.
    pub(crate) fn closest_point_on_poly_boundary(&self, index: usize, position: Vec3) -> Vec3 {
        let positions = self.poly_positions(&self.polygons[index]);
        let mut distances = [0.0; VERTS_PER_POLYGON];
        let mut parameters = [0.0; VERTS_PER_POLYGON];
        let n = positions.len();
        if distance_pt_poly_edges_sqr(
            position,
            &positions,
            &mut distances[..n],
            &mut parameters[..n],
        ) {
            return position;
        }

        let mut closest_edge = 0;
        for edge in 1..n {
            if distances[edge] < distances[closest_edge] {
                closest_edge = edge;
            }
        }
        let a = positions[closest_edge];
        let b = positions[(closest_edge + 1) % n];
        a.lerp(b, parameters[closest_edge])
    }

    /// The left and right end of the edge of `from` shared with `to`, seen from `from`.
    pub(crate) fn portal_points(&self, from: PolyRef, to: PolyRef) -> Option<(Vec3, Vec3)> {
        let poly = self.polygon(from)?;
        let link = self.poly_links(poly).iter().find(|link| link.poly_ref == to)?;
        let edge = link.edge as usize;
        let n = poly.vertex_count as usize;
        let left = self.vertices[poly.vertices[edge] as usize];
        let right = self.vertices[poly.vertices[(edge + 1) % n] as usize];
        Some((left, right))
    }

    /// Midpoint of the edge between `from` and `to`.
    pub(crate) fn edge_midpoint(&self, from: PolyRef, to: PolyRef) -> Option<Vec3> {
        self.portal_points(from, to)
            .map(|(left, right)| (left + right) * 0.5)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::test_support::{flat_nav_mesh, two_level_nav_mesh};

    #[test]
    fn references_resolve_to_their_polygon() {
        let nav_mesh = flat_nav_mesh();
        for index in 0..nav_mesh.polygon_count() {
            let poly_ref = nav_mesh.poly_ref(index).unwrap();
            assert_eq!(nav_mesh.poly_index(poly_ref), Some(index));
        }
        assert_eq!(nav_mesh.poly_ref(nav_mesh.polygon_count()), None);
        let foreign = PolyRef::encode(nav_mesh.salt + 1, 0, 0).unwrap();
        assert_eq!(nav_mesh.polygon(foreign), None);
    }

    #[test]
    fn links_are_symmetric() {
        let nav_mesh = flat_nav_mesh();
        for (index, poly) in nav_mesh.polygons().iter().enumerate() {
            let this = nav_mesh.poly_ref(index).unwrap();
            for link in nav_mesh.poly_links(poly) {
                let other = nav_mesh.polygon(link.poly_ref).unwrap();
                assert!(
                    nav_mesh
                        .poly_links(other)
                        .iter()
                        .any(|back| back.poly_ref == this),
                    "link {this} -> {} has no way back",
                    link.poly_ref
                );
            }
        }
    }

    #[test]
    fn shared_portals_are_mirrored() {
        let nav_mesh = flat_nav_mesh();
        let poly = &nav_mesh.polygons()[0];
        let Some(link) = nav_mesh.poly_links(poly).first() else {
            return;
        };
        let this = nav_mesh.poly_ref(0).unwrap();
        let (left, right) = nav_mesh.portal_points(this, link.poly_ref).unwrap();
        let (back_left, back_right) = nav_mesh.portal_points(link.poly_ref, this).unwrap();
        assert_relative_eq!(left.distance(back_right), 0.0);
        assert_relative_eq!(right.distance(back_left), 0.0);
    }

    #[test]
    fn height_is_found_over_flat_ground() {
        let nav_mesh = flat_nav_mesh();
        let center = Vec3::new(0.37, 0.0, -0.21);
        let mut found = None;
        nav_mesh.query_polygons(center, center, |index| {
            if let Some(height) = nav_mesh.poly_height(index, center) {
                found = Some(height);
            }
        });
        let height = found.expect("a polygon covers the center");
        assert!((-0.1..0.6).contains(&height), "height {height}");
    }

    #[test]
    fn points_outside_clamp_to_the_outline() {
        let nav_mesh = flat_nav_mesh();
        let far = Vec3::new(100.0, 0.0, 0.0);
        for index in 0..nav_mesh.polygon_count() {
            let (closest, over) = nav_mesh.closest_point_on_poly(index, far);
            assert!(!over);
            assert!(closest.x <= nav_mesh.aabb().max.x + 1e-3);
            let boundary = nav_mesh.closest_point_on_poly_boundary(index, far);
            assert!(boundary.x <= nav_mesh.aabb().max.x + 1e-3);
        }
    }

    #[test]
    fn queries_far_from_the_tile_find_nothing() {
        let nav_mesh = flat_nav_mesh();
        let mut count = 0;
        nav_mesh.query_polygons(Vec3::splat(500.0), Vec3::splat(510.0), |_| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn tree_and_linear_queries_agree() {
        let nav_mesh = two_level_nav_mesh();
        let mut linear = nav_mesh.clone();
        linear.bv_tree.clear();

        let min = Vec3::new(-1.0, -1.0, -1.0);
        let max = Vec3::new(1.0, 3.0, 1.0);
        let mut with_tree = Vec::new();
        nav_mesh.query_polygons(min, max, |index| with_tree.push(index));
        let mut without_tree = Vec::new();
        linear.query_polygons(min, max, |index| without_tree.push(index));

        // The quantized tree is conservative, it may report extra candidates but never fewer.
        assert!(!without_tree.is_empty());
        for index in without_tree {
            assert!(with_tree.contains(&index), "polygon {index} missing");
        }
    }
}
