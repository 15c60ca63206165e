use std::collections::VecDeque;

use glam::{U16Vec3, Vec3A, Vec3Swizzles as _};
use thiserror::Error;

use crate::{
    CompactHeightfield, PolygonMesh, RegionId,
    math::{
        dir_offset, dir_offset_x, dir_offset_z, distance_squared_between_point_and_line_vec2,
        distance_squared_between_point_and_line_vec3, next, prev,
    },
};

/// Maximum number of vertices in the detail mesh of a single polygon.
const MAX_VERTS: usize = 127;
/// Max tris for delaunay is 2n-2-k (n=num verts, k=num hull verts).
const MAX_TRIS: usize = 255;
const MAX_VERTS_PER_EDGE: usize = 32;

const UNSET_HEIGHT: u16 = 0xffff;

/// Flag of a detail triangle edge that lies on the boundary of its polygon.
///
/// The flags of edge `i` of a triangle are stored at bit `i * 2` of [`DetailPolygonMesh::triangle_flags`].
pub const DETAIL_EDGE_BOUNDARY: u8 = 0x1;

/// Contains triangle meshes that represent detailed height data associated
/// with the polygons in its associated polygon mesh object.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailPolygonMesh {
    /// The sub-mesh data, one per polygon of the source [`PolygonMesh`]
    pub meshes: Vec<SubMesh>,
    /// The mesh vertices in world space
    pub vertices: Vec<Vec3A>,
    /// The mesh triangles. Indices are relative to [`SubMesh::first_vertex_index`] of their sub-mesh.
    pub triangles: Vec<[u8; 3]>,
    /// Edge flags of each triangle, see [`DETAIL_EDGE_BOUNDARY`].
    pub triangle_flags: Vec<u8>,
}

/// The range of vertices and triangles of a [`DetailPolygonMesh`] that belong to one polygon.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SubMesh {
    /// Index of the first vertex of the sub-mesh in [`DetailPolygonMesh::vertices`]
    pub first_vertex_index: usize,
    /// Number of vertices in the sub-mesh
    pub vertex_count: usize,
    /// Index of the first triangle of the sub-mesh in [`DetailPolygonMesh::triangles`]
    pub first_triangle_index: usize,
    /// Number of triangles in the sub-mesh
    pub triangle_count: usize,
}

impl DetailPolygonMesh {
    /// Builds a detail mesh from the provided polygon mesh.
    ///
    /// `sample_distance` is the world space distance between height samples. Zero disables
    /// sampling, so the detail mesh only triangulates the polygons.
    /// `sample_max_error` is the maximum world space distance the detail surface may deviate
    /// from the heightfield.
    ///
    /// # Errors
    ///
    /// Returns an error if no span of the heightfield can be found to sample the height of a polygon.
    pub fn new(
        mesh: &PolygonMesh,
        heightfield: &CompactHeightfield,
        sample_distance: f32,
        sample_max_error: f32,
    ) -> Result<Self, DetailPolygonMeshError> {
        let mut detail = DetailPolygonMesh::default();
        if mesh.vertices.is_empty() || mesh.polygon_count() == 0 {
            return Ok(detail);
        }

        let chf = heightfield;
        let cs = mesh.cell_size;
        let ch = mesh.cell_height;
        let orig = Vec3A::from(mesh.aabb.min);
        let border_size = mesh.border_size;
        let height_search_radius = 1.max(mesh.max_edge_error.ceil() as i32);

        let mut scratch = PolygonDetail::default();
        let mut queue = VecDeque::with_capacity(512);
        let mut patch = HeightPatch::default();

        detail.meshes.reserve(mesh.polygon_count());
        for i in 0..mesh.polygon_count() {
            let polygon = mesh.polygon_vertices(i);

            // Find the area of the polygon, padded by one cell.
            let mut bounds = Bounds {
                xmin: chf.width,
                xmax: 0,
                zmin: chf.height,
                zmax: 0,
            };
            for &v in polygon {
                let v = mesh.vertices[v as usize];
                bounds.xmin = bounds.xmin.min(v.x);
                bounds.xmax = bounds.xmax.max(v.x);
                bounds.zmin = bounds.zmin.min(v.z);
                bounds.zmax = bounds.zmax.max(v.z);
            }
            bounds.xmin = bounds.xmin.saturating_sub(1);
            bounds.xmax = chf.width.min(bounds.xmax + 1);
            bounds.zmin = bounds.zmin.saturating_sub(1);
            bounds.zmax = chf.height.min(bounds.zmax + 1);
            if bounds.xmin >= bounds.xmax || bounds.zmin >= bounds.zmax {
                tracing::warn!("DetailPolygonMesh: Polygon {i} lies outside of the heightfield.");
                detail.meshes.push(SubMesh {
                    first_vertex_index: detail.vertices.len(),
                    vertex_count: 0,
                    first_triangle_index: detail.triangles.len(),
                    triangle_count: 0,
                });
                continue;
            }

            // Store polygon vertices for processing.
            let poly: Vec<Vec3A> = polygon
                .iter()
                .map(|&v| {
                    let v = mesh.vertices[v as usize].as_vec3();
                    Vec3A::new(v.x * cs, v.y * ch, v.z * cs)
                })
                .collect();

            // Get the height data from the area of the polygon.
            patch.xmin = bounds.xmin;
            patch.zmin = bounds.zmin;
            patch.width = bounds.xmax - bounds.xmin;
            patch.height = bounds.zmax - bounds.zmin;
            patch.get_height_data(
                chf,
                polygon,
                &mesh.vertices,
                border_size,
                &mut queue,
                mesh.regions[i],
            )
            .map_err(|_| DetailPolygonMeshError::NoSeedSpan { polygon: i })?;

            // Build detail mesh.
            scratch.build(
                &poly,
                sample_distance,
                sample_max_error,
                height_search_radius,
                chf,
                &patch,
            );

            // Store detail submesh
            detail.meshes.push(SubMesh {
                first_vertex_index: detail.vertices.len(),
                vertex_count: scratch.vertices.len(),
                first_triangle_index: detail.triangles.len(),
                triangle_count: scratch.triangles.len(),
            });

            // Move detail verts to world space.
            detail.vertices.extend(scratch.vertices.iter().map(|&vertex| {
                let mut vertex = vertex + orig;
                vertex.y += chf.cell_height;
                vertex
            }));
            detail.triangles.extend(
                scratch
                    .triangles
                    .iter()
                    .map(|&[a, b, c]| [a as u8, b as u8, c as u8]),
            );
            detail
                .triangle_flags
                .extend_from_slice(&scratch.triangle_flags);
        }

        Ok(detail)
    }

    /// Writes the mesh as Wavefront OBJ: all vertices, then one face per triangle.
    pub fn write_obj(&self, writer: &mut impl std::io::Write) -> std::io::Result<()> {
        for vertex in &self.vertices {
            writeln!(writer, "v {} {} {}", vertex.x, vertex.y, vertex.z)?;
        }
        for submesh in &self.meshes {
            let base = submesh.first_vertex_index + 1;
            let triangles = &self.triangles
                [submesh.first_triangle_index..submesh.first_triangle_index + submesh.triangle_count];
            for &[a, b, c] in triangles {
                writeln!(
                    writer,
                    "f {} {} {}",
                    base + a as usize,
                    base + b as usize,
                    base + c as usize
                )?;
            }
        }
        Ok(())
    }
}

/// Scratch buffers for the detail mesh of a single polygon.
#[derive(Debug, Default)]
struct PolygonDetail {
    vertices: Vec<Vec3A>,
    hull: Vec<usize>,
    triangles: Vec<[usize; 3]>,
    triangle_flags: Vec<u8>,
    edges: Vec<DelaunayEdge>,
    samples: Vec<Sample>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    x: i32,
    y: u16,
    z: i32,
    added: bool,
}

impl PolygonDetail {
    fn build(
        &mut self,
        input: &[Vec3A],
        sample_dist: f32,
        sample_max_error: f32,
        height_search_radius: i32,
        chf: &CompactHeightfield,
        hp: &HeightPatch,
    ) {
        let nin = input.len();
        self.vertices.clear();
        self.vertices.extend_from_slice(input);
        self.hull.clear();
        self.triangles.clear();
        self.triangle_flags.clear();
        self.edges.clear();

        let cs = chf.cell_size;
        let ch = chf.cell_height;
        let ics = 1.0 / cs;

        // Calculate minimum extents of the polygon based on input data.
        let min_extent_squared = poly_min_extent_squared(input);

        // Tessellate outlines.
        // This is done in separate pass in order to ensure
        // seamless height values across the poly boundaries.
        if sample_dist > 0.0 {
            let mut edge = [Vec3A::ZERO; MAX_VERTS_PER_EDGE + 1];
            let mut idx = Vec::with_capacity(MAX_VERTS_PER_EDGE);
            for i in 0..nin {
                let j = prev(i, nin);
                let mut vj = input[j];
                let mut vi = input[i];
                let mut swapped = false;
                // Make sure the segments are always handled in same order
                // using lexological sort or else there will be seams.
                if (vj.x - vi.x).abs() < 1.0e-6 {
                    if vj.z > vi.z {
                        std::mem::swap(&mut vj, &mut vi);
                        swapped = true;
                    }
                } else if vj.x > vi.x {
                    std::mem::swap(&mut vj, &mut vi);
                    swapped = true;
                }

                // Create samples along the edge.
                let dij = vi - vj;
                let d = dij.xz().length();
                let mut nn = 1 + (d / sample_dist).floor() as usize;
                if nn >= MAX_VERTS_PER_EDGE {
                    nn = MAX_VERTS_PER_EDGE - 1;
                }
                if self.vertices.len() + nn >= MAX_VERTS {
                    nn = (MAX_VERTS - 1).saturating_sub(self.vertices.len());
                }
                for (k, pos) in edge.iter_mut().enumerate().take(nn + 1) {
                    let u = k as f32 / nn as f32;
                    *pos = vj + dij * u;
                    pos.y = get_height(*pos, ics, ch, height_search_radius, hp) as f32 * ch;
                }

                // Simplify samples.
                idx.clear();
                idx.extend([0, nn]);
                let mut k = 0;
                while k < idx.len() - 1 {
                    let a = idx[k];
                    let b = idx[k + 1];
                    let va = edge[a];
                    let vb = edge[b];
                    // Find maximum deviation along the segment.
                    let mut maxd = 0.0;
                    let mut maxi = None;
                    for (m, point) in edge.iter().enumerate().take(b).skip(a + 1) {
                        let dev = distance_squared_between_point_and_line_vec3(*point, (va, vb));
                        if dev > maxd {
                            maxd = dev;
                            maxi = Some(m);
                        }
                    }
                    // If the max deviation is larger than accepted error,
                    // add new point, else continue to next segment.
                    match maxi {
                        Some(maxi) if maxd > sample_max_error * sample_max_error => {
                            idx.insert(k + 1, maxi);
                        }
                        _ => k += 1,
                    }
                }

                self.hull.push(j);
                // Add new vertices.
                let inner = &idx[1..idx.len() - 1];
                let mut add = |k: usize| {
                    self.hull.push(self.vertices.len());
                    self.vertices.push(edge[k]);
                };
                if swapped {
                    inner.iter().rev().for_each(|&k| add(k));
                } else {
                    inner.iter().for_each(|&k| add(k));
                }
            }
        } else {
            self.hull.extend(0..nin);
        }

        // If the polygon minimum extent is small (sliver or small triangle), do not try to add internal points.
        if min_extent_squared < (sample_dist * 2.0) * (sample_dist * 2.0) {
            triangulate_hull(&self.vertices, &self.hull, nin, &mut self.triangles);
            self.set_triangle_flags();
            return;
        }

        // Tessellate the base mesh.
        // We're using the triangulate_hull instead of delaunay_hull as it tends to
        // create a bit better triangulation for long thin triangles when there
        // are no internal points.
        triangulate_hull(&self.vertices, &self.hull, nin, &mut self.triangles);

        if self.triangles.is_empty() {
            // Could not triangulate the poly, make sure there is some valid data there.
            tracing::warn!(
                "build_poly_detail: Could not triangulate polygon ({} verts).",
                self.vertices.len()
            );
            return;
        }

        if sample_dist > 0.0 {
            // Create sample locations in a grid.
            let (min, max) = input
                .iter()
                .fold((input[0], input[0]), |(min, max), v| (min.min(*v), max.max(*v)));
            let x0 = (min.x / sample_dist).floor() as i32;
            let x1 = (max.x / sample_dist).ceil() as i32;
            let z0 = (min.z / sample_dist).floor() as i32;
            let z1 = (max.z / sample_dist).ceil() as i32;
            self.samples.clear();
            for z in z0..z1 {
                for x in x0..x1 {
                    let pt = Vec3A::new(
                        x as f32 * sample_dist,
                        (max.y + min.y) * 0.5,
                        z as f32 * sample_dist,
                    );
                    // Make sure the samples are not too close to the edges.
                    if dist_to_poly(input, pt) > -sample_dist / 2.0 {
                        continue;
                    }
                    self.samples.push(Sample {
                        x,
                        y: get_height(pt, ics, ch, height_search_radius, hp),
                        z,
                        added: false,
                    });
                }
            }

            // Add the samples starting from the one that has the most
            // error. The procedure stops when all samples are added
            // or when the max error is within treshold.
            for _ in 0..self.samples.len() {
                if self.vertices.len() >= MAX_VERTS {
                    break;
                }

                // Find sample with most error.
                let mut best = None;
                let mut best_d = 0.0;
                for (i, sample) in self.samples.iter().enumerate() {
                    if sample.added {
                        continue;
                    }
                    // The sample location is jittered to get rid of some bad triangulations
                    // which are cause by symmetrical data from the grid structure.
                    let pt = Vec3A::new(
                        sample.x as f32 * sample_dist + jitter_x(i) * cs * 0.1,
                        sample.y as f32 * ch,
                        sample.z as f32 * sample_dist + jitter_z(i) * cs * 0.1,
                    );
                    let Some(d) = dist_to_tri_mesh(pt, &self.vertices, &self.triangles) else {
                        // did not hit the mesh.
                        continue;
                    };
                    if d > best_d {
                        best_d = d;
                        best = Some((i, pt));
                    }
                }

                // If the max error is within accepted threshold, stop tesselating.
                let Some((best_i, best_pt)) = best.filter(|_| best_d > sample_max_error) else {
                    break;
                };
                // Mark sample as added.
                self.samples[best_i].added = true;
                // Add the new sample point.
                self.vertices.push(best_pt);

                // Create new triangulation.
                // TODO: Incremental add instead of full rebuild.
                delaunay_hull(
                    &self.vertices,
                    &self.hull,
                    &mut self.triangles,
                    &mut self.edges,
                );
            }
        }

        if self.triangles.len() > MAX_TRIS {
            tracing::error!(
                "build_poly_detail: Shrinking triangle count from {} to max {MAX_TRIS}.",
                self.triangles.len()
            );
            self.triangles.truncate(MAX_TRIS);
        }
        self.set_triangle_flags();
    }

    /// Find edges that lie on hull and mark them as such.
    fn set_triangle_flags(&mut self) {
        let hull = &self.hull;
        let flag = |a: usize, b: usize| {
            if on_hull(a, b, hull) {
                DETAIL_EDGE_BOUNDARY
            } else {
                0
            }
        };
        self.triangle_flags.clear();
        self.triangle_flags.extend(
            self.triangles
                .iter()
                .map(|&[a, b, c]| flag(a, b) | (flag(b, c) << 2) | (flag(c, a) << 4)),
        );
    }
}

fn on_hull(a: usize, b: usize, hull: &[usize]) -> bool {
    let n = hull.len();
    // All internal sampled points come after the hull so we can early out for those.
    if a >= n || b >= n {
        return false;
    }
    (0..n).any(|i| a == hull[prev(i, n)] && b == hull[i])
}

fn triangulate_hull(
    vertices: &[Vec3A],
    hull: &[usize],
    nin: usize,
    triangles: &mut Vec<[usize; 3]>,
) {
    let nhull = hull.len();
    let mut start = 0;
    let mut left = 1;
    let mut right = nhull - 1;

    // Start from an ear with shortest perimeter.
    // This tends to favor well formed triangles as starting point.
    let mut dmin = f32::MAX;
    for i in 0..nhull {
        if hull[i] >= nin {
            // Ears are triangles with original vertices as middle vertex while others are actually line segments on edges
            continue;
        }
        let pi = prev(i, nhull);
        let ni = next(i, nhull);
        let pv = vertices[hull[pi]].xz();
        let cv = vertices[hull[i]].xz();
        let nv = vertices[hull[ni]].xz();
        let d = pv.distance(cv) + cv.distance(nv) + nv.distance(pv);
        if d < dmin {
            start = i;
            left = ni;
            right = pi;
            dmin = d;
        }
    }

    // Add first triangle
    triangles.push([hull[start], hull[left], hull[right]]);

    // Triangulate the polygon by moving left or right,
    // depending on which triangle has shorter perimeter.
    // This heuristic was chose empirically, since it seems
    // handle tessellated straight edges well.
    while next(left, nhull) != right {
        // Check to see if se should advance left or right.
        let nleft = next(left, nhull);
        let nright = prev(right, nhull);

        let cvleft = vertices[hull[left]].xz();
        let nvleft = vertices[hull[nleft]].xz();
        let cvright = vertices[hull[right]].xz();
        let nvright = vertices[hull[nright]].xz();
        let dleft = cvleft.distance(nvleft) + nvleft.distance(cvright);
        let dright = cvright.distance(nvright) + cvleft.distance(nvright);

        if dleft < dright {
            triangles.push([hull[left], hull[nleft], hull[right]]);
            left = nleft;
        } else {
            triangles.push([hull[left], hull[nright], hull[right]]);
            right = nright;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeFace {
    Undefined,
    Hull,
    Triangle(usize),
}

/// An edge of the delaunay triangulation with the faces to the left of `s -> t` and of `t -> s`.
#[derive(Debug, Clone, Copy)]
struct DelaunayEdge {
    s: usize,
    t: usize,
    faces: [EdgeFace; 2],
}

fn delaunay_hull(
    points: &[Vec3A],
    hull: &[usize],
    triangles: &mut Vec<[usize; 3]>,
    edges: &mut Vec<DelaunayEdge>,
) {
    let max_edges = points.len() * 10;
    let mut face_count = 0;
    edges.clear();

    for i in 0..hull.len() {
        let j = prev(i, hull.len());
        add_edge(
            edges,
            max_edges,
            hull[j],
            hull[i],
            EdgeFace::Hull,
            EdgeFace::Undefined,
        );
    }

    let mut current_edge = 0;
    while current_edge < edges.len() {
        if edges[current_edge].faces[0] == EdgeFace::Undefined {
            complete_facet(points, edges, max_edges, &mut face_count, current_edge);
        }
        if edges[current_edge].faces[1] == EdgeFace::Undefined {
            complete_facet(points, edges, max_edges, &mut face_count, current_edge);
        }
        current_edge += 1;
    }

    // Create tris
    let mut faces = vec![[None::<usize>; 3]; face_count];
    for edge in edges.iter() {
        if let EdgeFace::Triangle(face) = edge.faces[1] {
            // Left face
            let t = &mut faces[face];
            if t[0].is_none() {
                t[0] = Some(edge.s);
                t[1] = Some(edge.t);
            } else if t[0] == Some(edge.t) {
                t[2] = Some(edge.s);
            } else if t[1] == Some(edge.s) {
                t[2] = Some(edge.t);
            }
        }
        if let EdgeFace::Triangle(face) = edge.faces[0] {
            // Right
            let t = &mut faces[face];
            if t[0].is_none() {
                t[0] = Some(edge.t);
                t[1] = Some(edge.s);
            } else if t[0] == Some(edge.s) {
                t[2] = Some(edge.t);
            } else if t[1] == Some(edge.t) {
                t[2] = Some(edge.s);
            }
        }
    }

    triangles.clear();
    for (i, face) in faces.iter().enumerate() {
        match face {
            [Some(a), Some(b), Some(c)] => triangles.push([*a, *b, *c]),
            _ => tracing::warn!("delaunay_hull: Removing dangling face {i} {face:?}."),
        }
    }
}

fn find_edge(edges: &[DelaunayEdge], s: usize, t: usize) -> Option<usize> {
    edges
        .iter()
        .position(|e| (e.s == s && e.t == t) || (e.s == t && e.t == s))
}

fn add_edge(
    edges: &mut Vec<DelaunayEdge>,
    max_edges: usize,
    s: usize,
    t: usize,
    left: EdgeFace,
    right: EdgeFace,
) -> Option<usize> {
    if edges.len() >= max_edges {
        tracing::error!("add_edge: Too many edges ({}/{max_edges}).", edges.len());
        return None;
    }
    // Add edge if not already in the triangulation.
    if find_edge(edges, s, t).is_some() {
        return None;
    }
    edges.push(DelaunayEdge {
        s,
        t,
        faces: [left, right],
    });
    Some(edges.len() - 1)
}

fn update_left_face(edge: &mut DelaunayEdge, s: usize, t: usize, face: EdgeFace) {
    if edge.s == s && edge.t == t && edge.faces[0] == EdgeFace::Undefined {
        edge.faces[0] = face;
    } else if edge.t == s && edge.s == t && edge.faces[1] == EdgeFace::Undefined {
        edge.faces[1] = face;
    }
}

fn complete_facet(
    points: &[Vec3A],
    edges: &mut Vec<DelaunayEdge>,
    max_edges: usize,
    face_count: &mut usize,
    e: usize,
) {
    const EPS: f32 = 1.0e-5;
    const TOLERANCE: f32 = 0.001;

    let edge = edges[e];

    // Cache s and t.
    let (s, t) = if edge.faces[0] == EdgeFace::Undefined {
        (edge.s, edge.t)
    } else if edge.faces[1] == EdgeFace::Undefined {
        (edge.t, edge.s)
    } else {
        // Edge already completed.
        return;
    };

    // Find best point on left of edge.
    let mut best = None;
    let mut c = Vec3A::ZERO;
    let mut r = -1.0;
    for u in 0..points.len() {
        if u == s || u == t {
            continue;
        }
        if vcross2(points[s], points[t], points[u]) <= EPS {
            continue;
        }
        if r < 0.0 {
            // The circle is not updated yet, do it now.
            best = Some(u);
            (c, r) = circum_circle(points[s], points[t], points[u]);
            continue;
        }
        let d = c.xz().distance(points[u].xz());
        if d > r * (1.0 + TOLERANCE) {
            // Outside current circumcircle, skip.
            continue;
        } else if d >= r * (1.0 - TOLERANCE) {
            // Inside epsilon circum circle, do extra tests to make sure the edge is valid.
            // s-u and t-u cannot overlap with s-pt nor t-pt if they exists.
            if overlap_edges(points, edges, s, u) || overlap_edges(points, edges, t, u) {
                continue;
            }
        }
        // Edge is valid.
        best = Some(u);
        (c, r) = circum_circle(points[s], points[t], points[u]);
    }

    // Add new triangle or update edge info if s-t is on hull.
    let Some(pt) = best else {
        update_left_face(&mut edges[e], s, t, EdgeFace::Hull);
        return;
    };
    let face = EdgeFace::Triangle(*face_count);

    // Update face information of edge being completed.
    update_left_face(&mut edges[e], s, t, face);

    // Add new edge or update face info of old edge.
    match find_edge(edges, pt, s) {
        None => {
            add_edge(edges, max_edges, pt, s, face, EdgeFace::Undefined);
        }
        Some(e) => update_left_face(&mut edges[e], pt, s, face),
    }

    // Add new edge or update face info of old edge.
    match find_edge(edges, t, pt) {
        None => {
            add_edge(edges, max_edges, t, pt, face, EdgeFace::Undefined);
        }
        Some(e) => update_left_face(&mut edges[e], t, pt, face),
    }

    *face_count += 1;
}

#[inline]
fn vcross2(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> f32 {
    let u1 = p2.x - p1.x;
    let v1 = p2.z - p1.z;
    let u2 = p3.x - p1.x;
    let v2 = p3.z - p1.z;
    u1 * v2 - v1 * u2
}

fn circum_circle(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> (Vec3A, f32) {
    const EPS: f32 = 1e-6;
    // Calculate the circle relative to p1, to avoid some precision issues.
    let v1 = Vec3A::ZERO;
    let v2 = p2 - p1;
    let v3 = p3 - p1;

    let cp = vcross2(v1, v2, v3);
    if cp.abs() <= EPS {
        return (p1, 0.0);
    }
    let v1_sq = v1.xz().length_squared();
    let v2_sq = v2.xz().length_squared();
    let v3_sq = v3.xz().length_squared();
    let c = Vec3A::new(
        (v1_sq * (v2.z - v3.z) + v2_sq * (v3.z - v1.z) + v3_sq * (v1.z - v2.z)) / (2.0 * cp),
        0.0,
        (v1_sq * (v3.x - v2.x) + v2_sq * (v1.x - v3.x) + v3_sq * (v2.x - v1.x)) / (2.0 * cp),
    );
    let r = c.xz().distance(v1.xz());
    (c + p1, r)
}

fn overlap_seg_seg_2d(a: Vec3A, b: Vec3A, c: Vec3A, d: Vec3A) -> bool {
    let a1 = vcross2(a, b, d);
    let a2 = vcross2(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = vcross2(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

fn overlap_edges(points: &[Vec3A], edges: &[DelaunayEdge], s1: usize, t1: usize) -> bool {
    edges.iter().any(|edge| {
        let (s0, t0) = (edge.s, edge.t);
        // Same or connected edges do not overlap.
        if s0 == s1 || s0 == t1 || t0 == s1 || t0 == t1 {
            return false;
        }
        overlap_seg_seg_2d(points[s0], points[t0], points[s1], points[t1])
    })
}

fn dist_to_tri_mesh(p: Vec3A, vertices: &[Vec3A], triangles: &[[usize; 3]]) -> Option<f32> {
    triangles
        .iter()
        .filter_map(|&[a, b, c]| dist_pt_tri(p, vertices[a], vertices[b], vertices[c]))
        .min_by(f32::total_cmp)
}

/// Vertical distance from point p to triangle defined by vertices a, b, and c.
/// Returns None if the point is outside the triangle on the xz-plane.
fn dist_pt_tri(p: Vec3A, a: Vec3A, b: Vec3A, c: Vec3A) -> Option<f32> {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let dot00 = v0.xz().dot(v0.xz());
    let dot01 = v0.xz().dot(v1.xz());
    let dot02 = v0.xz().dot(v2.xz());
    let dot11 = v1.xz().dot(v1.xz());
    let dot12 = v1.xz().dot(v2.xz());

    // Compute barycentric coordinates
    let inv_denom = 1.0 / (dot00 * dot11 - dot01 * dot01);
    let u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_denom;

    // If point lies inside the triangle, return interpolated y-coord.
    const EPS: f32 = 1.0e-4;
    if u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS {
        let y = a.y + v0.y * u + v1.y * v;
        Some((y - p.y).abs())
    } else {
        None
    }
}

fn jitter_x(i: usize) -> f32 {
    (((i as u32).wrapping_mul(0x8da6b343) & 0xffff) as f32 / 65535.0 * 2.0) - 1.0
}

fn jitter_z(i: usize) -> f32 {
    (((i as u32).wrapping_mul(0xd8163841) & 0xffff) as f32 / 65535.0 * 2.0) - 1.0
}

/// Signed squared distance on the xz-plane from `p` to the polygon outline, negative inside.
fn dist_to_poly(vertices: &[Vec3A], p: Vec3A) -> f32 {
    let n = vertices.len();
    let mut dmin = f32::MAX;
    let mut inside = false;
    for i in 0..n {
        let vi = vertices[i];
        let vj = vertices[prev(i, n)];
        if (vi.z > p.z) != (vj.z > p.z)
            && p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        dmin = dmin.min(distance_squared_between_point_and_line_vec2(
            p.xz(),
            (vj.xz(), vi.xz()),
        ));
    }
    if inside { -dmin } else { dmin }
}

/// Squared minimum extent of the polygon, i.e. the smallest of its widths across each edge.
fn poly_min_extent_squared(vertices: &[Vec3A]) -> f32 {
    let n = vertices.len();
    let mut min_dist = f32::MAX;
    for i in 0..n {
        let ni = next(i, n);
        let p1 = vertices[i].xz();
        let p2 = vertices[ni].xz();
        let mut max_edge_dist = 0.0_f32;
        for (j, vertex) in vertices.iter().enumerate() {
            if j == i || j == ni {
                continue;
            }
            let d = distance_squared_between_point_and_line_vec2(vertex.xz(), (p1, p2));
            max_edge_dist = max_edge_dist.max(d);
        }
        min_dist = min_dist.min(max_edge_dist);
    }
    min_dist
}

fn get_height(f: Vec3A, ics: f32, ch: f32, radius: i32, hp: &HeightPatch) -> u16 {
    let width = hp.width as i32;
    let height = hp.height as i32;
    let ix = ((f.x * ics + 0.01).floor() as i32 - hp.xmin as i32).clamp(0, width - 1);
    let iz = ((f.z * ics + 0.01).floor() as i32 - hp.zmin as i32).clamp(0, height - 1);
    let mut h = *hp.data_at(ix, iz);
    if h != UNSET_HEIGHT {
        return h;
    }

    // Special case when data might be bad.
    // Walk adjacent cells in a spiral up to 'radius', and look
    // for a pixel which has a valid height.
    let mut x = 1;
    let mut z = 0;
    let mut dx = 1;
    let mut dz = 0;
    let max_size = radius * 2 + 1;
    let max_iter = max_size * max_size - 1;

    let mut next_ring_iter_start = 8;
    let mut next_ring_iters = 16;

    let mut dmin = f32::MAX;
    for i in 0..max_iter {
        let nx = ix + x;
        let nz = iz + z;
        if nx >= 0 && nz >= 0 && nx < width && nz < height {
            let nh = *hp.data_at(nx, nz);
            if nh != UNSET_HEIGHT {
                let d = (nh as f32 * ch - f.y).abs();
                if d < dmin {
                    h = nh;
                    dmin = d;
                }
            }
        }

        // We are searching in a grid which looks approximately like this:
        //  __________
        // |2 ______ 2|
        // | |1 __ 1| |
        // | | |__| | |
        // | |______| |
        // |__________|
        // We want to find the best height as close to the center cell as possible. This means that
        // if we find a height in one of the neighbor cells to the center, we don't want to
        // expand further out than the 8 neighbors - we want to limit our search to the closest
        // of these "rings", but the best height in the ring.
        // For example, the center is just 1 cell. We checked that at the entrance to the function.
        // The next "ring" contains 8 cells (marked 1 above). Those are all the neighbors to the center cell.
        // The next one again contains 16 cells (marked 2). In general each ring has 8 additional cells, which
        // can be thought of as adding 2 cells around the "center" of each side when we expand the ring.
        // Here we detect if we are about to enter the next ring, and if we are and we have found
        // a height, we abort the search.
        if i + 1 == next_ring_iter_start {
            if h != UNSET_HEIGHT {
                break;
            }
            next_ring_iter_start += next_ring_iters;
            next_ring_iters += 8;
        }

        if x == z || (x < 0 && x == -z) || (x > 0 && x == 1 - z) {
            let tmp = dx;
            dx = -dz;
            dz = tmp;
        }
        x += dx;
        z += dz;
    }
    h
}

/// Errors that can occur when building a [`DetailPolygonMesh`].
#[derive(Error, Debug)]
pub enum DetailPolygonMeshError {
    /// The heightfield has no span near the vertices of a polygon.
    #[error("Found no heightfield span to sample the height of polygon {polygon}")]
    NoSeedSpan {
        /// The index of the polygon in the polygon mesh
        polygon: usize,
    },
}

#[derive(Debug)]
struct MissingSeed;

/// Span heights of the cells around one polygon.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct HeightPatch {
    data: Vec<u16>,
    xmin: u16,
    zmin: u16,
    width: u16,
    height: u16,
}

impl HeightPatch {
    fn get_height_data(
        &mut self,
        chf: &CompactHeightfield,
        poly: &[u16],
        vertices: &[U16Vec3],
        bs: u16,
        queue: &mut VecDeque<(i32, i32, usize)>,
        region: RegionId,
    ) -> Result<(), MissingSeed> {
        // Note: Reads to the compact heightfield are offset by border size (bs)
        // since border size offset is already removed from the polymesh vertices.
        queue.clear();
        // Set all heights to UNSET_HEIGHT.
        self.reset(UNSET_HEIGHT);

        let mut empty = true;

        // We cannot sample from this poly if it was created from polys
        // of different regions. If it was then it could potentially be overlapping
        // with polys of that region and the heights sampled here could be wrong.
        if region != RegionId::NONE {
            // Copy the height from the same region, and mark region borders
            // as seed points to fill the rest.
            for hz in 0..self.height {
                let z = self.zmin + hz + bs;
                for hx in 0..self.width {
                    let x = self.xmin + hx + bs;
                    let Some(i) = chf
                        .cell_at(x, z)
                        .index_range()
                        .find(|&i| chf.spans[i].region == region)
                    else {
                        continue;
                    };
                    // Store height
                    *self.data_at_mut(hx as i32, hz as i32) = chf.spans[i].y;
                    empty = false;

                    // If any of the neighbours is not in same region,
                    // add the current location as flood fill start
                    let border = (0..4).any(|dir| {
                        chf.neighbor_index(x, z, i, dir)
                            .is_some_and(|a_i| chf.spans[a_i].region != region)
                    });
                    if border {
                        queue.push_back((x as i32, z as i32, i));
                    }
                }
            }
        }

        // if the polygon does not contain any points from the current region (rare, but happens)
        // or if it could potentially be overlapping polygons of the same region,
        // then use the center as the seed point.
        if empty {
            self.seed_with_poly_center(chf, poly, vertices, bs, queue)?;
        }

        // We assume the seed is centered in the polygon, so a BFS to collect
        // height data will ensure we do not move onto overlapping polygons and
        // sample wrong heights.
        while let Some((cx, cz, ci)) = queue.pop_front() {
            let cs = &chf.spans[ci];
            for dir in 0..4 {
                let Some(con) = cs.con(dir) else {
                    continue;
                };
                let (ax, az, ai) = chf.con_indices(cx, cz, dir, con);
                let hx = ax - self.xmin as i32 - bs as i32;
                let hz = az - self.zmin as i32 - bs as i32;
                if hx < 0 || hz < 0 || hx >= self.width as i32 || hz >= self.height as i32 {
                    continue;
                }
                if *self.data_at(hx, hz) != UNSET_HEIGHT {
                    continue;
                }
                *self.data_at_mut(hx, hz) = chf.spans[ai].y;
                queue.push_back((ax, az, ai));
            }
        }
        Ok(())
    }

    fn seed_with_poly_center(
        &mut self,
        chf: &CompactHeightfield,
        poly: &[u16],
        vertices: &[U16Vec3],
        bs: u16,
        queue: &mut VecDeque<(i32, i32, usize)>,
    ) -> Result<(), MissingSeed> {
        // Note: Reads to the compact heightfield are offset by border size (bs)
        // since border size offset is already removed from the polymesh vertices.
        const OFFSET: [(i32, i32); 9] = [
            (0, 0),
            (-1, -1),
            (0, -1),
            (1, -1),
            (1, 0),
            (1, 1),
            (0, 1),
            (-1, 1),
            (-1, 0),
        ];
        let (xmin, zmin) = (self.xmin as i32, self.zmin as i32);
        let (width, height) = (self.width as i32, self.height as i32);
        let bs = bs as i32;

        // Find cell closest to a poly vertex
        let mut start = None;
        let mut dmin = UNSET_HEIGHT as i32;
        'vertices: for vertex in poly.iter().map(|&p| vertices[p as usize].as_ivec3()) {
            for (offset_x, offset_z) in OFFSET {
                if dmin <= 0 {
                    break 'vertices;
                }
                let ax = vertex.x + offset_x;
                let ay = vertex.y;
                let az = vertex.z + offset_z;
                if ax < xmin || ax >= xmin + width || az < zmin || az >= zmin + height {
                    continue;
                }
                let cell = chf.cell_at((ax + bs) as u16, (az + bs) as u16);
                for i in cell.index_range() {
                    let d = (ay - chf.spans[i].y as i32).abs();
                    if d < dmin {
                        start = Some((ax, az, i));
                        dmin = d;
                    }
                    if dmin <= 0 {
                        break;
                    }
                }
            }
        }
        let start = start.ok_or(MissingSeed)?;

        // Find center of the polygon
        let (sum_x, sum_z) = poly.iter().fold((0, 0), |(x, z), &p| {
            let v = vertices[p as usize];
            (x + v.x as i32, z + v.z as i32)
        });
        let pcx = sum_x / poly.len() as i32;
        let pcz = sum_z / poly.len() as i32;

        // Use the queue as a stack for DFS
        queue.clear();
        queue.push_back(start);

        let mut dirs = [0, 1, 2, 3];
        self.reset(0);
        // DFS to move to the center. Note that we need a DFS here and can not just move
        // directly towards the center without recording intermediate nodes, even though the polygons
        // are convex. In very rare we can get stuck due to contour simplification if we do not
        // record nodes.
        let (mut cx, mut cz, mut ci) = start;
        loop {
            let Some(current) = queue.pop_back() else {
                tracing::warn!("Walk towards polygon center failed to reach center");
                break;
            };
            (cx, cz, ci) = current;

            if cx == pcx && cz == pcz {
                break;
            }

            // If we are already at the correct X-position, prefer direction
            // directly towards the center in the Z-axis; otherwise prefer
            // direction in the X-axis
            let direct_dir = if cx == pcx {
                dir_offset(0, if pcz > cz { 1 } else { -1 })
            } else {
                dir_offset(if pcx > cx { 1 } else { -1 }, 0)
            } as usize;

            // Push the direct dir last so we start with this on next iteration
            dirs.swap(direct_dir, 3);

            let cs = &chf.spans[ci];
            for dir in dirs {
                let Some(con) = cs.con(dir) else {
                    continue;
                };
                let new_x = cx + dir_offset_x(dir) as i32;
                let new_z = cz + dir_offset_z(dir) as i32;

                let hpx = new_x - xmin;
                let hpz = new_z - zmin;
                if hpx < 0 || hpx >= width || hpz < 0 || hpz >= height {
                    continue;
                }
                if *self.data_at(hpx, hpz) != 0 {
                    continue;
                }
                *self.data_at_mut(hpx, hpz) = 1;
                let new_index = chf.cell_at((new_x + bs) as u16, (new_z + bs) as u16).index()
                    as usize
                    + con as usize;
                queue.push_back((new_x, new_z, new_index));
            }

            dirs.swap(direct_dir, 3);
        }

        queue.clear();
        // get_height_data seeds are given in coordinates with borders
        queue.push_back((cx + bs, cz + bs, ci));
        self.reset(UNSET_HEIGHT);
        *self.data_at_mut(cx - xmin, cz - zmin) = chf.spans[ci].y;
        Ok(())
    }

    fn reset(&mut self, value: u16) {
        self.data.clear();
        self.data
            .resize(self.width as usize * self.height as usize, value);
    }

    #[inline]
    fn data_at(&self, x: i32, z: i32) -> &u16 {
        &self.data[(x + z * self.width as i32) as usize]
    }

    #[inline]
    fn data_at_mut(&mut self, x: i32, z: i32) -> &mut u16 {
        &mut self.data[(x + z * self.width as i32) as usize]
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Bounds {
    xmin: u16,
    xmax: u16,
    zmin: u16,
    zmax: u16,
}

#[cfg(test)]
mod tests {
    use crate::{BuildContoursFlags, test_support::flat_compact_heightfield};

    use super::*;

    fn flat_meshes(sample_distance: f32) -> (PolygonMesh, DetailPolygonMesh) {
        let mut compact = flat_compact_heightfield(10.0);
        compact.build_regions_monotone(0, 8, 20).unwrap();
        let mesh = compact
            .build_contours(1.3, 12, BuildContoursFlags::DEFAULT)
            .unwrap()
            .into_polygon_mesh(6)
            .unwrap();
        let detail = DetailPolygonMesh::new(&mesh, &compact, sample_distance, 0.5).unwrap();
        (mesh, detail)
    }

    #[test]
    fn one_submesh_per_polygon() {
        let (mesh, detail) = flat_meshes(6.0);
        assert_eq!(detail.meshes.len(), mesh.polygon_count());
        assert_eq!(detail.triangles.len(), detail.triangle_flags.len());
        let submesh = &detail.meshes[0];
        assert!(submesh.vertex_count >= 4);
        assert!(submesh.triangle_count >= 2);
        assert_eq!(
            detail.vertices.len(),
            detail.meshes.iter().map(|m| m.vertex_count).sum::<usize>()
        );
    }

    #[test]
    fn flat_ground_has_flat_detail() {
        let (_, detail) = flat_meshes(6.0);
        let y = detail.vertices[0].y;
        for vertex in &detail.vertices {
            approx::assert_relative_eq!(vertex.y, y);
        }
    }

    #[test]
    fn no_sampling_triangulates_the_polygon_only() {
        let (mesh, detail) = flat_meshes(0.0);
        let submesh = &detail.meshes[0];
        assert_eq!(submesh.vertex_count, mesh.polygon_vertices(0).len());
        assert_eq!(submesh.triangle_count, submesh.vertex_count - 2);
        // Every triangle of a quad has at least one boundary edge.
        assert!(detail.triangle_flags.iter().all(|&flags| flags != 0));
    }

    #[test]
    fn delaunay_fills_the_hull_around_a_center_point() {
        let points = vec![
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 4.0),
            Vec3A::new(4.0, 0.0, 4.0),
            Vec3A::new(4.0, 0.0, 0.0),
            Vec3A::new(2.1, 0.0, 1.9),
        ];
        let hull = [0, 1, 2, 3];
        let mut triangles = Vec::new();
        let mut edges = Vec::new();
        delaunay_hull(&points, &hull, &mut triangles, &mut edges);
        assert_eq!(triangles.len(), 4);
        assert!(triangles.iter().all(|triangle| triangle.contains(&4)));
    }

    #[test]
    fn obj_export_uses_one_based_indices() {
        let (_, detail) = flat_meshes(0.0);
        let mut obj = Vec::new();
        detail.write_obj(&mut obj).unwrap();
        let obj = String::from_utf8(obj).unwrap();
        let vertex_lines = obj.lines().filter(|line| line.starts_with("v ")).count();
        let face_lines: Vec<_> = obj.lines().filter(|line| line.starts_with("f ")).collect();
        assert_eq!(vertex_lines, detail.vertices.len());
        assert_eq!(face_lines.len(), detail.triangles.len());
        for line in face_lines {
            for index in line[2..].split(' ') {
                let index: usize = index.parse().unwrap();
                assert!((1..=vertex_lines).contains(&index));
            }
        }
    }
}
