use glam::{IVec3, U16Vec3};
use thiserror::Error;

use crate::{
    Aabb3d, AreaType, RegionId, RegionVertexId,
    contours::ContourSet,
    math::{intersect, intersect_prop, left, left_on, next, prev, vequal},
};

/// A value which indicates an invalid index within a mesh.
/// Marks unused vertex slots of a polygon and edges without a neighbour.
pub const MESH_NULL_IDX: u16 = 0xffff;

/// The largest number of vertices a polygon mesh may hold.
const MAX_MESH_VERTICES: usize = 0xfffe;

const VERTEX_BUCKET_COUNT: usize = 1 << 12;

/// Neighbour value flagging an edge on the tile border. The lower bits hold the direction.
const PORTAL_FLAG: u16 = 0x8000;

/// Represents a polygon mesh suitable for use in building a navigation mesh.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolygonMesh {
    /// The mesh vertices in grid space.
    pub vertices: Vec<U16Vec3>,
    /// Vertex indices of each polygon. [Length: `polygon_count() * max_vertices_per_polygon`]
    ///
    /// Unused slots at the end of a polygon are [`MESH_NULL_IDX`].
    pub polygons: Vec<u16>,
    /// For every polygon edge, the index of the polygon on the other side. [Length: same as `polygons`]
    ///
    /// Edge `j` runs from vertex `j` to vertex `j + 1`. Edges without a neighbour are
    /// [`MESH_NULL_IDX`], or `0x8000 | direction` for edges on the tile border.
    pub polygon_neighbors: Vec<u16>,
    /// The region id assigned to each polygon.
    pub regions: Vec<RegionId>,
    /// The user defined flags for each polygon.
    pub flags: Vec<u16>,
    /// The area id assigned to each polygon.
    pub areas: Vec<AreaType>,
    /// The maximum number of vertices per polygon
    pub max_vertices_per_polygon: u16,
    /// The bounding box of the mesh in world space.
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The AABB border size used to generate the source data from which the mesh was derived.
    pub border_size: u16,
    /// The max error of the polygon edges in the mesh.
    pub max_edge_error: f32,
}

impl PolygonMesh {
    /// The number of polygons in the mesh.
    #[inline]
    pub fn polygon_count(&self) -> usize {
        self.areas.len()
    }

    /// The vertex slots of polygon `index`, including trailing [`MESH_NULL_IDX`] entries.
    #[inline]
    pub fn polygon(&self, index: usize) -> &[u16] {
        let nvp = self.max_vertices_per_polygon as usize;
        &self.polygons[index * nvp..(index + 1) * nvp]
    }

    /// The vertex indices of polygon `index`, without unused slots.
    pub fn polygon_vertices(&self, index: usize) -> &[u16] {
        let polygon = self.polygon(index);
        &polygon[..count_polygon_vertices(polygon)]
    }

    /// The edge neighbours of polygon `index`, see [`PolygonMesh::polygon_neighbors`].
    #[inline]
    pub fn neighbors(&self, index: usize) -> &[u16] {
        let nvp = self.max_vertices_per_polygon as usize;
        &self.polygon_neighbors[index * nvp..(index + 1) * nvp]
    }
}

impl ContourSet {
    /// Builds a polygon mesh from the provided contours.
    ///
    /// Every contour is triangulated, its triangles are merged into convex polygons with at most
    /// `max_vertices_per_polygon` vertices, and vertices shared between contours are welded.
    /// Vertices on the tile border are removed afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the mesh would need more vertices or polygons than a 16-bit index
    /// can address, or if a contour could not be triangulated at all.
    pub fn into_polygon_mesh(
        self,
        max_vertices_per_polygon: u16,
    ) -> Result<PolygonMesh, PolygonMeshError> {
        let nvp = max_vertices_per_polygon as usize;
        if nvp < 3 {
            return Err(PolygonMeshError::InvalidVerticesPerPolygon {
                vertices_per_polygon: max_vertices_per_polygon,
            });
        }

        let mut max_vertices = 0;
        let mut max_triangles = 0;
        let mut max_vertices_per_contour = 0;
        for contour in &self.contours {
            // Skip null contours.
            if contour.vertices.len() < 3 {
                continue;
            }
            max_vertices += contour.vertices.len();
            max_triangles += contour.vertices.len() - 2;
            max_vertices_per_contour = max_vertices_per_contour.max(contour.vertices.len());
        }
        if max_vertices >= MAX_MESH_VERTICES {
            return Err(PolygonMeshError::TooManyVertices {
                count: max_vertices,
                max: MAX_MESH_VERTICES,
            });
        }

        let mut mesh = PolygonMesh {
            vertices: Vec::with_capacity(max_vertices),
            polygons: Vec::with_capacity(max_triangles * nvp),
            polygon_neighbors: Vec::new(),
            regions: Vec::with_capacity(max_triangles),
            flags: Vec::new(),
            areas: Vec::with_capacity(max_triangles),
            max_vertices_per_polygon,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            border_size: self.border_size,
            max_edge_error: self.max_error,
        };

        // Vertices flagged for removal.
        let mut remove_flags = vec![false; max_vertices];
        let mut welder = VertexWelder::new(max_vertices);

        let mut indices = Vec::with_capacity(max_vertices_per_contour);
        let mut triangles = Vec::with_capacity(max_vertices_per_contour);
        let mut polygons: Vec<u16> = Vec::with_capacity(max_vertices_per_contour * nvp);

        for (contour_index, contour) in self.contours.iter().enumerate() {
            // Skip null contours.
            if contour.vertices.len() < 3 {
                continue;
            }

            // Triangulate contour
            let positions: Vec<IVec3> = contour
                .vertices
                .iter()
                .map(|(vertex, _)| vertex.as_ivec3())
                .collect();
            triangles.clear();
            if !triangulate(&positions, &mut triangles) {
                tracing::warn!("into_polygon_mesh: Bad triangulation of contour {contour_index}.");
                if triangles.is_empty() {
                    return Err(PolygonMeshError::Triangulation {
                        contour: contour_index,
                    });
                }
            }

            // Add and merge vertices.
            indices.clear();
            for (vertex, flags) in &contour.vertices {
                let index = welder.add(*vertex, &mut mesh.vertices);
                if flags.contains(RegionVertexId::BORDER_VERTEX) {
                    // This vertex should be removed.
                    remove_flags[index as usize] = true;
                }
                indices.push(index);
            }

            // Build initial polygons.
            polygons.clear();
            for &[a, b, c] in &triangles {
                if a != b && a != c && b != c {
                    polygons.extend([indices[a], indices[b], indices[c]]);
                    polygons.extend(std::iter::repeat_n(MESH_NULL_IDX, nvp - 3));
                }
            }
            if polygons.is_empty() {
                continue;
            }

            // Merge polygons.
            if nvp > 3 {
                merge_polygons(&mut polygons, &mesh.vertices, nvp, |_, _| {});
            }

            // Store polygons.
            let polygon_count = polygons.len() / nvp;
            mesh.polygons.extend_from_slice(&polygons);
            mesh.regions
                .extend(std::iter::repeat_n(contour.region, polygon_count));
            mesh.areas
                .extend(std::iter::repeat_n(contour.area, polygon_count));
            if mesh.polygon_count() > max_triangles {
                return Err(PolygonMeshError::TooManyPolygons {
                    count: mesh.polygon_count(),
                    max: max_triangles,
                });
            }
        }

        // Remove edge vertices.
        remove_flags.truncate(mesh.vertices.len());
        let mut i = 0;
        while i < mesh.vertices.len() {
            if remove_flags[i] && mesh.can_remove_vertex(i as u16) {
                mesh.remove_vertex(i as u16, max_triangles)?;
                // Fixup vertex flags
                remove_flags.remove(i);
                continue;
            }
            i += 1;
        }

        // Calculate adjacency.
        mesh.build_mesh_adjacency();

        // Find portal edges
        if mesh.border_size > 0 {
            mesh.mark_portal_edges(self.width, self.height);
        }

        // The user is responsible to fill in the flags.
        mesh.flags = vec![0; mesh.polygon_count()];

        if mesh.vertices.len() > MESH_NULL_IDX as usize {
            return Err(PolygonMeshError::TooManyVertices {
                count: mesh.vertices.len(),
                max: MESH_NULL_IDX as usize,
            });
        }
        if mesh.polygon_count() > MESH_NULL_IDX as usize {
            return Err(PolygonMeshError::TooManyPolygons {
                count: mesh.polygon_count(),
                max: MESH_NULL_IDX as usize,
            });
        }

        Ok(mesh)
    }
}

impl PolygonMesh {
    fn can_remove_vertex(&self, remove: u16) -> bool {
        let nvp = self.max_vertices_per_polygon as usize;

        // Count number of polygons to remove.
        let mut touched_vertex_count = 0;
        let mut remaining_edge_count = 0;
        for polygon in self.polygons.chunks_exact(nvp) {
            let vertex_count = count_polygon_vertices(polygon);
            let removed = polygon[..vertex_count]
                .iter()
                .filter(|&&v| v == remove)
                .count();
            if removed > 0 {
                touched_vertex_count += removed;
                remaining_edge_count += vertex_count - (removed + 1);
            }
        }

        // There would be too few edges remaining to create a polygon.
        // This can happen for example when a tip of a triangle is marked
        // as deletion, but there are no other polys that share the vertex.
        // In this case, the vertex should not be removed.
        if remaining_edge_count <= 2 {
            return false;
        }

        // Find edges which share the removed vertex.
        // Each entry is the other vertex of the edge and how many polygons share it.
        let mut edges: Vec<(u16, u32)> = Vec::with_capacity(touched_vertex_count * 2);
        for polygon in self.polygons.chunks_exact(nvp) {
            let vertex_count = count_polygon_vertices(polygon);

            // Collect edges which touches the removed vertex.
            for j in 0..vertex_count {
                let k = prev(j, vertex_count);
                let (a, b) = (polygon[j], polygon[k]);
                if a != remove && b != remove {
                    continue;
                }
                // Arrange edge so that a=rem.
                let other = if b == remove { a } else { b };
                // Check if the edge exists
                match edges.iter_mut().find(|(b, _)| *b == other) {
                    // Exists, increment vertex share count.
                    Some((_, share_count)) => *share_count += 1,
                    // Add new edge.
                    None => edges.push((other, 1)),
                }
            }
        }

        // There should be no more than 2 open edges.
        // This catches the case that two non-adjacent polygons
        // share the removed vertex. In that case, do not remove the vertex.
        let open_edge_count = edges
            .iter()
            .filter(|(_, share_count)| *share_count < 2)
            .count();
        open_edge_count <= 2
    }

    fn remove_vertex(&mut self, remove: u16, max_triangles: usize) -> Result<(), PolygonMeshError> {
        let nvp = self.max_vertices_per_polygon as usize;

        // Edges of the removed polygons that do not touch the removed vertex.
        let mut edges: Vec<HoleEdge> = Vec::new();
        let mut i = 0;
        while i < self.polygon_count() {
            let polygon = &self.polygons[i * nvp..(i + 1) * nvp];
            let vertex_count = count_polygon_vertices(polygon);
            if !polygon[..vertex_count].contains(&remove) {
                i += 1;
                continue;
            }

            // Collect edges which does not touch the removed vertex.
            for j in 0..vertex_count {
                let k = prev(j, vertex_count);
                if polygon[j] != remove && polygon[k] != remove {
                    edges.push(HoleEdge {
                        from: polygon[k],
                        to: polygon[j],
                        region: self.regions[i],
                        area: self.areas[i],
                    });
                }
            }

            // Remove the polygon.
            let last = self.polygon_count() - 1;
            if i != last {
                self.polygons.copy_within(last * nvp..(last + 1) * nvp, i * nvp);
            }
            self.polygons.truncate(last * nvp);
            self.regions.swap_remove(i);
            self.areas.swap_remove(i);
        }

        // Remove vertex.
        self.vertices.remove(remove as usize);

        // Adjust indices to match the removed vertex layout.
        for index in self.polygons.iter_mut() {
            if *index != MESH_NULL_IDX && *index > remove {
                *index -= 1;
            }
        }
        for edge in edges.iter_mut() {
            if edge.from > remove {
                edge.from -= 1;
            }
            if edge.to > remove {
                edge.to -= 1;
            }
        }

        let Some(first) = edges.first().copied() else {
            return Ok(());
        };

        // Start with one vertex, keep appending connected
        // segments to the start and end of the hole.
        let mut hole = std::collections::VecDeque::from([first.from]);
        let mut hole_regions = std::collections::VecDeque::from([first.region]);
        let mut hole_areas = std::collections::VecDeque::from([first.area]);

        while !edges.is_empty() {
            let mut matched = false;
            let mut i = 0;
            while i < edges.len() {
                let edge = edges[i];
                let added = if hole.front() == Some(&edge.to) {
                    // The segment matches the beginning of the hole boundary.
                    hole.push_front(edge.from);
                    hole_regions.push_front(edge.region);
                    hole_areas.push_front(edge.area);
                    true
                } else if hole.back() == Some(&edge.from) {
                    // The segment matches the end of the hole boundary.
                    hole.push_back(edge.to);
                    hole_regions.push_back(edge.region);
                    hole_areas.push_back(edge.area);
                    true
                } else {
                    false
                };
                if added {
                    // The edge segment was added, remove it.
                    edges.swap_remove(i);
                    matched = true;
                } else {
                    i += 1;
                }
            }
            if !matched {
                break;
            }
        }

        // Generate temp vertex array for triangulation.
        let positions: Vec<IVec3> = hole
            .iter()
            .map(|&v| self.vertices[v as usize].as_ivec3())
            .collect();

        // Triangulate the hole.
        let mut triangles = Vec::with_capacity(hole.len());
        if !triangulate(&positions, &mut triangles) {
            tracing::warn!("remove_vertex: Triangulation of the hole returned bad results.");
        }

        // Merge the hole triangles back to polygons.
        let mut polygons = Vec::with_capacity(triangles.len() * nvp);
        let mut polygon_regions = Vec::with_capacity(triangles.len());
        let mut polygon_areas = Vec::with_capacity(triangles.len());

        // Build initial polygons.
        for &[a, b, c] in &triangles {
            if a == b || a == c || b == c {
                continue;
            }
            polygons.extend([hole[a], hole[b], hole[c]]);
            polygons.extend(std::iter::repeat_n(MESH_NULL_IDX, nvp - 3));
            // If this polygon covers multiple region types then
            // mark it as such
            if hole_regions[a] != hole_regions[b] || hole_regions[b] != hole_regions[c] {
                polygon_regions.push(RegionId::NONE);
            } else {
                polygon_regions.push(hole_regions[a]);
            }
            polygon_areas.push(hole_areas[a]);
        }
        if polygons.is_empty() {
            return Ok(());
        }

        // Merge polygons.
        if nvp > 3 {
            merge_polygons(&mut polygons, &self.vertices, nvp, |merged, removed| {
                if polygon_regions[merged] != polygon_regions[removed] {
                    polygon_regions[merged] = RegionId::NONE;
                }
                polygon_regions.swap_remove(removed);
                polygon_areas.swap_remove(removed);
            });
        }

        // Store polygons.
        for (i, polygon) in polygons.chunks_exact(nvp).enumerate() {
            if self.polygon_count() >= max_triangles {
                tracing::error!(
                    "remove_vertex: Too many polygons {} (max: {max_triangles}).",
                    self.polygon_count() + 1
                );
                return Err(PolygonMeshError::TooManyPolygons {
                    count: self.polygon_count() + 1,
                    max: max_triangles,
                });
            }
            self.polygons.extend_from_slice(polygon);
            self.regions.push(polygon_regions[i]);
            self.areas.push(polygon_areas[i]);
        }
        Ok(())
    }

    /// Fills [`PolygonMesh::polygon_neighbors`] by matching up the shared edges of all polygons.
    pub(crate) fn build_mesh_adjacency(&mut self) {
        let nvp = self.max_vertices_per_polygon as usize;
        let polygon_count = self.polygon_count();
        let max_edge_count = polygon_count * nvp;

        let mut first_edge = vec![MESH_NULL_IDX as usize; self.vertices.len()];
        let mut next_edge = vec![MESH_NULL_IDX as usize; max_edge_count];
        let mut edges: Vec<MeshEdge> = Vec::with_capacity(max_edge_count);

        let edge_vertices = |polygon: &[u16], j: usize| {
            let v0 = polygon[j];
            let v1 = if j + 1 >= nvp || polygon[j + 1] == MESH_NULL_IDX {
                polygon[0]
            } else {
                polygon[j + 1]
            };
            (v0, v1)
        };

        for (i, polygon) in self.polygons.chunks_exact(nvp).enumerate() {
            for j in 0..count_polygon_vertices(polygon) {
                let (v0, v1) = edge_vertices(polygon, j);
                if v0 < v1 {
                    // Insert edge
                    next_edge[edges.len()] = first_edge[v0 as usize];
                    first_edge[v0 as usize] = edges.len();
                    edges.push(MeshEdge {
                        vertices: [v0, v1],
                        polygons: [i, i],
                        polygon_edges: [j, 0],
                    });
                }
            }
        }

        for (i, polygon) in self.polygons.chunks_exact(nvp).enumerate() {
            for j in 0..count_polygon_vertices(polygon) {
                let (v0, v1) = edge_vertices(polygon, j);
                if v0 > v1 {
                    let mut e = first_edge[v1 as usize];
                    while e != MESH_NULL_IDX as usize {
                        let edge = &mut edges[e];
                        if edge.vertices[1] == v0 && edge.polygons[0] == edge.polygons[1] {
                            edge.polygons[1] = i;
                            edge.polygon_edges[1] = j;
                            break;
                        }
                        e = next_edge[e];
                    }
                }
            }
        }

        // Store adjacency
        self.polygon_neighbors = vec![MESH_NULL_IDX; polygon_count * nvp];
        for edge in &edges {
            let [p0, p1] = edge.polygons;
            if p0 != p1 {
                self.polygon_neighbors[p0 * nvp + edge.polygon_edges[0]] = p1 as u16;
                self.polygon_neighbors[p1 * nvp + edge.polygon_edges[1]] = p0 as u16;
            }
        }
    }

    fn mark_portal_edges(&mut self, width: u16, height: u16) {
        let nvp = self.max_vertices_per_polygon as usize;
        for i in 0..self.polygon_count() {
            let polygon = &self.polygons[i * nvp..(i + 1) * nvp];
            let vertex_count = count_polygon_vertices(polygon);
            for j in 0..vertex_count {
                // Skip connected edges.
                if self.polygon_neighbors[i * nvp + j] != MESH_NULL_IDX {
                    continue;
                }
                let va = self.vertices[polygon[j] as usize];
                let vb = self.vertices[polygon[next(j, vertex_count)] as usize];
                let direction = if va.x == 0 && vb.x == 0 {
                    0
                } else if va.z == height && vb.z == height {
                    1
                } else if va.x == width && vb.x == width {
                    2
                } else if va.z == 0 && vb.z == 0 {
                    3
                } else {
                    continue;
                };
                self.polygon_neighbors[i * nvp + j] = PORTAL_FLAG | direction;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct HoleEdge {
    from: u16,
    to: u16,
    region: RegionId,
    area: AreaType,
}

struct MeshEdge {
    vertices: [u16; 2],
    polygons: [usize; 2],
    polygon_edges: [usize; 2],
}

/// Welds vertices that share a cell on the xz-plane and are within two cells of each other
/// along the y-axis.
struct VertexWelder {
    first_vertex: Vec<Option<u16>>,
    next_vertex: Vec<Option<u16>>,
}

impl VertexWelder {
    fn new(capacity: usize) -> Self {
        Self {
            first_vertex: vec![None; VERTEX_BUCKET_COUNT],
            next_vertex: Vec::with_capacity(capacity),
        }
    }

    fn add(&mut self, vertex: U16Vec3, vertices: &mut Vec<U16Vec3>) -> u16 {
        let bucket = compute_vertex_hash(vertex.x, vertex.z);
        let mut candidate = self.first_vertex[bucket];
        while let Some(i) = candidate {
            let v = vertices[i as usize];
            if v.x == vertex.x && v.y.abs_diff(vertex.y) <= 2 && v.z == vertex.z {
                return i;
            }
            candidate = self.next_vertex[i as usize];
        }

        // Could not find, create new.
        let i = vertices.len() as u16;
        vertices.push(vertex);
        self.next_vertex.push(self.first_vertex[bucket]);
        self.first_vertex[bucket] = Some(i);
        i
    }
}

fn compute_vertex_hash(x: u16, z: u16) -> usize {
    // Large multiplicative constants; here arbitrarily chosen primes
    const H1: u32 = 0x8da6b343;
    const H3: u32 = 0xcb1ab31f;
    let n = H1.wrapping_mul(x as u32).wrapping_add(H3.wrapping_mul(z as u32));
    n as usize & (VERTEX_BUCKET_COUNT - 1)
}

/// Number of used vertex slots of a polygon.
pub(crate) fn count_polygon_vertices(polygon: &[u16]) -> usize {
    polygon
        .iter()
        .position(|&v| v == MESH_NULL_IDX)
        .unwrap_or(polygon.len())
}

/// Greedily merges the polygons stored in `polygons` (`nvp` slots each), always merging the pair
/// with the longest shared edge first, as long as the result stays convex.
/// `on_merge(merged, removed)` is called before polygon `removed` is replaced by the last polygon.
fn merge_polygons(
    polygons: &mut Vec<u16>,
    vertices: &[U16Vec3],
    nvp: usize,
    mut on_merge: impl FnMut(usize, usize),
) {
    loop {
        let polygon_count = polygons.len() / nvp;

        // Find best polygons to merge.
        let mut best: Option<(usize, usize, usize, usize)> = None;
        let mut best_merge_value = 0;
        for j in 0..polygon_count.saturating_sub(1) {
            let pj = &polygons[j * nvp..(j + 1) * nvp];
            for k in j + 1..polygon_count {
                let pk = &polygons[k * nvp..(k + 1) * nvp];
                if let Some((value, ea, eb)) = polygon_merge_value(pj, pk, vertices, nvp) {
                    if value > best_merge_value {
                        best_merge_value = value;
                        best = Some((j, k, ea, eb));
                    }
                }
            }
        }

        let Some((pa, pb, ea, eb)) = best else {
            break;
        };

        // Found best, merge.
        let merged = merge_polygon_vertices(
            &polygons[pa * nvp..(pa + 1) * nvp],
            &polygons[pb * nvp..(pb + 1) * nvp],
            ea,
            eb,
            nvp,
        );
        polygons[pa * nvp..(pa + 1) * nvp].copy_from_slice(&merged);
        on_merge(pa, pb);
        let last = polygon_count - 1;
        if pb != last {
            polygons.copy_within(last * nvp..(last + 1) * nvp, pb * nvp);
        }
        polygons.truncate(last * nvp);
    }
}

/// Returns the squared length of the edge shared by `pa` and `pb` along with the index of the
/// edge in either polygon, or `None` if the polygons cannot be merged into a convex polygon.
fn polygon_merge_value(
    pa: &[u16],
    pb: &[u16],
    vertices: &[U16Vec3],
    nvp: usize,
) -> Option<(i32, usize, usize)> {
    let na = count_polygon_vertices(pa);
    let nb = count_polygon_vertices(pb);

    // If the merged polygon would be too big, do not merge.
    if na + nb - 2 > nvp {
        return None;
    }

    // Check if the polygons share an edge.
    let sorted = |a: u16, b: u16| if a > b { (b, a) } else { (a, b) };
    let mut shared = None;
    for i in 0..na {
        let edge_a = sorted(pa[i], pa[(i + 1) % na]);
        if let Some(j) = (0..nb).find(|&j| sorted(pb[j], pb[(j + 1) % nb]) == edge_a) {
            shared = Some((i, j));
        }
    }
    // No common edge, cannot merge.
    let (ea, eb) = shared?;

    let vertex = |i: u16| vertices[i as usize].as_ivec3();

    // Check to see if the merged polygon would be convex.
    let va = pa[(ea + na - 1) % na];
    let vb = pa[ea];
    let vc = pb[(eb + 2) % nb];
    if !left(vertex(va), vertex(vb), vertex(vc)) {
        return None;
    }
    let va = pb[(eb + nb - 1) % nb];
    let vb = pb[eb];
    let vc = pa[(ea + 2) % na];
    if !left(vertex(va), vertex(vb), vertex(vc)) {
        return None;
    }

    let d = vertex(pa[ea]) - vertex(pa[(ea + 1) % na]);
    Some((d.x * d.x + d.z * d.z, ea, eb))
}

fn merge_polygon_vertices(pa: &[u16], pb: &[u16], ea: usize, eb: usize, nvp: usize) -> Vec<u16> {
    let na = count_polygon_vertices(pa);
    let nb = count_polygon_vertices(pb);

    let mut merged = Vec::with_capacity(nvp);
    // Add pa
    merged.extend((0..na - 1).map(|i| pa[(ea + 1 + i) % na]));
    // Add pb
    merged.extend((0..nb - 1).map(|i| pb[(eb + 1 + i) % nb]));
    merged.resize(nvp, MESH_NULL_IDX);
    merged
}

#[derive(Debug, Clone, Copy)]
struct EarIndex {
    vertex: usize,
    /// Whether the vertex is the tip of an ear that can be clipped.
    removable: bool,
}

/// Ear-clips the polygon `vertices` into `triangles`, which index into `vertices`.
///
/// Returns `false` if the polygon could only be partially triangulated, which can happen when
/// the contour simplification was too aggressive.
pub(crate) fn triangulate(vertices: &[IVec3], triangles: &mut Vec<[usize; 3]>) -> bool {
    let mut indices: Vec<EarIndex> = (0..vertices.len())
        .map(|vertex| EarIndex {
            vertex,
            removable: false,
        })
        .collect();
    let mut n = indices.len();
    if n < 3 {
        return false;
    }

    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, vertices, &indices) {
            indices[i1].removable = true;
        }
    }

    let edge_length = |indices: &[EarIndex], i: usize, i2: usize| {
        let p0 = vertices[indices[i].vertex];
        let p2 = vertices[indices[i2].vertex];
        let d = p2 - p0;
        d.x * d.x + d.z * d.z
    };

    while n > 3 {
        let mut min_len = None;
        let mut min_i = None;
        for i in 0..n {
            let i1 = next(i, n);
            if indices[i1].removable {
                let len = edge_length(&indices, i, next(i1, n));
                if min_len.is_none_or(|min_len| len < min_len) {
                    min_len = Some(len);
                    min_i = Some(i);
                }
            }
        }

        if min_i.is_none() {
            // We might get here because the contour has overlapping segments, like this:
            //
            //  A o-o=====o---o B
            //   /  |C   D|    \.
            //  o   o     o     o
            //  :   :     :     :
            //
            // We'll try to recover by loosing up the in_cone test a bit so that a diagonal
            // like A-B or C-D can be found and we can continue.
            for i in 0..n {
                let i1 = next(i, n);
                let i2 = next(i1, n);
                if diagonal_loose(i, i2, vertices, &indices) {
                    let len = edge_length(&indices, i, next(i2, n));
                    if min_len.is_none_or(|min_len| len < min_len) {
                        min_len = Some(len);
                        min_i = Some(i);
                    }
                }
            }
        }

        let Some(i) = min_i else {
            // The contour is messed up. This sometimes happens
            // if the contour simplification is too aggressive.
            return false;
        };

        let mut i1 = next(i, n);
        let i2 = next(i1, n);
        triangles.push([indices[i].vertex, indices[i1].vertex, indices[i2].vertex]);

        // Removes P[i1] by copying P[i+1]...P[n-1] left one index.
        indices.remove(i1);
        n -= 1;
        if i1 >= n {
            i1 = 0;
        }
        let i = prev(i1, n);

        // Update diagonal flags.
        indices[i].removable = diagonal(prev(i, n), i1, vertices, &indices);
        indices[i1].removable = diagonal(i, next(i1, n), vertices, &indices);
    }

    // Append the remaining triangle.
    triangles.push([indices[0].vertex, indices[1].vertex, indices[2].vertex]);
    true
}

/// Returns T iff (v_i, v_j) is a proper internal *or* external
/// diagonal of P, *ignoring edges incident to v_i and v_j*.
fn diagonalie(i: usize, j: usize, vertices: &[IVec3], indices: &[EarIndex], loose: bool) -> bool {
    let n = indices.len();
    let d0 = vertices[indices[i].vertex];
    let d1 = vertices[indices[j].vertex];

    // For each edge (k,k+1) of P
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i or j
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = vertices[indices[k].vertex];
        let p1 = vertices[indices[k1].vertex];
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        let intersects = if loose {
            intersect_prop(d0, d1, p0, p1)
        } else {
            intersect(d0, d1, p0, p1)
        };
        if intersects {
            return false;
        }
    }
    true
}

/// Returns true iff the diagonal (i,j) is strictly internal to the
/// polygon P in the neighborhood of the i endpoint.
fn in_cone(i: usize, j: usize, vertices: &[IVec3], indices: &[EarIndex]) -> bool {
    let n = indices.len();
    let pi = vertices[indices[i].vertex];
    let pj = vertices[indices[j].vertex];
    let pi1 = vertices[indices[next(i, n)].vertex];
    let pin1 = vertices[indices[prev(i, n)].vertex];

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn in_cone_loose(i: usize, j: usize, vertices: &[IVec3], indices: &[EarIndex]) -> bool {
    let n = indices.len();
    let pi = vertices[indices[i].vertex];
    let pj = vertices[indices[j].vertex];
    let pi1 = vertices[indices[next(i, n)].vertex];
    let pin1 = vertices[indices[prev(i, n)].vertex];

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left_on(pi, pj, pin1) && left_on(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Returns T iff (v_i, v_j) is a proper internal
/// diagonal of P.
fn diagonal(i: usize, j: usize, vertices: &[IVec3], indices: &[EarIndex]) -> bool {
    in_cone(i, j, vertices, indices) && diagonalie(i, j, vertices, indices, false)
}

fn diagonal_loose(i: usize, j: usize, vertices: &[IVec3], indices: &[EarIndex]) -> bool {
    in_cone_loose(i, j, vertices, indices) && diagonalie(i, j, vertices, indices, true)
}

/// Errors that can occur when building a [`PolygonMesh`].
#[derive(Debug, Error)]
pub enum PolygonMeshError {
    /// Polygons need at least three vertices.
    #[error("Polygons need at least 3 vertices, but got {vertices_per_polygon}")]
    InvalidVerticesPerPolygon {
        /// The requested maximum number of vertices per polygon
        vertices_per_polygon: u16,
    },
    /// The mesh has more vertices than 16-bit indices can address.
    #[error("Too many vertices: {count} (max: {max})")]
    TooManyVertices {
        /// The number of vertices
        count: usize,
        /// The maximum number of vertices
        max: usize,
    },
    /// The mesh has more polygons than 16-bit indices can address.
    #[error("Too many polygons: {count} (max: {max})")]
    TooManyPolygons {
        /// The number of polygons
        count: usize,
        /// The maximum number of polygons
        max: usize,
    },
    /// A contour could not be triangulated at all.
    #[error("Failed to triangulate contour {contour}")]
    Triangulation {
        /// The index of the contour in the contour set
        contour: usize,
    },
}
