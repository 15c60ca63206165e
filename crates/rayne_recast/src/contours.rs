use glam::{IVec3, U16Vec3};
use thiserror::Error;

use crate::{
    Aabb3d, AreaType, CompactHeightfield, RegionId,
    math::{
        distance_squared_between_point_and_line_ivec, intersect, left, left_on, next, prev,
        vequal,
    },
};

/// Maximum number of steps a single contour walk may take.
const MAX_WALK_ITERATIONS: usize = 40_000;

impl CompactHeightfield {
    /// The raw contours will match the region outlines exactly. The `max_error` and `max_edge_len`
    /// parameters control how closely the simplified contours will match the raw contours.
    ///
    /// Simplified contours are generated such that the vertices for portals between areas match up.
    /// (They are considered mandatory vertices.)
    ///
    /// Setting `max_edge_len` to zero will disable the edge length feature.
    ///
    /// # Errors
    ///
    /// Returns an error if the outline of a region cannot be followed through the neighbour links,
    /// or if following it does not lead back to its start.
    pub fn build_contours(
        &self,
        max_error: f32,
        max_edge_len: u16,
        build_flags: BuildContoursFlags,
    ) -> Result<ContourSet, ContourError> {
        let border_size = self.border_size;
        let mut contour_set = ContourSet {
            contours: Vec::with_capacity(self.max_region.bits().max(8) as usize),
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            width: self.width.saturating_sub(border_size * 2),
            height: self.height.saturating_sub(border_size * 2),
            border_size,
            max_error,
        };
        if border_size > 0 {
            // If the heightfield was built with border_size, remove the offset
            let pad = border_size as f32 * self.cell_size;
            contour_set.aabb.min.x += pad;
            contour_set.aabb.min.z += pad;
            contour_set.aabb.max.x -= pad;
            contour_set.aabb.max.z -= pad;
        }

        let mut flags = vec![0_u8; self.spans.len()];

        // Mark boundaries
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    let region = self.spans[i].region;
                    if !region.is_region() {
                        flags[i] = 0;
                        continue;
                    }
                    let mut connected = 0_u8;
                    for dir in 0..4 {
                        let neighbor_region = self
                            .neighbor_index(x, z, i, dir)
                            .map(|a_i| self.spans[a_i].region)
                            .unwrap_or(RegionId::NONE);
                        if neighbor_region == region {
                            connected |= 1 << dir;
                        }
                    }
                    // Inverse, mark non connected edges.
                    flags[i] = connected ^ 0xf;
                }
            }
        }

        let mut raw_vertices = Vec::with_capacity(256);
        let mut simplified = Vec::with_capacity(64);

        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    if flags[i] == 0 || flags[i] == 0xf {
                        flags[i] = 0;
                        continue;
                    }
                    let region = self.spans[i].region;
                    if !region.is_region() {
                        continue;
                    }
                    let area = self.areas[i];

                    raw_vertices.clear();
                    simplified.clear();

                    self.walk_contour_build(x, z, i, &mut flags, &mut raw_vertices)?;
                    simplify_contour(
                        &raw_vertices,
                        &mut simplified,
                        max_error,
                        max_edge_len,
                        build_flags,
                    );
                    remove_degenerate_segments(&mut simplified);

                    // Create contour.
                    if simplified.len() < 3 {
                        continue;
                    }
                    let remove_border = |(vertex, flags): &(U16Vec3, RegionVertexId)| {
                        let mut vertex = *vertex;
                        // If the heightfield was build with border_size, remove the offset.
                        vertex.x = vertex.x.saturating_sub(border_size);
                        vertex.z = vertex.z.saturating_sub(border_size);
                        (vertex, *flags)
                    };
                    contour_set.contours.push(Contour {
                        vertices: simplified.iter().map(remove_border).collect(),
                        raw_vertices: raw_vertices.iter().map(remove_border).collect(),
                        region,
                        area,
                    });
                }
            }
        }

        contour_set.merge_holes(self.max_region);
        Ok(contour_set)
    }

    fn walk_contour_build(
        &self,
        mut x: u16,
        mut z: u16,
        mut i: usize,
        flags: &mut [u8],
        points: &mut Vec<(U16Vec3, RegionVertexId)>,
    ) -> Result<(), ContourError> {
        // Choose the first non-connected edge
        let mut dir = 0_u8;
        while flags[i] & (1 << dir) == 0 {
            dir += 1;
        }

        let start_dir = dir;
        let start_i = i;
        let area = self.areas[i];

        for iteration in 1.. {
            if iteration > MAX_WALK_ITERATIONS {
                return Err(ContourError::UnterminatedWalk { span: start_i });
            }
            if flags[i] & (1 << dir) != 0 {
                // Choose the edge corner
                let (p_y, is_border_vertex) = self.get_corner_height(x, z, i, dir);
                let (p_x, p_z) = match dir {
                    0 => (x, z + 1),
                    1 => (x + 1, z + 1),
                    2 => (x + 1, z),
                    _ => (x, z),
                };
                let mut r = RegionVertexId::NONE;
                let mut is_area_border = false;
                if let Some(a_i) = self.neighbor_index(x, z, i, dir) {
                    r = RegionVertexId::from(self.spans[a_i].region);
                    if area != self.areas[a_i] {
                        is_area_border = true;
                    }
                }
                if is_border_vertex {
                    r |= RegionVertexId::BORDER_VERTEX;
                }
                if is_area_border {
                    r |= RegionVertexId::AREA_BORDER;
                }
                points.push((U16Vec3::new(p_x, p_y, p_z), r));

                // Remove visited edges
                flags[i] &= !(1 << dir);
                // Rotate clockwise
                dir = (dir + 1) & 0x3;
            } else {
                let Some(n_i) = self.neighbor_index(x, z, i, dir) else {
                    return Err(ContourError::MissingNeighbour { x, z, span: i });
                };
                let (n_x, n_z, _) = self.con_indices(x as i32, z as i32, dir, 0);
                x = n_x as u16;
                z = n_z as u16;
                i = n_i;
                // Rotate counterclockwise
                dir = (dir + 3) & 0x3;
            }
            if start_i == i && start_dir == dir {
                break;
            }
        }
        Ok(())
    }

    fn get_corner_height(&self, x: u16, z: u16, i: usize, dir: u8) -> (u16, bool) {
        let span = &self.spans[i];
        let mut corner_height = span.y;
        let dir_p = (dir + 1) & 0x3;

        // Combine region and area codes in order to prevent
        // border vertices which are in between two areas to be removed.
        let region_and_area =
            |i: usize| self.spans[i].region.bits() as u32 | ((self.areas[i].0 as u32) << 16);
        let mut regs = [0_u32; 4];
        regs[0] = region_and_area(i);

        if let Some(con) = span.con(dir) {
            let (a_x, a_z, a_i) = self.con_indices(x as i32, z as i32, dir, con);
            let a_span = &self.spans[a_i];
            corner_height = corner_height.max(a_span.y);
            regs[1] = region_and_area(a_i);
            if let Some(con) = a_span.con(dir_p) {
                let (_, _, b_i) = self.con_indices(a_x, a_z, dir_p, con);
                corner_height = corner_height.max(self.spans[b_i].y);
                regs[2] = region_and_area(b_i);
            }
        }
        if let Some(con) = span.con(dir_p) {
            let (a_x, a_z, a_i) = self.con_indices(x as i32, z as i32, dir_p, con);
            let a_span = &self.spans[a_i];
            corner_height = corner_height.max(a_span.y);
            regs[3] = region_and_area(a_i);
            if let Some(con) = a_span.con(dir) {
                let (_, _, b_i) = self.con_indices(a_x, a_z, dir, con);
                corner_height = corner_height.max(self.spans[b_i].y);
                regs[2] = region_and_area(b_i);
            }
        }

        // Check if the vertex is special edge vertex, these vertices will be removed later.
        let border = RegionId::BORDER_REGION.bits() as u32;
        let is_border_vertex = (0..4).any(|j| {
            let a = regs[j];
            let b = regs[(j + 1) & 0x3];
            let c = regs[(j + 2) & 0x3];
            let d = regs[(j + 3) & 0x3];

            // The vertex is a border vertex there are two same exterior cells in a row,
            // followed by two interior cells and none of the regions are out of bounds.
            let two_same_exts = (a & b & border) != 0 && a == b;
            let two_ints = ((c | d) & border) == 0;
            let ints_same_area = (c >> 16) == (d >> 16);
            let no_zeros = a != 0 && b != 0 && c != 0 && d != 0;
            two_same_exts && two_ints && ints_same_area && no_zeros
        });
        (corner_height, is_border_vertex)
    }
}

fn simplify_contour(
    points: &[(U16Vec3, RegionVertexId)],
    simplified: &mut Vec<(U16Vec3, RegionVertexId)>,
    max_error: f32,
    max_edge_len: u16,
    flags: BuildContoursFlags,
) {
    let point_count = points.len();
    // Simplified vertices paired with the index of the raw point they came from.
    let mut indexed: Vec<(IVec3, usize)> = Vec::with_capacity(simplified.capacity());
    let raw = |i: usize| points[i].0.as_ivec3();

    // Add initial points.
    let has_connections = points
        .iter()
        .any(|(_, r)| r.intersects(RegionVertexId::REGION_MASK));
    if has_connections {
        // The contour has some portals to other regions.
        // Add a new point to every location where the region changes.
        for i in 0..point_count {
            let ii = (i + 1) % point_count;
            let (a, b) = (points[i].1, points[ii].1);
            let different_regs = (a & RegionVertexId::REGION_MASK) != (b & RegionVertexId::REGION_MASK);
            let area_borders = a.contains(RegionVertexId::AREA_BORDER)
                != b.contains(RegionVertexId::AREA_BORDER);
            if different_regs || area_borders {
                indexed.push((raw(i), i));
            }
        }
    }

    if indexed.is_empty() {
        // If there is no connections at all,
        // create some initial points for the simplification process.
        // Find lower-left and upper-right vertices of the contour.
        let mut lower_left = (raw(0), 0);
        let mut upper_right = (raw(0), 0);
        for i in 0..point_count {
            let v = raw(i);
            let ll = lower_left.0;
            if v.x < ll.x || (v.x == ll.x && v.z < ll.z) {
                lower_left = (v, i);
            }
            let ur = upper_right.0;
            if v.x > ur.x || (v.x == ur.x && v.z > ur.z) {
                upper_right = (v, i);
            }
        }
        indexed.push(lower_left);
        indexed.push(upper_right);
    }

    // Add points until all raw points are within
    // error tolerance to the simplified shape.
    let max_error_sq = max_error * max_error;
    let mut i = 0;
    while i < indexed.len() {
        let ii = (i + 1) % indexed.len();
        let (mut a, a_i) = indexed[i];
        let (mut b, b_i) = indexed[ii];

        // Find maximum deviation from the segment.
        let mut max_d = 0.0;
        let mut max_i = None;

        // Traverse the segment in lexilogical order so that the
        // max deviation is calculated similarly when traversing
        // opposite segments.
        let (mut c_i, c_inc, end_i) = if b.x > a.x || (b.x == a.x && b.z > a.z) {
            ((a_i + 1) % point_count, 1, b_i)
        } else {
            std::mem::swap(&mut a, &mut b);
            ((b_i + point_count - 1) % point_count, point_count - 1, a_i)
        };

        // Tessellate only outer edges or edges between areas.
        let c_flags = points[c_i].1;
        if !c_flags.intersects(RegionVertexId::REGION_MASK)
            || c_flags.contains(RegionVertexId::AREA_BORDER)
        {
            while c_i != end_i {
                let d = distance_squared_between_point_and_line_ivec(raw(c_i), (a, b));
                if d > max_d {
                    max_d = d;
                    max_i = Some(c_i);
                }
                c_i = (c_i + c_inc) % point_count;
            }
        }

        // If the max deviation is larger than accepted error,
        // add new point, else continue to next segment.
        match max_i {
            Some(max_i) if max_d > max_error_sq => {
                indexed.insert(i + 1, (raw(max_i), max_i));
            }
            _ => i += 1,
        }
    }

    // Split too long edges.
    let tessellate_walls = flags.contains(BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES);
    let tessellate_areas = flags.contains(BuildContoursFlags::TESSELLATE_AREA_EDGES);
    if max_edge_len > 0 && (tessellate_walls || tessellate_areas) {
        let max_edge_len_sq = max_edge_len as i32 * max_edge_len as i32;
        let mut i = 0;
        while i < indexed.len() {
            let ii = (i + 1) % indexed.len();
            let (a, a_i) = indexed[i];
            let (b, b_i) = indexed[ii];

            // Find maximum deviation from the segment.
            let mut max_i = None;
            let c_i = (a_i + 1) % point_count;
            let c_flags = points[c_i].1;

            // Tessellate only outer edges or edges between areas.
            let tessellate = (tessellate_walls && !c_flags.intersects(RegionVertexId::REGION_MASK))
                || (tessellate_areas && c_flags.contains(RegionVertexId::AREA_BORDER));
            if tessellate {
                let d = b - a;
                if d.x * d.x + d.z * d.z > max_edge_len_sq {
                    // Round based on the segments in lexilogical order so that the
                    // max tesselation is consistent regardles in which direction
                    // segments are traversed.
                    let n = if b_i < a_i {
                        b_i + point_count - a_i
                    } else {
                        b_i - a_i
                    };
                    if n > 1 {
                        if b.x > a.x || (b.x == a.x && b.z > a.z) {
                            max_i = Some((a_i + n / 2) % point_count);
                        } else {
                            max_i = Some((a_i + n.div_ceil(2)) % point_count);
                        }
                    }
                }
            }

            match max_i {
                Some(max_i) => indexed.insert(i + 1, (raw(max_i), max_i)),
                None => i += 1,
            }
        }
    }

    // The edge vertex flag is take from the current raw point,
    // and the neighbour region is take from the next raw point.
    simplified.extend(indexed.iter().map(|&(_, raw_i)| {
        let a_i = (raw_i + 1) % point_count;
        let region = points[a_i].1 & (RegionVertexId::REGION_MASK | RegionVertexId::AREA_BORDER);
        let border = points[raw_i].1 & RegionVertexId::BORDER_VERTEX;
        (points[raw_i].0, region | border)
    }));
}

/// Remove adjacent vertices which are equal on xz-plane,
/// or else the triangulator will get confused.
fn remove_degenerate_segments(simplified: &mut Vec<(U16Vec3, RegionVertexId)>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = next(i, simplified.len());
        let (a, b) = (simplified[i].0, simplified[ni].0);
        if a.x == b.x && a.z == b.z {
            // Degenerate segment, remove.
            simplified.remove(i);
        }
        i += 1;
    }
}

fn calc_area_of_polygon_2d(vertices: &[(U16Vec3, RegionVertexId)]) -> i32 {
    let n = vertices.len();
    let mut area = 0;
    for i in 0..n {
        let vi = vertices[i].0.as_ivec3();
        let vj = vertices[prev(i, n)].0.as_ivec3();
        area += vi.x * vj.z - vj.x * vi.z;
    }
    (area + 1) / 2
}

impl ContourSet {
    /// Merges hole contours (wound backwards) into the outline of their region.
    fn merge_holes(&mut self, max_region: RegionId) {
        // Calculate winding of all polygons.
        let is_hole: Vec<bool> = self
            .contours
            .iter()
            .map(|contour| calc_area_of_polygon_2d(&contour.vertices) < 0)
            .collect();
        if !is_hole.contains(&true) {
            return;
        }

        // Collect outline contour and holes contours per region.
        // We assume that there is one outline and multiple holes.
        let region_count = max_region.bits() as usize + 1;
        let mut outlines: Vec<Option<usize>> = vec![None; region_count];
        let mut holes: Vec<Vec<usize>> = vec![Vec::new(); region_count];
        for (i, contour) in self.contours.iter().enumerate() {
            let region = contour.region.bits() as usize;
            if region >= region_count {
                continue;
            }
            // Positively would contours are outlines, negative holes.
            if is_hole[i] {
                holes[region].push(i);
            } else {
                if outlines[region].is_some() {
                    tracing::error!("build_contours: Multiple outlines for region {region}.");
                }
                outlines[region] = Some(i);
            }
        }

        // Finally merge each regions holes into the outline.
        for (region, region_holes) in holes.iter().enumerate() {
            if region_holes.is_empty() {
                continue;
            }
            match outlines[region] {
                Some(outline) => self.merge_region_holes(outline, region_holes),
                None => {
                    // The region does not have an outline.
                    // This can happen if the contour becomes self-overlapping because of
                    // too aggressive simplification settings.
                    tracing::error!(
                        "build_contours: Bad outline for region {region}, contour simplification is likely too aggressive."
                    );
                }
            }
        }

        self.contours.retain(|contour| !contour.vertices.is_empty());
    }

    fn merge_region_holes(&mut self, outline: usize, hole_indices: &[usize]) {
        // Sort holes from left to right.
        let mut holes: Vec<ContourHole> = hole_indices
            .iter()
            .map(|&contour| {
                let vertices = &self.contours[contour].vertices;
                let (leftmost, min) = vertices
                    .iter()
                    .enumerate()
                    .map(|(i, (v, _))| (i, (v.x, v.z)))
                    .min_by_key(|&(_, key)| key)
                    .unwrap_or((0, (0, 0)));
                ContourHole {
                    contour,
                    min,
                    leftmost,
                }
            })
            .collect();
        holes.sort_by_key(|hole| hole.min);

        let mut diagonals = Vec::new();

        // Merge holes into the outline one by one.
        for i in 0..holes.len() {
            let hole = &holes[i];
            let hole_vertices = self.contours[hole.contour].vertices.clone();
            let outline_vertices = &self.contours[outline].vertices;

            let mut index = None;
            let mut best_vertex = hole.leftmost;
            for _ in 0..hole_vertices.len() {
                // Find potential diagonals.
                // The 'best' vertex must be in the cone described by 3 consecutive vertices of the outline.
                // ..o j-1
                //   |
                //   |   * best
                //   |
                // j o-----o j+1
                //         :
                diagonals.clear();
                let corner = hole_vertices[best_vertex].0.as_ivec3();
                for j in 0..outline_vertices.len() {
                    if in_cone(j, outline_vertices, corner) {
                        let d = outline_vertices[j].0.as_ivec3() - corner;
                        diagonals.push((j, d.x * d.x + d.z * d.z));
                    }
                }
                // Sort potential diagonals by distance, we want to make the connection as short as possible.
                diagonals.sort_by_key(|&(_, dist)| dist);

                // Find a diagonal that is not intersecting the outline not the remaining holes.
                index = diagonals.iter().map(|&(j, _)| j).find(|&j| {
                    let pt = outline_vertices[j].0.as_ivec3();
                    let mut intersect =
                        intersect_seg_contour(pt, corner, Some(j), outline_vertices);
                    for other in &holes[i..] {
                        if intersect {
                            break;
                        }
                        intersect |= intersect_seg_contour(
                            pt,
                            corner,
                            None,
                            &self.contours[other.contour].vertices,
                        );
                    }
                    !intersect
                });
                // If found non-intersecting diagonal, stop looking.
                if index.is_some() {
                    break;
                }
                // All the potential diagonals for the current vertex were intersecting, try next vertex.
                best_vertex = (best_vertex + 1) % hole_vertices.len();
            }

            let Some(index) = index else {
                tracing::warn!(
                    "merge_holes: Failed to find merge points for contours {} and {}.",
                    outline,
                    hole.contour
                );
                continue;
            };
            let hole_contour = hole.contour;
            merge_contours(
                &mut self.contours[outline].vertices,
                &hole_vertices,
                index,
                best_vertex,
            );
            self.contours[hole_contour].vertices.clear();
        }
    }
}

struct ContourHole {
    contour: usize,
    /// Lowest leftmost vertex of the hole as `(x, z)`.
    min: (u16, u16),
    leftmost: usize,
}

fn merge_contours(
    outline: &mut Vec<(U16Vec3, RegionVertexId)>,
    hole: &[(U16Vec3, RegionVertexId)],
    outline_index: usize,
    hole_index: usize,
) {
    let mut vertices = Vec::with_capacity(outline.len() + hole.len() + 2);

    // Copy contour A.
    for i in 0..=outline.len() {
        vertices.push(outline[(outline_index + i) % outline.len()]);
    }
    // Copy contour B
    for i in 0..=hole.len() {
        vertices.push(hole[(hole_index + i) % hole.len()]);
    }
    *outline = vertices;
}

fn intersect_seg_contour(
    d0: IVec3,
    d1: IVec3,
    skip: Option<usize>,
    vertices: &[(U16Vec3, RegionVertexId)],
) -> bool {
    // For each edge (k,k+1) of P
    let n = vertices.len();
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i.
        if skip == Some(k) || skip == Some(k1) {
            continue;
        }
        let p0 = vertices[k].0.as_ivec3();
        let p1 = vertices[k1].0.as_ivec3();
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

fn in_cone(i: usize, vertices: &[(U16Vec3, RegionVertexId)], pj: IVec3) -> bool {
    let n = vertices.len();
    let pi = vertices[i].0.as_ivec3();
    let pi1 = vertices[next(i, n)].0.as_ivec3();
    let pin1 = vertices[prev(i, n)].0.as_ivec3();

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Represents a group of related contours.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourSet {
    /// An array of the contours in the set.
    pub contours: Vec<Contour>,
    /// The AABB in world space
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The width of the set. (Along the x-axis in cell units.)
    pub width: u16,
    /// The height of the set. (Along the z-axis in cell units.)
    pub height: u16,
    /// The AABB border size used to generate the source data from which the contours were derived.
    pub border_size: u16,
    /// The max edge error that this contour set was simplified with.
    pub max_error: f32,
}

bitflags::bitflags! {
    /// The neighbour information stored with every contour vertex.
    ///
    /// The lower 16 bits hold the [`RegionId`] on the other side of the edge starting at the vertex,
    /// including its [`RegionId::BORDER_REGION`] flag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct RegionVertexId: u32 {
        /// No neighbour region.
        const NONE = 0;

        /// Applied to the region id field of contour vertices in order to extract the region id.
        /// The region id field of a vertex may have several flags applied to it.  So the
        /// fields value can't be used directly.
        const REGION_MASK = 0xffff;

        /// Border vertex flag.
        /// If a region ID has this bit set, then the associated element lies on
        /// a tile border. If a contour vertex's region ID has this bit set, the
        /// vertex will later be removed in order to match the segments and vertices
        /// at tile boundaries.
        /// (Used during the build process.)
        const BORDER_VERTEX = 0x10_000;

        /// Area border flag.
        /// If a region ID has this bit set, then the associated element lies on
        /// the border of an area.
        /// (Used during the region and contour build process.)
        const AREA_BORDER = 0x20_000;
    }
}

impl From<RegionId> for RegionVertexId {
    fn from(region_id: RegionId) -> Self {
        RegionVertexId::from_bits_retain(region_id.bits() as u32)
    }
}

impl From<RegionVertexId> for RegionId {
    fn from(region_vertex_id: RegionVertexId) -> Self {
        let bits = region_vertex_id.bits() & RegionVertexId::REGION_MASK.bits();
        RegionId::from_bits_retain(bits as u16)
    }
}

/// Represents a simple, non-overlapping contour in field space.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Contour {
    /// Simplified contour vertices in grid space, paired with the neighbour data of the edge
    /// starting at the vertex.
    pub vertices: Vec<(U16Vec3, RegionVertexId)>,
    /// Raw contour vertices, in the same format as [`Contour::vertices`].
    pub raw_vertices: Vec<(U16Vec3, RegionVertexId)>,
    /// Region ID of the contour.
    pub region: RegionId,
    /// Area type of the contour.
    pub area: AreaType,
}

bitflags::bitflags! {
    /// Contour build flags used in [`CompactHeightfield::build_contours`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct BuildContoursFlags: u8 {
        /// Tessellate solid (impassable) edges during contour simplification.
        const TESSELLATE_SOLID_WALL_EDGES = 1;
        /// Tessellate edges between areas during contour simplification.
        const TESSELLATE_AREA_EDGES = 2;

        /// Default flags for building contours.
        const DEFAULT = Self::TESSELLATE_SOLID_WALL_EDGES.bits();
    }
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Errors that can occur while tracing contours.
#[derive(Debug, Error)]
pub enum ContourError {
    /// A region outline led across an edge without a neighbour link.
    #[error("contour walk got stuck at cell ({x}, {z}), span {span}")]
    MissingNeighbour {
        /// The x coordinate of the cell
        x: u16,
        /// The z coordinate of the cell
        z: u16,
        /// The index of the span the walk got stuck on
        span: usize,
    },
    /// A region outline did not close within the step limit.
    #[error("contour walk starting at span {span} did not close after {MAX_WALK_ITERATIONS} steps")]
    UnterminatedWalk {
        /// The index of the span the walk started on
        span: usize,
    },
}

#[cfg(test)]
mod tests {
    use crate::test_support::flat_compact_heightfield;

    use super::*;

    fn v(x: u16, z: u16, r: u32) -> (U16Vec3, RegionVertexId) {
        (U16Vec3::new(x, 0, z), RegionVertexId::from_bits_retain(r))
    }

    #[test]
    fn square_region_becomes_a_quad() {
        let mut compact = flat_compact_heightfield(10.0);
        compact.build_regions_monotone(0, 8, 20).unwrap();
        let contours = compact
            .build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
            .unwrap();
        assert_eq!(contours.contours.len(), 1);
        let contour = &contours.contours[0];
        assert_eq!(contour.region, RegionId::from(1));
        assert_eq!(contour.area, AreaType::DEFAULT_WALKABLE);
        assert_eq!(contour.vertices.len(), 4);
        // One raw vertex per boundary cell edge.
        assert_eq!(contour.raw_vertices.len(), 40);
        for (vertex, _) in &contour.vertices {
            assert!(vertex.x == 0 || vertex.x == 10);
            assert!(vertex.z == 0 || vertex.z == 10);
        }
        // Outlines are wound so that their area is positive.
        assert!(calc_area_of_polygon_2d(&contour.vertices) > 0);
    }

    #[test]
    fn long_wall_edges_are_split() {
        let mut compact = flat_compact_heightfield(10.0);
        compact.build_regions_monotone(0, 8, 20).unwrap();
        let contours = compact
            .build_contours(1.3, 4, BuildContoursFlags::DEFAULT)
            .unwrap();
        let contour = &contours.contours[0];
        assert!(contour.vertices.len() > 4);
        let vertices = &contour.vertices;
        for i in 0..vertices.len() {
            let a = vertices[i].0.as_ivec3();
            let b = vertices[next(i, vertices.len())].0.as_ivec3();
            let d = b - a;
            assert!(d.x * d.x + d.z * d.z <= 16, "edge {i} is too long");
        }
    }

    #[test]
    fn neighbouring_regions_share_portal_vertices() {
        let mut compact = flat_compact_heightfield(10.0);
        // Split the square into two columns, one per region.
        for z in 0..10 {
            for x in 0..10 {
                for i in compact.cell_at(x, z).index_range() {
                    compact.spans[i].region = RegionId::from(if x < 5 { 1 } else { 2 });
                }
            }
        }
        compact.max_region = RegionId::from(2);
        let contours = compact
            .build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
            .unwrap();
        assert_eq!(contours.contours.len(), 2);
        let left = &contours.contours[0];
        let portal_edges = left
            .vertices
            .iter()
            .filter(|(_, r)| RegionId::from(*r) == RegionId::from(2))
            .count();
        assert_eq!(portal_edges, 1);
    }

    #[test]
    fn degenerate_segments_are_removed() {
        let mut vertices = vec![v(0, 0, 0), v(0, 0, 0), v(4, 0, 0), v(4, 4, 0)];
        remove_degenerate_segments(&mut vertices);
        assert_eq!(vertices.len(), 3);
    }

    #[test]
    fn holes_are_merged_into_their_outline() {
        let mut compact = flat_compact_heightfield(12.0);
        // Punch a hole into the middle of the square.
        for z in 5..7 {
            for x in 5..7 {
                for i in compact.cell_at(x, z).index_range() {
                    compact.areas[i] = AreaType::NOT_WALKABLE;
                }
            }
        }
        compact.build_regions_monotone(0, 0, 0).unwrap();
        for i in 0..compact.spans.len() {
            if compact.areas[i].is_walkable() {
                compact.spans[i].region = RegionId::from(1);
            }
        }
        compact.max_region = RegionId::from(1);
        let contours = compact
            .build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
            .unwrap();
        assert_eq!(contours.contours.len(), 1);
        // Outline and hole, plus the two duplicated bridge vertices.
        assert_eq!(contours.contours[0].vertices.len(), 4 + 4 + 2);
    }
}
