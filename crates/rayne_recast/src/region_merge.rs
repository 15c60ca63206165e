//! Bookkeeping shared by all region partitioning strategies: painting the tile border,
//! tracking region adjacency, and the final merge and filter passes.

use thiserror::Error;

use crate::{
    CompactHeightfield,
    math::{dir_offset_x, dir_offset_z},
    region::RegionId,
    span::AreaType,
};

/// Errors that can occur while partitioning a [`CompactHeightfield`] into regions.
#[derive(Debug, Error)]
pub enum RegionError {
    /// More regions were generated than fit into a [`RegionId`].
    #[error("Region ID overflow: more than {max} regions were generated", max = RegionId::MAX.bits())]
    TooManyRegions,
}

/// Returns `id` and advances it, failing if the id space is exhausted.
pub(crate) fn take_region_id(id: &mut RegionId) -> Result<RegionId, RegionError> {
    let current = *id;
    if current.bits() >= RegionId::MAX.bits() {
        return Err(RegionError::TooManyRegions);
    }
    *id = RegionId::from(current.bits() + 1);
    Ok(current)
}

#[derive(Debug, Clone)]
struct Region {
    /// Number of spans belonging to this region
    span_count: usize,
    id: RegionId,
    area: AreaType,
    remap: bool,
    visited: bool,
    overlap: bool,
    connects_to_border: bool,
    y_min: u16,
    y_max: u16,
    /// Neighbouring regions in the order they appear along the region outline.
    connections: Vec<RegionId>,
    /// Regions sharing a column with this one.
    floors: Vec<RegionId>,
}

impl Region {
    fn new(id: RegionId) -> Self {
        Self {
            span_count: 0,
            id,
            area: AreaType::NOT_WALKABLE,
            remap: false,
            visited: false,
            overlap: false,
            connects_to_border: false,
            y_min: u16::MAX,
            y_max: 0,
            connections: Vec::new(),
            floors: Vec::new(),
        }
    }

    fn replace_neighbour(&mut self, old_id: RegionId, new_id: RegionId) {
        let mut neighbour_changed = false;
        for connection in &mut self.connections {
            if *connection == old_id {
                *connection = new_id;
                neighbour_changed = true;
            }
        }
        for floor in &mut self.floors {
            if *floor == old_id {
                *floor = new_id;
            }
        }
        if neighbour_changed {
            remove_adjacent_duplicates(&mut self.connections);
        }
    }

    fn can_merge_with(&self, other: &Region) -> bool {
        if self.area != other.area {
            return false;
        }
        let shared_edges = self.connections.iter().filter(|&&c| c == other.id).count();
        if shared_edges > 1 {
            return false;
        }
        !self.floors.contains(&other.id)
    }

    fn add_unique_floor_region(&mut self, id: RegionId) {
        if !self.floors.contains(&id) {
            self.floors.push(id);
        }
    }

    fn add_unique_connection(&mut self, id: RegionId) {
        if !self.connections.contains(&id) {
            self.connections.push(id);
        }
    }

    /// Region is connected to border if one of the neighbours is null id.
    fn is_connected_to_border(&self) -> bool {
        self.connections.contains(&RegionId::NONE)
    }
}

/// Removes adjacent duplicates from a cyclic list.
fn remove_adjacent_duplicates(list: &mut Vec<RegionId>) {
    let mut i = 0;
    while i < list.len() && list.len() > 1 {
        let next = (i + 1) % list.len();
        if list[i] == list[next] {
            list.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Merges the region at `source` into the region at `target`, splicing their outlines together.
fn merge_regions(regions: &mut [Region], target: usize, source: usize) -> bool {
    let target_id = regions[target].id;
    let source_id = regions[source].id;

    // Duplicate current neighbourhood.
    let target_connections = regions[target].connections.clone();
    let source_connections = &regions[source].connections;

    // Find insertion points.
    let Some(insert_target) = target_connections.iter().position(|&c| c == source_id) else {
        return false;
    };
    let Some(insert_source) = source_connections.iter().position(|&c| c == target_id) else {
        return false;
    };

    // Merge neighbours.
    let mut connections =
        Vec::with_capacity(target_connections.len() + source_connections.len());
    let n = target_connections.len();
    for i in 0..n - 1 {
        connections.push(target_connections[(insert_target + 1 + i) % n]);
    }
    let n = source_connections.len();
    for i in 0..n - 1 {
        connections.push(source_connections[(insert_source + 1 + i) % n]);
    }

    let source_floors = regions[source].floors.clone();
    let source_span_count = regions[source].span_count;
    regions[source].span_count = 0;
    regions[source].connections.clear();

    let target = &mut regions[target];
    target.connections = connections;
    remove_adjacent_duplicates(&mut target.connections);
    for floor in source_floors {
        target.add_unique_floor_region(floor);
    }
    target.span_count += source_span_count;
    true
}

/// Assigns consecutive ids to all regions that still own spans. Returns the highest id handed out.
///
/// Ids without any span, such as the unused id past the last one generated, are cleared.
fn compress_region_ids(regions: &mut [Region]) -> RegionId {
    for region in regions.iter_mut() {
        region.remap = region.id.is_region();
    }
    let mut region_id_gen = 0_u16;
    for i in 0..regions.len() {
        if !regions[i].remap {
            continue;
        }
        let old_id = regions[i].id;
        let has_spans = regions
            .iter()
            .any(|region| region.id == old_id && region.span_count > 0);
        if !has_spans {
            for region in regions[i..].iter_mut() {
                if region.id == old_id {
                    region.id = RegionId::NONE;
                    region.remap = false;
                }
            }
            continue;
        }
        region_id_gen += 1;
        let new_id = RegionId::from(region_id_gen);
        for region in regions[i..].iter_mut() {
            if region.id == old_id {
                region.id = new_id;
                region.remap = false;
            }
        }
    }
    RegionId::from(region_id_gen)
}

fn remap_regions(regions: &[Region], src_reg: &mut [RegionId]) {
    for region in src_reg.iter_mut() {
        if !region.contains(RegionId::BORDER_REGION) {
            *region = regions[region.bits() as usize].id;
        }
    }
}

impl CompactHeightfield {
    pub(crate) fn paint_rect_region(
        &self,
        (min_x, max_x): (u16, u16),
        (min_z, max_z): (u16, u16),
        region: RegionId,
        src_reg: &mut [RegionId],
    ) {
        for z in min_z..max_z {
            for x in min_x..max_x {
                for i in self.cell_at(x, z).index_range() {
                    if self.areas[i].is_walkable() {
                        src_reg[i] = region;
                    }
                }
            }
        }
    }

    /// Paints the four tile border strips with their own border regions and stores `border_size`.
    pub(crate) fn paint_border_regions(
        &mut self,
        border_size: u16,
        region_id: &mut RegionId,
        src_reg: &mut [RegionId],
    ) -> Result<(), RegionError> {
        if border_size > 0 {
            // Make sure border will not overflow.
            let border_width = border_size.min(self.width);
            let border_height = border_size.min(self.height);
            let (w, h) = (self.width, self.height);
            let strips = [
                ((0, border_width), (0, h)),
                ((w - border_width, w), (0, h)),
                ((0, w), (0, border_height)),
                ((0, w), (h - border_height, h)),
            ];
            for (x_range, z_range) in strips {
                let id = take_region_id(region_id)?;
                self.paint_rect_region(x_range, z_range, id | RegionId::BORDER_REGION, src_reg);
            }
        }
        self.border_size = border_size;
        Ok(())
    }

    fn is_solid_edge(&self, src_reg: &[RegionId], x: u16, z: u16, i: usize, dir: u8) -> bool {
        let region = self
            .neighbor_index(x, z, i, dir)
            .map(|a_i| src_reg[a_i])
            .unwrap_or(RegionId::NONE);
        region != src_reg[i]
    }

    /// Walks around the outline of the region of span `i` and collects the neighbouring regions in order.
    fn walk_contour(
        &self,
        (mut x, mut z, mut i): (u16, u16, usize),
        mut dir: u8,
        src_reg: &[RegionId],
        connections: &mut Vec<RegionId>,
    ) {
        let start_dir = dir;
        let start_i = i;

        let mut current_region = self
            .neighbor_index(x, z, i, dir)
            .map(|a_i| src_reg[a_i])
            .unwrap_or(RegionId::NONE);
        connections.push(current_region);

        let mut iter = 0;
        loop {
            iter += 1;
            if iter >= 40_000 {
                break;
            }
            if self.is_solid_edge(src_reg, x, z, i, dir) {
                // Choose the edge corner
                let region = self
                    .neighbor_index(x, z, i, dir)
                    .map(|a_i| src_reg[a_i])
                    .unwrap_or(RegionId::NONE);
                if region != current_region {
                    current_region = region;
                    connections.push(current_region);
                }
                // Rotate CW
                dir = (dir + 1) & 0x3;
            } else {
                let Some(next_i) = self.neighbor_index(x, z, i, dir) else {
                    // Should not happen.
                    return;
                };
                x = (x as i32 + dir_offset_x(dir) as i32) as u16;
                z = (z as i32 + dir_offset_z(dir) as i32) as u16;
                i = next_i;
                // Rotate CCW
                dir = (dir + 3) & 0x3;
            }
            if start_i == i && start_dir == dir {
                break;
            }
        }

        remove_adjacent_duplicates(connections);
    }

    fn collect_regions(&self, max_region_id: RegionId) -> Vec<Region> {
        (0..=max_region_id.bits()).map(|id| Region::new(id.into())).collect()
    }

    /// Removes regions smaller than `min_region_area` that do not touch the tile border and merges
    /// regions smaller than `merge_region_size` into their smallest neighbour.
    ///
    /// Returns the new highest region id and the ids of regions that overlap themselves vertically.
    pub(crate) fn merge_and_filter_regions(
        &self,
        min_region_area: u16,
        merge_region_size: u16,
        max_region_id: RegionId,
        src_reg: &mut [RegionId],
    ) -> (RegionId, Vec<RegionId>) {
        let mut regions = self.collect_regions(max_region_id);
        let region_count = regions.len();

        // Find edge of a region and find connections around the contour.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    let r = src_reg[i];
                    if r == RegionId::NONE || r.bits() as usize >= region_count {
                        continue;
                    }
                    let region = &mut regions[r.bits() as usize];
                    region.span_count += 1;

                    // Update floors.
                    for j in cell.index_range() {
                        if i == j {
                            continue;
                        }
                        let floor_id = src_reg[j];
                        if floor_id == RegionId::NONE || floor_id.bits() as usize >= region_count {
                            continue;
                        }
                        if floor_id == r {
                            region.overlap = true;
                        }
                        region.add_unique_floor_region(floor_id);
                    }

                    // Have found contour
                    if !region.connections.is_empty() {
                        continue;
                    }
                    region.area = self.areas[i];

                    // Check if this cell is next to a border.
                    let border_dir = (0..4).find(|&dir| self.is_solid_edge(src_reg, x, z, i, dir));
                    if let Some(dir) = border_dir {
                        // The cell is at border.
                        // Walk around the contour to find all the neighbours.
                        let mut connections = Vec::new();
                        self.walk_contour((x, z, i), dir, src_reg, &mut connections);
                        regions[r.bits() as usize].connections = connections;
                    }
                }
            }
        }

        // Remove too small regions.
        let mut stack = Vec::with_capacity(32);
        let mut trace = Vec::with_capacity(32);
        for i in 0..region_count {
            let region = &mut regions[i];
            if !region.id.is_region() || region.span_count == 0 || region.visited {
                continue;
            }

            // Count the total size of all the connected regions.
            // Also keep track of the regions connects to a tile border.
            let mut connects_to_border = false;
            let mut span_count = 0;
            stack.clear();
            trace.clear();

            region.visited = true;
            stack.push(i);

            while let Some(ri) = stack.pop() {
                span_count += regions[ri].span_count;
                trace.push(ri);
                for j in 0..regions[ri].connections.len() {
                    let connection = regions[ri].connections[j];
                    if connection.contains(RegionId::BORDER_REGION) {
                        connects_to_border = true;
                        continue;
                    }
                    let neighbour = &mut regions[connection.bits() as usize];
                    if neighbour.visited || !neighbour.id.is_region() {
                        continue;
                    }
                    // Visit
                    stack.push(neighbour.id.bits() as usize);
                    neighbour.visited = true;
                }
            }

            // If the accumulated regions size is too small, remove it.
            // Do not remove areas which connect to tile borders
            // as their size cannot be estimated correctly and removing them
            // can potentially remove necessary areas.
            if span_count < min_region_area as usize && !connects_to_border {
                // Kill all visited regions.
                for &j in &trace {
                    regions[j].span_count = 0;
                    regions[j].id = RegionId::NONE;
                }
            }
        }

        // Merge too small regions to neighbour regions.
        loop {
            let mut merge_count = 0;
            for i in 0..region_count {
                let region = &regions[i];
                if !region.id.is_region() || region.overlap || region.span_count == 0 {
                    continue;
                }

                // Check to see if the region should be merged.
                if region.span_count > merge_region_size as usize
                    && region.is_connected_to_border()
                {
                    continue;
                }

                // Small region with more than 1 connection.
                // Or region which is not connected to a border at all.
                // Find smallest neighbour region that connects to this one.
                let mut smallest = usize::MAX;
                let mut merge_id = region.id;
                for &connection in &region.connections {
                    if connection.contains(RegionId::BORDER_REGION) {
                        continue;
                    }
                    let candidate = &regions[connection.bits() as usize];
                    if !candidate.id.is_region() || candidate.overlap {
                        continue;
                    }
                    if candidate.span_count < smallest
                        && region.can_merge_with(candidate)
                        && candidate.can_merge_with(region)
                    {
                        smallest = candidate.span_count;
                        merge_id = candidate.id;
                    }
                }

                // Found new id.
                if merge_id != region.id {
                    let old_id = region.id;
                    if merge_regions(&mut regions, merge_id.bits() as usize, i) {
                        // Fixup regions pointing to current region.
                        for region in regions.iter_mut() {
                            if !region.id.is_region() {
                                continue;
                            }
                            // If another region was already merged into current region
                            // change the nid of the previous region too.
                            if region.id == old_id {
                                region.id = merge_id;
                            }
                            // Replace the current region with the new one if the
                            // current regions is neighbour.
                            region.replace_neighbour(old_id, merge_id);
                        }
                        merge_count += 1;
                    }
                }
            }
            if merge_count == 0 {
                break;
            }
        }

        let max_region_id = compress_region_ids(&mut regions);
        remap_regions(&regions, src_reg);

        // Return regions that we found to be overlapping.
        let overlaps = regions
            .iter()
            .filter(|region| region.overlap)
            .map(|region| region.id)
            .collect();
        (max_region_id, overlaps)
    }

    /// Unions connected regions into layers as long as they never share a column,
    /// then removes layers smaller than `min_region_area`.
    ///
    /// Returns the new highest region id.
    pub(crate) fn merge_and_filter_layer_regions(
        &self,
        min_region_area: u16,
        max_region_id: RegionId,
        src_reg: &mut [RegionId],
    ) -> RegionId {
        let mut regions = self.collect_regions(max_region_id);
        let region_count = regions.len();

        // Find region neighbours and overlapping regions.
        let mut layer_regions = Vec::with_capacity(32);
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                layer_regions.clear();

                for i in cell.index_range() {
                    let span = &self.spans[i];
                    let ri = src_reg[i];
                    if ri == RegionId::NONE || ri.bits() as usize >= region_count {
                        continue;
                    }
                    let region = &mut regions[ri.bits() as usize];
                    region.span_count += 1;
                    region.area = self.areas[i];
                    region.y_min = region.y_min.min(span.y);
                    region.y_max = region.y_max.max(span.y);

                    // Collect all region layers.
                    layer_regions.push(ri);

                    // Update neighbours
                    for dir in 0..4 {
                        let Some(a_i) = self.neighbor_index(x, z, i, dir) else {
                            continue;
                        };
                        let rai = src_reg[a_i];
                        if rai != RegionId::NONE && (rai.bits() as usize) < region_count && rai != ri {
                            region.add_unique_connection(rai);
                        }
                        if rai.contains(RegionId::BORDER_REGION) {
                            region.connects_to_border = true;
                        }
                    }
                }

                // Update overlapping regions.
                for i in 0..layer_regions.len() {
                    for j in i + 1..layer_regions.len() {
                        let (a, b) = (layer_regions[i], layer_regions[j]);
                        if a != b {
                            regions[a.bits() as usize].add_unique_floor_region(b);
                            regions[b.bits() as usize].add_unique_floor_region(a);
                        }
                    }
                }
            }
        }

        // Create 2D layers from regions.
        let mut layer_id = 1_u16;
        for region in &mut regions {
            region.id = RegionId::NONE;
        }

        // Merge monotone regions to create non-overlapping areas.
        let mut queue = std::collections::VecDeque::with_capacity(32);
        for root_index in 1..region_count {
            // Skip already visited.
            if regions[root_index].id != RegionId::NONE {
                continue;
            }

            // Start search.
            regions[root_index].id = RegionId::from(layer_id);
            queue.clear();
            queue.push_back(root_index);

            while let Some(current) = queue.pop_front() {
                let area = regions[current].area;
                for j in 0..regions[current].connections.len() {
                    let neighbour = regions[current].connections[j].bits() as usize;
                    // Skip already visited.
                    if regions[neighbour].id != RegionId::NONE {
                        continue;
                    }
                    // Skip if different area type, do not connect regions with different area type.
                    if regions[neighbour].area != area {
                        continue;
                    }
                    // Skip if the neighbour is overlapping root region.
                    if regions[root_index].floors.contains(&RegionId::from(neighbour as u16)) {
                        continue;
                    }

                    // Deepen
                    queue.push_back(neighbour);

                    // Mark layer id
                    regions[neighbour].id = RegionId::from(layer_id);

                    // Merge current layers to root.
                    let floors = std::mem::take(&mut regions[neighbour].floors);
                    let (y_min, y_max) = (regions[neighbour].y_min, regions[neighbour].y_max);
                    let span_count = std::mem::take(&mut regions[neighbour].span_count);
                    let connects_to_border = regions[neighbour].connects_to_border;
                    let root = &mut regions[root_index];
                    for floor in &floors {
                        root.add_unique_floor_region(*floor);
                    }
                    root.y_min = root.y_min.min(y_min);
                    root.y_max = root.y_max.max(y_max);
                    root.span_count += span_count;
                    root.connects_to_border |= connects_to_border;
                    regions[neighbour].floors = floors;
                }
            }

            layer_id += 1;
        }

        // Remove small regions
        for i in 0..region_count {
            let region = &regions[i];
            if region.span_count > 0
                && region.span_count < min_region_area as usize
                && !region.connects_to_border
            {
                let id = region.id;
                for region in &mut regions {
                    if region.id == id {
                        region.id = RegionId::NONE;
                    }
                }
            }
        }

        let max_region_id = compress_region_ids(&mut regions);
        remap_regions(&regions, src_reg);
        max_region_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[u16]) -> Vec<RegionId> {
        values.iter().map(|&v| RegionId::from(v)).collect()
    }

    #[test]
    fn adjacent_duplicates_wrap_around() {
        let mut list = ids(&[1, 1, 2, 3, 3, 1]);
        remove_adjacent_duplicates(&mut list);
        assert_eq!(list, ids(&[1, 2, 3]));
    }

    #[test]
    fn single_entry_is_kept() {
        let mut list = ids(&[4]);
        remove_adjacent_duplicates(&mut list);
        assert_eq!(list, ids(&[4]));
    }

    #[test]
    fn merging_splices_outlines() {
        let mut regions: Vec<Region> = (0..4).map(|id| Region::new(id.into())).collect();
        // Region 1 touches the void and region 2, region 2 touches 1 and 3.
        regions[1].connections = ids(&[0, 2]);
        regions[1].span_count = 5;
        regions[2].connections = ids(&[1, 3]);
        regions[2].span_count = 2;
        assert!(merge_regions(&mut regions, 1, 2));
        assert_eq!(regions[1].connections, ids(&[0, 3]));
        assert_eq!(regions[1].span_count, 7);
        assert_eq!(regions[2].span_count, 0);
        assert!(regions[2].connections.is_empty());
    }

    #[test]
    fn merging_requires_shared_edge() {
        let mut regions: Vec<Region> = (0..4).map(|id| Region::new(id.into())).collect();
        regions[1].connections = ids(&[0]);
        regions[2].connections = ids(&[3]);
        assert!(!merge_regions(&mut regions, 1, 2));
    }

    #[test]
    fn region_ids_run_out() {
        let mut id = RegionId::from(RegionId::MAX.bits() - 1);
        assert!(take_region_id(&mut id).is_ok());
        assert!(matches!(
            take_region_id(&mut id),
            Err(RegionError::TooManyRegions)
        ));
    }

    #[test]
    fn compressed_ids_are_consecutive() {
        let mut regions: Vec<Region> = (0..7).map(|id| Region::new(id.into())).collect();
        regions[1].span_count = 4;
        regions[2].id = RegionId::NONE;
        regions[3].span_count = 6;
        // Region 4 was merged into region 3.
        regions[4].id = RegionId::from(3);
        regions[5].id = RegionId::from(5) | RegionId::BORDER_REGION;
        regions[5].span_count = 3;
        let max = compress_region_ids(&mut regions);
        assert_eq!(max, RegionId::from(2));
        assert_eq!(regions[1].id, RegionId::from(1));
        assert_eq!(regions[3].id, RegionId::from(2));
        assert_eq!(regions[4].id, RegionId::from(2));
        assert!(regions[5].id.contains(RegionId::BORDER_REGION));
        // The unused id past the last generated one owns no spans.
        assert_eq!(regions[6].id, RegionId::NONE);
    }

    #[test]
    fn regions_without_spans_get_no_id() {
        let mut regions: Vec<Region> = (0..3).map(|id| Region::new(id.into())).collect();
        assert_eq!(compress_region_ids(&mut regions), RegionId::NONE);
        assert!(regions.iter().all(|region| region.id == RegionId::NONE));
    }
}
