//! Watershed partitioning
//!   - the classic Recast partitioning
//!   - creates the nicest tessellation
//!   - usually slowest
//!   - partitions the heightfield into nice regions without holes or overlaps
//!   - the are some corner cases where this method creates produces holes and overlaps
//!      - holes may appear when a small obstacles is close to large open area (triangulation can handle this)
//!      - overlaps may occur if you have narrow spiral corridors (i.e stairs), this make triangulation to fail
//!   * generally the best choice if you precompute the navmesh, use this if you have large open areas

use crate::{
    CompactHeightfield,
    math::{dir_offset_x, dir_offset_z},
    region::RegionId,
    region_merge::{RegionError, take_region_id},
};

const LOG_NB_STACKS: usize = 3;
const NB_STACKS: usize = 1 << LOG_NB_STACKS;

/// Number of times the existing regions are expanded per level before new ones are seeded.
const EXPAND_ITERS: u16 = 8;

impl CompactHeightfield {
    /// Non-null regions will consist of connected, non-overlapping walkable spans that form a single contour.
    /// Contours will form simple polygons.
    ///
    /// If multiple regions form an area that is smaller than `min_region_area`, then all spans will be
    /// re-assigned to [`RegionId::NONE`].
    ///
    /// Watershed partitioning can result in smaller than necessary regions, especially in diagonal corridors.
    /// `merge_region_area` helps reduce unnecessarily small regions.
    ///
    /// The region data will be available via the [`CompactHeightfield::max_region`]
    /// and [`CompactSpan::region`](crate::CompactSpan::region) fields.
    ///
    /// The distance field must be created using [`CompactHeightfield::build_distance_field`] before attempting to build regions.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::TooManyRegions`] if the region ids overflow.
    pub fn build_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionError> {
        let mut level_stacks: [Vec<LevelStackEntry>; NB_STACKS] = [const { Vec::new() }; NB_STACKS];
        for stack in &mut level_stacks {
            stack.reserve(256);
        }
        let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);

        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut src_dist = vec![0_u16; self.spans.len()];

        let mut region_id = RegionId::from(1);
        let mut level = (self.max_distance + 1) & !1;

        self.paint_border_regions(border_size, &mut region_id, &mut src_reg)?;

        let mut s_id = -1_i32;
        while level > 0 {
            level = level.saturating_sub(2);
            s_id = (s_id + 1) & (NB_STACKS as i32 - 1);

            if s_id == 0 {
                self.sort_cells_by_level(level, &src_reg, &mut level_stacks, 1);
            } else {
                // copy left overs from last level
                let (src, dst) = level_stacks.split_at_mut(s_id as usize);
                append_stacks(&src[s_id as usize - 1], &mut dst[0], &src_reg);
            }

            // Expand current regions until no empty connected cells found.
            self.expand_regions(
                EXPAND_ITERS,
                level,
                &mut src_reg,
                &mut src_dist,
                &mut level_stacks[s_id as usize],
                false,
            );

            // Mark new regions with IDs.
            for j in 0..level_stacks[s_id as usize].len() {
                let current = level_stacks[s_id as usize][j].clone();
                let Some(i) = current.index else {
                    continue;
                };
                if src_reg[i] != RegionId::NONE {
                    continue;
                }
                if self.flood_region(
                    (current.x, current.z, i),
                    level,
                    region_id,
                    &mut src_reg,
                    &mut src_dist,
                    &mut stack,
                ) {
                    take_region_id(&mut region_id)?;
                }
            }
        }

        // Expand current regions until no empty connected cells found.
        self.expand_regions(
            EXPAND_ITERS * 8,
            0,
            &mut src_reg,
            &mut src_dist,
            &mut stack,
            true,
        );

        // Merge regions and filter out small regions.
        let (max_region, overlaps) = self.merge_and_filter_regions(
            min_region_area,
            merge_region_area,
            region_id,
            &mut src_reg,
        );
        self.max_region = max_region;

        // If overlapping regions were found during merging, split those regions.
        if !overlaps.is_empty() {
            tracing::warn!("build_regions: {} overlapping regions.", overlaps.len());
        }

        // Write the result out.
        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        Ok(())
    }

    fn sort_cells_by_level(
        &self,
        start_level: u16,
        src_reg: &[RegionId],
        stacks: &mut [Vec<LevelStackEntry>],
        log_levels_per_stack: u16,
    ) {
        let start_level = (start_level >> log_levels_per_stack) as i32;
        for stack in stacks.iter_mut() {
            stack.clear();
        }

        // put all cells in the level range into the appropriate stacks
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    if !self.areas[i].is_walkable() || src_reg[i] != RegionId::NONE {
                        continue;
                    }
                    let level = (self.dist[i] >> log_levels_per_stack) as i32;
                    let s_id = (start_level - level).max(0) as usize;
                    if s_id >= stacks.len() {
                        continue;
                    }
                    stacks[s_id].push(LevelStackEntry {
                        x,
                        z,
                        index: Some(i),
                    });
                }
            }
        }
    }

    fn flood_region(
        &self,
        (x, z, i): (u16, u16, usize),
        level: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
    ) -> bool {
        let area = self.areas[i];

        // Flood fill mark region.
        stack.clear();
        stack.push(LevelStackEntry {
            x,
            z,
            index: Some(i),
        });
        src_reg[i] = region;
        src_dist[i] = 0;

        let lev = level.saturating_sub(2);
        let mut count = 0;

        while let Some(back) = stack.pop() {
            let (c_x, c_z) = (back.x, back.z);
            let Some(c_i) = back.index else {
                continue;
            };

            // Check if any of the neighbours already have a valid region set.
            let mut adjacent_region = RegionId::NONE;
            for dir in 0..4 {
                // 8 connected
                let Some(a_i) = self.neighbor_index(c_x, c_z, c_i, dir) else {
                    continue;
                };
                if self.areas[a_i] != area {
                    continue;
                }
                let neighbor_region = src_reg[a_i];
                // Do not take borders into account.
                if neighbor_region.contains(RegionId::BORDER_REGION) {
                    continue;
                }
                if neighbor_region != RegionId::NONE && neighbor_region != region {
                    adjacent_region = neighbor_region;
                    break;
                }

                let a_x = (c_x as i32 + dir_offset_x(dir) as i32) as u16;
                let a_z = (c_z as i32 + dir_offset_z(dir) as i32) as u16;
                let dir2 = (dir + 1) & 0x3;
                let Some(a_i2) = self.neighbor_index(a_x, a_z, a_i, dir2) else {
                    continue;
                };
                if self.areas[a_i2] != area {
                    continue;
                }
                let neighbor_region2 = src_reg[a_i2];
                if neighbor_region2 != RegionId::NONE && neighbor_region2 != region {
                    adjacent_region = neighbor_region2;
                    break;
                }
            }
            if adjacent_region != RegionId::NONE {
                src_reg[c_i] = RegionId::NONE;
                continue;
            }

            count += 1;

            // Expand neighbours.
            for dir in 0..4 {
                let Some(a_i) = self.neighbor_index(c_x, c_z, c_i, dir) else {
                    continue;
                };
                if self.areas[a_i] != area {
                    continue;
                }
                if self.dist[a_i] >= lev && src_reg[a_i] == RegionId::NONE {
                    src_reg[a_i] = region;
                    src_dist[a_i] = 0;
                    stack.push(LevelStackEntry {
                        x: (c_x as i32 + dir_offset_x(dir) as i32) as u16,
                        z: (c_z as i32 + dir_offset_z(dir) as i32) as u16,
                        index: Some(a_i),
                    });
                }
            }
        }

        count > 0
    }

    fn expand_regions(
        &self,
        max_iter: u16,
        level: u16,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
        fill_stack: bool,
    ) {
        if fill_stack {
            // Find cells revealed by the raised level.
            stack.clear();
            for z in 0..self.height {
                for x in 0..self.width {
                    for i in self.cell_at(x, z).index_range() {
                        if self.dist[i] >= level
                            && src_reg[i] == RegionId::NONE
                            && self.areas[i].is_walkable()
                        {
                            stack.push(LevelStackEntry {
                                x,
                                z,
                                index: Some(i),
                            });
                        }
                    }
                }
            }
        } else {
            // use cells in the input stack
            // mark all cells which already have a region
            for entry in stack.iter_mut() {
                if entry.index.is_some_and(|i| src_reg[i] != RegionId::NONE) {
                    entry.index = None;
                }
            }
        }

        let mut dirty_entries = Vec::new();
        let mut iter = 0;
        while !stack.is_empty() {
            let mut failed = 0;
            dirty_entries.clear();

            for entry in stack.iter_mut() {
                let Some(i) = entry.index else {
                    failed += 1;
                    continue;
                };

                let mut region = src_reg[i];
                let mut distance2 = u16::MAX;
                let area = self.areas[i];
                for dir in 0..4 {
                    let Some(a_i) = self.neighbor_index(entry.x, entry.z, i, dir) else {
                        continue;
                    };
                    if self.areas[a_i] != area {
                        continue;
                    }
                    let a_region = src_reg[a_i];
                    let a_dist = src_dist[a_i].saturating_add(2);
                    if a_region != RegionId::NONE
                        && !a_region.contains(RegionId::BORDER_REGION)
                        && a_dist < distance2
                    {
                        region = a_region;
                        distance2 = a_dist;
                    }
                }
                if region != RegionId::NONE {
                    // Mark as used
                    entry.index = None;
                    dirty_entries.push(DirtyEntry {
                        index: i,
                        region,
                        distance2,
                    });
                } else {
                    failed += 1;
                }
            }

            // Copy entries that differ between src and dst to keep them in sync.
            for dirty_entry in &dirty_entries {
                src_reg[dirty_entry.index] = dirty_entry.region;
                src_dist[dirty_entry.index] = dirty_entry.distance2;
            }

            if failed == stack.len() {
                break;
            }

            if level > 0 {
                iter += 1;
                if iter >= max_iter {
                    break;
                }
            }
        }
    }
}

fn append_stacks(
    src_stack: &[LevelStackEntry],
    dst_stack: &mut Vec<LevelStackEntry>,
    src_reg: &[RegionId],
) {
    for entry in src_stack {
        let Some(i) = entry.index else {
            continue;
        };
        if src_reg[i] != RegionId::NONE {
            continue;
        }
        dst_stack.push(entry.clone());
    }
}

#[derive(Clone, Debug)]
struct LevelStackEntry {
    x: u16,
    z: u16,
    index: Option<usize>,
}

#[derive(Clone, Debug)]
struct DirtyEntry {
    index: usize,
    region: RegionId,
    distance2: u16,
}

#[cfg(test)]
mod tests {
    use crate::test_support::flat_compact_heightfield;

    use super::*;

    #[test]
    fn open_square_becomes_a_single_region() {
        let mut compact = flat_compact_heightfield(12.0);
        compact.build_distance_field();
        compact.build_regions(0, 8, 20).unwrap();
        assert_eq!(compact.max_region, RegionId::from(1));
        assert!(
            compact
                .spans
                .iter()
                .all(|span| span.region == RegionId::from(1))
        );
    }

    #[test]
    fn small_islands_are_removed() {
        let mut compact = flat_compact_heightfield(6.0);
        compact.build_distance_field();
        compact.build_regions(0, 64, 400).unwrap();
        assert_eq!(compact.max_region, RegionId::NONE);
        assert!(compact.spans.iter().all(|span| span.region == RegionId::NONE));
    }

    #[test]
    fn border_strips_are_flagged() {
        let mut compact = flat_compact_heightfield(12.0);
        compact.build_distance_field();
        compact.build_regions(2, 0, 0).unwrap();
        assert_eq!(compact.border_size, 2);
        let corner = compact.cell_at(0, 0).index() as usize;
        assert!(
            compact.spans[corner]
                .region
                .contains(RegionId::BORDER_REGION)
        );
        let center = compact.cell_at(6, 6).index() as usize;
        assert!(compact.spans[center].region.is_region());
    }
}
