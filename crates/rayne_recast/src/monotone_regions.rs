//! Monotone partitioning
//!   - fastest
//!   - partitions the heightfield into regions without holes and overlaps (guaranteed)
//!   - creates long thin polygons, which sometimes causes paths with detours
//!   * use this if you want fast navmesh generation

use crate::{
    CompactHeightfield,
    region::RegionId,
    region_merge::{RegionError, take_region_id},
};

const NULL_NEIGHBOUR: RegionId = RegionId::from_bits_retain(0xffff);

#[derive(Debug, Clone, Copy, Default)]
struct SweepSpan {
    /// Final region id of the sweep.
    id: RegionId,
    /// Number of spans of the sweep touching `neighbour`.
    sample_count: u16,
    /// The single region of the previous row this sweep touches.
    neighbour: RegionId,
}

impl CompactHeightfield {
    /// Partitions the walkable surface into regions by sweeping it row by row.
    ///
    /// Neighbouring spans in a row form a sweep. A sweep continues the region of the previous row
    /// when it touches exactly one region there, and that region touches no other sweep.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::TooManyRegions`] if the region ids overflow.
    pub fn build_regions_monotone(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionError> {
        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut region_id = RegionId::from(1);

        self.paint_border_regions(border_size, &mut region_id, &mut src_reg)?;
        self.sweep_rows(&mut region_id, &mut src_reg)?;

        // Merge regions and filter out small regions.
        // Monotone partitioning does not generate overlapping regions.
        let (max_region, _overlaps) = self.merge_and_filter_regions(
            min_region_area,
            merge_region_area,
            region_id,
            &mut src_reg,
        );
        self.max_region = max_region;

        // Store the result out.
        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        Ok(())
    }

    /// Assigns every walkable span inside the border a monotone region id.
    /// `region_id` is the next free id and is advanced for every region created.
    pub(crate) fn sweep_rows(
        &self,
        region_id: &mut RegionId,
        src_reg: &mut [RegionId],
    ) -> Result<(), RegionError> {
        let border_size = self.border_size;
        let mut sweeps: Vec<SweepSpan> = Vec::with_capacity(self.width.max(self.height) as usize);
        let mut previous_row_counts: Vec<u16> = Vec::with_capacity(256);

        // Sweep one line at a time.
        for z in border_size..self.height.saturating_sub(border_size) {
            // Collect spans from this row.
            previous_row_counts.clear();
            previous_row_counts.resize(region_id.bits() as usize + 1, 0);
            sweeps.clear();
            sweeps.push(SweepSpan::default());

            for x in border_size..self.width.saturating_sub(border_size) {
                for i in self.cell_at(x, z).index_range() {
                    if !self.areas[i].is_walkable() {
                        continue;
                    }

                    // -x
                    let mut previous_id = self
                        .neighbor_index(x, z, i, 0)
                        .filter(|&a_i| {
                            !src_reg[a_i].contains(RegionId::BORDER_REGION)
                                && self.areas[i] == self.areas[a_i]
                        })
                        .map(|a_i| src_reg[a_i])
                        .unwrap_or(RegionId::NONE);

                    if previous_id == RegionId::NONE {
                        previous_id = RegionId::from(sweeps.len() as u16);
                        sweeps.push(SweepSpan::default());
                    }
                    src_reg[i] = previous_id;

                    // -z
                    let Some(a_i) = self.neighbor_index(x, z, i, 3) else {
                        continue;
                    };
                    let neighbour_region = src_reg[a_i];
                    if neighbour_region != RegionId::NONE
                        && !neighbour_region.contains(RegionId::BORDER_REGION)
                        && self.areas[i] == self.areas[a_i]
                    {
                        let sweep = &mut sweeps[previous_id.bits() as usize];
                        if sweep.neighbour == RegionId::NONE || sweep.neighbour == neighbour_region {
                            sweep.neighbour = neighbour_region;
                            sweep.sample_count += 1;
                            previous_row_counts[neighbour_region.bits() as usize] += 1;
                        } else {
                            sweep.neighbour = NULL_NEIGHBOUR;
                        }
                    }
                }
            }

            // Create unique ID.
            for sweep in sweeps.iter_mut().skip(1) {
                let neighbour = sweep.neighbour;
                if neighbour != NULL_NEIGHBOUR
                    && neighbour != RegionId::NONE
                    && previous_row_counts[neighbour.bits() as usize] == sweep.sample_count
                {
                    sweep.id = neighbour;
                } else {
                    sweep.id = take_region_id(region_id)?;
                }
            }

            // Remap IDs
            let sweep_count = sweeps.len() as u16;
            for x in border_size..self.width.saturating_sub(border_size) {
                for i in self.cell_at(x, z).index_range() {
                    let sweep = src_reg[i].bits();
                    if sweep > 0 && sweep < sweep_count {
                        src_reg[i] = sweeps[sweep as usize].id;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{AreaType, test_support::flat_compact_heightfield};

    use super::*;

    #[test]
    fn open_square_becomes_a_single_region() {
        let mut compact = flat_compact_heightfield(10.0);
        compact.build_regions_monotone(0, 8, 20).unwrap();
        assert_eq!(compact.max_region, RegionId::from(1));
        assert!(
            compact
                .spans
                .iter()
                .all(|span| span.region == RegionId::from(1))
        );
    }

    #[test]
    fn split_rows_start_new_regions() {
        let mut compact = flat_compact_heightfield(10.0);
        // Cut a wall through the middle of the upper half, producing a U shape.
        for z in 5..10 {
            let i = compact.cell_at(5, z).index() as usize;
            compact.areas[i] = AreaType::NOT_WALKABLE;
        }
        compact.build_regions_monotone(0, 0, 0).unwrap();
        let left = compact.cell_at(2, 8).index() as usize;
        let right = compact.cell_at(8, 8).index() as usize;
        let bottom = compact.cell_at(5, 2).index() as usize;
        assert!(compact.spans[left].region.is_region());
        assert!(compact.spans[right].region.is_region());
        assert_ne!(compact.spans[left].region, compact.spans[right].region);
        let wall = compact.cell_at(5, 8).index() as usize;
        assert_eq!(compact.spans[wall].region, RegionId::NONE);
        assert!(compact.spans[bottom].region.is_region());
    }

    #[test]
    fn undersized_regions_are_dropped() {
        let mut compact = flat_compact_heightfield(5.0);
        compact.build_regions_monotone(0, 64, 400).unwrap();
        assert!(compact.spans.iter().all(|span| span.region == RegionId::NONE));
    }
}
