//! Layer partitioning
//!   - quite fast
//!   - partitions the heightfield into non-overlapping regions
//!   - relies on the triangulation code to cope with holes (thus slower than monotone partitioning)
//!   - produces better triangles than monotone partitioning
//!   - does not have the corner cases of watershed partitioning
//!   - can be slow and create a bit ugly tessellation (still better than monotone)
//!     if you have large open areas with small obstacles (not a problem if you use tiles)
//!   * good choice to use for tiled navmesh with medium and small sized tiles

use crate::{CompactHeightfield, region::RegionId, region_merge::RegionError};

impl CompactHeightfield {
    /// Partitions the walkable surface into non-overlapping layers.
    ///
    /// Starts from the same row sweep as [`CompactHeightfield::build_regions_monotone`], then unions
    /// connected regions into layers as long as the layer never covers a column twice.
    /// Layers smaller than `min_region_area` that do not touch the tile border are removed.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::TooManyRegions`] if the region ids overflow.
    pub fn build_layer_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
    ) -> Result<(), RegionError> {
        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut region_id = RegionId::from(1);

        self.paint_border_regions(border_size, &mut region_id, &mut src_reg)?;
        self.sweep_rows(&mut region_id, &mut src_reg)?;

        // Merge monotone regions to layers and remove small regions.
        self.max_region =
            self.merge_and_filter_layer_regions(min_region_area, region_id, &mut src_reg);

        // Store the result out.
        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        Ok(())
    }
}
