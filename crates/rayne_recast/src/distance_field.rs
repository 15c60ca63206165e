//! Distance field used by the watershed partitioning.
//!
//! Every walkable span gets its chamfer distance to the nearest area border, which is then
//! smoothed with a small box blur. Region seeds are grown from the maxima of this field.

use crate::{
    CompactHeightfield,
    math::{dir_offset_x, dir_offset_z},
};

impl CompactHeightfield {
    /// Prepare for region partitioning, by calculating distance field along the walkable surface.
    ///
    /// Fills [`CompactHeightfield::dist`] and [`CompactHeightfield::max_distance`].
    pub fn build_distance_field(&mut self) {
        let mut src = vec![0_u16; self.spans.len()];
        let mut dst = vec![0_u16; self.spans.len()];

        self.max_distance = self.calculate_distance_field(&mut src);
        self.box_blur(1, &src, &mut dst);
        self.dist = dst;
    }

    fn calculate_distance_field(&self, src: &mut [u16]) -> u16 {
        src.fill(u16::MAX);

        // Mark boundary cells.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    let area = self.areas[i];
                    let neighbor_count = (0..4)
                        .filter_map(|dir| self.neighbor_index(x, z, i, dir))
                        .filter(|&a_i| self.areas[a_i] == area)
                        .count();
                    if neighbor_count != 4 {
                        src[i] = 0;
                    }
                }
            }
        }

        // Pass 1
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    // (-1, 0)
                    if let Some(a_i) = self.neighbor_index(x, z, i, 0) {
                        relax(src, i, a_i, 2);
                        // (-1, -1)
                        if let Some(aa_i) = self.neighbor_index(x - 1, z, a_i, 3) {
                            relax(src, i, aa_i, 3);
                        }
                    }
                    // (0, -1)
                    if let Some(a_i) = self.neighbor_index(x, z, i, 3) {
                        relax(src, i, a_i, 2);
                        // (1, -1)
                        if let Some(aa_i) = self.neighbor_index(x, z - 1, a_i, 2) {
                            relax(src, i, aa_i, 3);
                        }
                    }
                }
            }
        }

        // Pass 2
        for z in (0..self.height).rev() {
            for x in (0..self.width).rev() {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    // (1, 0)
                    if let Some(a_i) = self.neighbor_index(x, z, i, 2) {
                        relax(src, i, a_i, 2);
                        // (1, 1)
                        if let Some(aa_i) = self.neighbor_index(x + 1, z, a_i, 1) {
                            relax(src, i, aa_i, 3);
                        }
                    }
                    // (0, 1)
                    if let Some(a_i) = self.neighbor_index(x, z, i, 1) {
                        relax(src, i, a_i, 2);
                        // (-1, 1)
                        if let Some(aa_i) = self.neighbor_index(x, z + 1, a_i, 0) {
                            relax(src, i, aa_i, 3);
                        }
                    }
                }
            }
        }

        src.iter().copied().max().unwrap_or(0)
    }

    fn box_blur(&self, threshold: u16, src: &[u16], dst: &mut [u16]) {
        let threshold = threshold * 2;

        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    let center_distance = src[i];
                    if center_distance <= threshold {
                        dst[i] = center_distance;
                        continue;
                    }

                    let mut distance = center_distance as u32;
                    for dir in 0..4 {
                        let Some(a_i) = self.neighbor_index(x, z, i, dir) else {
                            distance += center_distance as u32 * 2;
                            continue;
                        };
                        distance += src[a_i] as u32;
                        let a_x = (x as i32 + dir_offset_x(dir) as i32) as u16;
                        let a_z = (z as i32 + dir_offset_z(dir) as i32) as u16;
                        let dir2 = (dir + 1) & 0x3;
                        match self.neighbor_index(a_x, a_z, a_i, dir2) {
                            Some(aa_i) => distance += src[aa_i] as u32,
                            None => distance += center_distance as u32,
                        }
                    }
                    dst[i] = ((distance + 5) / 9) as u16;
                }
            }
        }
    }
}

#[inline]
fn relax(dist: &mut [u16], i: usize, from: usize, cost: u16) {
    let new_distance = dist[from].saturating_add(cost);
    if new_distance < dist[i] {
        dist[i] = new_distance;
    }
}
