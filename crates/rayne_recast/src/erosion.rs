use crate::{CompactHeightfield, span::AreaType};

impl CompactHeightfield {
    /// Erode the walkable area by agent radius.
    ///
    /// Computes a chamfer distance (2 per orthogonal step, 3 per diagonal step) from every
    /// boundary span and marks all spans closer than `walkable_radius` cells as not walkable.
    pub fn erode_walkable_area(&mut self, walkable_radius: u16) {
        let mut distance_to_boundary = vec![u8::MAX; self.spans.len()];

        // Mark boundary cells.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for span_index in cell.index_range() {
                    if !self.areas[span_index].is_walkable() {
                        distance_to_boundary[span_index] = 0;
                        continue;
                    }
                    // Check that there is a non-null adjacent span in each of the 4 cardinal directions.
                    let mut neighbor_count = 0;
                    for direction in 0..4 {
                        let Some(neighbor_span_index) =
                            self.neighbor_index(x, z, span_index, direction)
                        else {
                            break;
                        };
                        if !self.areas[neighbor_span_index].is_walkable() {
                            break;
                        }
                        neighbor_count += 1;
                    }

                    // At least one missing neighbour, so this is a boundary cell.
                    if neighbor_count != 4 {
                        distance_to_boundary[span_index] = 0;
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
                        relax(&mut distance_to_boundary, i, a_i, 2);
                        // (-1, -1)
                        if let Some(aa_i) = self.neighbor_index(x - 1, z, a_i, 3) {
                            relax(&mut distance_to_boundary, i, aa_i, 3);
                        }
                    }
                    // (0, -1)
                    if let Some(a_i) = self.neighbor_index(x, z, i, 3) {
                        relax(&mut distance_to_boundary, i, a_i, 2);
                        // (1, -1)
                        if let Some(aa_i) = self.neighbor_index(x, z - 1, a_i, 2) {
                            relax(&mut distance_to_boundary, i, aa_i, 3);
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
                        relax(&mut distance_to_boundary, i, a_i, 2);
                        // (1, 1)
                        if let Some(aa_i) = self.neighbor_index(x + 1, z, a_i, 1) {
                            relax(&mut distance_to_boundary, i, aa_i, 3);
                        }
                    }
                    // (0, 1)
                    if let Some(a_i) = self.neighbor_index(x, z, i, 1) {
                        relax(&mut distance_to_boundary, i, a_i, 2);
                        // (-1, 1)
                        if let Some(aa_i) = self.neighbor_index(x, z + 1, a_i, 0) {
                            relax(&mut distance_to_boundary, i, aa_i, 3);
                        }
                    }
                }
            }
        }

        let min_boundary_distance = walkable_radius.saturating_mul(2);
        for (area, distance) in self.areas.iter_mut().zip(distance_to_boundary) {
            if (distance as u16) < min_boundary_distance {
                *area = AreaType::NOT_WALKABLE;
            }
        }
    }
}

#[inline]
fn relax(dist: &mut [u8], i: usize, from: usize, cost: u8) {
    let new_distance = dist[from].saturating_add(cost);
    if new_distance < dist[i] {
        dist[i] = new_distance;
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::flat_compact_heightfield;

    use super::*;

    fn walkable_count(compact: &CompactHeightfield) -> usize {
        compact.areas.iter().filter(|area| area.is_walkable()).count()
    }

    #[test]
    fn zero_radius_keeps_everything() {
        let mut compact = flat_compact_heightfield(8.0);
        compact.erode_walkable_area(0);
        assert_eq!(walkable_count(&compact), 64);
    }

    #[test]
    fn radius_one_removes_the_outer_ring() {
        let mut compact = flat_compact_heightfield(8.0);
        compact.erode_walkable_area(1);
        assert_eq!(walkable_count(&compact), 36);
        let corner = compact.cell_at(0, 0).index() as usize;
        assert!(!compact.areas[corner].is_walkable());
        let inner = compact.cell_at(1, 1).index() as usize;
        assert!(compact.areas[inner].is_walkable());
    }

    #[test]
    fn radius_two_removes_two_rings() {
        let mut compact = flat_compact_heightfield(8.0);
        compact.erode_walkable_area(2);
        assert_eq!(walkable_count(&compact), 16);
    }
}
