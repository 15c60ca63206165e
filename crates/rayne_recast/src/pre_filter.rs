use crate::{
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    span::{AreaType, SpanKey},
};

/// Ceiling used for the open space above the highest span of a column.
const MAX_HEIGHTFIELD_HEIGHT: i32 = 0xffff;

impl Heightfield {
    /// Marks non-walkable spans as walkable if their maximum is within `walkable_climb` of the span below them.
    ///
    /// This removes small obstacles and rasterization artifacts that the agent would be able to walk over
    /// such as curbs. It also allows agents to move up terraced structures like stairs.
    ///
    /// Obstacle spans are marked walkable if: `obstacle_span.max - walkable_span.max < walkable_climb`
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut previous: Option<(u16, bool, AreaType)> = None;

                // For each span in the column...
                let column: Vec<SpanKey> = self.column_keys(x, z).collect();
                for key in column {
                    let span = self.span_mut(key);
                    let walkable = span.area.is_walkable();

                    // If current span is not walkable, but there is walkable span just below it and the height difference
                    // is small enough for the agent to walk over, mark the current span as walkable too.
                    if let Some((previous_max, previous_was_walkable, previous_area)) = previous
                        && !walkable
                        && previous_was_walkable
                        && span.max as i32 - previous_max as i32 <= walkable_climb as i32
                    {
                        span.area = previous_area;
                    }

                    // Copy the original walkable value regardless of whether we changed it.
                    // This prevents multiple consecutive non-walkable spans from being erroneously marked as walkable.
                    previous = Some((span.max, walkable, span.area));
                }
            }
        }
    }

    /// Marks spans that are ledges as not-walkable.
    ///
    /// A ledge is a span with one or more neighbors whose maximum is further away than `walkable_climb`
    /// from the current span's maximum.
    /// This method removes the impact of the overestimation of conservative voxelization
    /// so the resulting mesh will not have regions hanging in the air over ledges.
    ///
    /// A span is a ledge if: `abs(current_span.max - neighbor_span.max) > walkable_climb`
    pub fn filter_ledge_spans(&mut self, walkable_height: u16, walkable_climb: u16) {
        let walkable_height = walkable_height as i32;
        let walkable_climb = walkable_climb as i32;
        for z in 0..self.height {
            for x in 0..self.width {
                let column: Vec<SpanKey> = self.column_keys(x, z).collect();
                for key in column {
                    let span = self.span(key);
                    // Skip non-walkable spans.
                    if !span.area.is_walkable() {
                        continue;
                    }
                    let floor = span.max as i32;
                    let ceiling = self.ceiling_above(key);

                    // The difference between this walkable area and the lowest neighbor walkable area.
                    // This is the difference between the current span and all neighbor spans that have
                    // enough space for an agent to move between, but not accounting at all for surface slope.
                    let mut lowest_neighbor_floor_difference = MAX_HEIGHTFIELD_HEIGHT;

                    // Min and max height of accessible neighbours.
                    let mut lowest_traversable_neighbor_floor = floor;
                    let mut highest_traversable_neighbor_floor = floor;

                    for direction in 0..4 {
                        let neighbor_x = x as i32 + dir_offset_x(direction) as i32;
                        let neighbor_z = z as i32 + dir_offset_z(direction) as i32;

                        // Skip neighbours which are out of bounds.
                        if !self.contains(neighbor_x, neighbor_z) {
                            lowest_neighbor_floor_difference = -walkable_climb - 1;
                            break;
                        }
                        let (neighbor_x, neighbor_z) = (neighbor_x as u16, neighbor_z as u16);

                        // The most we can step down to the neighbor is the walkable_climb distance.
                        // Start with the area under the neighbor span
                        let neighbor_ceiling = self
                            .span_at(neighbor_x, neighbor_z)
                            .map(|span| span.min as i32)
                            .unwrap_or(MAX_HEIGHTFIELD_HEIGHT);

                        // Skip neighbour if the gap between the spans is too small.
                        if ceiling.min(neighbor_ceiling) - floor >= walkable_height {
                            lowest_neighbor_floor_difference = -walkable_climb - 1;
                            break;
                        }

                        // For each span in the neighboring column...
                        for neighbor_key in self.column_keys(neighbor_x, neighbor_z) {
                            let neighbor_floor = self.span(neighbor_key).max as i32;
                            let neighbor_ceiling = self.ceiling_above(neighbor_key);

                            // Only consider neighboring areas that have enough overlap to be potentially traversable.
                            if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor) < walkable_height {
                                // No space to traverse between them.
                                continue;
                            }

                            let neighbor_floor_difference = neighbor_floor - floor;
                            lowest_neighbor_floor_difference =
                                lowest_neighbor_floor_difference.min(neighbor_floor_difference);

                            // Find min/max accessible neighbor height.
                            // Only consider neighbors that are at most walkable_climb away.
                            if neighbor_floor_difference.abs() <= walkable_climb {
                                // There is space to move to the neighbor cell and the slope isn't too much.
                                lowest_traversable_neighbor_floor =
                                    lowest_traversable_neighbor_floor.min(neighbor_floor);
                                highest_traversable_neighbor_floor =
                                    highest_traversable_neighbor_floor.max(neighbor_floor);
                            } else if neighbor_floor_difference < -walkable_climb {
                                // We already know this will be considered a ledge span so we can early-out
                                break;
                            }
                        }
                    }

                    // The current span is close to a ledge if the magnitude of the drop to any neighbour span is greater than the walkable_climb distance.
                    // That is, there is a gap that is large enough to let an agent move between them, but the drop (surface slope) is too large to allow it.
                    // (If this is the case, then lowest_neighbor_floor_difference will be negative, so compare against the negative walkable_climb as a means of checking
                    // the magnitude of the delta)
                    if lowest_neighbor_floor_difference < -walkable_climb {
                        self.span_mut(key).area = AreaType::NOT_WALKABLE;
                    }
                    // If the difference between all neighbor floors is too large, this is a steep slope, so mark the span as an unwalkable ledge.
                    else if highest_traversable_neighbor_floor - lowest_traversable_neighbor_floor
                        > walkable_climb
                    {
                        self.span_mut(key).area = AreaType::NOT_WALKABLE;
                    }
                }
            }
        }
    }

    /// Marks walkable spans as not walkable if the clearance above the span is less than the specified `walkable_height`.
    ///
    /// For this filter, the clearance above the span is the distance from the span's
    /// maximum to the minimum of the next higher span in the same column.
    /// If there is no higher span in the column, the clearance is computed as the
    /// distance from the top of the span to the maximum heightfield height.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                let column: Vec<SpanKey> = self.column_keys(x, z).collect();
                for key in column {
                    let floor = self.span(key).max as i32;
                    let ceiling = self.ceiling_above(key);
                    if ceiling - floor < walkable_height as i32 {
                        self.span_mut(key).area = AreaType::NOT_WALKABLE;
                    }
                }
            }
        }
    }

    #[inline]
    fn ceiling_above(&self, key: SpanKey) -> i32 {
        self.span(key)
            .next
            .map(|next| self.span(next).min as i32)
            .unwrap_or(MAX_HEIGHTFIELD_HEIGHT)
    }
}
