//! Contains methods for rasterizing the triangles of a [`TriMesh`] into a [`Heightfield`].

use glam::Vec3A;
use thiserror::Error;

use crate::{
    heightfield::{Heightfield, SpanInsertion, SpanInsertionError},
    span::{AreaType, Span, SpanBuilder},
    trimesh::TriMesh,
};

impl Heightfield {
    /// Rasterizes all triangles of a [`TriMesh`] into the heightfield, using the area types stored in the mesh.
    ///
    /// Spans are merged with existing spans they overlap. When the ceilings of two merged spans are
    /// at most `flag_merge_threshold` apart, the higher area type wins.
    pub fn rasterize_triangles(
        &mut self,
        trimesh: &TriMesh,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        if trimesh.area_types.len() != trimesh.indices.len() {
            return Err(RasterizationError::AreaCountMismatch {
                triangles: trimesh.indices.len(),
                areas: trimesh.area_types.len(),
            });
        }
        for (i, triangle) in trimesh.indices.iter().enumerate() {
            let mut vertices = [Vec3A::ZERO; 3];
            for (vertex, index) in vertices.iter_mut().zip(triangle.to_array()) {
                *vertex = *trimesh.vertices.get(index as usize).ok_or(
                    RasterizationError::IndexOutOfBounds {
                        triangle: i,
                        index,
                        vertex_count: trimesh.vertices.len(),
                    },
                )?;
            }
            self.rasterize_triangle(vertices, trimesh.area_types[i], flag_merge_threshold)?;
        }
        Ok(())
    }

    /// Rasterizes a single triangle by clipping it against every row and then every column it touches.
    pub(crate) fn rasterize_triangle(
        &mut self,
        triangle: [Vec3A; 3],
        area: AreaType,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        let inverse_cell_size = 1.0 / self.cell_size;
        let inverse_cell_height = 1.0 / self.cell_height;
        let aabb_min = Vec3A::from(self.aabb.min);
        let aabb_max = Vec3A::from(self.aabb.max);
        let by = aabb_max.y - aabb_min.y;

        let tri_min = triangle[0].min(triangle[1]).min(triangle[2]);
        let tri_max = triangle[0].max(triangle[1]).max(triangle[2]);

        // If the triangle does not touch the bounding box of the heightfield, skip the triangle.
        if tri_min.cmpgt(aabb_max).any() || tri_max.cmplt(aabb_min).any() {
            return Ok(());
        }

        let w = self.width as i32;
        let h = self.height as i32;

        // Calculate the footprint of the triangle on the grid's z-axis
        let z0 = ((tri_min.z - aabb_min.z) * inverse_cell_size) as i32;
        let z1 = ((tri_max.z - aabb_min.z) * inverse_cell_size) as i32;

        // Use -1 rather than 0 to cut the polygon properly at the start of the tile
        let z0 = z0.clamp(-1, h - 1);
        let z1 = z1.clamp(0, h - 1);

        // Clip the triangle into all grid cells it touches.
        let mut remaining = triangle.to_vec();
        let mut row = Vec::with_capacity(7);
        let mut rest = Vec::with_capacity(7);
        let mut cell = Vec::with_capacity(7);
        let mut row_rest = Vec::with_capacity(7);

        for z in z0..=z1 {
            // Clip polygon to row. Store the remaining polygon as well
            let cell_z = aabb_min.z + z as f32 * self.cell_size;
            divide_poly(&remaining, &mut row, &mut rest, cell_z + self.cell_size, Axis::Z);
            std::mem::swap(&mut remaining, &mut rest);

            if row.len() < 3 || z < 0 {
                continue;
            }

            // Find horizontal bounds in the row
            let (min_x, max_x) = row
                .iter()
                .fold((row[0].x, row[0].x), |(min, max), v| (min.min(v.x), max.max(v.x)));
            let x0 = ((min_x - aabb_min.x) * inverse_cell_size) as i32;
            let x1 = ((max_x - aabb_min.x) * inverse_cell_size) as i32;
            if x1 < 0 || x0 >= w {
                continue;
            }
            let x0 = x0.clamp(-1, w - 1);
            let x1 = x1.clamp(0, w - 1);

            for x in x0..=x1 {
                // Clip polygon to column. Store the remaining polygon as well
                let cell_x = aabb_min.x + x as f32 * self.cell_size;
                divide_poly(&row, &mut cell, &mut row_rest, cell_x + self.cell_size, Axis::X);
                std::mem::swap(&mut row, &mut row_rest);

                if cell.len() < 3 || x < 0 {
                    continue;
                }

                // Calculate min and max of the span.
                let (span_min, span_max) = cell
                    .iter()
                    .fold((cell[0].y, cell[0].y), |(min, max), v| (min.min(v.y), max.max(v.y)));
                let span_min = span_min - aabb_min.y;
                let span_max = span_max - aabb_min.y;

                // Skip the span if it's completely outside the heightfield bounding box
                if span_max < 0.0 || span_min > by {
                    continue;
                }

                // Clamp the span to the heightfield bounding box.
                let span_min = span_min.max(0.0);
                let span_max = span_max.min(by);

                // Snap the span to the heightfield height grid.
                let span_min_cell = ((span_min * inverse_cell_height).floor() as i32)
                    .clamp(0, Span::MAX_HEIGHT as i32) as u16;
                let span_max_cell = ((span_max * inverse_cell_height).ceil() as i32)
                    .clamp(span_min_cell as i32 + 1, Span::MAX_HEIGHT as i32)
                    as u16;

                self.add_span(SpanInsertion {
                    x: x as u16,
                    z: z as u16,
                    flag_merge_threshold,
                    span: SpanBuilder {
                        min: span_min_cell,
                        max: span_max_cell,
                        area,
                        next: None,
                    }
                    .build(),
                })?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Z,
}

impl Axis {
    #[inline]
    fn of(self, v: Vec3A) -> f32 {
        match self {
            Axis::X => v.x,
            Axis::Z => v.z,
        }
    }
}

/// Divides a convex polygon along the plane `axis == line`.
/// `below` receives the part with coordinates `<= line`, `above` the rest.
fn divide_poly(input: &[Vec3A], below: &mut Vec<Vec3A>, above: &mut Vec<Vec3A>, line: f32, axis: Axis) {
    below.clear();
    above.clear();
    if input.is_empty() {
        return;
    }
    let deltas: Vec<f32> = input.iter().map(|v| line - axis.of(*v)).collect();

    let mut j = input.len() - 1;
    for i in 0..input.len() {
        let a_below = deltas[j] >= 0.0;
        let b_below = deltas[i] >= 0.0;
        if a_below != b_below {
            // Crossing the dividing line, add the intersection to both polygons.
            let s = deltas[j] / (deltas[j] - deltas[i]);
            let intersection = input[j] + (input[i] - input[j]) * s;
            below.push(intersection);
            above.push(intersection);
            // Points on the dividing line were already added above.
            if deltas[i] > 0.0 {
                below.push(input[i]);
            } else if deltas[i] < 0.0 {
                above.push(input[i]);
            }
        } else {
            // Same side
            if deltas[i] >= 0.0 {
                below.push(input[i]);
                if deltas[i] != 0.0 {
                    j = i;
                    continue;
                }
            }
            above.push(input[i]);
        }
        j = i;
    }
}

/// Errors that can occur during [`Heightfield::rasterize_triangles`].
#[derive(Error, Debug)]
pub enum RasterizationError {
    /// A span could not be inserted.
    #[error(transparent)]
    SpanInsertion(#[from] SpanInsertionError),
    /// A triangle referenced a vertex that does not exist.
    #[error("triangle {triangle} references vertex {index}, but the mesh only has {vertex_count} vertices")]
    IndexOutOfBounds {
        /// The index of the offending triangle
        triangle: usize,
        /// The vertex index that is out of bounds
        index: u32,
        /// The number of vertices in the mesh
        vertex_count: usize,
    },
    /// The mesh has a different number of area types than triangles.
    #[error("mesh has {triangles} triangles but {areas} area types")]
    AreaCountMismatch {
        /// Number of triangles in the mesh
        triangles: usize,
        /// Number of area types in the mesh
        areas: usize,
    },
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3};

    use crate::{Aabb3d, HeightfieldBuilder};

    use super::*;

    fn heightfield() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3::ZERO, [4.0, 4.0, 4.0]),
            cell_size: 1.0,
            cell_height: 0.5,
        }
        .build()
        .unwrap()
    }

    fn quad(y: f32) -> TriMesh {
        TriMesh {
            vertices: vec![
                Vec3A::new(0.0, y, 0.0),
                Vec3A::new(0.0, y, 4.0),
                Vec3A::new(4.0, y, 4.0),
                Vec3A::new(4.0, y, 0.0),
            ],
            indices: vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
            area_types: vec![AreaType::DEFAULT_WALKABLE; 2],
        }
    }

    #[test]
    fn divides_polygon_on_line() {
        let square = [
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 2.0),
            Vec3A::new(2.0, 0.0, 2.0),
            Vec3A::new(2.0, 0.0, 0.0),
        ];
        let mut below = Vec::new();
        let mut above = Vec::new();
        divide_poly(&square, &mut below, &mut above, 1.0, Axis::X);
        assert_eq!(below.len(), 4);
        assert_eq!(above.len(), 4);
        assert!(below.iter().all(|v| v.x <= 1.0));
        assert!(above.iter().all(|v| v.x >= 1.0));
    }

    #[test]
    fn flat_quad_fills_every_column() {
        let mut heightfield = heightfield();
        heightfield.rasterize_triangles(&quad(1.0), 1).unwrap();
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let span = heightfield.span_at(x, z).unwrap();
                assert_eq!(span.min, 2, "[{x}, {z}] span min");
                assert_eq!(span.max, 3, "[{x}, {z}] span max");
                assert_eq!(span.area, AreaType::DEFAULT_WALKABLE);
                assert!(span.next.is_none());
            }
        }
    }

    #[test]
    fn stacked_quads_create_two_spans() {
        let mut heightfield = heightfield();
        heightfield.rasterize_triangles(&quad(0.0), 1).unwrap();
        heightfield.rasterize_triangles(&quad(3.0), 1).unwrap();
        assert_eq!(heightfield.column_keys(2, 2).count(), 2);
    }

    #[test]
    fn triangles_outside_are_ignored() {
        let mut heightfield = heightfield();
        let mut trimesh = quad(1.0);
        for vertex in &mut trimesh.vertices {
            vertex.x += 10.0;
        }
        heightfield.rasterize_triangles(&trimesh, 1).unwrap();
        assert!(heightfield.allocated_spans.is_empty());
    }

    #[test]
    fn invalid_index_is_an_error() {
        let mut heightfield = heightfield();
        let mut trimesh = quad(1.0);
        trimesh.indices[0].x = 17;
        let result = heightfield.rasterize_triangles(&trimesh, 1);
        assert!(matches!(
            result,
            Err(RasterizationError::IndexOutOfBounds { index: 17, .. })
        ));
    }
}
