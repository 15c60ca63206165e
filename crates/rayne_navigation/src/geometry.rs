//! Input geometry: the [`MeshSource`] trait hosts implement for their meshes, and the
//! [`GeometryCollector`] that flattens any number of sources into one triangle soup.

use glam::{UVec3, Vec3, Vec3A};
use rayne_recast::{Aabb3d, AreaType, TriMesh};
use thiserror::Error;

use crate::BuildError;

/// Size of one element of an index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum IndexWidth {
    /// One byte per index
    U8,
    /// Two bytes per index
    U16,
    /// Four bytes per index
    U32,
}

impl IndexWidth {
    /// The number of bytes of one index.
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            IndexWidth::U8 => 1,
            IndexWidth::U16 => 2,
            IndexWidth::U32 => 4,
        }
    }
}

/// An indexed triangle list the navigation mesh can be built from.
pub trait MeshSource {
    /// Number of vertices.
    fn vertex_count(&self) -> usize;

    /// Bytes between the starts of two consecutive vertices in the source buffer.
    fn stride(&self) -> usize {
        size_of::<[f32; 3]>()
    }

    /// Position of vertex `index`. `index` is below [`MeshSource::vertex_count`].
    fn position(&self, index: usize) -> Vec3;

    /// Element size of the index buffer.
    fn index_width(&self) -> IndexWidth;

    /// Number of indices. Trailing indices that do not form a full triangle are ignored.
    fn index_count(&self) -> usize;

    /// Index `i` of the index buffer, widened to 32 bits. `i` is below [`MeshSource::index_count`].
    fn index(&self, i: usize) -> u32;

    /// The bounds of the mesh. `None` if the mesh has no vertices.
    fn aabb(&self) -> Option<Aabb3d> {
        let mut positions = (0..self.vertex_count()).map(|i| self.position(i));
        let first = positions.next()?;
        let mut aabb = Aabb3d::new(first, first);
        for position in positions {
            aabb.extend(position);
        }
        Some(aabb)
    }
}

/// Errors that can occur when reading input geometry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    /// An index points past the vertices of its mesh.
    #[error("Mesh {mesh} references vertex {index}, but has only {vertex_count} vertices")]
    IndexOutOfBounds {
        /// Position of the mesh in the input
        mesh: usize,
        /// The offending index
        index: u32,
        /// Vertex count of the mesh
        vertex_count: usize,
    },
    /// The vertex layout of a [`RawMesh`] cannot hold a position.
    #[error("A position at offset {position_offset} does not fit into a vertex stride of {stride} bytes")]
    InvalidVertexLayout {
        /// Bytes per vertex
        stride: usize,
        /// Offset of the position inside a vertex
        position_offset: usize,
    },
    /// The index buffer of a [`RawMesh`] is not a whole number of indices.
    #[error("An index buffer of {len} bytes cannot hold indices of {width} bytes")]
    MisalignedIndices {
        /// Length of the buffer in bytes
        len: usize,
        /// Bytes per index
        width: usize,
    },
    /// The combined input has more vertices than 32-bit indices can address.
    #[error("The input has more than {max} vertices", max = u32::MAX)]
    TooManyVertices,
}

/// A mesh handed over as raw interleaved vertex bytes and a raw index buffer,
/// the way GPU-side meshes are usually stored. Values are read in native byte order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct RawMesh {
    vertex_data: Vec<u8>,
    stride: usize,
    position_offset: usize,
    index_data: Vec<u8>,
    index_width: IndexWidth,
}

impl RawMesh {
    /// Creates a mesh from interleaved vertices of `stride` bytes whose position is three `f32`
    /// starting at `position_offset`, and from an index buffer of `index_width` elements.
    ///
    /// # Errors
    ///
    /// Returns an error if the position does not fit into a vertex,
    /// or the index buffer length is not a multiple of the index width.
    pub fn new(
        vertex_data: Vec<u8>,
        stride: usize,
        position_offset: usize,
        index_data: Vec<u8>,
        index_width: IndexWidth,
    ) -> Result<Self, GeometryError> {
        if position_offset + 3 * size_of::<f32>() > stride {
            return Err(GeometryError::InvalidVertexLayout {
                stride,
                position_offset,
            });
        }
        if index_data.len() % index_width.bytes() != 0 {
            return Err(GeometryError::MisalignedIndices {
                len: index_data.len(),
                width: index_width.bytes(),
            });
        }
        Ok(Self {
            vertex_data,
            stride,
            position_offset,
            index_data,
            index_width,
        })
    }
}

fn read_bytes<const N: usize>(data: &[u8], at: usize) -> [u8; N] {
    let mut bytes = [0; N];
    bytes.copy_from_slice(&data[at..at + N]);
    bytes
}

impl MeshSource for RawMesh {
    fn stride(&self) -> usize {
        self.stride
    }

    fn vertex_count(&self) -> usize {
        // The last vertex may omit the attributes following its position.
        let position_end = self.position_offset + 3 * size_of::<f32>();
        if self.vertex_data.len() < position_end {
            return 0;
        }
        (self.vertex_data.len() - position_end) / self.stride + 1
    }

    fn position(&self, index: usize) -> Vec3 {
        let at = index * self.stride + self.position_offset;
        Vec3::new(
            f32::from_ne_bytes(read_bytes(&self.vertex_data, at)),
            f32::from_ne_bytes(read_bytes(&self.vertex_data, at + 4)),
            f32::from_ne_bytes(read_bytes(&self.vertex_data, at + 8)),
        )
    }

    fn index_width(&self) -> IndexWidth {
        self.index_width
    }

    fn index_count(&self) -> usize {
        self.index_data.len() / self.index_width.bytes()
    }

    fn index(&self, i: usize) -> u32 {
        let at = i * self.index_width.bytes();
        match self.index_width {
            IndexWidth::U8 => self.index_data[at] as u32,
            IndexWidth::U16 => u16::from_ne_bytes(read_bytes(&self.index_data, at)) as u32,
            IndexWidth::U32 => u32::from_ne_bytes(read_bytes(&self.index_data, at)),
        }
    }
}

/// A mesh with typed positions and 32-bit indices.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct IndexedMesh {
    /// Vertex positions
    pub positions: Vec<Vec3>,
    /// Triangle list indices into `positions`
    pub indices: Vec<u32>,
}

impl MeshSource for IndexedMesh {
    fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    fn position(&self, index: usize) -> Vec3 {
        self.positions[index]
    }

    fn index_width(&self) -> IndexWidth {
        IndexWidth::U32
    }

    fn index_count(&self) -> usize {
        self.indices.len()
    }

    fn index(&self, i: usize) -> u32 {
        self.indices[i]
    }
}

/// The flattened input of a build.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedGeometry {
    /// All triangles of all sources. Area types are not yet assigned.
    pub trimesh: TriMesh,
    /// The union of the bounds of all sources
    pub aabb: Aabb3d,
}

impl CollectedGeometry {
    /// Number of collected vertices.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.trimesh.vertices.len()
    }

    /// Number of collected triangles.
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.trimesh.triangle_count()
    }
}

/// Flattens [`MeshSource`]s into a single [`TriMesh`].
#[derive(Debug, Default, Clone, Copy)]
pub struct GeometryCollector;

impl GeometryCollector {
    /// Collects the triangles of all `sources`, offsetting each source's indices past the
    /// vertices collected before it.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::EmptyInput`] if there are no sources or they contain no vertices,
    /// and [`BuildError::Geometry`] if an index is out of bounds or the input is too large.
    pub fn collect(sources: &[&dyn MeshSource]) -> Result<CollectedGeometry, BuildError> {
        let mut trimesh = TriMesh::default();
        let mut aabb: Option<Aabb3d> = None;

        for (mesh, source) in sources.iter().enumerate() {
            let vertex_count = source.vertex_count();
            let triangle_count = source.index_count() / 3;
            if trimesh.vertices.len() + vertex_count > u32::MAX as usize {
                return Err(GeometryError::TooManyVertices.into());
            }
            let base = trimesh.vertices.len() as u32;

            trimesh
                .vertices
                .extend((0..vertex_count).map(|i| Vec3A::from(source.position(i))));
            trimesh.indices.reserve(triangle_count);
            for triangle in 0..triangle_count {
                let mut corners = [0; 3];
                for (corner, slot) in corners.iter_mut().enumerate() {
                    let index = source.index(triangle * 3 + corner);
                    if index as usize >= vertex_count {
                        return Err(GeometryError::IndexOutOfBounds {
                            mesh,
                            index,
                            vertex_count,
                        }
                        .into());
                    }
                    *slot = base + index;
                }
                trimesh.indices.push(UVec3::from_array(corners));
            }

            if let Some(source_aabb) = source.aabb() {
                aabb = Some(match aabb {
                    Some(aabb) => aabb.union(&source_aabb),
                    None => source_aabb,
                });
            }
        }

        trimesh
            .area_types
            .resize(trimesh.indices.len(), AreaType::NOT_WALKABLE);
        let aabb = aabb.ok_or(BuildError::EmptyInput)?;
        Ok(CollectedGeometry { trimesh, aabb })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(offset: f32) -> IndexedMesh {
        IndexedMesh {
            positions: vec![
                Vec3::new(offset, 0.0, 0.0),
                Vec3::new(offset, 0.0, 1.0),
                Vec3::new(offset + 1.0, 0.0, 0.0),
            ],
            indices: vec![0, 1, 2],
        }
    }

    fn raw_vertices(positions: &[[f32; 3]], stride: usize, offset: usize) -> Vec<u8> {
        let mut data = vec![0xAB; positions.len() * stride];
        for (i, position) in positions.iter().enumerate() {
            for (j, value) in position.iter().enumerate() {
                let at = i * stride + offset + j * 4;
                data[at..at + 4].copy_from_slice(&value.to_ne_bytes());
            }
        }
        data
    }

    #[test]
    fn sources_are_flattened_with_offsets() {
        let a = triangle(0.0);
        let b = triangle(5.0);
        let collected = GeometryCollector::collect(&[&a, &b]).unwrap();
        assert_eq!(collected.vertex_count(), 6);
        assert_eq!(collected.triangle_count(), 2);
        assert_eq!(collected.trimesh.indices[1], UVec3::new(3, 4, 5));
        assert_eq!(collected.trimesh.area_types.len(), 2);
        assert_eq!(collected.aabb.min, Vec3::ZERO);
        assert_eq!(collected.aabb.max, Vec3::new(6.0, 0.0, 1.0));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            GeometryCollector::collect(&[]),
            Err(BuildError::EmptyInput)
        ));
        let empty = IndexedMesh::default();
        assert!(matches!(
            GeometryCollector::collect(&[&empty]),
            Err(BuildError::EmptyInput)
        ));
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let mut broken = triangle(0.0);
        broken.indices[2] = 3;
        assert!(matches!(
            GeometryCollector::collect(&[&broken]),
            Err(BuildError::Geometry(GeometryError::IndexOutOfBounds {
                mesh: 0,
                index: 3,
                vertex_count: 3
            }))
        ));
    }

    #[test]
    fn raw_indices_of_every_width_are_widened() {
        let positions = [[0.0, 1.0, 2.0], [3.0, 4.0, 5.0], [6.0, 7.0, 8.0]];
        let vertices = raw_vertices(&positions, 20, 4);
        for (width, indices) in [
            (IndexWidth::U8, vec![0u8, 1, 2]),
            (IndexWidth::U16, [0u16, 1, 2].iter().flat_map(|i| i.to_ne_bytes()).collect()),
            (IndexWidth::U32, [0u32, 1, 2].iter().flat_map(|i| i.to_ne_bytes()).collect()),
        ] {
            let mesh = RawMesh::new(vertices.clone(), 20, 4, indices, width).unwrap();
            assert_eq!(mesh.vertex_count(), 3);
            assert_eq!(mesh.stride(), 20);
            assert_eq!(mesh.position(1), Vec3::new(3.0, 4.0, 5.0));
            assert_eq!(mesh.index_count(), 3);
            assert_eq!((0..3).map(|i| mesh.index(i)).collect::<Vec<_>>(), vec![0, 1, 2]);
        }
    }

    #[test]
    fn raw_layouts_are_validated() {
        assert!(matches!(
            RawMesh::new(Vec::new(), 8, 0, Vec::new(), IndexWidth::U16),
            Err(GeometryError::InvalidVertexLayout { .. })
        ));
        assert!(matches!(
            RawMesh::new(Vec::new(), 12, 0, vec![0; 3], IndexWidth::U16),
            Err(GeometryError::MisalignedIndices { len: 3, width: 2 })
        ));
    }
}
