//! Polygon lookups and path finding on a [`NavMesh`].

use std::sync::Arc;

use bitflags::bitflags;
use glam::Vec3;
use thiserror::Error;

use crate::{
    NavMesh, PolyRef, QueryFilter,
    math::{distance_pt_seg_sqr_2d, tri_area_2d, vequal},
    node_pool::{MAX_NODES, NodeFlags, NodePool, NodeQueue},
};

/// Scales the distance heuristic slightly below the true distance, so that it never overestimates.
const HEURISTIC_SCALE: f32 = 0.999;

/// The first portal is skipped when the start lies closer than this to it.
const PORTAL_SKIP_DISTANCE: f32 = 0.001;

/// The result of [`NavMeshQuery::find_nearest_poly`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPoly {
    /// The nearest polygon
    pub poly_ref: PolyRef,
    /// The closest point on the polygon
    pub point: Vec3,
    /// Whether the query center lies over the polygon on the xz-plane
    pub over_poly: bool,
}

/// A corridor of polygons, the result of [`NavMeshQuery::find_path`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonPath {
    /// The polygons from the start polygon towards the end polygon
    pub polygons: Vec<PolyRef>,
    /// The end polygon was not reached. The corridor leads to the polygon closest to the end instead.
    pub partial: bool,
    /// The search ran out of nodes before it could explore everything it wanted to
    pub out_of_nodes: bool,
    /// The corridor was longer than the requested maximum and has been cut off at the end
    pub truncated: bool,
}

bitflags! {
    /// Describes a point of a [`StraightPath`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct StraightPathFlags: u8 {
        /// The point is the start of the path
        const START = 0x01;
        /// The point is the end of the path
        const END = 0x02;
    }
}

/// A point of a [`StraightPath`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct StraightPathPoint {
    /// World space position
    pub position: Vec3,
    /// Start and end markers
    pub flags: StraightPathFlags,
    /// The polygon that is entered at this point. `None` for the end point.
    pub polygon: Option<PolyRef>,
}

/// The waypoints along a corridor, the result of [`NavMeshQuery::find_straight_path`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StraightPath {
    /// The waypoints from start to end
    pub points: Vec<StraightPathPoint>,
    /// The corridor was broken, the path ends at the last reachable polygon
    pub partial: bool,
    /// The path had more points than the requested maximum and has been cut off
    pub truncated: bool,
}

impl StraightPath {
    /// Appends a point, merging it into the previous one if both are equal.
    /// Returns `false` once no further points should be added.
    fn append(
        &mut self,
        position: Vec3,
        flags: StraightPathFlags,
        polygon: Option<PolyRef>,
        max_points: usize,
    ) -> bool {
        if let Some(last) = self
            .points
            .last_mut()
            .filter(|last| vequal(last.position, position))
        {
            last.flags = flags;
            last.polygon = polygon;
            return true;
        }

        self.points.push(StraightPathPoint {
            position,
            flags,
            polygon,
        });
        if flags == StraightPathFlags::END {
            return false;
        }
        if self.points.len() >= max_points {
            self.truncated = true;
            return false;
        }
        true
    }
}

/// Errors that can occur when querying a [`NavMesh`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The reference does not point to a polygon of the queried mesh.
    #[error("{poly_ref} does not belong to the navigation mesh")]
    InvalidPolyRef {
        /// The offending reference
        poly_ref: PolyRef,
    },
    /// A straight path was requested for an empty corridor.
    #[error("The polygon corridor is empty")]
    EmptyPath,
    /// A path was requested with room for zero elements.
    #[error("The output capacity must be at least 1")]
    ZeroCapacity,
    /// The node pool size is out of range.
    #[error("A query needs between 1 and {max} nodes, got {max_nodes}")]
    InvalidMaxNodes {
        /// The requested node count
        max_nodes: usize,
        /// The supported maximum
        max: usize,
    },
}

/// Runs queries against a [`NavMesh`].
///
/// Owns the node pool and open list of the path search, so a query object is reused across
/// many searches but is not shared between threads.
#[derive(Debug)]
pub struct NavMeshQuery {
    nav_mesh: Arc<NavMesh>,
    node_pool: NodePool,
    open_list: NodeQueue,
}

impl NavMeshQuery {
    /// Creates a query with room for `max_nodes` search nodes.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidMaxNodes`] if `max_nodes` is zero or larger than the pool can address.
    pub fn new(nav_mesh: Arc<NavMesh>, max_nodes: usize) -> Result<Self, QueryError> {
        if max_nodes == 0 || max_nodes > MAX_NODES {
            return Err(QueryError::InvalidMaxNodes {
                max_nodes,
                max: MAX_NODES,
            });
        }
        Ok(Self {
            nav_mesh,
            node_pool: NodePool::new(max_nodes),
            open_list: NodeQueue::with_capacity(max_nodes),
        })
    }

    /// The mesh this query runs against.
    #[inline]
    pub fn nav_mesh(&self) -> &Arc<NavMesh> {
        &self.nav_mesh
    }

    fn poly_index(&self, poly_ref: PolyRef) -> Result<usize, QueryError> {
        self.nav_mesh
            .poly_index(poly_ref)
            .ok_or(QueryError::InvalidPolyRef { poly_ref })
    }

    /// Finds the polygon nearest to `center` among those overlapping the box `center ± half_extents`.
    ///
    /// When `center` lies over a polygon, height differences up to the agent's climb count as zero distance.
    pub fn find_nearest_poly(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> Option<NearestPoly> {
        let nav_mesh = &self.nav_mesh;
        let mut nearest: Option<(f32, NearestPoly)> = None;
        nav_mesh.query_polygons(center - half_extents, center + half_extents, |index| {
            if !filter.pass_filter(&nav_mesh.polygons[index]) {
                return;
            }
            let Some(poly_ref) = nav_mesh.poly_ref(index) else {
                return;
            };
            let (point, over_poly) = nav_mesh.closest_point_on_poly(index, center);

            // If the point is directly over a polygon and closer than climb height,
            // favor that instead of a straight line nearest point.
            let diff = center - point;
            let distance = if over_poly {
                let d = diff.y.abs() - nav_mesh.walkable_climb;
                if d > 0.0 { d * d } else { 0.0 }
            } else {
                diff.length_squared()
            };

            if nearest.is_none_or(|(best, _)| distance < best) {
                nearest = Some((
                    distance,
                    NearestPoly {
                        poly_ref,
                        point,
                        over_poly,
                    },
                ));
            }
        });
        nearest.map(|(_, nearest)| nearest)
    }

    /// The closest point on the polygon to `position`, and whether `position` lies over it.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidPolyRef`] for references of other meshes.
    pub fn closest_point_on_poly(
        &self,
        poly_ref: PolyRef,
        position: Vec3,
    ) -> Result<(Vec3, bool), QueryError> {
        let index = self.poly_index(poly_ref)?;
        Ok(self.nav_mesh.closest_point_on_poly(index, position))
    }

    /// The height of the polygon's detail surface under `position`, or `None` if `position` is outside the polygon.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidPolyRef`] for references of other meshes.
    pub fn get_poly_height(&self, poly_ref: PolyRef, position: Vec3) -> Result<Option<f32>, QueryError> {
        let index = self.poly_index(poly_ref)?;
        Ok(self.nav_mesh.poly_height(index, position))
    }

    /// Finds a corridor of polygons from `start_ref` to `end_ref` with A*.
    ///
    /// Nodes sit on the midpoints of the crossed edges. If the end cannot be reached, either because
    /// it is disconnected or the node pool ran out, the corridor to the node closest to the end is
    /// returned and flagged as partial. At most `max_path` polygons are returned.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference does not belong to the mesh or `max_path` is zero.
    pub fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<PolygonPath, QueryError> {
        self.poly_index(start_ref)?;
        self.poly_index(end_ref)?;
        if max_path == 0 {
            return Err(QueryError::ZeroCapacity);
        }

        if start_ref == end_ref {
            return Ok(PolygonPath {
                polygons: vec![start_ref],
                ..Default::default()
            });
        }

        let nav_mesh = Arc::clone(&self.nav_mesh);
        self.node_pool.clear();
        self.open_list.clear();

        let Some(start_node) = self.node_pool.get_or_insert(start_ref) else {
            return Ok(PolygonPath {
                polygons: vec![start_ref],
                partial: true,
                out_of_nodes: true,
                truncated: false,
            });
        };
        let start_total = start_pos.distance(end_pos) * HEURISTIC_SCALE;
        {
            let node = self.node_pool.node_mut(start_node);
            node.position = start_pos;
            node.cost = 0.0;
            node.total = start_total;
            node.flags = NodeFlags::OPEN;
        }
        self.open_list.push(start_node, self.node_pool.nodes());

        let mut last_best_node = start_node;
        let mut last_best_cost = start_total;
        let mut out_of_nodes = false;

        while let Some(best) = self.open_list.pop(self.node_pool.nodes()) {
            let best_node = {
                let node = self.node_pool.node_mut(best);
                node.flags.remove(NodeFlags::OPEN);
                node.flags.insert(NodeFlags::CLOSED);
                *node
            };

            // Reached the goal, stop searching.
            if best_node.id == end_ref {
                last_best_node = best;
                break;
            }

            let Some(best_poly) = nav_mesh.polygon(best_node.id) else {
                continue;
            };
            let parent_ref = best_node
                .parent
                .map(|parent| self.node_pool.node(parent).id);

            for link in nav_mesh.poly_links(best_poly) {
                let neighbor_ref = link.poly_ref;
                // Do not expand back to where we came from.
                if Some(neighbor_ref) == parent_ref {
                    continue;
                }
                let Some(neighbor_poly) = nav_mesh.polygon(neighbor_ref) else {
                    continue;
                };
                if !filter.pass_filter(neighbor_poly) {
                    continue;
                }

                let Some(neighbor) = self.node_pool.get_or_insert(neighbor_ref) else {
                    out_of_nodes = true;
                    continue;
                };

                // The node is visited for the first time, place it on the shared edge.
                if self.node_pool.node(neighbor).flags.is_empty() {
                    if let Some(midpoint) = nav_mesh.edge_midpoint(best_node.id, neighbor_ref) {
                        self.node_pool.node_mut(neighbor).position = midpoint;
                    }
                }
                let neighbor_pos = self.node_pool.node(neighbor).position;

                let (cost, heuristic) = if neighbor_ref == end_ref {
                    // Special case for last node.
                    let cur_cost = filter.cost(best_node.position, neighbor_pos);
                    let end_cost = filter.cost(neighbor_pos, end_pos);
                    (best_node.cost + cur_cost + end_cost, 0.0)
                } else {
                    let cur_cost = filter.cost(best_node.position, neighbor_pos);
                    (
                        best_node.cost + cur_cost,
                        neighbor_pos.distance(end_pos) * HEURISTIC_SCALE,
                    )
                };
                let total = cost + heuristic;

                let node = self.node_pool.node(neighbor);
                // The node is already in the open or closed list with a better result.
                if node.flags.intersects(NodeFlags::OPEN | NodeFlags::CLOSED) && total >= node.total {
                    continue;
                }
                let was_open = node.flags.contains(NodeFlags::OPEN);

                let node = self.node_pool.node_mut(neighbor);
                node.parent = Some(best);
                node.cost = cost;
                node.total = total;
                node.flags.remove(NodeFlags::CLOSED);
                if was_open {
                    self.open_list.modify(neighbor, self.node_pool.nodes());
                } else {
                    node.flags.insert(NodeFlags::OPEN);
                    self.open_list.push(neighbor, self.node_pool.nodes());
                }

                // Update nearest node to target so far.
                if heuristic < last_best_cost {
                    last_best_cost = heuristic;
                    last_best_node = neighbor;
                }
            }
        }

        let partial = self.node_pool.node(last_best_node).id != end_ref;
        if out_of_nodes {
            tracing::debug!(
                "Path search ran out of its {} nodes, result is partial: {partial}",
                self.node_pool.len()
            );
        }

        let mut polygons = Vec::new();
        let mut current = Some(last_best_node);
        while let Some(index) = current {
            let node = self.node_pool.node(index);
            polygons.push(node.id);
            current = node.parent;
        }
        polygons.reverse();

        let truncated = polygons.len() > max_path;
        polygons.truncate(max_path);

        Ok(PolygonPath {
            polygons,
            partial,
            out_of_nodes,
            truncated,
        })
    }

    /// Turns a polygon corridor into waypoints with the funnel algorithm.
    ///
    /// `start_pos` and `end_pos` are clamped onto the first and last polygon of the corridor.
    /// The result starts with a [`StraightPathFlags::START`] point and, unless cut off after
    /// `max_points` points, ends with a [`StraightPathFlags::END`] point.
    ///
    /// # Errors
    ///
    /// Returns an error if the corridor is empty, `max_points` is zero, or the corridor's first
    /// or last polygon does not belong to the mesh.
    pub fn find_straight_path(
        &self,
        start_pos: Vec3,
        end_pos: Vec3,
        path: &[PolyRef],
        max_points: usize,
    ) -> Result<StraightPath, QueryError> {
        let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
            return Err(QueryError::EmptyPath);
        };
        if max_points == 0 {
            return Err(QueryError::ZeroCapacity);
        }

        let nav_mesh = &self.nav_mesh;
        let closest_start = nav_mesh.closest_point_on_poly_boundary(self.poly_index(first)?, start_pos);
        let closest_end = nav_mesh.closest_point_on_poly_boundary(self.poly_index(last)?, end_pos);

        let mut straight = StraightPath {
            points: Vec::with_capacity(max_points.min(path.len() + 1)),
            ..Default::default()
        };
        if !straight.append(closest_start, StraightPathFlags::START, Some(first), max_points) {
            return Ok(straight);
        }

        if path.len() > 1 {
            let mut portal_apex = closest_start;
            let mut portal_left = portal_apex;
            let mut portal_right = portal_apex;
            let mut left_index = 0;
            let mut right_index = 0;
            let mut left_poly_ref = Some(first);
            let mut right_poly_ref = Some(first);

            let mut i = 0;
            while i < path.len() {
                let (left, right) = if i + 1 < path.len() {
                    // Next portal.
                    let Some((left, right)) = nav_mesh.portal_points(path[i], path[i + 1]) else {
                        // The corridor is broken here. Clamp the end to the last good polygon.
                        let index = self.poly_index(path[i])?;
                        let closest = nav_mesh.closest_point_on_poly_boundary(index, end_pos);
                        straight.append(
                            closest,
                            StraightPathFlags::empty(),
                            Some(path[i]),
                            max_points,
                        );
                        straight.partial = true;
                        return Ok(straight);
                    };

                    // If starting really close to the portal, advance.
                    if i == 0 {
                        let (distance, _) = distance_pt_seg_sqr_2d(portal_apex, left, right);
                        if distance < PORTAL_SKIP_DISTANCE * PORTAL_SKIP_DISTANCE {
                            i += 1;
                            continue;
                        }
                    }
                    (left, right)
                } else {
                    // End of the path.
                    (closest_end, closest_end)
                };
                let next_ref = path.get(i + 1).copied();

                // Right vertex.
                if tri_area_2d(portal_apex, portal_right, right) <= 0.0 {
                    if vequal(portal_apex, portal_right)
                        || tri_area_2d(portal_apex, portal_left, right) > 0.0
                    {
                        // Tighten the funnel.
                        portal_right = right;
                        right_poly_ref = next_ref;
                        right_index = i;
                    } else {
                        // Right over left, insert left to path and restart scan from portal left point.
                        portal_apex = portal_left;
                        let apex_index = left_index;
                        let flags = if left_poly_ref.is_none() {
                            StraightPathFlags::END
                        } else {
                            StraightPathFlags::empty()
                        };
                        if !straight.append(portal_apex, flags, left_poly_ref, max_points) {
                            return Ok(straight);
                        }

                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                // Left vertex.
                if tri_area_2d(portal_apex, portal_left, left) >= 0.0 {
                    if vequal(portal_apex, portal_left)
                        || tri_area_2d(portal_apex, portal_right, left) < 0.0
                    {
                        // Tighten the funnel.
                        portal_left = left;
                        left_poly_ref = next_ref;
                        left_index = i;
                    } else {
                        // Left over right, insert right to path and restart scan from portal right point.
                        portal_apex = portal_right;
                        let apex_index = right_index;
                        let flags = if right_poly_ref.is_none() {
                            StraightPathFlags::END
                        } else {
                            StraightPathFlags::empty()
                        };
                        if !straight.append(portal_apex, flags, right_poly_ref, max_points) {
                            return Ok(straight);
                        }

                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                i += 1;
            }
        }

        straight.append(closest_end, StraightPathFlags::END, None, max_points);
        Ok(straight)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::test_support::{flat_nav_mesh, l_shaped_nav_mesh, two_level_nav_mesh};

    fn query(nav_mesh: NavMesh) -> NavMeshQuery {
        NavMeshQuery::new(Arc::new(nav_mesh), 2048).unwrap()
    }

    #[track_caller]
    fn nearest(query: &NavMeshQuery, point: Vec3) -> NearestPoly {
        query
            .find_nearest_poly(point, Vec3::splat(4.0), &QueryFilter::default())
            .expect("a polygon near the point")
    }

    #[test]
    fn node_pool_size_is_validated() {
        let nav_mesh = Arc::new(flat_nav_mesh());
        assert!(matches!(
            NavMeshQuery::new(nav_mesh.clone(), 0),
            Err(QueryError::InvalidMaxNodes { max_nodes: 0, .. })
        ));
        assert!(NavMeshQuery::new(nav_mesh.clone(), MAX_NODES + 1).is_err());
        assert!(NavMeshQuery::new(nav_mesh, 1).is_ok());
    }

    #[test]
    fn nearest_poly_snaps_to_the_surface() {
        let query = query(flat_nav_mesh());
        let found = nearest(&query, Vec3::new(0.37, 1.0, -0.21));
        assert!(found.over_poly);
        assert_relative_eq!(found.point.x, 0.37);
        assert_relative_eq!(found.point.z, -0.21);
        assert!(found.point.y < 0.6);
    }

    #[test]
    fn nearest_poly_misses_far_points() {
        let query = query(flat_nav_mesh());
        assert_eq!(
            query.find_nearest_poly(
                Vec3::new(50.0, 0.0, 50.0),
                Vec3::splat(4.0),
                &QueryFilter::default()
            ),
            None
        );
    }

    #[test]
    fn nearest_poly_respects_the_filter() {
        let query = query(flat_nav_mesh());
        let filter = QueryFilter {
            exclude_flags: crate::PolyFlags::WALK,
            ..Default::default()
        };
        assert_eq!(
            query.find_nearest_poly(Vec3::ZERO, Vec3::splat(4.0), &filter),
            None
        );
    }

    #[test]
    fn nearest_poly_prefers_the_level_below_the_point() {
        let query = query(two_level_nav_mesh());
        // Over the raised block, slightly above its top.
        let upper = nearest(&query, Vec3::new(3.0, 1.8, 3.0));
        assert!(upper.over_poly);
        assert!(upper.point.y > 1.0, "snapped to {}", upper.point);
        // Next to the block on the ground.
        let lower = nearest(&query, Vec3::new(-3.0, 0.2, -3.0));
        assert!(lower.point.y < 0.6, "snapped to {}", lower.point);
    }

    #[test]
    fn same_polygon_path_has_one_entry() {
        let mut query = query(flat_nav_mesh());
        let start = nearest(&query, Vec3::ZERO);
        let path = query
            .find_path(
                start.poly_ref,
                start.poly_ref,
                start.point,
                start.point,
                &QueryFilter::default(),
                2048,
            )
            .unwrap();
        assert_eq!(path.polygons, vec![start.poly_ref]);
        assert!(!path.partial);
    }

    #[test]
    fn corridor_connects_start_and_end() {
        let mut query = query(l_shaped_nav_mesh());
        let start = nearest(&query, Vec3::new(-4.0, 0.0, 4.0));
        let end = nearest(&query, Vec3::new(4.0, 0.0, -4.0));
        let path = query
            .find_path(
                start.poly_ref,
                end.poly_ref,
                start.point,
                end.point,
                &QueryFilter::default(),
                2048,
            )
            .unwrap();
        assert!(!path.partial);
        assert!(!path.truncated);
        assert_eq!(path.polygons.first(), Some(&start.poly_ref));
        assert_eq!(path.polygons.last(), Some(&end.poly_ref));

        // Consecutive polygons are linked.
        let nav_mesh = query.nav_mesh().clone();
        for pair in path.polygons.windows(2) {
            assert!(nav_mesh.portal_points(pair[0], pair[1]).is_some());
        }
    }

    #[test]
    fn long_corridors_are_truncated() {
        let mut query = query(l_shaped_nav_mesh());
        let start = nearest(&query, Vec3::new(-4.0, 0.0, 4.0));
        let end = nearest(&query, Vec3::new(4.0, 0.0, -4.0));
        let full = query
            .find_path(start.poly_ref, end.poly_ref, start.point, end.point, &QueryFilter::default(), 2048)
            .unwrap();
        if full.polygons.len() < 2 {
            return;
        }
        let cut = query
            .find_path(start.poly_ref, end.poly_ref, start.point, end.point, &QueryFilter::default(), 1)
            .unwrap();
        assert!(cut.truncated);
        assert_eq!(cut.polygons, vec![start.poly_ref]);
    }

    #[test]
    fn straight_path_goes_around_the_corner() {
        let mut query = query(l_shaped_nav_mesh());
        let start_pos = Vec3::new(-4.0, 0.0, 4.0);
        let end_pos = Vec3::new(4.0, 0.0, -4.0);
        let start = nearest(&query, start_pos);
        let end = nearest(&query, end_pos);
        let corridor = query
            .find_path(start.poly_ref, end.poly_ref, start_pos, end_pos, &QueryFilter::default(), 2048)
            .unwrap();
        let straight = query
            .find_straight_path(start_pos, end_pos, &corridor.polygons, 2048)
            .unwrap();

        assert!(!straight.partial);
        assert!(!straight.truncated);
        let first = straight.points.first().unwrap();
        let last = straight.points.last().unwrap();
        assert_eq!(first.flags, StraightPathFlags::START);
        assert_eq!(last.flags, StraightPathFlags::END);
        assert_eq!(last.polygon, None);
        assert_relative_eq!(first.position.x, start_pos.x, epsilon = 0.5);
        assert_relative_eq!(last.position.z, end_pos.z, epsilon = 0.5);
        // The direct line crosses the missing quadrant, so there is at least one corner.
        assert!(straight.points.len() >= 3, "{:?}", straight.points);
    }

    #[test]
    fn straight_path_respects_max_points() {
        let mut query = query(l_shaped_nav_mesh());
        let start_pos = Vec3::new(-4.0, 0.0, 4.0);
        let end_pos = Vec3::new(4.0, 0.0, -4.0);
        let start = nearest(&query, start_pos);
        let end = nearest(&query, end_pos);
        let corridor = query
            .find_path(start.poly_ref, end.poly_ref, start_pos, end_pos, &QueryFilter::default(), 2048)
            .unwrap();
        let straight = query
            .find_straight_path(start_pos, end_pos, &corridor.polygons, 2)
            .unwrap();
        assert_eq!(straight.points.len(), 2);
        assert!(straight.truncated);
    }

    #[test]
    fn straight_path_rejects_bad_input() {
        let query = query(flat_nav_mesh());
        assert_eq!(
            query.find_straight_path(Vec3::ZERO, Vec3::ONE, &[], 16),
            Err(QueryError::EmptyPath)
        );
        let foreign = PolyRef::encode(9, 0, 0).unwrap();
        assert_eq!(
            query.find_straight_path(Vec3::ZERO, Vec3::ONE, &[foreign], 16),
            Err(QueryError::InvalidPolyRef { poly_ref: foreign })
        );
    }

    #[test]
    fn poly_height_is_reported_inside_only() {
        let query = query(flat_nav_mesh());
        let found = nearest(&query, Vec3::ZERO);
        let height = query.get_poly_height(found.poly_ref, found.point).unwrap();
        assert!(height.is_some());
        assert_eq!(
            query
                .get_poly_height(found.poly_ref, Vec3::new(100.0, 0.0, 100.0))
                .unwrap(),
            None
        );
    }
}
