//! Walkable paths across a [`NavigationMesh`].

use glam::Vec3;
use rayne_detour::{NavMeshQuery, QueryFilter};

use crate::NavigationMesh;

/// The number of search nodes and the longest corridor and waypoint list a [`Path`] handles.
pub const MAX_PATH_NODES: usize = 2048;

/// A sequence of waypoints from a start to a target, consumed one waypoint at a time.
///
/// ```no_run
/// # use glam::Vec3;
/// # use rayne_navigation::{NavigationMesh, Path};
/// # fn steer_towards(_: Vec3) {}
/// # fn walk(mesh: &NavigationMesh, position: Vec3) {
/// let mut path = Path::new(mesh);
/// if path.find_path(position, Vec3::new(4.0, 0.0, 4.0)) {
///     while let Some(waypoint) = path.closest_point() {
///         steer_towards(waypoint);
///         path.pop_point();
///     }
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct Path {
    /// The half extents of the box searched for the polygons nearest to the start and target.
    pub tolerance: Vec3,
    /// The polygons that may be walked on
    pub filter: QueryFilter,
    query: Option<NavMeshQuery>,
    /// The waypoints from the target back to the next one.
    points: Vec<Vec3>,
}

impl Path {
    /// Creates an empty path over the runtime mesh of `mesh`.
    ///
    /// If `mesh` has no runtime mesh, every [`Path::find_path`] fails.
    pub fn new(mesh: &NavigationMesh) -> Self {
        let query = mesh.nav_mesh().and_then(|nav_mesh| {
            NavMeshQuery::new(nav_mesh.clone(), MAX_PATH_NODES)
                .inspect_err(|error| tracing::error!("Failed to create a path query: {error}"))
                .ok()
        });
        Self {
            tolerance: Vec3::splat(4.0),
            filter: QueryFilter::default(),
            query,
            points: Vec::new(),
        }
    }

    /// Searches a path from `start` to `target`.
    ///
    /// Both points are snapped to the nearest polygon within [`Path::tolerance`]. If the target cannot be
    /// reached, the path leads as close to it as possible. Returns `false` and keeps the previous waypoints
    /// if either point is off the mesh or no path could be found.
    pub fn find_path(&mut self, start: Vec3, target: Vec3) -> bool {
        let Some(query) = self.query.as_mut() else {
            return false;
        };
        let Some(start_poly) = query.find_nearest_poly(start, self.tolerance, &self.filter) else {
            return false;
        };
        let Some(target_poly) = query.find_nearest_poly(target, self.tolerance, &self.filter) else {
            return false;
        };

        let corridor = match query.find_path(
            start_poly.poly_ref,
            target_poly.poly_ref,
            start,
            target,
            &self.filter,
            MAX_PATH_NODES,
        ) {
            Ok(corridor) => corridor,
            Err(error) => {
                tracing::debug!("Path search failed: {error}");
                return false;
            }
        };
        if corridor.polygons.is_empty() {
            return false;
        }

        let straight =
            match query.find_straight_path(start, target, &corridor.polygons, MAX_PATH_NODES) {
                Ok(straight) => straight,
                Err(error) => {
                    tracing::debug!("Straightening the path failed: {error}");
                    return false;
                }
            };
        self.points = straight
            .points
            .iter()
            .rev()
            .map(|point| point.position)
            .collect();
        true
    }

    /// The next waypoint, or `None` once the path is used up.
    #[inline]
    pub fn closest_point(&self) -> Option<Vec3> {
        self.points.last().copied()
    }

    /// Removes the next waypoint.
    #[inline]
    pub fn pop_point(&mut self) -> Option<Vec3> {
        self.points.pop()
    }

    /// Returns `true` if no waypoints are left.
    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.points.is_empty()
    }

    /// The remaining waypoints, from the target back to the next one.
    #[inline]
    pub fn points(&self) -> &[Vec3] {
        &self.points
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{IndexedMesh, NullLog};

    fn floor() -> NavigationMesh {
        let mut mesh = NavigationMesh::default();
        let model = IndexedMesh {
            positions: vec![
                Vec3::new(-5.0, 0.0, -5.0),
                Vec3::new(-5.0, 0.0, 5.0),
                Vec3::new(5.0, 0.0, 5.0),
                Vec3::new(5.0, 0.0, -5.0),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        };
        mesh.generate_from_model(&model, &NullLog).unwrap();
        mesh
    }

    #[test]
    fn waypoints_are_stored_target_first() {
        let mesh = floor();
        let mut path = Path::new(&mesh);
        let (start, target) = (Vec3::new(-3.0, 0.0, -3.0), Vec3::new(3.0, 0.0, 3.0));
        assert!(path.find_path(start, target));

        let next = path.closest_point().unwrap();
        assert_relative_eq!(next.x, start.x, epsilon = 1e-3);
        assert_relative_eq!(next.z, start.z, epsilon = 1e-3);
        let last = path.points()[0];
        assert_relative_eq!(last.x, target.x, epsilon = 1e-3);
        assert_relative_eq!(last.z, target.z, epsilon = 1e-3);
    }

    #[test]
    fn popping_consumes_the_path() {
        let mesh = floor();
        let mut path = Path::new(&mesh);
        assert!(path.is_at_end());
        assert!(path.find_path(Vec3::new(-3.0, 0.0, 0.0), Vec3::new(3.0, 0.0, 0.0)));

        let mut remaining = path.points().len();
        assert!(remaining >= 2);
        while !path.is_at_end() {
            assert!(path.pop_point().is_some());
            remaining -= 1;
            assert_eq!(path.points().len(), remaining);
        }
        assert_eq!(path.closest_point(), None);
        assert_eq!(path.pop_point(), None);
    }

    #[test]
    fn failed_search_keeps_the_previous_path() {
        let mesh = floor();
        let mut path = Path::new(&mesh);
        assert!(path.find_path(Vec3::new(-3.0, 0.0, 0.0), Vec3::new(3.0, 0.0, 0.0)));
        let before = path.points().to_vec();

        assert!(!path.find_path(Vec3::new(-3.0, 0.0, 0.0), Vec3::new(100.0, 0.0, 0.0)));
        assert_eq!(path.points(), before.as_slice());
    }

    #[test]
    fn unbuilt_mesh_fails_gracefully() {
        let mesh = NavigationMesh::default();
        let mut path = Path::new(&mesh);
        assert!(!path.find_path(Vec3::ZERO, Vec3::ONE));
        assert!(path.is_at_end());
    }
}
