//! Geometry helpers on the xz-plane used by the mesh and the queries.

use glam::{Vec3, Vec3Swizzles as _};

/// Squared distance below which two points are considered equal.
const EQUAL_THRESHOLD_SQUARED: f32 = (1.0 / 16384.0) * (1.0 / 16384.0);

/// Twice the signed area of the triangle on the xz-plane.
#[inline]
pub(crate) fn tri_area_2d(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let ab = b - a;
    let ac = c - a;
    ac.x * ab.z - ab.x * ac.z
}

#[inline]
pub(crate) fn vequal(a: Vec3, b: Vec3) -> bool {
    a.distance_squared(b) < EQUAL_THRESHOLD_SQUARED
}

/// Squared xz distance from `point` to the segment `p -> q`, and the parameter of the closest point on it.
pub(crate) fn distance_pt_seg_sqr_2d(point: Vec3, p: Vec3, q: Vec3) -> (f32, f32) {
    let pq = q.xz() - p.xz();
    let d = pq.length_squared();
    let mut t = pq.dot(point.xz() - p.xz());
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    ((p.xz() + pq * t - point.xz()).length_squared(), t)
}

/// Even-odd test on the xz-plane.
pub(crate) fn point_in_polygon(point: Vec3, vertices: &[Vec3]) -> bool {
    let n = vertices.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let vi = vertices[i];
        let vj = vertices[j];
        if (vi.z > point.z) != (vj.z > point.z)
            && point.x < (vj.x - vi.x) * (point.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Like [`point_in_polygon`], but also fills the squared distance and segment parameter
/// from `point` to every edge. Edge `i` runs from vertex `i` to vertex `i + 1`.
pub(crate) fn distance_pt_poly_edges_sqr(
    point: Vec3,
    vertices: &[Vec3],
    edge_distances: &mut [f32],
    edge_parameters: &mut [f32],
) -> bool {
    let n = vertices.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let vi = vertices[i];
        let vj = vertices[j];
        if (vi.z > point.z) != (vj.z > point.z)
            && point.x < (vj.x - vi.x) * (point.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        (edge_distances[j], edge_parameters[j]) = distance_pt_seg_sqr_2d(point, vj, vi);
        j = i;
    }
    inside
}

/// Height of the triangle at the xz position of `point`, if the point lies above or below it.
pub(crate) fn closest_height_point_triangle(point: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    const EPS: f32 = 1e-6;
    let v0 = c - a;
    let v1 = b - a;
    let v2 = point - a;

    // Compute scaled barycentric coordinates
    let mut denom = v0.x * v1.z - v0.z * v1.x;
    if denom.abs() < EPS {
        return None;
    }
    let mut u = v1.z * v2.x - v1.x * v2.z;
    let mut v = v0.x * v2.z - v0.z * v2.x;
    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }

    // If point lies inside the triangle, return interpolated y-coord.
    (u >= 0.0 && v >= 0.0 && (u + v) <= denom).then(|| a.y + (v0.y * u + v1.y * v) / denom)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn square() -> [Vec3; 4] {
        [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 2.0),
            Vec3::new(2.0, 0.0, 2.0),
            Vec3::new(2.0, 0.0, 0.0),
        ]
    }

    #[test]
    fn points_are_classified_against_the_square() {
        assert!(point_in_polygon(Vec3::new(1.0, 5.0, 1.0), &square()));
        assert!(!point_in_polygon(Vec3::new(3.0, 0.0, 1.0), &square()));
    }

    #[test]
    fn edge_distances_follow_vertex_order() {
        let mut distances = [0.0; 4];
        let mut parameters = [0.0; 4];
        let inside = distance_pt_poly_edges_sqr(
            Vec3::new(-1.0, 0.0, 1.0),
            &square(),
            &mut distances,
            &mut parameters,
        );
        assert!(!inside);
        // Edge 0 is the x = 0 side.
        assert_relative_eq!(distances[0], 1.0);
        assert_relative_eq!(parameters[0], 0.5);
        assert_relative_eq!(distances[2], 9.0);
    }

    #[test]
    fn triangle_height_is_interpolated() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(0.0, 2.0, 2.0);
        let c = Vec3::new(2.0, 0.0, 0.0);
        let h = closest_height_point_triangle(Vec3::new(0.5, 10.0, 1.0), a, b, c).unwrap();
        assert_relative_eq!(h, 1.0);
        assert_eq!(
            closest_height_point_triangle(Vec3::new(3.0, 0.0, 3.0), a, b, c),
            None
        );
    }

    #[test]
    fn triangle_area_sign_matches_winding() {
        let a = Vec3::ZERO;
        let b = Vec3::new(0.0, 0.0, 1.0);
        assert!(tri_area_2d(a, b, Vec3::new(1.0, 0.0, 0.0)) > 0.0);
        assert!(tri_area_2d(a, b, Vec3::new(-1.0, 0.0, 0.0)) < 0.0);
    }
}
