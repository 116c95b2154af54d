use glam::{Mat4, Vec3};
use super::*;

fn camera_frustum(far: f32) -> Frustum {
    let projection = Mat4::perspective_rh(
        std::f32::consts::FRAC_PI_2, // 90° FOV
        1.0,
        0.1,
        far,
    );
    let view = Mat4::look_at_rh(
        Vec3::new(0.0, 0.0, 5.0), // eye
        Vec3::ZERO,               // target
        Vec3::Y,                  // up
    );
    Frustum::from_view_projection(&(projection * view))
}

// ============================================================================
// Frustum::from_view_projection
// ============================================================================

#[test]
fn test_planes_are_normalized() {
    let ortho = Mat4::orthographic_rh(-10.0, 10.0, -10.0, 10.0, 0.1, 100.0);

    for frustum in [camera_frustum(100.0), Frustum::from_view_projection(&ortho)] {
        for plane in &frustum.planes {
            let normal_len = plane.truncate().length();
            assert!((normal_len - 1.0).abs() < 1e-4, "plane normal should be unit length");
        }
    }
}

// ============================================================================
// Frustum::intersects_sphere
// ============================================================================

#[test]
fn test_sphere_at_target_is_inside() {
    let frustum = camera_frustum(100.0);
    assert!(frustum.intersects_sphere(&BoundingSphere::new(Vec3::ZERO, 1.0)));
    assert!(frustum.contains_point(Vec3::ZERO));
}

#[test]
fn test_sphere_far_to_the_side_is_outside() {
    let frustum = camera_frustum(100.0);
    let sphere = BoundingSphere::new(Vec3::new(100.0, 0.0, 0.0), 1.0);
    assert!(!frustum.intersects_sphere(&sphere));
}

#[test]
fn test_sphere_behind_camera_is_outside() {
    let frustum = camera_frustum(100.0);
    let sphere = BoundingSphere::new(Vec3::new(0.0, 0.0, 12.0), 1.0);
    assert!(!frustum.intersects_sphere(&sphere));
}

#[test]
fn test_sphere_beyond_far_plane() {
    let frustum = camera_frustum(10.0);
    // Far plane sits at z = -5 in world space
    assert!(!frustum.intersects_sphere(&BoundingSphere::new(Vec3::new(0.0, 0.0, -20.0), 1.0)));
    // Large radius reaches back across the far plane
    assert!(frustum.intersects_sphere(&BoundingSphere::new(Vec3::new(0.0, 0.0, -20.0), 16.0)));
}

#[test]
fn test_sphere_straddling_side_plane() {
    let frustum = Frustum::from_view_projection(&Mat4::orthographic_rh(
        -5.0, 5.0,
        -5.0, 5.0,
        0.1, 100.0,
    ));

    // Center outside the right plane at x=5, radius reaching back in
    assert!(frustum.intersects_sphere(&BoundingSphere::new(Vec3::new(6.0, 0.0, -10.0), 2.0)));
    assert!(!frustum.intersects_sphere(&BoundingSphere::new(Vec3::new(8.0, 0.0, -10.0), 2.0)));
}
