//! Forward and inverse kinematics of a planar two-link arm with its base at
//! the origin.

pub const LINK_1: f64 = 0.5;
pub const LINK_2: f64 = 0.4;

const MIN_REACH: f64 = (LINK_1 - LINK_2) + 1e-3;
const MAX_REACH: f64 = (LINK_1 + LINK_2) - 1e-3;

/// The elbow and end effector positions for the given joint angles.
pub fn forward(joints: (f64, f64)) -> ((f64, f64), (f64, f64)) {
    let (q1, q2) = joints;
    let elbow = (LINK_1 * q1.cos(), LINK_1 * q1.sin());
    let effector = (
        elbow.0 + LINK_2 * (q1 + q2).cos(),
        elbow.1 + LINK_2 * (q1 + q2).sin(),
    );
    (elbow, effector)
}

/// Joint angles that put the end effector at `target`.
///
/// Targets out of reach are pulled onto the reachable annulus. The elbow
/// keeps the bend direction of `current` so the arm does not flip.
pub fn inverse(
    target: (f64, f64),
    current: (f64, f64),
) -> (f64, f64) {
    let (mut x, mut y) = target;
    let dist = x.hypot(y);
    if dist < 1e-9 {
        x = MIN_REACH;
        y = 0.0;
    } else if !(MIN_REACH..=MAX_REACH).contains(&dist) {
        let scale = dist.clamp(MIN_REACH, MAX_REACH) / dist;
        x *= scale;
        y *= scale;
    }

    let cos_q2 = ((x * x + y * y - LINK_1 * LINK_1 - LINK_2 * LINK_2) / (2.0 * LINK_1 * LINK_2))
        .clamp(-1.0, 1.0);
    let q2 = if current.1 < 0.0 { -cos_q2.acos() } else { cos_q2.acos() };
    let q1 = y.atan2(x) - (LINK_2 * q2.sin()).atan2(LINK_1 + LINK_2 * q2.cos());
    (q1, q2)
}
