//! Geometry primitives used by the turn engine
//!
//! Directions are in degrees, 0 pointing along +x and increasing
//! counter-clockwise.

use serde::{Deserialize, Serialize};

/// A position in arena coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f64 {
        self.distance_sq(other).sqrt()
    }

    pub fn distance_sq(self, other: Point) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        dx * dx + dy * dy
    }

    /// Move `distance` units along `direction` (degrees)
    pub fn advance(self, direction: f64, distance: f64) -> Point {
        let rad = direction.to_radians();
        Point::new(self.x + rad.cos() * distance, self.y + rad.sin() * distance)
    }

    /// Absolute direction (degrees) from this point towards `other`
    pub fn direction_to(self, other: Point) -> f64 {
        normalize_absolute_degrees((other.y - self.y).atan2(other.x - self.x).to_degrees())
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Wrap an angle into [0, 360)
pub fn normalize_absolute_degrees(angle: f64) -> f64 {
    let a = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if a >= 360.0 {
        0.0
    } else {
        a
    }
}

/// Clamp `value` into `[-limit, limit]`, keeping its sign
pub fn clamp_magnitude(value: f64, limit: f64) -> f64 {
    let limit = limit.max(0.0);
    value.clamp(-limit, limit)
}

/// Whether two circles overlap (touching does not count)
pub fn circles_overlap(a: Point, ra: f64, b: Point, rb: f64) -> bool {
    let r = ra + rb;
    a.distance_sq(b) < r * r
}

/// Whether segments `p1-p2` and `q1-q2` intersect (endpoints included)
pub fn segments_intersect(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    fn cross(o: Point, a: Point, b: Point) -> f64 {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    }

    fn on_segment(a: Point, b: Point, p: Point) -> bool {
        p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
    }

    let d1 = cross(q1, q2, p1);
    let d2 = cross(q1, q2, p2);
    let d3 = cross(p1, p2, q1);
    let d4 = cross(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

/// Swept test of segment `start-end` against a circle.
///
/// Returns the fraction along the segment (0..=1) of the first contact, or
/// `None` when the segment never enters the circle.
pub fn segment_circle_hit(start: Point, end: Point, center: Point, radius: f64) -> Option<f64> {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let fx = start.x - center.x;
    let fy = start.y - center.y;

    let c = fx * fx + fy * fy - radius * radius;
    if c <= 0.0 {
        return Some(0.0);
    }

    let a = dx * dx + dy * dy;
    if a == 0.0 {
        return None;
    }

    let b = 2.0 * (fx * dx + fy * dy);
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return None;
    }

    let t = (-b - discriminant.sqrt()) / (2.0 * a);
    (0.0..=1.0).contains(&t).then_some(t)
}

/// Whether `angle` lies on the arc swept from `start` by `sweep` degrees.
///
/// A positive sweep goes counter-clockwise. A sweep of 360 or more covers the
/// full circle.
pub fn angle_in_sweep(start: f64, sweep: f64, angle: f64) -> bool {
    if sweep.abs() >= 360.0 {
        return true;
    }
    let offset = normalize_absolute_degrees(angle - start);
    if sweep >= 0.0 {
        offset <= sweep
    } else {
        offset == 0.0 || offset >= 360.0 + sweep
    }
}

/// Rectangle the centre of a circle of `radius` must stay within
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn for_arena(width: f64, height: f64, radius: f64) -> Self {
        Self {
            min_x: radius,
            min_y: radius,
            max_x: (width - radius).max(radius),
            max_y: (height - radius).max(radius),
        }
    }

    /// Clamp a point into the bounds. Returns the clamped point and whether
    /// clamping happened.
    pub fn clamp(&self, p: Point) -> (Point, bool) {
        let x = p.x.clamp(self.min_x, self.max_x);
        let y = p.y.clamp(self.min_y, self.max_y);
        (Point::new(x, y), x != p.x || y != p.y)
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }
}
