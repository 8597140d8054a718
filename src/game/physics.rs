//! Tank movement and turning rules

use super::math::{clamp_magnitude, normalize_absolute_degrees, Bounds, Point};

/// Maximum body turn rate (degrees per turn) for a standing bot
pub const MAX_TURN_RATE: f64 = 10.0;
/// Maximum gun turn rate relative to the body
pub const MAX_GUN_TURN_RATE: f64 = 20.0;
/// Maximum radar turn rate relative to the gun
pub const MAX_RADAR_TURN_RATE: f64 = 45.0;
pub const MAX_FORWARD_SPEED: f64 = 8.0;
pub const MAX_BACKWARD_SPEED: f64 = -8.0;
/// Speed gained per turn when speeding up
pub const ACCELERATION: f64 = 1.0;
/// Speed lost per turn when braking
pub const DECELERATION: f64 = 2.0;
/// Radius of the bot hit circle
pub const BOT_RADIUS: f64 = 18.0;
/// Range of the radar scan arc
pub const RADAR_RADIUS: f64 = 1200.0;
/// Damage both bots take when they collide
pub const RAM_DAMAGE: f64 = 0.6;
pub const INITIAL_BOT_ENERGY: f64 = 100.0;
pub const INITIAL_GUN_HEAT: f64 = 3.0;
/// Hard cap on turns per round
pub const MAX_TURNS_PER_ROUND: u32 = 10_000;

/// Body turn rate limit for the given speed: `10 - 0.75 * |speed|`
pub fn max_turn_rate(speed: f64) -> f64 {
    MAX_TURN_RATE - 0.75 * speed.abs()
}

/// Damage from hitting a wall at `speed`
pub fn wall_damage(speed: f64) -> f64 {
    (speed.abs() * 0.5 - 1.0).max(0.0)
}

/// How much each part of the tank turns this tick, in world frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TurnDeltas {
    pub body: f64,
    pub gun: f64,
    pub radar: f64,
}

/// Movement result for one bot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveResult {
    pub position: Point,
    pub speed: f64,
    /// Speed at the moment of wall contact, if the bot hit a wall
    pub wall_hit_speed: Option<f64>,
}

/// Physics system for tank rotation and movement
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Resolve requested turn rates into world-frame deltas.
    ///
    /// The gun sits on the body and the radar on the gun. Unless the adjust
    /// flag is set, a child also turns by its parent's world-frame turn.
    pub fn turn_deltas(
        speed: f64,
        turn_rate: f64,
        gun_turn_rate: f64,
        radar_turn_rate: f64,
        adjust_gun_for_body_turn: bool,
        adjust_radar_for_gun_turn: bool,
    ) -> TurnDeltas {
        let body = clamp_magnitude(turn_rate, max_turn_rate(speed));

        let mut gun = clamp_magnitude(gun_turn_rate, MAX_GUN_TURN_RATE);
        if !adjust_gun_for_body_turn {
            gun += body;
        }

        let mut radar = clamp_magnitude(radar_turn_rate, MAX_RADAR_TURN_RATE);
        if !adjust_radar_for_gun_turn {
            radar += gun;
        }

        TurnDeltas { body, gun, radar }
    }

    /// Apply a delta to a direction, keeping it in [0, 360)
    pub fn rotate(direction: f64, delta: f64) -> f64 {
        normalize_absolute_degrees(direction + delta)
    }

    /// New speed after one turn of accelerating/braking toward `target`
    pub fn next_speed(speed: f64, target: f64) -> f64 {
        let target = target.clamp(MAX_BACKWARD_SPEED, MAX_FORWARD_SPEED);
        let delta = target - speed;

        // Moving away from zero accelerates, moving toward zero brakes.
        let step = if speed > 0.0 || (speed == 0.0 && delta >= 0.0) {
            if delta >= 0.0 {
                delta.min(ACCELERATION)
            } else {
                delta.max(-DECELERATION)
            }
        } else if delta <= 0.0 {
            delta.max(-ACCELERATION)
        } else {
            delta.min(DECELERATION)
        };

        (speed + step).clamp(MAX_BACKWARD_SPEED, MAX_FORWARD_SPEED)
    }

    /// Move a bot one turn and keep it inside the arena
    pub fn move_bot(
        position: Point,
        direction: f64,
        speed: f64,
        target_speed: f64,
        bounds: &Bounds,
    ) -> MoveResult {
        let speed = Self::next_speed(speed, target_speed);
        let (position, clamped) = bounds.clamp(position.advance(direction, speed));

        if clamped {
            MoveResult {
                position,
                speed: 0.0,
                wall_hit_speed: Some(speed),
            }
        } else {
            MoveResult {
                position,
                speed,
                wall_hit_speed: None,
            }
        }
    }

    /// Positions that separate two overlapping bots to exactly touching.
    ///
    /// `a` must be the bot with the lower participant id. When the centres
    /// coincide, `a` is pushed toward -x and `b` toward +x.
    pub fn separate(a: Point, b: Point) -> (Point, Point) {
        let min_distance = 2.0 * BOT_RADIUS;
        let dist = a.distance(b);

        let (nx, ny) = if dist < 1e-9 {
            (1.0, 0.0)
        } else {
            ((b.x - a.x) / dist, (b.y - a.y) / dist)
        };

        let push = (min_distance - dist).max(0.0) / 2.0;
        (
            Point::new(a.x - nx * push, a.y - ny * push),
            Point::new(b.x + nx * push, b.y + ny * push),
        )
    }

    /// Push `mover` out of a static obstacle at `fixed`
    pub fn push_out(mover: Point, fixed: Point) -> Point {
        let min_distance = 2.0 * BOT_RADIUS;
        let dist = fixed.distance(mover);
        let (nx, ny) = if dist < 1e-9 {
            (1.0, 0.0)
        } else {
            ((mover.x - fixed.x) / dist, (mover.y - fixed.y) / dist)
        };
        Point::new(fixed.x + nx * min_distance, fixed.y + ny * min_distance)
    }
}
