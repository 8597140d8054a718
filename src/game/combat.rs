//! Combat system - firing, bullets, damage

use crate::ws::protocol::BulletState;

use super::math::Point;
use super::state::ParticipantId;

pub const MIN_FIREPOWER: f64 = 0.1;
pub const MAX_FIREPOWER: f64 = 3.0;

/// Gun heat below this is treated as fully cooled
const HEAT_EPSILON: f64 = 1e-9;

pub type BulletId = u32;

/// Bullet speed for a given firepower: `20 - 3 * firepower`
pub fn bullet_speed(firepower: f64) -> f64 {
    20.0 - 3.0 * firepower
}

/// Gun heat after firing: `1 + firepower / 5`
pub fn gun_heat(firepower: f64) -> f64 {
    1.0 + firepower / 5.0
}

/// Damage dealt by a bullet of the given power
pub fn bullet_damage(firepower: f64) -> f64 {
    let bonus = if firepower > 1.0 {
        2.0 * (firepower - 1.0)
    } else {
        0.0
    };
    4.0 * firepower + bonus
}

/// Energy returned to the shooter when a bullet hits a bot
pub fn bullet_hit_energy_bonus(firepower: f64) -> f64 {
    3.0 * firepower
}

/// In-flight projectile
#[derive(Debug, Clone, PartialEq)]
pub struct Bullet {
    pub bullet_id: BulletId,
    pub owner_id: ParticipantId,
    pub power: f64,
    pub x: f64,
    pub y: f64,
    pub direction: f64,
    pub speed: f64,
}

impl Bullet {
    pub fn new(
        bullet_id: BulletId,
        owner_id: ParticipantId,
        origin: Point,
        direction: f64,
        power: f64,
    ) -> Self {
        Self {
            bullet_id,
            owner_id,
            power,
            x: origin.x,
            y: origin.y,
            direction,
            speed: bullet_speed(power),
        }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Where the bullet will be after this tick
    pub fn next_position(&self) -> Point {
        self.position().advance(self.direction, self.speed)
    }

    pub fn damage(&self) -> f64 {
        bullet_damage(self.power)
    }

    pub fn to_state(&self) -> BulletState {
        BulletState {
            bullet_id: self.bullet_id,
            owner_id: self.owner_id,
            power: self.power,
            x: self.x,
            y: self.y,
            direction: self.direction,
            speed: self.speed,
        }
    }
}

/// Combat system for gun heat and firing
pub struct CombatSystem;

impl CombatSystem {
    /// Check if a gun can fire
    pub fn can_fire(heat: f64) -> bool {
        heat == 0.0
    }

    /// Cool the gun down by one tick
    pub fn cool_gun(heat: f64, cooling_rate: f64) -> f64 {
        let cooled = heat - cooling_rate;
        if cooled <= HEAT_EPSILON {
            0.0
        } else {
            cooled
        }
    }

    /// Clamp a requested firepower at intent time. Values above the maximum
    /// are reduced; values below the minimum mean "do not fire".
    pub fn clamp_firepower(firepower: f64) -> f64 {
        if firepower < MIN_FIREPOWER {
            0.0
        } else {
            firepower.min(MAX_FIREPOWER)
        }
    }

    /// Firepower actually used this tick, or `None` if the bot cannot fire
    pub fn effective_firepower(requested: Option<f64>, heat: f64, energy: f64) -> Option<f64> {
        let requested = requested?;
        if !Self::can_fire(heat) || requested < MIN_FIREPOWER || energy <= 0.0 {
            return None;
        }
        let power = requested.min(MAX_FIREPOWER).min(energy);
        (power >= MIN_FIREPOWER).then_some(power)
    }
}
