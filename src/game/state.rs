//! Authoritative round state: bots, bullets and intents

use std::collections::BTreeMap;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::ws::protocol::{BotState, BulletState, InitialPosition, Intent};

use super::combat::{Bullet, BulletId, CombatSystem};
use super::math::{clamp_magnitude, normalize_absolute_degrees, Bounds, Point};
use super::physics::{
    BOT_RADIUS, INITIAL_BOT_ENERGY, INITIAL_GUN_HEAT, MAX_BACKWARD_SPEED, MAX_FORWARD_SPEED,
    MAX_GUN_TURN_RATE, MAX_RADAR_TURN_RATE, MAX_TURN_RATE,
};
use super::setup::GameSetup;

/// Participant id, unique per server and never reused
pub type ParticipantId = u32;

/// Spawn attempts before accepting an overlapping position
const SPAWN_ATTEMPTS: usize = 100;

/// Sticky control values of one bot
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BotIntent {
    pub turn_rate: f64,
    pub gun_turn_rate: f64,
    pub radar_turn_rate: f64,
    pub target_speed: f64,
    /// Zero means "do not fire"
    pub firepower: f64,
    pub adjust_gun_for_body_turn: bool,
    pub adjust_radar_for_gun_turn: bool,
}

impl BotIntent {
    /// Overwrite the fields present in `msg`, clamped to their limits
    pub fn merge(&mut self, msg: &Intent) {
        if let Some(v) = msg.turn_rate {
            self.turn_rate = clamp_magnitude(v, MAX_TURN_RATE);
        }
        if let Some(v) = msg.gun_turn_rate {
            self.gun_turn_rate = clamp_magnitude(v, MAX_GUN_TURN_RATE);
        }
        if let Some(v) = msg.radar_turn_rate {
            self.radar_turn_rate = clamp_magnitude(v, MAX_RADAR_TURN_RATE);
        }
        if let Some(v) = msg.target_speed {
            self.target_speed = v.clamp(MAX_BACKWARD_SPEED, MAX_FORWARD_SPEED);
        }
        if let Some(v) = msg.firepower {
            self.firepower = CombatSystem::clamp_firepower(v);
        }
        if let Some(v) = msg.adjust_gun_for_body_turn {
            self.adjust_gun_for_body_turn = v;
        }
        if let Some(v) = msg.adjust_radar_for_gun_turn {
            self.adjust_radar_for_gun_turn = v;
        }
    }

    pub fn firepower(&self) -> Option<f64> {
        (self.firepower > 0.0).then_some(self.firepower)
    }
}

/// Damage bookkeeping used for scoring
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DamageTally {
    /// Bullet damage dealt, per victim
    pub bullet_damage: BTreeMap<ParticipantId, f64>,
    /// Ram damage dealt, per victim
    pub ram_damage: BTreeMap<ParticipantId, f64>,
    pub bullet_kills: Vec<ParticipantId>,
    pub ram_kills: Vec<ParticipantId>,
}

/// Bot state in a round (authoritative)
#[derive(Debug, Clone, PartialEq)]
pub struct Bot {
    pub id: ParticipantId,
    pub position: Point,
    pub direction: f64,
    pub gun_direction: f64,
    pub radar_direction: f64,
    pub radar_sweep: f64,
    pub speed: f64,
    pub energy: f64,
    pub gun_heat: f64,
    pub alive: bool,
    /// Turns in a row without dealing or taking damage
    pub inactivity_turns: u32,
    /// Turn in which the bot died
    pub death_turn: Option<u32>,
    pub tally: DamageTally,
}

impl Bot {
    pub fn new(id: ParticipantId, position: Point, direction: f64) -> Self {
        let direction = normalize_absolute_degrees(direction);
        Self {
            id,
            position,
            direction,
            gun_direction: direction,
            radar_direction: direction,
            radar_sweep: 0.0,
            speed: 0.0,
            energy: INITIAL_BOT_ENERGY,
            gun_heat: INITIAL_GUN_HEAT,
            alive: true,
            inactivity_turns: 0,
            death_turn: None,
            tally: DamageTally::default(),
        }
    }

    /// Alive but out of energy: cannot turn, move or fire
    pub fn is_disabled(&self) -> bool {
        self.alive && self.energy <= 0.0
    }

    pub fn kill(&mut self, turn_number: u32) {
        self.alive = false;
        self.energy = 0.0;
        self.speed = 0.0;
        self.death_turn = Some(turn_number);
    }

    pub fn to_state(&self) -> BotState {
        BotState {
            id: self.id,
            energy: self.energy,
            x: self.position.x,
            y: self.position.y,
            direction: self.direction,
            gun_direction: self.gun_direction,
            radar_direction: self.radar_direction,
            radar_sweep: self.radar_sweep,
            speed: self.speed,
            gun_heat: self.gun_heat,
            alive: self.alive,
        }
    }
}

/// A bot entering a round
#[derive(Debug, Clone, Copy)]
pub struct Entrant {
    pub id: ParticipantId,
    pub initial_position: Option<InitialPosition>,
}

/// One round of a match. Owned by the match orchestrator.
#[derive(Debug, Clone)]
pub struct Round {
    pub round_number: u32,
    pub turn_number: u32,
    pub arena_width: f64,
    pub arena_height: f64,
    pub bots: BTreeMap<ParticipantId, Bot>,
    /// In-flight bullets, in creation order
    pub bullets: Vec<Bullet>,
    next_bullet_id: BulletId,
}

impl Round {
    /// Create a round with freshly spawned bots
    pub fn new(
        round_number: u32,
        setup: &GameSetup,
        entrants: &[Entrant],
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let arena_width = setup.arena_width as f64;
        let arena_height = setup.arena_height as f64;
        let bounds = Bounds::for_arena(arena_width, arena_height, BOT_RADIUS);

        let mut sorted = entrants.to_vec();
        sorted.sort_by_key(|e| e.id);

        let mut bots: BTreeMap<ParticipantId, Bot> = BTreeMap::new();
        for entrant in sorted {
            let occupied: Vec<Point> = bots.values().map(|b| b.position).collect();
            let (position, direction) =
                spawn_point(&bounds, entrant.initial_position, &occupied, rng);
            bots.insert(entrant.id, Bot::new(entrant.id, position, direction));
        }

        Self {
            round_number,
            turn_number: 0,
            arena_width,
            arena_height,
            bots,
            bullets: Vec::new(),
            next_bullet_id: 1,
        }
    }

    /// Bounds for bot centres
    pub fn bot_bounds(&self) -> Bounds {
        Bounds::for_arena(self.arena_width, self.arena_height, BOT_RADIUS)
    }

    /// Bounds for bullets (the arena itself)
    pub fn arena_bounds(&self) -> Bounds {
        Bounds::for_arena(self.arena_width, self.arena_height, 0.0)
    }

    pub fn next_bullet_id(&mut self) -> BulletId {
        let id = self.next_bullet_id;
        self.next_bullet_id += 1;
        id
    }

    pub fn alive_ids(&self) -> Vec<ParticipantId> {
        self.bots.values().filter(|b| b.alive).map(|b| b.id).collect()
    }

    pub fn bullet_states(&self) -> Vec<BulletState> {
        self.bullets.iter().map(Bullet::to_state).collect()
    }
}

/// Pick a spawn point and direction.
///
/// Requested coordinates are used when given and clamped into the arena;
/// missing ones are drawn from the round RNG.
fn spawn_point(
    bounds: &Bounds,
    requested: Option<InitialPosition>,
    occupied: &[Point],
    rng: &mut ChaCha8Rng,
) -> (Point, f64) {
    let requested = requested.unwrap_or(InitialPosition {
        x: None,
        y: None,
        direction: None,
    });

    let mut position = Point::default();
    for _ in 0..SPAWN_ATTEMPTS {
        let x = requested
            .x
            .unwrap_or_else(|| rng.gen_range(bounds.min_x..=bounds.max_x));
        let y = requested
            .y
            .unwrap_or_else(|| rng.gen_range(bounds.min_y..=bounds.max_y));
        position = bounds.clamp(Point::new(x, y)).0;

        let clear = occupied
            .iter()
            .all(|other| other.distance(position) >= 2.0 * BOT_RADIUS);
        if clear || (requested.x.is_some() && requested.y.is_some()) {
            break;
        }
    }

    let direction = requested
        .direction
        .unwrap_or_else(|| rng.gen_range(0.0..360.0));
    (position, normalize_absolute_degrees(direction))
}
