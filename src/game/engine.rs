//! Turn engine: resolves one turn of intents into a new round state
//!
//! Resolution order within a turn is fixed: rotation, movement, radar
//! scan, firing, bullet flight (bullet/bullet, bullet/bot, bullet/wall),
//! bot collisions, damage, inactivity, then round termination. Bots are
//! visited in participant id order and bullets in creation order, so the
//! same round and intents always produce the same result.

use std::collections::{BTreeMap, BTreeSet};

use crate::ws::protocol::{DeathCause, GameEvent};

use super::combat::{bullet_hit_energy_bonus, gun_heat, Bullet, CombatSystem};
use super::math::{angle_in_sweep, circles_overlap, segment_circle_hit, segments_intersect, Point};
use super::physics::{wall_damage, PhysicsSystem, BOT_RADIUS, MAX_TURNS_PER_ROUND, RADAR_RADIUS, RAM_DAMAGE};
use super::setup::GameSetup;
use super::state::{BotIntent, ParticipantId, Round};

/// Internal invariant violations. These abort the round.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("bot {bot_id} violated invariant: {reason}")]
    InvariantViolated {
        bot_id: ParticipantId,
        reason: &'static str,
    },

    #[error("no round is in progress")]
    NoActiveRound,
}

/// Result of resolving one turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutput {
    pub turn_number: u32,
    pub events: Vec<GameEvent>,
    pub round_over: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DamageKind {
    Bullet,
    Ram,
    Wall,
}

#[derive(Debug, Clone, Copy)]
struct Damage {
    attacker: Option<ParticipantId>,
    amount: f64,
    kind: DamageKind,
}

/// Damage collected during a turn, applied in one pass at the end
#[derive(Debug, Default)]
struct DamageLedger {
    entries: BTreeMap<ParticipantId, Vec<Damage>>,
    /// Energy returned to shooters for hits
    bonuses: BTreeMap<ParticipantId, f64>,
}

impl DamageLedger {
    fn add(&mut self, victim: ParticipantId, attacker: Option<ParticipantId>, amount: f64, kind: DamageKind) {
        self.entries.entry(victim).or_default().push(Damage {
            attacker,
            amount,
            kind,
        });
    }

    fn pending(&self, victim: ParticipantId) -> f64 {
        self.entries
            .get(&victim)
            .map(|d| d.iter().map(|e| e.amount).sum())
            .unwrap_or(0.0)
    }

    fn bonus(&mut self, shooter: ParticipantId, amount: f64) {
        *self.bonuses.entry(shooter).or_insert(0.0) += amount;
    }
}

/// Resolves turns of a round
pub struct TurnEngine;

impl TurnEngine {
    /// Advance `round` by one turn using each live bot's intent.
    ///
    /// Bots without an entry in `intents` act on the default intent.
    pub fn resolve(
        round: &mut Round,
        setup: &GameSetup,
        intents: &BTreeMap<ParticipantId, BotIntent>,
    ) -> Result<TurnOutput, SimulationError> {
        round.turn_number += 1;
        let turn_number = round.turn_number;
        let mut events = Vec::new();
        let mut ledger = DamageLedger::default();

        let old_radar = Self::move_bots(round, intents, turn_number, &mut ledger, &mut events);
        Self::scan(round, &old_radar, turn_number, &mut events);
        let fired = Self::fire_guns(round, setup, intents, turn_number, &mut events);
        Self::move_bullets(round, setup, turn_number, &mut ledger, &mut events);
        round.bullets.extend(fired);
        Self::collide_bots(round, setup, turn_number, &mut ledger, &mut events);

        let active = Self::apply_damage(round, &ledger, turn_number, &mut events);
        Self::check_inactivity(round, setup, &active, turn_number, &mut events);
        Self::check_invariants(round)?;

        let alive = round.alive_ids();
        let round_over = alive.len() <= 1 || turn_number >= MAX_TURNS_PER_ROUND;
        if round_over && alive.len() == 1 {
            events.push(GameEvent::WonRound {
                turn_number,
                bot_id: alive[0],
            });
        }

        Ok(TurnOutput {
            turn_number,
            events,
            round_over,
        })
    }

    /// Rotation and movement. Returns each moved bot's radar direction
    /// before turning.
    fn move_bots(
        round: &mut Round,
        intents: &BTreeMap<ParticipantId, BotIntent>,
        turn_number: u32,
        ledger: &mut DamageLedger,
        events: &mut Vec<GameEvent>,
    ) -> BTreeMap<ParticipantId, f64> {
        let bounds = round.bot_bounds();
        let mut old_radar = BTreeMap::new();

        for bot in round.bots.values_mut().filter(|b| b.alive) {
            if bot.is_disabled() {
                bot.speed = 0.0;
                bot.radar_sweep = 0.0;
                continue;
            }

            let intent = intents.get(&bot.id).copied().unwrap_or_default();
            old_radar.insert(bot.id, bot.radar_direction);

            let deltas = PhysicsSystem::turn_deltas(
                bot.speed,
                intent.turn_rate,
                intent.gun_turn_rate,
                intent.radar_turn_rate,
                intent.adjust_gun_for_body_turn,
                intent.adjust_radar_for_gun_turn,
            );
            bot.direction = PhysicsSystem::rotate(bot.direction, deltas.body);
            bot.gun_direction = PhysicsSystem::rotate(bot.gun_direction, deltas.gun);
            bot.radar_direction = PhysicsSystem::rotate(bot.radar_direction, deltas.radar);
            bot.radar_sweep = deltas.radar;

            let moved = PhysicsSystem::move_bot(
                bot.position,
                bot.direction,
                bot.speed,
                intent.target_speed,
                &bounds,
            );
            bot.position = moved.position;
            bot.speed = moved.speed;

            if let Some(speed) = moved.wall_hit_speed {
                events.push(GameEvent::BotHitWall {
                    turn_number,
                    victim_id: bot.id,
                });
                let damage = wall_damage(speed);
                if damage > 0.0 {
                    ledger.add(bot.id, None, damage, DamageKind::Wall);
                }
            }
        }

        old_radar
    }

    /// Radar scan over the arc each radar swept this turn
    fn scan(
        round: &Round,
        old_radar: &BTreeMap<ParticipantId, f64>,
        turn_number: u32,
        events: &mut Vec<GameEvent>,
    ) {
        for scanner in round.bots.values().filter(|b| b.alive) {
            let Some(&start) = old_radar.get(&scanner.id) else {
                continue;
            };
            if scanner.radar_sweep == 0.0 {
                continue;
            }

            for target in round.bots.values() {
                if !target.alive || target.id == scanner.id {
                    continue;
                }
                if scanner.position.distance(target.position) > RADAR_RADIUS {
                    continue;
                }
                let bearing = scanner.position.direction_to(target.position);
                if angle_in_sweep(start, scanner.radar_sweep, bearing) {
                    events.push(GameEvent::ScannedBot {
                        turn_number,
                        scanned_by_bot_id: scanner.id,
                        scanned_bot_id: target.id,
                        energy: target.energy,
                        x: target.position.x,
                        y: target.position.y,
                        direction: target.direction,
                        speed: target.speed,
                    });
                }
            }
        }
    }

    /// Cool guns and fire. New bullets start moving next turn.
    fn fire_guns(
        round: &mut Round,
        setup: &GameSetup,
        intents: &BTreeMap<ParticipantId, BotIntent>,
        turn_number: u32,
        events: &mut Vec<GameEvent>,
    ) -> Vec<Bullet> {
        let mut shots: Vec<(ParticipantId, Point, f64, f64)> = Vec::new();

        for bot in round.bots.values_mut().filter(|b| b.alive) {
            bot.gun_heat = CombatSystem::cool_gun(bot.gun_heat, setup.gun_cooling_rate);
            if bot.is_disabled() {
                continue;
            }

            let intent = intents.get(&bot.id).copied().unwrap_or_default();
            if let Some(power) =
                CombatSystem::effective_firepower(intent.firepower(), bot.gun_heat, bot.energy)
            {
                bot.gun_heat = gun_heat(power);
                bot.energy = (bot.energy - power).max(0.0);
                shots.push((bot.id, bot.position, bot.gun_direction, power));
            }
        }

        shots
            .into_iter()
            .map(|(owner, origin, direction, power)| {
                let bullet = Bullet::new(round.next_bullet_id(), owner, origin, direction, power);
                events.push(GameEvent::BulletFired {
                    turn_number,
                    bullet: bullet.to_state(),
                });
                bullet
            })
            .collect()
    }

    /// Advance bullets along swept segments and resolve their collisions
    fn move_bullets(
        round: &mut Round,
        setup: &GameSetup,
        turn_number: u32,
        ledger: &mut DamageLedger,
        events: &mut Vec<GameEvent>,
    ) {
        let starts: Vec<Point> = round.bullets.iter().map(Bullet::position).collect();
        for bullet in round.bullets.iter_mut() {
            let next = bullet.next_position();
            bullet.x = next.x;
            bullet.y = next.y;
        }
        let ends: Vec<Point> = round.bullets.iter().map(Bullet::position).collect();
        let mut consumed = vec![false; round.bullets.len()];

        // Bullet vs bullet
        for i in 0..round.bullets.len() {
            for j in (i + 1)..round.bullets.len() {
                if consumed[i] || consumed[j] {
                    continue;
                }
                if segments_intersect(starts[i], ends[i], starts[j], ends[j]) {
                    consumed[i] = true;
                    consumed[j] = true;
                    events.push(GameEvent::BulletHitBullet {
                        turn_number,
                        bullet: round.bullets[i].to_state(),
                        hit_bullet: round.bullets[j].to_state(),
                    });
                }
            }
        }

        // Bullet vs bot: nearest contact along the path wins
        for (i, bullet) in round.bullets.iter().enumerate() {
            if consumed[i] {
                continue;
            }

            let mut nearest: Option<(f64, ParticipantId, bool)> = None;
            for bot in round.bots.values() {
                let is_target = if bot.alive {
                    bot.id != bullet.owner_id
                } else {
                    setup.dead_bots_are_obstacles
                };
                if !is_target {
                    continue;
                }
                if let Some(t) = segment_circle_hit(starts[i], ends[i], bot.position, BOT_RADIUS) {
                    if nearest.map_or(true, |(best, _, _)| t < best) {
                        nearest = Some((t, bot.id, bot.alive));
                    }
                }
            }

            let Some((_, victim_id, victim_alive)) = nearest else {
                continue;
            };
            consumed[i] = true;

            let damage = if victim_alive { bullet.damage() } else { 0.0 };
            if victim_alive {
                ledger.add(victim_id, Some(bullet.owner_id), damage, DamageKind::Bullet);
                ledger.bonus(bullet.owner_id, bullet_hit_energy_bonus(bullet.power));
            }
            let energy = round
                .bots
                .get(&victim_id)
                .map(|v| (v.energy - ledger.pending(victim_id)).max(0.0))
                .unwrap_or(0.0);
            events.push(GameEvent::BulletHitBot {
                turn_number,
                victim_id,
                bullet: bullet.to_state(),
                damage,
                energy,
            });
        }

        // Bullet vs wall
        let arena = round.arena_bounds();
        for (i, bullet) in round.bullets.iter().enumerate() {
            if !consumed[i] && !arena.contains(ends[i]) {
                consumed[i] = true;
                events.push(GameEvent::BulletHitWall {
                    turn_number,
                    bullet: bullet.to_state(),
                });
            }
        }

        let mut index = 0;
        round.bullets.retain(|_| {
            let keep = !consumed[index];
            index += 1;
            keep
        });
    }

    /// Ram damage and separation for overlapping bots
    fn collide_bots(
        round: &mut Round,
        setup: &GameSetup,
        turn_number: u32,
        ledger: &mut DamageLedger,
        events: &mut Vec<GameEvent>,
    ) {
        let bounds = round.bot_bounds();
        let alive = round.alive_ids();

        for (n, &a_id) in alive.iter().enumerate() {
            for &b_id in &alive[n + 1..] {
                let a = &round.bots[&a_id];
                let b = &round.bots[&b_id];
                if !circles_overlap(a.position, BOT_RADIUS, b.position, BOT_RADIUS) {
                    continue;
                }

                let a_rammed = a.speed != 0.0;
                let b_rammed = b.speed != 0.0;
                let (pa, pb) = PhysicsSystem::separate(a.position, b.position);
                let pa = bounds.clamp(pa).0;
                let pb = bounds.clamp(pb).0;

                ledger.add(a_id, Some(b_id), RAM_DAMAGE, DamageKind::Ram);
                ledger.add(b_id, Some(a_id), RAM_DAMAGE, DamageKind::Ram);

                for (id, position) in [(a_id, pa), (b_id, pb)] {
                    if let Some(bot) = round.bots.get_mut(&id) {
                        bot.position = position;
                        bot.speed = 0.0;
                    }
                }

                let energy_of = |id: ParticipantId, round: &Round| {
                    (round.bots[&id].energy - ledger.pending(id)).max(0.0)
                };
                events.push(GameEvent::BotHitBot {
                    turn_number,
                    bot_id: a_id,
                    victim_id: b_id,
                    energy: energy_of(b_id, round),
                    x: pb.x,
                    y: pb.y,
                    rammed: a_rammed,
                });
                events.push(GameEvent::BotHitBot {
                    turn_number,
                    bot_id: b_id,
                    victim_id: a_id,
                    energy: energy_of(a_id, round),
                    x: pa.x,
                    y: pa.y,
                    rammed: b_rammed,
                });
            }
        }

        if !setup.dead_bots_are_obstacles {
            return;
        }

        let corpses: Vec<(ParticipantId, Point)> = round
            .bots
            .values()
            .filter(|b| !b.alive)
            .map(|b| (b.id, b.position))
            .collect();
        for id in alive {
            for &(corpse_id, corpse) in &corpses {
                let Some(bot) = round.bots.get_mut(&id) else {
                    continue;
                };
                if !circles_overlap(bot.position, BOT_RADIUS, corpse, BOT_RADIUS) {
                    continue;
                }
                bot.position = bounds.clamp(PhysicsSystem::push_out(bot.position, corpse)).0;
                bot.speed = 0.0;
                events.push(GameEvent::BotHitBot {
                    turn_number,
                    bot_id: id,
                    victim_id: corpse_id,
                    energy: 0.0,
                    x: corpse.x,
                    y: corpse.y,
                    rammed: true,
                });
            }
        }
    }

    /// Apply the turn's damage. Returns the bots that dealt or took damage.
    fn apply_damage(
        round: &mut Round,
        ledger: &DamageLedger,
        turn_number: u32,
        events: &mut Vec<GameEvent>,
    ) -> BTreeSet<ParticipantId> {
        let mut active = BTreeSet::new();
        // (attacker, victim, credited damage, kind, killed)
        let mut credits: Vec<(ParticipantId, ParticipantId, f64, DamageKind, bool)> = Vec::new();

        for (&victim_id, entries) in &ledger.entries {
            let Some(victim) = round.bots.get_mut(&victim_id) else {
                continue;
            };
            if !victim.alive {
                continue;
            }
            active.insert(victim_id);

            let mut last = None;
            for damage in entries {
                let credited = damage.amount.min(victim.energy);
                victim.energy = (victim.energy - damage.amount).max(0.0);
                if let Some(attacker) = damage.attacker {
                    active.insert(attacker);
                    credits.push((attacker, victim_id, credited, damage.kind, false));
                }
                last = Some(*damage);
            }

            if victim.energy <= 0.0 {
                victim.kill(turn_number);
                let cause = match last.map(|d| d.kind) {
                    Some(DamageKind::Ram) => DeathCause::Ram,
                    Some(DamageKind::Wall) => DeathCause::Wall,
                    _ => DeathCause::Bullet,
                };
                if let Some(attacker) = last.and_then(|d| d.attacker) {
                    if let Some(credit) = credits
                        .iter_mut()
                        .rev()
                        .find(|c| c.0 == attacker && c.1 == victim_id)
                    {
                        credit.4 = true;
                    }
                }
                events.push(GameEvent::BotDeath {
                    turn_number,
                    victim_id,
                    cause,
                });
            }
        }

        for (attacker, victim, amount, kind, killed) in credits {
            let Some(bot) = round.bots.get_mut(&attacker) else {
                continue;
            };
            let tally = &mut bot.tally;
            match kind {
                DamageKind::Bullet => {
                    *tally.bullet_damage.entry(victim).or_insert(0.0) += amount;
                    if killed {
                        tally.bullet_kills.push(victim);
                    }
                }
                DamageKind::Ram => {
                    *tally.ram_damage.entry(victim).or_insert(0.0) += amount;
                    if killed {
                        tally.ram_kills.push(victim);
                    }
                }
                DamageKind::Wall => {}
            }
        }

        for (&shooter, &bonus) in &ledger.bonuses {
            if let Some(bot) = round.bots.get_mut(&shooter) {
                if bot.alive {
                    bot.energy += bonus;
                }
            }
        }

        active
    }

    fn check_inactivity(
        round: &mut Round,
        setup: &GameSetup,
        active: &BTreeSet<ParticipantId>,
        turn_number: u32,
        events: &mut Vec<GameEvent>,
    ) {
        for bot in round.bots.values_mut().filter(|b| b.alive) {
            if active.contains(&bot.id) {
                bot.inactivity_turns = 0;
                continue;
            }
            bot.inactivity_turns += 1;
            if bot.inactivity_turns > setup.max_inactivity_turns {
                bot.kill(turn_number);
                events.push(GameEvent::BotDeath {
                    turn_number,
                    victim_id: bot.id,
                    cause: DeathCause::Inactivity,
                });
            }
        }
    }

    fn check_invariants(round: &Round) -> Result<(), SimulationError> {
        for bot in round.bots.values() {
            if !(bot.energy.is_finite() && bot.energy >= 0.0) {
                return Err(SimulationError::InvariantViolated {
                    bot_id: bot.id,
                    reason: "energy must be finite and non-negative",
                });
            }
            if !bot.position.is_finite() {
                return Err(SimulationError::InvariantViolated {
                    bot_id: bot.id,
                    reason: "position must be finite",
                });
            }
            if bot.gun_heat < 0.0 {
                return Err(SimulationError::InvariantViolated {
                    bot_id: bot.id,
                    reason: "gun heat must be non-negative",
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Entrant;
    use crate::ws::protocol::InitialPosition;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tokio_test::assert_ok;

    const EPS: f64 = 1e-9;

    fn setup() -> GameSetup {
        GameSetup::default()
    }

    /// Round with bots at fixed positions and cold guns
    fn round_with(setup: &GameSetup, bots: &[(ParticipantId, f64, f64, f64)]) -> Round {
        let entrants: Vec<Entrant> = bots
            .iter()
            .map(|&(id, x, y, direction)| Entrant {
                id,
                initial_position: Some(InitialPosition {
                    x: Some(x),
                    y: Some(y),
                    direction: Some(direction),
                }),
            })
            .collect();
        let mut round = Round::new(1, setup, &entrants, &mut ChaCha8Rng::seed_from_u64(1));
        for bot in round.bots.values_mut() {
            bot.gun_heat = 0.0;
        }
        round
    }

    fn intents(entries: &[(ParticipantId, BotIntent)]) -> BTreeMap<ParticipantId, BotIntent> {
        entries.iter().copied().collect()
    }

    fn fire(power: f64) -> BotIntent {
        BotIntent {
            firepower: power,
            ..BotIntent::default()
        }
    }

    #[test]
    fn firing_creates_bullet_heats_gun_and_costs_energy() {
        let setup = setup();
        let mut round = round_with(&setup, &[(1, 400.0, 300.0, 0.0), (2, 100.0, 100.0, 0.0)]);

        let out = assert_ok!(TurnEngine::resolve(&mut round, &setup, &intents(&[(1, fire(3.0))])));

        let bullet = &round.bullets[0];
        assert_eq!(bullet.speed, 11.0);
        assert_eq!(bullet.owner_id, 1);
        assert_eq!(bullet.position(), Point::new(400.0, 300.0));
        let shooter = &round.bots[&1];
        assert!((shooter.gun_heat - 1.6).abs() < EPS);
        assert_eq!(shooter.energy, 97.0);
        assert!(out
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::BulletFired { bullet, .. } if bullet.owner_id == 1)));
    }

    #[test]
    fn hot_gun_does_not_fire() {
        let setup = setup();
        let mut round = round_with(&setup, &[(1, 400.0, 300.0, 0.0), (2, 100.0, 100.0, 0.0)]);
        round.bots.get_mut(&1).unwrap().gun_heat = 0.5;

        assert_ok!(TurnEngine::resolve(&mut round, &setup, &intents(&[(1, fire(1.0))])));

        assert!(round.bullets.is_empty());
        assert_eq!(round.bots[&1].energy, 100.0);
        assert!((round.bots[&1].gun_heat - 0.4).abs() < EPS);
    }

    #[test]
    fn disabled_bot_does_not_act() {
        let setup = setup();
        let mut round = round_with(&setup, &[(1, 400.0, 300.0, 0.0), (2, 100.0, 100.0, 0.0)]);
        round.bots.get_mut(&1).unwrap().energy = 0.0;
        let before = round.bots[&1].clone();

        let intent = BotIntent {
            turn_rate: 10.0,
            gun_turn_rate: 20.0,
            radar_turn_rate: 45.0,
            target_speed: 8.0,
            firepower: 1.0,
            ..BotIntent::default()
        };
        assert_ok!(TurnEngine::resolve(&mut round, &setup, &intents(&[(1, intent)])));

        let after = &round.bots[&1];
        assert!(after.alive);
        assert_eq!(after.position, before.position);
        assert_eq!(after.direction, before.direction);
        assert_eq!(after.gun_direction, before.gun_direction);
        assert_eq!(after.radar_direction, before.radar_direction);
        assert!(round.bullets.is_empty());
    }

    #[test]
    fn body_turn_is_limited_by_speed() {
        let setup = setup();
        let mut round = round_with(&setup, &[(1, 400.0, 300.0, 0.0), (2, 100.0, 100.0, 0.0)]);
        round.bots.get_mut(&1).unwrap().speed = 4.0;

        let intent = BotIntent {
            turn_rate: 10.0,
            target_speed: 4.0,
            ..BotIntent::default()
        };
        assert_ok!(TurnEngine::resolve(&mut round, &setup, &intents(&[(1, intent)])));

        assert!((round.bots[&1].direction - 7.0).abs() < EPS);
    }

    #[test]
    fn bullet_hits_bot_and_rewards_shooter() {
        let setup = setup();
        let mut round = round_with(&setup, &[(1, 100.0, 300.0, 0.0), (2, 150.0, 300.0, 0.0)]);

        let mut hit = None;
        for turn in 0..6 {
            let fire_now = if turn == 0 { fire(3.0) } else { BotIntent::default() };
            let out = assert_ok!(TurnEngine::resolve(&mut round, &setup, &intents(&[(1, fire_now)])));
            hit = out.events.into_iter().find_map(|e| match e {
                GameEvent::BulletHitBot {
                    victim_id, damage, ..
                } => Some((victim_id, damage)),
                _ => None,
            });
            if hit.is_some() {
                break;
            }
        }

        assert_eq!(hit, Some((2, 16.0)));
        assert_eq!(round.bots[&2].energy, 84.0);
        assert_eq!(round.bots[&1].energy, 97.0 + 9.0);
        assert_eq!(round.bots[&1].tally.bullet_damage[&2], 16.0);
        assert!(round.bullets.is_empty());
    }

    #[test]
    fn crossing_bullets_destroy_each_other() {
        let setup = setup();
        let mut round = round_with(&setup, &[(1, 200.0, 100.0, 90.0), (2, 100.0, 200.0, 0.0)]);

        let both_fire = intents(&[(1, fire(3.0)), (2, fire(3.0))]);
        let mut events = Vec::new();
        let out = assert_ok!(TurnEngine::resolve(&mut round, &setup, &both_fire));
        events.extend(out.events);
        for _ in 0..12 {
            let out = assert_ok!(TurnEngine::resolve(&mut round, &setup, &BTreeMap::new()));
            events.extend(out.events);
        }

        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::BulletHitBullet { .. })));
        assert!(!events
            .iter()
            .any(|e| matches!(e, GameEvent::BulletHitBot { .. })));
        assert!(round.bullets.is_empty());
    }

    #[test]
    fn bullet_leaving_arena_hits_wall() {
        let setup = setup();
        let mut round = round_with(&setup, &[(1, 780.0, 300.0, 0.0), (2, 100.0, 100.0, 0.0)]);

        assert_ok!(TurnEngine::resolve(&mut round, &setup, &intents(&[(1, fire(3.0))])));
        let out = assert_ok!(TurnEngine::resolve(&mut round, &setup, &BTreeMap::new()));
        let out2 = assert_ok!(TurnEngine::resolve(&mut round, &setup, &BTreeMap::new()));

        let walls = out
            .events
            .iter()
            .chain(out2.events.iter())
            .filter(|e| matches!(e, GameEvent::BulletHitWall { .. }))
            .count();
        assert_eq!(walls, 1);
        assert!(round.bullets.is_empty());
    }

    #[test]
    fn overlapping_bots_ram_and_separate_by_id() {
        let setup = setup();
        let mut round = round_with(&setup, &[(1, 400.0, 300.0, 0.0), (2, 400.0, 300.0, 0.0)]);

        let out = assert_ok!(TurnEngine::resolve(&mut round, &setup, &BTreeMap::new()));

        let a = &round.bots[&1];
        let b = &round.bots[&2];
        assert_eq!(a.position, Point::new(400.0 - BOT_RADIUS, 300.0));
        assert_eq!(b.position, Point::new(400.0 + BOT_RADIUS, 300.0));
        assert!((a.energy - (100.0 - RAM_DAMAGE)).abs() < EPS);
        assert!((b.energy - (100.0 - RAM_DAMAGE)).abs() < EPS);
        let rams = out
            .events
            .iter()
            .filter(|e| matches!(e, GameEvent::BotHitBot { .. }))
            .count();
        assert_eq!(rams, 2);
    }

    #[test]
    fn driving_into_wall_reports_hit() {
        let setup = setup();
        let mut round = round_with(&setup, &[(1, 20.0, 300.0, 180.0), (2, 400.0, 300.0, 0.0)]);
        round.bots.get_mut(&1).unwrap().speed = 4.0;

        let intent = BotIntent {
            target_speed: 8.0,
            ..BotIntent::default()
        };
        let out = assert_ok!(TurnEngine::resolve(&mut round, &setup, &intents(&[(1, intent)])));

        assert!(out
            .events
            .contains(&GameEvent::BotHitWall {
                turn_number: 1,
                victim_id: 1
            }));
        assert_eq!(round.bots[&1].speed, 0.0);
        assert_eq!(round.bots[&1].position.x, BOT_RADIUS);
        assert!((round.bots[&1].energy - 98.5).abs() < EPS);
    }

    #[test]
    fn turning_radar_scans_bots_in_arc() {
        let setup = setup();
        let mut round = round_with(&setup, &[(1, 100.0, 300.0, 0.0), (2, 300.0, 320.0, 0.0)]);

        let intent = BotIntent {
            radar_turn_rate: 45.0,
            ..BotIntent::default()
        };
        let out = assert_ok!(TurnEngine::resolve(&mut round, &setup, &intents(&[(1, intent)])));

        assert!(out.events.iter().any(|e| matches!(
            e,
            GameEvent::ScannedBot {
                scanned_by_bot_id: 1,
                scanned_bot_id: 2,
                ..
            }
        )));
        assert!(!out.events.iter().any(|e| matches!(
            e,
            GameEvent::ScannedBot {
                scanned_by_bot_id: 2,
                ..
            }
        )));
    }

    #[test]
    fn inactive_bots_are_killed() {
        let setup = GameSetup {
            max_inactivity_turns: 2,
            ..setup()
        };
        let mut round = round_with(
            &setup,
            &[(1, 100.0, 100.0, 0.0), (2, 500.0, 500.0, 0.0), (3, 700.0, 100.0, 0.0)],
        );

        for _ in 0..2 {
            let out = assert_ok!(TurnEngine::resolve(&mut round, &setup, &BTreeMap::new()));
            assert!(!out.round_over);
        }
        let out = assert_ok!(TurnEngine::resolve(&mut round, &setup, &BTreeMap::new()));

        let deaths: Vec<_> = out
            .events
            .iter()
            .filter_map(|e| match e {
                GameEvent::BotDeath { victim_id, cause, .. } => Some((*victim_id, *cause)),
                _ => None,
            })
            .collect();
        assert_eq!(
            deaths,
            vec![
                (1, DeathCause::Inactivity),
                (2, DeathCause::Inactivity),
                (3, DeathCause::Inactivity)
            ]
        );
        assert!(out.round_over);
    }

    #[test]
    fn lethal_hit_kills_and_ends_round() {
        let setup = setup();
        let mut round = round_with(&setup, &[(1, 100.0, 300.0, 0.0), (2, 150.0, 300.0, 0.0)]);
        round.bots.get_mut(&2).unwrap().energy = 5.0;

        let mut last = None;
        for turn in 0..6 {
            let fire_now = if turn == 0 { fire(3.0) } else { BotIntent::default() };
            let out = assert_ok!(TurnEngine::resolve(&mut round, &setup, &intents(&[(1, fire_now)])));
            let over = out.round_over;
            last = Some(out);
            if over {
                break;
            }
        }

        let out = last.expect("at least one turn resolved");
        assert!(out.round_over);
        assert!(!round.bots[&2].alive);
        assert_eq!(round.bots[&2].energy, 0.0);
        assert_eq!(round.bots[&1].tally.bullet_kills, vec![2]);
        assert_eq!(round.bots[&1].tally.bullet_damage[&2], 5.0);
        assert!(out.events.contains(&GameEvent::WonRound {
            turn_number: out.turn_number,
            bot_id: 1
        }));
        assert!(out.events.iter().any(|e| matches!(
            e,
            GameEvent::BotDeath {
                victim_id: 2,
                cause: DeathCause::Bullet,
                ..
            }
        )));
    }

    fn shoot_past_corpse(setup: &GameSetup) -> Vec<GameEvent> {
        let mut round = round_with(
            setup,
            &[(1, 100.0, 300.0, 0.0), (2, 160.0, 300.0, 0.0), (3, 250.0, 300.0, 0.0)],
        );
        round.bots.get_mut(&2).unwrap().kill(0);

        let mut events = Vec::new();
        for turn in 0..20 {
            let fire_now = if turn == 0 { fire(1.0) } else { BotIntent::default() };
            let out = assert_ok!(TurnEngine::resolve(&mut round, setup, &intents(&[(1, fire_now)])));
            events.extend(out.events);
        }
        events
    }

    #[test]
    fn bullets_pass_through_corpses_by_default() {
        let events = shoot_past_corpse(&setup());
        assert!(events.iter().any(|e| matches!(
            e,
            GameEvent::BulletHitBot { victim_id: 3, .. }
        )));
    }

    #[test]
    fn corpses_absorb_bullets_when_obstacles() {
        let setup = GameSetup {
            dead_bots_are_obstacles: true,
            ..setup()
        };
        let events = shoot_past_corpse(&setup);
        assert!(events.iter().any(|e| matches!(
            e,
            GameEvent::BulletHitBot {
                victim_id: 2,
                damage,
                ..
            } if *damage == 0.0
        )));
        assert!(!events.iter().any(|e| matches!(
            e,
            GameEvent::BulletHitBot { victim_id: 3, .. }
        )));
    }

    #[test]
    fn identical_inputs_give_identical_rounds() {
        let setup = setup();
        let entrants: Vec<Entrant> = (1..=4)
            .map(|id| Entrant {
                id,
                initial_position: None,
            })
            .collect();
        let log: Vec<BTreeMap<ParticipantId, BotIntent>> = (0..50)
            .map(|t| {
                (1..=4)
                    .map(|id| {
                        let intent = BotIntent {
                            turn_rate: ((t * id) % 7) as f64 - 3.0,
                            gun_turn_rate: 5.0,
                            radar_turn_rate: 45.0,
                            target_speed: if t % 10 < 5 { 8.0 } else { -8.0 },
                            firepower: 1.0 + (id as f64) * 0.5,
                            ..BotIntent::default()
                        };
                        (id, intent)
                    })
                    .collect()
            })
            .collect();

        let run = || {
            let mut round = Round::new(1, &setup, &entrants, &mut ChaCha8Rng::seed_from_u64(42));
            let mut trace = Vec::new();
            for turn_intents in &log {
                match TurnEngine::resolve(&mut round, &setup, turn_intents) {
                    Ok(out) => trace.push(format!("{:?}", out.events)),
                    Err(_) => break,
                }
                let states: Vec<_> = round.bots.values().map(|b| b.to_state()).collect();
                trace.push(format!("{states:?}{:?}", round.bullet_states()));
            }
            trace
        };

        assert_eq!(run(), run());
    }
}
