//! Scoring: a pure function of round history

use std::collections::BTreeMap;

use crate::ws::protocol::{BotResults, Participant};

use super::state::{DamageTally, ParticipantId, Round};

pub const SURVIVAL_SCORE: f64 = 50.0;
pub const LAST_SURVIVOR_BONUS: f64 = 10.0;
pub const BULLET_DAMAGE_SCORE: f64 = 1.0;
pub const BULLET_KILL_BONUS: f64 = 0.20;
pub const RAM_DAMAGE_SCORE: f64 = 2.0;
pub const RAM_KILL_BONUS: f64 = 0.30;

/// Outcome of one bot in a finished round
#[derive(Debug, Clone, PartialEq)]
pub struct BotRecord {
    pub id: ParticipantId,
    /// `None` when the bot survived the round
    pub death_turn: Option<u32>,
    pub tally: DamageTally,
}

/// What scoring needs to know about a finished round
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoundRecord {
    pub bots: Vec<BotRecord>,
}

impl RoundRecord {
    pub fn from_round(round: &Round) -> Self {
        Self {
            bots: round
                .bots
                .values()
                .map(|b| BotRecord {
                    id: b.id,
                    death_turn: b.death_turn,
                    tally: b.tally.clone(),
                })
                .collect(),
        }
    }
}

/// Score components of one bot, for one round or accumulated
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Score {
    pub survival: f64,
    pub last_survivor_bonus: f64,
    pub bullet_damage: f64,
    pub bullet_kill_bonus: f64,
    pub ram_damage: f64,
    pub ram_kill_bonus: f64,
    pub first_places: u32,
    pub second_places: u32,
    pub third_places: u32,
}

impl Score {
    pub fn total(&self) -> f64 {
        self.survival
            + self.last_survivor_bonus
            + self.bullet_damage
            + self.bullet_kill_bonus
            + self.ram_damage
            + self.ram_kill_bonus
    }

    pub fn accumulate(&mut self, other: &Score) {
        self.survival += other.survival;
        self.last_survivor_bonus += other.last_survivor_bonus;
        self.bullet_damage += other.bullet_damage;
        self.bullet_kill_bonus += other.bullet_kill_bonus;
        self.ram_damage += other.ram_damage;
        self.ram_kill_bonus += other.ram_kill_bonus;
        self.first_places += other.first_places;
        self.second_places += other.second_places;
        self.third_places += other.third_places;
    }
}

/// Score one finished round. Placements go to the three best round scores.
pub fn score_round(record: &RoundRecord) -> BTreeMap<ParticipantId, Score> {
    let opponents = record.bots.len().saturating_sub(1) as f64;
    let survivors = record.bots.iter().filter(|b| b.death_turn.is_none()).count();

    let mut scores: BTreeMap<ParticipantId, Score> = BTreeMap::new();
    for bot in &record.bots {
        let outlived = record
            .bots
            .iter()
            .filter(|other| other.id != bot.id)
            .filter(|other| match (other.death_turn, bot.death_turn) {
                (Some(theirs), Some(mine)) => theirs < mine,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .count() as f64;

        let tally = &bot.tally;
        let bullet_damage: f64 = tally.bullet_damage.values().sum();
        let ram_damage: f64 = tally.ram_damage.values().sum();
        let bullet_kill_bonus: f64 = tally
            .bullet_kills
            .iter()
            .filter_map(|victim| tally.bullet_damage.get(victim))
            .map(|dealt| dealt * BULLET_DAMAGE_SCORE * BULLET_KILL_BONUS)
            .sum();
        let ram_kill_bonus: f64 = tally
            .ram_kills
            .iter()
            .filter_map(|victim| tally.ram_damage.get(victim))
            .map(|dealt| dealt * RAM_DAMAGE_SCORE * RAM_KILL_BONUS)
            .sum();

        let last_survivor = bot.death_turn.is_none() && survivors == 1 && opponents > 0.0;

        scores.insert(
            bot.id,
            Score {
                survival: SURVIVAL_SCORE * outlived,
                last_survivor_bonus: if last_survivor {
                    LAST_SURVIVOR_BONUS * opponents
                } else {
                    0.0
                },
                bullet_damage: bullet_damage * BULLET_DAMAGE_SCORE,
                bullet_kill_bonus,
                ram_damage: ram_damage * RAM_DAMAGE_SCORE,
                ram_kill_bonus,
                ..Score::default()
            },
        );
    }

    for (place, id) in placement_order(&scores).into_iter().take(3).enumerate() {
        if let Some(score) = scores.get_mut(&id) {
            match place {
                0 => score.first_places = 1,
                1 => score.second_places = 1,
                _ => score.third_places = 1,
            }
        }
    }

    scores
}

/// Ids ordered by total score, highest first; ties go to the lower id
fn placement_order(scores: &BTreeMap<ParticipantId, Score>) -> Vec<ParticipantId> {
    let mut order: Vec<(ParticipantId, f64)> =
        scores.iter().map(|(id, s)| (*id, s.total())).collect();
    order.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    order.into_iter().map(|(id, _)| id).collect()
}

/// Ranked standings for the given participants
pub fn rank(
    scores: &BTreeMap<ParticipantId, Score>,
    participants: &[Participant],
) -> Vec<BotResults> {
    placement_order(scores)
        .into_iter()
        .enumerate()
        .filter_map(|(index, id)| {
            let score = scores.get(&id)?;
            let participant = participants.iter().find(|p| p.id == id)?;
            Some(BotResults {
                id,
                name: participant.name.clone(),
                version: participant.version.clone(),
                rank: index as u32 + 1,
                total_score: score.total(),
                survival: score.survival,
                last_survivor_bonus: score.last_survivor_bonus,
                bullet_damage: score.bullet_damage,
                bullet_kill_bonus: score.bullet_kill_bonus,
                ram_damage: score.ram_damage,
                ram_kill_bonus: score.ram_kill_bonus,
                first_places: score.first_places,
                second_places: score.second_places,
                third_places: score.third_places,
            })
        })
        .collect()
}
