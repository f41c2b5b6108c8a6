use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::env::GameState;

// =============================================================================
// Reward Tuning Knobs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Paid per newly set event flag.
    pub event_flag_reward: f64,
    pub new_map_bonus: f64,
    /// Paid per point of enemy HP lost while in battle.
    pub damage_multiplier: f64,
    pub level_up_bonus: f64,
    pub new_coord_bonus: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            event_flag_reward: 20.0,
            new_map_bonus: 5.0,
            damage_multiplier: 0.2,
            level_up_bonus: 5.0,
            new_coord_bonus: 0.05,
        }
    }
}

// =============================================================================
// Reward Output
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RewardBreakdown {
    pub story: f64,
    pub map: f64,
    pub battle: f64,
    pub level: f64,
    pub exploration: f64,
}

impl RewardBreakdown {
    pub fn total(&self) -> f64 {
        self.story + self.map + self.battle + self.level + self.exploration
    }

    pub fn accumulate(&mut self, other: &RewardBreakdown) {
        self.story += other.story;
        self.map += other.map;
        self.battle += other.battle;
        self.level += other.level;
        self.exploration += other.exploration;
    }
}

/// Something the agent achieved this step that earned reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewardEvent {
    StoryProgress { from: u32, to: u32 },
    NewMap { map_id: u8 },
    BattleDamage { damage: u16 },
    LevelUp { from: u8, to: u8 },
    NewCoordinate { x: u8, y: u8, map_id: u8 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RewardStep {
    pub breakdown: RewardBreakdown,
    pub events: Vec<RewardEvent>,
}

impl RewardStep {
    pub fn total(&self) -> f64 {
        self.breakdown.total()
    }
}

// =============================================================================
// Reward State
// =============================================================================

/// Per-episode progress tracker.
///
/// Owned by exactly one episode. `compute_and_advance` consumes it and hands
/// back the successor, so a stale tracker can never be observed after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardState {
    visited_maps: HashSet<u8>,
    visited_coords: HashSet<(u8, u8, u8)>,
    last_event_progress: u32,
    last_my_hp: u16,
    last_enemy_hp: u16,
    last_party_level: u8,
}

impl RewardState {
    /// Tracker for a fresh episode whose first decoded state is `spawn`.
    ///
    /// The spawn map and tile count as already visited, so nothing pays out
    /// until the agent actually moves or progresses.
    pub fn seeded(spawn: &GameState) -> Self {
        let mut visited_maps = HashSet::new();
        visited_maps.insert(spawn.map_id);
        let mut visited_coords = HashSet::new();
        visited_coords.insert(spawn.coord());
        Self {
            visited_maps,
            visited_coords,
            last_event_progress: spawn.event_progress,
            last_my_hp: spawn.my_hp,
            last_enemy_hp: if spawn.in_battle { spawn.enemy_hp } else { 0 },
            last_party_level: spawn.party_level,
        }
    }

    pub fn compute_and_advance(
        mut self,
        cur: &GameState,
        rc: &RewardConfig,
    ) -> (RewardStep, Self) {
        let mut step = RewardStep::default();
        let coord = cur.coord();

        // Every check below reads the pre-update tracker; updates follow.
        let new_events = cur.event_progress > self.last_event_progress;
        let new_map = !self.visited_maps.contains(&cur.map_id);
        let damage = if cur.in_battle && self.last_enemy_hp > 0 {
            self.last_enemy_hp.saturating_sub(cur.enemy_hp)
        } else {
            0
        };
        let level_up = cur.party_level > self.last_party_level;
        let new_coord = !self.visited_coords.contains(&coord);

        if new_events {
            let delta = cur.event_progress - self.last_event_progress;
            step.breakdown.story = delta as f64 * rc.event_flag_reward;
            step.events.push(RewardEvent::StoryProgress {
                from: self.last_event_progress,
                to: cur.event_progress,
            });
        }
        if new_map {
            step.breakdown.map = rc.new_map_bonus;
            step.events.push(RewardEvent::NewMap {
                map_id: cur.map_id,
            });
        }
        if damage > 0 {
            step.breakdown.battle = damage as f64 * rc.damage_multiplier;
            step.events.push(RewardEvent::BattleDamage { damage });
        }
        if level_up {
            step.breakdown.level = rc.level_up_bonus;
            step.events.push(RewardEvent::LevelUp {
                from: self.last_party_level,
                to: cur.party_level,
            });
        }
        if new_coord {
            step.breakdown.exploration = rc.new_coord_bonus;
            step.events.push(RewardEvent::NewCoordinate {
                x: coord.0,
                y: coord.1,
                map_id: coord.2,
            });
        }

        if new_events {
            self.last_event_progress = cur.event_progress;
        }
        if new_map {
            self.visited_maps.insert(cur.map_id);
        }
        // Cleared outside battle so the next fight starts from a clean baseline.
        self.last_enemy_hp = if cur.in_battle { cur.enemy_hp } else { 0 };
        if level_up {
            self.last_party_level = cur.party_level;
        }
        if new_coord {
            self.visited_coords.insert(coord);
        }
        self.last_my_hp = cur.my_hp;

        (step, self)
    }

    pub fn visited_maps(&self) -> &HashSet<u8> {
        &self.visited_maps
    }

    pub fn visited_coords(&self) -> &HashSet<(u8, u8, u8)> {
        &self.visited_coords
    }

    pub fn last_event_progress(&self) -> u32 {
        self.last_event_progress
    }

    pub fn last_my_hp(&self) -> u16 {
        self.last_my_hp
    }

    pub fn last_enemy_hp(&self) -> u16 {
        self.last_enemy_hp
    }

    pub fn last_party_level(&self) -> u8 {
        self.last_party_level
    }
}

/// Replay decoded snapshots through a tracker seeded from `spawn`.
///
/// Returns one `RewardStep` per transition along with the final tracker.
pub fn trace<'a, I>(
    spawn: &GameState,
    states: I,
    rc: &RewardConfig,
) -> (Vec<RewardStep>, RewardState)
where
    I: IntoIterator<Item = &'a GameState>,
{
    let mut tracker = RewardState::seeded(spawn);
    let mut steps = Vec::new();
    for cur in states {
        let (step, next) = tracker.compute_and_advance(cur, rc);
        steps.push(step);
        tracker = next;
    }
    (steps, tracker)
}
