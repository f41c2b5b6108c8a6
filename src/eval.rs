use anyhow::Result;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::emulator::EmulatorLauncher;
use crate::env::{Action, PokemonEnv};
use crate::observation::Observation;

#[derive(Debug, Clone, Serialize)]
pub struct EvalStats {
    pub avg_reward: f64,
    pub avg_steps: f64,
    pub avg_maps_visited: f64,
    pub avg_coords_visited: f64,
    pub avg_event_progress: f64,
    pub best_reward: f64,
    pub episodes: usize,
}

/// Uniform random actions, the baseline every trained policy has to beat.
pub fn random_policy(seed: Option<u64>) -> impl FnMut(&Observation) -> Action {
    let mut rng = match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    };
    move |_obs: &Observation| Action::ALL[rng.random_range(0..Action::COUNT)]
}

/// Play `episodes` full episodes with `policy`, each ending at truncation or
/// after `max_steps` decisions, whichever comes first.
pub fn run_eval<L, P>(
    env: &mut PokemonEnv<L>,
    mut policy: P,
    episodes: usize,
    max_steps: Option<u32>,
) -> Result<EvalStats>
where
    L: EmulatorLauncher,
    P: FnMut(&Observation) -> Action,
{
    let mut total_reward = 0.0f64;
    let mut total_steps = 0u64;
    let mut total_maps = 0usize;
    let mut total_coords = 0usize;
    let mut total_events = 0u64;
    let mut best_reward = f64::NEG_INFINITY;

    let eval_episodes = episodes.max(1);
    let step_limit = max_steps.unwrap_or(u32::MAX);

    for _ in 0..eval_episodes {
        let mut obs = env.reset()?;
        let mut ep_reward = 0.0f64;
        let mut ep_steps = 0u32;
        let mut ep_events = 0u32;

        loop {
            let result = env.step(policy(&obs))?;
            ep_reward += result.reward;
            ep_steps += 1;
            ep_events = result.state.event_progress;
            let done = result.done();
            obs = result.observation;

            if done || ep_steps >= step_limit {
                break;
            }
        }

        if let Some(tracker) = env.reward_state() {
            total_maps += tracker.visited_maps().len();
            total_coords += tracker.visited_coords().len();
            ep_events = ep_events.max(tracker.last_event_progress());
        }
        total_reward += ep_reward;
        total_steps += ep_steps as u64;
        total_events += ep_events as u64;
        best_reward = best_reward.max(ep_reward);
    }

    let denom = eval_episodes as f64;
    Ok(EvalStats {
        avg_reward: total_reward / denom,
        avg_steps: total_steps as f64 / denom,
        avg_maps_visited: total_maps as f64 / denom,
        avg_coords_visited: total_coords as f64 / denom,
        avg_event_progress: total_events as f64 / denom,
        best_reward,
        episodes: eval_episodes,
    })
}
