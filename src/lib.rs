pub mod emulator;
pub mod env;
pub mod error;
pub mod eval;
pub mod observation;
pub mod reward;

pub use emulator::{Button, Emulator, EmulatorLauncher, MemoryRead, RamDump, RawFrame};
pub use env::{Action, EnvConfig, EpisodePhase, GameState, PokemonEnv, StepResult, ram};
pub use error::EnvError;
pub use eval::{EvalStats, random_policy, run_eval};
pub use observation::{MemoryVector, Observation, ObservationSchema};
pub use reward::{RewardBreakdown, RewardConfig, RewardEvent, RewardState, RewardStep};
