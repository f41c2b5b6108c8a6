use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::emulator::{Button, Emulator, EmulatorLauncher, MemoryRead, RawFrame};
use crate::error::EnvError;
use crate::observation::{self, Observation, ObservationSchema};
use crate::reward::{RewardBreakdown, RewardConfig, RewardEvent, RewardState};

// =============================================================================
// Environment Constants
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub rom_path: PathBuf,
    /// Emulator snapshot loaded on every reset to skip the intro. `None`
    /// starts each episode from power-on.
    pub start_state_path: Option<PathBuf>,
    pub frames_per_action: u32,
    pub max_steps: u32,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            rom_path: PathBuf::from("roms/PokemonYellow.gb"),
            start_state_path: Some(PathBuf::from("states/start.state")),
            frames_per_action: 24,
            max_steps: 2048 * 6,
        }
    }
}

// =============================================================================
// RAM Addresses
// =============================================================================

/// Pokémon Yellow (English/International) WRAM layout.
pub mod ram {
    pub const PLAYER_Y: u16 = 0xD361;
    pub const PLAYER_X: u16 = 0xD362;
    pub const MAP_ID: u16 = 0xD35E;
    // 0 = overworld, 1 = wild battle, 2 = trainer battle
    pub const IN_BATTLE: u16 = 0xD057;
    // Big-endian pairs: high byte first
    pub const ENEMY_HP: u16 = 0xCFE6;
    pub const PARTY_HP: u16 = 0xD16C;
    pub const PARTY_LEVEL: u16 = 0xD18C;

    // wEventFlags: story progress, one bit per event
    pub const EVENT_FLAGS: u16 = 0xD747;
    pub const EVENT_FLAGS_LEN: usize = 320;

    /// Every decoded region as `(name, offset, width)`.
    pub const FIELDS: [(&str, u16, usize); 8] = [
        ("player_y", PLAYER_Y, 1),
        ("player_x", PLAYER_X, 1),
        ("map_id", MAP_ID, 1),
        ("in_battle", IN_BATTLE, 1),
        ("enemy_hp", ENEMY_HP, 2),
        ("party_hp", PARTY_HP, 2),
        ("party_level", PARTY_LEVEL, 1),
        ("event_flags", EVENT_FLAGS, EVENT_FLAGS_LEN),
    ];
}

// =============================================================================
// Action Space
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Action {
    Down = 0,
    Left = 1,
    Right = 2,
    Up = 3,
    A = 4,
    B = 5,
    Start = 6,
}

impl Action {
    pub const COUNT: usize = 7;

    pub const ALL: [Action; Self::COUNT] = [
        Action::Down,
        Action::Left,
        Action::Right,
        Action::Up,
        Action::A,
        Action::B,
        Action::Start,
    ];

    pub const NAMES: [&'static str; Self::COUNT] =
        ["down", "left", "right", "up", "a", "b", "start"];

    pub fn from_index(i: usize) -> Result<Self, EnvError> {
        Self::ALL.get(i).copied().ok_or(EnvError::InvalidAction {
            index: i,
            count: Self::COUNT,
        })
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        Self::NAMES[self.index()]
    }

    pub fn button(self) -> Button {
        match self {
            Action::Down => Button::Down,
            Action::Left => Button::Left,
            Action::Right => Button::Right,
            Action::Up => Button::Up,
            Action::A => Button::A,
            Action::B => Button::B,
            Action::Start => Button::Start,
        }
    }
}

impl TryFrom<usize> for Action {
    type Error = EnvError;

    fn try_from(i: usize) -> Result<Self, EnvError> {
        Self::from_index(i)
    }
}

// =============================================================================
// Game State
// =============================================================================

/// One decoded view of WRAM. Built fresh on every read, never mutated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct GameState {
    pub x: u8,
    pub y: u8,
    pub map_id: u8,
    pub in_battle: bool,
    /// Raw battle byte, kept so the memory vector shows the battle kind.
    pub battle_flag: u8,
    pub my_hp: u16,
    pub enemy_hp: u16,
    pub party_level: u8,
    pub event_progress: u32,
}

impl GameState {
    pub fn read<M: MemoryRead + ?Sized>(mem: &M) -> Self {
        let battle_flag = mem.read_byte(ram::IN_BATTLE);
        Self {
            x: mem.read_byte(ram::PLAYER_X),
            y: mem.read_byte(ram::PLAYER_Y),
            map_id: mem.read_byte(ram::MAP_ID),
            in_battle: battle_flag != 0,
            battle_flag,
            my_hp: read_u16_be(mem, ram::PARTY_HP),
            enemy_hp: read_u16_be(mem, ram::ENEMY_HP),
            party_level: mem.read_byte(ram::PARTY_LEVEL),
            event_progress: count_event_flags(
                &mem.read_range(ram::EVENT_FLAGS, ram::EVENT_FLAGS_LEN),
            ),
        }
    }

    pub fn coord(&self) -> (u8, u8, u8) {
        (self.x, self.y, self.map_id)
    }
}

fn read_u16_be<M: MemoryRead + ?Sized>(mem: &M, addr: u16) -> u16 {
    let hi = mem.read_byte(addr) as u16;
    let lo = mem.read_byte(addr.wrapping_add(1)) as u16;
    (hi << 8) | lo
}

/// Number of set bits across the event-flag block.
pub fn count_event_flags(flags: &[u8]) -> u32 {
    flags.iter().map(|b| b.count_ones()).sum()
}

// =============================================================================
// Pokémon Yellow Environment
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodePhase {
    Unstarted,
    Running,
    Truncated,
}

pub struct PokemonEnv<L: EmulatorLauncher> {
    launcher: L,
    session: Option<L::Session>,
    reward_state: Option<RewardState>,
    phase: EpisodePhase,
    closed: bool,
    step_count: u32,
    total_reward: f64,
    reward_debug: bool,
    reward_breakdown: RewardBreakdown,
    pub env_config: EnvConfig,
    pub reward_config: RewardConfig,
}

impl<L: EmulatorLauncher> PokemonEnv<L> {
    pub fn new(launcher: L, env_config: EnvConfig, reward_config: RewardConfig) -> Result<Self> {
        if !env_config.rom_path.is_file() {
            return Err(EnvError::RomNotFound(env_config.rom_path.clone()).into());
        }

        let mut env = Self {
            launcher,
            session: None,
            reward_state: None,
            phase: EpisodePhase::Unstarted,
            closed: false,
            step_count: 0,
            total_reward: 0.0,
            reward_debug: Self::debug_reward_enabled(),
            reward_breakdown: RewardBreakdown::default(),
            env_config,
            reward_config,
        };
        env.session = Some(env.launch_session()?);
        Ok(env)
    }

    fn debug_reward_enabled() -> bool {
        debug_flag(std::env::var("INDIGO_DEBUG_REWARD").ok().as_deref())
    }

    pub fn action_count() -> usize {
        Action::COUNT
    }

    pub fn action_names() -> &'static [&'static str] {
        &Action::NAMES
    }

    pub fn observation_schema() -> ObservationSchema {
        ObservationSchema::default()
    }

    pub fn phase(&self) -> EpisodePhase {
        self.phase
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn max_steps(&self) -> u32 {
        self.env_config.max_steps
    }

    pub fn total_reward(&self) -> f64 {
        self.total_reward
    }

    pub fn reward_state(&self) -> Option<&RewardState> {
        self.reward_state.as_ref()
    }

    pub fn reward_debug_enabled(&self) -> bool {
        self.reward_debug
    }

    pub fn set_reward_debug(&mut self, enabled: bool) {
        self.reward_debug = enabled;
    }

    pub fn clear_reward_breakdown(&mut self) {
        self.reward_breakdown = RewardBreakdown::default();
    }

    /// Episode-to-date reward per signal. Only accumulated with reward debug on.
    pub fn reward_breakdown(&self) -> RewardBreakdown {
        self.reward_breakdown
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn launch_session(&self) -> Result<L::Session> {
        let rom = &self.env_config.rom_path;
        self.launcher
            .launch(rom)
            .context(EnvError::Launch(rom.clone()))
    }

    fn stop_session(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            session.stop().context(EnvError::Teardown)?;
        }
        Ok(())
    }

    fn session(&self) -> Result<&L::Session> {
        self.session
            .as_ref()
            .ok_or_else(|| EnvError::NotStarted.into())
    }

    fn running_session(&mut self) -> Result<&mut L::Session> {
        if self.closed || self.reward_state.is_none() {
            return Err(EnvError::NotStarted.into());
        }
        self.session
            .as_mut()
            .ok_or_else(|| EnvError::NotStarted.into())
    }

    fn load_start_state(&mut self) -> Result<()> {
        let Some(path) = self.env_config.start_state_path.clone() else {
            return Ok(());
        };
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    path = %path.display(),
                    "start state not found; episode begins at power-on and will play the intro"
                );
                return Ok(());
            }
            Err(e) => {
                return Err(EnvError::StartState {
                    path,
                    reason: e.to_string(),
                }
                .into());
            }
        };
        let session = self.session.as_mut().ok_or(EnvError::NotStarted)?;
        session.load_snapshot(&bytes).context(EnvError::StartState {
            path,
            reason: "rejected by emulator".to_string(),
        })
    }

    pub fn reset(&mut self) -> Result<Observation> {
        if self.closed {
            return Err(EnvError::NotStarted).context("environment is closed");
        }

        // The old session must be gone before the next one exists.
        self.stop_session()?;
        self.reward_state = None;
        self.phase = EpisodePhase::Unstarted;
        self.session = Some(self.launch_session()?);
        self.load_start_state()?;

        let session = self.session()?;
        let state = GameState::read(session);
        let frame = session.read_frame()?;

        self.reward_state = Some(RewardState::seeded(&state));
        self.step_count = 0;
        self.total_reward = 0.0;
        self.reward_breakdown = RewardBreakdown::default();
        self.phase = EpisodePhase::Running;
        debug!(
            map_id = state.map_id,
            x = state.x,
            y = state.y,
            event_progress = state.event_progress,
            "episode reset"
        );

        Ok(observation::build(&frame, &state)?)
    }

    pub fn step_index(&mut self, action_idx: usize) -> Result<StepResult> {
        let action = Action::from_index(action_idx)?;
        self.step(action)
    }

    pub fn step(&mut self, action: Action) -> Result<StepResult> {
        let frames = self.env_config.frames_per_action;
        let (state, frame) = {
            let session = self.running_session()?;
            let button = action.button();
            session.press(button);
            let advanced = session.advance(frames);
            session.release(button);
            advanced.context(EnvError::Emulator(format!(
                "advance {frames} frames holding {}",
                action.name()
            )))?;
            (GameState::read(&*session), session.read_frame()?)
        };
        self.step_count += 1;

        let observation = observation::build(&frame, &state)?;

        let tracker = self.reward_state.take().ok_or(EnvError::NotStarted)?;
        let (reward_step, tracker) = tracker.compute_and_advance(&state, &self.reward_config);
        self.reward_state = Some(tracker);
        self.log_events(&reward_step.events);

        let reward = reward_step.total();
        self.total_reward += reward;
        if self.reward_debug {
            self.reward_breakdown.accumulate(&reward_step.breakdown);
        }

        let truncated = self.step_count >= self.env_config.max_steps;
        if truncated {
            self.phase = EpisodePhase::Truncated;
            debug!(
                steps = self.step_count,
                total_reward = self.total_reward,
                "episode truncated"
            );
        }

        Ok(StepResult {
            observation,
            reward,
            terminated: false,
            truncated,
            state,
            breakdown: reward_step.breakdown,
            events: reward_step.events,
            step_count: self.step_count,
            total_reward: self.total_reward,
        })
    }

    fn log_events(&self, events: &[RewardEvent]) {
        for event in events {
            match *event {
                RewardEvent::StoryProgress { from, to } => {
                    info!(from, to, "event unlocked");
                }
                RewardEvent::NewMap { map_id } => {
                    info!(map_id, "new map");
                }
                RewardEvent::LevelUp { from, to } => {
                    info!(from, to, "party level up");
                }
                RewardEvent::BattleDamage { damage } => {
                    debug!(damage, "enemy damaged");
                }
                RewardEvent::NewCoordinate { x, y, map_id } => {
                    debug!(x, y, map_id, "new tile");
                }
            }
        }
    }

    /// Observation of the current emulator state, without stepping.
    pub fn observe(&self) -> Result<Observation> {
        if self.closed {
            return Err(EnvError::NotStarted.into());
        }
        let session = self.session()?;
        let state = GameState::read(session);
        let frame = session.read_frame()?;
        Ok(observation::build(&frame, &state)?)
    }

    /// Advance exactly one frame, optionally holding `held` for that frame.
    ///
    /// For presentation layers that draw every frame of an action hold. No
    /// decision is consumed: `step_count` and the reward tracker are untouched.
    pub fn advance_render_frame(&mut self, held: Option<Action>) -> Result<RawFrame> {
        let session = self.running_session()?;
        if let Some(action) = held {
            session.press(action.button());
        }
        let advanced = session.advance(1);
        if let Some(action) = held {
            session.release(action.button());
        }
        advanced.context(EnvError::Emulator("advance render frame".to_string()))?;
        session.read_frame()
    }

    /// Write the live emulator snapshot to `path`, creating parent directories.
    ///
    /// Point `EnvConfig::start_state_path` at the file to start every later
    /// episode from this exact moment.
    pub fn save_start_state(&self, path: &Path) -> Result<()> {
        if self.closed {
            return Err(EnvError::NotStarted).context("environment is closed");
        }
        let snapshot = self
            .session()?
            .save_snapshot()
            .context(EnvError::Emulator("save snapshot".to_string()))?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }
        std::fs::write(path, &snapshot)
            .with_context(|| format!("Failed to write start state: {}", path.display()))?;
        info!(path = %path.display(), bytes = snapshot.len(), "start state saved");
        Ok(())
    }

    /// Stop the emulator session. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.reward_state = None;
        self.phase = EpisodePhase::Unstarted;
        self.stop_session()
    }
}

impl<L: EmulatorLauncher> Drop for PokemonEnv<L> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_session() {
            warn!(error = %format!("{e:#}"), "failed to stop emulator session on drop");
        }
    }
}

fn debug_flag(val: Option<&str>) -> bool {
    matches!(val, Some("1" | "true" | "TRUE" | "yes" | "YES"))
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub observation: Observation,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub state: GameState,
    pub breakdown: RewardBreakdown,
    pub events: Vec<RewardEvent>,
    pub step_count: u32,
    pub total_reward: f64,
}

impl StepResult {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}
