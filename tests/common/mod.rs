//! In-memory emulator used by the integration tests.
//!
//! `WalkerEmulator` moves the player one tile per `advance` call in the held
//! direction, crosses into the next map past `MAP_WIDTH`, and sets one more
//! event flag whenever `A` is held. Scripted states can be queued to force
//! exact snapshots (battles, level-ups).

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use indigo_rl::ram;
use indigo_rl::{
    Button, EmulatorLauncher, EnvConfig, MemoryRead, PokemonEnv, RamDump, RawFrame, RewardConfig,
};
use tempfile::TempDir;

pub const MAP_WIDTH: u8 = 10;
pub const FRAME_WIDTH: u32 = 160;
pub const FRAME_HEIGHT: u32 = 144;

#[derive(Debug, Default)]
pub struct SessionLog {
    pub launched: u32,
    pub stopped: u32,
    pub frames: u64,
    pub advances: u32,
    pub presses: Vec<Button>,
    pub releases: Vec<Button>,
    pub snapshots_loaded: u32,
}

impl SessionLog {
    pub fn live(&self) -> i64 {
        self.launched as i64 - self.stopped as i64
    }
}

pub struct WalkerEmulator {
    mem: RamDump,
    held: HashSet<Button>,
    script: VecDeque<RamDump>,
    stopped: bool,
    log: Arc<Mutex<SessionLog>>,
}

impl WalkerEmulator {
    fn walk(&mut self) {
        let mut x = self.mem.read_byte(ram::PLAYER_X);
        let mut y = self.mem.read_byte(ram::PLAYER_Y);
        let mut map = self.mem.read_byte(ram::MAP_ID);
        if self.held.contains(&Button::Right) {
            x = x.wrapping_add(1);
            if x >= MAP_WIDTH {
                x = 0;
                map = map.wrapping_add(1);
            }
        }
        if self.held.contains(&Button::Left) {
            x = x.saturating_sub(1);
        }
        if self.held.contains(&Button::Down) {
            y = y.saturating_add(1).min(MAP_WIDTH - 1);
        }
        if self.held.contains(&Button::Up) {
            y = y.saturating_sub(1);
        }
        if self.held.contains(&Button::A) {
            let progress = self
                .mem
                .read_range(ram::EVENT_FLAGS, ram::EVENT_FLAGS_LEN)
                .iter()
                .map(|b| b.count_ones())
                .sum::<u32>();
            if (progress as usize) < ram::EVENT_FLAGS_LEN * 8 {
                let byte = ram::EVENT_FLAGS + (progress / 8) as u16;
                let bit = progress % 8;
                let cur = self.mem.read_byte(byte);
                self.mem.write_byte(byte, cur | (1 << bit));
            }
        }
        self.mem.write_byte(ram::PLAYER_X, x);
        self.mem.write_byte(ram::PLAYER_Y, y);
        self.mem.write_byte(ram::MAP_ID, map);
    }
}

impl MemoryRead for WalkerEmulator {
    fn read_byte(&self, addr: u16) -> u8 {
        self.mem.read_byte(addr)
    }
}

impl indigo_rl::Emulator for WalkerEmulator {
    fn advance(&mut self, frames: u32) -> Result<()> {
        if self.stopped {
            bail!("session already stopped");
        }
        if let Some(next) = self.script.pop_front() {
            self.mem = next;
        } else {
            self.walk();
        }
        let mut log = self.log.lock().unwrap();
        log.frames += frames as u64;
        log.advances += 1;
        Ok(())
    }

    fn press(&mut self, button: Button) {
        self.held.insert(button);
        self.log.lock().unwrap().presses.push(button);
    }

    fn release(&mut self, button: Button) {
        self.held.remove(&button);
        self.log.lock().unwrap().releases.push(button);
    }

    fn read_frame(&self) -> Result<RawFrame> {
        // Tint the screen with the map id so frames differ between maps.
        let map = self.mem.read_byte(ram::MAP_ID);
        let mut data = Vec::with_capacity((FRAME_WIDTH * FRAME_HEIGHT * 4) as usize);
        for _ in 0..FRAME_WIDTH * FRAME_HEIGHT {
            data.extend_from_slice(&[map, 0x10, 0x20, 0xFF]);
        }
        Ok(RawFrame::new(FRAME_WIDTH, FRAME_HEIGHT, 4, data)?)
    }

    fn save_snapshot(&self) -> Result<Vec<u8>> {
        Ok(self.mem.as_bytes().to_vec())
    }

    fn load_snapshot(&mut self, snapshot: &[u8]) -> Result<()> {
        self.mem = RamDump::from_bytes(snapshot)?;
        self.log.lock().unwrap().snapshots_loaded += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.stopped {
            self.stopped = true;
            self.log.lock().unwrap().stopped += 1;
        }
        Ok(())
    }
}

/// Launches walkers that all start from `power_on` and share one log.
#[derive(Clone)]
pub struct WalkerLauncher {
    pub power_on: RamDump,
    pub script: Arc<Mutex<VecDeque<RamDump>>>,
    pub log: Arc<Mutex<SessionLog>>,
}

impl WalkerLauncher {
    pub fn new(power_on: RamDump) -> Self {
        Self {
            power_on,
            script: Arc::new(Mutex::new(VecDeque::new())),
            log: Arc::new(Mutex::new(SessionLog::default())),
        }
    }

    /// Queue memory states handed to the next launched session, one per advance.
    pub fn queue(&self, states: impl IntoIterator<Item = RamDump>) {
        self.script.lock().unwrap().extend(states);
    }
}

impl EmulatorLauncher for WalkerLauncher {
    type Session = WalkerEmulator;

    fn launch(&self, _rom: &Path) -> Result<WalkerEmulator> {
        self.log.lock().unwrap().launched += 1;
        Ok(WalkerEmulator {
            mem: self.power_on.clone(),
            held: HashSet::new(),
            script: std::mem::take(&mut *self.script.lock().unwrap()),
            stopped: false,
            log: Arc::clone(&self.log),
        })
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub rom: PathBuf,
    pub start_state: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let rom = dir.path().join("PokemonYellow.gb");
        std::fs::write(&rom, b"not really a rom").unwrap();
        let start_state = dir.path().join("start.state");
        Self {
            dir,
            rom,
            start_state,
        }
    }

    pub fn config(&self, max_steps: u32) -> EnvConfig {
        EnvConfig {
            rom_path: self.rom.clone(),
            start_state_path: Some(self.start_state.clone()),
            max_steps,
            ..Default::default()
        }
    }

    pub fn write_start_state(&self, dump: &RamDump) {
        std::fs::write(&self.start_state, dump.as_bytes()).unwrap();
    }

    pub fn env(&self, launcher: WalkerLauncher, max_steps: u32) -> PokemonEnv<WalkerLauncher> {
        PokemonEnv::new(launcher, self.config(max_steps), RewardConfig::default()).unwrap()
    }
}

/// Player standing at (x, y) on `map_id`, level 5, 20 HP, out of battle.
pub fn overworld(x: u8, y: u8, map_id: u8) -> RamDump {
    let mut dump = RamDump::zeroed();
    dump.write_byte(ram::PLAYER_X, x);
    dump.write_byte(ram::PLAYER_Y, y);
    dump.write_byte(ram::MAP_ID, map_id);
    dump.write_range(ram::PARTY_HP, &[0, 20]);
    dump.write_byte(ram::PARTY_LEVEL, 5);
    dump
}

pub fn in_battle(base: &RamDump, enemy_hp: u16) -> RamDump {
    let mut dump = base.clone();
    dump.write_byte(ram::IN_BATTLE, 1);
    dump.write_range(ram::ENEMY_HP, &enemy_hp.to_be_bytes());
    dump
}
