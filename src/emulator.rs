use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::EnvError;

// =============================================================================
// Address Space
// =============================================================================

pub const ADDRESS_SPACE: usize = 0x1_0000;
pub const WRAM_START: u16 = 0xC000;
pub const WRAM_SIZE: usize = 0x2000;

// =============================================================================
// Joypad
// =============================================================================

/// Game Boy joypad buttons, named the way the emulator expects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Button {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

impl Button {
    pub fn name(self) -> &'static str {
        match self {
            Button::Right => "right",
            Button::Left => "left",
            Button::Up => "up",
            Button::Down => "down",
            Button::A => "a",
            Button::B => "b",
            Button::Select => "select",
            Button::Start => "start",
        }
    }
}

// =============================================================================
// Frames
// =============================================================================

/// Raw LCD frame as the emulator hands it over: row-major, interleaved channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl RawFrame {
    /// `channels` must be 3 (RGB) or 4 (RGBA) and `data` must hold exactly
    /// `width * height * channels` bytes.
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self, EnvError> {
        if channels != 3 && channels != 4 {
            return Err(EnvError::Frame(format!(
                "unsupported channel count {channels}"
            )));
        }
        if width == 0 || height == 0 {
            return Err(EnvError::Frame(format!("empty frame {width}x{height}")));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(EnvError::Frame(format!(
                "{width}x{height}x{channels} frame needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

// =============================================================================
// Collaborator Interface
// =============================================================================

/// Read access to the emulated address space.
pub trait MemoryRead {
    fn read_byte(&self, addr: u16) -> u8;

    fn read_range(&self, addr: u16, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| self.read_byte(addr.wrapping_add(i as u16)))
            .collect()
    }
}

/// A running emulator session.
///
/// Every call is assumed atomic. `press` holds a button until the matching
/// `release`; `advance` runs whole frames with the current input state.
pub trait Emulator: MemoryRead {
    fn advance(&mut self, frames: u32) -> Result<()>;
    fn press(&mut self, button: Button);
    fn release(&mut self, button: Button);
    fn read_frame(&self) -> Result<RawFrame>;
    fn save_snapshot(&self) -> Result<Vec<u8>>;
    fn load_snapshot(&mut self, snapshot: &[u8]) -> Result<()>;
    /// Release the session's process/window resources. Must tolerate repeated calls.
    fn stop(&mut self) -> Result<()>;
}

/// Creates fresh emulator sessions for a ROM. Called once at construction and
/// again on every reset.
pub trait EmulatorLauncher {
    type Session: Emulator;

    fn launch(&self, rom: &Path) -> Result<Self::Session>;
}

impl<F, E> EmulatorLauncher for F
where
    F: Fn(&Path) -> Result<E>,
    E: Emulator,
{
    type Session = E;

    fn launch(&self, rom: &Path) -> Result<E> {
        self(rom)
    }
}

// =============================================================================
// RAM Dumps
// =============================================================================

/// Flat copy of the 64 KiB address space, used to decode memory offline.
#[derive(Clone)]
pub struct RamDump {
    bytes: Box<[u8]>,
}

impl RamDump {
    pub fn zeroed() -> Self {
        Self {
            bytes: vec![0u8; ADDRESS_SPACE].into_boxed_slice(),
        }
    }

    /// Accepts a full address-space image or a bare WRAM image, which is
    /// mapped at `WRAM_START`.
    pub fn from_bytes(data: &[u8]) -> Result<Self, EnvError> {
        let mut dump = Self::zeroed();
        match data.len() {
            ADDRESS_SPACE => dump.bytes.copy_from_slice(data),
            WRAM_SIZE => dump.write_range(WRAM_START, data),
            got => {
                return Err(EnvError::DumpSize {
                    got,
                    full: ADDRESS_SPACE,
                    wram: WRAM_SIZE,
                });
            }
        }
        Ok(dump)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read RAM dump: {}", path.display()))?;
        Self::from_bytes(&data)
            .with_context(|| format!("Invalid RAM dump: {}", path.display()))
    }

    pub fn write_byte(&mut self, addr: u16, value: u8) {
        self.bytes[addr as usize] = value;
    }

    pub fn write_range(&mut self, addr: u16, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.write_byte(addr.wrapping_add(i as u16), b);
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for RamDump {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl MemoryRead for RamDump {
    fn read_byte(&self, addr: u16) -> u8 {
        self.bytes[addr as usize]
    }

    fn read_range(&self, addr: u16, len: usize) -> Vec<u8> {
        let start = addr as usize;
        if start + len <= ADDRESS_SPACE {
            self.bytes[start..start + len].to_vec()
        } else {
            (0..len)
                .map(|i| self.read_byte(addr.wrapping_add(i as u16)))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wram_image_maps_at_c000() {
        let mut wram = vec![0u8; WRAM_SIZE];
        wram[0] = 0xAB;
        wram[WRAM_SIZE - 1] = 0xCD;
        let dump = RamDump::from_bytes(&wram).unwrap();
        assert_eq!(dump.read_byte(0xC000), 0xAB);
        assert_eq!(dump.read_byte(0xDFFF), 0xCD);
        assert_eq!(dump.read_byte(0xBFFF), 0);
    }

    #[test]
    fn odd_sized_dump_is_rejected() {
        let err = RamDump::from_bytes(&[0u8; 100]).err().unwrap();
        assert!(matches!(err, EnvError::DumpSize { got: 100, .. }));
    }

    #[test]
    fn load_reads_wram_files_and_rejects_odd_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("wram.bin");
        let mut wram = vec![0u8; WRAM_SIZE];
        wram[0x1362] = 7;
        std::fs::write(&good, &wram).unwrap();
        assert_eq!(RamDump::load(&good).unwrap().read_byte(0xD362), 7);

        let bad = dir.path().join("short.bin");
        std::fs::write(&bad, [0u8; 1000]).unwrap();
        let err = RamDump::load(&bad).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<EnvError>(),
            Some(EnvError::DumpSize { got: 1000, .. })
        ));
        assert!(format!("{err:#}").contains("short.bin"));

        assert!(RamDump::load(&dir.path().join("missing.bin")).is_err());
    }

    #[test]
    fn read_range_wraps_at_top_of_address_space() {
        let mut dump = RamDump::zeroed();
        dump.write_byte(0xFFFF, 1);
        dump.write_byte(0x0000, 2);
        assert_eq!(dump.read_range(0xFFFF, 2), vec![1, 2]);
    }

    #[test]
    fn raw_frame_rejects_bad_geometry() {
        assert!(RawFrame::new(2, 2, 3, vec![0; 12]).is_ok());
        assert!(RawFrame::new(2, 2, 4, vec![0; 12]).is_err());
        assert!(RawFrame::new(2, 2, 1, vec![0; 4]).is_err());
        assert!(RawFrame::new(0, 2, 3, vec![]).is_err());
    }
}
