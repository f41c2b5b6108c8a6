use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage, RgbaImage};
use ndarray::Array3;
use serde::Serialize;

use crate::emulator::RawFrame;
use crate::env::GameState;
use crate::error::EnvError;

pub const SCREEN_WIDTH: u32 = 160;
pub const SCREEN_HEIGHT: u32 = 144;
pub const SCREEN_CHANNELS: usize = 3;
pub const MEMORY_VECTOR_LEN: usize = 7;

pub type MemoryVector = [u8; MEMORY_VECTOR_LEN];

/// What the agent sees after every reset/step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Channel-first screen, shape `(3, 144, 160)`.
    pub visual: Array3<u8>,
    /// `[x, y, map_id, my_hp, enemy_hp, party_level, in_battle]`
    pub memory_vector: MemoryVector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ObservationSchema {
    pub visual: [usize; 3],
    pub memory_vector: [usize; 1],
}

impl Default for ObservationSchema {
    fn default() -> Self {
        Self {
            visual: [
                SCREEN_CHANNELS,
                SCREEN_HEIGHT as usize,
                SCREEN_WIDTH as usize,
            ],
            memory_vector: [MEMORY_VECTOR_LEN],
        }
    }
}

pub fn build(frame: &RawFrame, state: &GameState) -> Result<Observation, EnvError> {
    Ok(Observation {
        visual: visual(frame)?,
        memory_vector: memory_vector(state),
    })
}

/// HP is projected to its low byte here while reward tracking keeps all 16
/// bits. Policies trained on this vector depend on that projection.
pub fn memory_vector(state: &GameState) -> MemoryVector {
    [
        state.x,
        state.y,
        state.map_id,
        state.my_hp as u8,
        state.enemy_hp as u8,
        state.party_level,
        state.battle_flag,
    ]
}

pub fn visual(frame: &RawFrame) -> Result<Array3<u8>, EnvError> {
    let rgb = to_rgb(frame)?;
    let rgb = if rgb.dimensions() == (SCREEN_WIDTH, SCREEN_HEIGHT) {
        rgb
    } else {
        imageops::resize(&rgb, SCREEN_WIDTH, SCREEN_HEIGHT, FilterType::Nearest)
    };

    Ok(Array3::from_shape_fn(
        (SCREEN_CHANNELS, SCREEN_HEIGHT as usize, SCREEN_WIDTH as usize),
        |(c, y, x)| rgb.get_pixel(x as u32, y as u32).0[c],
    ))
}

fn to_rgb(frame: &RawFrame) -> Result<RgbImage, EnvError> {
    let (w, h) = (frame.width(), frame.height());
    let data = frame.data().to_vec();
    let rgb = match frame.channels() {
        3 => RgbImage::from_raw(w, h, data),
        4 => RgbaImage::from_raw(w, h, data).map(|img| DynamicImage::ImageRgba8(img).into_rgb8()),
        n => {
            return Err(EnvError::Frame(format!("unsupported channel count {n}")));
        }
    };
    rgb.ok_or_else(|| EnvError::Frame(format!("buffer does not fit {w}x{h}")))
}
