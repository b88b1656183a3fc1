//! Fake peripherals
//!
//! Each fake keeps its observable state behind a shared handle so a test can
//! keep a clone while the node owns the peripheral.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tagmesh_runtime::{AudioPlayer, DigitalIo, PeripheralError, PixelStrip, Rgb, TextDisplay};

/// Shared pin levels
#[derive(Clone, Default)]
pub struct PinBank {
    levels: Arc<Mutex<HashMap<u8, bool>>>,
}

impl PinBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive an input pin from the test
    pub fn set(&self, pin: u8, high: bool) {
        self.levels.lock().insert(pin, high);
    }

    pub fn get(&self, pin: u8) -> bool {
        self.levels.lock().get(&pin).copied().unwrap_or(false)
    }
}

impl DigitalIo for PinBank {
    fn read(&self, pin: u8) -> bool {
        self.get(pin)
    }

    fn write(&mut self, pin: u8, high: bool) {
        self.set(pin, high);
    }
}

#[derive(Debug, Default)]
struct PlayerState {
    remaining: u32,
    pumps: u64,
    stops: u64,
}

/// Audio player that plays for a fixed number of pumps
#[derive(Clone, Default)]
pub struct FakePlayer {
    state: Arc<Mutex<PlayerState>>,
    fail_begin: bool,
}

impl FakePlayer {
    pub fn new(chunks: u32) -> Self {
        let player = FakePlayer::default();
        player.state.lock().remaining = chunks;
        player
    }

    /// Player whose codec never comes up
    pub fn broken() -> Self {
        FakePlayer {
            fail_begin: true,
            ..Default::default()
        }
    }

    /// Queue another stream
    pub fn load(&self, chunks: u32) {
        self.state.lock().remaining = chunks;
    }

    pub fn pumps(&self) -> u64 {
        self.state.lock().pumps
    }

    pub fn stops(&self) -> u64 {
        self.state.lock().stops
    }
}

impl AudioPlayer for FakePlayer {
    fn begin(&mut self) -> Result<(), PeripheralError> {
        if self.fail_begin {
            return Err(PeripheralError::InitFailed {
                name: "audio".into(),
                reason: "codec did not respond".into(),
            });
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state.lock().remaining > 0
    }

    fn pump(&mut self) {
        let mut state = self.state.lock();
        state.remaining = state.remaining.saturating_sub(1);
        state.pumps += 1;
    }

    fn stop(&mut self) {
        self.state.lock().stops += 1;
    }
}

/// Pixel strip remembering the last frame shown
#[derive(Clone)]
pub struct FakeStrip {
    pixels: Arc<Mutex<Vec<Option<Rgb>>>>,
    shown: Arc<Mutex<Vec<Option<Rgb>>>>,
}

impl FakeStrip {
    pub fn new(len: usize) -> Self {
        FakeStrip {
            pixels: Arc::new(Mutex::new(vec![None; len])),
            shown: Arc::new(Mutex::new(vec![None; len])),
        }
    }

    /// Index of the lit pixel in the last shown frame
    pub fn lit(&self) -> Option<usize> {
        self.shown.lock().iter().position(Option::is_some)
    }
}

impl PixelStrip for FakeStrip {
    fn begin(&mut self) -> Result<(), PeripheralError> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.pixels.lock().len()
    }

    fn clear(&mut self) {
        self.pixels.lock().iter_mut().for_each(|p| *p = None);
    }

    fn set_pixel(&mut self, index: usize, color: Rgb) {
        if let Some(pixel) = self.pixels.lock().get_mut(index) {
            *pixel = Some(color);
        }
    }

    fn show(&mut self) {
        let frame = self.pixels.lock().clone();
        *self.shown.lock() = frame;
    }
}

/// Text display keeping the last flushed screen
#[derive(Clone, Default)]
pub struct FakeDisplay {
    pending: Arc<Mutex<Vec<String>>>,
    screen: Arc<Mutex<Vec<String>>>,
    fail_begin: bool,
}

impl FakeDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display that fails allocation at startup
    pub fn broken() -> Self {
        FakeDisplay {
            fail_begin: true,
            ..Default::default()
        }
    }

    pub fn screen(&self) -> Vec<String> {
        self.screen.lock().clone()
    }
}

impl TextDisplay for FakeDisplay {
    fn begin(&mut self) -> Result<(), PeripheralError> {
        if self.fail_begin {
            return Err(PeripheralError::InitFailed {
                name: "display".into(),
                reason: "SSD1306 allocation failed".into(),
            });
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.pending.lock().clear();
    }

    fn print_line(&mut self, line: &str) {
        self.pending.lock().push(line.to_string());
    }

    fn flush(&mut self) {
        let lines = self.pending.lock().clone();
        *self.screen.lock() = lines;
    }
}
