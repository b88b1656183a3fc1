//! Peripheral seam
//!
//! Audio playback, the pixel strip, the status display and the laser drive
//! are external collaborators. The runtime only calls their `step()` on
//! schedule. Each adapter here wraps a minimal driver trait so the same
//! scheduling logic runs against real hardware or test fakes.

use std::fmt;
use std::time::Duration;

use tagmesh_core::LogicalTime;

use crate::PeripheralError;

/// What a peripheral wants after one step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Keep the regular period
    Continue,
    /// Work finished; re-check after the role's restart delay
    Finished,
    /// Re-check after a specific delay
    RestartAfter(Duration),
    /// Stop scheduling this peripheral
    Disable,
}

/// Busy/idle state shown in status reports
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeripheralStatus {
    Running,
    Idle,
    /// Initialization failed; never scheduled
    Offline,
}

impl fmt::Display for PeripheralStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeripheralStatus::Running => write!(f, "running"),
            PeripheralStatus::Idle => write!(f, "idle"),
            PeripheralStatus::Offline => write!(f, "offline"),
        }
    }
}

/// A periodically stepped collaborator
pub trait Peripheral {
    fn name(&self) -> &str;

    /// One-time hardware setup
    fn init(&mut self) -> Result<(), PeripheralError> {
        Ok(())
    }

    /// Do one slice of work; must return promptly
    fn step(&mut self, now: LogicalTime) -> StepOutcome;

    fn is_busy(&self) -> bool {
        false
    }
}

/// Digital pin access
pub trait DigitalIo {
    fn read(&self, pin: u8) -> bool;
    fn write(&mut self, pin: u8, high: bool);
}

/// One raw input line for status reports
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputState {
    pub label: String,
    pub high: bool,
}

/// Source of raw digital input states
pub trait InputBank {
    fn read_inputs(&self) -> Vec<InputState>;
}

// ---------------------------------------------------------------------------
// Audio

/// Compressed audio stream decoder
pub trait AudioPlayer {
    fn begin(&mut self) -> Result<(), PeripheralError>;
    fn is_running(&self) -> bool;
    /// Decode and output the next chunk
    fn pump(&mut self);
    fn stop(&mut self);
}

/// Feeds the decoder while playing; stops it and asks for a delayed
/// re-check once the stream is done
pub struct AudioPlayback<P> {
    player: P,
}

impl<P: AudioPlayer> AudioPlayback<P> {
    pub fn new(player: P) -> Self {
        AudioPlayback { player }
    }

    pub fn player(&self) -> &P {
        &self.player
    }
}

impl<P: AudioPlayer> Peripheral for AudioPlayback<P> {
    fn name(&self) -> &str {
        "audio"
    }

    fn init(&mut self) -> Result<(), PeripheralError> {
        self.player.begin()
    }

    fn step(&mut self, _now: LogicalTime) -> StepOutcome {
        if self.player.is_running() {
            self.player.pump();
            StepOutcome::Continue
        } else {
            self.player.stop();
            StepOutcome::Finished
        }
    }

    fn is_busy(&self) -> bool {
        self.player.is_running()
    }
}

// ---------------------------------------------------------------------------
// Laser

/// Mirrors the active-low trigger onto the laser outputs
pub struct LaserDrive<G> {
    io: G,
    trigger_pin: u8,
    laser_pins: Vec<u8>,
    firing: bool,
}

impl<G: DigitalIo> LaserDrive<G> {
    pub fn new(io: G, trigger_pin: u8, laser_pins: impl Into<Vec<u8>>) -> Self {
        LaserDrive {
            io,
            trigger_pin,
            laser_pins: laser_pins.into(),
            firing: false,
        }
    }
}

impl<G: DigitalIo> Peripheral for LaserDrive<G> {
    fn name(&self) -> &str {
        "laser"
    }

    fn step(&mut self, _now: LogicalTime) -> StepOutcome {
        let trigger = self.io.read(self.trigger_pin);
        self.firing = !trigger;
        for &pin in &self.laser_pins {
            self.io.write(pin, self.firing);
        }
        StepOutcome::Continue
    }

    fn is_busy(&self) -> bool {
        self.firing
    }
}

// ---------------------------------------------------------------------------
// Pixel strip

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

pub trait PixelStrip {
    fn begin(&mut self) -> Result<(), PeripheralError>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn clear(&mut self);
    fn set_pixel(&mut self, index: usize, color: Rgb);
    fn show(&mut self);
}

/// Marches a single lit pixel along the strip, one position per step
pub struct LedMarch<S> {
    strip: S,
    color: Rgb,
    position: usize,
}

impl<S: PixelStrip> LedMarch<S> {
    pub const DEFAULT_COLOR: Rgb = Rgb(79, 175, 239);

    pub fn new(strip: S) -> Self {
        Self::with_color(strip, Self::DEFAULT_COLOR)
    }

    pub fn with_color(strip: S, color: Rgb) -> Self {
        LedMarch {
            strip,
            color,
            position: 0,
        }
    }

    /// Index that lights up on the next step
    pub fn position(&self) -> usize {
        self.position
    }
}

impl<S: PixelStrip> Peripheral for LedMarch<S> {
    fn name(&self) -> &str {
        "leds"
    }

    fn init(&mut self) -> Result<(), PeripheralError> {
        self.strip.begin()
    }

    fn step(&mut self, _now: LogicalTime) -> StepOutcome {
        if self.strip.is_empty() {
            return StepOutcome::Disable;
        }
        let len = self.strip.len();
        self.strip.clear();
        self.strip.set_pixel(self.position % len, self.color);
        self.strip.show();
        self.position = (self.position + 1) % len;
        StepOutcome::Continue
    }
}

// ---------------------------------------------------------------------------
// Text display

pub trait TextDisplay {
    fn begin(&mut self) -> Result<(), PeripheralError>;
    fn clear(&mut self);
    fn print_line(&mut self, line: &str);
    fn flush(&mut self);
}

/// Shows the mesh time on the status screen
pub struct NodeTimeDisplay<D> {
    display: D,
    banner: String,
}

impl<D: TextDisplay> NodeTimeDisplay<D> {
    pub fn new(display: D) -> Self {
        Self::with_banner(display, "Hardware Verification!")
    }

    pub fn with_banner(display: D, banner: impl Into<String>) -> Self {
        NodeTimeDisplay {
            display,
            banner: banner.into(),
        }
    }
}

impl<D: TextDisplay> Peripheral for NodeTimeDisplay<D> {
    fn name(&self) -> &str {
        "display"
    }

    fn init(&mut self) -> Result<(), PeripheralError> {
        self.display.begin()?;
        self.display.flush();
        Ok(())
    }

    fn step(&mut self, now: LogicalTime) -> StepOutcome {
        self.display.clear();
        self.display.print_line(&format!("Node Time: {}", now));
        self.display.print_line("");
        self.display.print_line(&self.banner);
        self.display.flush();
        StepOutcome::Continue
    }
}

// ---------------------------------------------------------------------------
// Inputs

/// Labelled digital inputs read straight from pins
pub struct GpioInputs<G> {
    io: G,
    inputs: Vec<(String, u8)>,
}

impl<G: DigitalIo> GpioInputs<G> {
    pub fn new(io: G) -> Self {
        GpioInputs {
            io,
            inputs: Vec::new(),
        }
    }

    pub fn with_input(mut self, label: impl Into<String>, pin: u8) -> Self {
        self.inputs.push((label.into(), pin));
        self
    }
}

impl<G: DigitalIo> InputBank for GpioInputs<G> {
    fn read_inputs(&self) -> Vec<InputState> {
        self.inputs
            .iter()
            .map(|(label, pin)| InputState {
                label: label.clone(),
                high: self.io.read(*pin),
            })
            .collect()
    }
}
