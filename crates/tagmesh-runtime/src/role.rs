//! Role coordinator
//!
//! A node is either a Controller (status display, laser drive, buttons) or a
//! Target (pixel strip, phototransistor). Both play audio and print a status
//! report. The coordinator turns the role's task plan into scheduler tasks
//! once at startup and keeps no state of its own afterwards.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tagmesh_core::LogicalTime;
use tracing::{debug, info, warn};

use crate::{
    InputBank, Iterations, NodeState, Peripheral, PeripheralSlot, PeripheralStatus, Scheduler,
    TaskControl, TaskId,
};

/// Pin assignments of the hardware verification boards
pub mod pins {
    pub const LEFT_MENU: u8 = 36;
    pub const RIGHT_MENU: u8 = 37;
    pub const TRIGGER: u8 = 4;
    pub const LASERS: [u8; 3] = [12, 13, 15];
    pub const PHOTOTRANSISTOR: u8 = 18;
    pub const LED_DATA: u8 = 2;
    pub const LED_COUNT: usize = 30;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Controller,
    Target,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::Controller => "Controller",
            Role::Target => "Target",
        }
    }

    /// Labelled digital inputs shown in the status report
    pub fn inputs(self) -> &'static [(&'static str, u8)] {
        match self {
            Role::Controller => &[
                ("Left Menu", pins::LEFT_MENU),
                ("Right Menu", pins::RIGHT_MENU),
                ("Trigger", pins::TRIGGER),
            ],
            Role::Target => &[("Phototrans State", pins::PHOTOTRANSISTOR)],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Task periods (ms)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleTimings {
    pub status_report_ms: u64,
    pub audio_ms: u64,
    /// Delay before re-checking audio once playback stopped
    pub audio_restart_ms: u64,
    pub display_ms: u64,
    pub laser_ms: u64,
    pub leds_ms: u64,
}

impl Default for RoleTimings {
    fn default() -> Self {
        RoleTimings {
            status_report_ms: 1000,
            audio_ms: 10,
            audio_restart_ms: 5000,
            display_ms: 1000,
            laser_ms: 17,
            leds_ms: 1000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub role: Role,
    #[serde(default)]
    pub timings: RoleTimings,
}

impl RoleConfig {
    pub fn controller() -> Self {
        RoleConfig {
            role: Role::Controller,
            timings: RoleTimings::default(),
        }
    }

    pub fn target() -> Self {
        RoleConfig {
            role: Role::Target,
            timings: RoleTimings::default(),
        }
    }

    /// Peripheral tasks this role runs, in registration order
    pub fn task_plan(&self) -> Vec<TaskSpec> {
        let t = &self.timings;
        let audio = TaskSpec {
            kind: PeripheralKind::Audio,
            period: Duration::from_millis(t.audio_ms),
            restart_delay: Duration::from_millis(t.audio_restart_ms),
        };
        match self.role {
            Role::Controller => vec![
                audio,
                TaskSpec::periodic(PeripheralKind::Display, t.display_ms),
                TaskSpec::periodic(PeripheralKind::Laser, t.laser_ms),
            ],
            Role::Target => vec![audio, TaskSpec::periodic(PeripheralKind::Leds, t.leds_ms)],
        }
    }

    #[inline]
    pub fn status_period(&self) -> Duration {
        Duration::from_millis(self.timings.status_report_ms)
    }
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self::target()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeripheralKind {
    Audio,
    Display,
    Laser,
    Leds,
}

impl PeripheralKind {
    pub fn name(self) -> &'static str {
        match self {
            PeripheralKind::Audio => "audio",
            PeripheralKind::Display => "display",
            PeripheralKind::Laser => "laser",
            PeripheralKind::Leds => "leds",
        }
    }
}

/// One planned peripheral task
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskSpec {
    pub kind: PeripheralKind,
    pub period: Duration,
    /// Used when the peripheral reports `Finished`
    pub restart_delay: Duration,
}

impl TaskSpec {
    fn periodic(kind: PeripheralKind, period_ms: u64) -> Self {
        let period = Duration::from_millis(period_ms);
        TaskSpec {
            kind,
            period,
            restart_delay: period,
        }
    }
}

/// Collaborators fitted to this board
#[derive(Default)]
pub struct Hardware {
    pub audio: Option<Box<dyn Peripheral>>,
    pub display: Option<Box<dyn Peripheral>>,
    pub laser: Option<Box<dyn Peripheral>>,
    pub leds: Option<Box<dyn Peripheral>>,
    pub inputs: Option<Box<dyn InputBank>>,
}

impl Hardware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_audio(mut self, audio: impl Peripheral + 'static) -> Self {
        self.audio = Some(Box::new(audio));
        self
    }

    pub fn with_display(mut self, display: impl Peripheral + 'static) -> Self {
        self.display = Some(Box::new(display));
        self
    }

    pub fn with_laser(mut self, laser: impl Peripheral + 'static) -> Self {
        self.laser = Some(Box::new(laser));
        self
    }

    pub fn with_leds(mut self, leds: impl Peripheral + 'static) -> Self {
        self.leds = Some(Box::new(leds));
        self
    }

    pub fn with_inputs(mut self, inputs: impl InputBank + 'static) -> Self {
        self.inputs = Some(Box::new(inputs));
        self
    }

    fn take(&mut self, kind: PeripheralKind) -> Option<Box<dyn Peripheral>> {
        match kind {
            PeripheralKind::Audio => self.audio.take(),
            PeripheralKind::Display => self.display.take(),
            PeripheralKind::Laser => self.laser.take(),
            PeripheralKind::Leds => self.leds.take(),
        }
    }
}

/// Registers a role's tasks on a scheduler
pub struct RoleCoordinator;

impl RoleCoordinator {
    /// Register and enable the status report and every fitted peripheral
    ///
    /// A peripheral that fails to initialize is registered but never
    /// enabled and reports `offline`. Returns the registered task ids.
    pub fn install(
        config: &RoleConfig,
        mut hardware: Hardware,
        scheduler: &mut Scheduler<NodeState>,
        state: &mut NodeState,
        now: LogicalTime,
    ) -> Vec<TaskId> {
        let mut tasks = Vec::new();

        let status = scheduler.add_task(
            "status",
            config.status_period(),
            Iterations::Forever,
            |state: &mut NodeState, _: &mut TaskControl| state.report_status(),
        );
        enable(scheduler, status, now);
        tasks.push(status);

        state.inputs = hardware.inputs.take();

        for spec in config.task_plan() {
            match hardware.take(spec.kind) {
                Some(peripheral) => {
                    tasks.push(Self::install_peripheral(spec, peripheral, scheduler, state, now))
                }
                None => warn!(role = %config.role, peripheral = spec.kind.name(), "peripheral not fitted"),
            }
        }

        for kind in [
            PeripheralKind::Audio,
            PeripheralKind::Display,
            PeripheralKind::Laser,
            PeripheralKind::Leds,
        ] {
            if hardware.take(kind).is_some() {
                debug!(role = %config.role, peripheral = kind.name(), "peripheral unused by role");
            }
        }

        info!(role = %config.role, tasks = tasks.len(), "role installed");
        tasks
    }

    fn install_peripheral(
        spec: TaskSpec,
        mut peripheral: Box<dyn Peripheral>,
        scheduler: &mut Scheduler<NodeState>,
        state: &mut NodeState,
        now: LogicalTime,
    ) -> TaskId {
        let index = state.peripherals.len();
        let name = peripheral.name().to_string();

        let id = scheduler.add_task(
            name.clone(),
            spec.period,
            Iterations::Forever,
            move |state: &mut NodeState, ctl: &mut TaskControl| state.step_peripheral(index, ctl),
        );

        let status = match peripheral.init() {
            Ok(()) => {
                enable(scheduler, id, now);
                info!(peripheral = %name, "peripheral ready");
                if peripheral.is_busy() {
                    PeripheralStatus::Running
                } else {
                    PeripheralStatus::Idle
                }
            }
            Err(e) => {
                warn!(peripheral = %name, error = %e, "peripheral init failed");
                PeripheralStatus::Offline
            }
        };

        state.peripherals.push(PeripheralSlot {
            peripheral,
            status,
            restart_delay: spec.restart_delay,
            task: id,
        });
        id
    }
}

fn enable(scheduler: &mut Scheduler<NodeState>, id: TaskId, now: LogicalTime) {
    if let Err(e) = scheduler.enable(id, now) {
        warn!(error = %e, "failed to enable task");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_plan() {
        let plan = RoleConfig::controller().task_plan();
        let kinds: Vec<_> = plan.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![PeripheralKind::Audio, PeripheralKind::Display, PeripheralKind::Laser]
        );
        assert_eq!(plan[0].period, Duration::from_millis(10));
        assert_eq!(plan[0].restart_delay, Duration::from_secs(5));
        assert_eq!(plan[2].period, Duration::from_millis(17));
    }

    #[test]
    fn test_target_plan() {
        let plan = RoleConfig::target().task_plan();
        let kinds: Vec<_> = plan.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![PeripheralKind::Audio, PeripheralKind::Leds]);
        assert_eq!(plan[1].period, Duration::from_secs(1));
    }

    #[test]
    fn test_role_inputs() {
        let labels: Vec<_> = Role::Controller.inputs().iter().map(|(l, _)| *l).collect();
        assert_eq!(labels, vec!["Left Menu", "Right Menu", "Trigger"]);
        assert_eq!(Role::Target.inputs(), &[("Phototrans State", 18)]);
    }

    #[test]
    fn test_role_config_json() {
        let config: RoleConfig = serde_json::from_str(r#"{"role":"controller"}"#).unwrap();
        assert_eq!(config, RoleConfig::controller());
    }
}
