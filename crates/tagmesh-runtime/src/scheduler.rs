//! Cooperative scheduler
//!
//! Tasks are periodic callbacks examined in registration order. Each
//! `tick(now)` runs every due task to completion, at most once, before
//! returning. There is no preemption: a task that overruns only delays the
//! ones after it.
//!
//! Per-task state machine:
//!
//! ```text
//! Disabled --enable--> Waiting --now >= next_due--> Due --run--> Waiting
//!     ^                                                  |
//!     +------------- disable / one-shot done ------------+
//! ```
//!
//! A task changes its own (or another task's) schedule through the
//! `TaskControl` handed to its callback. Those changes are applied as soon as
//! the callback returns, before the next task is checked.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tagmesh_core::LogicalTime;
use tracing::{debug, trace};

use crate::SchedulerError;

/// Handle to a registered task
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(usize);

impl TaskId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How many times a task runs once enabled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Iterations {
    Forever,
    Once,
}

/// Task callback: receives the shared context and its control handle
pub type TaskFn<C> = Box<dyn FnMut(&mut C, &mut TaskControl)>;

/// Scheduler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// A task more than this many periods behind skips ahead instead of
    /// catching up one run per tick
    pub max_lag_periods: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig { max_lag_periods: 4 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub runs: u64,
    /// Times a lagging task skipped missed periods
    pub skips: u64,
}

/// Snapshot of one task's schedule
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub period: Duration,
    pub next_due: LogicalTime,
    pub enabled: bool,
    pub iterations: Iterations,
    pub runs: u64,
}

#[derive(Debug)]
enum Command {
    Disable(TaskId),
    Enable(TaskId),
    RestartDelayed(TaskId, Duration),
    SetPeriod(TaskId, Duration),
}

/// Schedule changes requested by a running task
#[derive(Debug)]
pub struct TaskControl {
    current: TaskId,
    now: LogicalTime,
    commands: Vec<Command>,
}

impl TaskControl {
    fn new(current: TaskId, now: LogicalTime) -> Self {
        TaskControl {
            current,
            now,
            commands: Vec::new(),
        }
    }

    /// Tick time the task is running at
    #[inline]
    pub fn now(&self) -> LogicalTime {
        self.now
    }

    /// Id of the running task
    #[inline]
    pub fn task_id(&self) -> TaskId {
        self.current
    }

    /// Stop the running task after this run
    pub fn disable(&mut self) {
        self.commands.push(Command::Disable(self.current));
    }

    /// Run the current task again `delay` after now
    pub fn restart_delayed(&mut self, delay: Duration) {
        self.commands
            .push(Command::RestartDelayed(self.current, delay));
    }

    pub fn set_period(&mut self, period: Duration) {
        self.commands.push(Command::SetPeriod(self.current, period));
    }

    pub fn enable_task(&mut self, id: TaskId) {
        self.commands.push(Command::Enable(id));
    }

    pub fn disable_task(&mut self, id: TaskId) {
        self.commands.push(Command::Disable(id));
    }
}

struct Task<C> {
    name: String,
    period: Duration,
    next_due: LogicalTime,
    enabled: bool,
    iterations: Iterations,
    runs: u64,
    callback: TaskFn<C>,
}

/// Cooperative scheduler over a shared context `C`
pub struct Scheduler<C> {
    tasks: Vec<Option<Task<C>>>,
    config: SchedulerConfig,
    stats: SchedulerStats,
}

impl<C> Scheduler<C> {
    pub fn new(config: SchedulerConfig) -> Self {
        Scheduler {
            tasks: Vec::new(),
            config,
            stats: SchedulerStats::default(),
        }
    }

    /// Register a task; it starts disabled
    pub fn add_task<F>(
        &mut self,
        name: impl Into<String>,
        period: Duration,
        iterations: Iterations,
        callback: F,
    ) -> TaskId
    where
        F: FnMut(&mut C, &mut TaskControl) + 'static,
    {
        let id = TaskId(self.tasks.len());
        let name = name.into();
        debug!(task = %id, name = %name, period_ms = period.as_millis() as u64, "task registered");
        self.tasks.push(Some(Task {
            name,
            period,
            next_due: LogicalTime::ZERO,
            enabled: false,
            iterations,
            runs: 0,
            callback: Box::new(callback),
        }));
        id
    }

    /// Register a periodic task that needs neither context nor control
    pub fn add_fn<F>(&mut self, name: impl Into<String>, period: Duration, mut callback: F) -> TaskId
    where
        F: FnMut() + 'static,
    {
        self.add_task(name, period, Iterations::Forever, move |_, _| callback())
    }

    /// Enable a task, due immediately
    pub fn enable(&mut self, id: TaskId, now: LogicalTime) -> Result<(), SchedulerError> {
        self.enable_delayed(id, now, Duration::ZERO)
    }

    /// Enable a task, first due `delay` after `now`
    pub fn enable_delayed(
        &mut self,
        id: TaskId,
        now: LogicalTime,
        delay: Duration,
    ) -> Result<(), SchedulerError> {
        let task = self.task_mut(id)?;
        task.enabled = true;
        task.next_due = now + delay;
        Ok(())
    }

    /// Same as `enable_delayed`; reads better when the task was already running
    pub fn restart_delayed(
        &mut self,
        id: TaskId,
        now: LogicalTime,
        delay: Duration,
    ) -> Result<(), SchedulerError> {
        self.enable_delayed(id, now, delay)
    }

    pub fn disable(&mut self, id: TaskId) -> Result<(), SchedulerError> {
        self.task_mut(id)?.enabled = false;
        Ok(())
    }

    /// Remove a task; its id is never reused
    pub fn remove(&mut self, id: TaskId) -> Result<(), SchedulerError> {
        self.task_mut(id)?;
        self.tasks[id.0] = None;
        Ok(())
    }

    pub fn set_period(&mut self, id: TaskId, period: Duration) -> Result<(), SchedulerError> {
        self.task_mut(id)?.period = period;
        Ok(())
    }

    pub fn is_enabled(&self, id: TaskId) -> bool {
        self.task(id).map_or(false, |t| t.enabled)
    }

    pub fn task_info(&self, id: TaskId) -> Option<TaskInfo> {
        self.task(id).map(|t| TaskInfo {
            id,
            name: t.name.clone(),
            period: t.period,
            next_due: t.next_due,
            enabled: t.enabled,
            iterations: t.iterations,
            runs: t.runs,
        })
    }

    /// Registered task ids in registration order
    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_some())
            .map(|(i, _)| TaskId(i))
    }

    pub fn len(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Run every due task once, in registration order
    ///
    /// Returns the number of tasks executed.
    pub fn tick(&mut self, now: LogicalTime, ctx: &mut C) -> usize {
        self.stats.ticks += 1;
        let mut executed = 0;

        for index in 0..self.tasks.len() {
            let id = TaskId(index);
            let commands = {
                let task = match self.tasks[index].as_mut() {
                    Some(task) if task.enabled && now >= task.next_due => task,
                    _ => continue,
                };

                let mut control = TaskControl::new(id, now);
                (task.callback)(ctx, &mut control);
                task.runs += 1;

                match task.iterations {
                    Iterations::Once => task.enabled = false,
                    Iterations::Forever => {
                        if advance(task, now, self.config.max_lag_periods) {
                            self.stats.skips += 1;
                            debug!(task = %id, name = %task.name, "task lagging, skipping missed runs");
                        }
                    }
                }
                trace!(task = %id, next_due = %task.next_due, "task ran");
                control.commands
            };

            executed += 1;
            self.stats.runs += 1;
            self.apply(commands, now);
        }

        executed
    }

    fn apply(&mut self, commands: Vec<Command>, now: LogicalTime) {
        for command in commands {
            let result = match command {
                Command::Disable(id) => self.disable(id),
                Command::Enable(id) => self.enable(id, now),
                Command::RestartDelayed(id, delay) => self.restart_delayed(id, now, delay),
                Command::SetPeriod(id, period) => self.set_period(id, period),
            };
            if let Err(e) = result {
                debug!(error = %e, "ignoring schedule change for missing task");
            }
        }
    }

    fn task(&self, id: TaskId) -> Option<&Task<C>> {
        self.tasks.get(id.0).and_then(Option::as_ref)
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut Task<C>, SchedulerError> {
        self.tasks
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(SchedulerError::UnknownTask(id))
    }
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

/// Move a periodic task's due time forward; returns true if it skipped ahead
fn advance<C>(task: &mut Task<C>, now: LogicalTime, max_lag_periods: u32) -> bool {
    task.next_due = task.next_due + task.period;
    if task.period.is_zero() {
        return false;
    }
    let max_lag = task.period.saturating_mul(max_lag_periods);
    if now.saturating_duration_since(task.next_due) > max_lag {
        task.next_due = now + task.period;
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn t(ms: u64) -> LogicalTime {
        LogicalTime::from_millis(ms)
    }

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    type Log = Vec<(&'static str, u64)>;

    fn logging_task(scheduler: &mut Scheduler<Log>, name: &'static str, period: u64) -> TaskId {
        scheduler.add_task(name, ms(period), Iterations::Forever, move |log, ctl| {
            log.push((name, ctl.now().as_millis()))
        })
    }

    #[test]
    fn test_tasks_start_disabled() {
        let mut scheduler = Scheduler::default();
        let id = logging_task(&mut scheduler, "a", 10);
        let mut log = Log::new();

        assert_eq!(scheduler.tick(t(0), &mut log), 0);
        assert!(!scheduler.is_enabled(id));
        assert!(log.is_empty());
    }

    #[test]
    fn test_registration_order_and_period() {
        let mut scheduler = Scheduler::default();
        let a = logging_task(&mut scheduler, "a", 10);
        let b = logging_task(&mut scheduler, "b", 25);
        scheduler.enable(b, t(0)).unwrap();
        scheduler.enable(a, t(0)).unwrap();

        let mut log = Log::new();
        for now in (0..=50).step_by(5) {
            scheduler.tick(t(now), &mut log);
        }

        assert_eq!(
            log,
            vec![
                ("a", 0),
                ("b", 0),
                ("a", 10),
                ("a", 20),
                ("b", 25),
                ("a", 30),
                ("a", 40),
                ("a", 50),
                ("b", 50),
            ]
        );
    }

    #[test]
    fn test_catch_up_never_twice_per_tick() {
        let mut scheduler = Scheduler::default();
        let a = logging_task(&mut scheduler, "a", 10);
        scheduler.enable(a, t(0)).unwrap();

        let mut log = Log::new();
        scheduler.tick(t(0), &mut log);
        // 35 ms late: three missed periods, caught up one per tick
        assert_eq!(scheduler.tick(t(35), &mut log), 1);
        assert_eq!(scheduler.tick(t(36), &mut log), 1);
        assert_eq!(scheduler.tick(t(37), &mut log), 1);
        assert_eq!(scheduler.tick(t(38), &mut log), 0);
        assert_eq!(scheduler.task_info(a).unwrap().next_due, t(40));
    }

    #[test]
    fn test_large_lag_skips_ahead() {
        let mut scheduler = Scheduler::default();
        let a = logging_task(&mut scheduler, "a", 10);
        scheduler.enable(a, t(0)).unwrap();

        let mut log = Log::new();
        scheduler.tick(t(0), &mut log);
        scheduler.tick(t(1_000), &mut log);

        assert_eq!(scheduler.task_info(a).unwrap().next_due, t(1_010));
        assert_eq!(scheduler.stats().skips, 1);
        assert_eq!(scheduler.tick(t(1_005), &mut log), 0);
    }

    #[test]
    fn test_disable_from_own_callback() {
        let mut scheduler: Scheduler<u32> = Scheduler::default();
        let id = scheduler.add_task("self-stop", ms(10), Iterations::Forever, |count, ctl| {
            *count += 1;
            if *count == 3 {
                ctl.disable();
            }
        });
        scheduler.enable(id, t(0)).unwrap();

        let mut count = 0;
        for now in (0..200).step_by(10) {
            scheduler.tick(t(now), &mut count);
        }
        assert_eq!(count, 3);
        assert!(!scheduler.is_enabled(id));

        // Re-enabling makes it due relative to the enable time
        scheduler.enable(id, t(500)).unwrap();
        scheduler.tick(t(499), &mut count);
        assert_eq!(count, 3);
        scheduler.tick(t(500), &mut count);
        assert_eq!(count, 4);
    }

    #[test]
    fn test_disable_other_task_before_its_check() {
        let mut scheduler = Scheduler::default();
        let second = TaskId(1);
        let first = scheduler.add_task("first", ms(10), Iterations::Forever, move |log: &mut Log, ctl| {
            log.push(("first", ctl.now().as_millis()));
            ctl.disable_task(second);
        });
        let second_id = logging_task(&mut scheduler, "second", 10);
        assert_eq!(second, second_id);

        scheduler.enable(first, t(0)).unwrap();
        scheduler.enable(second, t(0)).unwrap();

        let mut log = Log::new();
        scheduler.tick(t(0), &mut log);
        assert_eq!(log, vec![("first", 0)]);
    }

    #[test]
    fn test_restart_delayed_from_callback() {
        let mut scheduler: Scheduler<Vec<u64>> = Scheduler::default();
        let id = scheduler.add_task("audio", ms(10), Iterations::Forever, |runs, ctl| {
            runs.push(ctl.now().as_millis());
            if runs.len() == 2 {
                ctl.restart_delayed(Duration::from_secs(5));
            }
        });
        scheduler.enable(id, t(0)).unwrap();

        let mut runs = Vec::new();
        for now in (0..=6_000).step_by(10) {
            scheduler.tick(t(now), &mut runs);
        }

        assert_eq!(&runs[..3], &[0, 10, 5_010]);
    }

    #[test]
    fn test_one_shot() {
        let mut scheduler = Scheduler::default();
        let id = scheduler.add_task("once", ms(10), Iterations::Once, |log: &mut Log, ctl| {
            log.push(("once", ctl.now().as_millis()))
        });
        scheduler.enable_delayed(id, t(0), ms(30)).unwrap();

        let mut log = Log::new();
        for now in (0..100).step_by(10) {
            scheduler.tick(t(now), &mut log);
        }
        assert_eq!(log, vec![("once", 30)]);
        assert!(!scheduler.is_enabled(id));
    }

    #[test]
    fn test_unknown_and_removed_tasks() {
        let mut scheduler: Scheduler<()> = Scheduler::default();
        let id = scheduler.add_fn("noop", ms(10), || {});
        scheduler.remove(id).unwrap();

        assert_eq!(scheduler.enable(id, t(0)), Err(SchedulerError::UnknownTask(id)));
        assert!(scheduler.task_info(id).is_none());
        assert!(scheduler.is_empty());

        let next = scheduler.add_fn("next", ms(10), || {});
        assert_ne!(id, next);
    }

    proptest! {
        #[test]
        fn prop_runs_once_per_period_window(
            period in 1u64..100,
            gaps in proptest::collection::vec(0u64..100, 1..200),
        ) {
            let mut scheduler: Scheduler<u64> = Scheduler::default();
            let id = scheduler.add_task("p", ms(period), Iterations::Forever, |runs, _| *runs += 1);
            scheduler.enable(id, t(0)).unwrap();

            let mut runs = 0u64;
            let mut now = 0u64;
            scheduler.tick(t(now), &mut runs);

            for gap in gaps {
                // Keep every gap within one period
                now += gap % (period + 1);
                let before = runs;
                scheduler.tick(t(now), &mut runs);
                prop_assert!(runs - before <= 1);
            }

            prop_assert_eq!(runs, now / period + 1);
        }
    }
}
