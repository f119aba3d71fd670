//! The execution actor.
//!
//! One tokio task owns the [`Session`] and is the only thing that ever runs
//! the interpreter. It consumes [`Command`]s from a queue and holds at most
//! one scheduled continuation: keep running, keep stepping, or end the
//! post-run cooldown. After every command or continuation it publishes a
//! [`Snapshot`] on a watch channel for the UI.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::api::ActionApi;
use crate::bridge::ActionStatus;
use crate::config::RunnerConfig;
use crate::error::SchedulerError;
use crate::session::{Outcome, ProgramChange, Progress, Session};

/// Requests to the execution actor.
#[derive(Debug)]
pub enum Command {
    Edit(ProgramChange),
    /// The step control: start a run if idle, then advance to the next block.
    Step,
    /// The run control: run to completion.
    Run,
    Reset,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Idle,
    /// Advancing towards the next block in Step Mode.
    Stepping,
    /// Halted on a highlighted block, waiting for the next step.
    Paused,
    Running,
    /// A run just ended; controls come back shortly.
    Cooldown,
}

/// What the UI shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub mode: Mode,
    pub step_enabled: bool,
    pub run_enabled: bool,
    pub current_block: Option<String>,
    pub paused: bool,
    pub transcript: Vec<String>,
    pub action: Option<ActionStatus>,
    pub outcome: Option<Outcome>,
    pub compile_error: Option<String>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            mode: Mode::Idle,
            step_enabled: true,
            run_enabled: true,
            current_block: None,
            paused: false,
            transcript: Vec::new(),
            action: None,
            outcome: None,
            compile_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Continuation {
    Step,
    Run,
    Cooldown,
}

enum Event {
    Command(Option<Command>),
    Due(Continuation),
}

pub struct Scheduler<A> {
    session: Session<A>,
    commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<Snapshot>,
    next: Option<(Continuation, Instant)>,
    mode: Mode,
    controls_enabled: bool,
    run_tick: Duration,
    cooldown: Duration,
    slice_budget: usize,
}

impl<A: ActionApi> Scheduler<A> {
    /// Start the actor on the current runtime.
    pub fn spawn(session: Session<A>, config: &RunnerConfig) -> (SchedulerHandle, JoinHandle<()>) {
        let (command_tx, commands) = mpsc::channel(32);
        let (snapshots, snapshot_rx) = watch::channel(Snapshot::default());
        let scheduler = Scheduler {
            session,
            commands,
            snapshots,
            next: None,
            mode: Mode::Idle,
            controls_enabled: true,
            run_tick: config.run_tick(),
            cooldown: config.cooldown(),
            slice_budget: config.slice_budget.max(1),
        };
        let task = tokio::spawn(scheduler.run());
        let handle = SchedulerHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        };
        (handle, task)
    }

    async fn run(mut self) {
        self.publish();
        loop {
            let event = match self.next {
                Some((continuation, deadline)) => tokio::select! {
                    biased;
                    command = self.commands.recv() => Event::Command(command),
                    _ = time::sleep_until(deadline) => Event::Due(continuation),
                },
                None => Event::Command(self.commands.recv().await),
            };

            match event {
                Event::Command(None) | Event::Command(Some(Command::Shutdown)) => break,
                Event::Command(Some(command)) => self.handle(command),
                Event::Due(continuation) => {
                    self.next = None;
                    self.resume(continuation);
                }
            }
            self.publish();
        }
        self.session.reset();
        debug!("scheduler stopped");
    }

    fn handle(&mut self, command: Command) {
        debug!(?command, mode = ?self.mode, "command");
        match command {
            Command::Edit(ProgramChange::Ui) => {}
            Command::Edit(change) => {
                self.cancel();
                // The failure is kept on the session and shown in snapshots.
                let _ = self.session.apply(change);
                debug!(blocks = self.session.program().block_count(), "program replaced");
            }
            Command::Step => {
                if !self.controls_enabled {
                    debug!("step ignored while busy");
                    return;
                }
                if !self.begin() {
                    return;
                }
                self.session.clear_pause();
                self.mode = Mode::Stepping;
                self.advance_step();
            }
            Command::Run => {
                if !self.controls_enabled {
                    debug!("run ignored while busy");
                    return;
                }
                if !self.begin() {
                    return;
                }
                self.mode = Mode::Running;
                self.advance_run();
            }
            Command::Reset => {
                self.cancel();
                self.session.reset();
            }
            Command::Shutdown => {}
        }
    }

    /// Start a run unless one is already in progress.
    fn begin(&mut self) -> bool {
        self.controls_enabled = false;
        if self.session.is_active() || self.session.start() {
            return true;
        }
        warn!("run could not start");
        self.finish();
        false
    }

    fn resume(&mut self, continuation: Continuation) {
        match continuation {
            Continuation::Step => self.advance_step(),
            Continuation::Run => self.advance_run(),
            Continuation::Cooldown => {
                self.mode = Mode::Idle;
                self.controls_enabled = true;
            }
        }
    }

    /// Advance until the next highlight pause. An action in flight is
    /// checked again after a run tick.
    fn advance_step(&mut self) {
        for _ in 0..self.slice_budget {
            match self.session.tick() {
                Progress::Advanced if self.session.highlight().is_paused() => {
                    self.mode = Mode::Paused;
                    self.controls_enabled = true;
                    return;
                }
                Progress::Advanced => {}
                Progress::Waiting => {
                    self.schedule(Continuation::Step, self.run_tick);
                    return;
                }
                Progress::Finished => {
                    self.finish();
                    return;
                }
            }
        }
        // No block boundary within the budget; yield so commands get through.
        self.schedule(Continuation::Step, Duration::ZERO);
    }

    fn advance_run(&mut self) {
        match self.session.run_slice() {
            Progress::Advanced | Progress::Waiting => {
                self.schedule(Continuation::Run, self.run_tick);
            }
            Progress::Finished => self.finish(),
        }
    }

    fn finish(&mut self) {
        if let Some(outcome) = self.session.outcome() {
            info!(outcome = %outcome.banner(), "run ended");
        }
        self.mode = Mode::Cooldown;
        self.controls_enabled = false;
        self.schedule(Continuation::Cooldown, self.cooldown);
    }

    /// Drop the scheduled continuation and go back to idle. A post-run
    /// cooldown is left to run out.
    fn cancel(&mut self) {
        if matches!(self.next, Some((Continuation::Cooldown, _))) {
            return;
        }
        self.next = None;
        self.mode = Mode::Idle;
        self.controls_enabled = true;
    }

    fn schedule(&mut self, continuation: Continuation, after: Duration) {
        self.next = Some((continuation, Instant::now() + after));
    }

    fn publish(&self) {
        let highlight = self.session.highlight();
        self.snapshots.send_replace(Snapshot {
            mode: self.mode,
            step_enabled: self.controls_enabled,
            run_enabled: self.controls_enabled,
            current_block: highlight.current().map(str::to_string),
            paused: highlight.is_paused(),
            transcript: self.session.transcript().to_vec(),
            action: self.session.action_status(),
            outcome: self.session.outcome().cloned(),
            compile_error: self.session.compile_error().map(str::to_string),
        });
    }
}

/// Cheap handle for sending commands and observing snapshots.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Snapshot>,
}

impl SchedulerHandle {
    pub async fn send(&self, command: Command) -> Result<(), SchedulerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SchedulerError::Closed)
    }

    pub async fn edit(&self, change: ProgramChange) -> Result<(), SchedulerError> {
        self.send(Command::Edit(change)).await
    }

    pub async fn step(&self) -> Result<(), SchedulerError> {
        self.send(Command::Step).await
    }

    pub async fn run(&self) -> Result<(), SchedulerError> {
        self.send(Command::Run).await
    }

    pub async fn reset(&self) -> Result<(), SchedulerError> {
        self.send(Command::Reset).await
    }

    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.send(Command::Shutdown).await
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&Snapshot) -> bool,
    ) -> Result<Snapshot, SchedulerError> {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| SchedulerError::Closed)?;
        Ok(snapshot.clone())
    }
}
