//! Program lifecycle for one editing session.
//!
//! A [`Session`] owns the block program, its compiled text, the live
//! interpreter (if a run is in progress), the highlight, the one outstanding
//! action and the output transcript. The scheduler decides *when* to advance;
//! the session decides *what* advancing means.

use std::collections::VecDeque;

use imblock_compiler::{compile, BlockProgram, CompileError, CompiledProgram};
use imblock_eval::{Host, Interpreter, Step, Value};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::ActionApi;
use crate::bridge::{ActionBridge, ActionStatus, PendingAction, Resolution};
use crate::config::{FailurePolicy, RunnerConfig};
use crate::highlight::HighlightState;

/// An edit reported by the block editor.
#[derive(Debug, Clone)]
pub enum ProgramChange {
    /// Selection, scrolling, zoom: nothing that changes the program.
    Ui,
    /// The program itself changed.
    Structural(BlockProgram),
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum Outcome {
    Completed { failed_actions: usize },
    Failed { message: String },
}

impl Outcome {
    /// Terminal line written to the transcript.
    pub fn banner(&self) -> String {
        match self {
            Outcome::Completed { failed_actions: 0 } => "<< Program complete >>".to_string(),
            Outcome::Completed { failed_actions } => {
                format!("<< Program complete ({} action(s) failed) >>", failed_actions)
            }
            Outcome::Failed { message } => format!("<< Program failed: {} >>", message),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

/// Result of advancing a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Units executed; more remain.
    Advanced,
    /// An action is in flight.
    Waiting,
    /// The run is over (or none was active).
    Finished,
}

/// Answers `prompt` calls.
pub trait Prompter: Send {
    fn prompt(&mut self, message: &str, numeric: bool) -> Option<String>;
}

/// Never answers; every prompt yields `null`.
#[derive(Debug, Default)]
pub struct NoPrompter;

impl Prompter for NoPrompter {
    fn prompt(&mut self, _message: &str, _numeric: bool) -> Option<String> {
        None
    }
}

/// Answers prompts from a fixed list, then gives up.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn prompt(&mut self, _message: &str, _numeric: bool) -> Option<String> {
        self.answers.pop_front()
    }
}

/// The interpreter's view of the session while it executes a unit.
struct SessionHost<'a> {
    transcript: &'a mut Vec<String>,
    highlight: &'a mut HighlightState,
    prompter: &'a mut dyn Prompter,
}

impl Host for SessionHost<'_> {
    fn print(&mut self, text: &str) {
        self.transcript.push(text.to_string());
    }

    fn prompt(&mut self, message: &str, numeric: bool) -> Option<String> {
        self.prompter.prompt(message, numeric)
    }

    fn mark(&mut self, block_id: &str) {
        self.highlight.mark(block_id);
    }
}

pub struct Session<A> {
    bridge: ActionBridge<A>,
    policy: FailurePolicy,
    slice_budget: usize,
    program: BlockProgram,
    compiled: Result<CompiledProgram, String>,
    interpreter: Option<Interpreter>,
    highlight: HighlightState,
    pending: Option<PendingAction>,
    transcript: Vec<String>,
    outcome: Option<Outcome>,
    failed_actions: usize,
    prompter: Box<dyn Prompter>,
}

impl<A: ActionApi> Session<A> {
    /// A session with an empty program.
    pub fn new(bridge: ActionBridge<A>, config: &RunnerConfig) -> Self {
        Self {
            bridge,
            policy: config.failure_policy,
            slice_budget: config.slice_budget.max(1),
            program: BlockProgram::new(),
            compiled: Ok(CompiledProgram::default()),
            interpreter: None,
            highlight: HighlightState::new(),
            pending: None,
            transcript: Vec::new(),
            outcome: None,
            failed_actions: 0,
            prompter: Box::new(NoPrompter),
        }
    }

    pub fn with_prompter(mut self, prompter: impl Prompter + 'static) -> Self {
        self.prompter = Box::new(prompter);
        self
    }

    /// Apply an editor change. Structural changes end any run, recompile and
    /// clear the transcript; the compile error, if any, is also kept until the
    /// next structural change.
    pub fn apply(&mut self, change: ProgramChange) -> Result<(), CompileError> {
        let program = match change {
            ProgramChange::Ui => return Ok(()),
            ProgramChange::Structural(program) => program,
        };

        self.reset();
        self.transcript.clear();
        self.outcome = None;
        let result = compile(&program);
        self.program = program;
        match result {
            Ok(compiled) => {
                debug!(marks = compiled.block_ids.len(), "program recompiled");
                self.compiled = Ok(compiled);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "program does not compile");
                self.compiled = Err(e.to_string());
                Err(e)
            }
        }
    }

    /// Begin a run if none is active. Returns false if the run could not
    /// start; the outcome then says why.
    pub fn start(&mut self) -> bool {
        if self.interpreter.is_some() {
            return true;
        }
        self.transcript.clear();
        self.outcome = None;
        self.failed_actions = 0;
        self.highlight.reset();

        let code = match &self.compiled {
            Ok(compiled) => compiled.code.clone(),
            Err(message) => {
                let message = format!("program does not compile: {}", message);
                self.finish(Outcome::Failed { message });
                return false;
            }
        };
        match Interpreter::from_source(&code) {
            Ok(interpreter) => {
                info!("run started");
                self.interpreter = Some(interpreter);
                true
            }
            Err(e) => {
                self.finish(Outcome::Failed {
                    message: e.to_string(),
                });
                false
            }
        }
    }

    /// Advance by one interpreter unit, or check on the outstanding action.
    pub fn tick(&mut self) -> Progress {
        if let Some(progress) = self.settle_pending() {
            return progress;
        }
        let Some(interpreter) = self.interpreter.as_mut() else {
            return Progress::Finished;
        };
        let mut host = SessionHost {
            transcript: &mut self.transcript,
            highlight: &mut self.highlight,
            prompter: self.prompter.as_mut(),
        };
        let step = interpreter.step(&mut host);
        self.after_step(step)
    }

    /// Run until completion, suspension or the slice budget. Highlight pauses
    /// are not honoured.
    pub fn run_slice(&mut self) -> Progress {
        if let Some(progress) = self.settle_pending() {
            return progress;
        }
        let Some(interpreter) = self.interpreter.as_mut() else {
            return Progress::Finished;
        };
        let mut host = SessionHost {
            transcript: &mut self.transcript,
            highlight: &mut self.highlight,
            prompter: self.prompter.as_mut(),
        };
        let step = interpreter.run_bounded(&mut host, self.slice_budget);
        self.highlight.clear_pause();
        self.after_step(step)
    }

    /// Discard the run: interpreter, outstanding action and highlight.
    /// The transcript and outcome of a finished run are kept.
    pub fn reset(&mut self) {
        if self.interpreter.take().is_some() {
            info!("run discarded");
        }
        if let Some(pending) = self.pending.take() {
            debug!(call = %pending.call(), "cancelling outstanding action");
        }
        self.highlight.reset();
    }

    pub fn clear_pause(&mut self) {
        self.highlight.clear_pause();
    }

    pub fn is_active(&self) -> bool {
        self.interpreter.is_some()
    }

    pub fn program(&self) -> &BlockProgram {
        &self.program
    }

    pub fn compile_error(&self) -> Option<&str> {
        self.compiled.as_ref().err().map(String::as_str)
    }

    pub fn highlight(&self) -> &HighlightState {
        &self.highlight
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn action_status(&self) -> Option<ActionStatus> {
        self.pending.as_ref().map(PendingAction::status)
    }

    /// Deliver the outstanding action's result to the interpreter. `Some`
    /// means the caller must stop here: still waiting, or the run ended.
    fn settle_pending(&mut self) -> Option<Progress> {
        let pending = self.pending.as_mut()?;
        let resolution = match pending.try_resolve() {
            Some(resolution) => resolution,
            None => return Some(Progress::Waiting),
        };
        let call = pending.call().clone();
        self.pending = None;

        let value = match resolution {
            Resolution::Completed(value) => value,
            Resolution::Failed(message) => {
                self.failed_actions += 1;
                self.transcript
                    .push(format!("Action {} failed: {}", call, message));
                if self.policy == FailurePolicy::Abort {
                    let message = format!("{} failed: {}", call, message);
                    return Some(self.finish(Outcome::Failed { message }));
                }
                Value::Error(message)
            }
        };

        let interpreter = self.interpreter.as_mut()?;
        match interpreter.resolve(value) {
            Ok(()) => None,
            Err(e) => Some(self.finish(Outcome::Failed {
                message: e.to_string(),
            })),
        }
    }

    fn after_step(&mut self, step: imblock_eval::Result<Step>) -> Progress {
        match step {
            Ok(Step::Continue) => Progress::Advanced,
            Ok(Step::Suspend(call)) => {
                debug!(call = %call, "suspended on action");
                self.pending = Some(self.bridge.spawn(call));
                Progress::Waiting
            }
            Ok(Step::Pending) => Progress::Waiting,
            Ok(Step::Done) => self.finish(Outcome::Completed {
                failed_actions: self.failed_actions,
            }),
            Err(e) => {
                warn!(error = %e, "program halted");
                self.finish(Outcome::Failed {
                    message: e.to_string(),
                })
            }
        }
    }

    fn finish(&mut self, outcome: Outcome) -> Progress {
        self.interpreter = None;
        self.pending = None;
        self.highlight.reset();
        let banner = outcome.banner();
        info!(outcome = %banner, "run finished");
        self.transcript.push(banner);
        self.outcome = Some(outcome);
        Progress::Finished
    }
}
