//! The steppable interpreter.
//!
//! Execution state is an explicit frame stack rather than the Rust call
//! stack, so the interpreter can stop after any evaluation unit and hand
//! control back to its driver:
//!
//! - a simple statement (`var`, assignment, expression statement),
//! - an `if` statement's condition chain,
//! - a loop test, a `for` initializer or update,
//! - `break` / `continue`.
//!
//! When a unit reaches an asynchronous primitive the interpreter suspends
//! with [`Step::Suspend`]. The driver completes the call and passes its
//! result to [`Interpreter::resolve`]; the next step re-runs the unit,
//! replaying primitive results already produced.

use tracing::debug;

use crate::ast::{AssignOp, BinOp, BlockId, ExprId, Program, Stmt, StmtId};
use crate::error::Error;
use crate::eval::{self, Evaluator, Interrupt, Journal};
use crate::parser;
use crate::primitive::AsyncCall;
use crate::runtime::Runtime;
use crate::value::Value;

/// Synchronous side of the primitive surface.
pub trait Host {
    /// Append a line to the output transcript.
    fn print(&mut self, text: &str);

    /// Ask the user for input. `None` means the prompt was dismissed.
    fn prompt(&mut self, message: &str, numeric: bool) -> Option<String>;

    /// A statement block is about to execute.
    fn mark(&mut self, block_id: &str);
}

/// Outcome of advancing the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A unit ran and more remain.
    Continue,
    /// The unit invoked an asynchronous primitive; the driver must start it.
    Suspend(AsyncCall),
    /// Still waiting for [`Interpreter::resolve`].
    Pending,
    /// The program has finished.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LoopPhase {
    Init,
    Test,
    Update,
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Block { block: BlockId, next: usize },
    Loop { stmt: StmtId, phase: LoopPhase },
}

pub struct Interpreter {
    program: Program,
    runtime: Runtime,
    frames: Vec<Frame>,
    journal: Journal,
    /// The asynchronous call the current unit is suspended on.
    awaiting: Option<AsyncCall>,
    finished: bool,
    units: u64,
}

impl Interpreter {
    /// Create an interpreter positioned at the start of `program`.
    pub fn new(program: Program) -> Self {
        let root = program.root();
        Self {
            program,
            runtime: Runtime::new(),
            frames: vec![Frame::Block { block: root, next: 0 }],
            journal: Journal::default(),
            awaiting: None,
            finished: false,
            units: 0,
        }
    }

    /// Parse compiled text and create an interpreter for it.
    pub fn from_source(source: &str) -> crate::Result<Self> {
        Ok(Self::new(parser::parse(source)?))
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn is_suspended(&self) -> bool {
        self.awaiting.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of evaluation units completed so far.
    pub fn units_executed(&self) -> u64 {
        self.units
    }

    /// Execute exactly one evaluation unit.
    ///
    /// An error halts the program; later calls report [`Step::Done`].
    pub fn step(&mut self, host: &mut dyn Host) -> crate::Result<Step> {
        if self.finished {
            return Ok(Step::Done);
        }
        if self.awaiting.is_some() {
            return Ok(Step::Pending);
        }
        if !self.settle() {
            self.finished = true;
            return Ok(Step::Done);
        }

        self.journal.rewind();
        match self.exec_unit(host) {
            Ok(()) => {
                self.journal.clear();
                self.units += 1;
                if self.settle() {
                    Ok(Step::Continue)
                } else {
                    debug!(units = self.units, "program finished");
                    self.finished = true;
                    Ok(Step::Done)
                }
            }
            Err(Interrupt::Suspend(call)) => {
                debug!(%call, "suspending on asynchronous primitive");
                self.awaiting = Some(call.clone());
                Ok(Step::Suspend(call))
            }
            Err(Interrupt::Fail(err)) => {
                debug!(error = %err, "program halted");
                self.halt();
                Err(err)
            }
        }
    }

    /// Execute units until the program completes or suspends.
    pub fn run(&mut self, host: &mut dyn Host) -> crate::Result<Step> {
        loop {
            match self.step(host)? {
                Step::Continue => {}
                other => return Ok(other),
            }
        }
    }

    /// Like [`run`](Self::run), but yields [`Step::Continue`] after `budget` units.
    pub fn run_bounded(&mut self, host: &mut dyn Host, budget: usize) -> crate::Result<Step> {
        for _ in 0..budget {
            match self.step(host)? {
                Step::Continue => {}
                other => return Ok(other),
            }
        }
        Ok(if self.finished { Step::Done } else { Step::Continue })
    }

    /// Deliver the result of the asynchronous call the interpreter is suspended on.
    pub fn resolve(&mut self, value: Value) -> crate::Result<()> {
        let call = self.awaiting.take().ok_or(Error::NotSuspended)?;
        debug!(%call, result = %value, "asynchronous primitive resolved");
        self.journal.push(value);
        Ok(())
    }

    fn halt(&mut self) {
        self.frames.clear();
        self.journal.clear();
        self.awaiting = None;
        self.finished = true;
    }

    /// Drop exhausted blocks; returns whether any unit remains.
    fn settle(&mut self) -> bool {
        while let Some(Frame::Block { block, next }) = self.frames.last() {
            if *next < self.program.block(*block).len() {
                break;
            }
            self.frames.pop();
        }
        !self.frames.is_empty()
    }

    fn exec_unit(&mut self, host: &mut dyn Host) -> Result<(), Interrupt> {
        loop {
            let Some(frame) = self.frames.last().copied() else {
                return Ok(());
            };
            match frame {
                Frame::Block { block, next } => {
                    let Some(&id) = self.program.block(block).get(next) else {
                        self.frames.pop();
                        continue;
                    };
                    let entry = match self.program.stmt(id) {
                        Stmt::While { .. } => Some(LoopPhase::Test),
                        Stmt::For { .. } => Some(LoopPhase::Init),
                        _ => None,
                    };
                    match entry {
                        // Entering a loop is free; its first test (or init) is the unit.
                        Some(phase) => {
                            self.advance();
                            self.frames.push(Frame::Loop { stmt: id, phase });
                        }
                        None => return self.exec_stmt(id, host),
                    }
                }
                Frame::Loop { stmt, phase } => {
                    let (cond, init, update, body, is_for) = match self.program.stmt(stmt) {
                        Stmt::While { cond, body } => (Some(*cond), None, None, *body, false),
                        Stmt::For {
                            init,
                            cond,
                            update,
                            body,
                        } => (*cond, *init, *update, *body, true),
                        other => {
                            return Err(Error::runtime(format!("Not a loop: {:?}", other)).into())
                        }
                    };
                    match phase {
                        LoopPhase::Init | LoopPhase::Update => {
                            let clause = if phase == LoopPhase::Init { init } else { update };
                            if let Some(clause) = clause {
                                self.exec_simple(clause, host)?;
                            }
                            self.set_phase(LoopPhase::Test);
                            if clause.is_some() {
                                return Ok(());
                            }
                        }
                        LoopPhase::Test => {
                            let proceed = match cond {
                                Some(cond) => self.eval(cond, host)?.to_bool(),
                                None => true,
                            };
                            if proceed {
                                let after_body =
                                    if is_for { LoopPhase::Update } else { LoopPhase::Test };
                                self.set_phase(after_body);
                                self.frames.push(Frame::Block { block: body, next: 0 });
                            } else {
                                self.frames.pop();
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Run the statement at the current block position as one unit.
    fn exec_stmt(&mut self, id: StmtId, host: &mut dyn Host) -> Result<(), Interrupt> {
        match self.program.stmt(id) {
            Stmt::If { branches, else_block } => {
                let branches = branches.clone();
                let mut chosen = *else_block;
                for (cond, block) in branches {
                    if self.eval(cond, host)?.to_bool() {
                        chosen = Some(block);
                        break;
                    }
                }
                self.advance();
                if let Some(block) = chosen {
                    self.frames.push(Frame::Block { block, next: 0 });
                }
                Ok(())
            }
            Stmt::Break => {
                self.advance();
                while let Some(frame) = self.frames.pop() {
                    if matches!(frame, Frame::Loop { .. }) {
                        return Ok(());
                    }
                }
                Err(Error::runtime("break outside of a loop").into())
            }
            Stmt::Continue => {
                self.advance();
                while let Some(frame) = self.frames.last() {
                    if matches!(frame, Frame::Loop { .. }) {
                        return Ok(());
                    }
                    self.frames.pop();
                }
                Err(Error::runtime("continue outside of a loop").into())
            }
            _ => {
                self.exec_simple(id, host)?;
                self.advance();
                Ok(())
            }
        }
    }

    /// Execute a declaration, assignment or expression statement.
    fn exec_simple(&mut self, id: StmtId, host: &mut dyn Host) -> Result<(), Interrupt> {
        match self.program.stmt(id).clone() {
            Stmt::VarDecl { name, init } => {
                let value = match init {
                    Some(expr) => self.eval(expr, host)?,
                    None => Value::Null,
                };
                self.runtime.define_var(&name, value);
            }
            Stmt::Assign { name, op, value } => {
                let current = match op {
                    AssignOp::Set => None,
                    AssignOp::Add | AssignOp::Sub => {
                        let current = self.runtime.get_var(&name).cloned().ok_or_else(|| {
                            Error::runtime(format!("Variable '{}' not defined", name))
                        })?;
                        // A fresh variable counts from zero.
                        Some(if current.is_null() { Value::Number(0.0) } else { current })
                    }
                };
                let rhs = self.eval(value, host)?;
                let new_value = match (op, current) {
                    (AssignOp::Add, Some(current)) => {
                        eval::eval_binary(BinOp::Add, &current, &rhs)?
                    }
                    (AssignOp::Sub, Some(current)) => {
                        eval::eval_binary(BinOp::Sub, &current, &rhs)?
                    }
                    _ => rhs,
                };
                self.runtime.set_var(&name, new_value).map_err(Error::Runtime)?;
            }
            Stmt::Expr(expr) => {
                self.eval(expr, host)?;
            }
            other => {
                return Err(Error::runtime(format!("Not a simple statement: {:?}", other)).into())
            }
        }
        Ok(())
    }

    fn eval(&mut self, expr: ExprId, host: &mut dyn Host) -> Result<Value, Interrupt> {
        Evaluator {
            program: &self.program,
            runtime: &self.runtime,
            journal: &mut self.journal,
            host,
        }
        .eval(expr)
    }

    /// Move the innermost block past its current statement.
    fn advance(&mut self) {
        if let Some(Frame::Block { next, .. }) = self.frames.last_mut() {
            *next += 1;
        }
    }

    fn set_phase(&mut self, new_phase: LoopPhase) {
        if let Some(Frame::Loop { phase, .. }) = self.frames.last_mut() {
            *phase = new_phase;
        }
    }
}
