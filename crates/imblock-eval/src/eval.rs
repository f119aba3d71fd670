//! Expression evaluation.
//!
//! Expressions are pure apart from primitive calls. Every primitive result
//! produced while evaluating one unit is appended to a [`Journal`]; when a
//! unit suspends on an asynchronous primitive and is later re-run, recorded
//! results are replayed in order instead of calling the primitive again.

use tracing::trace;

use crate::ast::{BinOp, Expr, ExprId, Program, UnOp};
use crate::error::Error;
use crate::interpreter::Host;
use crate::primitive::{AsyncCall, Builtin};
use crate::runtime::Runtime;
use crate::value::Value;

/// Why evaluation of a unit stopped early.
#[derive(Debug)]
pub(crate) enum Interrupt {
    /// An asynchronous primitive was reached with no recorded result.
    Suspend(AsyncCall),
    Fail(Error),
}

impl From<Error> for Interrupt {
    fn from(err: Error) -> Self {
        Interrupt::Fail(err)
    }
}

/// Primitive results of the unit currently executing.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    entries: Vec<Value>,
    cursor: usize,
}

impl Journal {
    /// Start (or restart) the current unit from its first primitive call.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Forget the finished unit.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    /// Append the result of the primitive the unit suspended on.
    pub fn push(&mut self, value: Value) {
        self.entries.push(value);
    }

    fn replay(&mut self) -> Option<Value> {
        let value = self.entries.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(value)
    }

    fn record(&mut self, value: Value) {
        self.entries.push(value);
        self.cursor = self.entries.len();
    }
}

/// Evaluates expressions of one program against a runtime.
pub(crate) struct Evaluator<'a> {
    pub program: &'a Program,
    pub runtime: &'a Runtime,
    pub journal: &'a mut Journal,
    pub host: &'a mut dyn Host,
}

impl Evaluator<'_> {
    pub fn eval(&mut self, id: ExprId) -> Result<Value, Interrupt> {
        let program = self.program;
        match program.expr(id) {
            Expr::Literal(value) => Ok(value.clone()),

            Expr::Var(name) => {
                let value = self
                    .runtime
                    .get_var(name)
                    .cloned()
                    .ok_or_else(|| Error::runtime(format!("Undefined variable: {}", name)))?;
                Ok(value)
            }

            Expr::Member { object, field } => match self.eval(*object)? {
                Value::Object(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
                err @ Value::Error(_) => Ok(err),
                other => Err(Error::runtime(format!(
                    "Cannot access field '{}' on {}",
                    field,
                    other.type_name()
                ))
                .into()),
            },

            Expr::Unary { op, operand } => {
                let value = self.eval(*operand)?;
                Ok(eval_unary(*op, value)?)
            }

            Expr::Binary { op: BinOp::And, left, right } => {
                if !self.eval(*left)?.to_bool() {
                    return Ok(Value::Boolean(false));
                }
                Ok(Value::Boolean(self.eval(*right)?.to_bool()))
            }

            Expr::Binary { op: BinOp::Or, left, right } => {
                if self.eval(*left)?.to_bool() {
                    return Ok(Value::Boolean(true));
                }
                Ok(Value::Boolean(self.eval(*right)?.to_bool()))
            }

            Expr::Binary { op, left, right } => {
                let left_val = self.eval(*left)?;
                let right_val = self.eval(*right)?;
                Ok(eval_binary(*op, &left_val, &right_val)?)
            }

            Expr::Call { builtin, args } => {
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(*arg)?);
                }
                self.call(*builtin, &arg_values)
            }
        }
    }

    fn call(&mut self, builtin: Builtin, args: &[Value]) -> Result<Value, Interrupt> {
        if let Some(recorded) = self.journal.replay() {
            trace!(primitive = builtin.name(), "replaying recorded result");
            return Ok(recorded);
        }

        if builtin.is_async() {
            return Err(Interrupt::Suspend(builtin.to_async_call(args)?));
        }

        let result = match builtin {
            Builtin::Print => {
                if args.len() > 1 {
                    return Err(Error::misuse("print", "takes at most 1 argument").into());
                }
                let text = args.first().map(|v| v.to_string_value()).unwrap_or_default();
                self.host.print(&text);
                Value::Null
            }
            Builtin::Prompt => {
                let (message, numeric) = match args {
                    [message] => (message, false),
                    [message, Value::String(kind)] if kind == "number" => (message, true),
                    [_, Value::String(kind)] if kind == "text" => (&args[0], false),
                    _ => {
                        return Err(Error::misuse(
                            "prompt",
                            "expected a message and an optional \"text\" or \"number\" kind",
                        )
                        .into())
                    }
                };
                match self.host.prompt(&message.to_string_value(), numeric) {
                    None => Value::Null,
                    Some(answer) if numeric => {
                        Value::Number(answer.trim().parse::<f64>().unwrap_or(f64::NAN))
                    }
                    Some(answer) => Value::String(answer),
                }
            }
            Builtin::Mark => match args {
                [Value::String(block_id)] => {
                    self.host.mark(block_id);
                    Value::Null
                }
                _ => return Err(Error::misuse("mark", "expected a single block id string").into()),
            },
            _ => return Err(Error::misuse(builtin.name(), "not a synchronous primitive").into()),
        };

        self.journal.record(result.clone());
        Ok(result)
    }
}

/// Evaluate a unary operation.
pub(crate) fn eval_unary(op: UnOp, value: Value) -> Result<Value, Error> {
    match op {
        UnOp::Not => Ok(Value::Boolean(!value.to_bool())),
        UnOp::Neg => match value {
            Value::Number(n) => Ok(Value::Number(-n)),
            err @ Value::Error(_) => Ok(err),
            other => Err(Error::runtime(format!("Cannot negate {}", other.type_name()))),
        },
    }
}

/// Evaluate a binary operation on two already-evaluated operands.
///
/// A failed action's error value poisons arithmetic: the result is that error.
pub(crate) fn eval_binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, Error> {
    let result = match op {
        BinOp::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (Value::String(a), b) => Value::String(format!("{}{}", a, b.to_string_value())),
            (a, Value::String(b)) => Value::String(format!("{}{}", a.to_string_value(), b)),
            (err @ Value::Error(_), _) | (_, err @ Value::Error(_)) => err.clone(),
            _ => {
                return Err(Error::runtime(format!(
                    "Cannot add {} and {}",
                    left.type_name(),
                    right.type_name()
                )))
            }
        },
        BinOp::Sub => num_op(left, right, |a, b| a - b)?,
        BinOp::Mul => num_op(left, right, |a, b| a * b)?,
        BinOp::Div => num_op(left, right, |a, b| a / b)?,
        BinOp::Mod => num_op(left, right, |a, b| a % b)?,
        BinOp::Eq => Value::Boolean(values_equal(left, right)),
        BinOp::NotEq => Value::Boolean(!values_equal(left, right)),
        BinOp::Lt => compare_values(left, right, |ord| ord.is_lt())?,
        BinOp::LtEq => compare_values(left, right, |ord| ord.is_le())?,
        BinOp::Gt => compare_values(left, right, |ord| ord.is_gt())?,
        BinOp::GtEq => compare_values(left, right, |ord| ord.is_ge())?,
        BinOp::And => Value::Boolean(left.to_bool() && right.to_bool()),
        BinOp::Or => Value::Boolean(left.to_bool() || right.to_bool()),
    };
    Ok(result)
}

/// Numeric binary operation helper.
fn num_op(left: &Value, right: &Value, op: fn(f64, f64) -> f64) -> Result<Value, Error> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(op(*a, *b))),
        (err @ Value::Error(_), _) | (_, err @ Value::Error(_)) => Ok(err.clone()),
        _ => Err(Error::runtime(format!(
            "Cannot perform numeric operation on {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

/// Check if two values are equal.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        _ => false,
    }
}

/// Compare two values.
fn compare_values(
    a: &Value,
    b: &Value,
    pred: fn(std::cmp::Ordering) -> bool,
) -> Result<Value, Error> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Boolean(
            a.partial_cmp(b).map(pred).unwrap_or(false),
        )),
        (Value::String(a), Value::String(b)) => Ok(Value::Boolean(pred(a.cmp(b)))),
        (Value::Error(_), _) | (_, Value::Error(_)) => Ok(Value::Boolean(false)),
        _ => Err(Error::runtime(format!(
            "Cannot compare {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}
