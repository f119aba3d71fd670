//! The fixed primitive surface available to compiled programs.
//!
//! Every callable name is a [`Builtin`]. Synchronous builtins are served by
//! the interpreter's host; the rest are validated into an [`AsyncCall`] and
//! handed to the driver, which completes them out of band.

use std::fmt;

use crate::error::Error;
use crate::value::{format_number, Value};

/// Longest accepted `wait_seconds` argument.
pub const MAX_WAIT_SECONDS: f64 = 600.0;

/// Words the grammar reserves.
pub const KEYWORDS: &[&str] = &[
    "var", "if", "else", "while", "for", "break", "continue", "true", "false", "null",
];

/// A callable primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
    Prompt,
    Mark,
    WaitSeconds,
    Capture,
    GetPosition,
    Autofocus,
    GetSharpnessMetric,
    MoveStage,
    MoveStage3d,
}

impl Builtin {
    pub const ALL: [Builtin; 10] = [
        Builtin::Print,
        Builtin::Prompt,
        Builtin::Mark,
        Builtin::WaitSeconds,
        Builtin::Capture,
        Builtin::GetPosition,
        Builtin::Autofocus,
        Builtin::GetSharpnessMetric,
        Builtin::MoveStage,
        Builtin::MoveStage3d,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Prompt => "prompt",
            Builtin::Mark => "mark",
            Builtin::WaitSeconds => "wait_seconds",
            Builtin::Capture => "capture",
            Builtin::GetPosition => "get_position",
            Builtin::Autofocus => "autofocus",
            Builtin::GetSharpnessMetric => "get_sharpness_metric",
            Builtin::MoveStage => "move_stage",
            Builtin::MoveStage3d => "move_stage_3d",
        }
    }

    pub fn from_name(name: &str) -> Option<Builtin> {
        Builtin::ALL.into_iter().find(|b| b.name() == name)
    }

    /// Whether calling this builtin suspends the interpreter.
    pub fn is_async(self) -> bool {
        !matches!(self, Builtin::Print | Builtin::Prompt | Builtin::Mark)
    }

    /// Validate arguments of an asynchronous builtin into a typed call.
    pub fn to_async_call(self, args: &[Value]) -> Result<AsyncCall, Error> {
        let name = self.name();
        let call = match self {
            Builtin::WaitSeconds => {
                expect_arity(name, args, 1)?;
                let seconds = number_arg(name, &args[0])?;
                if !(0.0..=MAX_WAIT_SECONDS).contains(&seconds) {
                    return Err(Error::misuse(
                        name,
                        format!(
                            "seconds must be between 0 and {}, got {}",
                            MAX_WAIT_SECONDS,
                            format_number(seconds)
                        ),
                    ));
                }
                AsyncCall::Wait { seconds }
            }
            Builtin::Capture => {
                expect_arity(name, args, 0)?;
                AsyncCall::Device(DeviceCall::Capture)
            }
            Builtin::GetPosition => {
                expect_arity(name, args, 1)?;
                AsyncCall::Device(DeviceCall::GetPosition {
                    axis: Axis::parse(name, &args[0])?,
                })
            }
            Builtin::Autofocus => {
                expect_arity(name, args, 1)?;
                AsyncCall::Device(DeviceCall::Autofocus {
                    kind: FocusKind::parse(name, &args[0])?,
                })
            }
            Builtin::GetSharpnessMetric => {
                expect_arity(name, args, 0)?;
                AsyncCall::Device(DeviceCall::SharpnessMetric)
            }
            Builtin::MoveStage => {
                expect_arity(name, args, 3)?;
                AsyncCall::Device(DeviceCall::MoveStage {
                    axis: Axis::parse(name, &args[0])?,
                    mode: MoveMode::parse(name, &args[1])?,
                    amount: number_arg(name, &args[2])?,
                })
            }
            Builtin::MoveStage3d => {
                expect_arity(name, args, 4)?;
                AsyncCall::Device(DeviceCall::MoveStage3d {
                    mode: MoveMode::parse(name, &args[0])?,
                    x: number_arg(name, &args[1])?,
                    y: number_arg(name, &args[2])?,
                    z: number_arg(name, &args[3])?,
                })
            }
            Builtin::Print | Builtin::Prompt | Builtin::Mark => {
                return Err(Error::misuse(name, "not an asynchronous primitive"));
            }
        };
        Ok(call)
    }
}

fn expect_arity(name: &'static str, args: &[Value], expected: usize) -> Result<(), Error> {
    if args.len() != expected {
        return Err(Error::misuse(
            name,
            format!("takes exactly {} argument(s), got {}", expected, args.len()),
        ));
    }
    Ok(())
}

fn number_arg(name: &'static str, value: &Value) -> Result<f64, Error> {
    match value {
        Value::Number(n) if n.is_finite() => Ok(*n),
        other => Err(Error::misuse(
            name,
            format!("expected a finite number, got {}", other.type_name()),
        )),
    }
}

fn text_arg<'v>(name: &'static str, value: &'v Value) -> Result<&'v str, Error> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(Error::misuse(name, format!("expected a string, got {}", other.type_name()))),
    }
}

/// Stage axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn parse(primitive: &'static str, value: &Value) -> Result<Axis, Error> {
        match text_arg(primitive, value)?.to_ascii_uppercase().as_str() {
            "X" => Ok(Axis::X),
            "Y" => Ok(Axis::Y),
            "Z" => Ok(Axis::Z),
            other => Err(Error::misuse(primitive, format!("unknown axis '{}'", other))),
        }
    }

    /// Upper-case name, as used by the positioner API.
    pub fn as_upper(self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        }
    }

    /// Lower-case name, as used by the stage position property.
    pub fn as_lower(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

/// Whether a stage move is relative to the current position or absolute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveMode {
    Relative,
    Absolute,
}

impl MoveMode {
    fn parse(primitive: &'static str, value: &Value) -> Result<MoveMode, Error> {
        match text_arg(primitive, value)?.to_ascii_lowercase().as_str() {
            "relative" => Ok(MoveMode::Relative),
            "absolute" => Ok(MoveMode::Absolute),
            other => Err(Error::misuse(primitive, format!("unknown move mode '{}'", other))),
        }
    }

    pub fn is_absolute(self) -> bool {
        self == MoveMode::Absolute
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MoveMode::Relative => "relative",
            MoveMode::Absolute => "absolute",
        }
    }
}

/// Autofocus strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FocusKind {
    Fast,
    Medium,
    Fine,
}

impl FocusKind {
    fn parse(primitive: &'static str, value: &Value) -> Result<FocusKind, Error> {
        match text_arg(primitive, value)?.to_ascii_lowercase().as_str() {
            "fast" => Ok(FocusKind::Fast),
            "medium" => Ok(FocusKind::Medium),
            "fine" => Ok(FocusKind::Fine),
            other => Err(Error::misuse(primitive, format!("unknown autofocus kind '{}'", other))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FocusKind::Fast => "fast",
            FocusKind::Medium => "medium",
            FocusKind::Fine => "fine",
        }
    }
}

/// A device operation proxied to the remote action API.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    Capture,
    GetPosition { axis: Axis },
    Autofocus { kind: FocusKind },
    SharpnessMetric,
    MoveStage { axis: Axis, mode: MoveMode, amount: f64 },
    MoveStage3d { mode: MoveMode, x: f64, y: f64, z: f64 },
}

/// A primitive invocation the interpreter suspends on.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncCall {
    Wait { seconds: f64 },
    Device(DeviceCall),
}

impl fmt::Display for DeviceCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCall::Capture => write!(f, "capture()"),
            DeviceCall::GetPosition { axis } => write!(f, "get_position({})", axis.as_lower()),
            DeviceCall::Autofocus { kind } => write!(f, "autofocus({})", kind.as_str()),
            DeviceCall::SharpnessMetric => write!(f, "get_sharpness_metric()"),
            DeviceCall::MoveStage { axis, mode, amount } => write!(
                f,
                "move_stage({}, {}, {})",
                axis.as_upper(),
                mode.as_str(),
                format_number(*amount)
            ),
            DeviceCall::MoveStage3d { mode, x, y, z } => write!(
                f,
                "move_stage_3d({}, {}, {}, {})",
                mode.as_str(),
                format_number(*x),
                format_number(*y),
                format_number(*z)
            ),
        }
    }
}

impl fmt::Display for AsyncCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncCall::Wait { seconds } => write!(f, "wait_seconds({})", format_number(*seconds)),
            AsyncCall::Device(call) => call.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_round_trip() {
        for builtin in Builtin::ALL {
            assert_eq!(Builtin::from_name(builtin.name()), Some(builtin));
        }
        assert_eq!(Builtin::from_name("alert"), None);
    }

    #[test]
    fn test_move_stage_arguments_are_typed() {
        let call = Builtin::MoveStage
            .to_async_call(&["x".into(), "ABSOLUTE".into(), Value::Number(100.0)])
            .unwrap();
        assert_eq!(
            call,
            AsyncCall::Device(DeviceCall::MoveStage {
                axis: Axis::X,
                mode: MoveMode::Absolute,
                amount: 100.0,
            })
        );
        assert_eq!(call.to_string(), "move_stage(X, absolute, 100)");
    }

    #[test]
    fn test_wait_seconds_range() {
        assert!(Builtin::WaitSeconds.to_async_call(&[Value::Number(0.0)]).is_ok());
        assert!(Builtin::WaitSeconds.to_async_call(&[Value::Number(600.0)]).is_ok());
        let err = Builtin::WaitSeconds.to_async_call(&[Value::Number(601.0)]).unwrap_err();
        assert!(matches!(err, Error::Misuse { primitive: "wait_seconds", .. }), "{:?}", err);
        assert!(Builtin::WaitSeconds.to_async_call(&[Value::Number(-1.0)]).is_err());
    }

    #[test]
    fn test_misuse_reports_bad_arguments() {
        assert!(Builtin::GetPosition.to_async_call(&["w".into()]).is_err());
        assert!(Builtin::Autofocus.to_async_call(&["ultra".into()]).is_err());
        assert!(Builtin::Capture.to_async_call(&[Value::Number(1.0)]).is_err());
        let args = ["absolute".into(), Value::Null, Value::Number(0.0), Value::Number(0.0)];
        assert!(Builtin::MoveStage3d.to_async_call(&args).is_err());
    }
}
