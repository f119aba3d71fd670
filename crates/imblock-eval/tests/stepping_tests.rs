//! Stepping behaviour of the interpreter over instrumented programs.

use imblock_eval::{AsyncCall, DeviceCall, Host, Interpreter, MoveMode, Step, Value};

#[derive(Default)]
struct Transcript {
    lines: Vec<String>,
    marks: Vec<String>,
}

impl Host for Transcript {
    fn print(&mut self, text: &str) {
        self.lines.push(text.to_string());
    }

    fn prompt(&mut self, _message: &str, _numeric: bool) -> Option<String> {
        None
    }

    fn mark(&mut self, block_id: &str) {
        self.marks.push(block_id.to_string());
    }
}

const COUNTING: &str = r#"var total = null;
var i = null;
mark("b1");
total = 0;
mark("b2");
for (i = 1; i <= 4; i += 1) {
  mark("b3");
  if ((i % 2) == 0) {
    mark("b4");
    total += i;
  } else {
    mark("b5");
    print("odd " + i);
  }
}
mark("b6");
print("total " + total);
"#;

#[test]
fn test_step_and_run_produce_identical_transcripts() {
    let mut run_host = Transcript::default();
    let mut interp = Interpreter::from_source(COUNTING).unwrap();
    assert_eq!(interp.run(&mut run_host).unwrap(), Step::Done);

    let mut step_host = Transcript::default();
    let mut interp = Interpreter::from_source(COUNTING).unwrap();
    let mut steps = 0;
    while interp.step(&mut step_host).unwrap() != Step::Done {
        steps += 1;
    }

    assert_eq!(run_host.lines, vec!["odd 1", "odd 3", "total 6"]);
    assert_eq!(step_host.lines, run_host.lines);
    assert_eq!(step_host.marks, run_host.marks);
    assert!(steps > 10);
}

#[test]
fn test_each_mark_is_its_own_unit() {
    let mut host = Transcript::default();
    let mut interp =
        Interpreter::from_source("mark(\"a\");\nprint(1);\nmark(\"b\");\nprint(2);").unwrap();

    assert_eq!(interp.step(&mut host).unwrap(), Step::Continue);
    assert_eq!(host.marks, vec!["a"]);
    assert!(host.lines.is_empty());

    assert_eq!(interp.step(&mut host).unwrap(), Step::Continue);
    assert_eq!(host.lines, vec!["1"]);

    assert_eq!(interp.step(&mut host).unwrap(), Step::Continue);
    assert_eq!(host.marks, vec!["a", "b"]);
}

#[test]
fn test_device_calls_suspend_in_program_order() {
    let source = r#"mark("m1");
move_stage("X", "absolute", 100);
mark("m2");
capture();
"#;
    let mut host = Transcript::default();
    let mut interp = Interpreter::from_source(source).unwrap();
    let mut issued = Vec::new();

    loop {
        match interp.run(&mut host).unwrap() {
            Step::Suspend(call) => {
                issued.push(call);
                interp.resolve(Value::Null).unwrap();
            }
            Step::Done => break,
            other => panic!("unexpected step {:?}", other),
        }
    }

    assert_eq!(
        issued,
        vec![
            AsyncCall::Device(DeviceCall::MoveStage {
                axis: imblock_eval::Axis::X,
                mode: MoveMode::Absolute,
                amount: 100.0,
            }),
            AsyncCall::Device(DeviceCall::Capture),
        ]
    );
    assert_eq!(host.marks, vec!["m1", "m2"]);
}

#[test]
fn test_failed_action_value_flows_into_program() {
    let mut host = Transcript::default();
    let source = "var s = get_sharpness_metric();\nprint(s);\nprint(\"next\");";
    let mut interp = Interpreter::from_source(source).unwrap();
    assert!(matches!(interp.run(&mut host).unwrap(), Step::Suspend(_)));
    interp.resolve(Value::Error("HTTP 500".to_string())).unwrap();
    assert_eq!(interp.run(&mut host).unwrap(), Step::Done);
    assert_eq!(host.lines, vec!["error: HTTP 500", "next"]);
}

#[test]
fn test_repeated_runs_are_deterministic() {
    let run = || {
        let mut host = Transcript::default();
        let mut interp = Interpreter::from_source(COUNTING).unwrap();
        interp.run(&mut host).unwrap();
        (host.lines, host.marks)
    };
    assert_eq!(run(), run());
}
