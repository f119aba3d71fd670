/// Integration tests for code generation

use std::io::Write;

use imblock_compiler::{compile, xml, Block, BlockProgram, CompileError, CompileOptions, Compiler};
use imblock_eval::{Host, Interpreter, Step};

#[derive(Default)]
struct Output {
    lines: Vec<String>,
    marks: Vec<String>,
}

impl Host for Output {
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

/// Run compiled text to completion; device calls are not expected.
fn execute(code: &str) -> Output {
    let mut host = Output::default();
    let mut interp = Interpreter::from_source(code).expect("compiled text should parse");
    assert_eq!(interp.run(&mut host).expect("program should run"), Step::Done);
    host
}

fn number(id: &str, n: &str) -> Block {
    Block::new(id, "math_number").with_field("NUM", n)
}

fn get(id: &str, var: &str) -> Block {
    Block::new(id, "variables_get").with_field("VAR", var)
}

fn print(id: &str, value: Block) -> Block {
    Block::new(id, "text_print").with_value("TEXT", value)
}

fn counting_program() -> BlockProgram {
    BlockProgram::new().with_variable("total").with_stack(vec![
        Block::new("b1", "variables_set")
            .with_field("VAR", "total")
            .with_value("VALUE", number("n0", "0"))
            .at(10, 10),
        Block::new("b2", "controls_repeat_ext")
            .with_shadow("TIMES", number("n3", "3"))
            .with_statement(
                "DO",
                vec![Block::new("b3", "math_change")
                    .with_field("VAR", "total")
                    .with_value("DELTA", number("n2", "2"))],
            ),
        print("b4", get("g", "total")),
    ])
}

#[test]
fn test_marks_precede_every_statement() {
    let compiled = compile(&counting_program()).expect("compilation failed");
    let expected = r#"var total = null;

mark("b1");
total = 0;
mark("b2");
for (var count = 0; count < 3; count += 1) {
  mark("b3");
  total += 2;
}
mark("b4");
print(total);
"#;
    assert_eq!(compiled.code, expected);
    assert_eq!(compiled.block_ids, vec!["b1", "b2", "b3", "b4"]);
}

#[test]
fn test_compiled_program_runs() {
    let compiled = compile(&counting_program()).unwrap();
    let output = execute(&compiled.code);
    assert_eq!(output.lines, vec!["6"]);
    assert_eq!(output.marks, vec!["b1", "b2", "b3", "b3", "b3", "b4"]);
}

#[test]
fn test_compilation_is_deterministic() {
    let program = counting_program();
    assert_eq!(compile(&program).unwrap(), compile(&program).unwrap());
}

#[test]
fn test_primitive_names_are_reserved() {
    let program = BlockProgram::new().with_stack(vec![
        Block::new("s", "variables_set")
            .with_field("VAR", "capture")
            .with_value("VALUE", number("n", "1")),
        Block::new("c", "capture"),
        print("p", get("g", "capture")),
    ]);
    let compiled = compile(&program).unwrap();
    assert!(compiled.code.starts_with("var capture2 = null;\n"));
    assert!(compiled.code.contains("capture2 = 1;\n"));
    assert!(compiled.code.contains("capture();\n"));
    assert!(compiled.code.contains("print(capture2);\n"));
}

#[test]
fn test_non_literal_repeat_count_is_hoisted() {
    let program = BlockProgram::new().with_stack(vec![
        Block::new("s", "variables_set")
            .with_field("VAR", "n")
            .with_value("VALUE", number("v", "2")),
        Block::new("r", "controls_repeat_ext")
            .with_value("TIMES", get("g", "n"))
            .with_statement(
                "DO",
                vec![print("p", Block::new("t", "text").with_field("TEXT", "hi"))],
            ),
    ]);
    let compiled = compile(&program).unwrap();
    assert!(compiled.code.contains(
        "var repeat_end = n;\nfor (var count = 0; count < repeat_end; count += 1) {\n"
    ));
    assert_eq!(execute(&compiled.code).lines, vec!["hi", "hi"]);
}

#[test]
fn test_for_loop_counts_down_with_literal_bounds() {
    let program = BlockProgram::new().with_stack(vec![Block::new("f", "controls_for")
        .with_field("VAR", "i")
        .with_value("FROM", number("a", "3"))
        .with_value("TO", number("b", "1"))
        .with_value("BY", number("c", "1"))
        .with_statement("DO", vec![print("p", get("g", "i"))])]);
    let compiled = compile(&program).unwrap();
    assert!(compiled.code.contains("for (i = 3; i >= 1; i -= 1) {\n"));
    assert_eq!(execute(&compiled.code).lines, vec!["3", "2", "1"]);
}

#[test]
fn test_for_loop_with_computed_bounds() {
    let program = BlockProgram::new().with_stack(vec![
        Block::new("s", "variables_set")
            .with_field("VAR", "top")
            .with_value("VALUE", number("v", "4")),
        Block::new("f", "controls_for")
            .with_field("VAR", "i")
            .with_value("FROM", number("a", "0"))
            .with_value("TO", get("g", "top"))
            .with_value("BY", number("c", "-2"))
            .with_statement("DO", vec![print("p", get("h", "i"))]),
    ]);
    let compiled = compile(&program).unwrap();
    assert!(compiled.code.contains("var i_start = 0;\n"));
    assert_eq!(execute(&compiled.code).lines, vec!["0", "2", "4"]);
}

#[test]
fn test_if_else_chain() {
    let compare = |id: &str, n: &str| {
        Block::new(id, "logic_compare")
            .with_field("OP", "LT")
            .with_value("A", get(&format!("{}g", id), "x"))
            .with_value("B", number(&format!("{}n", id), n))
    };
    let text = |id: &str, t: &str| {
        print(id, Block::new(format!("{}t", id), "text").with_field("TEXT", t))
    };
    let program = BlockProgram::new().with_stack(vec![
        Block::new("s", "variables_set")
            .with_field("VAR", "x")
            .with_value("VALUE", number("v", "5")),
        Block::new("if", "controls_if")
            .with_mutation("elseif", "1")
            .with_mutation("else", "1")
            .with_value("IF0", compare("c0", "3"))
            .with_statement("DO0", vec![text("p0", "small")])
            .with_value("IF1", compare("c1", "10"))
            .with_statement("DO1", vec![text("p1", "medium")])
            .with_statement("ELSE", vec![text("p2", "large")]),
    ]);
    let compiled = compile(&program).unwrap();
    assert!(compiled.code.contains("if ((x < 3)) {\n"));
    assert!(compiled.code.contains("} else if ((x < 10)) {\n"));
    assert!(compiled.code.contains("} else {\n"));
    assert_eq!(execute(&compiled.code).lines, vec!["medium"]);
}

#[test]
fn test_while_until_negates_condition() {
    let program = BlockProgram::new().with_stack(vec![
        Block::new("s", "variables_set")
            .with_field("VAR", "n")
            .with_value("VALUE", number("v", "0")),
        Block::new("w", "controls_whileUntil")
            .with_field("MODE", "UNTIL")
            .with_value(
                "BOOL",
                Block::new("c", "logic_compare")
                    .with_field("OP", "GTE")
                    .with_value("A", get("g", "n"))
                    .with_value("B", number("m", "2")),
            )
            .with_statement(
                "DO",
                vec![Block::new("i", "math_change")
                    .with_field("VAR", "n")
                    .with_value("DELTA", number("d", "1"))],
            ),
        print("p", get("h", "n")),
    ]);
    let compiled = compile(&program).unwrap();
    assert!(compiled.code.contains("while (!((n >= 2))) {\n"));
    assert_eq!(execute(&compiled.code).lines, vec!["2"]);
}

#[test]
fn test_device_blocks() {
    let program = BlockProgram::new().with_stack(vec![
        Block::new("m", "move_stage")
            .with_field("axis_name", "z")
            .with_field("abs_or_rel", "ABSOLUTE")
            .with_value("steps", number("n", "-50")),
        Block::new("a", "autofocus").with_field("autofocus_type", "fine_autofocus"),
        Block::new("w", "wait_seconds").with_field("SECONDS", "1.5"),
        Block::new("m3", "move_stage_3d")
            .with_field("abs_or_rel", "RELATIVE")
            .with_value("x_steps", number("x", "1"))
            .with_value("y_steps", number("y", "2"))
            .with_value("z_steps", number("z", "3")),
        print("p", Block::new("pos", "get_position").with_field("axis_name", "x")),
    ]);
    let code = compile(&program).unwrap().code;
    assert!(code.contains("move_stage(\"Z\", \"absolute\", (-50));\n"));
    assert!(code.contains("autofocus(\"fine\");\n"));
    assert!(code.contains("wait_seconds(1.5);\n"));
    assert!(code.contains("move_stage_3d(\"relative\", 1, 2, 3);\n"));
    assert!(code.contains("print(get_position(\"x\"));\n"));
    assert!(imblock_eval::parse(&code).is_ok());
}

#[test]
fn test_text_join_and_prompt() {
    let program = BlockProgram::new().with_stack(vec![print(
        "p",
        Block::new("j", "text_join")
            .with_mutation("items", "2")
            .with_value("ADD0", Block::new("t", "text").with_field("TEXT", "n="))
            .with_value(
                "ADD1",
                Block::new("q", "text_prompt_ext")
                    .with_field("TYPE", "NUMBER")
                    .with_value("TEXT", Block::new("m", "text").with_field("TEXT", "How many?")),
            ),
    )]);
    let code = compile(&program).unwrap().code;
    assert!(code.contains("print((\"\" + \"n=\" + prompt(\"How many?\", \"number\")));\n"));
    // No answer from the host yields null.
    assert_eq!(execute(&code).lines, vec!["n=null"]);
}

#[test]
fn test_naked_value_block_has_no_mark() {
    let program = BlockProgram::new().with_stack(vec![number("n", "42")]);
    let compiled = compile(&program).unwrap();
    assert_eq!(compiled.code, "42;\n");
    assert!(compiled.block_ids.is_empty());
}

#[test]
fn test_value_block_inside_body_is_rejected() {
    let program = BlockProgram::new().with_stack(vec![Block::new("r", "controls_repeat")
        .with_field("TIMES", "2")
        .with_statement("DO", vec![number("stray", "1")])]);
    let err = compile(&program).unwrap_err();
    assert!(matches!(err, CompileError::Misplaced { ref id, .. } if id == "stray"));
}

#[test]
fn test_power_operator_is_unsupported() {
    let program = BlockProgram::new().with_stack(vec![print(
        "p",
        Block::new("pow", "math_arithmetic")
            .with_field("OP", "POWER")
            .with_value("A", number("a", "2"))
            .with_value("B", number("b", "3")),
    )]);
    assert!(matches!(compile(&program), Err(CompileError::Unsupported { .. })));
}

#[test]
fn test_export_import_compiles_identically() {
    let program = counting_program();
    let exported = xml::to_xml(&program).unwrap();
    let imported = xml::from_xml(&exported).unwrap();
    assert_eq!(compile(&imported).unwrap().code, compile(&program).unwrap().code);
}

#[test]
fn test_driver_compiles_workspace_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let text = xml::to_xml(&counting_program()).unwrap();
    file.write_all(text.as_bytes()).unwrap();

    let out_dir = tempfile::tempdir().unwrap();
    let out_path = out_dir.path().join("program.js");
    let output = Compiler::new(CompileOptions::new(file.path()).output(&out_path))
        .compile()
        .expect("compilation failed");

    assert_eq!(output.source_file, file.path());
    assert_eq!(output.compiled.block_ids.len(), 4);
    assert_eq!(std::fs::read_to_string(&out_path).unwrap(), output.compiled.code);
}
