//! Code generation module
//!
//! Transforms a block program into script text for the interpreter. Every
//! statement block is preceded by `mark("<id>");`, and every binary
//! expression is parenthesized so operator precedence never depends on the
//! surrounding context.

use std::collections::HashMap;
use std::fmt::Write as _;

use imblock_eval::Value;
use tracing::debug;

use crate::block::{Block, BlockProgram};
use crate::error::{CompileError, Result};
use crate::names::NameDb;

/// Output of compilation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompiledProgram {
    /// Instrumented script text.
    pub code: String,
    /// Ids of the statement blocks that received a `mark` call, in text order.
    pub block_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Statement,
    Value,
}

fn shape(kind: &str) -> Option<Shape> {
    let shape = match kind {
        "capture" | "autofocus" | "wait_seconds" | "move_stage" | "move_stage_3d" | "text_print"
        | "variables_set" | "math_change" | "controls_if" | "controls_repeat"
        | "controls_repeat_ext" | "controls_whileUntil" | "controls_for"
        | "controls_flow_statements" => Shape::Statement,
        "get_position" | "get_sharpness_metric" | "text" | "text_join" | "text_prompt"
        | "text_prompt_ext" | "math_number" | "math_arithmetic" | "math_modulo" | "logic_boolean"
        | "logic_null" | "logic_compare" | "logic_operation" | "logic_negate" | "variables_get" => {
            Shape::Value
        }
        _ => return None,
    };
    Some(shape)
}

/// Script generator for block programs
pub struct CodeGenerator {
    /// Indentation level for pretty-printing
    indent: usize,
    /// Output buffer
    output: String,
    names: NameDb,
    /// Workspace variable id to name, for variable fields that only carry an id
    variables_by_id: HashMap<String, String>,
    block_ids: Vec<String>,
}

impl CodeGenerator {
    pub fn new() -> Self {
        Self {
            indent: 0,
            output: String::new(),
            names: NameDb::new(),
            variables_by_id: HashMap::new(),
            block_ids: Vec::new(),
        }
    }

    /// Generate instrumented text for a whole workspace.
    pub fn generate(&mut self, program: &BlockProgram) -> Result<CompiledProgram> {
        self.indent = 0;
        self.output.clear();
        self.names = NameDb::new();
        self.block_ids.clear();
        self.variables_by_id = program
            .variables
            .iter()
            .filter_map(|v| v.id.clone().map(|id| (id, v.name.clone())))
            .collect();

        let stacks = ordered_stacks(program);

        // Variables are declared up front, in order of first reference.
        for stack in &stacks {
            for block in stack.iter() {
                self.collect_variables(block);
            }
        }
        for variable in &program.variables {
            self.names.variable(&variable.name);
        }
        let declared = self.names.declared().to_vec();
        for name in &declared {
            writeln!(self.output, "var {} = null;", name)?;
        }
        if !declared.is_empty() {
            self.output.push('\n');
        }

        for (i, stack) in stacks.iter().enumerate() {
            if i > 0 {
                self.output.push('\n');
            }
            self.generate_top_level(stack)?;
        }

        debug!(
            bytes = self.output.len(),
            marks = self.block_ids.len(),
            variables = declared.len(),
            "generated program"
        );

        Ok(CompiledProgram {
            code: std::mem::take(&mut self.output),
            block_ids: std::mem::take(&mut self.block_ids),
        })
    }

    fn collect_variables(&mut self, block: &Block) {
        if matches!(
            block.kind.as_str(),
            "variables_get" | "variables_set" | "math_change" | "controls_for"
        ) {
            let name = self.variable_name(block);
            self.names.variable(&name);
        }
        for input in block.values.values() {
            if let Some(child) = input.effective() {
                self.collect_variables(child);
            }
        }
        for chain in block.statements.values() {
            for child in chain {
                self.collect_variables(child);
            }
        }
    }

    /// Workspace name of the variable a block refers to.
    fn variable_name(&self, block: &Block) -> String {
        match block.fields.get("VAR") {
            Some(field) if !field.text.is_empty() => field.text.clone(),
            Some(field) => field
                .id
                .as_ref()
                .and_then(|id| self.variables_by_id.get(id))
                .cloned()
                .unwrap_or_default(),
            None => String::new(),
        }
    }

    fn variable(&mut self, block: &Block) -> String {
        let name = self.variable_name(block);
        self.names.variable(&name)
    }

    /// A top-level stack; a lone value block becomes an unmarked expression statement.
    fn generate_top_level(&mut self, stack: &[Block]) -> Result<()> {
        for block in stack {
            if block.disabled {
                continue;
            }
            match shape(&block.kind) {
                Some(Shape::Value) => {
                    let expr = self.generate_expr(block)?;
                    self.write_indent();
                    writeln!(self.output, "{};", expr)?;
                }
                _ => self.generate_statement(block)?,
            }
        }
        Ok(())
    }

    fn generate_chain(&mut self, chain: &[Block]) -> Result<()> {
        self.indent += 1;
        for block in chain {
            if !block.disabled {
                self.generate_statement(block)?;
            }
        }
        self.indent -= 1;
        Ok(())
    }

    fn generate_statement(&mut self, block: &Block) -> Result<()> {
        match shape(&block.kind) {
            Some(Shape::Statement) => {}
            Some(Shape::Value) => {
                return Err(CompileError::Misplaced {
                    id: block.id.clone(),
                    kind: block.kind.clone(),
                    context: "as a statement",
                });
            }
            None => return Err(unknown(block)),
        }

        self.block_ids.push(block.id.clone());
        self.line(&format!("mark({});", quote(&block.id)))?;

        match block.kind.as_str() {
            "capture" => self.line("capture();"),
            "autofocus" => {
                let kind = match block.field("autofocus_type") {
                    Some("medium_autofocus") => "medium",
                    Some("fine_autofocus") => "fine",
                    _ => "fast",
                };
                self.line(&format!("autofocus({});", quote(kind)))
            }
            "wait_seconds" => {
                let seconds = number_literal(block.field("SECONDS").unwrap_or("0"));
                self.line(&format!("wait_seconds({});", seconds))
            }
            "move_stage" => {
                let axis = block
                    .field("axis_name")
                    .and_then(|a| a.chars().next())
                    .unwrap_or('x')
                    .to_ascii_uppercase()
                    .to_string();
                let mode = move_mode(block);
                let steps = self.value_or(block, "steps", "0")?;
                self.line(&format!(
                    "move_stage({}, {}, {});",
                    quote(&axis),
                    quote(mode),
                    steps
                ))
            }
            "move_stage_3d" => {
                let mode = move_mode(block);
                let x = self.value_or(block, "x_steps", "0")?;
                let y = self.value_or(block, "y_steps", "0")?;
                let z = self.value_or(block, "z_steps", "0")?;
                self.line(&format!("move_stage_3d({}, {}, {}, {});", quote(mode), x, y, z))
            }
            "text_print" => {
                let text = self.value_or(block, "TEXT", "\"\"")?;
                self.line(&format!("print({});", text))
            }
            "variables_set" => {
                let name = self.variable(block);
                let value = self.value_or(block, "VALUE", "0")?;
                self.line(&format!("{} = {};", name, value))
            }
            "math_change" => {
                let name = self.variable(block);
                let delta = self.value_or(block, "DELTA", "0")?;
                self.line(&format!("{} += {};", name, delta))
            }
            "controls_if" => self.generate_if(block),
            "controls_repeat" | "controls_repeat_ext" => self.generate_repeat(block),
            "controls_whileUntil" => {
                let cond = self.value_or(block, "BOOL", "false")?;
                let cond = if block.field("MODE") == Some("UNTIL") {
                    format!("!({})", cond)
                } else {
                    cond
                };
                self.line(&format!("while ({}) {{", cond))?;
                self.generate_chain(block.body("DO"))?;
                self.line("}")
            }
            "controls_for" => self.generate_for(block),
            "controls_flow_statements" => match block.field("FLOW") {
                Some("CONTINUE") => self.line("continue;"),
                _ => self.line("break;"),
            },
            _ => Err(unknown(block)),
        }
    }

    /// Generate if / else if / else
    fn generate_if(&mut self, block: &Block) -> Result<()> {
        let declared = block.mutation_count("elseif").saturating_add(1);
        let branches = socket_count(block, declared, &["IF", "DO"])?;
        let has_else = block.mutation_count("else") > 0 || block.statements.contains_key("ELSE");

        for n in 0..branches {
            let cond = self.value_or(block, &format!("IF{}", n), "false")?;
            if n == 0 {
                self.line(&format!("if ({}) {{", cond))?;
            } else {
                self.line(&format!("}} else if ({}) {{", cond))?;
            }
            self.generate_chain(block.body(&format!("DO{}", n)))?;
        }
        if has_else {
            self.line("} else {")?;
            self.generate_chain(block.body("ELSE"))?;
        }
        self.line("}")
    }

    /// Generate a counted loop; a non-literal count is evaluated once up front.
    fn generate_repeat(&mut self, block: &Block) -> Result<()> {
        let count = if block.kind == "controls_repeat" {
            number_literal(block.field("TIMES").unwrap_or("0"))
        } else {
            match block.input("TIMES") {
                Some(times) if times.kind == "math_number" => {
                    number_literal(times.field("NUM").unwrap_or("0"))
                }
                Some(times) => {
                    let expr = self.generate_expr(times)?;
                    let end = self.names.distinct("repeat_end");
                    self.line(&format!("var {} = {};", end, expr))?;
                    end
                }
                None => "0".to_string(),
            }
        };
        let counter = self.names.distinct("count");
        self.line(&format!(
            "for (var {c} = 0; {c} < {n}; {c} += 1) {{",
            c = counter,
            n = count
        ))?;
        self.generate_chain(block.body("DO"))?;
        self.line("}")
    }

    /// Generate a `controls_for` counting loop.
    fn generate_for(&mut self, block: &Block) -> Result<()> {
        let var = self.variable(block);
        let literal = |name: &str| -> Option<f64> {
            match block.input(name) {
                Some(b) if b.kind == "math_number" => {
                    b.field("NUM").and_then(|n| n.trim().parse().ok())
                }
                Some(_) => None,
                None => Some(if name == "BY" { 1.0 } else { 0.0 }),
            }
        };

        if let (Some(from), Some(to), Some(by)) = (literal("FROM"), literal("TO"), literal("BY")) {
            let step = format_number(by.abs());
            let (cmp, op) = if from <= to { ("<=", "+=") } else { (">=", "-=") };
            self.line(&format!(
                "for ({v} = {from}; {v} {cmp} {to}; {v} {op} {step}) {{",
                v = var,
                from = format_number(from),
                to = format_number(to),
                cmp = cmp,
                op = op,
                step = step
            ))?;
        } else {
            let from = self.value_or(block, "FROM", "0")?;
            let to = self.value_or(block, "TO", "0")?;
            let by = self.value_or(block, "BY", "1")?;
            let start = self.names.distinct(&format!("{}_start", var));
            let end = self.names.distinct(&format!("{}_end", var));
            let inc = self.names.distinct(&format!("{}_inc", var));
            self.line(&format!("var {} = {};", start, from))?;
            self.line(&format!("var {} = {};", end, to))?;
            self.line(&format!("var {} = {};", inc, by))?;
            self.line(&format!("if ({} < 0) {{", inc))?;
            self.line(&format!("  {i} = -{i};", i = inc))?;
            self.line("}")?;
            self.line(&format!("if ({} > {}) {{", start, end))?;
            self.line(&format!("  {i} = -{i};", i = inc))?;
            self.line("}")?;
            self.line(&format!(
                "for ({v} = {s}; (({i} >= 0) && ({v} <= {e})) || (({i} < 0) && ({v} >= {e})); {v} += {i}) {{",
                v = var,
                s = start,
                e = end,
                i = inc
            ))?;
        }
        self.generate_chain(block.body("DO"))?;
        self.line("}")
    }

    /// Code for a value input, or `default` if nothing is plugged in.
    fn value_or(&mut self, block: &Block, input: &str, default: &str) -> Result<String> {
        match block.input(input) {
            Some(child) => self.generate_expr(child),
            None => Ok(default.to_string()),
        }
    }

    /// Generate code for a value block
    fn generate_expr(&mut self, block: &Block) -> Result<String> {
        match shape(&block.kind) {
            Some(Shape::Value) => {}
            Some(Shape::Statement) => {
                return Err(CompileError::Misplaced {
                    id: block.id.clone(),
                    kind: block.kind.clone(),
                    context: "as a value",
                });
            }
            None => return Err(unknown(block)),
        }

        let code = match block.kind.as_str() {
            "math_number" => number_literal(block.field("NUM").unwrap_or("0")),
            "text" => quote(block.field("TEXT").unwrap_or("")),
            "logic_boolean" => {
                if block.field("BOOL") == Some("TRUE") { "true" } else { "false" }.to_string()
            }
            "logic_null" => "null".to_string(),
            "variables_get" => self.variable(block),
            "get_position" => {
                let axis = block.field("axis_name").unwrap_or("x").to_ascii_lowercase();
                format!("get_position({})", quote(&axis))
            }
            "get_sharpness_metric" => "get_sharpness_metric()".to_string(),
            "math_arithmetic" => {
                let op = match block.field("OP") {
                    Some("ADD") | None => "+",
                    Some("MINUS") => "-",
                    Some("MULTIPLY") => "*",
                    Some("DIVIDE") => "/",
                    Some(other) => {
                        return Err(CompileError::unsupported(
                            &block.id,
                            format!("arithmetic operator {}", other),
                        ));
                    }
                };
                let a = self.value_or(block, "A", "0")?;
                let b = self.value_or(block, "B", "0")?;
                format!("({} {} {})", a, op, b)
            }
            "math_modulo" => {
                let a = self.value_or(block, "DIVIDEND", "0")?;
                let b = self.value_or(block, "DIVISOR", "0")?;
                format!("({} % {})", a, b)
            }
            "logic_compare" => {
                let op = match block.field("OP") {
                    Some("NEQ") => "!=",
                    Some("LT") => "<",
                    Some("LTE") => "<=",
                    Some("GT") => ">",
                    Some("GTE") => ">=",
                    _ => "==",
                };
                let a = self.value_or(block, "A", "0")?;
                let b = self.value_or(block, "B", "0")?;
                format!("({} {} {})", a, op, b)
            }
            "logic_operation" => {
                let op = if block.field("OP") == Some("OR") { "||" } else { "&&" };
                let a = self.value_or(block, "A", "false")?;
                let b = self.value_or(block, "B", "false")?;
                format!("({} {} {})", a, op, b)
            }
            "logic_negate" => format!("!({})", self.value_or(block, "BOOL", "true")?),
            "text_join" => {
                let items = socket_count(block, block.mutation_count("items"), &["ADD"])?;
                if items == 0 {
                    "\"\"".to_string()
                } else {
                    let mut code = String::from("(\"\"");
                    for n in 0..items {
                        let part = self.value_or(block, &format!("ADD{}", n), "\"\"")?;
                        write!(code, " + {}", part)?;
                    }
                    code.push(')');
                    code
                }
            }
            "text_prompt" | "text_prompt_ext" => {
                let message = if block.kind == "text_prompt" {
                    quote(block.field("TEXT").unwrap_or(""))
                } else {
                    self.value_or(block, "TEXT", "\"\"")?
                };
                if block.field("TYPE") == Some("NUMBER") {
                    format!("prompt({}, \"number\")", message)
                } else {
                    format!("prompt({})", message)
                }
            }
            _ => return Err(unknown(block)),
        };
        Ok(code)
    }

    fn line(&mut self, text: &str) -> Result<()> {
        self.write_indent();
        self.output.push_str(text);
        self.output.push('\n');
        Ok(())
    }

    fn write_indent(&mut self) {
        for _ in 0..self.indent {
            self.output.push_str("  ");
        }
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown(block: &Block) -> CompileError {
    CompileError::UnknownBlock {
        id: block.id.clone(),
        kind: block.kind.clone(),
    }
}

/// Top-level stacks in the order the editor runs them: by position, top to bottom.
fn ordered_stacks(program: &BlockProgram) -> Vec<&[Block]> {
    let mut stacks: Vec<&[Block]> = program
        .stacks
        .iter()
        .filter(|s| !s.is_empty())
        .map(Vec::as_slice)
        .collect();
    stacks.sort_by_key(|s| match s[0].position {
        Some((x, y)) => (0, y, x),
        None => (1, 0, 0),
    });
    stacks
}

fn move_mode(block: &Block) -> &'static str {
    if block.field("abs_or_rel") == Some("ABSOLUTE") {
        "absolute"
    } else {
        "relative"
    }
}

fn format_number(n: f64) -> String {
    Value::Number(n).to_string_value()
}

/// A numeric field as a literal; negatives are parenthesized, garbage becomes 0.
fn number_literal(text: &str) -> String {
    match text.trim().parse::<f64>() {
        Ok(n) if n.is_finite() && n < 0.0 => format!("({})", format_number(n)),
        Ok(n) if n.is_finite() => format_number(n),
        _ => "0".to_string(),
    }
}

/// Quote text as a string literal.
pub(crate) fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Most numbered sockets (`IFn`/`DOn`, `ADDn`) a single block may carry.
const MAX_SOCKETS: usize = 256;

/// Number of numbered sockets on `block`: the declared mutation count,
/// widened by the highest `<prefix>n` input actually present.
fn socket_count(block: &Block, declared: usize, prefixes: &[&str]) -> Result<usize> {
    let mut count = declared;
    for key in block.values.keys().chain(block.statements.keys()) {
        let index = prefixes
            .iter()
            .find_map(|prefix| key.strip_prefix(prefix))
            .and_then(|n| n.parse::<usize>().ok());
        if let Some(index) = index {
            count = count.max(index.checked_add(1).unwrap_or(usize::MAX));
        }
    }
    if count > MAX_SOCKETS {
        return Err(CompileError::unsupported(
            &block.id,
            format!("{} inputs (at most {})", count, MAX_SOCKETS),
        ));
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("say \"hi\"\n"), r#""say \"hi\"\n""#);
        assert_eq!(quote(r"a\b"), r#""a\\b""#);
    }

    #[test]
    fn test_number_literals() {
        assert_eq!(number_literal("10"), "10");
        assert_eq!(number_literal("2.5"), "2.5");
        assert_eq!(number_literal("-3"), "(-3)");
        assert_eq!(number_literal("abc"), "0");
    }

    #[test]
    fn test_stacks_ordered_by_position() {
        let program = BlockProgram::new()
            .with_stack(vec![Block::new("low", "capture").at(0, 200)])
            .with_stack(vec![Block::new("loose", "capture")])
            .with_stack(vec![Block::new("high", "capture").at(50, 10)]);
        let order: Vec<&str> = ordered_stacks(&program).iter().map(|s| s[0].id.as_str()).collect();
        assert_eq!(order, vec!["high", "low", "loose"]);
    }

    #[test]
    fn test_statement_in_value_socket_is_rejected() {
        let program = BlockProgram::new().with_stack(vec![
            Block::new("p", "text_print").with_value("TEXT", Block::new("c", "capture")),
        ]);
        let err = CodeGenerator::new().generate(&program).unwrap_err();
        assert!(matches!(err, CompileError::Misplaced { ref id, .. } if id == "c"), "{}", err);
    }

    #[test]
    fn test_unknown_block_is_rejected() {
        let program = BlockProgram::new().with_stack(vec![Block::new("z", "lists_create_with")]);
        let err = CodeGenerator::new().generate(&program).unwrap_err();
        assert!(matches!(err, CompileError::UnknownBlock { .. }));
    }

    #[test]
    fn test_disabled_blocks_are_skipped() {
        let mut skipped = Block::new("b2", "capture");
        skipped.disabled = true;
        let program = BlockProgram::new().with_stack(vec![Block::new("b1", "capture"), skipped]);
        let compiled = CodeGenerator::new().generate(&program).unwrap();
        assert_eq!(compiled.block_ids, vec!["b1"]);
    }

    #[test]
    fn test_oversized_socket_numbers_are_rejected() {
        let huge_do = Block::new("if", "controls_if")
            .with_statement(format!("DO{}", usize::MAX), vec![Block::new("c", "capture")]);
        let program = BlockProgram::new().with_stack(vec![huge_do]);
        let err = CodeGenerator::new().generate(&program).unwrap_err();
        assert!(matches!(err, CompileError::Unsupported { ref id, .. } if id == "if"), "{}", err);

        let many_elseifs = Block::new("if", "controls_if").with_mutation("elseif", "4000000000");
        let program = BlockProgram::new().with_stack(vec![many_elseifs]);
        assert!(CodeGenerator::new().generate(&program).is_err());

        let join = Block::new("j", "text_join").with_mutation("items", "99999999");
        let program = BlockProgram::new()
            .with_stack(vec![Block::new("p", "text_print").with_value("TEXT", join)]);
        assert!(matches!(
            CodeGenerator::new().generate(&program),
            Err(CompileError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_if_branches_follow_present_inputs() {
        let block = Block::new("if", "controls_if")
            .with_value("IF1", Block::new("t", "logic_boolean").with_field("BOOL", "TRUE"))
            .with_statement("DO1", vec![Block::new("c", "capture")]);
        let program = BlockProgram::new().with_stack(vec![block]);
        let compiled = CodeGenerator::new().generate(&program).unwrap();
        assert!(compiled.code.contains("} else if (true) {"), "{}", compiled.code);
    }
}
