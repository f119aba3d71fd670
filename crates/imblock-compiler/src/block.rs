//! The visual block program model
//!
//! Mirrors the structure of a Blockly workspace: top-level stacks of blocks,
//! each block carrying named fields, value inputs (one plugged block each),
//! statement inputs (an ordered chain of blocks) and mutation attributes.
//! Maps are ordered so serialization and compilation are deterministic.

use std::collections::BTreeMap;

/// A whole workspace.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockProgram {
    /// Workspace variables, in declaration order.
    pub variables: Vec<Variable>,
    /// Top-level stacks; each is a chain of blocks joined by `next`.
    pub stacks: Vec<Vec<Block>>,
}

impl BlockProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a workspace variable.
    pub fn with_variable(mut self, name: impl Into<String>) -> Self {
        self.variables.push(Variable {
            id: None,
            name: name.into(),
        });
        self
    }

    /// Add a top-level stack.
    pub fn with_stack(mut self, stack: Vec<Block>) -> Self {
        self.stacks.push(stack);
        self
    }

    /// Find a block anywhere in the workspace by id.
    pub fn find(&self, id: &str) -> Option<&Block> {
        self.stacks.iter().flatten().find_map(|b| b.find(id))
    }

    /// Total number of blocks, nested ones included.
    pub fn block_count(&self) -> usize {
        self.stacks.iter().flatten().map(Block::count).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub id: Option<String>,
    pub name: String,
}

/// A field value, e.g. a dropdown choice or a variable reference.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Field {
    pub text: String,
    /// Variable id for variable fields.
    pub id: Option<String>,
}

/// A value input socket: the plugged block and/or its shadow default.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueInput {
    pub block: Option<Block>,
    pub shadow: Option<Block>,
}

impl ValueInput {
    /// The block that supplies the value: the plugged block, else the shadow.
    pub fn effective(&self) -> Option<&Block> {
        self.block.as_ref().or(self.shadow.as_ref())
    }
}

/// A single block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub id: String,
    /// Block type name, e.g. `controls_if` or `move_stage`.
    pub kind: String,
    /// Workspace coordinates; only top-level blocks have them.
    pub position: Option<(i64, i64)>,
    pub disabled: bool,
    pub fields: BTreeMap<String, Field>,
    pub values: BTreeMap<String, ValueInput>,
    pub statements: BTreeMap<String, Vec<Block>>,
    pub mutation: BTreeMap<String, String>,
}

impl Block {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn at(mut self, x: i64, y: i64) -> Self {
        self.position = Some((x, y));
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.fields.insert(
            name.into(),
            Field {
                text: text.into(),
                id: None,
            },
        );
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, block: Block) -> Self {
        self.values.entry(name.into()).or_default().block = Some(block);
        self
    }

    pub fn with_shadow(mut self, name: impl Into<String>, block: Block) -> Self {
        self.values.entry(name.into()).or_default().shadow = Some(block);
        self
    }

    pub fn with_statement(mut self, name: impl Into<String>, blocks: Vec<Block>) -> Self {
        self.statements.insert(name.into(), blocks);
        self
    }

    pub fn with_mutation(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.mutation.insert(name.into(), value.into());
        self
    }

    /// Text of a field.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|f| f.text.as_str())
    }

    /// The block supplying a value input.
    pub fn input(&self, name: &str) -> Option<&Block> {
        self.values.get(name).and_then(ValueInput::effective)
    }

    /// The chain plugged into a statement input (empty if none).
    pub fn body(&self, name: &str) -> &[Block] {
        self.statements.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// A mutation attribute parsed as a count; missing or invalid counts are 0.
    pub fn mutation_count(&self, name: &str) -> usize {
        self.mutation
            .get(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    fn children(&self) -> impl Iterator<Item = &Block> {
        self.values
            .values()
            .flat_map(|v| v.block.iter().chain(v.shadow.iter()))
            .chain(self.statements.values().flatten())
    }

    fn find(&self, id: &str) -> Option<&Block> {
        if self.id == id {
            return Some(self);
        }
        self.children().find_map(|c| c.find(id))
    }

    fn count(&self) -> usize {
        1 + self.children().map(Block::count).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_nested_block() {
        let program = BlockProgram::new().with_stack(vec![Block::new("loop", "controls_repeat_ext")
            .with_shadow("TIMES", Block::new("n", "math_number").with_field("NUM", "3"))
            .with_statement("DO", vec![Block::new("cap", "capture")])]);
        assert_eq!(program.find("cap").map(|b| b.kind.as_str()), Some("capture"));
        assert_eq!(program.find("n").map(|b| b.kind.as_str()), Some("math_number"));
        assert!(program.find("missing").is_none());
        assert_eq!(program.block_count(), 3);
    }

    #[test]
    fn test_plugged_block_covers_shadow() {
        let block = Block::new("p", "text_print")
            .with_shadow("TEXT", Block::new("s", "text").with_field("TEXT", "default"))
            .with_value("TEXT", Block::new("v", "variables_get").with_field("VAR", "x"));
        assert_eq!(block.input("TEXT").map(|b| b.id.as_str()), Some("v"));
    }
}
