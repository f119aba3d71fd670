//! Blockly XML import and export
//!
//! Reads and writes the subset of the Blockly XML dialect the editor saves:
//! `<variables>`, `<block>`/`<shadow>` with `<mutation>`, `<field>`,
//! `<value>`, `<statement>` and `<next>`. Anything else is skipped on import.

use std::collections::BTreeMap;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::block::{Block, BlockProgram, Field, ValueInput, Variable};
use crate::error::{CompileError, Result};

const XMLNS: &str = "https://developers.google.com/blockly/xml";

type XmlReader<'a> = Reader<&'a [u8]>;

/// Parse a workspace document.
pub fn from_xml(text: &str) -> Result<BlockProgram> {
    let mut reader = Reader::from_str(text);
    let mut program = BlockProgram::new();

    // Find the root element.
    loop {
        match reader.read_event().map_err(CompileError::xml)? {
            Event::Start(e) if e.name().as_ref() == b"xml" => break,
            Event::Empty(e) if e.name().as_ref() == b"xml" => return Ok(program),
            Event::Start(e) | Event::Empty(e) => {
                return Err(CompileError::xml(format!(
                    "expected <xml> root element, found <{}>",
                    String::from_utf8_lossy(e.name().as_ref())
                )));
            }
            Event::Eof => return Err(CompileError::xml("missing <xml> root element")),
            _ => {}
        }
    }

    loop {
        match reader.read_event().map_err(CompileError::xml)? {
            Event::Start(e) => match e.name().as_ref() {
                b"variables" => program.variables = read_variables(&mut reader)?,
                b"block" => program.stacks.push(read_block(&mut reader, &e, false)?),
                _ => skip(&mut reader, &e)?,
            },
            Event::Empty(e) if e.name().as_ref() == b"block" => {
                program.stacks.push(read_block(&mut reader, &e, true)?);
            }
            Event::End(_) => break,
            Event::Eof => return Err(unexpected_eof()),
            _ => {}
        }
    }

    Ok(program)
}

fn read_variables(reader: &mut XmlReader) -> Result<Vec<Variable>> {
    let mut variables = Vec::new();
    loop {
        match reader.read_event().map_err(CompileError::xml)? {
            Event::Start(e) if e.name().as_ref() == b"variable" => {
                let id = attributes(&e)?.remove("id");
                let name = read_text(reader)?;
                variables.push(Variable { id, name });
            }
            Event::Empty(e) if e.name().as_ref() == b"variable" => {
                let id = attributes(&e)?.remove("id");
                variables.push(Variable {
                    id,
                    name: String::new(),
                });
            }
            Event::Start(e) => skip(reader, &e)?,
            Event::End(_) => return Ok(variables),
            Event::Eof => return Err(unexpected_eof()),
            _ => {}
        }
    }
}

/// Read a block element and everything chained after it through `<next>`.
fn read_block(reader: &mut XmlReader, start: &BytesStart, empty: bool) -> Result<Vec<Block>> {
    let mut attrs = attributes(start)?;
    let mut block = Block::new(
        attrs.remove("id").unwrap_or_default(),
        attrs.remove("type").unwrap_or_default(),
    );
    if let (Some(x), Some(y)) = (attrs.get("x"), attrs.get("y")) {
        block.position = Some((coordinate(x)?, coordinate(y)?));
    }
    block.disabled = attrs.get("disabled").is_some_and(|d| d == "true");

    let mut chain = vec![];
    if empty {
        chain.push(block);
        return Ok(chain);
    }

    let mut rest = Vec::new();
    loop {
        match reader.read_event().map_err(CompileError::xml)? {
            Event::Start(e) => {
                let mut attrs = attributes(&e)?;
                let name = attrs.get("name").cloned().unwrap_or_default();
                match e.name().as_ref() {
                    b"mutation" => {
                        block.mutation.extend(attrs);
                        skip(reader, &e)?;
                    }
                    b"field" => {
                        let text = read_text(reader)?;
                        let id = attrs.remove("id");
                        block.fields.insert(name, Field { text, id });
                    }
                    b"value" => {
                        let (chain, shadow) = read_input(reader)?;
                        let input = ValueInput {
                            block: chain.into_iter().next(),
                            shadow,
                        };
                        block.values.insert(name, input);
                    }
                    b"statement" => {
                        let (chain, _) = read_input(reader)?;
                        block.statements.insert(name, chain);
                    }
                    b"next" => rest = read_input(reader)?.0,
                    _ => skip(reader, &e)?,
                }
            }
            Event::Empty(e) => {
                let mut attrs = attributes(&e)?;
                match e.name().as_ref() {
                    b"mutation" => block.mutation.extend(attrs),
                    b"field" => {
                        let name = attrs.get("name").cloned().unwrap_or_default();
                        let id = attrs.remove("id");
                        block.fields.insert(
                            name,
                            Field {
                                text: String::new(),
                                id,
                            },
                        );
                    }
                    _ => {}
                }
            }
            Event::End(_) => break,
            Event::Eof => return Err(unexpected_eof()),
            _ => {}
        }
    }

    chain.push(block);
    chain.extend(rest);
    Ok(chain)
}

/// Contents of a `<value>`, `<statement>` or `<next>` element.
fn read_input(reader: &mut XmlReader) -> Result<(Vec<Block>, Option<Block>)> {
    let mut chain = Vec::new();
    let mut shadow = None;
    loop {
        match reader.read_event().map_err(CompileError::xml)? {
            Event::Start(e) => match e.name().as_ref() {
                b"block" => chain = read_block(reader, &e, false)?,
                b"shadow" => shadow = read_block(reader, &e, false)?.into_iter().next(),
                _ => skip(reader, &e)?,
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"block" => chain = read_block(reader, &e, true)?,
                b"shadow" => shadow = read_block(reader, &e, true)?.into_iter().next(),
                _ => {}
            },
            Event::End(_) => return Ok((chain, shadow)),
            Event::Eof => return Err(unexpected_eof()),
            _ => {}
        }
    }
}

/// Text content up to the closing tag of the current element.
fn read_text(reader: &mut XmlReader) -> Result<String> {
    let mut text = String::new();
    loop {
        match reader.read_event().map_err(CompileError::xml)? {
            Event::Text(t) => text.push_str(&t.unescape().map_err(CompileError::xml)?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::Start(e) => skip(reader, &e)?,
            Event::End(_) => return Ok(text),
            Event::Eof => return Err(unexpected_eof()),
            _ => {}
        }
    }
}

fn skip(reader: &mut XmlReader, start: &BytesStart) -> Result<()> {
    reader
        .read_to_end(start.name())
        .map_err(CompileError::xml)?;
    Ok(())
}

fn attributes(start: &BytesStart) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(CompileError::xml)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(CompileError::xml)?.into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn coordinate(text: &str) -> Result<i64> {
    text.trim()
        .parse::<f64>()
        .map(|v| v.round() as i64)
        .map_err(|_| CompileError::xml(format!("invalid block coordinate '{}'", text)))
}

fn unexpected_eof() -> CompileError {
    CompileError::xml("unexpected end of document")
}

/// Serialize a workspace document.
pub fn to_xml(program: &BlockProgram) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    let mut root = BytesStart::new("xml");
    root.push_attribute(("xmlns", XMLNS));
    write(&mut writer, Event::Start(root))?;

    if !program.variables.is_empty() {
        write(&mut writer, Event::Start(BytesStart::new("variables")))?;
        for variable in &program.variables {
            let mut start = BytesStart::new("variable");
            if let Some(id) = &variable.id {
                start.push_attribute(("id", id.as_str()));
            }
            write_text_element(&mut writer, start, &variable.name)?;
        }
        write(&mut writer, Event::End(BytesEnd::new("variables")))?;
    }

    for stack in &program.stacks {
        if let Some((first, rest)) = stack.split_first() {
            write_block(&mut writer, "block", first, rest)?;
        }
    }

    write(&mut writer, Event::End(BytesEnd::new("xml")))?;
    String::from_utf8(writer.into_inner()).map_err(CompileError::xml)
}

fn write_block(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    block: &Block,
    rest: &[Block],
) -> Result<()> {
    let mut start = BytesStart::new(tag);
    start.push_attribute(("type", block.kind.as_str()));
    start.push_attribute(("id", block.id.as_str()));
    if let Some((x, y)) = block.position {
        start.push_attribute(("x", x.to_string().as_str()));
        start.push_attribute(("y", y.to_string().as_str()));
    }
    if block.disabled {
        start.push_attribute(("disabled", "true"));
    }

    let has_content = !block.mutation.is_empty()
        || !block.fields.is_empty()
        || !block.values.is_empty()
        || block.statements.values().any(|chain| !chain.is_empty())
        || !rest.is_empty();
    if !has_content {
        return write(writer, Event::Empty(start));
    }
    write(writer, Event::Start(start))?;

    if !block.mutation.is_empty() {
        let mut mutation = BytesStart::new("mutation");
        for (name, value) in &block.mutation {
            mutation.push_attribute((name.as_str(), value.as_str()));
        }
        write(writer, Event::Empty(mutation))?;
    }

    for (name, field) in &block.fields {
        let mut start = BytesStart::new("field");
        start.push_attribute(("name", name.as_str()));
        if let Some(id) = &field.id {
            start.push_attribute(("id", id.as_str()));
        }
        write_text_element(writer, start, &field.text)?;
    }

    for (name, input) in &block.values {
        let mut start = BytesStart::new("value");
        start.push_attribute(("name", name.as_str()));
        write(writer, Event::Start(start))?;
        if let Some(shadow) = &input.shadow {
            write_block(writer, "shadow", shadow, &[])?;
        }
        if let Some(plugged) = &input.block {
            write_block(writer, "block", plugged, &[])?;
        }
        write(writer, Event::End(BytesEnd::new("value")))?;
    }

    for (name, chain) in &block.statements {
        if let Some((first, tail)) = chain.split_first() {
            let mut start = BytesStart::new("statement");
            start.push_attribute(("name", name.as_str()));
            write(writer, Event::Start(start))?;
            write_block(writer, "block", first, tail)?;
            write(writer, Event::End(BytesEnd::new("statement")))?;
        }
    }

    if let Some((next, tail)) = rest.split_first() {
        write(writer, Event::Start(BytesStart::new("next")))?;
        write_block(writer, "block", next, tail)?;
        write(writer, Event::End(BytesEnd::new("next")))?;
    }

    write(writer, Event::End(BytesEnd::new(tag)))
}

/// An element holding only text; empty text is written as a self-closing tag.
fn write_text_element(writer: &mut Writer<Vec<u8>>, start: BytesStart, text: &str) -> Result<()> {
    if text.is_empty() {
        return write(writer, Event::Empty(start));
    }
    let end = start.to_end().into_owned();
    write(writer, Event::Start(start))?;
    write(writer, Event::Text(BytesText::new(text)))?;
    write(writer, Event::End(end))
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event) -> Result<()> {
    writer.write_event(event).map_err(CompileError::xml)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<xml xmlns="https://developers.google.com/blockly/xml">
  <variables>
    <variable id="v1">steps</variable>
  </variables>
  <block type="variables_set" id="a" x="10" y="20">
    <field name="VAR" id="v1">steps</field>
    <value name="VALUE">
      <shadow type="math_number" id="s"><field name="NUM">5</field></shadow>
    </value>
    <next>
      <block type="capture" id="b">
        <next>
          <block type="wait_seconds" id="c"><field name="SECONDS">2</field></block>
        </next>
      </block>
    </next>
  </block>
</xml>"#;

    #[test]
    fn test_import_reads_chain_and_fields() {
        let program = from_xml(SAMPLE).unwrap();
        assert_eq!(program.variables.len(), 1);
        assert_eq!(program.variables[0].id.as_deref(), Some("v1"));
        assert_eq!(program.stacks.len(), 1);

        let stack = &program.stacks[0];
        let ids: Vec<&str> = stack.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(stack[0].position, Some((10, 20)));
        assert_eq!(stack[0].input("VALUE").and_then(|b| b.field("NUM")), Some("5"));
        assert_eq!(stack[2].field("SECONDS"), Some("2"));
    }

    #[test]
    fn test_export_then_import_preserves_program() {
        let program = from_xml(SAMPLE).unwrap();
        let exported = to_xml(&program).unwrap();
        assert_eq!(from_xml(&exported).unwrap(), program);
    }

    #[test]
    fn test_unknown_elements_are_skipped() {
        let text = r#"<xml><comment pinned="true">note <b>bold</b></comment>
  <block type="capture" id="x"><data>payload</data></block></xml>"#;
        let program = from_xml(text).unwrap();
        assert_eq!(program.stacks.len(), 1);
        assert_eq!(program.stacks[0][0].kind, "capture");
    }

    #[test]
    fn test_escaped_text_round_trips() {
        let program = BlockProgram::new().with_stack(vec![Block::new("t", "text")
            .with_field("TEXT", "a < b & \"c\"")]);
        let exported = to_xml(&program).unwrap();
        assert_eq!(from_xml(&exported).unwrap(), program);
    }

    #[test]
    fn test_rejects_wrong_root() {
        assert!(matches!(from_xml("<html></html>"), Err(CompileError::Xml(_))));
    }
}
