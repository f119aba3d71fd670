//! pest-based parser from compiled program text to the arena AST.

use pest::Parser;
use pest_derive::Parser;

use crate::ast::{AssignOp, BinOp, BlockId, Expr, ExprId, Program, Stmt, StmtId, UnOp};
use crate::error::Error;
use crate::primitive::Builtin;
use crate::value::Value;

#[derive(Parser)]
#[grammar = "grammar.pest"]
struct ScriptParser;

type Pair<'i> = pest::iterators::Pair<'i, Rule>;

/// Parse compiled program text.
pub fn parse(source: &str) -> Result<Program, Error> {
    let mut pairs =
        ScriptParser::parse(Rule::program, source).map_err(|e| Error::Parse(e.to_string()))?;

    let mut builder = Builder {
        program: Program::new(),
        loop_depth: 0,
    };
    let root = builder.program.root();
    if let Some(program) = pairs.next() {
        builder.fill_block(root, program.into_inner())?;
    }
    Ok(builder.program)
}

struct Builder {
    program: Program,
    /// Nesting depth of loops around the statement being built.
    loop_depth: usize,
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_var
            | Rule::kw_if
            | Rule::kw_else
            | Rule::kw_while
            | Rule::kw_for
            | Rule::kw_break
            | Rule::kw_continue
    )
}

/// Inner pairs of `pair` with the structural keywords dropped.
fn significant(pair: Pair<'_>) -> impl Iterator<Item = Pair<'_>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn at(pair: &Pair<'_>) -> String {
    let (line, col) = pair.line_col();
    format!("line {}:{}", line, col)
}

fn build_error(pair: &Pair<'_>, message: impl std::fmt::Display) -> Error {
    Error::Parse(format!("{} at {}", message, at(pair)))
}

fn missing(pair: &Pair<'_>, what: &str) -> Error {
    build_error(pair, format!("Expected {} in {:?}", what, pair.as_rule()))
}

impl Builder {
    fn fill_block<'i>(
        &mut self,
        block: BlockId,
        pairs: impl Iterator<Item = Pair<'i>>,
    ) -> Result<(), Error> {
        for pair in pairs {
            if pair.as_rule() == Rule::EOI {
                continue;
            }
            let stmt = self.statement(pair)?;
            self.program.push_to_block(block, stmt);
        }
        Ok(())
    }

    fn block(&mut self, pair: Pair<'_>) -> Result<BlockId, Error> {
        let id = self.program.new_block();
        self.fill_block(id, pair.into_inner())?;
        Ok(id)
    }

    fn loop_body(&mut self, pair: Pair<'_>) -> Result<BlockId, Error> {
        self.loop_depth += 1;
        let body = self.block(pair);
        self.loop_depth -= 1;
        body
    }

    fn statement(&mut self, pair: Pair<'_>) -> Result<StmtId, Error> {
        let stmt = match pair.as_rule() {
            Rule::var_binding => self.var_binding(pair)?,
            Rule::assign => self.assign(pair)?,
            Rule::expr_stmt => {
                let inner = pair
                    .clone()
                    .into_inner()
                    .next()
                    .ok_or_else(|| missing(&pair, "expression"))?;
                Stmt::Expr(self.expr(inner)?)
            }
            Rule::if_stmt => {
                let mut branches = Vec::new();
                let mut else_block = None;
                for part in significant(pair) {
                    match part.as_rule() {
                        Rule::cond_block => {
                            let mut inner = part.clone().into_inner();
                            let cond = inner.next().ok_or_else(|| missing(&part, "condition"))?;
                            let body = inner.next().ok_or_else(|| missing(&part, "block"))?;
                            let cond = self.expr(cond)?;
                            branches.push((cond, self.block(body)?));
                        }
                        Rule::else_clause => {
                            let body = significant(part.clone())
                                .next()
                                .ok_or_else(|| missing(&part, "block"))?;
                            else_block = Some(self.block(body)?);
                        }
                        _ => return Err(build_error(&part, "Unexpected if clause")),
                    }
                }
                Stmt::If { branches, else_block }
            }
            Rule::while_stmt => {
                let mut inner = significant(pair.clone());
                let cond = inner.next().ok_or_else(|| missing(&pair, "condition"))?;
                let body = inner.next().ok_or_else(|| missing(&pair, "block"))?;
                let cond = self.expr(cond)?;
                Stmt::While {
                    cond,
                    body: self.loop_body(body)?,
                }
            }
            Rule::for_stmt => self.for_stmt(pair)?,
            Rule::break_stmt | Rule::continue_stmt => {
                let is_break = pair.as_rule() == Rule::break_stmt;
                if self.loop_depth == 0 {
                    let word = if is_break { "break" } else { "continue" };
                    return Err(build_error(&pair, format!("'{}' outside of a loop", word)));
                }
                if is_break {
                    Stmt::Break
                } else {
                    Stmt::Continue
                }
            }
            other => return Err(build_error(&pair, format!("Unexpected statement {:?}", other))),
        };
        Ok(self.program.add_stmt(stmt))
    }

    fn for_stmt(&mut self, pair: Pair<'_>) -> Result<Stmt, Error> {
        let mut init = None;
        let mut cond = None;
        let mut update = None;
        let mut body = None;
        for part in significant(pair.clone()) {
            match part.as_rule() {
                Rule::for_init => {
                    if let Some(inner) = part.into_inner().next() {
                        let stmt = match inner.as_rule() {
                            Rule::var_binding => self.var_binding(inner)?,
                            _ => self.assign(inner)?,
                        };
                        init = Some(self.program.add_stmt(stmt));
                    }
                }
                Rule::for_cond => {
                    if let Some(inner) = part.into_inner().next() {
                        cond = Some(self.expr(inner)?);
                    }
                }
                Rule::for_update => {
                    if let Some(inner) = part.into_inner().next() {
                        let stmt = self.assign(inner)?;
                        update = Some(self.program.add_stmt(stmt));
                    }
                }
                Rule::block => body = Some(self.loop_body(part)?),
                _ => return Err(build_error(&part, "Unexpected for clause")),
            }
        }
        let body = body.ok_or_else(|| missing(&pair, "loop body"))?;
        Ok(Stmt::For {
            init,
            cond,
            update,
            body,
        })
    }

    fn var_binding(&mut self, pair: Pair<'_>) -> Result<Stmt, Error> {
        let mut inner = significant(pair.clone());
        let name_pair = inner.next().ok_or_else(|| missing(&pair, "variable name"))?;
        let name = self.binding_name(&name_pair)?;
        let init = match inner.next() {
            Some(expr) => Some(self.expr(expr)?),
            None => None,
        };
        Ok(Stmt::VarDecl { name, init })
    }

    fn assign(&mut self, pair: Pair<'_>) -> Result<Stmt, Error> {
        let mut inner = pair.clone().into_inner();
        let name_pair = inner.next().ok_or_else(|| missing(&pair, "assignment target"))?;
        let name = self.binding_name(&name_pair)?;
        let op_pair = inner.next().ok_or_else(|| missing(&pair, "assignment operator"))?;
        let op = match op_pair.as_str() {
            "+=" => AssignOp::Add,
            "-=" => AssignOp::Sub,
            _ => AssignOp::Set,
        };
        let value = inner.next().ok_or_else(|| missing(&pair, "assigned value"))?;
        let value = self.expr(value)?;
        Ok(Stmt::Assign { name, op, value })
    }

    /// Name of a variable being declared, assigned or read; primitive names are off limits.
    fn binding_name(&self, pair: &Pair<'_>) -> Result<String, Error> {
        let name = pair.as_str();
        if Builtin::from_name(name).is_some() {
            return Err(build_error(pair, format!("'{}' is a reserved name", name)));
        }
        Ok(name.to_string())
    }

    fn expr(&mut self, pair: Pair<'_>) -> Result<ExprId, Error> {
        match pair.as_rule() {
            Rule::or_expr
            | Rule::and_expr
            | Rule::eq_expr
            | Rule::rel_expr
            | Rule::add_expr
            | Rule::mul_expr => self.binary_chain(pair),
            Rule::unary => self.unary(pair),
            Rule::postfix => self.postfix(pair),
            Rule::number => {
                let n: f64 = pair
                    .as_str()
                    .parse()
                    .map_err(|_| build_error(&pair, format!("Invalid number: {}", pair.as_str())))?;
                Ok(self.program.add_expr(Expr::Literal(Value::Number(n))))
            }
            Rule::string => {
                let raw = pair.clone().into_inner().next().map(|p| p.as_str()).unwrap_or("");
                let text = process_escape_sequences(raw);
                Ok(self.program.add_expr(Expr::Literal(Value::String(text))))
            }
            Rule::kw_true => Ok(self.program.add_expr(Expr::Literal(Value::Boolean(true)))),
            Rule::kw_false => Ok(self.program.add_expr(Expr::Literal(Value::Boolean(false)))),
            Rule::kw_null => Ok(self.program.add_expr(Expr::Literal(Value::Null))),
            Rule::ident => {
                let name = self.binding_name(&pair)?;
                Ok(self.program.add_expr(Expr::Var(name)))
            }
            Rule::call => self.call(pair),
            other => Err(build_error(&pair, format!("Unexpected expression {:?}", other))),
        }
    }

    fn binary_chain(&mut self, pair: Pair<'_>) -> Result<ExprId, Error> {
        let mut inner = pair.clone().into_inner();
        let first = inner.next().ok_or_else(|| missing(&pair, "operand"))?;
        let mut left = self.expr(first)?;
        while let Some(op_pair) = inner.next() {
            let op = match op_pair.as_str() {
                "||" => BinOp::Or,
                "&&" => BinOp::And,
                "==" => BinOp::Eq,
                "!=" => BinOp::NotEq,
                "<" => BinOp::Lt,
                "<=" => BinOp::LtEq,
                ">" => BinOp::Gt,
                ">=" => BinOp::GtEq,
                "+" => BinOp::Add,
                "-" => BinOp::Sub,
                "*" => BinOp::Mul,
                "/" => BinOp::Div,
                "%" => BinOp::Mod,
                other => return Err(build_error(&op_pair, format!("Unknown operator '{}'", other))),
            };
            let right = inner.next().ok_or_else(|| missing(&pair, "right operand"))?;
            let right = self.expr(right)?;
            left = self.program.add_expr(Expr::Binary { op, left, right });
        }
        Ok(left)
    }

    fn unary(&mut self, pair: Pair<'_>) -> Result<ExprId, Error> {
        let mut ops = Vec::new();
        let mut operand = None;
        for part in pair.clone().into_inner() {
            match part.as_rule() {
                Rule::unary_op => {
                    ops.push(if part.as_str() == "!" { UnOp::Not } else { UnOp::Neg })
                }
                _ => operand = Some(self.expr(part)?),
            }
        }
        let mut result = operand.ok_or_else(|| missing(&pair, "operand"))?;
        for op in ops.into_iter().rev() {
            result = self.program.add_expr(Expr::Unary { op, operand: result });
        }
        Ok(result)
    }

    fn postfix(&mut self, pair: Pair<'_>) -> Result<ExprId, Error> {
        let mut inner = pair.clone().into_inner();
        let primary = inner.next().ok_or_else(|| missing(&pair, "operand"))?;
        let mut object = self.expr(primary)?;
        for field in inner {
            object = self.program.add_expr(Expr::Member {
                object,
                field: field.as_str().to_string(),
            });
        }
        Ok(object)
    }

    fn call(&mut self, pair: Pair<'_>) -> Result<ExprId, Error> {
        let mut inner = pair.clone().into_inner();
        let callee = inner.next().ok_or_else(|| missing(&pair, "function name"))?;
        let builtin = Builtin::from_name(callee.as_str())
            .ok_or_else(|| {
                build_error(&callee, format!("Unknown function '{}'", callee.as_str()))
            })?;
        let mut args = Vec::new();
        for arg in inner {
            args.push(self.expr(arg)?);
        }
        Ok(self.program.add_expr(Expr::Call { builtin, args }))
    }
}

/// Process escape sequences in a string literal.
///
/// Converts escape sequences like \n, \t, \\, \" to their actual characters.
pub(crate) fn process_escape_sequences(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('r') => result.push('\r'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('\'') => result.push('\''),
                Some(other) => {
                    // Unknown escape - keep as-is
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }

    result
}
