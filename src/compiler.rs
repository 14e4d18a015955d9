//! Shunting-yard compiler: drives the token reader and emits RPN through
//! the bytecode builder.
//!
//! Two stacks resolve precedence and associativity; a third counts arguments
//! per bracket level, its bottom entry doubling as the number of top-level
//! result slots ("a=1, b=2" leaves two). The conditional operator compiles
//! into if/else markers paired up when a comma-or-end boundary flushes the
//! operator stack.

use tracing::debug;

use crate::bytecode::ByteCode;
use crate::errors::{ErrorCode, ParseError, ParseResult};
use crate::reader::TokenReader;
use crate::registry::Registry;
use crate::token::{Arity, Assoc, Token};
use crate::value::{Number, VarRef};

/// Operand stack entry. The compiler only needs to know whether a slot came
/// from a bare variable (a valid assignment target) or from anything else.
enum Operand<T: Number> {
    Value,
    Var(VarRef<T>),
}

/// Precedence floor for the structural pseudo-operators.
fn precedence<T: Number>(tok: &Token<T>) -> ParseResult<i32> {
    match tok {
        Token::End => Ok(-5),
        Token::ArgSep => Ok(-4),
        Token::Assign => Ok(-1),
        Token::If | Token::Else => Ok(0),
        Token::Oprt { prec, .. } | Token::Infix { prec, .. } => Ok(*prec),
        _ => Err(ParseError::of(ErrorCode::InternalError)),
    }
}

fn associativity<T: Number>(tok: &Token<T>) -> Assoc {
    match tok {
        Token::Oprt { assoc, .. } => *assoc,
        // Chained assignment nests to the right.
        Token::Assign => Assoc::Right,
        _ => Assoc::Left,
    }
}

/// Both operands of the comparison are operator-stack entries carrying a
/// callback.
fn has_callback<T: Number>(tok: &Token<T>) -> bool {
    matches!(
        tok,
        Token::Fun { .. } | Token::Oprt { .. } | Token::Infix { .. } | Token::Postfix { .. }
    )
}

fn same_operator<T: Number>(a: &Token<T>, b: &Token<T>) -> bool {
    match (a, b) {
        (Token::Oprt { ident: ia, .. }, Token::Oprt { ident: ib, .. }) => ia == ib,
        (Token::Assign, Token::Assign) => true,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// compilation
// ---------------------------------------------------------------------------

pub(crate) struct RpnCompiler<'a, T: Number> {
    reader: &'a mut TokenReader<T>,
    reg: &'a mut Registry<T>,
    bc: &'a mut ByteCode<T>,
}

impl<'a, T: Number> RpnCompiler<'a, T> {
    pub fn new(
        reader: &'a mut TokenReader<T>,
        reg: &'a mut Registry<T>,
        bc: &'a mut ByteCode<T>,
    ) -> Self {
        RpnCompiler { reader, reg, bc }
    }

    fn error(&self, code: ErrorCode, pos: Option<usize>, tok: &str) -> ParseError {
        ParseError::new(code, tok, self.reader.expr().to_string(), pos)
    }

    /// Compile the reader's expression, returning the number of top-level
    /// result slots.
    pub fn compile(&mut self) -> ParseResult<usize> {
        if self.reader.expr().is_empty() {
            return Err(self.error(ErrorCode::UnexpectedEof, Some(0), ""));
        }

        self.reader.reinit();
        self.bc.clear();

        let mut ops: Vec<Token<T>> = Vec::new();
        let mut vals: Vec<Operand<T>> = Vec::new();
        let mut arg_count: Vec<usize> = vec![1];
        let mut if_else_counter: i32 = 0;
        let mut prev_was_open = false;

        loop {
            let tok = self.reader.read_next(self.reg)?;
            let is_open = matches!(tok, Token::Open);
            let is_end = matches!(tok, Token::End);

            match tok {
                Token::Val { val, ident } => {
                    self.bc.add_val(val, &ident);
                    vals.push(Operand::Value);
                }

                Token::Var { var, ident } => {
                    self.bc.add_var(var.clone(), &ident);
                    vals.push(Operand::Var(var));
                }

                Token::ArgSep => {
                    match arg_count.last_mut() {
                        Some(top) => *top += 1,
                        None => {
                            return Err(self.error(
                                ErrorCode::UnexpectedArgSep,
                                Some(self.reader.pos()),
                                ",",
                            ))
                        }
                    }
                    self.flush_remaining(&mut ops, &mut vals)?;
                }

                Token::End => {
                    self.flush_remaining(&mut ops, &mut vals)?;
                }

                Token::Close => {
                    // An opening bracket preset the count to one; a function
                    // called with empty parentheses has zero arguments.
                    if prev_was_open {
                        if let Some(top) = arg_count.last_mut() {
                            *top -= 1;
                        }
                    }

                    self.flush_remaining(&mut ops, &mut vals)?;

                    if matches!(ops.last(), Some(Token::Open)) {
                        ops.pop();
                        let argc = arg_count
                            .pop()
                            .ok_or_else(|| ParseError::of(ErrorCode::InternalError))?;

                        let fun_on_top = matches!(ops.last(), Some(Token::Fun { .. }));
                        if argc > 1 && !fun_on_top {
                            return Err(self.error(
                                ErrorCode::UnexpectedArg,
                                Some(self.reader.pos()),
                                "",
                            ));
                        }
                        if fun_on_top {
                            self.apply_fun(&mut ops, &mut vals, argc)?;
                        }
                    }
                }

                tok @ (Token::Assign | Token::Oprt { .. }) => {
                    self.shunt_operator(&mut ops, &mut vals, tok)?;
                }

                tok @ Token::If => {
                    if_else_counter += 1;
                    self.shunt_operator(&mut ops, &mut vals, tok)?;
                    // shunt_operator emitted the marker and pushed "?".
                }

                Token::Else => {
                    if_else_counter -= 1;
                    if if_else_counter < 0 {
                        return Err(self.error(
                            ErrorCode::MisplacedColon,
                            Some(self.reader.pos()),
                            ":",
                        ));
                    }
                    self.flush_remaining(&mut ops, &mut vals)?;
                    self.bc.add_else()?;
                    ops.push(Token::Else);
                }

                Token::Open => {
                    arg_count.push(1);
                    ops.push(Token::Open);
                }

                tok @ (Token::Infix { .. } | Token::Fun { .. }) => {
                    ops.push(tok);
                }

                tok @ Token::Postfix { .. } => {
                    ops.push(tok);
                    self.apply_fun(&mut ops, &mut vals, 1)?;
                }
            }

            prev_was_open = is_open;

            if is_end {
                break;
            }

            if crate::parser::dump_stack_enabled() {
                debug!(
                    target: "mexpr::compiler",
                    "stack: {} operands, {} operators", vals.len(), ops.len()
                );
            }
        }

        if if_else_counter > 0 {
            return Err(self.error(
                ErrorCode::MissingElseClause,
                Some(self.reader.pos()),
                "",
            ));
        }

        if arg_count.len() != 1 {
            return Err(ParseError::of(ErrorCode::InternalError));
        }
        let result_slots = arg_count[0];
        if result_slots == 0 {
            return Err(ParseError::of(ErrorCode::InternalError));
        }

        if vals.is_empty() {
            return Err(self.error(ErrorCode::EmptyExpression, None, ""));
        }

        self.bc.finalize(result_slots)?;
        Ok(result_slots)
    }

    /// Standard precedence/associativity loop for binary-like tokens
    /// (binary operators, assignment, and "?" at the precedence floor).
    fn shunt_operator(
        &mut self,
        ops: &mut Vec<Token<T>>,
        vals: &mut Vec<Operand<T>>,
        opt: Token<T>,
    ) -> ParseResult<()> {
        loop {
            let (p1, is_same, is_infix) = match ops.last() {
                None | Some(Token::Open | Token::If | Token::Else) => break,
                Some(top) => (
                    precedence(top)?,
                    same_operator(top, &opt),
                    matches!(top, Token::Infix { .. }),
                ),
            };

            let p2 = precedence(&opt)?;
            if is_same {
                // Associativity decides between equal operators.
                let assoc = associativity(&opt);
                if (assoc == Assoc::Right && p1 <= p2) || (assoc == Assoc::Left && p1 < p2) {
                    break;
                }
            } else if p1 < p2 {
                break;
            }

            if is_infix {
                self.apply_fun(ops, vals, 1)?;
            } else {
                self.apply_binary(ops, vals)?;
            }
        }

        if matches!(opt, Token::If) {
            self.bc.add_if()?;
        }
        ops.push(opt);
        Ok(())
    }

    /// Pop every pending operator down to the nearest opening bracket or
    /// pending "?"; closes finished ternary branches on the way.
    fn flush_remaining(
        &mut self,
        ops: &mut Vec<Token<T>>,
        vals: &mut Vec<Operand<T>>,
    ) -> ParseResult<()> {
        loop {
            let action = match ops.last() {
                None | Some(Token::Open) | Some(Token::If) => 0,
                Some(Token::Infix { .. }) => 1,
                Some(Token::Oprt { .. }) | Some(Token::Assign) => 2,
                Some(Token::Else) => 3,
                Some(t) => return Err(self.error(ErrorCode::InternalError, None, t.ident())),
            };
            match action {
                0 => break,
                1 => self.apply_fun(ops, vals, 1)?,
                2 => self.apply_binary(ops, vals)?,
                _ => self.apply_if_else(ops, vals)?,
            }
        }
        Ok(())
    }

    /// Apply the function or operator on top of the operator stack to
    /// `argc` operands.
    fn apply_fun(
        &mut self,
        ops: &mut Vec<Token<T>>,
        vals: &mut Vec<Operand<T>>,
        argc: usize,
    ) -> ParseResult<()> {
        if !ops.last().map(has_callback).unwrap_or(false) {
            return Ok(());
        }

        let tok = match ops.pop() {
            Some(tok) => tok,
            None => return Ok(()),
        };
        let is_bin = matches!(tok, Token::Oprt { .. });
        let (f, arity, ident) = match tok {
            Token::Fun { f, arity, ident } => (f, arity, ident),
            Token::Oprt { f, ident, .. } => (f, Arity::Fixed(2), ident),
            Token::Infix { f, ident, .. } | Token::Postfix { f, ident } => {
                (f, Arity::Fixed(1), ident)
            }
            _ => return Err(ParseError::of(ErrorCode::InternalError)),
        };

        if let Arity::Fixed(n) = arity {
            if argc > n {
                return Err(self.error(
                    ErrorCode::TooManyParams,
                    Some(self.reader.pos().saturating_sub(1)),
                    &ident,
                ));
            }
            if !is_bin && argc < n {
                return Err(self.error(
                    ErrorCode::TooFewParams,
                    Some(self.reader.pos().saturating_sub(1)),
                    &ident,
                ));
            }
        }

        if vals.len() < argc {
            return Err(ParseError::of(ErrorCode::InternalError));
        }
        vals.truncate(vals.len() - argc);

        self.bc.add_fun(f, argc, &ident, is_bin)?;
        vals.push(Operand::Value);
        Ok(())
    }

    /// Apply a binary operator or an assignment from the operator stack.
    fn apply_binary(
        &mut self,
        ops: &mut Vec<Token<T>>,
        vals: &mut Vec<Operand<T>>,
    ) -> ParseResult<()> {
        if matches!(ops.last(), Some(Token::Oprt { .. })) {
            return self.apply_fun(ops, vals, 2);
        }

        // Assignment: the left operand must be a bare, defined variable.
        if vals.len() < 2 {
            return Err(ParseError::of(ErrorCode::InternalError));
        }
        ops.pop();
        let _rhs = vals.pop();
        let target = vals.pop();

        match target {
            Some(Operand::Var(var)) if !VarRef::same_cell(&var, self.bc.null_value()) => {
                self.bc.add_assign(var)?;
            }
            _ => return Err(self.error(ErrorCode::UnexpectedOperator, None, "=")),
        }

        vals.push(Operand::Value);
        Ok(())
    }

    /// Close finished "? :" pairs: each pending else pops its branch value
    /// and the matching "?" and emits the end marker.
    fn apply_if_else(
        &mut self,
        ops: &mut Vec<Token<T>>,
        vals: &mut Vec<Operand<T>>,
    ) -> ParseResult<()> {
        while matches!(ops.last(), Some(Token::Else)) {
            ops.pop();
            if vals.pop().is_none() {
                return Err(ParseError::of(ErrorCode::InternalError));
            }
            if !matches!(ops.pop(), Some(Token::If)) {
                return Err(ParseError::of(ErrorCode::InternalError));
            }
            if vals.is_empty() {
                return Err(ParseError::of(ErrorCode::InternalError));
            }
            self.bc.add_endif();
        }
        Ok(())
    }
}
