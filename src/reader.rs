//! Token reader: scans the expression left to right and returns one
//! classified token per call.
//!
//! What may follow what is enforced through a bit set of syntax flags that
//! every successful classification rewrites. Operator lookup iterates the
//! ordered maps in reverse so that longer names win over the shorter names
//! they extend ("++" before "+").

use std::collections::BTreeMap;

use crate::errors::{ErrorCode, ParseError, ParseResult};
use crate::registry::Registry;
use crate::token::Token;
use crate::value::{Number, VarRef};

/// Structural tokens recognized independently of the registry.
const DEFAULT_OPRT: [&str; 5] = ["=", "(", ")", "?", ":"];

/// Alphabet used as a fallback when extracting operator tokens that consist
/// exclusively of letters.
const ALPHA_CHARS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

// ---------------------------------------------------------------------------
// Syntax flags
// ---------------------------------------------------------------------------

pub(crate) mod syn {
    pub const NO_BO: u16 = 1 << 0; // "cos(7)("
    pub const NO_BC: u16 = 1 << 1; // "sin)" or "()"
    pub const NO_VAL: u16 = 1 << 2; // "tan 2" or "sin(8)3.14"
    pub const NO_VAR: u16 = 1 << 3; // "sin a" or "sin(8)a"
    pub const NO_ARG_SEP: u16 = 1 << 4; // ",," or "+,"
    pub const NO_FUN: u16 = 1 << 5; // "sqrt cos" or "(1)sin"
    pub const NO_OPT: u16 = 1 << 6; // "(+)"
    pub const NO_POSTOP: u16 = 1 << 7; // "(5!!)"
    pub const NO_INFIXOP: u16 = 1 << 8; // "++4"
    pub const NO_END: u16 = 1 << 9; // premature end of expression
    pub const NO_ASSIGN: u16 = 1 << 10; // "4=7"
    pub const NO_IF: u16 = 1 << 11;
    pub const NO_ELSE: u16 = 1 << 12;

    pub const START_OF_LINE: u16 =
        NO_OPT | NO_BC | NO_POSTOP | NO_ASSIGN | NO_IF | NO_ELSE | NO_ARG_SEP;
    pub const ANY: u16 = 0x1fff;
}

use syn::*;

/// Factory invoked for identifiers that are not defined anywhere; returns the
/// handle the new variable lives behind.
pub type VarFactory<T> = Box<dyn FnMut(&str) -> VarRef<T>>;

// ---------------------------------------------------------------------------
// TokenReader
// ---------------------------------------------------------------------------

pub(crate) struct TokenReader<T: Number> {
    expr: String,
    pos: usize,
    syn_flags: u16,
    brackets: i32,
    last_was_fun: bool,
    ignore_undef_var: bool,
    used_vars: BTreeMap<String, Option<VarRef<T>>>,
    factory: Option<VarFactory<T>>,
    /// Zero sentinel backing undefined variables during dry compiles.
    zero: VarRef<T>,
}

impl<T: Number> TokenReader<T> {
    pub fn new(zero: VarRef<T>) -> Self {
        TokenReader {
            expr: String::new(),
            pos: 0,
            syn_flags: START_OF_LINE,
            brackets: 0,
            last_was_fun: false,
            ignore_undef_var: false,
            used_vars: BTreeMap::new(),
            factory: None,
            zero,
        }
    }

    pub fn set_formula(&mut self, expr: &str) {
        self.expr = expr.to_string();
        self.reinit();
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn reinit(&mut self) {
        self.pos = 0;
        self.syn_flags = START_OF_LINE;
        self.brackets = 0;
        self.last_was_fun = false;
        self.used_vars.clear();
    }

    pub fn set_ignore_undef_var(&mut self, ignore: bool) {
        self.ignore_undef_var = ignore;
    }

    pub fn set_var_factory(&mut self, factory: Option<VarFactory<T>>) {
        self.factory = factory;
    }

    pub fn used_vars(&self) -> &BTreeMap<String, Option<VarRef<T>>> {
        &self.used_vars
    }

    // -----------------------------------------------------------------------
    // main entry
    // -----------------------------------------------------------------------

    pub fn read_next(&mut self, reg: &mut Registry<T>) -> ParseResult<Token<T>> {
        // Non-printable characters are insignificant everywhere.
        while let Some(c) = self.expr[self.pos..].chars().next() {
            if c as u32 <= 0x20 {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }

        let tok = self.classify(reg)?;
        self.last_was_fun = matches!(tok, Token::Fun { .. });
        Ok(tok)
    }

    fn classify(&mut self, reg: &mut Registry<T>) -> ParseResult<Token<T>> {
        if let Some(t) = self.is_eof()? {
            return Ok(t);
        }
        if let Some(t) = self.is_oprt(reg)? {
            return Ok(t);
        }
        if let Some(t) = self.is_fun_tok(reg)? {
            return Ok(t);
        }
        if let Some(t) = self.is_built_in(reg)? {
            return Ok(t);
        }
        if let Some(t) = self.is_arg_sep()? {
            return Ok(t);
        }
        if let Some(t) = self.is_val_tok(reg)? {
            return Ok(t);
        }
        if let Some(t) = self.is_var_tok(reg)? {
            return Ok(t);
        }
        if let Some(t) = self.is_infix_op_tok(reg)? {
            return Ok(t);
        }
        if let Some(t) = self.is_post_op_tok(reg)? {
            return Ok(t);
        }

        // Undefined identifiers are only tokens when a factory is installed
        // or a dry compile asked for them.
        if self.ignore_undef_var || self.factory.is_some() {
            if let Some(t) = self.is_undef_var_tok(reg)? {
                return Ok(t);
            }
        }

        let end = self.extract(&reg.name_chars, self.pos);
        let tok_str = if end != self.pos {
            &self.expr[self.pos..end]
        } else {
            &self.expr[self.pos..]
        };
        Err(self.error(ErrorCode::UnassignableToken, Some(self.pos), tok_str))
    }

    // -----------------------------------------------------------------------
    // extraction helpers
    // -----------------------------------------------------------------------

    /// End position of the maximal run of characters from `set` starting at
    /// `start`.
    fn extract(&self, set: &str, start: usize) -> usize {
        let mut end = start;
        for c in self.expr[start..].chars() {
            if set.contains(c) {
                end += c.len_utf8();
            } else {
                break;
            }
        }
        end
    }

    /// Operator names and identifiers may share characters; extraction over
    /// the operator charset with an alphabetic fallback keeps "a++b" from
    /// being read as "a + +b" when "++" is a registered operator.
    fn extract_operator_token(&self, reg: &Registry<T>) -> usize {
        let end = self.extract(&reg.oprt_chars, self.pos);
        if end != self.pos {
            end
        } else {
            self.extract(ALPHA_CHARS, self.pos)
        }
    }

    fn error(&self, code: ErrorCode, pos: Option<usize>, tok: &str) -> ParseError {
        ParseError::new(code, tok, self.expr.clone(), pos)
    }

    // -----------------------------------------------------------------------
    // classification steps
    // -----------------------------------------------------------------------

    fn is_eof(&mut self) -> ParseResult<Option<Token<T>>> {
        if self.pos < self.expr.len() {
            return Ok(None);
        }
        if self.syn_flags & NO_END != 0 {
            return Err(self.error(ErrorCode::UnexpectedEof, Some(self.pos), ""));
        }
        if self.brackets > 0 {
            return Err(self.error(ErrorCode::MissingParens, Some(self.pos), ")"));
        }
        self.syn_flags = 0;
        Ok(Some(Token::End))
    }

    /// User-defined binary operator, longest name first.
    fn is_oprt(&mut self, reg: &Registry<T>) -> ParseResult<Option<Token<T>>> {
        let end = self.extract_operator_token(reg);
        if end == self.pos {
            return Ok(None);
        }

        // Structural tokens are handled later by their own classifier.
        let tok_str = &self.expr[self.pos..end];
        if DEFAULT_OPRT.contains(&tok_str) {
            return Ok(None);
        }

        for (name, def) in reg.oprts.iter().rev() {
            if !self.expr[self.pos..].starts_with(name.as_str()) {
                continue;
            }

            if self.syn_flags & NO_OPT != 0 {
                // A binary operator cannot stand here; it may still be a
                // prefix operator sharing the same characters ("3*-x").
                if let Some(t) = self.is_infix_op_tok(reg)? {
                    return Ok(Some(t));
                }
                return Ok(None);
            }

            let ident = name.clone();
            self.pos += name.len();
            self.syn_flags = NO_BC | NO_OPT | NO_ARG_SEP | NO_POSTOP | NO_END | NO_ASSIGN;
            return Ok(Some(Token::Oprt {
                f: def.f,
                prec: def.prec,
                assoc: def.assoc,
                ident,
            }));
        }

        Ok(None)
    }

    /// A function name is only a function token when immediately followed by
    /// an opening parenthesis.
    fn is_fun_tok(&mut self, reg: &Registry<T>) -> ParseResult<Option<Token<T>>> {
        let end = self.extract(&reg.name_chars, self.pos);
        if end == self.pos {
            return Ok(None);
        }

        let name = &self.expr[self.pos..end];
        let def = match reg.funs.get(name) {
            Some(def) => def,
            None => return Ok(None),
        };
        if !self.expr[end..].starts_with('(') {
            return Ok(None);
        }

        let ident = name.to_string();
        self.pos = end;
        if self.syn_flags & NO_FUN != 0 {
            return Err(self.error(ErrorCode::UnexpectedFun, Some(self.pos - ident.len()), &ident));
        }

        self.syn_flags = ANY ^ NO_BO;
        Ok(Some(Token::Fun {
            f: def.f,
            arity: def.arity,
            ident,
        }))
    }

    fn is_built_in(&mut self, reg: &Registry<T>) -> ParseResult<Option<Token<T>>> {
        for entry in DEFAULT_OPRT {
            if !self.expr[self.pos..].starts_with(entry) {
                continue;
            }

            let tok = match entry {
                "=" => {
                    if self.syn_flags & NO_ASSIGN != 0 {
                        return Err(self.error(ErrorCode::UnexpectedOperator, Some(self.pos), "="));
                    }
                    if self.syn_flags & NO_OPT != 0 {
                        // The characters may belong to a prefix operator
                        // instead.
                        if let Some(t) = self.is_infix_op_tok(reg)? {
                            return Ok(Some(t));
                        }
                        return Err(self.error(ErrorCode::UnexpectedOperator, Some(self.pos), "="));
                    }
                    self.syn_flags = NO_BC
                        | NO_OPT
                        | NO_ARG_SEP
                        | NO_POSTOP
                        | NO_ASSIGN
                        | NO_IF
                        | NO_ELSE
                        | NO_END;
                    Token::Assign
                }
                "(" => {
                    if self.syn_flags & NO_BO != 0 {
                        return Err(self.error(ErrorCode::UnexpectedParens, Some(self.pos), "("));
                    }
                    self.syn_flags = if self.last_was_fun {
                        NO_OPT | NO_END | NO_ARG_SEP | NO_POSTOP | NO_ASSIGN | NO_IF | NO_ELSE
                    } else {
                        NO_BC | NO_OPT | NO_END | NO_ARG_SEP | NO_POSTOP | NO_ASSIGN | NO_IF | NO_ELSE
                    };
                    self.brackets += 1;
                    Token::Open
                }
                ")" => {
                    if self.syn_flags & NO_BC != 0 {
                        return Err(self.error(ErrorCode::UnexpectedParens, Some(self.pos), ")"));
                    }
                    self.syn_flags = NO_BO | NO_VAR | NO_VAL | NO_FUN | NO_INFIXOP | NO_ASSIGN;
                    self.brackets -= 1;
                    if self.brackets < 0 {
                        return Err(self.error(ErrorCode::UnexpectedParens, Some(self.pos), ")"));
                    }
                    Token::Close
                }
                "?" => {
                    if self.syn_flags & NO_IF != 0 {
                        return Err(self.error(
                            ErrorCode::UnexpectedConditional,
                            Some(self.pos),
                            "?",
                        ));
                    }
                    self.syn_flags = NO_BC | NO_POSTOP | NO_END | NO_OPT | NO_IF | NO_ELSE;
                    Token::If
                }
                ":" => {
                    if self.syn_flags & NO_ELSE != 0 {
                        return Err(self.error(
                            ErrorCode::UnexpectedConditional,
                            Some(self.pos),
                            ":",
                        ));
                    }
                    self.syn_flags = NO_BC | NO_POSTOP | NO_END | NO_OPT | NO_IF | NO_ELSE;
                    Token::Else
                }
                _ => unreachable!(),
            };

            self.pos += entry.len();
            return Ok(Some(tok));
        }

        Ok(None)
    }

    fn is_arg_sep(&mut self) -> ParseResult<Option<Token<T>>> {
        if !self.expr[self.pos..].starts_with(',') {
            return Ok(None);
        }
        if self.syn_flags & NO_ARG_SEP != 0 {
            return Err(self.error(ErrorCode::UnexpectedArgSep, Some(self.pos), ","));
        }
        self.syn_flags = NO_BC | NO_OPT | NO_END | NO_ARG_SEP | NO_POSTOP | NO_ASSIGN;
        self.pos += 1;
        Ok(Some(Token::ArgSep))
    }

    /// Values are named constants or literals claimed by the recognizer
    /// chain, most recently registered recognizers first.
    fn is_val_tok(&mut self, reg: &Registry<T>) -> ParseResult<Option<Token<T>>> {
        let end = self.extract(&reg.name_chars, self.pos);
        if end != self.pos {
            if let Some(&val) = reg.consts.get(&self.expr[self.pos..end]) {
                let ident = self.expr[self.pos..end].to_string();
                if self.syn_flags & NO_VAL != 0 {
                    return Err(self.error(ErrorCode::UnexpectedVal, Some(self.pos), &ident));
                }
                self.pos = end;
                self.syn_flags = NO_VAL | NO_VAR | NO_FUN | NO_BO | NO_INFIXOP | NO_ASSIGN;
                return Ok(Some(Token::Val { val, ident }));
            }
        }

        for ident_fn in &reg.val_idents {
            if let Some((val, len)) = ident_fn(&self.expr[self.pos..])? {
                let ident = self.expr[self.pos..self.pos + len].to_string();
                if self.syn_flags & NO_VAL != 0 {
                    return Err(self.error(ErrorCode::UnexpectedVal, Some(self.pos), &ident));
                }
                self.pos += len;
                self.syn_flags = NO_VAL | NO_VAR | NO_FUN | NO_BO | NO_INFIXOP | NO_ASSIGN;
                return Ok(Some(Token::Val { val, ident }));
            }
        }

        Ok(None)
    }

    fn is_var_tok(&mut self, reg: &Registry<T>) -> ParseResult<Option<Token<T>>> {
        if reg.vars.is_empty() {
            return Ok(None);
        }

        let end = self.extract(&reg.name_chars, self.pos);
        if end == self.pos {
            return Ok(None);
        }

        let var = match reg.vars.get(&self.expr[self.pos..end]) {
            Some(var) => var.clone(),
            None => return Ok(None),
        };
        let ident = self.expr[self.pos..end].to_string();

        if self.syn_flags & NO_VAR != 0 {
            return Err(self.error(ErrorCode::UnexpectedVar, Some(self.pos), &ident));
        }

        self.pos = end;
        self.used_vars.insert(ident.clone(), Some(var.clone()));

        // Assignment stays permitted after a variable.
        self.syn_flags = NO_VAL | NO_VAR | NO_FUN | NO_BO | NO_INFIXOP;
        Ok(Some(Token::Var { var, ident }))
    }

    fn is_infix_op_tok(&mut self, reg: &Registry<T>) -> ParseResult<Option<Token<T>>> {
        let end = self.extract(&reg.infix_chars, self.pos);
        if end == self.pos {
            return Ok(None);
        }
        let run = &self.expr[self.pos..end];

        for (name, def) in reg.infix_oprts.iter().rev() {
            if !run.starts_with(name.as_str()) {
                continue;
            }

            let ident = name.clone();
            self.pos += name.len();

            if self.syn_flags & NO_INFIXOP != 0 {
                return Err(self.error(ErrorCode::UnexpectedOperator, Some(self.pos), &ident));
            }

            self.syn_flags = NO_POSTOP | NO_INFIXOP | NO_OPT | NO_BC | NO_ASSIGN;
            return Ok(Some(Token::Infix {
                f: def.f,
                prec: def.prec,
                ident,
            }));
        }

        Ok(None)
    }

    fn is_post_op_tok(&mut self, reg: &Registry<T>) -> ParseResult<Option<Token<T>>> {
        // Equations like "3m+5" extract "m+" below; suppressing the whole
        // check when no postfix operator may stand here avoids misreading
        // the binary operator that actually follows.
        if self.syn_flags & NO_POSTOP != 0 {
            return Ok(None);
        }

        let end = self.extract(&reg.oprt_chars, self.pos);
        if end == self.pos {
            return Ok(None);
        }
        let run = &self.expr[self.pos..end];

        for (name, def) in reg.postfix_oprts.iter().rev() {
            if !run.starts_with(name.as_str()) {
                continue;
            }

            let ident = name.clone();
            self.pos += name.len();
            self.syn_flags = NO_VAL | NO_VAR | NO_FUN | NO_BO | NO_POSTOP | NO_ASSIGN;
            return Ok(Some(Token::Postfix { f: def.f, ident }));
        }

        Ok(None)
    }

    fn is_undef_var_tok(&mut self, reg: &mut Registry<T>) -> ParseResult<Option<Token<T>>> {
        let end = self.extract(&reg.name_chars, self.pos);
        if end == self.pos {
            return Ok(None);
        }
        let ident = self.expr[self.pos..end].to_string();

        if self.syn_flags & NO_VAR != 0 {
            return Err(self.error(ErrorCode::UnexpectedVar, Some(self.pos), &ident));
        }

        let var = if let Some(factory) = self.factory.as_mut() {
            // The factory owns the storage; the new variable is registered
            // directly so later occurrences resolve through the normal path.
            let var = factory(&ident);
            reg.vars.insert(ident.clone(), var.clone());
            self.used_vars.insert(ident.clone(), Some(var.clone()));
            var
        } else {
            self.used_vars.insert(ident.clone(), None);
            self.zero.clone()
        };

        self.pos = end;
        self.syn_flags = NO_VAL | NO_VAR | NO_FUN | NO_BO | NO_POSTOP | NO_INFIXOP;
        Ok(Some(Token::Var { var, ident }))
    }
}

// ---------------------------------------------------------------------------
// tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::flt;
    use crate::token::{prec, Arity, Assoc};

    fn registry() -> Registry<f64> {
        let mut reg = Registry::new();
        reg.define_oprt("+", flt::add, prec::ADD_SUB, Assoc::Left).unwrap();
        reg.define_oprt("-", flt::sub, prec::ADD_SUB, Assoc::Left).unwrap();
        reg.define_oprt("*", flt::mul, prec::MUL_DIV, Assoc::Left).unwrap();
        reg.define_infix_oprt("-", flt::unary_minus, prec::INFIX).unwrap();
        reg.define_fun("sin", flt::sin, Arity::Fixed(1)).unwrap();
        reg.define_var("a", VarRef::new(1.0)).unwrap();
        reg.define_var("b", VarRef::new(2.0)).unwrap();
        reg.add_val_ident(crate::parser::parse_float);
        reg
    }

    fn reader(expr: &str) -> TokenReader<f64> {
        let mut r = TokenReader::new(VarRef::new(0.0));
        r.set_formula(expr);
        r
    }

    fn idents(expr: &str) -> Vec<String> {
        let mut reg = registry();
        let mut r = reader(expr);
        let mut out = Vec::new();
        loop {
            let tok = r.read_next(&mut reg).expect("classification should succeed");
            if matches!(tok, Token::End) {
                break;
            }
            out.push(tok.ident().to_string());
        }
        out
    }

    #[test]
    fn test_basic_sequence() {
        assert_eq!(idents("a + 2 * b"), vec!["a", "+", "2", "*", "b"]);
    }

    #[test]
    fn test_function_needs_paren() {
        // "sin" without parenthesis is not a function token; with no
        // variable of that name it is unassignable.
        let mut reg = registry();
        let mut r = reader("sin + 1");
        let err = r.read_next(&mut reg).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnassignableToken);
    }

    #[test]
    fn test_longest_operator_match() {
        let mut reg = registry();
        reg.define_oprt("++", flt::add, prec::ADD_SUB, Assoc::Left).unwrap();
        let mut r = reader("a++b");
        let mut seen = Vec::new();
        loop {
            let tok = r.read_next(&mut reg).unwrap();
            if matches!(tok, Token::End) {
                break;
            }
            seen.push(tok.ident().to_string());
        }
        assert_eq!(seen, vec!["a", "++", "b"]);
    }

    #[test]
    fn test_binary_yields_to_prefix() {
        // After "*" no binary operator may stand, so "-" resolves to the
        // prefix operator.
        let mut reg = registry();
        let mut r = reader("a*-b");
        r.read_next(&mut reg).unwrap(); // a
        r.read_next(&mut reg).unwrap(); // *
        let tok = r.read_next(&mut reg).unwrap();
        assert!(matches!(tok, Token::Infix { .. }));
    }

    #[test]
    fn test_unbalanced_brackets() {
        let mut reg = registry();
        let mut r = reader("sin(a");
        r.read_next(&mut reg).unwrap(); // sin
        r.read_next(&mut reg).unwrap(); // (
        r.read_next(&mut reg).unwrap(); // a
        let err = r.read_next(&mut reg).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingParens);

        let mut r = reader("a)");
        r.read_next(&mut reg).unwrap();
        let err = r.read_next(&mut reg).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnexpectedParens);
    }

    #[test]
    fn test_undefined_variable_modes() {
        let mut reg = registry();

        let mut r = reader("c + 1");
        let err = r.read_next(&mut reg).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnassignableToken);
        assert_eq!(err.token(), "c");

        let mut r = reader("c + 1");
        r.set_ignore_undef_var(true);
        let tok = r.read_next(&mut reg).unwrap();
        assert!(matches!(tok, Token::Var { .. }));
        assert!(r.used_vars().contains_key("c"));
        assert!(r.used_vars()["c"].is_none());
    }

    #[test]
    fn test_var_factory_creates_variable() {
        let mut reg = registry();
        let mut r = reader("q");
        r.set_var_factory(Some(Box::new(|_name| VarRef::new(42.0))));
        let tok = r.read_next(&mut reg).unwrap();
        match tok {
            Token::Var { var, ident } => {
                assert_eq!(ident, "q");
                assert_eq!(var.get(), 42.0);
            }
            _ => panic!("expected variable token"),
        }
        assert!(reg.vars.contains_key("q"));
    }

    #[test]
    fn test_whitespace_and_control_chars() {
        assert_eq!(idents(" \t\n a +\x01 b "), vec!["a", "+", "b"]);
    }

    #[test]
    fn test_initial_flags_reject_operator() {
        let mut reg = registry();
        let mut r = reader("*2");
        let err = r.read_next(&mut reg).unwrap_err();
        // "*" cannot open an expression and is no prefix operator either.
        assert_eq!(err.code(), ErrorCode::UnassignableToken);
    }
}
