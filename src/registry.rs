//! Name registry: functions, operators, constants, variables and the
//! value-literal recognizer chain.
//!
//! All maps are ordered (`BTreeMap`): the token reader resolves operator
//! names by reverse iteration, which visits longer keys before the shorter
//! keys they extend, and ordered maps keep compilation deterministic for
//! identical inputs.

use std::collections::BTreeMap;

use crate::errors::{ErrorCode, ParseError, ParseResult};
use crate::token::{Arity, Assoc, FunCallback, ValIdent};
use crate::value::{Number, VarRef};

// Default character sets, matching the classic tables.
pub(crate) const DEFAULT_NAME_CHARS: &str =
    "0123456789_abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub(crate) const DEFAULT_OPRT_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ+-*^/?<>=#!$%&|~'_{}";
pub(crate) const DEFAULT_INFIX_CHARS: &str = "/+-*^?<>=#!$%&|~'_";

#[derive(Clone)]
pub(crate) struct FunDef<T: Number> {
    pub f: FunCallback<T>,
    pub arity: Arity,
}

#[derive(Clone)]
pub(crate) struct OprtDef<T: Number> {
    pub f: FunCallback<T>,
    pub prec: i32,
    pub assoc: Assoc,
}

#[derive(Clone)]
pub(crate) struct InfixDef<T: Number> {
    pub f: FunCallback<T>,
    pub prec: i32,
}

#[derive(Clone)]
pub(crate) struct PostfixDef<T: Number> {
    pub f: FunCallback<T>,
}

/// Which map a definition is headed for; decides conflict rules and the
/// character set its name is validated against.
#[derive(Clone, Copy, PartialEq)]
enum DefKind {
    Fun,
    Oprt,
    Infix,
    Postfix,
    Const,
    Var,
}

pub(crate) struct Registry<T: Number> {
    pub funs: BTreeMap<String, FunDef<T>>,
    pub oprts: BTreeMap<String, OprtDef<T>>,
    pub infix_oprts: BTreeMap<String, InfixDef<T>>,
    pub postfix_oprts: BTreeMap<String, PostfixDef<T>>,
    pub consts: BTreeMap<String, T>,
    pub vars: BTreeMap<String, VarRef<T>>,
    /// Recognizers in priority order, most recently added first.
    pub val_idents: Vec<ValIdent<T>>,

    pub name_chars: String,
    pub oprt_chars: String,
    pub infix_chars: String,
}

impl<T: Number> Registry<T> {
    pub fn new() -> Self {
        Registry {
            funs: BTreeMap::new(),
            oprts: BTreeMap::new(),
            infix_oprts: BTreeMap::new(),
            postfix_oprts: BTreeMap::new(),
            consts: BTreeMap::new(),
            vars: BTreeMap::new(),
            val_idents: Vec::new(),
            name_chars: DEFAULT_NAME_CHARS.to_string(),
            oprt_chars: DEFAULT_OPRT_CHARS.to_string(),
            infix_chars: DEFAULT_INFIX_CHARS.to_string(),
        }
    }

    // -----------------------------------------------------------------------
    // definitions
    // -----------------------------------------------------------------------

    pub fn define_fun(&mut self, name: &str, f: FunCallback<T>, arity: Arity) -> ParseResult<()> {
        self.check_definition(name, DefKind::Fun)?;
        self.funs.insert(name.to_string(), FunDef { f, arity });
        Ok(())
    }

    pub fn define_oprt(
        &mut self,
        name: &str,
        f: FunCallback<T>,
        prec: i32,
        assoc: Assoc,
    ) -> ParseResult<()> {
        if prec < 0 {
            return Err(ParseError::new(ErrorCode::OptPriority, name, "", None));
        }
        self.check_definition(name, DefKind::Oprt)?;
        self.oprts.insert(name.to_string(), OprtDef { f, prec, assoc });
        Ok(())
    }

    pub fn define_infix_oprt(&mut self, name: &str, f: FunCallback<T>, prec: i32) -> ParseResult<()> {
        self.check_definition(name, DefKind::Infix)?;
        self.infix_oprts.insert(name.to_string(), InfixDef { f, prec });
        Ok(())
    }

    pub fn define_postfix_oprt(&mut self, name: &str, f: FunCallback<T>) -> ParseResult<()> {
        self.check_definition(name, DefKind::Postfix)?;
        self.postfix_oprts.insert(name.to_string(), PostfixDef { f });
        Ok(())
    }

    pub fn define_const(&mut self, name: &str, value: T) -> ParseResult<()> {
        self.check_definition(name, DefKind::Const)?;
        self.consts.insert(name.to_string(), value);
        Ok(())
    }

    pub fn define_var(&mut self, name: &str, var: VarRef<T>) -> ParseResult<()> {
        self.check_definition(name, DefKind::Var)?;
        self.vars.insert(name.to_string(), var);
        Ok(())
    }

    pub fn remove_var(&mut self, name: &str) -> bool {
        self.vars.remove(name).is_some()
    }

    pub fn clear_vars(&mut self) {
        self.vars.clear();
    }

    pub fn add_val_ident(&mut self, f: ValIdent<T>) {
        // Most recently registered recognizers win, so user recognizers can
        // claim prefixes (like the "0" in "0xff") before the defaults do.
        self.val_idents.insert(0, f);
    }

    // -----------------------------------------------------------------------
    // validation
    // -----------------------------------------------------------------------

    /// Names are unique across definition groups; the binary and prefix
    /// operator maps form one group so "-" can be both.
    fn check_definition(&self, name: &str, kind: DefKind) -> ParseResult<()> {
        let conflict = match kind {
            DefKind::Fun => {
                self.oprts.contains_key(name)
                    || self.infix_oprts.contains_key(name)
                    || self.postfix_oprts.contains_key(name)
                    || self.consts.contains_key(name)
                    || self.vars.contains_key(name)
            }
            DefKind::Oprt | DefKind::Infix => {
                self.funs.contains_key(name)
                    || self.postfix_oprts.contains_key(name)
                    || self.consts.contains_key(name)
                    || self.vars.contains_key(name)
            }
            DefKind::Postfix => {
                self.funs.contains_key(name)
                    || self.oprts.contains_key(name)
                    || self.infix_oprts.contains_key(name)
                    || self.consts.contains_key(name)
                    || self.vars.contains_key(name)
            }
            DefKind::Const => {
                self.funs.contains_key(name)
                    || self.oprts.contains_key(name)
                    || self.infix_oprts.contains_key(name)
                    || self.postfix_oprts.contains_key(name)
                    || self.vars.contains_key(name)
            }
            DefKind::Var => {
                self.funs.contains_key(name)
                    || self.oprts.contains_key(name)
                    || self.infix_oprts.contains_key(name)
                    || self.postfix_oprts.contains_key(name)
                    || self.consts.contains_key(name)
            }
        };
        if conflict {
            return Err(ParseError::new(ErrorCode::NameConflict, name, "", None));
        }

        let charset = match kind {
            DefKind::Fun | DefKind::Const | DefKind::Var => &self.name_chars,
            DefKind::Oprt | DefKind::Postfix => &self.oprt_chars,
            DefKind::Infix => &self.infix_chars,
        };
        if name.is_empty()
            || name.chars().any(|c| !charset.contains(c))
            || name.starts_with(|c: char| c.is_ascii_digit())
        {
            let code = match kind {
                DefKind::Infix => ErrorCode::InvalidInfixIdent,
                DefKind::Postfix => ErrorCode::InvalidPostfixIdent,
                _ => ErrorCode::InvalidName,
            };
            return Err(ParseError::new(code, name, "", None));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::flt;
    use crate::token::prec;

    #[test]
    fn test_name_conflicts() {
        let mut reg: Registry<f64> = Registry::new();
        reg.define_fun("sin", flt::sin, Arity::Fixed(1)).unwrap();
        let err = reg.define_var("sin", VarRef::new(0.0)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NameConflict);

        reg.define_var("x", VarRef::new(0.0)).unwrap();
        let err = reg.define_const("x", 1.0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NameConflict);
    }

    #[test]
    fn test_binary_and_infix_share_names() {
        let mut reg: Registry<f64> = Registry::new();
        reg.define_oprt("-", flt::sub, prec::ADD_SUB, Assoc::Left).unwrap();
        reg.define_infix_oprt("-", flt::unary_minus, prec::INFIX).unwrap();
    }

    #[test]
    fn test_invalid_names() {
        let mut reg: Registry<f64> = Registry::new();
        let err = reg.define_var("1abc", VarRef::new(0.0)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidName);
        let err = reg.define_var("a b", VarRef::new(0.0)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidName);
        let err = reg.define_infix_oprt("§", flt::unary_minus, prec::INFIX).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInfixIdent);
    }
}
