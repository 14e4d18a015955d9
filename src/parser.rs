//! Parser façade: binds registry, token reader, compiler, bytecode and
//! evaluator behind the public API.
//!
//! An expression is compiled lazily by the first `eval` after `set_expr`;
//! the façade then switches to the selected evaluator and stays there until
//! a registry mutation invalidates the program.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::bytecode::ByteCode;
use crate::compiler::RpnCompiler;
use crate::errors::{ErrorCode, ParseError, ParseResult};
use crate::eval::{self, EngineFn};
use crate::funcs;
use crate::reader::TokenReader;
use crate::registry::Registry;
use crate::token::{prec, Arity, Assoc, FunCallback, ValIdent};
use crate::value::{Number, VarRef};

// ---------------------------------------------------------------------------
// Process-wide diagnostic flags
// ---------------------------------------------------------------------------

static DUMP_BYTECODE: AtomicBool = AtomicBool::new(false);
static DUMP_STACK: AtomicBool = AtomicBool::new(false);

/// Advisory process-wide switches routing bytecode and compile-stack dumps
/// through `tracing` at debug level.
pub fn enable_debug_dump(dump_bytecode: bool, dump_stack: bool) {
    DUMP_BYTECODE.store(dump_bytecode, Ordering::Relaxed);
    DUMP_STACK.store(dump_stack, Ordering::Relaxed);
}

pub(crate) fn dump_bytecode_enabled() -> bool {
    DUMP_BYTECODE.load(Ordering::Relaxed)
}

pub(crate) fn dump_stack_enabled() -> bool {
    DUMP_STACK.load(Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

enum Mode<T: Number> {
    /// No valid program; the next evaluation compiles first.
    Parse,
    Interpret,
    Engine(EngineFn<T>),
}

pub struct Parser<T: Number> {
    reg: Registry<T>,
    reader: TokenReader<T>,
    bc: ByteCode<T>,
    stack: Vec<T>,
    mode: Mode<T>,
}

impl<T: Number> Parser<T> {
    /// A parser without any functions, operators, constants or literal
    /// recognizers. Useful for fully custom grammars; most callers want
    /// [`Parser::<f64>::new`] or [`Parser::<i64>::new`].
    pub fn empty() -> Self {
        let zero = VarRef::new(T::ZERO);
        Parser {
            reg: Registry::new(),
            reader: TokenReader::new(zero.clone()),
            bc: ByteCode::new(zero),
            stack: Vec::new(),
            mode: Mode::Parse,
        }
    }

    // -----------------------------------------------------------------------
    // expression handling
    // -----------------------------------------------------------------------

    pub fn set_expr(&mut self, expr: &str) {
        self.reader.set_formula(expr);
        self.invalidate();
    }

    pub fn expr(&self) -> &str {
        self.reader.expr()
    }

    /// Evaluate the expression, compiling it first if necessary, and return
    /// the last result slot.
    pub fn eval(&mut self) -> ParseResult<T> {
        if matches!(self.mode, Mode::Parse) {
            self.compile()?;
        }
        self.run()
    }

    /// Evaluate and return all top-level result slots ("a=1, b=2" has two).
    pub fn eval_multi(&mut self) -> ParseResult<&[T]> {
        if matches!(self.mode, Mode::Parse) {
            self.compile()?;
        }
        self.run()?;
        let n = self.bc.result_slots();
        Ok(&self.stack[1..=n])
    }

    /// Number of top-level result slots of the compiled expression.
    pub fn result_count(&self) -> usize {
        self.bc.result_slots()
    }

    fn run(&mut self) -> ParseResult<T> {
        match &self.mode {
            Mode::Interpret => eval::run_interpreter(&self.bc, &mut self.stack),
            Mode::Engine(f) => f(&self.bc, &mut self.stack),
            Mode::Parse => Err(ParseError::of(ErrorCode::InternalError)),
        }
    }

    fn compile(&mut self) -> ParseResult<()> {
        let result = RpnCompiler::new(&mut self.reader, &mut self.reg, &mut self.bc).compile();
        if let Err(e) = result {
            // Partial bytecode is discarded; the parser returns cleanly to
            // string-parse mode.
            self.invalidate();
            return Err(e);
        }

        self.stack.clear();
        self.stack.resize(self.bc.max_stack_size().max(2), T::ZERO);

        if dump_bytecode_enabled() {
            debug!(target: "mexpr::bytecode", expr = self.reader.expr(), "\n{}", self.bc.dump());
        }

        self.mode = match eval::select_engine::<T>(self.bc.engine_code(), self.bc.no_mul()) {
            Some(f) => Mode::Engine(f),
            None => Mode::Interpret,
        };
        Ok(())
    }

    fn invalidate(&mut self) {
        self.mode = Mode::Parse;
        self.bc.clear();
        self.reader.reinit();
    }

    // -----------------------------------------------------------------------
    // definitions
    // -----------------------------------------------------------------------

    pub fn define_var(&mut self, name: &str, var: &VarRef<T>) -> ParseResult<()> {
        self.reg.define_var(name, var.clone())?;
        self.invalidate();
        Ok(())
    }

    pub fn remove_var(&mut self, name: &str) {
        if self.reg.remove_var(name) {
            self.invalidate();
        }
    }

    pub fn clear_vars(&mut self) {
        self.reg.clear_vars();
        self.invalidate();
    }

    pub fn define_const(&mut self, name: &str, value: T) -> ParseResult<()> {
        self.reg.define_const(name, value)?;
        self.invalidate();
        Ok(())
    }

    pub fn define_fun(&mut self, name: &str, f: FunCallback<T>, arity: Arity) -> ParseResult<()> {
        self.reg.define_fun(name, f, arity)?;
        self.invalidate();
        Ok(())
    }

    pub fn define_oprt(
        &mut self,
        name: &str,
        f: FunCallback<T>,
        precedence: i32,
        assoc: Assoc,
    ) -> ParseResult<()> {
        self.reg.define_oprt(name, f, precedence, assoc)?;
        self.invalidate();
        Ok(())
    }

    pub fn define_infix_oprt(
        &mut self,
        name: &str,
        f: FunCallback<T>,
        precedence: i32,
    ) -> ParseResult<()> {
        self.reg.define_infix_oprt(name, f, precedence)?;
        self.invalidate();
        Ok(())
    }

    pub fn define_postfix_oprt(&mut self, name: &str, f: FunCallback<T>) -> ParseResult<()> {
        self.reg.define_postfix_oprt(name, f)?;
        self.invalidate();
        Ok(())
    }

    /// Prepend a literal recognizer; the most recently added recognizer is
    /// tried first.
    pub fn add_val_ident(&mut self, f: ValIdent<T>) {
        self.reg.add_val_ident(f);
        self.invalidate();
    }

    /// Install a factory creating storage for undefined identifiers on the
    /// fly during compilation.
    pub fn set_var_factory<F>(&mut self, factory: F)
    where
        F: FnMut(&str) -> VarRef<T> + 'static,
    {
        self.reader.set_var_factory(Some(Box::new(factory)));
        self.invalidate();
    }

    pub fn clear_var_factory(&mut self) {
        self.reader.set_var_factory(None);
        self.invalidate();
    }

    // -----------------------------------------------------------------------
    // introspection
    // -----------------------------------------------------------------------

    pub fn vars(&self) -> &BTreeMap<String, VarRef<T>> {
        &self.reg.vars
    }

    pub fn consts(&self) -> &BTreeMap<String, T> {
        &self.reg.consts
    }

    /// Variables the current expression references, discovered by a dry
    /// compile that treats undefined identifiers as variables instead of
    /// failing. Undefined names map to `None`. All other compile errors
    /// still surface; the parser returns to string-parse mode either way.
    pub fn used_vars(&mut self) -> ParseResult<BTreeMap<String, Option<VarRef<T>>>> {
        self.reader.set_ignore_undef_var(true);
        let result = RpnCompiler::new(&mut self.reader, &mut self.reg, &mut self.bc).compile();
        self.reader.set_ignore_undef_var(false);

        // The dry program may reference the zero sentinel; never evaluate
        // it. The next eval recompiles from the string.
        self.mode = Mode::Parse;
        self.bc.clear();

        result?;
        Ok(self.reader.used_vars().clone())
    }

    /// Compile if necessary and render the program, one token per line.
    pub fn rpn_dump(&mut self) -> ParseResult<String> {
        if matches!(self.mode, Mode::Parse) {
            self.compile()?;
        }
        Ok(self.bc.dump())
    }

    // -----------------------------------------------------------------------
    // configuration
    // -----------------------------------------------------------------------

    /// Toggle the bytecode optimizer; mainly useful for verifying that an
    /// optimized program evaluates like the unoptimized one.
    pub fn enable_optimizer(&mut self, enable: bool) {
        self.bc.set_optimize(enable);
        self.invalidate();
    }

    /// Characters allowed in function, variable and constant names.
    pub fn set_name_chars(&mut self, chars: &str) {
        self.reg.name_chars = chars.to_string();
        self.invalidate();
    }

    /// Characters allowed in binary and postfix operator identifiers.
    pub fn set_oprt_chars(&mut self, chars: &str) {
        self.reg.oprt_chars = chars.to_string();
        self.invalidate();
    }

    /// Characters allowed in prefix operator identifiers.
    pub fn set_infix_chars(&mut self, chars: &str) {
        self.reg.infix_chars = chars.to_string();
        self.invalidate();
    }
}

// ---------------------------------------------------------------------------
// Default instantiations
// ---------------------------------------------------------------------------

impl Parser<f64> {
    /// Floating-point parser with the standard function library, `_pi` and
    /// `_e`, the arithmetic/comparison/logic operators and a decimal float
    /// recognizer.
    pub fn new() -> Self {
        let mut p = Parser::empty();
        p.add_val_ident(parse_float);

        {
            let r = &mut p.reg;
            let f = Arity::Fixed(1);

            r.define_fun("sin", funcs::flt::sin, f).expect("builtin");
            r.define_fun("cos", funcs::flt::cos, f).expect("builtin");
            r.define_fun("tan", funcs::flt::tan, f).expect("builtin");
            r.define_fun("asin", funcs::flt::asin, f).expect("builtin");
            r.define_fun("acos", funcs::flt::acos, f).expect("builtin");
            r.define_fun("atan", funcs::flt::atan, f).expect("builtin");
            r.define_fun("atan2", funcs::flt::atan2, Arity::Fixed(2)).expect("builtin");
            r.define_fun("sinh", funcs::flt::sinh, f).expect("builtin");
            r.define_fun("cosh", funcs::flt::cosh, f).expect("builtin");
            r.define_fun("tanh", funcs::flt::tanh, f).expect("builtin");
            r.define_fun("asinh", funcs::flt::asinh, f).expect("builtin");
            r.define_fun("acosh", funcs::flt::acosh, f).expect("builtin");
            r.define_fun("atanh", funcs::flt::atanh, f).expect("builtin");
            r.define_fun("log2", funcs::flt::log2, f).expect("builtin");
            r.define_fun("log10", funcs::flt::log10, f).expect("builtin");
            r.define_fun("log", funcs::flt::log, f).expect("builtin");
            r.define_fun("ln", funcs::flt::log, f).expect("builtin");
            r.define_fun("exp", funcs::flt::exp, f).expect("builtin");
            r.define_fun("sqrt", funcs::flt::sqrt, f).expect("builtin");
            r.define_fun("sign", funcs::flt::sign, f).expect("builtin");
            r.define_fun("rint", funcs::flt::rint, f).expect("builtin");
            r.define_fun("abs", funcs::flt::abs, f).expect("builtin");
            r.define_fun("sum", funcs::flt::sum, Arity::Variadic).expect("builtin");
            r.define_fun("avg", funcs::flt::avg, Arity::Variadic).expect("builtin");
            r.define_fun("min", funcs::flt::min, Arity::Variadic).expect("builtin");
            r.define_fun("max", funcs::flt::max, Arity::Variadic).expect("builtin");

            r.define_const("_pi", funcs::flt::PI).expect("builtin");
            r.define_const("_e", funcs::flt::E).expect("builtin");

            r.define_infix_oprt("-", funcs::flt::unary_minus, prec::INFIX).expect("builtin");
            r.define_infix_oprt("+", funcs::flt::unary_plus, prec::INFIX).expect("builtin");

            r.define_oprt("&&", funcs::flt::and, prec::LOGIC, Assoc::Left).expect("builtin");
            r.define_oprt("||", funcs::flt::or, prec::LOGIC, Assoc::Left).expect("builtin");
            r.define_oprt("<", funcs::flt::less, prec::CMP, Assoc::Left).expect("builtin");
            r.define_oprt(">", funcs::flt::greater, prec::CMP, Assoc::Left).expect("builtin");
            r.define_oprt("<=", funcs::flt::less_eq, prec::CMP, Assoc::Left).expect("builtin");
            r.define_oprt(">=", funcs::flt::greater_eq, prec::CMP, Assoc::Left).expect("builtin");
            r.define_oprt("==", funcs::flt::equal, prec::CMP, Assoc::Left).expect("builtin");
            r.define_oprt("!=", funcs::flt::not_equal, prec::CMP, Assoc::Left).expect("builtin");
            r.define_oprt("+", funcs::flt::add, prec::ADD_SUB, Assoc::Left).expect("builtin");
            r.define_oprt("-", funcs::flt::sub, prec::ADD_SUB, Assoc::Left).expect("builtin");
            r.define_oprt("*", funcs::flt::mul, prec::MUL_DIV, Assoc::Left).expect("builtin");
            r.define_oprt("/", funcs::flt::div, prec::MUL_DIV, Assoc::Left).expect("builtin");
            r.define_oprt("^", funcs::flt::pow, prec::POW, Assoc::Right).expect("builtin");
        }

        p
    }
}

impl Default for Parser<f64> {
    fn default() -> Self {
        Parser::<f64>::new()
    }
}

impl Parser<i64> {
    /// Integer parser: decimal, "#..." binary and "0x..." hex literals, the
    /// integer subset of the function library, and the operator set without
    /// "/" and "^".
    pub fn new() -> Self {
        let mut p = Parser::empty();
        // Registration order matters: the hex recognizer must run before
        // the decimal one or the "0" in "0xff" would be consumed first.
        p.add_val_ident(parse_int);
        p.add_val_ident(parse_bin);
        p.add_val_ident(parse_hex);

        {
            let r = &mut p.reg;

            r.define_fun("abs", funcs::int::abs, Arity::Fixed(1)).expect("builtin");
            r.define_fun("sum", funcs::int::sum, Arity::Variadic).expect("builtin");
            r.define_fun("min", funcs::int::min, Arity::Variadic).expect("builtin");
            r.define_fun("max", funcs::int::max, Arity::Variadic).expect("builtin");

            r.define_infix_oprt("-", funcs::int::unary_minus, prec::INFIX).expect("builtin");
            r.define_infix_oprt("+", funcs::int::unary_plus, prec::INFIX).expect("builtin");

            r.define_oprt("&&", funcs::int::and, prec::LOGIC, Assoc::Left).expect("builtin");
            r.define_oprt("||", funcs::int::or, prec::LOGIC, Assoc::Left).expect("builtin");
            r.define_oprt("<", funcs::int::less, prec::CMP, Assoc::Left).expect("builtin");
            r.define_oprt(">", funcs::int::greater, prec::CMP, Assoc::Left).expect("builtin");
            r.define_oprt("<=", funcs::int::less_eq, prec::CMP, Assoc::Left).expect("builtin");
            r.define_oprt(">=", funcs::int::greater_eq, prec::CMP, Assoc::Left).expect("builtin");
            r.define_oprt("==", funcs::int::equal, prec::CMP, Assoc::Left).expect("builtin");
            r.define_oprt("!=", funcs::int::not_equal, prec::CMP, Assoc::Left).expect("builtin");
            r.define_oprt("+", funcs::int::add, prec::ADD_SUB, Assoc::Left).expect("builtin");
            r.define_oprt("-", funcs::int::sub, prec::ADD_SUB, Assoc::Left).expect("builtin");
            r.define_oprt("*", funcs::int::mul, prec::MUL_DIV, Assoc::Left).expect("builtin");
        }

        p
    }
}

impl Default for Parser<i64> {
    fn default() -> Self {
        Parser::<i64>::new()
    }
}

// ---------------------------------------------------------------------------
// Default literal recognizers
// ---------------------------------------------------------------------------

/// Decimal float: digits, optional fraction, optional well-formed exponent.
/// Signs are left to the prefix operators.
pub(crate) fn parse_float(text: &str) -> Result<Option<(f64, usize)>, ParseError> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let int_len = i;

    if i < bytes.len() && bytes[i] == b'.' {
        let mut j = i + 1;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        // "1." and ".5" are fine, a lone "." is not.
        if int_len > 0 || j > i + 1 {
            i = j;
        }
    }
    if i == 0 {
        return Ok(None);
    }

    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let digits_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > digits_start {
            i = j;
        }
    }

    match text[..i].parse::<f64>() {
        Ok(v) => Ok(Some((v, i))),
        Err(_) => Ok(None),
    }
}

/// Decimal integer literal.
pub(crate) fn parse_int(text: &str) -> Result<Option<(i64, usize)>, ParseError> {
    let n = text.bytes().take_while(|b| b.is_ascii_digit()).count();
    if n == 0 {
        return Ok(None);
    }
    match text[..n].parse::<i64>() {
        Ok(v) => Ok(Some((v, n))),
        Err(_) => Ok(None),
    }
}

/// "0x" prefixed hex literal.
pub(crate) fn parse_hex(text: &str) -> Result<Option<(i64, usize)>, ParseError> {
    if !text.starts_with("0x") {
        return Ok(None);
    }
    let n = text[2..]
        .bytes()
        .take_while(|b| b.is_ascii_hexdigit())
        .count();
    if n == 0 {
        return Ok(None);
    }
    match u64::from_str_radix(&text[2..2 + n], 16) {
        Ok(v) => Ok(Some((v as i64, 2 + n))),
        Err(_) => Ok(None),
    }
}

/// "#" prefixed binary literal, most significant bit first. Word-width
/// inputs overflow.
pub(crate) fn parse_bin(text: &str) -> Result<Option<(i64, usize)>, ParseError> {
    if !text.starts_with('#') {
        return Ok(None);
    }
    const BITS: usize = 64;

    let mut count = 0usize;
    let mut val: u64 = 0;
    for b in text.as_bytes()[1..].iter() {
        if *b != b'0' && *b != b'1' {
            break;
        }
        if count == BITS {
            return Err(ParseError::new(
                ErrorCode::Generic,
                "#",
                "",
                None,
            ));
        }
        val |= ((*b == b'1') as u64) << (BITS - 1 - count);
        count += 1;
    }
    if count == 0 {
        return Ok(None);
    }

    Ok(Some(((val >> (BITS - count)) as i64, count + 1)))
}

// ---------------------------------------------------------------------------
// tests
// ---------------------------------------------------------------------------
