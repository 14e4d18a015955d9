//! RPN bytecode builder and peephole optimizer.
//!
//! The compiler appends tokens through the `add_*` methods; each append is a
//! chance to fold. Optimizations applied while building:
//!
//!   1. Constant folding      — callbacks over all-constant windows run now
//!   2. Additive absorption   — "+"/"-" over value tokens merge into one slot
//!   3. Multiplicative absorption — scaling folds into the slot multiplier
//!   4. Power substitution    — "^k" for k in 2..=5 becomes a fast call
//!
//! `finalize` then runs two sweeps over the finished program: *substitute*
//! fuses adjacent operator pairs into ternary calls (a+b+c → one add3), and
//! *compress* squeezes neighbouring value tokens and up to three successive
//! calls into single tokens to cut dispatch overhead. It also back-patches
//! the conditional jump offsets and computes the shape fingerprint that
//! selects a straight-line evaluator for short programs.

use std::fmt::Write as _;
use std::mem;

use crate::errors::{ErrorCode, ParseError, ParseResult};
use crate::token::FunCallback;
use crate::value::{Number, VarRef};

/// Fingerprint ceiling: programs whose shape code reaches this value run on
/// the generic interpreter. Five logical opcodes fit below it.
pub(crate) const UNOPTIMIZABLE: u32 = 0x20;

/// Constant folding gives up beyond this argument count.
const FOLD_ARG_LIMIT: usize = 20;

// ---------------------------------------------------------------------------
// Token payloads
// ---------------------------------------------------------------------------

/// A generalized value: `var * mul + fixed`. Pure constants keep `mul == 0`
/// and point at the parser's zero sentinel.
#[derive(Clone)]
pub(crate) struct ValSlot<T: Number> {
    pub var: VarRef<T>,
    pub mul: T,
    pub fixed: T,
    pub ident: String,
}

impl<T: Number> ValSlot<T> {
    pub fn constant(fixed: T, ident: String, zero: &VarRef<T>) -> Self {
        ValSlot {
            var: zero.clone(),
            mul: T::ZERO,
            fixed,
            ident,
        }
    }

    pub fn variable(var: VarRef<T>, ident: String) -> Self {
        ValSlot {
            var,
            mul: T::ONE,
            fixed: T::ZERO,
            ident,
        }
    }

    #[inline]
    pub fn value(&self) -> T {
        self.var.get() * self.mul + self.fixed
    }

    /// Fast path for programs whose multipliers are all one (or whose
    /// constant slots point at the zero sentinel).
    #[inline]
    pub fn value_no_mul(&self) -> T {
        self.var.get() + self.fixed
    }

    pub fn is_const(&self) -> bool {
        self.mul == T::ZERO
    }

    fn reset_variable_part(&mut self, zero: &VarRef<T>) {
        self.var = zero.clone();
        self.mul = T::ZERO;
    }
}

#[derive(Clone)]
pub(crate) struct FunCall<T: Number> {
    pub f: FunCallback<T>,
    pub argc: usize,
    pub ident: String,
}

impl<T: Number> FunCall<T> {
    /// Apply the callback to its argument window; `top` is the index of the
    /// last argument. Returns the index the result lives at.
    #[inline]
    pub fn apply(&self, stack: &mut [T], top: usize) -> ParseResult<usize> {
        let base = (top + 1)
            .checked_sub(self.argc)
            .ok_or_else(|| ParseError::of(ErrorCode::InternalError))?;
        let end = if self.argc == 0 { base } else { top };
        (self.f)(&mut stack[base..=end], self.argc)
            .map_err(|e| ParseError::new(e.code(), self.ident.clone(), "", None))?;
        Ok(base)
    }
}

#[derive(Clone)]
pub(crate) enum RpnOp<T: Number> {
    Val {
        first: ValSlot<T>,
        second: Option<ValSlot<T>>,
    },
    Fun {
        first: FunCall<T>,
        second: Option<FunCall<T>>,
        third: Option<FunCall<T>>,
    },
    Assign {
        var: VarRef<T>,
    },
    If {
        offset: usize,
    },
    Else {
        offset: usize,
    },
    EndIf,
    End,
}

/// One program step plus the working-stack index its result occupies.
#[derive(Clone)]
pub(crate) struct RpnTok<T: Number> {
    pub stack_pos: usize,
    pub op: RpnOp<T>,
}

// ---------------------------------------------------------------------------
// Fused callbacks installed by the optimizer
// ---------------------------------------------------------------------------

mod fused {
    use crate::errors::MathError;
    use crate::value::Number;

    type R = Result<(), MathError>;

    pub fn aa<T: Number>(v: &mut [T], _argc: usize) -> R { v[0] = v[0] + (v[1] + v[2]); Ok(()) }
    pub fn mm<T: Number>(v: &mut [T], _argc: usize) -> R { v[0] = v[0] * (v[1] * v[2]); Ok(()) }
    pub fn ma<T: Number>(v: &mut [T], _argc: usize) -> R { v[0] = v[0] + v[1] * v[2]; Ok(()) }
    pub fn am<T: Number>(v: &mut [T], _argc: usize) -> R { v[0] = v[0] * (v[1] + v[2]); Ok(()) }

    pub fn dd<T: Number>(v: &mut [T], _argc: usize) -> R {
        let q = v[1].checked_div(v[2])?;
        v[0] = v[0].checked_div(q)?;
        Ok(())
    }
    pub fn dm<T: Number>(v: &mut [T], _argc: usize) -> R {
        v[0] = v[0] * v[1].checked_div(v[2])?;
        Ok(())
    }
    pub fn md<T: Number>(v: &mut [T], _argc: usize) -> R {
        v[0] = v[0].checked_div(v[1] * v[2])?;
        Ok(())
    }
    pub fn da<T: Number>(v: &mut [T], _argc: usize) -> R {
        v[0] = v[0] + v[1].checked_div(v[2])?;
        Ok(())
    }
    pub fn ad<T: Number>(v: &mut [T], _argc: usize) -> R {
        v[0] = v[0].checked_div(v[1] + v[2])?;
        Ok(())
    }
    pub fn ds<T: Number>(v: &mut [T], _argc: usize) -> R {
        v[0] = v[0] - v[1].checked_div(v[2])?;
        Ok(())
    }
    pub fn sd<T: Number>(v: &mut [T], _argc: usize) -> R {
        v[0] = v[0].checked_div(v[1] - v[2])?;
        Ok(())
    }

    pub fn p2<T: Number>(v: &mut [T], _argc: usize) -> R { v[0] = v[0] * v[0]; Ok(()) }
    pub fn p3<T: Number>(v: &mut [T], _argc: usize) -> R { v[0] = v[0] * v[0] * v[0]; Ok(()) }
    pub fn p4<T: Number>(v: &mut [T], _argc: usize) -> R { let x = v[0] * v[0]; v[0] = x * x; Ok(()) }
    pub fn p5<T: Number>(v: &mut [T], _argc: usize) -> R { let x = v[0] * v[0]; v[0] = x * x * v[0]; Ok(()) }

    pub fn p2m<T: Number>(v: &mut [T], _argc: usize) -> R { v[0] = v[0] * (v[1] * v[1]); Ok(()) }
    pub fn p3m<T: Number>(v: &mut [T], _argc: usize) -> R { v[0] = v[0] * (v[1] * v[1] * v[1]); Ok(()) }
    pub fn p4m<T: Number>(v: &mut [T], _argc: usize) -> R { let x = v[1] * v[1]; v[0] = v[0] * (x * x); Ok(()) }

    pub fn p2a<T: Number>(v: &mut [T], _argc: usize) -> R { v[0] = v[0] + v[1] * v[1]; Ok(()) }
    pub fn p3a<T: Number>(v: &mut [T], _argc: usize) -> R { v[0] = v[0] + v[1] * v[1] * v[1]; Ok(()) }
    pub fn p4a<T: Number>(v: &mut [T], _argc: usize) -> R { let x = v[1] * v[1]; v[0] = v[0] + x * x; Ok(()) }
}

// ---------------------------------------------------------------------------
// ByteCode
// ---------------------------------------------------------------------------

pub(crate) struct ByteCode<T: Number> {
    rpn: Vec<RpnTok<T>>,
    stack_pos: usize,
    max_stack: usize,
    optimize: bool,
    null_value: VarRef<T>,

    engine_code: u32,
    no_mul: bool,
    result_slots: usize,

    /// Value slots and calls in program order, filled for programs short
    /// enough for the straight-line evaluator family.
    flat_vals: Vec<ValSlot<T>>,
    flat_calls: Vec<FunCall<T>>,
}

impl<T: Number> ByteCode<T> {
    pub fn new(null_value: VarRef<T>) -> Self {
        ByteCode {
            rpn: Vec::with_capacity(50),
            stack_pos: 0,
            max_stack: 0,
            optimize: true,
            null_value,
            engine_code: UNOPTIMIZABLE,
            no_mul: false,
            result_slots: 1,
            flat_vals: Vec::new(),
            flat_calls: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.rpn.clear();
        self.stack_pos = 0;
        self.max_stack = 0;
        self.engine_code = UNOPTIMIZABLE;
        self.no_mul = false;
        self.result_slots = 1;
        self.flat_vals.clear();
        self.flat_calls.clear();
    }

    pub fn set_optimize(&mut self, enable: bool) {
        self.optimize = enable;
    }

    pub fn rpn(&self) -> &[RpnTok<T>] {
        &self.rpn
    }

    pub fn is_empty(&self) -> bool {
        self.rpn.is_empty()
    }

    /// Working-stack size the evaluator needs (index 0 stays unused).
    pub fn max_stack_size(&self) -> usize {
        self.max_stack + 1
    }

    pub fn engine_code(&self) -> u32 {
        self.engine_code
    }

    pub fn no_mul(&self) -> bool {
        self.no_mul
    }

    pub fn result_slots(&self) -> usize {
        self.result_slots
    }

    pub fn flat_vals(&self) -> &[ValSlot<T>] {
        &self.flat_vals
    }

    pub fn flat_calls(&self) -> &[FunCall<T>] {
        &self.flat_calls
    }

    pub fn null_value(&self) -> &VarRef<T> {
        &self.null_value
    }

    // -----------------------------------------------------------------------
    // building
    // -----------------------------------------------------------------------

    fn add_tok(&mut self, op: RpnOp<T>) {
        self.rpn.push(RpnTok {
            stack_pos: self.stack_pos,
            op,
        });
    }

    fn pop_tok(&mut self) -> Option<RpnTok<T>> {
        let tok = self.rpn.pop();
        self.stack_pos = self.rpn.last().map(|t| t.stack_pos).unwrap_or(0);
        tok
    }

    fn push_val_slot(&mut self, slot: ValSlot<T>) {
        self.stack_pos += 1;
        self.max_stack = self.max_stack.max(self.stack_pos);
        self.add_tok(RpnOp::Val {
            first: slot,
            second: None,
        });
    }

    pub fn add_val(&mut self, val: T, ident: &str) {
        let slot = ValSlot::constant(val, ident.to_string(), &self.null_value);
        self.push_val_slot(slot);
    }

    pub fn add_var(&mut self, var: VarRef<T>, ident: &str) {
        self.push_val_slot(ValSlot::variable(var, ident.to_string()));
    }

    pub fn add_assign(&mut self, var: VarRef<T>) -> ParseResult<()> {
        self.stack_pos = self
            .stack_pos
            .checked_sub(1)
            .filter(|p| *p >= 1)
            .ok_or_else(|| ParseError::of(ErrorCode::InternalError))?;
        self.add_tok(RpnOp::Assign { var });
        Ok(())
    }

    pub fn add_if(&mut self) -> ParseResult<()> {
        self.stack_pos = self
            .stack_pos
            .checked_sub(1)
            .ok_or_else(|| ParseError::of(ErrorCode::InternalError))?;
        self.add_tok(RpnOp::If { offset: 0 });
        Ok(())
    }

    pub fn add_else(&mut self) -> ParseResult<()> {
        // The else branch recomputes the slot the then branch wrote to.
        let last_pos = self
            .rpn
            .last()
            .map(|t| t.stack_pos)
            .ok_or_else(|| ParseError::of(ErrorCode::InternalError))?;
        self.stack_pos = last_pos
            .checked_sub(1)
            .ok_or_else(|| ParseError::of(ErrorCode::InternalError))?;
        self.add_tok(RpnOp::Else { offset: 0 });
        Ok(())
    }

    pub fn add_endif(&mut self) {
        self.add_tok(RpnOp::EndIf);
    }

    /// Append a function or operator call. Binary operators are functions of
    /// arity two distinguished only by their identifier; they additionally
    /// enable the arithmetic absorptions.
    pub fn add_fun(
        &mut self,
        f: FunCallback<T>,
        argc: usize,
        ident: &str,
        is_bin_oprt: bool,
    ) -> ParseResult<()> {
        let mut f = f;
        let mut ident = ident.to_string();

        if self.optimize {
            if self.try_constant_folding(f, argc, &ident)? {
                return Ok(());
            }
            if is_bin_oprt {
                let done = match ident.as_str() {
                    "+" | "-" => self.try_optimize_add_sub(&mut f, &mut ident)?,
                    "*" => self.try_optimize_mul(),
                    "^" => self.try_optimize_pow(),
                    _ => false,
                };
                if done {
                    return Ok(());
                }
            }
        }

        self.stack_pos = (self.stack_pos + 1)
            .checked_sub(argc)
            .ok_or_else(|| ParseError::of(ErrorCode::InternalError))?;
        self.max_stack = self.max_stack.max(self.stack_pos);
        self.add_tok(RpnOp::Fun {
            first: FunCall { f, argc, ident },
            second: None,
            third: None,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // per-append optimizations
    // -----------------------------------------------------------------------

    /// If every argument is a plain constant, run the callback now and keep
    /// only the result.
    fn try_constant_folding(
        &mut self,
        f: FunCallback<T>,
        argc: usize,
        ident: &str,
    ) -> ParseResult<bool> {
        let n = self.rpn.len();
        if argc == 0 || argc >= FOLD_ARG_LIMIT || n < argc {
            return Ok(false);
        }

        let mut buf = Vec::with_capacity(argc);
        for tok in &self.rpn[n - argc..] {
            match &tok.op {
                RpnOp::Val { first, second: None } if first.is_const() => buf.push(first.fixed),
                _ => return Ok(false),
            }
        }

        f(&mut buf, argc).map_err(|e| ParseError::new(e.code(), ident, "", None))?;

        self.rpn.truncate(n - (argc - 1));
        let zero = self.null_value.clone();
        let last = self
            .rpn
            .last_mut()
            .ok_or_else(|| ParseError::of(ErrorCode::InternalError))?;
        if let RpnOp::Val { first, .. } = &mut last.op {
            first.reset_variable_part(&zero);
            first.fixed = buf[0];
        }
        self.stack_pos = last.stack_pos;
        Ok(true)
    }

    fn top_two_val_slots(&self) -> Option<(&ValSlot<T>, &ValSlot<T>)> {
        let n = self.rpn.len();
        if n < 2 {
            return None;
        }
        match (&self.rpn[n - 2].op, &self.rpn[n - 1].op) {
            (
                RpnOp::Val { first: a, second: None },
                RpnOp::Val { first: b, second: None },
            ) => Some((a, b)),
            _ => None,
        }
    }

    /// Fold "+"/"-" into the value slots themselves. A subtraction first
    /// becomes an addition of a negated value, which keeps the rest of the
    /// pass additive only.
    fn try_optimize_add_sub(
        &mut self,
        f: &mut FunCallback<T>,
        ident: &mut String,
    ) -> ParseResult<bool> {
        if ident == "-" {
            let top_is_val = matches!(
                self.rpn.last(),
                Some(RpnTok {
                    op: RpnOp::Val { second: None, .. },
                    ..
                })
            );
            if top_is_val {
                if let Some(RpnTok {
                    op: RpnOp::Val { first, .. },
                    ..
                }) = self.rpn.last_mut()
                {
                    if first.mul != T::ZERO {
                        first.mul = -first.mul;
                    }
                    if first.fixed != T::ZERO {
                        first.fixed = -first.fixed;
                    }
                }
                *f = T::add_callback();
                *ident = "+".to_string();

                // Maybe an addition sits directly in front; unwind it and
                // reapply so the two value tokens can combine further.
                let n = self.rpn.len();
                let prev_is_add = n >= 2
                    && matches!(
                        &self.rpn[n - 2].op,
                        RpnOp::Fun {
                            first,
                            second: None,
                            third: None,
                        } if first.ident == "+" && first.argc == 2
                    );
                if prev_is_add {
                    let val_tok = self
                        .pop_tok()
                        .ok_or_else(|| ParseError::of(ErrorCode::InternalError))?;
                    let fun_tok = self
                        .pop_tok()
                        .ok_or_else(|| ParseError::of(ErrorCode::InternalError))?;
                    let slot = match val_tok.op {
                        RpnOp::Val { first, .. } => first,
                        _ => return Err(ParseError::of(ErrorCode::InternalError)),
                    };
                    let call = match fun_tok.op {
                        RpnOp::Fun { first, .. } => first,
                        _ => return Err(ParseError::of(ErrorCode::InternalError)),
                    };
                    self.push_val_slot(slot);
                    self.add_fun(call.f, call.argc, &call.ident, true)?;
                } else {
                    // The rewritten "+" still has to be pushed by the caller.
                    return Ok(false);
                }
            }
        }

        // Join the two topmost value tokens if they are compatible: at least
        // one is a pure constant, or both scale the same variable.
        let joinable = match self.top_two_val_slots() {
            Some((a, b)) => {
                a.is_const() || b.is_const() || VarRef::same_cell(&a.var, &b.var)
            }
            None => false,
        };
        if !joinable {
            return Ok(false);
        }

        let minus = ident.as_str() == "-";
        let top = match self.pop_tok().map(|t| t.op) {
            Some(RpnOp::Val { first, .. }) => first,
            _ => return Err(ParseError::of(ErrorCode::InternalError)),
        };
        let zero = self.null_value.clone();
        if let Some(RpnTok {
            op: RpnOp::Val { first, .. },
            ..
        }) = self.rpn.last_mut()
        {
            if !top.is_const() {
                first.var = top.var.clone();
            }
            if minus {
                first.fixed = first.fixed - top.fixed;
                first.mul = first.mul - top.mul;
            } else {
                first.fixed = first.fixed + top.fixed;
                first.mul = first.mul + top.mul;
            }
            if first.mul == T::ZERO {
                first.reset_variable_part(&zero);
            }
        }
        Ok(true)
    }

    /// A constant factor scales the other slot's multiplier and offset.
    fn try_optimize_mul(&mut self) -> bool {
        let action = match self.top_two_val_slots() {
            Some((a, b)) if b.is_const() && !a.is_const() => 1,
            Some((a, b)) if !b.is_const() && a.is_const() => 2,
            _ => return false,
        };

        let top = match self.pop_tok().map(|t| t.op) {
            Some(RpnOp::Val { first, .. }) => first,
            _ => return false,
        };
        if let Some(RpnTok {
            op: RpnOp::Val { first, .. },
            ..
        }) = self.rpn.last_mut()
        {
            if action == 1 {
                // (k*x + c) * d
                first.mul = first.mul * top.fixed;
                first.fixed = first.fixed * top.fixed;
            } else {
                // d * (k*x + c)
                let d = first.fixed;
                first.var = top.var.clone();
                first.mul = top.mul * d;
                first.fixed = top.fixed * d;
            }
        }
        true
    }

    /// Replace "^k" for small integral constant exponents with a fixed fast
    /// call that needs no exponent operand.
    fn try_optimize_pow(&mut self) -> bool {
        let power = match self.rpn.last() {
            Some(RpnTok {
                op: RpnOp::Val { first, second: None },
                ..
            }) if first.is_const() => match first.fixed.as_int() {
                Some(k @ 2..=5) => k,
                _ => return false,
            },
            _ => return false,
        };
        if self.rpn.len() < 2 {
            return false;
        }

        self.pop_tok();
        let f: FunCallback<T> = match power {
            2 => fused::p2,
            3 => fused::p3,
            4 => fused::p4,
            _ => fused::p5,
        };
        self.add_tok(RpnOp::Fun {
            first: FunCall {
                f,
                argc: 1,
                ident: format!("^{}", power),
            },
            second: None,
            third: None,
        });
        true
    }

    // -----------------------------------------------------------------------
    // finalize
    // -----------------------------------------------------------------------

    pub fn finalize(&mut self, result_slots: usize) -> ParseResult<()> {
        if self.optimize {
            self.substitute();
            self.compress();
        }
        self.add_tok(RpnOp::End);
        self.result_slots = result_slots;

        self.patch_jump_offsets()?;
        self.compute_engine_code();
        Ok(())
    }

    /// Pair the conditional markers and back-patch their forward offsets.
    fn patch_jump_offsets(&mut self) -> ParseResult<()> {
        let mut if_stack: Vec<usize> = Vec::new();
        let mut else_stack: Vec<usize> = Vec::new();

        for i in 0..self.rpn.len() {
            let kind = match &self.rpn[i].op {
                RpnOp::If { .. } => 1,
                RpnOp::Else { .. } => 2,
                RpnOp::EndIf => 3,
                _ => 0,
            };
            match kind {
                1 => if_stack.push(i),
                2 => {
                    let idx = if_stack
                        .pop()
                        .ok_or_else(|| ParseError::of(ErrorCode::InternalError))?;
                    if let RpnOp::If { offset } = &mut self.rpn[idx].op {
                        *offset = i - idx;
                    }
                    else_stack.push(i);
                }
                3 => {
                    let idx = else_stack
                        .pop()
                        .ok_or_else(|| ParseError::of(ErrorCode::InternalError))?;
                    if let RpnOp::Else { offset } = &mut self.rpn[idx].op {
                        *offset = i - idx;
                    }
                }
                _ => {}
            }
        }

        if !if_stack.is_empty() || !else_stack.is_empty() {
            return Err(ParseError::of(ErrorCode::InternalError));
        }
        Ok(())
    }

    /// Shape fingerprint: one set bit per value slot, one shift per call,
    /// built over the logical program so compression does not change it.
    /// Conditionals, assignments, zero-argument calls and multi-result
    /// programs fall back to the generic interpreter.
    fn compute_engine_code(&mut self) {
        let mut code: u32 = 0;
        let mut no_mul = true;

        for tok in &self.rpn {
            match &tok.op {
                RpnOp::Val { first, second } => {
                    for slot in std::iter::once(first).chain(second.as_ref()) {
                        if slot.mul != T::ZERO && slot.mul != T::ONE {
                            no_mul = false;
                        }
                        if code < UNOPTIMIZABLE {
                            code = (code << 1) | 1;
                        }
                    }
                }
                RpnOp::Fun {
                    first,
                    second,
                    third,
                } => {
                    for call in std::iter::once(first)
                        .chain(second.as_ref())
                        .chain(third.as_ref())
                    {
                        if call.argc < 1 {
                            code = UNOPTIMIZABLE;
                        } else if code < UNOPTIMIZABLE {
                            code <<= 1;
                        }
                    }
                }
                RpnOp::End => {}
                _ => code = UNOPTIMIZABLE,
            }
        }

        if self.result_slots != 1 {
            code = UNOPTIMIZABLE;
        }
        self.engine_code = code.min(UNOPTIMIZABLE);
        self.no_mul = no_mul;

        self.flat_vals.clear();
        self.flat_calls.clear();
        if self.engine_code < UNOPTIMIZABLE {
            for tok in &self.rpn {
                match &tok.op {
                    RpnOp::Val { first, second } => {
                        self.flat_vals.push(first.clone());
                        if let Some(s) = second {
                            self.flat_vals.push(s.clone());
                        }
                    }
                    RpnOp::Fun {
                        first,
                        second,
                        third,
                    } => {
                        self.flat_calls.push(first.clone());
                        if let Some(c) = second {
                            self.flat_calls.push(c.clone());
                        }
                        if let Some(c) = third {
                            self.flat_calls.push(c.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// Sweep A: fuse adjacent operator pairs into ternary fast calls.
    fn substitute(&mut self) {
        let old = mem::take(&mut self.rpn);
        let mut out: Vec<RpnTok<T>> = Vec::with_capacity(old.len());

        for tok in old {
            if let RpnOp::Fun {
                first: cur,
                second: None,
                third: None,
            } = &tok.op
            {
                if let Some(RpnTok {
                    op:
                        RpnOp::Fun {
                            first: prev,
                            second: None,
                            third: None,
                        },
                    ..
                }) = out.last_mut()
                {
                    if let Some((ident, f, argc)) = fuse_entry::<T>(cur, prev) {
                        prev.ident = ident;
                        prev.f = f;
                        prev.argc = argc;
                        continue;
                    }
                }
            }
            out.push(tok);
        }

        self.rpn = out;
    }

    /// Sweep B: squeeze neighbouring tokens into the unused slots so one
    /// dispatch covers several steps.
    fn compress(&mut self) {
        let old = mem::take(&mut self.rpn);
        let mut out: Vec<RpnTok<T>> = Vec::with_capacity(old.len());

        for tok in old {
            let stack_pos = tok.stack_pos;
            match tok.op {
                RpnOp::Fun {
                    first,
                    second: None,
                    third: None,
                } => {
                    if let Some(RpnTok {
                        op: RpnOp::Fun { second, third, .. },
                        ..
                    }) = out.last_mut()
                    {
                        if second.is_none() {
                            *second = Some(first);
                            continue;
                        }
                        if third.is_none() {
                            *third = Some(first);
                            continue;
                        }
                    }
                    out.push(RpnTok {
                        stack_pos,
                        op: RpnOp::Fun {
                            first,
                            second: None,
                            third: None,
                        },
                    });
                }
                RpnOp::Val {
                    first,
                    second: None,
                } => {
                    if let Some(RpnTok {
                        op: RpnOp::Val { second, .. },
                        ..
                    }) = out.last_mut()
                    {
                        if second.is_none() {
                            *second = Some(first);
                            continue;
                        }
                    }
                    out.push(RpnTok {
                        stack_pos,
                        op: RpnOp::Val {
                            first,
                            second: None,
                        },
                    });
                }
                op => out.push(RpnTok { stack_pos, op }),
            }
        }

        self.rpn = out;
    }

    // -----------------------------------------------------------------------
    // diagnostics
    // -----------------------------------------------------------------------

    /// Render the program for the debug dump. Deterministic for identical
    /// compilations.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        if self.rpn.is_empty() {
            out.push_str("no bytecode available\n");
            return out;
        }

        let _ = writeln!(
            out,
            "rpn tokens: {}  max stack: {}  engine code: {}{}",
            self.rpn.len().saturating_sub(1),
            self.max_stack_size(),
            self.engine_code,
            if self.no_mul { " (no-mul)" } else { "" }
        );

        for (i, tok) in self.rpn.iter().enumerate() {
            let _ = write!(out, "{:3} : {:2}\t", i, tok.stack_pos);
            match &tok.op {
                RpnOp::Val { first, second } => {
                    let _ = write!(
                        out,
                        "VAL_EX\t[{}][MUL:{}][ADD:{}]",
                        first.ident, first.mul, first.fixed
                    );
                    if let Some(s) = second {
                        let _ = write!(out, " | [{}][MUL:{}][ADD:{}]", s.ident, s.mul, s.fixed);
                    }
                }
                RpnOp::Fun {
                    first,
                    second,
                    third,
                } => {
                    let _ = write!(out, "CALL\t[{}][ARGC:{}]", first.ident, first.argc);
                    if let Some(c) = second {
                        let _ = write!(out, " | [{}][ARGC:{}]", c.ident, c.argc);
                    }
                    if let Some(c) = third {
                        let _ = write!(out, " | [{}][ARGC:{}]", c.ident, c.argc);
                    }
                }
                RpnOp::Assign { .. } => {
                    let _ = write!(out, "ASSIGN");
                }
                RpnOp::If { offset } => {
                    let _ = write!(out, "IF\t[OFFSET:{}]", offset);
                }
                RpnOp::Else { offset } => {
                    let _ = write!(out, "ELSE\t[OFFSET:{}]", offset);
                }
                RpnOp::EndIf => {
                    let _ = write!(out, "ENDIF");
                }
                RpnOp::End => {
                    let _ = write!(out, "END");
                }
            }
            out.push('\n');
        }
        out
    }
}

/// Fusion table for adjacent call pairs. `later` is the token being
/// appended, `earlier` the one already emitted; the fused call replaces the
/// earlier one.
fn fuse_entry<T: Number>(
    later: &FunCall<T>,
    earlier: &FunCall<T>,
) -> Option<(String, FunCallback<T>, usize)> {
    if later.argc == 2 && earlier.argc == 2 {
        let f: Option<FunCallback<T>> = match (later.ident.as_str(), earlier.ident.as_str()) {
            ("+", "+") => Some(fused::aa),
            ("*", "*") => Some(fused::mm),
            ("+", "*") => Some(fused::ma),
            ("*", "+") => Some(fused::am),
            ("/", "/") => Some(fused::dd),
            ("*", "/") => Some(fused::dm),
            ("/", "*") => Some(fused::md),
            ("+", "/") => Some(fused::da),
            ("/", "+") => Some(fused::ad),
            ("-", "/") => Some(fused::ds),
            ("/", "-") => Some(fused::sd),
            _ => None,
        };
        if let Some(f) = f {
            return Some((format!("{}{}", later.ident, earlier.ident), f, 3));
        }
    }

    if later.argc == 2 && earlier.argc == 1 {
        let f: Option<FunCallback<T>> = match (later.ident.as_str(), earlier.ident.as_str()) {
            ("*", "^2") => Some(fused::p2m),
            ("*", "^3") => Some(fused::p3m),
            ("*", "^4") => Some(fused::p4m),
            ("+", "^2") => Some(fused::p2a),
            ("+", "^3") => Some(fused::p3a),
            ("+", "^4") => Some(fused::p4a),
            _ => None,
        };
        if let Some(f) = f {
            return Some((format!("{}{}", earlier.ident, later.ident), f, 2));
        }
    }

    None
}

// ---------------------------------------------------------------------------
// tests
// ---------------------------------------------------------------------------
