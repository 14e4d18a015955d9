//! RPN evaluation: a generic interpreter plus a family of straight-line
//! evaluators for short programs.
//!
//! The working stack is 1-based (index 0 stays unused) so the final result
//! of an n-result program sits at index n. Programs whose shape fingerprint
//! stays below the ceiling run on a precompiled step sequence without the
//! dispatch loop; everything else (conditionals, assignments, long or
//! multi-result programs) takes the interpreter.

use crate::bytecode::{ByteCode, RpnOp};
use crate::errors::ParseResult;
use crate::value::Number;

pub(crate) type EngineFn<T> = fn(&ByteCode<T>, &mut [T]) -> ParseResult<T>;

// ---------------------------------------------------------------------------
// Generic interpreter
// ---------------------------------------------------------------------------

pub(crate) fn run_interpreter<T: Number>(bc: &ByteCode<T>, stack: &mut [T]) -> ParseResult<T> {
    let rpn = bc.rpn();
    let mut top = 0usize;
    let mut i = 0usize;

    loop {
        match &rpn[i].op {
            RpnOp::Val { first, second } => {
                top += 1;
                stack[top] = first.value();
                if let Some(s) = second {
                    top += 1;
                    stack[top] = s.value();
                }
            }

            RpnOp::Fun {
                first,
                second,
                third,
            } => {
                top = first.apply(stack, top)?;
                if let Some(c) = second {
                    top = c.apply(stack, top)?;
                }
                if let Some(c) = third {
                    top = c.apply(stack, top)?;
                }
            }

            RpnOp::Assign { var } => {
                debug_assert!(top >= 2);
                let v = stack[top];
                top -= 1;
                var.set(v);
                stack[top] = v;
            }

            RpnOp::If { offset } => {
                debug_assert!(top >= 1);
                let cond = stack[top];
                top -= 1;
                if !cond.is_true() {
                    i += offset;
                }
            }

            RpnOp::Else { offset } => {
                i += offset;
            }

            RpnOp::EndIf => {}

            RpnOp::End => break,
        }
        i += 1;
    }

    Ok(stack[bc.result_slots()])
}

// ---------------------------------------------------------------------------
// Straight-line engines
// ---------------------------------------------------------------------------

macro_rules! engine_step {
    ($stack:ident, $vals:ident, $calls:ident, $top:ident, $v:ident, $c:ident, $get:ident, V) => {{
        $top += 1;
        $stack[$top] = $vals[$v].$get();
        $v += 1;
    }};
    ($stack:ident, $vals:ident, $calls:ident, $top:ident, $v:ident, $c:ident, $get:ident, F) => {{
        $top = $calls[$c].apply($stack, $top)?;
        $c += 1;
    }};
}

/// Each shape gets a plain variant and a no-multiplier variant that skips
/// the `* mul` in every value step.
macro_rules! engine {
    ($plain:ident, $nomul:ident, $($step:tt),+) => {
        fn $plain<T: Number>(bc: &ByteCode<T>, stack: &mut [T]) -> ParseResult<T> {
            let vals = bc.flat_vals();
            let calls = bc.flat_calls();
            let mut top = 0usize;
            let mut v = 0usize;
            let mut c = 0usize;
            $( engine_step!(stack, vals, calls, top, v, c, value, $step); )+
            let _ = (top, v, c);
            Ok(stack[1])
        }

        fn $nomul<T: Number>(bc: &ByteCode<T>, stack: &mut [T]) -> ParseResult<T> {
            let vals = bc.flat_vals();
            let calls = bc.flat_calls();
            let mut top = 0usize;
            let mut v = 0usize;
            let mut c = 0usize;
            $( engine_step!(stack, vals, calls, top, v, c, value_no_mul, $step); )+
            let _ = (top, v, c);
            Ok(stack[1])
        }
    };
}

engine!(eng_v, eng_v_nm, V);
engine!(eng_vf, eng_vf_nm, V, F);
engine!(eng_vff, eng_vff_nm, V, F, F);
engine!(eng_vvf, eng_vvf_nm, V, V, F);
engine!(eng_vfff, eng_vfff_nm, V, F, F, F);
engine!(eng_vfvf, eng_vfvf_nm, V, F, V, F);
engine!(eng_vvff, eng_vvff_nm, V, V, F, F);
engine!(eng_vvvf, eng_vvvf_nm, V, V, V, F);
engine!(eng_vffff, eng_vffff_nm, V, F, F, F, F);
engine!(eng_vffvf, eng_vffvf_nm, V, F, F, V, F);
engine!(eng_vfvff, eng_vfvff_nm, V, F, V, F, F);
engine!(eng_vfvvf, eng_vfvvf_nm, V, F, V, V, F);
engine!(eng_vvfff, eng_vvfff_nm, V, V, F, F, F);
engine!(eng_vvfvf, eng_vvfvf_nm, V, V, F, V, F);
engine!(eng_vvvff, eng_vvvff_nm, V, V, V, F, F);
engine!(eng_vvvvf, eng_vvvvf_nm, V, V, V, V, F);

/// Engine table keyed by shape fingerprint. A miss means the program runs
/// on the generic interpreter.
pub(crate) fn select_engine<T: Number>(code: u32, no_mul: bool) -> Option<EngineFn<T>> {
    let pair: (EngineFn<T>, EngineFn<T>) = match code {
        1 => (eng_v, eng_v_nm),
        2 => (eng_vf, eng_vf_nm),
        4 => (eng_vff, eng_vff_nm),
        6 => (eng_vvf, eng_vvf_nm),
        8 => (eng_vfff, eng_vfff_nm),
        10 => (eng_vfvf, eng_vfvf_nm),
        12 => (eng_vvff, eng_vvff_nm),
        14 => (eng_vvvf, eng_vvvf_nm),
        16 => (eng_vffff, eng_vffff_nm),
        18 => (eng_vffvf, eng_vffvf_nm),
        20 => (eng_vfvff, eng_vfvff_nm),
        22 => (eng_vfvvf, eng_vfvvf_nm),
        24 => (eng_vvfff, eng_vvfff_nm),
        26 => (eng_vvfvf, eng_vvfvf_nm),
        28 => (eng_vvvff, eng_vvvff_nm),
        30 => (eng_vvvvf, eng_vvvvf_nm),
        _ => return None,
    };
    Some(if no_mul { pair.1 } else { pair.0 })
}

// ---------------------------------------------------------------------------
// tests
// ---------------------------------------------------------------------------
