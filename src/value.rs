//! Numeric value abstraction and variable handles.
//!
//! The engine is generic over the scalar it computes with. `f64` is the
//! standard instantiation, `i64` the integer specialization; both live here
//! so the rest of the crate never has to care which one it is running on.

use std::cell::Cell;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use std::rc::Rc;

use crate::errors::MathError;
use crate::funcs;
use crate::token::FunCallback;

// ---------------------------------------------------------------------------
// Number
// ---------------------------------------------------------------------------

/// Scalar type a parser instance computes with.
///
/// The core only needs the handful of operations used by literal folding and
/// the fused value slots; everything else (trigonometry, comparisons, ...)
/// lives in per-type callback libraries in [`crate::funcs`].
pub trait Number:
    Copy
    + PartialEq
    + PartialOrd
    + fmt::Debug
    + fmt::Display
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
    + 'static
{
    /// Selects the integer literal recognizers and function library.
    const IS_INTEGER: bool;
    const ZERO: Self;
    const ONE: Self;

    /// Division that surfaces integer division by zero instead of panicking.
    fn checked_div(self, rhs: Self) -> Result<Self, MathError>;

    /// The exact integer value, if this scalar holds one. Used by the
    /// power-to-fast-function substitution.
    fn as_int(self) -> Option<i64>;

    /// The canonical addition callback of this type's function library. The
    /// optimizer rewrites subtractions into additions of negated values and
    /// needs a callback to attach to the rewritten operator.
    fn add_callback() -> FunCallback<Self>;

    fn is_true(self) -> bool {
        self != Self::ZERO
    }
}

impl Number for f64 {
    const IS_INTEGER: bool = false;
    const ZERO: f64 = 0.0;
    const ONE: f64 = 1.0;

    fn checked_div(self, rhs: f64) -> Result<f64, MathError> {
        // IEEE semantics: division by zero yields an infinity.
        Ok(self / rhs)
    }

    fn as_int(self) -> Option<i64> {
        if self.is_finite() && self.fract() == 0.0 && self >= i64::MIN as f64 && self <= i64::MAX as f64 {
            Some(self as i64)
        } else {
            None
        }
    }

    fn add_callback() -> FunCallback<f64> {
        funcs::flt::add
    }
}

impl Number for i64 {
    const IS_INTEGER: bool = true;
    const ZERO: i64 = 0;
    const ONE: i64 = 1;

    fn checked_div(self, rhs: i64) -> Result<i64, MathError> {
        if rhs == 0 {
            Err(MathError::DivByZero)
        } else {
            Ok(self.wrapping_div(rhs))
        }
    }

    fn as_int(self) -> Option<i64> {
        Some(self)
    }

    fn add_callback() -> FunCallback<i64> {
        funcs::int::add
    }
}

// ---------------------------------------------------------------------------
// VarRef
// ---------------------------------------------------------------------------

/// Handle to a caller-owned variable cell.
///
/// The compiled program keeps clones of the handles it references, so the
/// storage stays alive for as long as any program can read it. Mutating a
/// variable through one handle while another aliases it is well defined;
/// handles are not `Send`, so cross-thread mutation is ruled out by
/// construction.
pub struct VarRef<T>(Rc<Cell<T>>);

impl<T: Number> VarRef<T> {
    pub fn new(value: T) -> Self {
        VarRef(Rc::new(Cell::new(value)))
    }

    #[inline]
    pub fn get(&self) -> T {
        self.0.get()
    }

    #[inline]
    pub fn set(&self, value: T) {
        self.0.set(value)
    }

    /// Identity comparison; two handles are equal when they alias the same
    /// cell, regardless of the stored value.
    #[inline]
    pub fn same_cell(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl<T> Clone for VarRef<T> {
    fn clone(&self) -> Self {
        VarRef(Rc::clone(&self.0))
    }
}

impl<T: Number> fmt::Debug for VarRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarRef({:p} = {})", Rc::as_ptr(&self.0), self.0.get())
    }
}
