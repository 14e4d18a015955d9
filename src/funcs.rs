//! Default numeric function libraries.
//!
//! Callbacks operate on their argument window in place: the result replaces
//! `v[0]`, the evaluator drops the remaining slots. Variadic callbacks read
//! the actual argument count from `argc`; for everything else the window
//! length is the arity.

use crate::errors::MathError;

type MathResult = Result<(), MathError>;

// ---------------------------------------------------------------------------
// Floating point library
// ---------------------------------------------------------------------------

pub mod flt {
    use super::MathResult;
    use crate::errors::MathError;

    pub const PI: f64 = std::f64::consts::PI;
    pub const E: f64 = std::f64::consts::E;

    // binary operators
    pub fn add(v: &mut [f64], _argc: usize) -> MathResult { v[0] += v[1]; Ok(()) }
    pub fn sub(v: &mut [f64], _argc: usize) -> MathResult { v[0] -= v[1]; Ok(()) }
    pub fn mul(v: &mut [f64], _argc: usize) -> MathResult { v[0] *= v[1]; Ok(()) }
    pub fn div(v: &mut [f64], _argc: usize) -> MathResult { v[0] /= v[1]; Ok(()) }

    pub fn pow(v: &mut [f64], _argc: usize) -> MathResult {
        let e = v[1];
        // Integral exponents take the exact path.
        if e.fract() == 0.0 && e.abs() <= i32::MAX as f64 {
            v[0] = v[0].powi(e as i32);
        } else {
            v[0] = v[0].powf(e);
        }
        Ok(())
    }

    pub fn and(v: &mut [f64], _argc: usize) -> MathResult { v[0] = ((v[0] != 0.0) && (v[1] != 0.0)) as u8 as f64; Ok(()) }
    pub fn or(v: &mut [f64], _argc: usize) -> MathResult { v[0] = ((v[0] != 0.0) || (v[1] != 0.0)) as u8 as f64; Ok(()) }
    pub fn less(v: &mut [f64], _argc: usize) -> MathResult { v[0] = (v[0] < v[1]) as u8 as f64; Ok(()) }
    pub fn greater(v: &mut [f64], _argc: usize) -> MathResult { v[0] = (v[0] > v[1]) as u8 as f64; Ok(()) }
    pub fn less_eq(v: &mut [f64], _argc: usize) -> MathResult { v[0] = (v[0] <= v[1]) as u8 as f64; Ok(()) }
    pub fn greater_eq(v: &mut [f64], _argc: usize) -> MathResult { v[0] = (v[0] >= v[1]) as u8 as f64; Ok(()) }
    pub fn equal(v: &mut [f64], _argc: usize) -> MathResult { v[0] = (v[0] == v[1]) as u8 as f64; Ok(()) }
    pub fn not_equal(v: &mut [f64], _argc: usize) -> MathResult { v[0] = (v[0] != v[1]) as u8 as f64; Ok(()) }

    // sign operators
    pub fn unary_minus(v: &mut [f64], _argc: usize) -> MathResult { v[0] = -v[0]; Ok(()) }
    pub fn unary_plus(_v: &mut [f64], _argc: usize) -> MathResult { Ok(()) }

    // trigonometry
    pub fn sin(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].sin(); Ok(()) }
    pub fn cos(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].cos(); Ok(()) }
    pub fn tan(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].tan(); Ok(()) }
    pub fn asin(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].asin(); Ok(()) }
    pub fn acos(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].acos(); Ok(()) }
    pub fn atan(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].atan(); Ok(()) }
    pub fn atan2(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].atan2(v[1]); Ok(()) }
    pub fn sinh(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].sinh(); Ok(()) }
    pub fn cosh(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].cosh(); Ok(()) }
    pub fn tanh(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].tanh(); Ok(()) }
    pub fn asinh(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].asinh(); Ok(()) }
    pub fn acosh(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].acosh(); Ok(()) }
    pub fn atanh(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].atanh(); Ok(()) }

    // logarithms and friends
    pub fn log(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].ln(); Ok(()) }
    pub fn log2(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].log2(); Ok(()) }
    pub fn log10(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].log10(); Ok(()) }
    pub fn exp(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].exp(); Ok(()) }
    pub fn sqrt(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].sqrt(); Ok(()) }

    pub fn abs(v: &mut [f64], _argc: usize) -> MathResult { v[0] = v[0].abs(); Ok(()) }
    pub fn sign(v: &mut [f64], _argc: usize) -> MathResult {
        v[0] = if v[0] < 0.0 { -1.0 } else if v[0] > 0.0 { 1.0 } else { 0.0 };
        Ok(())
    }
    pub fn rint(v: &mut [f64], _argc: usize) -> MathResult { v[0] = (v[0] + 0.5).floor(); Ok(()) }

    // variadics
    pub fn sum(v: &mut [f64], argc: usize) -> MathResult {
        if argc == 0 {
            return Err(MathError::TooFewArgs("sum"));
        }
        v[0] = v[..argc].iter().sum();
        Ok(())
    }

    pub fn avg(v: &mut [f64], argc: usize) -> MathResult {
        if argc == 0 {
            return Err(MathError::TooFewArgs("avg"));
        }
        v[0] = v[..argc].iter().sum::<f64>() / argc as f64;
        Ok(())
    }

    pub fn min(v: &mut [f64], argc: usize) -> MathResult {
        if argc == 0 {
            return Err(MathError::TooFewArgs("min"));
        }
        v[0] = v[..argc].iter().copied().fold(f64::INFINITY, f64::min);
        Ok(())
    }

    pub fn max(v: &mut [f64], argc: usize) -> MathResult {
        if argc == 0 {
            return Err(MathError::TooFewArgs("max"));
        }
        v[0] = v[..argc].iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Integer library
// ---------------------------------------------------------------------------

pub mod int {
    use super::MathResult;
    use crate::errors::MathError;

    pub fn add(v: &mut [i64], _argc: usize) -> MathResult { v[0] = v[0].wrapping_add(v[1]); Ok(()) }
    pub fn sub(v: &mut [i64], _argc: usize) -> MathResult { v[0] = v[0].wrapping_sub(v[1]); Ok(()) }
    pub fn mul(v: &mut [i64], _argc: usize) -> MathResult { v[0] = v[0].wrapping_mul(v[1]); Ok(()) }

    pub fn and(v: &mut [i64], _argc: usize) -> MathResult { v[0] = ((v[0] != 0) && (v[1] != 0)) as i64; Ok(()) }
    pub fn or(v: &mut [i64], _argc: usize) -> MathResult { v[0] = ((v[0] != 0) || (v[1] != 0)) as i64; Ok(()) }
    pub fn less(v: &mut [i64], _argc: usize) -> MathResult { v[0] = (v[0] < v[1]) as i64; Ok(()) }
    pub fn greater(v: &mut [i64], _argc: usize) -> MathResult { v[0] = (v[0] > v[1]) as i64; Ok(()) }
    pub fn less_eq(v: &mut [i64], _argc: usize) -> MathResult { v[0] = (v[0] <= v[1]) as i64; Ok(()) }
    pub fn greater_eq(v: &mut [i64], _argc: usize) -> MathResult { v[0] = (v[0] >= v[1]) as i64; Ok(()) }
    pub fn equal(v: &mut [i64], _argc: usize) -> MathResult { v[0] = (v[0] == v[1]) as i64; Ok(()) }
    pub fn not_equal(v: &mut [i64], _argc: usize) -> MathResult { v[0] = (v[0] != v[1]) as i64; Ok(()) }

    pub fn unary_minus(v: &mut [i64], _argc: usize) -> MathResult { v[0] = v[0].wrapping_neg(); Ok(()) }
    pub fn unary_plus(_v: &mut [i64], _argc: usize) -> MathResult { Ok(()) }

    pub fn abs(v: &mut [i64], _argc: usize) -> MathResult { v[0] = v[0].wrapping_abs(); Ok(()) }

    pub fn sum(v: &mut [i64], argc: usize) -> MathResult {
        if argc == 0 {
            return Err(MathError::TooFewArgs("sum"));
        }
        v[0] = v[..argc].iter().fold(0i64, |acc, x| acc.wrapping_add(*x));
        Ok(())
    }

    pub fn min(v: &mut [i64], argc: usize) -> MathResult {
        if argc == 0 {
            return Err(MathError::TooFewArgs("min"));
        }
        v[0] = v[..argc].iter().copied().fold(i64::MAX, i64::min);
        Ok(())
    }

    pub fn max(v: &mut [i64], argc: usize) -> MathResult {
        if argc == 0 {
            return Err(MathError::TooFewArgs("max"));
        }
        v[0] = v[..argc].iter().copied().fold(i64::MIN, i64::max);
        Ok(())
    }
}
