//! Integration tests for expression compilation and evaluation.
//!
//! These cover:
//!   • precedence, associativity and parenthesized grouping
//!   • variable bindings, assignment chains and their side effects
//!   • the conditional operator, also nested and inside argument lists
//!   • variadic functions and user-defined operators
//!   • multi-result expressions and program reuse across evaluations

use mexpr::{Arity, Assoc, MathError, Parser, VarRef};

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn eval(expr: &str) -> f64 {
    let mut p = Parser::<f64>::new();
    p.set_expr(expr);
    p.eval().expect("evaluation should succeed")
}

/// Parser with a=1, b=2, c=3 bound; returns the handles for inspection.
fn parser_abc() -> (Parser<f64>, VarRef<f64>, VarRef<f64>, VarRef<f64>) {
    let mut p = Parser::<f64>::new();
    let a = VarRef::new(1.0);
    let b = VarRef::new(2.0);
    let c = VarRef::new(3.0);
    p.define_var("a", &a).unwrap();
    p.define_var("b", &b).unwrap();
    p.define_var("c", &c).unwrap();
    (p, a, b, c)
}

fn eval_abc(expr: &str) -> f64 {
    let (mut p, _a, _b, _c) = parser_abc();
    p.set_expr(expr);
    p.eval().expect("evaluation should succeed")
}

// ─── Precedence and associativity ────────────────────────────────────────────

#[test]
fn test_simple_binding() {
    assert_eq!(eval_abc("a+b*c"), 7.0);
    assert_eq!(eval_abc("(a+b)*c"), 9.0);
    assert_eq!(eval_abc("a*b+c"), 5.0);
}

#[test]
fn test_mixed_precedence_chain() {
    let expected = 1.0 - ((4.0 * 3.0) + (4.0 / 3.0)) - 3.0;
    assert!((eval("1 - ((4*3) + (4/3)) - 3") - expected).abs() < 1e-12);
}

#[test]
fn test_power_right_associative() {
    assert_eq!(eval("2^3^2"), 512.0);
    assert_eq!(eval("(2^3)^2"), 64.0);
}

#[test]
fn test_mul_left_associative() {
    // "8/4*2" must be (8/4)*2, not 8/(4*2).
    assert_eq!(eval("8/4*2"), 4.0);
    assert_eq!(eval("2*3*4"), 24.0);
}

#[test]
fn test_comparisons_and_logic() {
    assert_eq!(eval("1 < 2"), 1.0);
    assert_eq!(eval("2 <= 1"), 0.0);
    assert_eq!(eval("1 == 1 && 2 > 1"), 1.0);
    assert_eq!(eval("0 || 3 != 3"), 0.0);
}

// ─── Assignment ──────────────────────────────────────────────────────────────

#[test]
fn test_assignment_side_effects() {
    let (mut p, a, b, _c) = parser_abc();
    p.set_expr("a=10, b=20, c=a*b");
    assert_eq!(p.eval().unwrap(), 200.0);
    assert_eq!(a.get(), 10.0);
    assert_eq!(b.get(), 20.0);
}

#[test]
fn test_chained_assignment() {
    let (mut p, a, b, _c) = parser_abc();
    p.set_expr("a=b=5");
    assert_eq!(p.eval().unwrap(), 5.0);
    assert_eq!(a.get(), 5.0);
    assert_eq!(b.get(), 5.0);
}

#[test]
fn test_assignment_result_feeds_expression() {
    let (mut p, a, _b, _c) = parser_abc();
    p.set_expr("(a=7)+1");
    assert_eq!(p.eval().unwrap(), 8.0);
    assert_eq!(a.get(), 7.0);
}

// ─── Multi-result expressions ────────────────────────────────────────────────

#[test]
fn test_eval_multi() {
    let (mut p, _a, _b, _c) = parser_abc();
    p.set_expr("a+1, b*2, c");
    let results = p.eval_multi().unwrap().to_vec();
    assert_eq!(results, vec![2.0, 4.0, 3.0]);
    assert_eq!(p.result_count(), 3);
}

#[test]
fn test_eval_returns_last_result() {
    assert_eq!(eval("1, 2, 3+4"), 7.0);
}

// ─── Conditional operator ────────────────────────────────────────────────────

#[test]
fn test_simple_conditional() {
    assert_eq!(eval_abc("(a<b) ? 10 : 20"), 10.0);
    assert_eq!(eval_abc("(a>b) ? 10 : 20"), 20.0);
}

#[test]
fn test_conditional_branch_side_effects() {
    let (mut p, a, b, _c) = parser_abc();
    p.set_expr("(a<b) ? a=8 : b=9");
    assert_eq!(p.eval().unwrap(), 8.0);
    assert_eq!(a.get(), 8.0);
    assert_eq!(b.get(), 2.0);
}

#[test]
fn test_nested_conditional_in_argument_list() {
    assert_eq!(
        eval_abc("(a<b) ? sum(3, (a<b) ? 3 : 10, 10, 20)*10 : 99"),
        360.0
    );
}

#[test]
fn test_conditional_reevaluates_with_new_bindings() {
    let (mut p, a, _b, _c) = parser_abc();
    p.set_expr("a<b ? 1 : 0");
    assert_eq!(p.eval().unwrap(), 1.0);
    a.set(100.0);
    assert_eq!(p.eval().unwrap(), 0.0);
}

// ─── Functions ───────────────────────────────────────────────────────────────

#[test]
fn test_variadic_sum() {
    let (mut p, _a, _b, _c) = parser_abc();
    p.set_expr("sum(a,b,c)");
    assert_eq!(p.eval().unwrap(), 6.0);
}

#[test]
fn test_variadic_with_no_arguments_raises() {
    let mut p = Parser::<f64>::new();
    p.set_expr("sum()");
    let err = p.eval().unwrap_err();
    assert_eq!(err.code(), mexpr::ErrorCode::TooFewParams);
}

#[test]
fn test_nested_function_calls() {
    assert_eq!(eval("max(min(5, 3), 2, abs(-4))"), 4.0);
    assert_eq!(eval("sqrt(sqrt(16))"), 2.0);
}

#[test]
fn test_user_function() {
    fn hypot(v: &mut [f64], _argc: usize) -> Result<(), MathError> {
        v[0] = (v[0] * v[0] + v[1] * v[1]).sqrt();
        Ok(())
    }

    let mut p = Parser::<f64>::new();
    p.define_fun("hypot", hypot, Arity::Fixed(2)).unwrap();
    p.set_expr("hypot(3, 4)");
    assert_eq!(p.eval().unwrap(), 5.0);
}

#[test]
fn test_zero_arity_function() {
    fn two(v: &mut [f64], _argc: usize) -> Result<(), MathError> {
        v[0] = 2.0;
        Ok(())
    }

    let mut p = Parser::<f64>::new();
    p.define_fun("two", two, Arity::Fixed(0)).unwrap();
    p.set_expr("two()+1");
    assert_eq!(p.eval().unwrap(), 3.0);
}

// ─── User-defined operators ──────────────────────────────────────────────────

#[test]
fn test_longest_match_binary_operator() {
    // "++" computes a*10+b; if "a++b" were read as "a + +b" the result
    // would be 3 instead.
    fn shift_add(v: &mut [f64], _argc: usize) -> Result<(), MathError> {
        v[0] = v[0] * 10.0 + v[1];
        Ok(())
    }

    let (mut p, _a, _b, _c) = parser_abc();
    p.define_oprt("++", shift_add, 5, Assoc::Left).unwrap();
    p.set_expr("a++b");
    assert_eq!(p.eval().unwrap(), 12.0);
    p.set_expr("a ++ b");
    assert_eq!(p.eval().unwrap(), 12.0);
}

#[test]
fn test_binary_yields_to_prefix() {
    let (mut p, _a, _b, _c) = parser_abc();
    p.set_expr("3*-b");
    assert_eq!(p.eval().unwrap(), -6.0);
}

#[test]
fn test_postfix_operator() {
    fn milli(v: &mut [f64], _argc: usize) -> Result<(), MathError> {
        v[0] *= 1e-3;
        Ok(())
    }

    let mut p = Parser::<f64>::new();
    p.define_postfix_oprt("m", milli).unwrap();
    p.set_expr("3m+5");
    assert_eq!(p.eval().unwrap(), 3e-3 + 5.0);
}

#[test]
fn test_prefix_operator_priority() {
    // The default prefix minus sits below "^", so -2^2 = -(2^2).
    let mut p = Parser::<f64>::new();
    p.set_expr("-2^2");
    assert_eq!(p.eval().unwrap(), -4.0);

    // A prefix operator raised above "^" binds its operand first.
    fn neg(v: &mut [f64], _argc: usize) -> Result<(), MathError> {
        v[0] = -v[0];
        Ok(())
    }

    let mut p = Parser::<f64>::new();
    p.define_infix_oprt("~", neg, 8).unwrap();
    p.set_expr("~2^2");
    assert_eq!(p.eval().unwrap(), 4.0);
}

// ─── Literal recognizers ─────────────────────────────────────────────────────

#[test]
fn test_user_recognizer_beats_default() {
    // A hex recognizer registered by the user must run before the float
    // recognizer, or the "0" in "0xff" would be consumed on its own.
    fn hex(text: &str) -> Result<Option<(f64, usize)>, mexpr::ParseError> {
        if !text.starts_with("0x") {
            return Ok(None);
        }
        let n = text[2..].bytes().take_while(|b| b.is_ascii_hexdigit()).count();
        if n == 0 {
            return Ok(None);
        }
        match u64::from_str_radix(&text[2..2 + n], 16) {
            Ok(v) => Ok(Some((v as f64, 2 + n))),
            Err(_) => Ok(None),
        }
    }

    let mut p = Parser::<f64>::new();
    p.add_val_ident(hex);
    p.set_expr("0xff + 5");
    assert_eq!(p.eval().unwrap(), 260.0);
}

#[test]
fn test_integer_mode_literals() {
    let mut p = Parser::<i64>::new();
    p.set_expr("#1111 + 0xff");
    assert_eq!(p.eval().unwrap(), 270);

    p.set_expr("#1 + #10 + #100");
    assert_eq!(p.eval().unwrap(), 7);
}

#[test]
fn test_integer_mode_variables() {
    let mut p = Parser::<i64>::new();
    let n = VarRef::new(7i64);
    p.define_var("n", &n).unwrap();
    p.set_expr("n*n - 9");
    assert_eq!(p.eval().unwrap(), 40);
}

// ─── Program reuse ───────────────────────────────────────────────────────────

#[test]
fn test_rebinding_through_handle() {
    let (mut p, a, _b, _c) = parser_abc();
    p.set_expr("a^2 + a + 1");
    assert_eq!(p.eval().unwrap(), 3.0);
    a.set(3.0);
    assert_eq!(p.eval().unwrap(), 13.0);
    a.set(-1.0);
    assert_eq!(p.eval().unwrap(), 1.0);
}

#[test]
fn test_remove_variable_invalidates_program() {
    let (mut p, _a, _b, _c) = parser_abc();
    p.set_expr("sum(a,b,c)");
    assert_eq!(p.eval().unwrap(), 6.0);

    p.remove_var("c");
    let err = p.eval().unwrap_err();
    assert_eq!(err.code(), mexpr::ErrorCode::UnassignableToken);
    assert_eq!(err.token(), "c");
    assert_eq!(err.pos(), Some(8));
}

#[test]
fn test_set_expr_resets_state_after_error() {
    let mut p = Parser::<f64>::new();
    p.set_expr("1 +");
    assert!(p.eval().is_err());

    p.set_expr("1 + 2");
    assert_eq!(p.eval().unwrap(), 3.0);
}

// ─── Used variables ──────────────────────────────────────────────────────────

#[test]
fn test_used_vars_reports_exact_set() {
    let (mut p, _a, _b, _c) = parser_abc();
    p.set_expr("a + sin(b) + undefined1*undefined2");
    let used = p.used_vars().unwrap();

    let names: Vec<&str> = used.keys().map(|s| s.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "undefined1", "undefined2"]);
    assert!(used["a"].is_some());
    assert!(used["undefined1"].is_none());
}

#[test]
fn test_used_vars_propagates_other_errors() {
    let mut p = Parser::<f64>::new();
    p.set_expr("sin(");
    assert!(p.used_vars().is_err());
}

// ─── Optimizer-sensitive expressions ─────────────────────────────────────────

#[test]
fn test_fused_arithmetic_patterns() {
    let (mut p, _a, _b, _c) = parser_abc();
    for (expr, expected) in [
        ("a+b+c", 6.0),
        ("a*b*c", 6.0),
        ("a+b*c", 7.0),
        ("a*(b+c)", 5.0),
        ("c/a/b", 1.5),
        ("a/(b*c)", 1.0 / 6.0),
        ("a+b/c", 1.0 + 2.0 / 3.0),
        ("a/(b+c)", 0.2),
        ("a-b/c", 1.0 - 2.0 / 3.0),
        ("a/(b-c)", -1.0),
        ("b^2*c", 12.0),
        ("c+b^2", 7.0),
        ("b^3", 8.0),
        ("b^4", 16.0),
        ("b^5", 32.0),
    ] {
        p.set_expr(expr);
        let got = p.eval().unwrap();
        assert!(
            (got - expected).abs() < 1e-12,
            "{} evaluated to {} instead of {}",
            expr,
            got,
            expected
        );
    }
}

#[test]
fn test_constant_subexpressions_fold() {
    assert_eq!(eval("2*3+4*5"), 26.0);
    assert_eq!(eval("sum(1,2,3) + min(9,8)"), 14.0);
    assert_eq!(eval("sin(0)*100 + 1"), 1.0);
}
