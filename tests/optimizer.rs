//! Property tests for the bytecode optimizer.
//!
//! Random expression trees are rendered to text and evaluated three ways:
//! directly over the tree, through the parser with the optimizer enabled,
//! and through the parser with the optimizer disabled. All three must
//! agree. Operands stay integral so f64 arithmetic is exact and the
//! comparison can be strict equality.

use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;

use mexpr::{Parser, VarRef};

const VAR_NAMES: [&str; 3] = ["a", "b", "c"];
const VAR_VALUES: [f64; 3] = [2.0, 3.0, 5.0];

// ─── Random expression trees ─────────────────────────────────────────────────

#[derive(Clone, Debug)]
enum Node {
    Lit(i8),
    Var(usize),
    Add(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    Neg(Box<Node>),
    Pow(Box<Node>, u8),
}

impl Node {
    fn render(&self) -> String {
        match self {
            Node::Lit(n) => {
                if *n < 0 {
                    format!("({})", n)
                } else {
                    n.to_string()
                }
            }
            Node::Var(i) => VAR_NAMES[*i].to_string(),
            Node::Add(l, r) => format!("({}+{})", l.render(), r.render()),
            Node::Sub(l, r) => format!("({}-{})", l.render(), r.render()),
            Node::Mul(l, r) => format!("({}*{})", l.render(), r.render()),
            Node::Neg(e) => format!("(-{})", e.render()),
            Node::Pow(e, k) => format!("({}^{})", e.render(), k),
        }
    }

    fn eval_direct(&self) -> f64 {
        match self {
            Node::Lit(n) => *n as f64,
            Node::Var(i) => VAR_VALUES[*i],
            Node::Add(l, r) => l.eval_direct() + r.eval_direct(),
            Node::Sub(l, r) => l.eval_direct() - r.eval_direct(),
            Node::Mul(l, r) => l.eval_direct() * r.eval_direct(),
            Node::Neg(e) => -e.eval_direct(),
            Node::Pow(e, k) => e.eval_direct().powi(*k as i32),
        }
    }
}

fn arbitrary_node(g: &mut Gen, depth: usize) -> Node {
    let leaf = depth == 0;
    let choice = if leaf {
        *g.choose(&[0u8, 1]).unwrap()
    } else {
        *g.choose(&[0u8, 1, 2, 3, 4, 5, 6]).unwrap()
    };

    match choice {
        0 => Node::Lit(i8::arbitrary(g) % 10),
        1 => Node::Var(usize::arbitrary(g) % VAR_NAMES.len()),
        2 => Node::Add(
            Box::new(arbitrary_node(g, depth - 1)),
            Box::new(arbitrary_node(g, depth - 1)),
        ),
        3 => Node::Sub(
            Box::new(arbitrary_node(g, depth - 1)),
            Box::new(arbitrary_node(g, depth - 1)),
        ),
        4 => Node::Mul(
            Box::new(arbitrary_node(g, depth - 1)),
            Box::new(arbitrary_node(g, depth - 1)),
        ),
        5 => Node::Neg(Box::new(arbitrary_node(g, depth - 1))),
        // Exponent fixed at 2: squaring grows values no faster than the
        // multiplication arm, keeping every intermediate result an exactly
        // representable integer.
        _ => Node::Pow(Box::new(arbitrary_node(g, depth - 1)), 2),
    }
}

impl Arbitrary for Node {
    fn arbitrary(g: &mut Gen) -> Self {
        arbitrary_node(g, 4)
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn parser_with_bindings(optimize: bool) -> Parser<f64> {
    let mut p = Parser::<f64>::new();
    p.enable_optimizer(optimize);
    for (name, value) in VAR_NAMES.iter().zip(VAR_VALUES) {
        p.define_var(name, &VarRef::new(value)).unwrap();
    }
    p
}

fn eval_with(optimize: bool, expr: &str) -> f64 {
    let mut p = parser_with_bindings(optimize);
    p.set_expr(expr);
    p.eval().expect("generated expression should compile")
}

// ─── Properties ──────────────────────────────────────────────────────────────

#[quickcheck]
fn prop_optimizer_is_sound(node: Node) -> bool {
    let expr = node.render();
    let expected = node.eval_direct();
    let optimized = eval_with(true, &expr);
    let unoptimized = eval_with(false, &expr);
    optimized == unoptimized && optimized == expected
}

#[quickcheck]
fn prop_compilation_is_idempotent(node: Node) -> bool {
    let expr = node.render();
    let mut p = parser_with_bindings(true);

    p.set_expr(&expr);
    let first = p.rpn_dump().expect("compile");
    p.set_expr(&expr);
    let second = p.rpn_dump().expect("compile");

    first == second
}

#[quickcheck]
fn prop_repeated_eval_is_stable(node: Node) -> bool {
    let expr = node.render();
    let mut p = parser_with_bindings(true);
    p.set_expr(&expr);

    let first = p.eval().expect("eval");
    (0..3).all(|_| p.eval().expect("eval") == first)
}

// ─── Fixed regressions ───────────────────────────────────────────────────────

#[test]
fn test_optimizer_on_off_agree_on_known_inputs() {
    for expr in [
        "1 - ((4*3) + (4/3)) - 3",
        "a + b*c",
        "2*a^2 + 3*a + 4",
        "a/(b*c) + c/(a+b)",
        "-a - -b",
        "(a+1)*(a-1)",
        "sum(a, b, c, 2*3)",
        "min(a^2, b^2, 10)",
    ] {
        let on = eval_with(true, expr);
        let off = eval_with(false, expr);
        assert_eq!(on, off, "optimizer changed the value of {}", expr);
    }
}

#[test]
fn test_optimizer_does_not_change_assignment_semantics() {
    for optimize in [true, false] {
        let mut p = Parser::<f64>::new();
        p.enable_optimizer(optimize);
        let x = VarRef::new(0.0);
        p.define_var("x", &x).unwrap();
        p.set_expr("x = 2 + 3*4");
        assert_eq!(p.eval().unwrap(), 14.0);
        assert_eq!(x.get(), 14.0);
    }
}

#[test]
fn test_optimizer_keeps_conditional_laziness() {
    // The untaken branch must not execute, optimizer or not: its
    // assignment would be visible.
    for optimize in [true, false] {
        let mut p = Parser::<f64>::new();
        p.enable_optimizer(optimize);
        let x = VarRef::new(1.0);
        p.define_var("x", &x).unwrap();
        p.set_expr("1 < 2 ? 42 : x = 99");
        assert_eq!(p.eval().unwrap(), 42.0);
        assert_eq!(x.get(), 1.0, "else branch executed (optimize={})", optimize);
    }
}
