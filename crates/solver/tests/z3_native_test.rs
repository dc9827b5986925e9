//! Integration tests against the system Z3 library.
//!
//! These exercise the same lifecycle guarantees as the reference-engine
//! tests, but through the real entry points, so they only build with the
//! `z3-native` feature (and libz3 available at link time).

#![cfg(feature = "z3-native")]

use smtguard::{CheckResult, Context, ContextConfig, ObjectKind, SolverError};

fn z3() -> Context {
    Context::z3(ContextConfig::new().with_timeout(10_000)).expect("Z3 context")
}

#[test]
fn conflicting_equalities_are_unsat() {
    let ctx = z3();
    let x = ctx.int_const("x").unwrap();
    let solver = ctx.solver().unwrap();
    solver.assert(&ctx.eq(&x, &ctx.int(5).unwrap()).unwrap()).unwrap();
    solver.assert(&ctx.eq(&x, &ctx.int(10).unwrap()).unwrap()).unwrap();
    assert_eq!(solver.check().unwrap(), CheckResult::Unsatisfiable);
}

#[test]
fn quantified_identity() {
    let ctx = z3();
    let x = ctx.int_const("x").unwrap();
    let sum = ctx.add(&[&x, &ctx.int(0).unwrap()]).unwrap();

    let holds = ctx.solver().unwrap();
    holds
        .assert(&ctx.forall(&[&x], &ctx.eq(&sum, &x).unwrap()).unwrap())
        .unwrap();
    assert_eq!(holds.check().unwrap(), CheckResult::Satisfiable);

    let refuted = ctx.solver().unwrap();
    let differs = ctx.not(&ctx.eq(&x, &sum).unwrap()).unwrap();
    refuted.assert(&ctx.forall(&[&x], &differs).unwrap()).unwrap();
    assert_eq!(refuted.check().unwrap(), CheckResult::Unsatisfiable);
}

#[test]
fn push_pop_and_model_values() {
    let ctx = z3();
    let x = ctx.int_const("x").unwrap();
    let solver = ctx.solver().unwrap();
    let before = solver.check().unwrap();

    solver.push().unwrap();
    solver.assert(&ctx.eq(&x, &ctx.int(5).unwrap()).unwrap()).unwrap();
    assert!(solver.check().unwrap().is_sat());
    let model = solver.model().unwrap();
    assert_eq!(model.int_value(&x).unwrap(), 5);
    solver.assert(&ctx.eq(&x, &ctx.int(10).unwrap()).unwrap()).unwrap();
    assert!(!model.is_valid());
    assert!(solver.check().unwrap().is_unsat());

    solver.pop(1).unwrap();
    assert_eq!(solver.check().unwrap(), before);
}

#[test]
fn integer_solution_away_from_small_values() {
    let ctx = z3();
    let x = ctx.int_const("x").unwrap();
    let solver = ctx.solver().unwrap();
    solver.assert(&ctx.lt(&ctx.int(10).unwrap(), &x).unwrap()).unwrap();
    let double = ctx.add(&[&x, &x]).unwrap();
    solver.assert(&ctx.eq(&double, &ctx.int(30).unwrap()).unwrap()).unwrap();
    assert!(solver.check().unwrap().is_sat());
    assert_eq!(solver.model().unwrap().int_value(&x).unwrap(), 15);
}

#[test]
fn optimizer_finds_maximum() {
    let ctx = z3();
    let x = ctx.int_const("x").unwrap();
    let opt = ctx.optimizer().unwrap();
    opt.assert(&ctx.le(&x, &ctx.int(42).unwrap()).unwrap()).unwrap();
    let goal = opt.maximize(&x).unwrap();
    assert!(opt.check().unwrap().is_sat());
    assert_eq!(opt.upper(goal).unwrap().to_string(), "42");

    let doubled = ctx.optimizer().unwrap();
    let double = ctx.add(&[&x, &x]).unwrap();
    doubled.assert(&ctx.le(&double, &ctx.int(30).unwrap()).unwrap()).unwrap();
    let goal = doubled.maximize(&x).unwrap();
    assert!(doubled.check().unwrap().is_sat());
    assert_eq!(doubled.upper(goal).unwrap().to_string(), "15");
}

#[test]
fn sort_error_is_reported_not_fatal() {
    let ctx = z3();
    let x = ctx.int_const("x").unwrap();
    let b = ctx.bool_const("b").unwrap();
    let err = ctx.eq(&x, &b).unwrap_err();
    assert!(err.native_code().is_some(), "{err}");
    assert!(ctx.int(1).is_ok());
}

#[test]
fn dispose_cascades() {
    let ctx = z3();
    let solver = ctx.solver().unwrap();
    solver.assert(&ctx.bool_val(true).unwrap()).unwrap();
    solver.check().unwrap();
    let model = solver.model().unwrap();
    ctx.dispose();
    ctx.dispose();
    assert!(!model.is_valid());
    assert_eq!(
        solver.check(),
        Err(SolverError::UseAfterDispose(ObjectKind::Solver))
    );
}
