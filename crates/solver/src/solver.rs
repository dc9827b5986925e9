//! Incremental solver handle.

use std::fmt;

use smtguard_native::RawSolver;

use crate::context::ChildRef;
use crate::error::SolverError;
use crate::model::Model;
use crate::result::CheckResult;
use crate::terms::Ast;

/// An incremental satisfiability solver owned by a [`Context`](crate::Context).
///
/// Asserting, pushing, popping or resetting invalidates the model of the
/// previous check. Dropping the solver releases it; so does disposing the
/// owning context, after which every operation reports `UseAfterDispose`.
pub struct Solver {
    child: ChildRef,
    raw: RawSolver,
}

impl Solver {
    pub(crate) fn new(child: ChildRef, raw: RawSolver) -> Self {
        Self { child, raw }
    }

    pub fn raw(&self) -> RawSolver {
        self.raw
    }

    pub fn assert(&self, constraint: &Ast) -> Result<(), SolverError> {
        let c = self.child.arg(constraint)?;
        let raw = self.raw;
        // SAFETY: solver and constraint belong to the live engine.
        self.child
            .mutate(|api, engine| unsafe { api.solver_assert(engine, raw, c) })
    }

    pub fn check(&self) -> Result<CheckResult, SolverError> {
        let raw = self.raw;
        // SAFETY: the solver belongs to the live engine.
        self.child
            .check(|api, engine| unsafe { api.solver_check(engine, raw) })
    }

    /// Model of the last check, which must have been satisfiable.
    ///
    /// Repeated calls without an intervening change return the same model.
    pub fn model(&self) -> Result<Model, SolverError> {
        let raw = self.raw;
        // SAFETY: the solver belongs to the live engine.
        self.child
            .model(|api, engine| unsafe { api.solver_get_model(engine, raw) })
    }

    pub fn push(&self) -> Result<(), SolverError> {
        let raw = self.raw;
        // SAFETY: the solver belongs to the live engine.
        self.child
            .mutate(|api, engine| unsafe { api.solver_push(engine, raw) })
    }

    /// Pop `n` scopes. Popping more than were pushed is a native error.
    pub fn pop(&self, n: u32) -> Result<(), SolverError> {
        let raw = self.raw;
        // SAFETY: the solver belongs to the live engine.
        self.child
            .mutate(|api, engine| unsafe { api.solver_pop(engine, raw, n) })
    }

    /// Drop every assertion and scope, and forget the last check.
    pub fn reset(&self) -> Result<(), SolverError> {
        let raw = self.raw;
        // SAFETY: the solver belongs to the live engine.
        self.child
            .reset(|api, engine| unsafe { api.solver_reset(engine, raw) })
    }

    pub fn num_scopes(&self) -> Result<u32, SolverError> {
        let raw = self.raw;
        // SAFETY: the solver belongs to the live engine.
        self.child
            .query(|api, engine| unsafe { api.solver_num_scopes(engine, raw) })
    }

    /// Engine explanation for an `Unknown` answer.
    pub fn reason_unknown(&self) -> Result<String, SolverError> {
        let raw = self.raw;
        // SAFETY: the solver belongs to the live engine.
        self.child
            .query(|api, engine| unsafe { api.solver_reason_unknown(engine, raw) })
    }

    /// Per-check timeout in milliseconds.
    ///
    /// Goes through a temporary parameter set, which is released whether or
    /// not the engine accepts it.
    pub fn set_timeout(&self, timeout_ms: u32) -> Result<(), SolverError> {
        let raw = self.raw;
        // SAFETY: every handle below belongs to the live engine, and the
        // parameter set is held between its increment and decrement.
        let params = self
            .child
            .query(|api, engine| unsafe { api.mk_params(engine) })?
            .non_null()
            .ok_or_else(|| SolverError::ConstructionFailure("parameter set".to_string()))?;
        self.child
            .query(|api, engine| unsafe { api.params_inc_ref(engine, params) })?;
        let applied = self
            .child
            .query(|api, engine| unsafe { api.params_set_uint(engine, params, c"timeout", timeout_ms) })
            .and_then(|()| {
                self.child
                    .query(|api, engine| unsafe { api.solver_set_params(engine, raw, params) })
            });
        let released = self
            .child
            .query(|api, engine| unsafe { api.params_dec_ref(engine, params) });
        applied.and(released)
    }

    pub fn last_check(&self) -> Option<CheckResult> {
        self.child.last_check()
    }

    /// Release the solver now. Idempotent.
    pub fn dispose(&self) {
        self.child.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.child.is_disposed()
    }
}

impl Drop for Solver {
    fn drop(&mut self) {
        self.child.dispose();
    }
}

impl fmt::Display for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.raw;
        // SAFETY: the solver belongs to the live engine.
        match self
            .child
            .query(|api, engine| unsafe { api.solver_to_string(engine, raw) })
        {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<disposed solver>"),
        }
    }
}

impl fmt::Debug for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Solver")
            .field("id", &self.child.id())
            .field("raw", &self.raw)
            .field("disposed", &self.is_disposed())
            .field("last_check", &self.last_check())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use smtguard_native::reference::{Fault, ReferenceEngine};

    use super::*;
    use crate::context::Context;
    use crate::error::ObjectKind;

    fn setup() -> (Arc<ReferenceEngine>, Context) {
        let engine = Arc::new(ReferenceEngine::new());
        let ctx = Context::with_defaults(engine.clone()).unwrap();
        (engine, ctx)
    }

    #[test]
    fn sat_then_model() {
        let (_engine, ctx) = setup();
        let solver = ctx.solver().unwrap();
        let x = ctx.int_const("x").unwrap();
        solver.assert(&ctx.eq(&x, &ctx.int(5).unwrap()).unwrap()).unwrap();
        assert_eq!(solver.check().unwrap(), CheckResult::Satisfiable);
        assert_eq!(solver.last_check(), Some(CheckResult::Satisfiable));
        let model = solver.model().unwrap();
        assert_eq!(model.int_value(&x).unwrap(), 5);
    }

    #[test]
    fn model_before_check_is_sequence_error() {
        let (_engine, ctx) = setup();
        let solver = ctx.solver().unwrap();
        assert_eq!(
            solver.model().unwrap_err(),
            SolverError::StateSequence("must check before getting a model".to_string())
        );
    }

    #[test]
    fn model_after_unsat_is_sequence_error() {
        let (_engine, ctx) = setup();
        let solver = ctx.solver().unwrap();
        solver.assert(&ctx.bool_val(false).unwrap()).unwrap();
        assert_eq!(solver.check().unwrap(), CheckResult::Unsatisfiable);
        assert_eq!(
            solver.model().unwrap_err(),
            SolverError::StateSequence("cannot get model when status is UNSATISFIABLE".to_string())
        );
    }

    #[test]
    fn repeated_model_calls_share_one_model() {
        let (_engine, ctx) = setup();
        let solver = ctx.solver().unwrap();
        solver.assert(&ctx.bool_const("p").unwrap()).unwrap();
        solver.check().unwrap();
        let first = solver.model().unwrap();
        let second = solver.model().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn mutation_invalidates_model() {
        let (_engine, ctx) = setup();
        let solver = ctx.solver().unwrap();
        let p = ctx.bool_const("p").unwrap();
        solver.assert(&p).unwrap();
        solver.check().unwrap();
        let model = solver.model().unwrap();
        solver.push().unwrap();
        assert!(!model.is_valid());
        assert_eq!(
            model.eval(&p),
            Err(SolverError::UseAfterDispose(ObjectKind::Model))
        );

        // The last check still stands, so a fresh model can be fetched.
        let fresh = solver.model().unwrap();
        assert!(fresh.is_valid());
        assert_ne!(fresh, model);
    }

    #[test]
    fn pop_invalidates_model_but_keeps_last_check() {
        let (_engine, ctx) = setup();
        let solver = ctx.solver().unwrap();
        let x = ctx.int_const("x").unwrap();
        solver.push().unwrap();
        solver.assert(&ctx.eq(&x, &ctx.int(5).unwrap()).unwrap()).unwrap();
        assert_eq!(solver.check().unwrap(), CheckResult::Satisfiable);
        let model = solver.model().unwrap();
        assert_eq!(model.int_value(&x).unwrap(), 5);

        solver.pop(1).unwrap();
        assert!(!model.is_valid());
        assert_eq!(
            model.int_value(&x),
            Err(SolverError::UseAfterDispose(ObjectKind::Model))
        );
        assert_eq!(solver.last_check(), Some(CheckResult::Satisfiable));
        let fresh = solver.model().unwrap();
        assert!(fresh.is_valid());
        assert!(!fresh.ptr_eq(&model));
    }

    #[test]
    fn reset_forgets_last_check() {
        let (_engine, ctx) = setup();
        let solver = ctx.solver().unwrap();
        solver.assert(&ctx.bool_val(true).unwrap()).unwrap();
        solver.check().unwrap();
        solver.reset().unwrap();
        assert_eq!(solver.last_check(), None);
        assert!(matches!(solver.model(), Err(SolverError::StateSequence(_))));
        assert_eq!(solver.num_scopes().unwrap(), 0);
    }

    #[test]
    fn scopes_and_overpop() {
        let (_engine, ctx) = setup();
        let solver = ctx.solver().unwrap();
        solver.push().unwrap();
        solver.push().unwrap();
        assert_eq!(solver.num_scopes().unwrap(), 2);
        solver.pop(2).unwrap();
        assert_eq!(solver.num_scopes().unwrap(), 0);
        let err = solver.pop(1).unwrap_err();
        assert_eq!(err.native_code(), Some(smtguard_native::ErrorCode::INVALID_USAGE));
    }

    #[test]
    fn unknown_reports_reason() {
        let (engine, ctx) = setup();
        let solver = ctx.solver().unwrap();
        engine.inject(Fault::CheckUnknown);
        assert_eq!(solver.check().unwrap(), CheckResult::Unknown);
        assert_eq!(solver.reason_unknown().unwrap(), "canceled");
        assert!(matches!(solver.model(), Err(SolverError::StateSequence(_))));
    }

    #[test]
    fn timeout_reaches_engine() {
        let (engine, ctx) = setup();
        let solver = ctx.solver().unwrap();
        solver.set_timeout(250).unwrap();
        let raw = ctx.raw_engine().unwrap();
        assert_eq!(engine.solver_timeout(raw, solver.raw()), Some(250));
    }

    #[test]
    fn rejected_timeout_reports_engine_error_and_releases_params() {
        let (engine, ctx) = setup();
        let solver = ctx.solver().unwrap();
        engine.inject(Fault::ParamsRejected);
        let err = solver.set_timeout(250).unwrap_err();
        assert_eq!(err.native_code(), Some(smtguard_native::ErrorCode::INVALID_ARG));
        assert!(err.to_string().contains("parameter set rejected"), "{err}");
        let raw = ctx.raw_engine().unwrap();
        assert_eq!(engine.solver_timeout(raw, solver.raw()), None);

        // The temporary parameter set was released despite the failure.
        ctx.dispose();
        let stats = engine.stats();
        assert_eq!(stats.refs_leaked, 0);
        assert_eq!(stats.dec_ref_underflows, 0);
    }

    #[test]
    fn display_lists_assertions() {
        let (_engine, ctx) = setup();
        let solver = ctx.solver().unwrap();
        let x = ctx.int_const("x").unwrap();
        solver.assert(&ctx.ge(&x, &ctx.int(1).unwrap()).unwrap()).unwrap();
        let text = solver.to_string();
        assert!(text.contains("(declare-fun x () Int)"));
        assert!(text.contains("(assert (>= x 1))"));
        solver.dispose();
        assert_eq!(solver.to_string(), "<disposed solver>");
    }

    #[test]
    fn use_after_context_dispose() {
        let (_engine, ctx) = setup();
        let solver = ctx.solver().unwrap();
        let p = ctx.bool_const("p").unwrap();
        ctx.dispose();
        assert!(solver.is_disposed());
        let expected = SolverError::UseAfterDispose(ObjectKind::Solver);
        assert_eq!(solver.check(), Err(expected.clone()));
        assert_eq!(solver.assert(&p), Err(expected.clone()));
        assert_eq!(solver.push(), Err(expected));
    }

    #[test]
    fn solver_outliving_context_drops_quietly() {
        let (engine, ctx) = setup();
        let solver = ctx.solver().unwrap();
        drop(ctx);
        assert_eq!(engine.live_engines(), 0);
        drop(solver);
        let stats = engine.stats();
        assert_eq!(stats.refs_leaked, 0);
        assert_eq!(stats.freed_handle_uses, 0);
    }

    #[test]
    fn foreign_constraint_rejected() {
        let (engine, ctx) = setup();
        let other = Context::with_defaults(engine).unwrap();
        let solver = ctx.solver().unwrap();
        let p = other.bool_const("p").unwrap();
        assert!(matches!(solver.assert(&p), Err(SolverError::Argument(_))));
    }
}
