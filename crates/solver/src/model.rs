//! Satisfying assignments.
//!
//! A [`Model`] is a reference-counted snapshot produced by a satisfiable
//! check. Its producer caches it until the next mutation, disposal, or
//! context teardown, at which point it is invalidated: the native count is
//! released once and every further value operation fails with
//! `UseAfterDispose`.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use num_bigint::BigInt;
use num_rational::BigRational;
use smtguard_native::{LBool, NativeApi, RawAst, RawEngine, RawModel, SortKind};

use crate::call::invoke;
use crate::context::ContextInner;
use crate::error::{ObjectKind, SolverError};
use crate::literal;
use crate::terms::Ast;

/// Satisfying assignment from a check. Cloning shares the same instance.
#[derive(Clone)]
pub struct Model {
    cell: Rc<ModelCell>,
}

struct ModelCell {
    ctx: Weak<ContextInner>,
    /// `None` once invalidated.
    raw: Cell<Option<RawModel>>,
}

impl Drop for ModelCell {
    fn drop(&mut self) {
        let Some(raw) = self.raw.take() else { return };
        let Some(ctx) = self.ctx.upgrade() else { return };
        if let Ok(engine) = ctx.engine() {
            // SAFETY: the model was incremented in `Model::wrap` on this engine.
            if let Err(err) = invoke(ctx.api(), engine, |api| unsafe {
                api.model_dec_ref(engine, raw)
            }) {
                tracing::warn!(model = ?raw, %err, "failed to release model on drop");
            }
        }
    }
}

impl Model {
    /// Take a reference on a model handle returned by `ctx`'s engine.
    pub(crate) fn wrap(ctx: &Rc<ContextInner>, raw: RawModel) -> Result<Self, SolverError> {
        if raw.is_null() {
            return Err(SolverError::ConstructionFailure("model".to_string()));
        }
        // SAFETY: `raw` was just returned non-null by this engine.
        ctx.invoke(|api, engine| unsafe { api.model_inc_ref(engine, raw) })?;
        tracing::trace!(model = ?raw, "wrapped model");
        Ok(Self {
            cell: Rc::new(ModelCell {
                ctx: Rc::downgrade(ctx),
                raw: Cell::new(Some(raw)),
            }),
        })
    }

    /// Release the native handle through an explicit engine.
    ///
    /// Used during teardown, when the context can no longer be reached
    /// through the back-reference.
    pub(crate) fn release(&self, api: &dyn NativeApi, engine: RawEngine) {
        let Some(raw) = self.cell.raw.take() else { return };
        // SAFETY: paired with the increment in `wrap`.
        match invoke(api, engine, |api| unsafe { api.model_dec_ref(engine, raw) }) {
            Ok(()) => tracing::trace!(model = ?raw, "invalidated model"),
            Err(err) => tracing::warn!(model = ?raw, %err, "failed to release model"),
        }
    }

    /// Drop the handle without a native call; its engine is already gone.
    pub(crate) fn forget(&self) {
        self.cell.raw.set(None);
    }

    pub fn is_valid(&self) -> bool {
        self.cell.raw.get().is_some()
    }

    /// Release the model. Calling it again is a no-op.
    pub fn invalidate(&self) {
        if !self.is_valid() {
            return;
        }
        let live = self
            .cell
            .ctx
            .upgrade()
            .and_then(|ctx| ctx.engine().ok().map(|engine| (ctx, engine)));
        match live {
            Some((ctx, engine)) => self.release(ctx.api(), engine),
            None => self.forget(),
        }
    }

    /// Whether both values are the same model instance.
    pub fn ptr_eq(&self, other: &Model) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    fn live(&self) -> Result<(Rc<ContextInner>, RawModel), SolverError> {
        let disposed = SolverError::UseAfterDispose(ObjectKind::Model);
        let raw = self.cell.raw.get().ok_or_else(|| disposed.clone())?;
        let ctx = self.cell.ctx.upgrade().ok_or_else(|| disposed.clone())?;
        ctx.engine().map_err(|_| disposed)?;
        Ok((ctx, raw))
    }

    /// Evaluate `expr` under this model.
    ///
    /// With `completion`, constants the model leaves unassigned are given a
    /// default value; without it they may come back unevaluated. The result is
    /// tracked by the owning context.
    pub fn evaluate(&self, expr: &Ast, completion: bool) -> Result<Ast, SolverError> {
        let (ctx, raw) = self.live()?;
        let target = expr.raw_for(&self.cell.ctx)?;
        // SAFETY: model and expression belong to this live engine.
        let result = ctx.invoke(|api, engine| unsafe {
            api.model_eval(engine, raw, target, completion)
        })?;
        let Some(result) = result.and_then(RawAst::non_null) else {
            return Err(SolverError::EvaluationFailure(format!(
                "engine refused to evaluate {expr}"
            )));
        };
        let tracked = ctx.track(result)?;
        Ok(Ast::new(Rc::downgrade(&ctx), tracked))
    }

    /// Evaluate with the context's configured completion default.
    pub fn eval(&self, expr: &Ast) -> Result<Ast, SolverError> {
        let completion = self.live()?.0.model_completion();
        self.evaluate(expr, completion)
    }

    /// Evaluate `expr` and return the value with its context.
    fn value_of(&self, expr: &Ast) -> Result<(Rc<ContextInner>, Ast), SolverError> {
        let value = self.eval(expr)?;
        let (ctx, _) = self.live()?;
        Ok((ctx, value))
    }

    fn expect_kind(value: &Ast, allowed: &[SortKind], wanted: &str) -> Result<SortKind, SolverError> {
        let kind = value.sort_kind()?;
        if allowed.contains(&kind) {
            Ok(kind)
        } else {
            Err(SolverError::ValueExtraction(format!(
                "expected {wanted}, got {value} of sort {kind}"
            )))
        }
    }

    fn numeral_text(ctx: &ContextInner, value: &Ast, wanted: &str) -> Result<String, SolverError> {
        let raw = value.raw();
        // SAFETY: `raw` is tracked by this live context.
        let is_numeral = ctx.invoke(|api, engine| unsafe { api.is_numeral(engine, raw) })?;
        if !is_numeral {
            return Err(SolverError::ValueExtraction(format!(
                "expected {wanted} numeral, got {value}"
            )));
        }
        // SAFETY: as above.
        ctx.invoke(|api, engine| unsafe { api.numeral_string(engine, raw) })
    }

    fn rendering(ctx: &ContextInner, value: &Ast) -> Result<String, SolverError> {
        let raw = value.raw();
        // SAFETY: `raw` is tracked by this live context.
        ctx.invoke(|api, engine| unsafe { api.ast_to_string(engine, raw) })
    }

    pub fn int_value(&self, expr: &Ast) -> Result<i64, SolverError> {
        let (ctx, value) = self.value_of(expr)?;
        Self::expect_kind(&value, &[SortKind::Int], "an integer")?;
        let text = Self::numeral_text(&ctx, &value, "integer")?;
        literal::parse_i64(&text)
            .ok_or_else(|| SolverError::ValueExtraction(format!("{text} does not fit in i64")))
    }

    pub fn big_int_value(&self, expr: &Ast) -> Result<BigInt, SolverError> {
        let (ctx, value) = self.value_of(expr)?;
        Self::expect_kind(&value, &[SortKind::Int], "an integer")?;
        let text = Self::numeral_text(&ctx, &value, "integer")?;
        literal::parse_big_int(&text)
            .ok_or_else(|| SolverError::ValueExtraction(format!("malformed integer numeral {text}")))
    }

    pub fn bool_value(&self, expr: &Ast) -> Result<bool, SolverError> {
        let (ctx, value) = self.value_of(expr)?;
        Self::expect_kind(&value, &[SortKind::Bool], "a Boolean")?;
        let raw = value.raw();
        // SAFETY: `raw` is tracked by this live context.
        match ctx.invoke(|api, engine| unsafe { api.bool_value(engine, raw) })? {
            LBool::True => Ok(true),
            LBool::False => Ok(false),
            LBool::Undef => Err(SolverError::ValueExtraction(format!(
                "{value} is not a Boolean constant"
            ))),
        }
    }

    /// Unsigned value of a bitvector of at most 64 bits.
    pub fn bitvec_value(&self, expr: &Ast) -> Result<u64, SolverError> {
        let (ctx, value) = self.value_of(expr)?;
        Self::expect_kind(&value, &[SortKind::BitVec], "a bitvector")?;
        let text = Self::numeral_text(&ctx, &value, "bitvector")?;
        literal::parse_u64(&text)
            .ok_or_else(|| SolverError::ValueExtraction(format!("{text} does not fit in u64")))
    }

    /// Exact value of a real (or integer) constant.
    pub fn real_value(&self, expr: &Ast) -> Result<BigRational, SolverError> {
        let (ctx, value) = self.value_of(expr)?;
        Self::expect_kind(&value, &[SortKind::Real, SortKind::Int], "a real")?;
        let text = Self::numeral_text(&ctx, &value, "real")?;
        literal::parse_rational(&text)
            .ok_or_else(|| SolverError::ValueExtraction(format!("malformed real numeral {text}")))
    }

    /// Nearest `f64` to a real numeral.
    fn real_as_f64(ctx: &ContextInner, value: &Ast) -> Result<f64, SolverError> {
        let text = Self::numeral_text(ctx, value, "real")?;
        literal::parse_rational(&text)
            .as_ref()
            .and_then(literal::rational_to_f64)
            .ok_or_else(|| SolverError::ValueExtraction(format!("{text} is not representable as f64")))
    }

    /// Floating-point value; real constants are rounded to nearest.
    pub fn f64_value(&self, expr: &Ast) -> Result<f64, SolverError> {
        let (ctx, value) = self.value_of(expr)?;
        match Self::expect_kind(&value, &[SortKind::FloatingPoint, SortKind::Real], "a float")? {
            SortKind::Real => Self::real_as_f64(&ctx, &value),
            _ => {
                let text = Self::rendering(&ctx, &value)?;
                literal::parse_f64(&text).ok_or_else(|| {
                    SolverError::ValueExtraction(format!("unrecognized floating-point literal {text}"))
                })
            }
        }
    }

    pub fn f32_value(&self, expr: &Ast) -> Result<f32, SolverError> {
        let (ctx, value) = self.value_of(expr)?;
        match Self::expect_kind(&value, &[SortKind::FloatingPoint, SortKind::Real], "a float")? {
            SortKind::Real => Self::real_as_f64(&ctx, &value).map(|v| v as f32),
            _ => {
                let text = Self::rendering(&ctx, &value)?;
                literal::parse_f32(&text).ok_or_else(|| {
                    SolverError::ValueExtraction(format!("unrecognized floating-point literal {text}"))
                })
            }
        }
    }

    pub fn string_value(&self, expr: &Ast) -> Result<String, SolverError> {
        let (ctx, value) = self.value_of(expr)?;
        let raw = value.raw();
        // SAFETY: `raw` is tracked by this live context.
        if !ctx.invoke(|api, engine| unsafe { api.is_string(engine, raw) })? {
            return Err(SolverError::ValueExtraction(format!(
                "{value} is not a string constant"
            )));
        }
        // SAFETY: as above.
        ctx.invoke(|api, engine| unsafe { api.string_value(engine, raw) })
    }

    pub fn char_value(&self, expr: &Ast) -> Result<char, SolverError> {
        let (ctx, value) = self.value_of(expr)?;
        Self::expect_kind(&value, &[SortKind::Char], "a character")?;
        let text = Self::rendering(&ctx, &value)?;
        literal::parse_char(&text)
            .ok_or_else(|| SolverError::ValueExtraction(format!("unrecognized character literal {text}")))
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self.live().and_then(|(ctx, raw)| {
            // SAFETY: `raw` is live on this engine.
            ctx.invoke(|api, engine| unsafe { api.model_to_string(engine, raw) })
        });
        match rendered {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<invalidated model>"),
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("raw", &self.cell.raw.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use num_traits::ToPrimitive;
    use smtguard_native::reference::{Fault, ReferenceEngine};

    use super::*;
    use crate::config::ContextConfig;
    use crate::context::Context;

    fn setup(completion: bool) -> (Arc<ReferenceEngine>, Context) {
        let engine = Arc::new(ReferenceEngine::new());
        let config = ContextConfig::new().with_model_completion(completion);
        let ctx = Context::new(engine.clone(), config).unwrap();
        (engine, ctx)
    }

    #[test]
    fn extracts_integers_and_booleans() {
        let (_engine, ctx) = setup(false);
        let x = ctx.int_const("x").unwrap();
        let b = ctx.bool_const("b").unwrap();
        let solver = ctx.solver().unwrap();
        solver.assert(&ctx.eq(&x, &ctx.int(-3).unwrap()).unwrap()).unwrap();
        solver.assert(&b).unwrap();
        assert!(solver.check().unwrap().is_sat());

        let model = solver.model().unwrap();
        assert_eq!(model.int_value(&x).unwrap(), -3);
        assert_eq!(model.big_int_value(&x).unwrap(), BigInt::from(-3));
        assert!(model.bool_value(&b).unwrap());
    }

    #[test]
    fn extracts_reals_and_bitvectors() {
        let (_engine, ctx) = setup(false);
        let r = ctx.real_const("r").unwrap();
        let v = ctx.bv_const("v", 8).unwrap();
        let solver = ctx.solver().unwrap();
        solver.assert(&ctx.eq(&r, &ctx.real(3, 4).unwrap()).unwrap()).unwrap();
        solver.assert(&ctx.eq(&v, &ctx.bv(200, 8).unwrap()).unwrap()).unwrap();
        assert!(solver.check().unwrap().is_sat());

        let model = solver.model().unwrap();
        let value = model.real_value(&r).unwrap();
        assert_eq!(value.to_f64(), Some(0.75));
        assert_eq!(model.f64_value(&r).unwrap(), 0.75);
        assert_eq!(model.bitvec_value(&v).unwrap(), 200);
    }

    #[test]
    fn f32_of_real_evaluates_once() {
        let (_engine, ctx) = setup(false);
        let r = ctx.real_const("r").unwrap();
        let solver = ctx.solver().unwrap();
        solver.assert(&ctx.eq(&r, &ctx.real(-5, 2).unwrap()).unwrap()).unwrap();
        solver.check().unwrap();
        let model = solver.model().unwrap();

        let start = ctx.tracked_handle_count();
        assert_eq!(model.f64_value(&r).unwrap(), -2.5);
        let per_f64 = ctx.tracked_handle_count() - start;

        let start = ctx.tracked_handle_count();
        assert_eq!(model.f32_value(&r).unwrap(), -2.5f32);
        assert_eq!(ctx.tracked_handle_count() - start, per_f64);
    }

    #[test]
    fn wrong_kind_is_value_extraction_error() {
        let (_engine, ctx) = setup(false);
        let x = ctx.int_const("x").unwrap();
        let solver = ctx.solver().unwrap();
        solver.assert(&ctx.eq(&x, &ctx.int(1).unwrap()).unwrap()).unwrap();
        solver.check().unwrap();
        let model = solver.model().unwrap();

        assert!(matches!(model.bool_value(&x), Err(SolverError::ValueExtraction(_))));
        assert!(matches!(model.bitvec_value(&x), Err(SolverError::ValueExtraction(_))));
        assert!(matches!(model.string_value(&x), Err(SolverError::ValueExtraction(_))));
        assert!(matches!(model.char_value(&x), Err(SolverError::ValueExtraction(_))));
    }

    #[test]
    fn unassigned_constant_follows_completion_flag() {
        let (_engine, ctx) = setup(false);
        let x = ctx.int_const("x").unwrap();
        let y = ctx.int_const("y").unwrap();
        let solver = ctx.solver().unwrap();
        solver.assert(&ctx.eq(&x, &ctx.int(2).unwrap()).unwrap()).unwrap();
        solver.check().unwrap();
        let model = solver.model().unwrap();

        // Context default is no completion: `y` stays symbolic.
        assert_eq!(model.eval(&y).unwrap(), y);
        assert!(matches!(model.int_value(&y), Err(SolverError::ValueExtraction(_))));

        // Explicit completion assigns a default.
        let completed = model.evaluate(&y, true).unwrap();
        assert_eq!(completed.to_string(), "0");
    }

    #[test]
    fn completion_default_comes_from_config() {
        let (_engine, ctx) = setup(true);
        let x = ctx.int_const("x").unwrap();
        let y = ctx.int_const("y").unwrap();
        let solver = ctx.solver().unwrap();
        solver.assert(&ctx.eq(&x, &ctx.int(2).unwrap()).unwrap()).unwrap();
        solver.check().unwrap();
        assert_eq!(solver.model().unwrap().int_value(&y).unwrap(), 0);
    }

    #[test]
    fn refused_evaluation_is_evaluation_failure() {
        let (engine, ctx) = setup(false);
        let x = ctx.int_const("x").unwrap();
        let solver = ctx.solver().unwrap();
        solver.assert(&ctx.eq(&x, &ctx.int(1).unwrap()).unwrap()).unwrap();
        solver.check().unwrap();
        let model = solver.model().unwrap();
        engine.inject(Fault::EvalRefused);
        assert!(matches!(
            model.evaluate(&x, true),
            Err(SolverError::EvaluationFailure(_))
        ));
    }

    #[test]
    fn invalidate_is_idempotent() {
        let (engine, ctx) = setup(false);
        let x = ctx.int_const("x").unwrap();
        let solver = ctx.solver().unwrap();
        solver.assert(&ctx.eq(&x, &ctx.int(1).unwrap()).unwrap()).unwrap();
        solver.check().unwrap();
        let model = solver.model().unwrap();

        model.invalidate();
        model.invalidate();
        assert!(!model.is_valid());
        assert_eq!(
            model.int_value(&x),
            Err(SolverError::UseAfterDispose(ObjectKind::Model))
        );
        assert_eq!(model.to_string(), "<invalidated model>");
        assert_eq!(engine.stats().dec_ref_underflows, 0);

        // The producer hands out a fresh instance afterwards.
        let fresh = solver.model().unwrap();
        assert!(!fresh.ptr_eq(&model));
        assert_eq!(fresh.int_value(&x).unwrap(), 1);
    }

    #[test]
    fn display_renders_assignment() {
        let (_engine, ctx) = setup(false);
        let x = ctx.int_const("x").unwrap();
        let solver = ctx.solver().unwrap();
        solver.assert(&ctx.eq(&x, &ctx.int(7).unwrap()).unwrap()).unwrap();
        solver.check().unwrap();
        assert_eq!(solver.model().unwrap().to_string(), "x -> 7");
    }

    #[test]
    fn foreign_expression_is_argument_error() {
        let (engine, ctx) = setup(false);
        let other = Context::with_defaults(engine.clone()).unwrap();
        let foreign = other.int_const("z").unwrap();

        let x = ctx.int_const("x").unwrap();
        let solver = ctx.solver().unwrap();
        solver.assert(&ctx.eq(&x, &ctx.int(1).unwrap()).unwrap()).unwrap();
        solver.check().unwrap();
        let model = solver.model().unwrap();
        assert!(matches!(model.eval(&foreign), Err(SolverError::Argument(_))));
    }
}
