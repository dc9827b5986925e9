//! The owning context.
//!
//! A [`Context`] owns one native engine together with everything allocated
//! against it: the configuration object, every AST handle it has
//! reference-counted, and the solvers and optimizers it created. Children
//! hold only a `Weak` back-reference and route destructive operations
//! through the context, so teardown order is decided in one place:
//! children first (which invalidates their models), then one decrement per
//! tracked handle, then the engine and configuration.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::CString;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rustc_hash::FxHashMap;
use smtguard_native::{LBool, NativeApi, RawAst, RawConfig, RawEngine, RawModel, RawOptimize, RawSolver};

use crate::call::{invoke, safe_error_handler};
use crate::config::ContextConfig;
use crate::error::{ObjectKind, SolverError};
use crate::model::Model;
use crate::optimizer::Optimizer;
use crate::result::CheckResult;
use crate::scope::{self, ScopeGuard};
use crate::solver::Solver;
use crate::terms::Ast;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn c_string(text: &str, what: &str) -> Result<CString, SolverError> {
    CString::new(text)
        .map_err(|_| SolverError::Argument(format!("{what} contains an interior NUL byte")))
}

/// Owner of one native engine and everything allocated against it.
///
/// Cloning is cheap and yields another handle to the same context. The
/// context is torn down by [`dispose`](Context::dispose), or when the last
/// handle is dropped if it was never disposed explicitly.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

pub(crate) struct ContextInner {
    id: u64,
    api: Arc<dyn NativeApi>,
    model_completion: bool,
    state: RefCell<ContextState>,
}

#[derive(Default)]
struct ContextState {
    /// `None` once disposed.
    engine: Option<RawEngine>,
    config: Option<RawConfig>,
    /// Handle -> number of increments issued for it.
    tracked: FxHashMap<RawAst, usize>,
    children: BTreeMap<u64, Rc<RefCell<ChildState>>>,
    next_child: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawChild {
    Solver(RawSolver),
    Optimize(RawOptimize),
}

impl RawChild {
    fn kind(self) -> ObjectKind {
        match self {
            RawChild::Solver(_) => ObjectKind::Solver,
            RawChild::Optimize(_) => ObjectKind::Optimizer,
        }
    }
}

/// Lifecycle state shared between a child wrapper and its context.
pub(crate) struct ChildState {
    raw: RawChild,
    disposed: bool,
    last_check: Option<CheckResult>,
    /// Present only while `last_check` is satisfiable and nothing changed since.
    model: Option<Model>,
}

/// Release a child's model and its native handle. Idempotent.
fn release_child(api: &dyn NativeApi, engine: RawEngine, child: &RefCell<ChildState>) {
    let (raw, model) = {
        let mut state = child.borrow_mut();
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.last_check = None;
        (state.raw, state.model.take())
    };
    if let Some(model) = model {
        model.release(api, engine);
    }
    // SAFETY: the child handle was created on `engine` and its count was
    // incremented when the child was registered.
    let released = invoke(api, engine, |api| unsafe {
        match raw {
            RawChild::Solver(s) => api.solver_dec_ref(engine, s),
            RawChild::Optimize(o) => api.optimize_dec_ref(engine, o),
        }
    });
    match released {
        Ok(()) => tracing::trace!(?raw, "released child"),
        Err(err) => tracing::warn!(?raw, %err, "failed to release child"),
    }
}

impl ContextInner {
    pub(crate) fn api(&self) -> &dyn NativeApi {
        &*self.api
    }

    pub(crate) fn model_completion(&self) -> bool {
        self.model_completion
    }

    pub(crate) fn engine(&self) -> Result<RawEngine, SolverError> {
        self.state
            .borrow()
            .engine
            .ok_or(SolverError::UseAfterDispose(ObjectKind::Context))
    }

    fn is_disposed(&self) -> bool {
        self.state.borrow().engine.is_none()
    }

    /// Issue one checked native call on this context's engine.
    pub(crate) fn invoke<T>(
        &self,
        call: impl FnOnce(&dyn NativeApi, RawEngine) -> T,
    ) -> Result<T, SolverError> {
        let engine = self.engine()?;
        invoke(self.api(), engine, |api| call(api, engine))
    }

    /// Increment the native count of `raw` and record it for teardown.
    pub(crate) fn track(&self, raw: RawAst) -> Result<RawAst, SolverError> {
        if raw.is_null() {
            return Err(SolverError::Argument("cannot track a null handle".to_string()));
        }
        // SAFETY: `raw` was produced by this engine; the engine is live.
        self.invoke(|api, engine| unsafe { api.inc_ref(engine, raw) })?;
        let count = {
            let mut state = self.state.borrow_mut();
            let count = state.tracked.entry(raw).or_insert(0);
            *count += 1;
            *count
        };
        tracing::trace!(context = self.id, handle = ?raw, count, "tracked handle");
        Ok(raw)
    }

    fn add_child(self: &Rc<Self>, raw: RawChild) -> Result<ChildRef, SolverError> {
        // SAFETY: `raw` was just returned non-null by this engine.
        self.invoke(|api, engine| unsafe {
            match raw {
                RawChild::Solver(s) => api.solver_inc_ref(engine, s),
                RawChild::Optimize(o) => api.optimize_inc_ref(engine, o),
            }
        })?;
        let state = Rc::new(RefCell::new(ChildState {
            raw,
            disposed: false,
            last_check: None,
            model: None,
        }));
        let id = {
            let mut ctx = self.state.borrow_mut();
            ctx.next_child += 1;
            let id = ctx.next_child;
            ctx.children.insert(id, Rc::clone(&state));
            id
        };
        tracing::trace!(context = self.id, child = id, ?raw, "registered child");
        Ok(ChildRef {
            ctx: Rc::downgrade(self),
            id,
            kind: raw.kind(),
            state,
        })
    }

    /// Remove one child and release it. No-op once the context is disposed.
    fn dispose_child(&self, id: u64) {
        let (engine, child) = {
            let mut state = self.state.borrow_mut();
            let Some(engine) = state.engine else { return };
            let Some(child) = state.children.remove(&id) else {
                return;
            };
            (engine, child)
        };
        release_child(self.api(), engine, &child);
    }

    fn teardown(&self) {
        let Ok(mut state) = self.state.try_borrow_mut() else {
            tracing::warn!(context = self.id, "context busy during teardown; skipping");
            return;
        };
        let Some(engine) = state.engine.take() else {
            return;
        };
        let config = state.config.take();
        let children = std::mem::take(&mut state.children);
        let tracked = std::mem::take(&mut state.tracked);
        drop(state);

        let api = self.api();
        for child in children.values() {
            release_child(api, engine, child);
        }

        let mut released = 0usize;
        let mut failed = 0usize;
        let mut last_failure = None;
        for (raw, count) in tracked {
            for _ in 0..count {
                // SAFETY: each decrement pairs with one increment from `track`.
                match invoke(api, engine, |api| unsafe { api.dec_ref(engine, raw) }) {
                    Ok(()) => released += 1,
                    Err(err) => {
                        failed += 1;
                        last_failure = Some((raw, err));
                    }
                }
            }
        }
        if let Some((raw, err)) = last_failure {
            tracing::warn!(
                context = self.id,
                failed,
                last_handle = ?raw,
                %err,
                "failed to release handles"
            );
        }

        // SAFETY: every object allocated against `engine` has been released.
        unsafe {
            api.del_engine(engine);
            if let Some(config) = config {
                api.del_config(config);
            }
        }
        tracing::info!(
            context = self.id,
            children = children.len(),
            released,
            "context disposed"
        );
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Context {
    /// Create a context on `api`, applying `config` before the engine exists.
    ///
    /// A null configuration or engine from the native side is a
    /// `ConstructionFailure`; anything allocated up to that point is released.
    pub fn new(api: Arc<dyn NativeApi>, config: ContextConfig) -> Result<Self, SolverError> {
        config.validate()?;
        let params = config
            .params
            .iter()
            .map(|(name, value)| Ok((c_string(name, "parameter name")?, c_string(value, "parameter value")?)))
            .collect::<Result<Vec<_>, SolverError>>()?;

        // SAFETY: configuration objects have no preconditions.
        let raw_config = unsafe { api.mk_config() };
        if raw_config.is_null() {
            return Err(SolverError::ConstructionFailure("configuration".to_string()));
        }
        for (name, value) in &params {
            // SAFETY: `raw_config` is live until `del_config` below or teardown.
            unsafe { api.config_set_param(raw_config, name, value) };
        }

        // SAFETY: `raw_config` is live.
        let engine = unsafe { api.mk_engine(raw_config) };
        if engine.is_null() {
            // SAFETY: the config was never handed to an engine.
            unsafe { api.del_config(raw_config) };
            return Err(SolverError::ConstructionFailure("engine".to_string()));
        }
        // SAFETY: `engine` is live; the handler never unwinds.
        unsafe { api.set_error_handler(engine, safe_error_handler) };

        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        tracing::info!(context = id, api = api.name(), params = params.len(), "context created");
        Ok(Self {
            inner: Rc::new(ContextInner {
                id,
                api,
                model_completion: config.model_completion,
                state: RefCell::new(ContextState {
                    engine: Some(engine),
                    config: Some(raw_config),
                    ..ContextState::default()
                }),
            }),
        })
    }

    /// Create a context with the default configuration.
    pub fn with_defaults(api: Arc<dyn NativeApi>) -> Result<Self, SolverError> {
        Self::new(api, ContextConfig::new())
    }

    /// Create a context on the system Z3 library.
    #[cfg(feature = "z3-native")]
    pub fn z3(config: ContextConfig) -> Result<Self, SolverError> {
        Self::new(Arc::new(smtguard_native::z3::Z3Api), config)
    }

    /// The ambient context of the current thread.
    pub fn current() -> Result<Self, SolverError> {
        scope::current()
    }

    /// Install this context as the current thread's ambient context.
    pub fn enter(&self) -> ScopeGuard {
        scope::enter(self)
    }

    pub(crate) fn inner(&self) -> &Rc<ContextInner> {
        &self.inner
    }

    pub(crate) fn downgrade(&self) -> Weak<ContextInner> {
        Rc::downgrade(&self.inner)
    }

    /// Set an engine parameter on the live engine.
    pub fn set_parameter(&self, name: &str, value: &str) -> Result<(), SolverError> {
        let engine = self.inner.engine()?;
        let name = c_string(name, "parameter name")?;
        let value = c_string(value, "parameter value")?;
        // SAFETY: `engine` is live.
        invoke(self.inner.api(), engine, |api| unsafe {
            api.set_param(engine, &name, &value)
        })
    }

    /// Take ownership of a handle produced on this context's engine.
    ///
    /// Tracking the same handle twice increments its native count twice;
    /// both are released at teardown.
    pub fn track(&self, raw: RawAst) -> Result<Ast, SolverError> {
        let raw = self.inner.track(raw)?;
        Ok(Ast::new(self.downgrade(), raw))
    }

    /// Create an incremental solver.
    pub fn solver(&self) -> Result<Solver, SolverError> {
        // SAFETY: engine liveness is checked by `invoke`.
        let raw = self.inner.invoke(|api, engine| unsafe { api.mk_solver(engine) })?;
        if raw.is_null() {
            return Err(SolverError::ConstructionFailure("solver".to_string()));
        }
        Ok(Solver::new(self.inner.add_child(RawChild::Solver(raw))?, raw))
    }

    /// Create a solver without the engine's default tactic pipeline.
    pub fn simple_solver(&self) -> Result<Solver, SolverError> {
        // SAFETY: engine liveness is checked by `invoke`.
        let raw = self
            .inner
            .invoke(|api, engine| unsafe { api.mk_simple_solver(engine) })?;
        if raw.is_null() {
            return Err(SolverError::ConstructionFailure("solver".to_string()));
        }
        Ok(Solver::new(self.inner.add_child(RawChild::Solver(raw))?, raw))
    }

    pub fn optimizer(&self) -> Result<Optimizer, SolverError> {
        // SAFETY: engine liveness is checked by `invoke`.
        let raw = self.inner.invoke(|api, engine| unsafe { api.mk_optimize(engine) })?;
        if raw.is_null() {
            return Err(SolverError::ConstructionFailure("optimizer".to_string()));
        }
        Ok(Optimizer::new(
            self.inner.add_child(RawChild::Optimize(raw))?,
            raw,
        ))
    }

    /// Tear the context down. Calling it again is a no-op.
    pub fn dispose(&self) {
        self.inner.teardown();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Outstanding increments across all tracked handles.
    pub fn tracked_handle_count(&self) -> usize {
        self.inner.state.borrow().tracked.values().sum()
    }

    /// Live solvers and optimizers.
    pub fn child_count(&self) -> usize {
        self.inner.state.borrow().children.len()
    }

    /// The native engine, for collaborators that build handles themselves.
    ///
    /// Handles built this way must be passed to [`track`](Context::track).
    pub fn raw_engine(&self) -> Result<RawEngine, SolverError> {
        self.inner.engine()
    }

    pub fn api(&self) -> &Arc<dyn NativeApi> {
        &self.inner.api
    }

    /// Default completion flag used by [`Model::eval`].
    pub fn model_completion(&self) -> bool {
        self.inner.model_completion
    }

    /// Whether both values refer to the same context.
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("api", &self.inner.api.name())
            .field("disposed", &state.engine.is_none())
            .field("tracked", &state.tracked.len())
            .field("children", &state.children.len())
            .finish()
    }
}

/// A solver's or optimizer's link to its context and shared state.
pub(crate) struct ChildRef {
    ctx: Weak<ContextInner>,
    id: u64,
    kind: ObjectKind,
    state: Rc<RefCell<ChildState>>,
}

impl ChildRef {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.state.borrow().disposed
    }

    pub(crate) fn last_check(&self) -> Option<CheckResult> {
        self.state.borrow().last_check
    }

    /// The owning context, if both it and this child are live.
    fn context(&self) -> Result<Rc<ContextInner>, SolverError> {
        if self.is_disposed() {
            return Err(SolverError::UseAfterDispose(self.kind));
        }
        self.ctx
            .upgrade()
            .filter(|ctx| !ctx.is_disposed())
            .ok_or(SolverError::UseAfterDispose(self.kind))
    }

    /// Raw handle of an expression owned by the same context.
    pub(crate) fn arg(&self, ast: &Ast) -> Result<RawAst, SolverError> {
        self.context()?;
        ast.raw_for(&self.ctx)
    }

    /// Track a handle this child's engine returned.
    pub(crate) fn track(&self, raw: RawAst) -> Result<Ast, SolverError> {
        let ctx = self.context()?;
        Ok(Ast::new(self.ctx.clone(), ctx.track(raw)?))
    }

    fn drop_model(&self, ctx: &ContextInner) {
        let model = self.state.borrow_mut().model.take();
        if let (Some(model), Ok(engine)) = (model, ctx.engine()) {
            model.release(ctx.api(), engine);
        }
    }

    /// A call that changes assertions, scopes or objectives.
    pub(crate) fn mutate<T>(
        &self,
        call: impl FnOnce(&dyn NativeApi, RawEngine) -> T,
    ) -> Result<T, SolverError> {
        let ctx = self.context()?;
        self.drop_model(&ctx);
        ctx.invoke(call)
    }

    /// Like [`mutate`](Self::mutate), but also forgets the last check.
    pub(crate) fn reset(&self, call: impl FnOnce(&dyn NativeApi, RawEngine)) -> Result<(), SolverError> {
        let ctx = self.context()?;
        self.drop_model(&ctx);
        self.state.borrow_mut().last_check = None;
        ctx.invoke(call)
    }

    /// A call that leaves the cached model alone.
    pub(crate) fn query<T>(
        &self,
        call: impl FnOnce(&dyn NativeApi, RawEngine) -> T,
    ) -> Result<T, SolverError> {
        self.context()?.invoke(call)
    }

    pub(crate) fn check(
        &self,
        call: impl FnOnce(&dyn NativeApi, RawEngine) -> LBool,
    ) -> Result<CheckResult, SolverError> {
        let ctx = self.context()?;
        self.drop_model(&ctx);
        self.state.borrow_mut().last_check = None;

        let start = Instant::now();
        let result = CheckResult::from(ctx.invoke(call)?);
        self.state.borrow_mut().last_check = Some(result);
        tracing::debug!(kind = %self.kind, child = self.id, "check: {result} in {:?}", start.elapsed());
        Ok(result)
    }

    /// The cached model, or a freshly fetched one after a satisfiable check.
    pub(crate) fn model(
        &self,
        fetch: impl FnOnce(&dyn NativeApi, RawEngine) -> RawModel,
    ) -> Result<Model, SolverError> {
        let ctx = self.context()?;
        let (last, cached) = {
            let state = self.state.borrow();
            (state.last_check, state.model.clone())
        };
        match last {
            None => {
                return Err(SolverError::StateSequence(
                    "must check before getting a model".to_string(),
                ));
            }
            Some(result) if !result.is_sat() => {
                return Err(SolverError::StateSequence(format!(
                    "cannot get model when status is {result}"
                )));
            }
            Some(_) => {}
        }
        if let Some(model) = cached.filter(Model::is_valid) {
            return Ok(model);
        }
        let raw = ctx.invoke(fetch)?;
        let model = Model::wrap(&ctx, raw)?;
        self.state.borrow_mut().model = Some(model.clone());
        Ok(model)
    }

    /// Hand the child back to its context for release.
    pub(crate) fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        match self.ctx.upgrade() {
            Some(ctx) => ctx.dispose_child(self.id),
            None => {
                // Context already gone; its engine took the native object with it.
                let model = {
                    let mut state = self.state.borrow_mut();
                    state.disposed = true;
                    state.model.take()
                };
                if let Some(model) = model {
                    model.forget();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smtguard_native::reference::{Fault, ReferenceEngine};

    fn setup() -> (Arc<ReferenceEngine>, Context) {
        let engine = Arc::new(ReferenceEngine::new());
        let ctx = Context::with_defaults(engine.clone()).unwrap();
        (engine, ctx)
    }

    #[test]
    fn construction_registers_handler_and_config() {
        let (engine, ctx) = setup();
        assert!(!ctx.is_disposed());
        assert_eq!(engine.live_engines(), 1);
        assert_eq!(engine.live_configs(), 1);
        ctx.dispose();
        assert_eq!(engine.live_engines(), 0);
        assert_eq!(engine.live_configs(), 0);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_releases_are_summarized_once() {
        let (engine, ctx) = setup();
        let x = ctx.int_const("x").unwrap();
        for _ in 0..4 {
            ctx.track(x.raw()).unwrap();
        }
        let raw_engine = ctx.raw_engine().unwrap();
        let held = engine.ast_ref_count(raw_engine, x.raw()).unwrap();
        assert_eq!(held, 5);
        // SAFETY: the handle is live; releasing it behind the context's back
        // makes every teardown decrement fail.
        for _ in 0..held {
            unsafe { ctx.api().dec_ref(raw_engine, x.raw()) };
        }

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || ctx.dispose());

        let bytes = captured.0.lock().unwrap().clone();
        let output = String::from_utf8(bytes).unwrap();
        let summaries: Vec<&str> = output
            .lines()
            .filter(|line| line.contains("failed to release"))
            .collect();
        assert_eq!(summaries.len(), 1, "{output}");
        assert!(summaries[0].contains("failed=5"), "{output}");
        assert_eq!(engine.stats().dec_ref_underflows, 5);
    }

    #[test]
    fn null_config_is_construction_failure() {
        let engine = Arc::new(ReferenceEngine::new());
        engine.inject(Fault::NullConfig);
        let err = Context::with_defaults(engine.clone()).unwrap_err();
        assert_eq!(err, SolverError::ConstructionFailure("configuration".to_string()));
        assert_eq!(engine.stats().configs_created, 0);
    }

    #[test]
    fn null_engine_releases_config() {
        let engine = Arc::new(ReferenceEngine::new());
        engine.inject(Fault::NullEngine);
        let err = Context::with_defaults(engine.clone()).unwrap_err();
        assert_eq!(err, SolverError::ConstructionFailure("engine".to_string()));
        let stats = engine.stats();
        assert_eq!(stats.configs_created, 1);
        assert_eq!(stats.configs_destroyed, 1);
    }

    #[test]
    fn config_params_reach_engine() {
        let engine = Arc::new(ReferenceEngine::new());
        let ctx = Context::new(engine.clone(), ContextConfig::new().with_timeout(1500)).unwrap();
        let raw = ctx.raw_engine().unwrap();
        assert_eq!(engine.param(raw, "timeout").as_deref(), Some("1500"));
    }

    #[test]
    fn set_parameter_forwards_and_reports_rejection() {
        let (engine, ctx) = setup();
        ctx.set_parameter("model_validate", "true").unwrap();
        let raw = ctx.raw_engine().unwrap();
        assert_eq!(engine.param(raw, "model_validate").as_deref(), Some("true"));

        let err = ctx.set_parameter("definitely_not_a_param", "1").unwrap_err();
        assert!(matches!(err, SolverError::NativeOperation { .. }));
    }

    #[test]
    fn set_parameter_after_dispose() {
        let (_engine, ctx) = setup();
        ctx.dispose();
        assert_eq!(
            ctx.set_parameter("timeout", "10"),
            Err(SolverError::UseAfterDispose(ObjectKind::Context))
        );
    }

    #[test]
    fn track_null_is_argument_error() {
        let (_engine, ctx) = setup();
        let err = ctx.track(RawAst::null()).unwrap_err();
        assert!(matches!(err, SolverError::Argument(_)));
        assert_eq!(ctx.tracked_handle_count(), 0);
    }

    #[test]
    fn retracking_double_increments() {
        let (engine, ctx) = setup();
        let x = ctx.int_const("x").unwrap();
        let before = ctx.tracked_handle_count();
        let again = ctx.track(x.raw()).unwrap();
        assert_eq!(again, x);
        assert_eq!(ctx.tracked_handle_count(), before + 1);
        let raw = ctx.raw_engine().unwrap();
        assert_eq!(engine.ast_ref_count(raw, x.raw()), Some(2));
        ctx.dispose();
        assert_eq!(engine.stats().refs_leaked, 0);
    }

    #[test]
    fn dispose_is_idempotent_and_balanced() {
        let (engine, ctx) = setup();
        let x = ctx.int_const("x").unwrap();
        let five = ctx.int(5).unwrap();
        let eq = ctx.eq(&x, &five).unwrap();
        let solver = ctx.solver().unwrap();
        solver.assert(&eq).unwrap();
        assert_eq!(ctx.child_count(), 1);

        ctx.dispose();
        ctx.dispose();
        assert!(ctx.is_disposed());
        assert_eq!(ctx.tracked_handle_count(), 0);
        assert_eq!(ctx.child_count(), 0);
        let stats = engine.stats();
        assert_eq!(stats.refs_leaked, 0);
        assert_eq!(stats.dec_ref_underflows, 0);
        assert_eq!(stats.engines_destroyed, 1);
    }

    #[test]
    fn drop_of_last_handle_finalizes() {
        let (engine, ctx) = setup();
        let clone = ctx.clone();
        ctx.int_const("x").unwrap();
        drop(ctx);
        assert_eq!(engine.live_engines(), 1);
        drop(clone);
        assert_eq!(engine.live_engines(), 0);
        assert_eq!(engine.stats().refs_leaked, 0);
    }

    #[test]
    fn null_solver_is_construction_failure() {
        let (engine, ctx) = setup();
        engine.inject(Fault::NullSolver);
        let err = ctx.solver().unwrap_err();
        assert_eq!(err, SolverError::ConstructionFailure("solver".to_string()));
        assert_eq!(ctx.child_count(), 0);
    }

    #[test]
    fn simple_solver_uses_simple_entry_point() {
        let (engine, ctx) = setup();
        let solver = ctx.simple_solver().unwrap();
        let raw = ctx.raw_engine().unwrap();
        assert_eq!(engine.is_simple_solver(raw, solver.raw()), Some(true));
    }

    #[test]
    fn dropping_child_unregisters_it() {
        let (_engine, ctx) = setup();
        let solver = ctx.solver().unwrap();
        let optimizer = ctx.optimizer().unwrap();
        assert_eq!(ctx.child_count(), 2);
        drop(solver);
        assert_eq!(ctx.child_count(), 1);
        optimizer.dispose();
        assert_eq!(ctx.child_count(), 0);
    }

    #[test]
    fn debug_shows_state() {
        let (_engine, ctx) = setup();
        let text = format!("{ctx:?}");
        assert!(text.contains("disposed: false"));
        assert!(text.contains("reference"));
    }
}
