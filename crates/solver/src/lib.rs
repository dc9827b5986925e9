//! # smtguard
//!
//! Safe resource-lifecycle layer over a native SMT engine.
//!
//! A [`Context`] owns one engine instance and everything allocated against
//! it. Expressions are reference-counted handles tracked by their context;
//! [`Solver`]s and [`Optimizer`]s are children that the context disposes
//! before it releases its own handles; [`Model`]s are invalidated whenever
//! their producer changes. Every native call goes through one wrapper that
//! turns the engine's out-of-band error state into a [`SolverError`].
//!
//! The engine itself is any [`NativeApi`] implementation: the system Z3
//! library behind the `z3-native` feature, or the in-process reference
//! engine of `smtguard-native`.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use smtguard::{CheckResult, Context, ContextConfig};
//! use smtguard_native::reference::ReferenceEngine;
//!
//! let ctx = Context::new(Arc::new(ReferenceEngine::new()), ContextConfig::new()).unwrap();
//! let x = ctx.int_const("x").unwrap();
//! let solver = ctx.solver().unwrap();
//! solver.assert(&ctx.eq(&x, &ctx.int(5).unwrap()).unwrap()).unwrap();
//!
//! if solver.check().unwrap() == CheckResult::Satisfiable {
//!     let model = solver.model().unwrap();
//!     println!("x = {}", model.int_value(&x).unwrap());
//! }
//! ctx.dispose();
//! ```

pub mod call;
pub mod config;
pub mod context;
pub mod error;
mod literal;
pub mod model;
pub mod optimizer;
pub mod result;
pub mod scope;
pub mod solver;
pub mod terms;

// Re-export primary types for ergonomic use
pub use call::native_fault_count;
pub use config::ContextConfig;
pub use context::Context;
pub use error::{ObjectKind, SolverError};
pub use model::Model;
pub use optimizer::{ObjectiveId, Optimizer};
pub use result::CheckResult;
pub use scope::ScopeGuard;
pub use solver::Solver;
pub use terms::Ast;

pub use smtguard_native::{
    ErrorCode, NativeApi, RawAst, RawConfig, RawEngine, RawModel, RawOptimize, RawSolver, SortKind,
};
