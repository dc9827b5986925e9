//! # smtguard-native
//!
//! The raw foreign surface of an SMT engine, expressed as a table of
//! `unsafe` entry points ([`NativeApi`]) over opaque handles.
//!
//! Nothing in this crate checks error state or manages reference counts;
//! that discipline belongs to the `smtguard` crate. Two tables are provided:
//!
//! - [`z3::Z3Api`] (feature `z3-native`): the system Z3 library via `z3-sys`.
//! - [`reference::ReferenceEngine`] (feature `reference-engine`): a small
//!   deterministic in-process engine with lifetime accounting, for tests.

pub mod api;
pub mod handles;

#[cfg(feature = "reference-engine")]
pub mod reference;
#[cfg(feature = "z3-native")]
pub mod z3;

pub use api::{ErrorCode, ErrorHandler, LBool, NativeApi, NativeError, SortKind};
pub use handles::{RawAst, RawConfig, RawEngine, RawModel, RawOptimize, RawParams, RawSolver};
