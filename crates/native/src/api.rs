//! The native entry-point table.
//!
//! `NativeApi` is the complete foreign surface the safe layer consumes. It
//! carries no logic: every method maps one-to-one onto an engine entry point
//! (a couple of composite setters aside), and nothing here checks errors or
//! counts references. How a table is located and bound is up to the caller.

use std::ffi::CStr;
use std::fmt;

use crate::handles::{RawAst, RawConfig, RawEngine, RawModel, RawOptimize, RawParams, RawSolver};

/// Callback the engine invokes on internal faults.
///
/// Implementations of this type run on the native call stack and must not
/// unwind.
pub type ErrorHandler = unsafe extern "C" fn(engine: RawEngine, code: u32);

/// Native error code, as reported by the engine's out-of-band error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const OK: ErrorCode = ErrorCode(0);
    pub const SORT_ERROR: ErrorCode = ErrorCode(1);
    pub const INDEX_OUT_OF_BOUNDS: ErrorCode = ErrorCode(2);
    pub const INVALID_ARG: ErrorCode = ErrorCode(3);
    pub const PARSER_ERROR: ErrorCode = ErrorCode(4);
    pub const NO_PARSER: ErrorCode = ErrorCode(5);
    pub const INVALID_PATTERN: ErrorCode = ErrorCode(6);
    pub const MEMOUT_FAIL: ErrorCode = ErrorCode(7);
    pub const FILE_ACCESS_ERROR: ErrorCode = ErrorCode(8);
    pub const INTERNAL_FATAL: ErrorCode = ErrorCode(9);
    pub const INVALID_USAGE: ErrorCode = ErrorCode(10);
    pub const DEC_REF_ERROR: ErrorCode = ErrorCode(11);
    pub const EXCEPTION: ErrorCode = ErrorCode(12);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    /// Symbolic name of a known code.
    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "OK",
            1 => "SORT_ERROR",
            2 => "IOB",
            3 => "INVALID_ARG",
            4 => "PARSER_ERROR",
            5 => "NO_PARSER",
            6 => "INVALID_PATTERN",
            7 => "MEMOUT_FAIL",
            8 => "FILE_ACCESS_ERROR",
            9 => "INTERNAL_FATAL",
            10 => "INVALID_USAGE",
            11 => "DEC_REF_ERROR",
            12 => "EXCEPTION",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// The engine's pending error: code plus the message fetched for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub code: ErrorCode,
    pub message: String,
}

/// Native three-valued result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LBool {
    False,
    Undef,
    True,
}

impl LBool {
    /// Map the engine's `-1 / 0 / 1` encoding.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            r if r < 0 => LBool::False,
            0 => LBool::Undef,
            _ => LBool::True,
        }
    }
}

/// Sort families the safe layer distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortKind {
    Bool,
    Int,
    Real,
    BitVec,
    FloatingPoint,
    String,
    Char,
    Other,
}

impl fmt::Display for SortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortKind::Bool => "Bool",
            SortKind::Int => "Int",
            SortKind::Real => "Real",
            SortKind::BitVec => "BitVec",
            SortKind::FloatingPoint => "FloatingPoint",
            SortKind::String => "String",
            SortKind::Char => "Char",
            SortKind::Other => "Other",
        };
        f.write_str(name)
    }
}

/// Bound entry-point table of a native SMT engine.
///
/// Sorts are exchanged as [`RawAst`] handles: the engine treats sorts as
/// AST nodes and reference counts them the same way.
///
/// # Safety
///
/// Every method is `unsafe` because it forwards raw handles across the
/// foreign boundary. Callers must pass handles that are live and that were
/// produced by the same `engine`, and must read [`NativeApi::last_error`]
/// before issuing another call on that engine if they care about the outcome.
///
/// An implementation that needs several foreign calls for one entry point
/// stops at the first one that fails, so the error it left is the one
/// `last_error` reads. Sequences that must release something on failure are
/// split into separate entry points instead.
pub trait NativeApi: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    // ---- configuration / engine ----

    unsafe fn mk_config(&self) -> RawConfig;
    unsafe fn del_config(&self, config: RawConfig);
    unsafe fn config_set_param(&self, config: RawConfig, name: &CStr, value: &CStr);
    unsafe fn mk_engine(&self, config: RawConfig) -> RawEngine;
    unsafe fn del_engine(&self, engine: RawEngine);
    unsafe fn set_param(&self, engine: RawEngine, name: &CStr, value: &CStr);

    // ---- error state ----

    /// Read the pending error code and, if non-OK, its message.
    unsafe fn last_error(&self, engine: RawEngine) -> Option<NativeError>;
    unsafe fn set_error_handler(&self, engine: RawEngine, handler: ErrorHandler);

    // ---- reference counting ----

    unsafe fn inc_ref(&self, engine: RawEngine, ast: RawAst);
    unsafe fn dec_ref(&self, engine: RawEngine, ast: RawAst);

    // ---- term construction ----

    unsafe fn mk_bool_sort(&self, engine: RawEngine) -> RawAst;
    unsafe fn mk_int_sort(&self, engine: RawEngine) -> RawAst;
    unsafe fn mk_real_sort(&self, engine: RawEngine) -> RawAst;
    unsafe fn mk_bv_sort(&self, engine: RawEngine, width: u32) -> RawAst;
    unsafe fn mk_const(&self, engine: RawEngine, name: &CStr, sort: RawAst) -> RawAst;
    unsafe fn mk_numeral(&self, engine: RawEngine, numeral: &CStr, sort: RawAst) -> RawAst;
    unsafe fn mk_bool(&self, engine: RawEngine, value: bool) -> RawAst;
    unsafe fn mk_eq(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst;
    unsafe fn mk_not(&self, engine: RawEngine, arg: RawAst) -> RawAst;
    unsafe fn mk_and(&self, engine: RawEngine, args: &[RawAst]) -> RawAst;
    unsafe fn mk_or(&self, engine: RawEngine, args: &[RawAst]) -> RawAst;
    unsafe fn mk_add(&self, engine: RawEngine, args: &[RawAst]) -> RawAst;
    unsafe fn mk_le(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst;
    unsafe fn mk_lt(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst;
    unsafe fn mk_ge(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst;
    unsafe fn mk_bvadd(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst;
    unsafe fn mk_bvult(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst;
    /// Universal quantifier over the given constants.
    unsafe fn mk_forall(&self, engine: RawEngine, bound: &[RawAst], body: RawAst) -> RawAst;

    // ---- introspection ----

    unsafe fn sort_of(&self, engine: RawEngine, ast: RawAst) -> RawAst;
    unsafe fn sort_kind(&self, engine: RawEngine, sort: RawAst) -> SortKind;
    unsafe fn bv_size(&self, engine: RawEngine, sort: RawAst) -> u32;
    unsafe fn is_numeral(&self, engine: RawEngine, ast: RawAst) -> bool;
    unsafe fn numeral_string(&self, engine: RawEngine, ast: RawAst) -> String;
    unsafe fn bool_value(&self, engine: RawEngine, ast: RawAst) -> LBool;
    unsafe fn is_string(&self, engine: RawEngine, ast: RawAst) -> bool;
    unsafe fn string_value(&self, engine: RawEngine, ast: RawAst) -> String;
    unsafe fn ast_to_string(&self, engine: RawEngine, ast: RawAst) -> String;

    // ---- solver ----

    unsafe fn mk_solver(&self, engine: RawEngine) -> RawSolver;
    unsafe fn mk_simple_solver(&self, engine: RawEngine) -> RawSolver;
    unsafe fn solver_inc_ref(&self, engine: RawEngine, solver: RawSolver);
    unsafe fn solver_dec_ref(&self, engine: RawEngine, solver: RawSolver);
    unsafe fn solver_assert(&self, engine: RawEngine, solver: RawSolver, constraint: RawAst);
    unsafe fn solver_check(&self, engine: RawEngine, solver: RawSolver) -> LBool;
    unsafe fn solver_push(&self, engine: RawEngine, solver: RawSolver);
    unsafe fn solver_pop(&self, engine: RawEngine, solver: RawSolver, n: u32);
    unsafe fn solver_reset(&self, engine: RawEngine, solver: RawSolver);
    unsafe fn solver_num_scopes(&self, engine: RawEngine, solver: RawSolver) -> u32;
    unsafe fn solver_get_model(&self, engine: RawEngine, solver: RawSolver) -> RawModel;
    unsafe fn solver_reason_unknown(&self, engine: RawEngine, solver: RawSolver) -> String;
    /// Apply a parameter set. Unknown parameter names are reported here.
    unsafe fn solver_set_params(&self, engine: RawEngine, solver: RawSolver, params: RawParams);
    unsafe fn solver_to_string(&self, engine: RawEngine, solver: RawSolver) -> String;

    // ---- parameter sets ----

    unsafe fn mk_params(&self, engine: RawEngine) -> RawParams;
    unsafe fn params_inc_ref(&self, engine: RawEngine, params: RawParams);
    unsafe fn params_dec_ref(&self, engine: RawEngine, params: RawParams);
    unsafe fn params_set_uint(&self, engine: RawEngine, params: RawParams, name: &CStr, value: u32);

    // ---- optimizer ----

    unsafe fn mk_optimize(&self, engine: RawEngine) -> RawOptimize;
    unsafe fn optimize_inc_ref(&self, engine: RawEngine, opt: RawOptimize);
    unsafe fn optimize_dec_ref(&self, engine: RawEngine, opt: RawOptimize);
    unsafe fn optimize_assert(&self, engine: RawEngine, opt: RawOptimize, constraint: RawAst);
    unsafe fn optimize_check(&self, engine: RawEngine, opt: RawOptimize) -> LBool;
    unsafe fn optimize_push(&self, engine: RawEngine, opt: RawOptimize);
    unsafe fn optimize_pop(&self, engine: RawEngine, opt: RawOptimize);
    unsafe fn optimize_maximize(&self, engine: RawEngine, opt: RawOptimize, term: RawAst) -> u32;
    unsafe fn optimize_minimize(&self, engine: RawEngine, opt: RawOptimize, term: RawAst) -> u32;
    unsafe fn optimize_upper(&self, engine: RawEngine, opt: RawOptimize, index: u32) -> RawAst;
    unsafe fn optimize_lower(&self, engine: RawEngine, opt: RawOptimize, index: u32) -> RawAst;
    unsafe fn optimize_get_model(&self, engine: RawEngine, opt: RawOptimize) -> RawModel;
    unsafe fn optimize_reason_unknown(&self, engine: RawEngine, opt: RawOptimize) -> String;

    // ---- model ----

    unsafe fn model_inc_ref(&self, engine: RawEngine, model: RawModel);
    unsafe fn model_dec_ref(&self, engine: RawEngine, model: RawModel);
    /// Evaluate `ast` under `model`. `None` when the engine refuses.
    unsafe fn model_eval(
        &self,
        engine: RawEngine,
        model: RawModel,
        ast: RawAst,
        completion: bool,
    ) -> Option<RawAst>;
    unsafe fn model_to_string(&self, engine: RawEngine, model: RawModel) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lbool_mapping() {
        assert_eq!(LBool::from_raw(-1), LBool::False);
        assert_eq!(LBool::from_raw(0), LBool::Undef);
        assert_eq!(LBool::from_raw(1), LBool::True);
    }

    #[test]
    fn error_code_names() {
        assert!(ErrorCode::OK.is_ok());
        assert!(!ErrorCode::INVALID_ARG.is_ok());
        assert_eq!(ErrorCode::INVALID_ARG.to_string(), "INVALID_ARG (3)");
        assert_eq!(ErrorCode(99).name(), "UNKNOWN");
    }
}
