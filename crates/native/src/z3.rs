//! Entry-point table bound to the system Z3 library through `z3-sys`.
//!
//! ## Requirements
//!
//! Z3 must be installed and linkable:
//! - macOS: `brew install z3`
//! - Ubuntu/Debian: `apt-get install libz3-dev`
//!
//! Contexts are created in reference-counting mode (`Z3_mk_context_rc`), so
//! every AST, solver, optimizer and model handed out here starts with a zero
//! count and must be incremented by the caller before the next API call.

use std::ffi::{CStr, c_char};

use z3_sys::*;

use crate::api::{ErrorCode, ErrorHandler, LBool, NativeApi, NativeError, SortKind};
use crate::handles::{RawAst, RawConfig, RawEngine, RawModel, RawOptimize, RawParams, RawSolver};

/// The Z3 C API as a [`NativeApi`] table.
#[derive(Debug, Default, Clone, Copy)]
pub struct Z3Api;

fn ctx(engine: RawEngine) -> Z3_context {
    engine.as_ptr().cast()
}

fn cfg(config: RawConfig) -> Z3_config {
    config.as_ptr().cast()
}

fn ast(a: RawAst) -> Z3_ast {
    a.as_ptr().cast()
}

// Z3 sorts are AST nodes; the conversion is a pointer identity.
fn sort(a: RawAst) -> Z3_sort {
    a.as_ptr().cast()
}

fn slv(s: RawSolver) -> Z3_solver {
    s.as_ptr().cast()
}

fn opt(o: RawOptimize) -> Z3_optimize {
    o.as_ptr().cast()
}

fn mdl(m: RawModel) -> Z3_model {
    m.as_ptr().cast()
}

fn prm(p: RawParams) -> Z3_params {
    p.as_ptr().cast()
}

/// The previous call left an error behind; later calls would clear it.
unsafe fn failed(c: Z3_context) -> bool {
    unsafe { Z3_get_error_code(c) as u32 != ErrorCode::OK.0 }
}

fn wrap_ast(a: Z3_ast) -> RawAst {
    RawAst::from_ptr(a.cast())
}

fn wrap_sort(s: Z3_sort) -> RawAst {
    RawAst::from_ptr(s.cast())
}

fn ptrs(args: &[RawAst]) -> Vec<Z3_ast> {
    args.iter().map(|a| ast(*a)).collect()
}

/// Copy a Z3-owned string before the next call can overwrite it.
unsafe fn owned(s: Z3_string) -> String {
    if s.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(s as *const c_char) }
        .to_string_lossy()
        .into_owned()
}

impl NativeApi for Z3Api {
    fn name(&self) -> &'static str {
        "z3"
    }

    unsafe fn mk_config(&self) -> RawConfig {
        RawConfig::from_ptr(unsafe { Z3_mk_config() }.cast())
    }

    unsafe fn del_config(&self, config: RawConfig) {
        unsafe { Z3_del_config(cfg(config)) }
    }

    unsafe fn config_set_param(&self, config: RawConfig, name: &CStr, value: &CStr) {
        unsafe { Z3_set_param_value(cfg(config), name.as_ptr(), value.as_ptr()) }
    }

    unsafe fn mk_engine(&self, config: RawConfig) -> RawEngine {
        RawEngine::from_ptr(unsafe { Z3_mk_context_rc(cfg(config)) }.cast())
    }

    unsafe fn del_engine(&self, engine: RawEngine) {
        unsafe { Z3_del_context(ctx(engine)) }
    }

    unsafe fn set_param(&self, engine: RawEngine, name: &CStr, value: &CStr) {
        unsafe { Z3_update_param_value(ctx(engine), name.as_ptr(), value.as_ptr()) }
    }

    unsafe fn last_error(&self, engine: RawEngine) -> Option<NativeError> {
        let code = unsafe { Z3_get_error_code(ctx(engine)) };
        let raw = code as u32;
        if raw == ErrorCode::OK.0 {
            return None;
        }
        let message = unsafe { owned(Z3_get_error_msg(ctx(engine), code)) };
        Some(NativeError {
            code: ErrorCode(raw),
            message,
        })
    }

    unsafe fn set_error_handler(&self, engine: RawEngine, handler: ErrorHandler) {
        // SAFETY: `RawEngine` is a transparent pointer and Z3's error code is
        // a `u32`-repr enum, so both signatures share one C ABI. The handler
        // only reads the code as an integer.
        let z3_handler: unsafe extern "C" fn(Z3_context, ErrorCode) =
            unsafe { std::mem::transmute::<ErrorHandler, _>(handler) };
        unsafe { Z3_set_error_handler(ctx(engine), Some(z3_handler)) }
    }

    unsafe fn inc_ref(&self, engine: RawEngine, a: RawAst) {
        unsafe { Z3_inc_ref(ctx(engine), ast(a)) }
    }

    unsafe fn dec_ref(&self, engine: RawEngine, a: RawAst) {
        unsafe { Z3_dec_ref(ctx(engine), ast(a)) }
    }

    unsafe fn mk_bool_sort(&self, engine: RawEngine) -> RawAst {
        wrap_sort(unsafe { Z3_mk_bool_sort(ctx(engine)) })
    }

    unsafe fn mk_int_sort(&self, engine: RawEngine) -> RawAst {
        wrap_sort(unsafe { Z3_mk_int_sort(ctx(engine)) })
    }

    unsafe fn mk_real_sort(&self, engine: RawEngine) -> RawAst {
        wrap_sort(unsafe { Z3_mk_real_sort(ctx(engine)) })
    }

    unsafe fn mk_bv_sort(&self, engine: RawEngine, width: u32) -> RawAst {
        wrap_sort(unsafe { Z3_mk_bv_sort(ctx(engine), width) })
    }

    unsafe fn mk_const(&self, engine: RawEngine, name: &CStr, s: RawAst) -> RawAst {
        let c = ctx(engine);
        unsafe {
            let symbol = Z3_mk_string_symbol(c, name.as_ptr());
            if failed(c) {
                return RawAst::null();
            }
            wrap_ast(Z3_mk_const(c, symbol, sort(s)))
        }
    }

    unsafe fn mk_numeral(&self, engine: RawEngine, numeral: &CStr, s: RawAst) -> RawAst {
        wrap_ast(unsafe { Z3_mk_numeral(ctx(engine), numeral.as_ptr(), sort(s)) })
    }

    unsafe fn mk_bool(&self, engine: RawEngine, value: bool) -> RawAst {
        let c = ctx(engine);
        wrap_ast(unsafe {
            if value {
                Z3_mk_true(c)
            } else {
                Z3_mk_false(c)
            }
        })
    }

    unsafe fn mk_eq(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst {
        wrap_ast(unsafe { Z3_mk_eq(ctx(engine), ast(lhs), ast(rhs)) })
    }

    unsafe fn mk_not(&self, engine: RawEngine, arg: RawAst) -> RawAst {
        wrap_ast(unsafe { Z3_mk_not(ctx(engine), ast(arg)) })
    }

    unsafe fn mk_and(&self, engine: RawEngine, args: &[RawAst]) -> RawAst {
        let args = ptrs(args);
        wrap_ast(unsafe { Z3_mk_and(ctx(engine), args.len() as u32, args.as_ptr()) })
    }

    unsafe fn mk_or(&self, engine: RawEngine, args: &[RawAst]) -> RawAst {
        let args = ptrs(args);
        wrap_ast(unsafe { Z3_mk_or(ctx(engine), args.len() as u32, args.as_ptr()) })
    }

    unsafe fn mk_add(&self, engine: RawEngine, args: &[RawAst]) -> RawAst {
        let args = ptrs(args);
        wrap_ast(unsafe { Z3_mk_add(ctx(engine), args.len() as u32, args.as_ptr()) })
    }

    unsafe fn mk_le(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst {
        wrap_ast(unsafe { Z3_mk_le(ctx(engine), ast(lhs), ast(rhs)) })
    }

    unsafe fn mk_lt(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst {
        wrap_ast(unsafe { Z3_mk_lt(ctx(engine), ast(lhs), ast(rhs)) })
    }

    unsafe fn mk_ge(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst {
        wrap_ast(unsafe { Z3_mk_ge(ctx(engine), ast(lhs), ast(rhs)) })
    }

    unsafe fn mk_bvadd(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst {
        wrap_ast(unsafe { Z3_mk_bvadd(ctx(engine), ast(lhs), ast(rhs)) })
    }

    unsafe fn mk_bvult(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst {
        wrap_ast(unsafe { Z3_mk_bvult(ctx(engine), ast(lhs), ast(rhs)) })
    }

    unsafe fn mk_forall(&self, engine: RawEngine, bound: &[RawAst], body: RawAst) -> RawAst {
        let c = ctx(engine);
        unsafe {
            let mut apps: Vec<Z3_app> = Vec::with_capacity(bound.len());
            for b in bound {
                apps.push(Z3_to_app(c, ast(*b)));
                if failed(c) {
                    return RawAst::null();
                }
            }
            wrap_ast(Z3_mk_forall_const(
                c,
                0,
                apps.len() as u32,
                apps.as_ptr(),
                0,
                std::ptr::null(),
                ast(body),
            ))
        }
    }

    unsafe fn sort_of(&self, engine: RawEngine, a: RawAst) -> RawAst {
        wrap_sort(unsafe { Z3_get_sort(ctx(engine), ast(a)) })
    }

    unsafe fn sort_kind(&self, engine: RawEngine, s: RawAst) -> SortKind {
        let c = ctx(engine);
        unsafe {
            let kind = Z3_get_sort_kind(c, sort(s));
            if failed(c) {
                return SortKind::Other;
            }
            match kind {
                z3_sys::SortKind::Bool => SortKind::Bool,
                z3_sys::SortKind::Int => SortKind::Int,
                z3_sys::SortKind::Real => SortKind::Real,
                z3_sys::SortKind::BV => SortKind::BitVec,
                z3_sys::SortKind::FloatingPoint => SortKind::FloatingPoint,
                // Strings are sequences of characters; each follow-up query
                // is the last call on its path.
                z3_sys::SortKind::Seq => {
                    if Z3_is_string_sort(c, sort(s)) as i32 != 0 {
                        SortKind::String
                    } else {
                        SortKind::Other
                    }
                }
                _ if owned(Z3_sort_to_string(c, sort(s))) == "Char" => SortKind::Char,
                _ => SortKind::Other,
            }
        }
    }

    unsafe fn bv_size(&self, engine: RawEngine, s: RawAst) -> u32 {
        unsafe { Z3_get_bv_sort_size(ctx(engine), sort(s)) }
    }

    unsafe fn is_numeral(&self, engine: RawEngine, a: RawAst) -> bool {
        unsafe { Z3_is_numeral_ast(ctx(engine), ast(a)) as i32 != 0 }
    }

    unsafe fn numeral_string(&self, engine: RawEngine, a: RawAst) -> String {
        unsafe { owned(Z3_get_numeral_string(ctx(engine), ast(a))) }
    }

    unsafe fn bool_value(&self, engine: RawEngine, a: RawAst) -> LBool {
        LBool::from_raw(unsafe { Z3_get_bool_value(ctx(engine), ast(a)) } as i32)
    }

    unsafe fn is_string(&self, engine: RawEngine, a: RawAst) -> bool {
        unsafe { Z3_is_string(ctx(engine), ast(a)) as i32 != 0 }
    }

    unsafe fn string_value(&self, engine: RawEngine, a: RawAst) -> String {
        unsafe { owned(Z3_get_string(ctx(engine), ast(a))) }
    }

    unsafe fn ast_to_string(&self, engine: RawEngine, a: RawAst) -> String {
        unsafe { owned(Z3_ast_to_string(ctx(engine), ast(a))) }
    }

    unsafe fn mk_solver(&self, engine: RawEngine) -> RawSolver {
        RawSolver::from_ptr(unsafe { Z3_mk_solver(ctx(engine)) }.cast())
    }

    unsafe fn mk_simple_solver(&self, engine: RawEngine) -> RawSolver {
        RawSolver::from_ptr(unsafe { Z3_mk_simple_solver(ctx(engine)) }.cast())
    }

    unsafe fn solver_inc_ref(&self, engine: RawEngine, s: RawSolver) {
        unsafe { Z3_solver_inc_ref(ctx(engine), slv(s)) }
    }

    unsafe fn solver_dec_ref(&self, engine: RawEngine, s: RawSolver) {
        unsafe { Z3_solver_dec_ref(ctx(engine), slv(s)) }
    }

    unsafe fn solver_assert(&self, engine: RawEngine, s: RawSolver, constraint: RawAst) {
        unsafe { Z3_solver_assert(ctx(engine), slv(s), ast(constraint)) }
    }

    unsafe fn solver_check(&self, engine: RawEngine, s: RawSolver) -> LBool {
        LBool::from_raw(unsafe { Z3_solver_check(ctx(engine), slv(s)) } as i32)
    }

    unsafe fn solver_push(&self, engine: RawEngine, s: RawSolver) {
        unsafe { Z3_solver_push(ctx(engine), slv(s)) }
    }

    unsafe fn solver_pop(&self, engine: RawEngine, s: RawSolver, n: u32) {
        unsafe { Z3_solver_pop(ctx(engine), slv(s), n) }
    }

    unsafe fn solver_reset(&self, engine: RawEngine, s: RawSolver) {
        unsafe { Z3_solver_reset(ctx(engine), slv(s)) }
    }

    unsafe fn solver_num_scopes(&self, engine: RawEngine, s: RawSolver) -> u32 {
        unsafe { Z3_solver_get_num_scopes(ctx(engine), slv(s)) }
    }

    unsafe fn solver_get_model(&self, engine: RawEngine, s: RawSolver) -> RawModel {
        RawModel::from_ptr(unsafe { Z3_solver_get_model(ctx(engine), slv(s)) }.cast())
    }

    unsafe fn solver_reason_unknown(&self, engine: RawEngine, s: RawSolver) -> String {
        unsafe { owned(Z3_solver_get_reason_unknown(ctx(engine), slv(s))) }
    }

    unsafe fn solver_set_params(&self, engine: RawEngine, s: RawSolver, p: RawParams) {
        unsafe { Z3_solver_set_params(ctx(engine), slv(s), prm(p)) }
    }

    unsafe fn solver_to_string(&self, engine: RawEngine, s: RawSolver) -> String {
        unsafe { owned(Z3_solver_to_string(ctx(engine), slv(s))) }
    }

    unsafe fn mk_params(&self, engine: RawEngine) -> RawParams {
        RawParams::from_ptr(unsafe { Z3_mk_params(ctx(engine)) }.cast())
    }

    unsafe fn params_inc_ref(&self, engine: RawEngine, p: RawParams) {
        unsafe { Z3_params_inc_ref(ctx(engine), prm(p)) }
    }

    unsafe fn params_dec_ref(&self, engine: RawEngine, p: RawParams) {
        unsafe { Z3_params_dec_ref(ctx(engine), prm(p)) }
    }

    unsafe fn params_set_uint(&self, engine: RawEngine, p: RawParams, name: &CStr, value: u32) {
        let c = ctx(engine);
        unsafe {
            let key = Z3_mk_string_symbol(c, name.as_ptr());
            if failed(c) {
                return;
            }
            Z3_params_set_uint(c, prm(p), key, value);
        }
    }

    unsafe fn mk_optimize(&self, engine: RawEngine) -> RawOptimize {
        RawOptimize::from_ptr(unsafe { Z3_mk_optimize(ctx(engine)) }.cast())
    }

    unsafe fn optimize_inc_ref(&self, engine: RawEngine, o: RawOptimize) {
        unsafe { Z3_optimize_inc_ref(ctx(engine), opt(o)) }
    }

    unsafe fn optimize_dec_ref(&self, engine: RawEngine, o: RawOptimize) {
        unsafe { Z3_optimize_dec_ref(ctx(engine), opt(o)) }
    }

    unsafe fn optimize_assert(&self, engine: RawEngine, o: RawOptimize, constraint: RawAst) {
        unsafe { Z3_optimize_assert(ctx(engine), opt(o), ast(constraint)) }
    }

    unsafe fn optimize_check(&self, engine: RawEngine, o: RawOptimize) -> LBool {
        LBool::from_raw(
            unsafe { Z3_optimize_check(ctx(engine), opt(o), 0, std::ptr::null()) } as i32,
        )
    }

    unsafe fn optimize_push(&self, engine: RawEngine, o: RawOptimize) {
        unsafe { Z3_optimize_push(ctx(engine), opt(o)) }
    }

    unsafe fn optimize_pop(&self, engine: RawEngine, o: RawOptimize) {
        unsafe { Z3_optimize_pop(ctx(engine), opt(o)) }
    }

    unsafe fn optimize_maximize(&self, engine: RawEngine, o: RawOptimize, term: RawAst) -> u32 {
        unsafe { Z3_optimize_maximize(ctx(engine), opt(o), ast(term)) }
    }

    unsafe fn optimize_minimize(&self, engine: RawEngine, o: RawOptimize, term: RawAst) -> u32 {
        unsafe { Z3_optimize_minimize(ctx(engine), opt(o), ast(term)) }
    }

    unsafe fn optimize_upper(&self, engine: RawEngine, o: RawOptimize, index: u32) -> RawAst {
        wrap_ast(unsafe { Z3_optimize_get_upper(ctx(engine), opt(o), index) })
    }

    unsafe fn optimize_lower(&self, engine: RawEngine, o: RawOptimize, index: u32) -> RawAst {
        wrap_ast(unsafe { Z3_optimize_get_lower(ctx(engine), opt(o), index) })
    }

    unsafe fn optimize_get_model(&self, engine: RawEngine, o: RawOptimize) -> RawModel {
        RawModel::from_ptr(unsafe { Z3_optimize_get_model(ctx(engine), opt(o)) }.cast())
    }

    unsafe fn optimize_reason_unknown(&self, engine: RawEngine, o: RawOptimize) -> String {
        unsafe { owned(Z3_optimize_get_reason_unknown(ctx(engine), opt(o))) }
    }

    unsafe fn model_inc_ref(&self, engine: RawEngine, m: RawModel) {
        unsafe { Z3_model_inc_ref(ctx(engine), mdl(m)) }
    }

    unsafe fn model_dec_ref(&self, engine: RawEngine, m: RawModel) {
        unsafe { Z3_model_dec_ref(ctx(engine), mdl(m)) }
    }

    unsafe fn model_eval(
        &self,
        engine: RawEngine,
        m: RawModel,
        a: RawAst,
        completion: bool,
    ) -> Option<RawAst> {
        let mut out: Z3_ast = std::ptr::null_mut();
        let ok = unsafe { Z3_model_eval(ctx(engine), mdl(m), ast(a), completion.into(), &mut out) };
        if ok as i32 != 0 && !out.is_null() {
            Some(wrap_ast(out))
        } else {
            None
        }
    }

    unsafe fn model_to_string(&self, engine: RawEngine, m: RawModel) -> String {
        unsafe { owned(Z3_model_to_string(ctx(engine), mdl(m))) }
    }
}
