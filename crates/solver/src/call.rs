//! The single call-then-check primitive and the engine's fault callback.
//!
//! The engine reports failures through per-engine error state that is only
//! meaningful until the next call on the same engine. [`invoke`] is the only
//! place that issues native calls on behalf of the safe layer, and it reads
//! that state immediately after the call returns.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use smtguard_native::{ErrorCode, NativeApi, RawEngine};

use crate::error::SolverError;

static NATIVE_FAULTS: AtomicU64 = AtomicU64::new(0);

/// Number of times any engine in this process invoked the fault callback.
pub fn native_fault_count() -> u64 {
    NATIVE_FAULTS.load(Ordering::Relaxed)
}

/// Fault callback registered on every engine at construction.
///
/// Runs on the engine's call stack, so it must not unwind: it records the
/// fault and returns. The engine leaves its error state set, and the
/// [`invoke`] that issued the failing call turns it into an error.
pub(crate) extern "C" fn safe_error_handler(engine: RawEngine, code: u32) {
    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
        NATIVE_FAULTS.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(?engine, code = %ErrorCode(code), "native engine reported a fault");
    }));
}

/// Perform one native call on `engine` and check the engine's error state.
///
/// `call` must issue at most one entry point on `engine`; nothing may run
/// between it and the error read.
pub(crate) fn invoke<T>(
    api: &dyn NativeApi,
    engine: RawEngine,
    call: impl FnOnce(&dyn NativeApi) -> T,
) -> Result<T, SolverError> {
    let value = call(api);
    // SAFETY: `engine` is live for the duration of the caller's borrow of
    // its context, and no other call has been issued since `call`.
    match unsafe { api.last_error(engine) } {
        Some(err) => {
            tracing::debug!(code = %err.code, message = %err.message, "native call failed");
            Err(err.into())
        }
        None => Ok(value),
    }
}
