//! Shared setup for integration tests.

use std::sync::{Arc, Once};

use smtguard::{Context, ContextConfig};
use smtguard_native::reference::ReferenceEngine;

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness. `RUST_LOG` filters it.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A fresh reference engine and one context on it.
pub fn reference_context() -> (Arc<ReferenceEngine>, Context) {
    reference_context_with(ContextConfig::new())
}

pub fn reference_context_with(config: ContextConfig) -> (Arc<ReferenceEngine>, Context) {
    init_tracing();
    let engine = Arc::new(ReferenceEngine::new());
    let ctx = Context::new(engine.clone(), config).expect("reference context");
    (engine, ctx)
}

/// Every increment the binding issued has been matched by one decrement.
#[allow(dead_code)]
pub fn assert_balanced(engine: &ReferenceEngine) {
    let stats = engine.stats();
    assert_eq!(engine.live_engines(), 0, "engine still live: {stats:?}");
    assert_eq!(engine.live_configs(), 0, "config still live: {stats:?}");
    assert_eq!(engine.outstanding_refs(), 0, "outstanding refs: {stats:?}");
    assert_eq!(stats.refs_leaked, 0, "leaked refs: {stats:?}");
    assert_eq!(stats.dec_ref_underflows, 0, "underflows: {stats:?}");
    assert_eq!(stats.freed_handle_uses, 0, "freed handle uses: {stats:?}");
    assert_eq!(stats.invalid_destroys, 0, "invalid destroys: {stats:?}");
}
