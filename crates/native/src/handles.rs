//! Opaque raw handles handed out by the native engine.
//!
//! These are plain pointer-sized identities. They are never dereferenced on
//! the host side; ownership and reference counting live one layer up.

use std::ffi::c_void;
use std::fmt;

macro_rules! raw_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(*mut c_void);

        impl $name {
            /// The null sentinel.
            pub const fn null() -> Self {
                Self(std::ptr::null_mut())
            }

            /// Wrap a pointer returned by the engine.
            pub const fn from_ptr(ptr: *mut c_void) -> Self {
                Self(ptr)
            }

            /// Build a handle from a plain integer identity.
            ///
            /// Only in-process engines that never dereference their handles
            /// should use this.
            pub fn from_id(id: usize) -> Self {
                Self(id as *mut c_void)
            }

            pub const fn as_ptr(self) -> *mut c_void {
                self.0
            }

            pub fn id(self) -> usize {
                self.0 as usize
            }

            pub fn is_null(self) -> bool {
                self.0.is_null()
            }

            /// `None` for the null sentinel.
            pub fn non_null(self) -> Option<Self> {
                if self.is_null() { None } else { Some(self) }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.id())
            }
        }

        // SAFETY: the wrapped pointer is an opaque identity that is never
        // dereferenced by host code. Thread affinity of the objects behind it
        // is enforced by the owning wrappers, which are `!Send`.
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}
    };
}

raw_handle!(
    /// Native configuration object consumed by engine construction.
    RawConfig
);
raw_handle!(
    /// One native engine instance (a solving session).
    RawEngine
);
raw_handle!(
    /// Expression, sort, or declaration node.
    RawAst
);
raw_handle!(
    /// Native incremental solver.
    RawSolver
);
raw_handle!(
    /// Native optimization context.
    RawOptimize
);
raw_handle!(
    /// Native model (satisfying assignment).
    RawModel
);
raw_handle!(
    /// Native parameter set applied to a solver.
    RawParams
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sentinel() {
        assert!(RawAst::null().is_null());
        assert_eq!(RawAst::null().non_null(), None);
        assert_eq!(RawAst::null(), RawAst::from_ptr(std::ptr::null_mut()));
    }

    #[test]
    fn identity_roundtrip() {
        let h = RawSolver::from_id(42);
        assert!(!h.is_null());
        assert_eq!(h.id(), 42);
        assert_eq!(h.non_null(), Some(h));
        assert_eq!(format!("{h:?}"), "RawSolver(0x2a)");
    }

    #[test]
    fn equality_is_pointer_identity() {
        assert_eq!(RawAst::from_id(7), RawAst::from_id(7));
        assert_ne!(RawAst::from_id(7), RawAst::from_id(8));
    }
}
