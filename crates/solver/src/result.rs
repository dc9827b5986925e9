use std::fmt;

use smtguard_native::LBool;

/// Outcome of a satisfiability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckResult {
    /// No model exists (the negated goal is PROVED).
    Unsatisfiable,
    /// The engine gave up (timeout, resource limit, incompleteness).
    Unknown,
    /// A model exists.
    Satisfiable,
}

impl CheckResult {
    pub fn is_sat(&self) -> bool {
        matches!(self, CheckResult::Satisfiable)
    }

    pub fn is_unsat(&self) -> bool {
        matches!(self, CheckResult::Unsatisfiable)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, CheckResult::Unknown)
    }
}

impl From<LBool> for CheckResult {
    fn from(value: LBool) -> Self {
        match value {
            LBool::False => CheckResult::Unsatisfiable,
            LBool::Undef => CheckResult::Unknown,
            LBool::True => CheckResult::Satisfiable,
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckResult::Unsatisfiable => write!(f, "UNSATISFIABLE"),
            CheckResult::Unknown => write!(f, "UNKNOWN"),
            CheckResult::Satisfiable => write!(f, "SATISFIABLE"),
        }
    }
}
