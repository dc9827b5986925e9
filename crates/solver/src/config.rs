use crate::error::SolverError;

/// Environment variable holding a default engine timeout in milliseconds.
pub const TIMEOUT_ENV: &str = "SMTGUARD_TIMEOUT_MS";

/// Environment variable selecting the default for model completion.
pub const MODEL_COMPLETION_ENV: &str = "SMTGUARD_MODEL_COMPLETION";

/// Context configuration.
///
/// Engine parameters are applied to the native configuration object before
/// the engine is created. `model_completion` is a host-side setting: it is the
/// default used by [`Model::eval`](crate::Model::eval) when evaluating
/// constants the model does not assign.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextConfig {
    /// Native engine parameters, in the order they will be applied.
    pub params: Vec<(String, String)>,
    /// Default completion flag for model evaluation.
    pub model_completion: bool,
}

impl ContextConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an engine parameter, replacing an earlier value for the same name.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.params.push((name, value)),
        }
        self
    }

    /// Engine-wide timeout in milliseconds (0 = no timeout).
    pub fn with_timeout(self, timeout_ms: u64) -> Self {
        self.with_param("timeout", timeout_ms.to_string())
    }

    pub fn with_model_completion(mut self, enabled: bool) -> Self {
        self.model_completion = enabled;
        self
    }

    /// Enable proof generation.
    pub fn with_proofs(self, enabled: bool) -> Self {
        self.with_param("proof", enabled.to_string())
    }

    /// Value configured for `name`, if any.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Check that every parameter can cross the native boundary.
    pub fn validate(&self) -> Result<(), SolverError> {
        for (name, value) in &self.params {
            if name.is_empty() {
                return Err(SolverError::Argument("empty parameter name".to_string()));
            }
            if name.contains('\0') || value.contains('\0') {
                return Err(SolverError::Argument(format!(
                    "parameter '{}' contains an interior NUL byte",
                    name.escape_debug()
                )));
            }
        }
        Ok(())
    }

    /// Build a config from `SMTGUARD_TIMEOUT_MS` and `SMTGUARD_MODEL_COMPLETION`.
    ///
    /// Unset variables leave the defaults in place; malformed values are an
    /// `Argument` error rather than silently ignored.
    pub fn from_env() -> Result<Self, SolverError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SolverError> {
        let mut config = Self::new();

        if let Some(raw) = lookup(TIMEOUT_ENV) {
            let timeout_ms = raw.trim().parse::<u64>().map_err(|_| {
                SolverError::Argument(format!("{TIMEOUT_ENV} must be an integer, got '{raw}'"))
            })?;
            config = config.with_timeout(timeout_ms);
        }

        if let Some(raw) = lookup(MODEL_COMPLETION_ENV) {
            let enabled = match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(SolverError::Argument(format!(
                        "{MODEL_COMPLETION_ENV} must be a boolean, got '{raw}'"
                    )));
                }
            };
            config = config.with_model_completion(enabled);
        }

        Ok(config)
    }
}
