use crate::config::RateLimitSettings;
use crate::error::{AdmissionError, ConfigError};
use crate::rate_limit::{ClientRegistry, Decision};
use std::sync::Arc;

/// Admission decision consulted once per inbound request.
///
/// Clones share the registry and the on/off switch.
#[derive(Debug, Clone)]
pub struct RateLimitGate {
    registry: Arc<ClientRegistry>,
}

impl RateLimitGate {
    /// Gate backed by `registry`; the switch is the registry's `enabled` setting.
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Decide whether `client` may proceed.
    ///
    /// With rate limiting disabled this returns [`Decision::Bypassed`] without
    /// touching the registry. Otherwise a missing or empty identity is an error,
    /// never a silent allow or deny.
    pub fn check(&self, client: Option<&str>) -> Result<Decision, AdmissionError> {
        if !self.is_enabled() {
            return Ok(Decision::Bypassed);
        }
        match client {
            Some(id) if !id.is_empty() => Ok(self.registry.admit(id)),
            _ => Err(AdmissionError::MissingIdentity),
        }
    }

    /// Whether checks currently consult the registry.
    pub fn is_enabled(&self) -> bool {
        self.registry.settings().enabled
    }

    /// Flip the global switch at runtime.
    ///
    /// Fails only if the registry was built with settings that do not validate.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), ConfigError> {
        self.registry.update_settings(|s| RateLimitSettings { enabled, ..s.clone() })
    }

    /// The registry behind this gate.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }
}
