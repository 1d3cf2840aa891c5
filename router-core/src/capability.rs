//! The capability registry: command names are an open-ended, adapter-
//! owned catalog. The router itself never branches on `name` — this
//! registry lives at the Tool Adapter Surface boundary and is consulted
//! only there, before a `submit` is ever constructed.

use std::time::Duration;

use fnv::FnvHashMap;
use serde_json::Value;

use crate::error::RouterError;

/// Validates a command's arguments and reports the default deadline to
/// use when the caller didn't specify one. Implementors live in the
/// adapter crate/binary, not in the router core.
pub trait ArgumentValidator: Send + Sync {
    fn validate(&self, payload: &Value) -> Result<(), RouterError>;
}

/// One entry in the registry: how to validate a command's arguments and
/// what default deadline fits its nature (short for a click, long for a
/// navigation-and-snapshot).
pub struct Capability {
    pub default_deadline: Duration,
    pub validator: Box<dyn ArgumentValidator>,
}

/// A closure-backed validator for the common case where validation is a
/// short, stateless function.
pub struct FnValidator<F>(pub F)
where
    F: Fn(&Value) -> Result<(), RouterError> + Send + Sync;

impl<F> ArgumentValidator for FnValidator<F>
where
    F: Fn(&Value) -> Result<(), RouterError> + Send + Sync,
{
    fn validate(&self, payload: &Value) -> Result<(), RouterError> {
        (self.0)(payload)
    }
}

/// A validator that accepts anything. Used for commands whose adapter
/// doesn't need argument-shape checks, or in tests.
pub struct AnyValidator;

impl ArgumentValidator for AnyValidator {
    fn validate(&self, _payload: &Value) -> Result<(), RouterError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: FnvHashMap<String, Capability>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, capability: Capability) {
        self.capabilities.insert(name.into(), capability);
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.capabilities.get(name)
    }

    pub fn default_deadline_for(&self, name: &str, fallback: Duration) -> Duration {
        self.capabilities
            .get(name)
            .map(|c| c.default_deadline)
            .unwrap_or(fallback)
    }

    pub fn validate(&self, name: &str, payload: &Value) -> Result<(), RouterError> {
        match self.capabilities.get(name) {
            Some(capability) => capability.validator.validate(payload),
            // An unregistered name is still dispatched; the router is
            // agnostic to `name` and the extension is the final judge of
            // whether it recognizes a command.
            None => Ok(()),
        }
    }
}

/// A registry covering the commands named in the envelope contract and
/// the internally issued `createTab`, with deadlines roughly matching
/// how expensive each operation tends to be.
pub fn default_registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(
        "createTab",
        Capability {
            default_deadline: Duration::from_secs(10),
            validator: Box::new(AnyValidator),
        },
    );
    registry.register(
        "navigate",
        Capability {
            default_deadline: Duration::from_secs(30),
            validator: Box::new(FnValidator(|payload: &Value| {
                if payload.get("url").and_then(Value::as_str).is_some() {
                    Ok(())
                } else {
                    Err(RouterError::InvalidArgument("navigate requires a string \"url\" field".to_string()))
                }
            })),
        },
    );
    registry.register(
        "click",
        Capability {
            default_deadline: Duration::from_secs(5),
            validator: Box::new(AnyValidator),
        },
    );
    registry.register(
        "type",
        Capability {
            default_deadline: Duration::from_secs(5),
            validator: Box::new(AnyValidator),
        },
    );
    registry.register(
        "snapshot",
        Capability {
            default_deadline: Duration::from_secs(15),
            validator: Box::new(AnyValidator),
        },
    );
    registry.register(
        "executeScript",
        Capability {
            default_deadline: Duration::from_secs(15),
            validator: Box::new(AnyValidator),
        },
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_name_still_validates_and_uses_fallback_deadline() {
        let registry = default_registry();
        assert!(registry.validate("someFutureCommand", &serde_json::json!({})).is_ok());
        assert_eq!(
            registry.default_deadline_for("someFutureCommand", Duration::from_secs(7)),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn navigate_requires_a_url() {
        let registry = default_registry();
        assert!(registry.validate("navigate", &serde_json::json!({})).is_err());
        assert!(registry
            .validate("navigate", &serde_json::json!({"url": "https://example.com"}))
            .is_ok());
    }

    #[test]
    fn click_has_a_short_default_deadline() {
        let registry = default_registry();
        assert_eq!(
            registry.default_deadline_for("click", Duration::from_secs(99)),
            Duration::from_secs(5)
        );
    }
}
