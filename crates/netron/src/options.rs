use std::time::Duration;

use netron_common::{NetronError, Result, Value};

/// Default per-request window before a pending promise rejects with a
/// timeout error.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(180_000);

/// Construction options for a [`Netron`](crate::Netron) instance.
///
/// The options cross the wire during bootstrap (`netronGetConfig`), so they
/// convert to and from the tagged value model rather than relying on any
/// particular codec.
#[derive(Debug, Clone)]
pub struct NetronOptions {
    /// Identity of this netron's own peer. Generated when not given.
    pub id: Option<String>,
    /// Per-request timeout before rejection.
    pub response_timeout: Duration,
    /// When true, plain object values returned from context methods are
    /// auto-converted into remotable weak definitions instead of being
    /// serialized as data.
    pub proxify_contexts: bool,
}

impl Default for NetronOptions {
    fn default() -> Self {
        Self {
            id: None,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            proxify_contexts: false,
        }
    }
}

impl NetronOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_proxify_contexts(mut self, proxify: bool) -> Self {
        self.proxify_contexts = proxify;
        self
    }

    pub fn to_value(&self) -> Value {
        Value::object([
            (
                "responseTimeout".to_string(),
                Value::Int(self.response_timeout.as_millis() as i64),
            ),
            (
                "proxifyContexts".to_string(),
                Value::Bool(self.proxify_contexts),
            ),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| NetronError::InvalidArgument("options must be an object".into()))?;
        let mut options = Self::default();
        if let Some(ms) = map.get("responseTimeout").and_then(Value::as_i64) {
            options.response_timeout = Duration::from_millis(ms.max(0) as u64);
        }
        if let Some(proxify) = map.get("proxifyContexts").and_then(Value::as_bool) {
            options.proxify_contexts = proxify;
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout_is_three_minutes() {
        assert_eq!(
            NetronOptions::default().response_timeout,
            Duration::from_secs(180)
        );
    }

    #[test]
    fn test_options_value_roundtrip() {
        let options = NetronOptions::new()
            .with_response_timeout(Duration::from_millis(2500))
            .with_proxify_contexts(true);
        let rebuilt = NetronOptions::from_value(&options.to_value()).unwrap();
        assert_eq!(rebuilt.response_timeout, Duration::from_millis(2500));
        assert!(rebuilt.proxify_contexts);
    }

    #[test]
    fn test_options_from_non_object_rejected() {
        assert!(NetronOptions::from_value(&Value::Int(1)).is_err());
    }
}
