use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// Configuration for a [`Connector`](crate::Connector).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Most messages dispatched per readiness wake before yielding back to
    /// the reactor. `None` drains the pipe completely. Default: `None`.
    pub max_messages_per_wake: Option<NonZeroUsize>,
}

/// Configuration for a [`Connection`](crate::Connection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Settings for the underlying connector.
    pub connector: ConnectorConfig,
    /// Close the connection when an incoming message cannot be dispatched
    /// (bad header, unknown method, decode failure). Default: `true`.
    pub close_on_malformed_message: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connector: ConnectorConfig::default(),
            close_on_malformed_message: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_drain_fully_and_close_on_malformed() {
        let config = ConnectionConfig::default();
        assert!(config.close_on_malformed_message);
        assert_eq!(config.connector.max_messages_per_wake, None);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"connector":{"max_messages_per_wake":4}}"#).unwrap();
        assert_eq!(config.connector.max_messages_per_wake, NonZeroUsize::new(4));
        assert!(config.close_on_malformed_message);

        let config: ConnectionConfig =
            serde_json::from_str(r#"{"close_on_malformed_message":false}"#).unwrap();
        assert!(!config.close_on_malformed_message);
    }

    #[test]
    fn zero_cap_is_rejected() {
        let result: Result<ConnectorConfig, _> =
            serde_json::from_str(r#"{"max_messages_per_wake":0}"#);
        assert!(result.is_err());
    }
}
