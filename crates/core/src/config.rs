//! Configuration for the coordinator engine and client facade

use crate::error::{Result, SignalError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables shared by the engine and the facade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Seconds a facade waits for a coordinator reply (registration ack,
    /// peer list, offer ack) before giving up
    pub connect_timeout_secs: u64,

    /// Seconds an offer may sit unanswered before the session times out
    pub negotiation_timeout_secs: u64,

    /// Capacity of each coordinator→peer frame queue
    pub channel_capacity: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            negotiation_timeout_secs: 30,
            channel_capacity: 128,
        }
    }
}

impl SignalingConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_secs == 0 {
            return Err(SignalError::InvalidConfig(
                "connect_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.negotiation_timeout_secs == 0 {
            return Err(SignalError::InvalidConfig(
                "negotiation_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(SignalError::InvalidConfig(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Reply deadline as a [`Duration`]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Negotiation deadline as a [`Duration`]
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }
}
