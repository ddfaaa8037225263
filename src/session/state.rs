//! # Session State Machine
//!
//! Tagged states of one device session and the transition function that
//! moves between them. The function is pure; the session actor feeds it
//! stimuli and acts on the returned [`Outcome`].
//!
//! ```text
//! Disconnected --PortOpened--> Discovering --Identified--> Active
//!                                  |                        |  ^
//!                        DiscoveryExhausted     ConfigurationSent  Stored/Rejected/timeout
//!                                  v                        v  |
//!                            DiscoveryFailed            Configuring
//! ```

use thiserror::Error;

use crate::protocol::{ConfigErrorReason, EncodeError, Identity};

/// Configuration push awaiting acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightConfig {
    pub config_id: u32,
    pub total_parts: u8,
    /// Number of times the parts have been sent, starting at 1
    pub attempts: u32,
}

/// State of one device session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Discovering,
    DiscoveryFailed {
        attempts: u32,
    },
    Configuring {
        identity: Identity,
        in_flight: InFlightConfig,
    },
    Active {
        identity: Identity,
        /// Configuration known to be stored on the device
        config_id: Option<u32>,
    },
}

impl SessionState {
    /// Identity of the connected device, once discovered
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Configuring { identity, .. } | SessionState::Active { identity, .. } => Some(identity),
            _ => None,
        }
    }

    /// True while the device is identified and heartbeats are exchanged
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.identity().is_some()
    }

    /// Configuration known to be stored on the device
    #[must_use]
    pub fn stored_config_id(&self) -> Option<u32> {
        match self {
            SessionState::Active { config_id, .. } => *config_id,
            _ => None,
        }
    }

    /// Applies `stimulus`, returning the next state and what happened.
    ///
    /// Stimuli that make no sense in the current state leave it unchanged and
    /// yield [`Outcome::Ignored`].
    #[must_use]
    pub fn on(self, stimulus: Stimulus) -> (SessionState, Outcome) {
        use SessionState::*;

        match (self, stimulus) {
            (_, Stimulus::Disconnected) => (Disconnected, Outcome::Moved),

            (Disconnected, Stimulus::PortOpened) => (Discovering, Outcome::Moved),

            (DiscoveryFailed { .. } | Configuring { .. } | Active { .. }, Stimulus::Rediscover) => {
                (Discovering, Outcome::Moved)
            }

            (Discovering, Stimulus::Identified(identity)) => {
                // Zero means the device holds no configuration
                let config_id = (identity.config_id != 0).then_some(identity.config_id);
                (Active { identity, config_id }, Outcome::Moved)
            }

            (Discovering, Stimulus::DiscoveryExhausted { attempts }) => {
                (DiscoveryFailed { attempts }, Outcome::Moved)
            }

            (
                Active { identity, .. } | Configuring { identity, .. },
                Stimulus::ConfigurationSent { config_id, total_parts },
            ) => {
                let in_flight = InFlightConfig {
                    config_id,
                    total_parts,
                    attempts: 1,
                };
                (Configuring { identity, in_flight }, Outcome::Moved)
            }

            (Configuring { identity, in_flight }, Stimulus::Stored { config_id }) => {
                if config_id != in_flight.config_id {
                    return (Configuring { identity, in_flight }, Outcome::Ignored);
                }
                let state = Active {
                    identity,
                    config_id: Some(config_id),
                };
                (state, Outcome::Applied { config_id })
            }

            (Configuring { identity, in_flight }, Stimulus::Rejected { config_id, reason }) => {
                if config_id != in_flight.config_id {
                    return (Configuring { identity, in_flight }, Outcome::Ignored);
                }
                let state = Active {
                    identity,
                    config_id: None,
                };
                (state, Outcome::Failed(ConfigureFailure::Rejected(reason)))
            }

            (Configuring { identity, mut in_flight }, Stimulus::ConfigureTimedOut { retries }) => {
                if in_flight.attempts <= retries {
                    in_flight.attempts += 1;
                    let attempt = in_flight.attempts;
                    return (Configuring { identity, in_flight }, Outcome::Retry { attempt });
                }
                let failure = ConfigureFailure::Timeout {
                    attempts: in_flight.attempts,
                };
                let state = Active {
                    identity,
                    config_id: None,
                };
                (state, Outcome::Failed(failure))
            }

            (state, _) => (state, Outcome::Ignored),
        }
    }
}

/// Inputs to the transition function
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stimulus {
    PortOpened,
    Rediscover,
    Identified(Identity),
    DiscoveryExhausted { attempts: u32 },
    ConfigurationSent { config_id: u32, total_parts: u8 },
    Stored { config_id: u32 },
    Rejected { config_id: u32, reason: ConfigErrorReason },
    /// No acknowledgement in time; `retries` resends are allowed
    ConfigureTimedOut { retries: u32 },
    Disconnected,
}

/// Result of a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Moved,
    /// Stale, foreign or out-of-place stimulus; state unchanged
    Ignored,
    /// The in-flight configuration was acknowledged
    Applied { config_id: u32 },
    /// The in-flight configuration must be resent
    Retry { attempt: u32 },
    Failed(ConfigureFailure),
}

/// Why a configuration push did not take effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigureFailure {
    #[error("device rejected configuration: {0}")]
    Rejected(ConfigErrorReason),

    #[error("no acknowledgement after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// Never sent: the configuration does not encode
    #[error("configuration is invalid: {0}")]
    Invalid(EncodeError),
}
