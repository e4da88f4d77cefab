//! Error types for the runtime module.

use std::fmt;

use game_shard_proto::TransportError;

use super::types::{EntityId, Tick};

/// Errors that can occur in world operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    Config {
        reason: String,
    },
    AlreadyStarted,
    Startup {
        reason: String,
    },
    InvalidStage {
        stage: String,
    },
    RegistrationClosed {
        what: String,
    },
    ComponentAlreadyRegistered {
        component: String,
    },
    ComponentNotRegistered {
        component: String,
    },
    SystemAlreadyRegistered {
        system: String,
    },
    System {
        system: String,
        reason: String,
    },
    EntityNotFound {
        entity: EntityId,
    },
    ComponentNotFound {
        entity: EntityId,
        component: String,
    },
    TickOutsideHistory {
        tick: Tick,
    },
    NonceAlreadyUsed {
        signer_address: String,
        nonce: u64,
    },
    Recovery {
        reason: String,
    },
    Router {
        reason: String,
    },
    Transport {
        message: String,
        retryable: bool,
    },
    Storage {
        reason: String,
    },
    Serde(String),
}

impl fmt::Display for WorldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorldError::Config { reason } => write!(f, "invalid world config: {}", reason),
            WorldError::AlreadyStarted => write!(f, "game has already been started"),
            WorldError::Startup { reason } => write!(f, "failed to start world: {}", reason),
            WorldError::InvalidStage { stage } => {
                write!(f, "world is not in a valid state to tick: {}", stage)
            }
            WorldError::RegistrationClosed { what } => {
                write!(f, "cannot register {} after the world has started", what)
            }
            WorldError::ComponentAlreadyRegistered { component } => {
                write!(f, "component already registered: {}", component)
            }
            WorldError::ComponentNotRegistered { component } => {
                write!(f, "component not registered: {}", component)
            }
            WorldError::SystemAlreadyRegistered { system } => {
                write!(f, "system already registered: {}", system)
            }
            WorldError::System { system, reason } => {
                write!(f, "system {} failed: {}", system, reason)
            }
            WorldError::EntityNotFound { entity } => write!(f, "entity not found: {}", entity),
            WorldError::ComponentNotFound { entity, component } => {
                write!(f, "entity {} has no component {}", entity, component)
            }
            WorldError::TickOutsideHistory { tick } => {
                write!(f, "tick {} is outside the receipt history window", tick)
            }
            WorldError::NonceAlreadyUsed {
                signer_address,
                nonce,
            } => write!(
                f,
                "nonce {} already used for signer {}",
                nonce, signer_address
            ),
            WorldError::Recovery { reason } => {
                write!(f, "failed to recover from base shard: {}", reason)
            }
            WorldError::Router { reason } => write!(f, "router error: {}", reason),
            WorldError::Transport { message, .. } => write!(f, "transport error: {}", message),
            WorldError::Storage { reason } => write!(f, "storage error: {}", reason),
            WorldError::Serde(reason) => write!(f, "serialization error: {}", reason),
        }
    }
}

impl std::error::Error for WorldError {}

impl From<serde_json::Error> for WorldError {
    fn from(error: serde_json::Error) -> Self {
        WorldError::Serde(error.to_string())
    }
}

impl From<TransportError> for WorldError {
    fn from(error: TransportError) -> Self {
        WorldError::Transport {
            message: error.message,
            retryable: error.retryable,
        }
    }
}
