//! # FedLoom Network
//!
//! Wire contract and client transport for FedLoom.
//!
//! This crate provides:
//! - The coordinator ↔ client message protocol (postcard-framed envelopes)
//! - The async [`traits::ClientProxy`] seam the coordinator drives
//! - An in-process channel transport for tests and simulations
//! - A scriptable mock client for unit tests
//!
//! The protocol assumes a reliable, already-connected transport; framing
//! carries no authentication or replay protection.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channel;
pub mod protocol;
pub mod traits;

mod mock;
pub use mock::MockClient;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::channel::{spawn_channel_client, ChannelClient, ClientApp, FitOutput};
    pub use crate::protocol::{EncodedParameters, MessageEnvelope, MessageType};
    pub use crate::traits::{ClientPool, ClientProxy, EvaluateConfig, FitConfig};
    pub use crate::{Error, Result};
}

/// Result type for network operations
pub type Result<T> = std::result::Result<T, Error>;

/// Network error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The client did not answer within the configured deadline.
    #[error("request timed out")]
    Timeout,

    /// The transport to the client is gone.
    #[error("channel closed")]
    ChannelClosed,

    /// Envelope or payload (de)serialization failed.
    #[error("codec error: {0}")]
    Codec(#[from] postcard::Error),

    /// The peer speaks an incompatible protocol version.
    #[error("unsupported protocol version {major}.{minor}")]
    UnsupportedVersion {
        /// Major version received
        major: u8,
        /// Minor version received
        minor: u8,
    },

    /// The peer answered with a message type the caller did not ask for.
    #[error("unexpected message type {0:?}")]
    UnexpectedMessage(crate::protocol::MessageType),

    /// The client refused or failed the request and said why.
    #[error("client rejected request: {0}")]
    Rejected(String),

    /// A core-level contract violation surfaced at the wire boundary.
    #[error(transparent)]
    Core(#[from] fed_loom_core::Error),
}
