//! Message protocol and framing.
//!
//! Defines the wire format for coordinator ↔ client traffic. Every message
//! travels as a [`MessageEnvelope`] whose payload is a postcard-encoded
//! struct matching the envelope's [`MessageType`]. Parameter tensors cross
//! the wire as [`EncodedParameters`]: an explicit shape table plus flat
//! row-major data per layer, validated on decode.

use serde::{Deserialize, Serialize};

use fed_loom_core::metrics::Metrics;
use fed_loom_core::{ClientId, ParameterSet, RoundId};

use crate::{Error, Result};

/// Sender id used by the coordinator in request envelopes.
pub const COORDINATOR_ID: ClientId = ClientId::new(0);

/// Message envelope for all federation traffic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Protocol version (major, minor)
    pub version: (u8, u8),
    /// Message type discriminator
    pub message_type: MessageType,
    /// Sender id (0 = coordinator)
    pub sender: u64,
    /// Round this message belongs to (0 when not round-scoped)
    pub round: u64,
    /// Payload bytes, postcard-encoded per `message_type`
    pub payload: Vec<u8>,
}

impl MessageEnvelope {
    /// Current protocol version
    pub const CURRENT_VERSION: (u8, u8) = (0, 1);

    /// Create a new envelope.
    pub fn new(sender: ClientId, message_type: MessageType, payload: Vec<u8>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            message_type,
            sender: sender.as_u64(),
            round: 0,
            payload,
        }
    }

    /// Scope the envelope to a round.
    pub fn with_round(mut self, round: RoundId) -> Self {
        self.round = round.0;
        self
    }

    /// Serialize the envelope to bytes.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Deserialize an envelope from bytes and check the protocol version.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let envelope: Self = postcard::from_bytes(bytes)?;
        envelope.check_version()?;
        Ok(envelope)
    }

    /// Reject envelopes from an incompatible protocol major version.
    pub fn check_version(&self) -> Result<()> {
        if self.version.0 != Self::CURRENT_VERSION.0 {
            return Err(Error::UnsupportedVersion {
                major: self.version.0,
                minor: self.version.1,
            });
        }
        Ok(())
    }

    /// Decode the payload as `T`, verifying the envelope's type first.
    pub fn expect<T: for<'de> Deserialize<'de>>(&self, expected: MessageType) -> Result<T> {
        if self.message_type == MessageType::Error {
            let reply: ErrorReply = postcard::from_bytes(&self.payload)?;
            return Err(Error::Rejected(reply.message));
        }
        if self.message_type != expected {
            return Err(Error::UnexpectedMessage(self.message_type));
        }
        Ok(postcard::from_bytes(&self.payload)?)
    }
}

/// Message type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Request the client's current parameters
    GetParameters = 0x01,
    /// Parameters reply
    Parameters = 0x02,
    /// Train on local data with the attached parameters
    FitInstruction = 0x03,
    /// Training result
    FitResult = 0x04,
    /// Evaluate the attached parameters on local data
    EvaluateInstruction = 0x05,
    /// Evaluation result
    EvaluateResult = 0x06,
    /// Error/rejection notification
    Error = 0xFF,
}

/// Parameter tensors in wire form: shape table plus flat row-major data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedParameters {
    /// Per-layer shapes, in architecture order
    pub shapes: Vec<Vec<usize>>,
    /// Per-layer values, row-major
    pub data: Vec<Vec<f32>>,
}

impl EncodedParameters {
    /// Encode a parameter set for the wire.
    pub fn from_params(params: &ParameterSet) -> Result<Self> {
        let data = params
            .layer_slices()
            .map_err(Error::Core)?
            .into_iter()
            .map(<[f32]>::to_vec)
            .collect();
        Ok(Self {
            shapes: params.shapes(),
            data,
        })
    }

    /// Rebuild the parameter set, validating element counts against shapes.
    pub fn decode(&self) -> Result<ParameterSet> {
        Ok(ParameterSet::from_flat_layers(
            &self.shapes,
            self.data.clone(),
        )?)
    }

    /// Total number of scalar values carried.
    pub fn element_count(&self) -> usize {
        self.data.iter().map(Vec::len).sum()
    }

    /// Serialize to bytes (parameter snapshots, wire payloads).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Fit request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitInstruction {
    /// Round being trained
    pub round: u64,
    /// Number of local epochs to run
    pub local_epochs: u32,
    /// Free-form per-round configuration values
    pub config: Metrics,
    /// Global parameters to start from
    pub parameters: EncodedParameters,
}

/// Fit reply payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Locally trained parameters
    pub parameters: EncodedParameters,
    /// Number of local samples trained on
    pub sample_count: u64,
    /// Training metrics
    pub metrics: Metrics,
}

/// Evaluate request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateInstruction {
    /// Round being evaluated
    pub round: u64,
    /// Free-form per-round configuration values
    pub config: Metrics,
    /// Parameters to evaluate
    pub parameters: EncodedParameters,
}

/// Evaluate reply payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateResult {
    /// Mean loss over the client's evaluation set
    pub loss: f64,
    /// Number of samples evaluated
    pub sample_count: u64,
    /// Additional evaluation metrics
    pub metrics: Metrics,
}

/// Error reply payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Human-readable cause
    pub message: String,
}

/// Parameters reply payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParametersReply {
    /// The client's current parameters
    pub parameters: EncodedParameters,
}
