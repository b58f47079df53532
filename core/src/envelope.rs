//! Message envelope and wire codec.
//!
//! Every command and event on the bus travels inside an [`Envelope`]: a JSON
//! frame carrying identity (`message_id`), saga membership
//! (`correlation_id`), routing (`kind`), schema version, timestamps, and the
//! payload itself.
//!
//! # Design
//!
//! The wire format is JSON. Decoders ignore unknown fields (serde's
//! default), which gives forward compatibility: a peer may add optional
//! fields without breaking older consumers. `message_id` is fresh per
//! message; `correlation_id` is preserved unchanged across every message of
//! one saga.
//!
//! Timestamps follow two conventions, one per field class:
//! `emitted_at`/`ingested_at` are unix milliseconds; business dates inside
//! payloads are ISO-8601 UTC (`chrono` default).
//!
//! # Example
//!
//! ```
//! use partnerflow_core::envelope::{CorrelationId, Envelope, Message};
//! use serde::{Serialize, Deserialize};
//! use chrono::Utc;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Ping { seq: u64 }
//!
//! impl Message for Ping {
//!     const KIND: &'static str = "Ping";
//! }
//!
//! # fn example() -> Result<(), partnerflow_core::envelope::CodecError> {
//! let envelope = Envelope::enclose(&Ping { seq: 7 }, CorrelationId::new(), "tests", Utc::now())?;
//! assert_eq!(envelope.kind, "Ping");
//! let ping: Ping = envelope.open()?;
//! assert_eq!(ping.seq, 7);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Wire schema version stamped on every envelope.
pub const SPEC_VERSION: &str = "1.0";

/// Errors produced while encoding or decoding envelopes and payloads.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The payload could not be serialized to JSON.
    #[error("failed to encode payload for kind '{kind}': {reason}")]
    Encode {
        /// Message kind being encoded.
        kind: String,
        /// Underlying serializer error.
        reason: String,
    },

    /// The payload could not be deserialized into the expected type.
    #[error("failed to decode payload for kind '{kind}': {reason}")]
    Decode {
        /// Message kind being decoded.
        kind: String,
        /// Underlying deserializer error.
        reason: String,
    },

    /// The envelope kind does not match the requested message type.
    #[error("kind mismatch: envelope carries '{actual}', expected '{expected}'")]
    KindMismatch {
        /// Kind found on the envelope.
        actual: String,
        /// Kind the caller asked for.
        expected: &'static str,
    },

    /// The envelope kind is not part of the topic's catalog.
    #[error("unknown message kind '{kind}' on topic '{topic}'")]
    UnknownKind {
        /// Kind found on the envelope.
        kind: String,
        /// Topic the envelope arrived on.
        topic: &'static str,
    },

    /// The raw bytes were not a valid envelope frame.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// Identifier stamped on every message belonging to one saga instance.
///
/// Minted once by the admission front, propagated unchanged by every worker
/// onto every outbound event derived from an inbound command. The
/// coordinator never mints correlation ids; it only consumes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Mint a fresh correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing uuid.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying uuid.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier of a single message; fresh per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Mint a fresh message id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing uuid.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying uuid.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A payload type with a stable wire kind.
///
/// Every command and event in the catalog implements this. The kind string
/// is stored on the envelope and used for routing; it never changes once a
/// schema is published (schema evolution happens through optional fields,
/// not renames).
pub trait Message {
    /// Stable wire identifier for this message type (e.g. `"CampaignCreated"`).
    const KIND: &'static str;
}

/// The wire frame every bus message travels in.
///
/// See the module docs for field conventions. `ingested_at` is `None` on the
/// producer side and stamped by the consumer on receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique id of this message; fresh per message.
    pub message_id: MessageId,
    /// Saga instance this message belongs to.
    pub correlation_id: CorrelationId,
    /// Wire kind of the payload (routing key into the topic's catalog).
    pub kind: String,
    /// Envelope schema version.
    pub spec_version: String,
    /// Producer-side timestamp, unix milliseconds.
    pub emitted_at: i64,
    /// Consumer-side timestamp, unix milliseconds; stamped on receipt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingested_at: Option<i64>,
    /// Logical name of the producing service.
    pub source_service: String,
    /// The message payload, JSON-encoded.
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Wrap a payload in a fresh envelope.
    ///
    /// Mints a new `message_id`; the caller supplies the saga's
    /// `correlation_id` (preserved across the whole saga) and the emit time.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the payload cannot be serialized.
    pub fn enclose<M: Message + Serialize>(
        message: &M,
        correlation_id: CorrelationId,
        source_service: &str,
        emitted_at: DateTime<Utc>,
    ) -> Result<Self, CodecError> {
        let payload = serde_json::to_value(message).map_err(|e| CodecError::Encode {
            kind: M::KIND.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            message_id: MessageId::new(),
            correlation_id,
            kind: M::KIND.to_string(),
            spec_version: SPEC_VERSION.to_string(),
            emitted_at: emitted_at.timestamp_millis(),
            ingested_at: None,
            source_service: source_service.to_string(),
            payload,
        })
    }

    /// Decode the payload as `M`, checking the envelope kind first.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::KindMismatch`] if the envelope carries a
    /// different kind, or [`CodecError::Decode`] if the payload does not
    /// deserialize. Unknown fields in the payload are ignored.
    pub fn open<M: Message + DeserializeOwned>(&self) -> Result<M, CodecError> {
        if self.kind != M::KIND {
            return Err(CodecError::KindMismatch {
                actual: self.kind.clone(),
                expected: M::KIND,
            });
        }
        serde_json::from_value(self.payload.clone()).map_err(|e| CodecError::Decode {
            kind: self.kind.clone(),
            reason: e.to_string(),
        })
    }

    /// Serialize the whole frame to bytes for the bus.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::Encode {
            kind: self.kind.clone(),
            reason: e.to_string(),
        })
    }

    /// Parse a frame received from the bus.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedEnvelope`] if the bytes are not a
    /// valid envelope frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::MalformedEnvelope(e.to_string()))
    }

    /// Stamp the consumer-side receipt time.
    pub fn stamp_ingested(&mut self, at: DateTime<Utc>) {
        self.ingested_at = Some(at.timestamp_millis());
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope {{ kind: {}, correlation: {}, message: {} }}",
            self.kind, self.correlation_id, self.message_id
        )
    }
}
