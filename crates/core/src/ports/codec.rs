//! Port trait for the message codec.
//!
//! Transactions carry their messages as opaque canonical JSON; the
//! codec turns one element at a time into a [`DecodedMessage`] the
//! dispatcher can route on, and unwraps authorization-execute
//! wrappers into their inner messages. Decoding is per-message so a
//! single unknown message never fails the whole transaction.

use crate::error::IndexerResult;

/// Fully-qualified type URL of the authorization-execute wrapper.
pub const MSG_EXEC_TYPE_URL: &str = "cosmos.authz.v1beta1.MsgExec";

/// A message decoded out of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    /// Fully-qualified type URL.
    pub type_url: String,
    /// Message body as canonical JSON (without the discriminator).
    pub value: serde_json::Value,
    /// Addresses involved in the message.
    pub involved_addresses: Vec<String>,
}

impl DecodedMessage {
    /// Whether this message is an authorization-execute wrapper whose
    /// inner messages must also be dispatched.
    pub fn is_authz_exec(&self) -> bool {
        self.type_url == MSG_EXEC_TYPE_URL
    }
}

/// Port trait for message decoding.
pub trait MessageCodec: Send + Sync {
    /// Decode one raw message out of a transaction's message array.
    fn decode_message(&self, raw: &serde_json::Value) -> IndexerResult<DecodedMessage>;

    /// Decode the messages nested inside an authz-exec wrapper.
    fn decode_inner_messages(&self, exec: &DecodedMessage) -> IndexerResult<Vec<DecodedMessage>>;
}
