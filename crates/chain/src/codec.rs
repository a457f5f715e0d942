//! Canonical-JSON message codec.
//!
//! Transaction messages arrive from the tx-service gateway as JSON
//! objects carrying an `@type` discriminator. The codec extracts the
//! type URL, collects the involved addresses, and unwraps
//! authorization-execute wrappers.

use harbor_core::error::{IndexerError, IndexerResult};
use harbor_core::ports::{DecodedMessage, MessageCodec};

/// Message codec over the gateway's canonical JSON encoding.
pub struct JsonMessageCodec {
    bech32_prefix: String,
}

impl JsonMessageCodec {
    pub fn new(bech32_prefix: impl Into<String>) -> Self {
        Self {
            bech32_prefix: bech32_prefix.into(),
        }
    }

    /// Collect address-shaped string values from a message body.
    ///
    /// Addresses appear either in the chain's bech32 form or as
    /// 0x + 40 hex chars; both are kept verbatim. Only the top level
    /// and one level of array nesting are scanned, matching where
    /// signers and recipients actually live in message schemas.
    fn collect_addresses(&self, value: &serde_json::Value) -> Vec<String> {
        let mut out = Vec::new();
        let Some(obj) = value.as_object() else {
            return out;
        };

        for (key, field) in obj {
            if key == "@type" {
                continue;
            }
            match field {
                serde_json::Value::String(s) => {
                    if self.looks_like_address(s) && !out.contains(s) {
                        out.push(s.clone());
                    }
                }
                serde_json::Value::Array(items) => {
                    for item in items {
                        if let Some(s) = item.as_str() {
                            if self.looks_like_address(s) && !out.iter().any(|a| a == s) {
                                out.push(s.to_string());
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        out
    }

    fn looks_like_address(&self, s: &str) -> bool {
        if let Some(hex_part) = s.strip_prefix("0x") {
            return hex_part.len() == 40 && hex_part.chars().all(|c| c.is_ascii_hexdigit());
        }
        s.strip_prefix(self.bech32_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('1'))
            .map(|data| data.len() >= 38 && data.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or(false)
    }
}

impl MessageCodec for JsonMessageCodec {
    fn decode_message(&self, raw: &serde_json::Value) -> IndexerResult<DecodedMessage> {
        let type_url = raw
            .get("@type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| IndexerError::Decode("message has no @type discriminator".into()))?
            .trim_start_matches('/')
            .to_string();

        if type_url.is_empty() {
            return Err(IndexerError::Decode("message has an empty @type".into()));
        }

        Ok(DecodedMessage {
            involved_addresses: self.collect_addresses(raw),
            type_url,
            value: raw.clone(),
        })
    }

    fn decode_inner_messages(&self, exec: &DecodedMessage) -> IndexerResult<Vec<DecodedMessage>> {
        let msgs = exec
            .value
            .get("msgs")
            .and_then(|m| m.as_array())
            .ok_or_else(|| {
                IndexerError::Decode("authz exec wrapper carries no msgs array".into())
            })?;

        msgs.iter().map(|raw| self.decode_message(raw)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codec() -> JsonMessageCodec {
        JsonMessageCodec::new("cosmos")
    }

    #[test]
    fn decodes_type_url_and_addresses() {
        let raw = json!({
            "@type": "/bnbchain.greenfield.storage.MsgCreateBucket",
            "creator": "0x00000000000000000000000000000000deadbeef",
            "bucket_name": "photos",
            "primary_sp_approval": { "expired_height": "100" }
        });
        let msg = codec().decode_message(&raw).unwrap();

        assert_eq!(msg.type_url, "bnbchain.greenfield.storage.MsgCreateBucket");
        assert_eq!(
            msg.involved_addresses,
            vec!["0x00000000000000000000000000000000deadbeef".to_string()]
        );
        // bucket_name is not address-shaped
        assert!(!msg.involved_addresses.contains(&"photos".to_string()));
    }

    #[test]
    fn missing_type_is_a_decode_error() {
        let err = codec().decode_message(&json!({"creator": "x"})).unwrap_err();
        assert!(matches!(err, IndexerError::Decode(_)));
    }

    // Test critique: les messages internes d'un MsgExec sont décodés un
    // par un pour le hook AuthzMessage
    #[test]
    fn authz_exec_unwraps_inner_messages() {
        let raw = json!({
            "@type": "/cosmos.authz.v1beta1.MsgExec",
            "grantee": "0x1111111111111111111111111111111111111111",
            "msgs": [
                { "@type": "/bnbchain.greenfield.storage.MsgDeleteObject",
                  "operator": "0x2222222222222222222222222222222222222222" },
                { "@type": "/bnbchain.greenfield.storage.MsgDeleteBucket",
                  "operator": "0x2222222222222222222222222222222222222222" }
            ]
        });
        let exec = codec().decode_message(&raw).unwrap();
        assert!(exec.is_authz_exec());

        let inner = codec().decode_inner_messages(&exec).unwrap();
        assert_eq!(inner.len(), 2);
        assert_eq!(
            inner[0].type_url,
            "bnbchain.greenfield.storage.MsgDeleteObject"
        );
    }

    #[test]
    fn address_shapes() {
        let c = codec();
        assert!(c.looks_like_address("0x00000000000000000000000000000000deadbeef"));
        assert!(c.looks_like_address("cosmos1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu"));
        assert!(!c.looks_like_address("0xdeadbeef"));
        assert!(!c.looks_like_address("photos"));
        assert!(!c.looks_like_address("cosmos"));
    }
}
