//! Chain node adapter for the Harbor indexer.
//!
//! This crate implements the `harbor-core` ports against a
//! Tendermint-style node:
//!
//! - [`HttpChainSource`] - block, block-results, txs and validators
//!   over HTTP JSON-RPC, new-block notifications over WebSocket
//! - [`JsonMessageCodec`] - canonical-JSON message decoding,
//!   including authz-exec unwrapping
//! - [`events`] - the closed-world typed-event codec used by the
//!   domain modules

pub mod client;
pub mod codec;
pub mod events;
mod types;

pub use client::{ChainClientConfig, HttpChainSource};
pub use codec::JsonMessageCodec;
pub use events::TypedEvent;
