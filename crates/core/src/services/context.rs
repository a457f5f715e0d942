//! Shared, read-only context threaded through producers, workers and
//! pipelines.
//!
//! Everything here is constructed once at startup and never mutated
//! afterwards; there is no process-wide configuration singleton.

use std::sync::Arc;

use crate::config::ParsingConfig;
use crate::ports::{ChainSource, MessageCodec, ModuleRegistry, Repository};

/// Immutable wiring handed to every ingestion task.
pub struct ParserContext {
    /// Ingestion settings.
    pub parsing: ParsingConfig,
    /// Identifier of the connected chain, resolved at startup.
    pub chain_id: String,
    /// Chain node port.
    pub source: Arc<dyn ChainSource>,
    /// Engine-owned persistence port.
    pub repository: Arc<dyn Repository>,
    /// Message codec.
    pub codec: Arc<dyn MessageCodec>,
    /// Ordered, enabled modules.
    pub registry: Arc<ModuleRegistry>,
}

impl ParserContext {
    pub fn new(
        parsing: ParsingConfig,
        chain_id: String,
        source: Arc<dyn ChainSource>,
        repository: Arc<dyn Repository>,
        codec: Arc<dyn MessageCodec>,
        registry: Arc<ModuleRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            parsing,
            chain_id,
            source,
            repository,
            codec,
            registry,
        })
    }
}
