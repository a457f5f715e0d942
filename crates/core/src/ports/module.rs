//! Module capability traits and registry.
//!
//! This is the main extensibility point of the indexer. A module is a
//! pluggable domain subsystem that owns its own tables and consumes a
//! subset of hooks. Capabilities are separate traits; a module
//! advertises the ones it implements through accessor methods on
//! [`Module`], each defaulting to `None`. The registry materializes
//! one slice per capability at registration time so hook sites walk
//! only the relevant modules without per-call probing.
//!
//! Dispatch policy: module hook errors are logged and swallowed so a
//! single failing module never aborts block ingestion. Persistence
//! owned by the engine itself does not go through modules and its
//! failures propagate.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, warn};

use crate::error::{IndexerResult, ModuleResult};
use crate::metrics::record_module_error;
use crate::models::{BlockHash, GenesisDoc, TxHash};
use crate::ports::{BlockResults, ChainBlock, ChainTx, DecodedMessage, Event, ValidatorSetEntry};
use crate::services::PeriodicScheduler;

// =============================================================================
// Capability traits
// =============================================================================

/// Creates or migrates the module-owned tables. Invoked once at
/// startup, before anything else; failures abort startup.
#[async_trait]
pub trait PrepareTables: Send + Sync {
    async fn prepare_tables(&self) -> ModuleResult<()>;
}

/// One-shot startup work, after table preparation.
#[async_trait]
pub trait AdditionalOperations: Send + Sync {
    async fn run_additional(&self) -> ModuleResult<()>;
}

/// A long-running task started at boot and expected to run until
/// shutdown is signaled.
#[async_trait]
pub trait AsyncOperations: Send + Sync {
    async fn run_async(&self, shutdown: tokio::sync::watch::Receiver<bool>) -> ModuleResult<()>;
}

/// Lets a module install wall-clock jobs on the shared scheduler.
pub trait PeriodicOperations: Send + Sync {
    fn register_periodic(&self, scheduler: &mut PeriodicScheduler);
}

/// Invoked once when the pipeline processes height 0.
#[async_trait]
pub trait GenesisHandler: Send + Sync {
    async fn handle_genesis(&self, doc: &GenesisDoc) -> ModuleResult<()>;
}

/// Invoked per block, after the block row is persisted.
#[async_trait]
pub trait BlockHandler: Send + Sync {
    async fn handle_block(
        &self,
        block: &ChainBlock,
        results: &BlockResults,
        txs: &[ChainTx],
        validators: &[ValidatorSetEntry],
    ) -> ModuleResult<()>;
}

/// Invoked for each transaction after its row is persisted.
#[async_trait]
pub trait TransactionHandler: Send + Sync {
    async fn handle_tx(&self, tx: &ChainTx) -> ModuleResult<()>;
}

/// Invoked for each decoded message within each transaction.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_msg(
        &self,
        index: usize,
        msg: &DecodedMessage,
        tx: &ChainTx,
    ) -> ModuleResult<()>;
}

/// Invoked for each message nested inside an authorization-execute
/// wrapper.
#[async_trait]
pub trait AuthzMessageHandler: Send + Sync {
    async fn handle_msg_exec(
        &self,
        outer_index: usize,
        exec: &DecodedMessage,
        inner_index: usize,
        inner: &DecodedMessage,
        tx: &ChainTx,
    ) -> ModuleResult<()>;
}

/// Block context handed to event handlers.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub height: u64,
    pub block_hash: BlockHash,
    pub timestamp: DateTime<Utc>,
    /// Hash of the transaction the event belongs to, when known.
    pub tx_hash: Option<TxHash>,
}

/// Invoked for each event produced by the block.
///
/// A handler owns a static set of event type URLs; events outside the
/// set must return without touching storage. The owned sets double as
/// the lightweight pipeline's inclusion map.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Event type URLs this module owns.
    fn owned_events(&self) -> &'static [&'static str];

    async fn handle_event(&self, ctx: &EventContext, event: &Event) -> ModuleResult<()>;

    /// Idempotency check against the module's own progress marker;
    /// when true the dispatcher skips this module for the height.
    async fn is_processed(&self, _height: u64) -> ModuleResult<bool> {
        Ok(false)
    }
}

// =============================================================================
// Module
// =============================================================================

/// A pluggable domain subsystem.
///
/// Implement the capability traits the module needs and return `self`
/// from the matching accessors.
pub trait Module: Send + Sync {
    /// Stable name, matched against `chain.modules` in configuration.
    fn name(&self) -> &'static str;

    fn prepare_tables(&self) -> Option<&dyn PrepareTables> {
        None
    }
    fn additional_operations(&self) -> Option<&dyn AdditionalOperations> {
        None
    }
    fn async_operations(&self) -> Option<&dyn AsyncOperations> {
        None
    }
    fn periodic_operations(&self) -> Option<&dyn PeriodicOperations> {
        None
    }
    fn genesis_handler(&self) -> Option<&dyn GenesisHandler> {
        None
    }
    fn block_handler(&self) -> Option<&dyn BlockHandler> {
        None
    }
    fn tx_handler(&self) -> Option<&dyn TransactionHandler> {
        None
    }
    fn msg_handler(&self) -> Option<&dyn MessageHandler> {
        None
    }
    fn msg_exec_handler(&self) -> Option<&dyn AuthzMessageHandler> {
        None
    }
    fn event_handler(&self) -> Option<&dyn EventHandler> {
        None
    }
}

/// Factory producing every module the build knows about; the registry
/// then keeps the enabled ones in configuration order.
pub trait Registrar: Send + Sync {
    fn build_modules(&self) -> Vec<Arc<dyn Module>>;
}

// =============================================================================
// Registry
// =============================================================================

/// Ordered set of enabled modules with per-capability slices.
///
/// Immutable after construction; the dispatcher holds no other state.
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn Module>>,
    genesis: Vec<Arc<dyn Module>>,
    block: Vec<Arc<dyn Module>>,
    tx: Vec<Arc<dyn Module>>,
    msg: Vec<Arc<dyn Module>>,
    msg_exec: Vec<Arc<dyn Module>>,
    event: Vec<Arc<dyn Module>>,
}

impl ModuleRegistry {
    /// Build the registry from a registrar's output, keeping only the
    /// modules named in `enabled` and preserving that order.
    pub fn build(registrar: &dyn Registrar, enabled: &[String]) -> Self {
        let available = registrar.build_modules();
        let mut modules = Vec::with_capacity(enabled.len());

        for name in enabled {
            match available.iter().find(|m| m.name() == name) {
                Some(module) => modules.push(module.clone()),
                None => warn!(module = %name, "Enabled module is unknown, skipping"),
            }
        }

        Self::from_modules(modules)
    }

    /// Build directly from an ordered module list (used by tests and
    /// one-shot commands).
    pub fn from_modules(modules: Vec<Arc<dyn Module>>) -> Self {
        fn slice(
            modules: &[Arc<dyn Module>],
            has: impl Fn(&dyn Module) -> bool,
        ) -> Vec<Arc<dyn Module>> {
            modules
                .iter()
                .filter(|m| has(m.as_ref()))
                .cloned()
                .collect()
        }

        Self {
            genesis: slice(&modules, |m| m.genesis_handler().is_some()),
            block: slice(&modules, |m| m.block_handler().is_some()),
            tx: slice(&modules, |m| m.tx_handler().is_some()),
            msg: slice(&modules, |m| m.msg_handler().is_some()),
            msg_exec: slice(&modules, |m| m.msg_exec_handler().is_some()),
            event: slice(&modules, |m| m.event_handler().is_some()),
            modules,
        }
    }

    /// All enabled modules, in dispatch order.
    pub fn all(&self) -> &[Arc<dyn Module>] {
        &self.modules
    }

    /// Modules with an event capability, in dispatch order.
    pub fn event_modules(&self) -> &[Arc<dyn Module>] {
        &self.event
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Union of all owned event sets: the lightweight pipeline's
    /// static inclusion map.
    pub fn processed_event_types(&self) -> HashSet<&'static str> {
        self.event
            .iter()
            .filter_map(|m| m.event_handler())
            .flat_map(|h| h.owned_events().iter().copied())
            .collect()
    }

    // -- startup walks -----------------------------------------------------

    /// Run every module's table preparation. Failures abort startup.
    pub async fn prepare_tables(&self) -> IndexerResult<()> {
        for module in &self.modules {
            if let Some(prep) = module.prepare_tables() {
                prep.prepare_tables().await?;
            }
        }
        Ok(())
    }

    /// Run every module's additional startup operations.
    pub async fn run_additional_operations(&self) -> IndexerResult<()> {
        for module in &self.modules {
            if let Some(ops) = module.additional_operations() {
                ops.run_additional().await?;
            }
        }
        Ok(())
    }

    /// Let every periodic module install its jobs.
    pub fn register_periodic_operations(&self, scheduler: &mut PeriodicScheduler) {
        for module in &self.modules {
            if let Some(ops) = module.periodic_operations() {
                ops.register_periodic(scheduler);
            }
        }
    }

    /// Modules that want their own long-running task.
    pub fn async_modules(&self) -> Vec<Arc<dyn Module>> {
        self.modules
            .iter()
            .filter(|m| m.async_operations().is_some())
            .cloned()
            .collect()
    }

    // -- per-height dispatch -----------------------------------------------

    pub async fn dispatch_genesis(&self, doc: &GenesisDoc) {
        for module in &self.genesis {
            if let Some(handler) = module.genesis_handler() {
                if let Err(e) = handler.handle_genesis(doc).await {
                    error!(module = module.name(), error = %e, "Genesis hook failed");
                    record_module_error("genesis", module.name());
                }
            }
        }
    }

    pub async fn dispatch_block(
        &self,
        block: &ChainBlock,
        results: &BlockResults,
        txs: &[ChainTx],
        validators: &[ValidatorSetEntry],
    ) {
        for module in &self.block {
            if let Some(handler) = module.block_handler() {
                if let Err(e) = handler.handle_block(block, results, txs, validators).await {
                    error!(
                        module = module.name(),
                        height = block.height,
                        error = %e,
                        "Block hook failed"
                    );
                    record_module_error("block", module.name());
                }
            }
        }
    }

    pub async fn dispatch_tx(&self, tx: &ChainTx) {
        for module in &self.tx {
            if let Some(handler) = module.tx_handler() {
                if let Err(e) = handler.handle_tx(tx).await {
                    error!(
                        module = module.name(),
                        height = tx.height,
                        error = %e,
                        "Tx hook failed"
                    );
                    record_module_error("tx", module.name());
                }
            }
        }
    }

    pub async fn dispatch_msg(&self, index: usize, msg: &DecodedMessage, tx: &ChainTx) {
        for module in &self.msg {
            if let Some(handler) = module.msg_handler() {
                if let Err(e) = handler.handle_msg(index, msg, tx).await {
                    error!(
                        module = module.name(),
                        msg_type = %msg.type_url,
                        error = %e,
                        "Msg hook failed"
                    );
                    record_module_error("msg", module.name());
                }
            }
        }
    }

    pub async fn dispatch_msg_exec(
        &self,
        outer_index: usize,
        exec: &DecodedMessage,
        inner_index: usize,
        inner: &DecodedMessage,
        tx: &ChainTx,
    ) {
        for module in &self.msg_exec {
            if let Some(handler) = module.msg_exec_handler() {
                if let Err(e) = handler
                    .handle_msg_exec(outer_index, exec, inner_index, inner, tx)
                    .await
                {
                    error!(
                        module = module.name(),
                        msg_type = %inner.type_url,
                        error = %e,
                        "MsgExec hook failed"
                    );
                    record_module_error("msg_exec", module.name());
                }
            }
        }
    }

    /// Event-capable modules that have not yet processed `height`
    /// according to their own idempotency marker. A failing check is
    /// treated as not-processed so the height is never silently lost.
    pub async fn event_modules_for_height(&self, height: u64) -> Vec<Arc<dyn Module>> {
        let mut pending = Vec::with_capacity(self.event.len());
        for module in &self.event {
            let handler = match module.event_handler() {
                Some(h) => h,
                None => continue,
            };
            match handler.is_processed(height).await {
                Ok(true) => {}
                Ok(false) => pending.push(module.clone()),
                Err(e) => {
                    warn!(module = module.name(), height, error = %e, "is_processed check failed");
                    pending.push(module.clone());
                }
            }
        }
        pending
    }

    /// Walk `modules` for one event, honoring each module's owned set.
    pub async fn dispatch_event(
        &self,
        modules: &[Arc<dyn Module>],
        ctx: &EventContext,
        event: &Event,
    ) {
        for module in modules {
            let handler = match module.event_handler() {
                Some(h) => h,
                None => continue,
            };
            if !handler.owned_events().contains(&event.type_url.as_str()) {
                continue;
            }
            if let Err(e) = handler.handle_event(ctx, event).await {
                error!(
                    module = module.name(),
                    height = ctx.height,
                    event = %event.type_url,
                    error = %e,
                    "Event hook failed"
                );
                record_module_error("event", module.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModule {
        name: &'static str,
        owned: &'static [&'static str],
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingModule {
        fn new(name: &'static str, owned: &'static [&'static str], fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                owned,
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    impl Module for CountingModule {
        fn name(&self) -> &'static str {
            self.name
        }
        fn event_handler(&self) -> Option<&dyn EventHandler> {
            Some(self)
        }
    }

    #[async_trait]
    impl EventHandler for CountingModule {
        fn owned_events(&self) -> &'static [&'static str] {
            self.owned
        }

        async fn handle_event(&self, _ctx: &EventContext, _event: &Event) -> ModuleResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(crate::error::ModuleError::Other("boom".into()));
            }
            Ok(())
        }
    }

    fn ctx() -> EventContext {
        EventContext {
            height: 50,
            block_hash: BlockHash([1; 32]),
            timestamp: Utc::now(),
            tx_hash: None,
        }
    }

    fn event(type_url: &str) -> Event {
        Event {
            type_url: type_url.to_string(),
            attributes: vec![],
        }
    }

    struct FixedRegistrar(Vec<Arc<dyn Module>>);
    impl Registrar for FixedRegistrar {
        fn build_modules(&self) -> Vec<Arc<dyn Module>> {
            self.0.clone()
        }
    }

    // Test critique: l'ordre de dispatch suit l'ordre de la configuration,
    // pas l'ordre du registrar
    #[test]
    fn test_registry_preserves_config_order() {
        let a = CountingModule::new("alpha", &[], false);
        let b = CountingModule::new("beta", &[], false);
        let registrar = FixedRegistrar(vec![a as Arc<dyn Module>, b as Arc<dyn Module>]);

        let registry = ModuleRegistry::build(
            &registrar,
            &["beta".to_string(), "alpha".to_string(), "ghost".to_string()],
        );

        let names: Vec<_> = registry.all().iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["beta", "alpha"]);
    }

    // Test critique: un événement hors du set possédé ne touche pas le module
    #[tokio::test]
    async fn test_owned_set_filters_dispatch() {
        let module = CountingModule::new("bucket", &["EventCreateBucket"], false);
        let registry = ModuleRegistry::from_modules(vec![module.clone() as Arc<dyn Module>]);

        let modules = registry.event_modules().to_vec();
        registry
            .dispatch_event(&modules, &ctx(), &event("EventCreateObject"))
            .await;
        assert_eq!(module.calls.load(Ordering::SeqCst), 0);

        registry
            .dispatch_event(&modules, &ctx(), &event("EventCreateBucket"))
            .await;
        assert_eq!(module.calls.load(Ordering::SeqCst), 1);
    }

    // Test critique: une erreur de module est avalée, les modules suivants
    // sont quand même invoqués
    #[tokio::test]
    async fn test_module_error_is_swallowed() {
        let failing = CountingModule::new("first", &["EventCreateBucket"], true);
        let second = CountingModule::new("second", &["EventCreateBucket"], false);
        let registry = ModuleRegistry::from_modules(vec![
            failing.clone() as Arc<dyn Module>,
            second.clone() as Arc<dyn Module>,
        ]);

        let modules = registry.event_modules().to_vec();
        registry
            .dispatch_event(&modules, &ctx(), &event("EventCreateBucket"))
            .await;

        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_processed_event_types_is_union() {
        let a = CountingModule::new("a", &["EventCreateBucket", "EventDeleteBucket"], false);
        let b = CountingModule::new("b", &["EventCreateObject"], false);
        let registry =
            ModuleRegistry::from_modules(vec![a as Arc<dyn Module>, b as Arc<dyn Module>]);

        let types = registry.processed_event_types();
        assert_eq!(types.len(), 3);
        assert!(types.contains("EventCreateObject"));
    }
}
