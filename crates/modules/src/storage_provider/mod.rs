//! Storage-provider module.
//!
//! Projects storage-provider registration and edits into the
//! `storage_providers` table, and imports the initial provider set
//! from the genesis application state.

pub mod storage;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use harbor_chain::events::{
    self, TypedEvent, EVENT_CREATE_STORAGE_PROVIDER, EVENT_EDIT_STORAGE_PROVIDER,
};
use harbor_core::error::ModuleResult;
use harbor_core::models::GenesisDoc;
use harbor_core::ports::{
    Event, EventContext, EventHandler, GenesisHandler, Module, PrepareTables,
};
use harbor_storage::Database;

use crate::util::{parse_decimal, parse_i64, require_id, RowMeta};

pub use storage::{PgStorageProviderStorage, StorageProvider, StorageProviderStorage};

const OWNED_EVENTS: &[&str] = &[EVENT_CREATE_STORAGE_PROVIDER, EVENT_EDIT_STORAGE_PROVIDER];

/// Storage-provider module: owns the `storage_providers` table.
pub struct StorageProviderModule {
    storage: Arc<dyn StorageProviderStorage>,
}

impl StorageProviderModule {
    pub fn new(db: Database) -> Self {
        Self {
            storage: Arc::new(PgStorageProviderStorage::new(db)),
        }
    }

    pub fn with_storage(storage: Arc<dyn StorageProviderStorage>) -> Self {
        Self { storage }
    }

    async fn handle_create(
        &self,
        payload: events::EventCreateStorageProvider,
        meta: RowMeta,
    ) -> ModuleResult<()> {
        let sp_id = require_id(&payload.sp_id, EVENT_CREATE_STORAGE_PROVIDER, "sp_id")?;
        debug!(sp = %payload.sp_address, id = %sp_id, "Storage provider created");

        let tx_hash = meta.tx_hash.clone().unwrap_or_default();
        self.storage
            .save_storage_provider(&StorageProvider {
                sp_id: parse_i64(&sp_id),
                sp_address: payload.sp_address,
                funding_address: payload.funding_address,
                seal_address: payload.seal_address,
                approval_address: payload.approval_address,
                gc_address: payload.gc_address,
                endpoint: payload.endpoint,
                total_deposit: parse_decimal(&payload.total_deposit),
                status: payload.status,
                removed: false,
                create_at: meta.height as i64,
                create_tx_hash: tx_hash.clone(),
                create_time: meta.unix_time(),
                update_at: meta.height as i64,
                update_tx_hash: tx_hash,
                update_time: meta.unix_time(),
            })
            .await?;
        Ok(())
    }

    async fn handle_edit(
        &self,
        payload: events::EventEditStorageProvider,
        meta: RowMeta,
    ) -> ModuleResult<()> {
        let sp_id = require_id(&payload.sp_id, EVENT_EDIT_STORAGE_PROVIDER, "sp_id")?;

        self.storage
            .edit_storage_provider(
                parse_i64(&sp_id),
                &payload.endpoint,
                meta.height as i64,
                &meta.tx_hash.clone().unwrap_or_default(),
                meta.unix_time(),
            )
            .await?;
        Ok(())
    }
}

impl Module for StorageProviderModule {
    fn name(&self) -> &'static str {
        "storage_provider"
    }

    fn prepare_tables(&self) -> Option<&dyn PrepareTables> {
        Some(self)
    }

    fn event_handler(&self) -> Option<&dyn EventHandler> {
        Some(self)
    }

    fn genesis_handler(&self) -> Option<&dyn GenesisHandler> {
        Some(self)
    }
}

#[async_trait]
impl PrepareTables for StorageProviderModule {
    async fn prepare_tables(&self) -> ModuleResult<()> {
        self.storage.prepare_tables().await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for StorageProviderModule {
    fn owned_events(&self) -> &'static [&'static str] {
        OWNED_EVENTS
    }

    async fn handle_event(&self, ctx: &EventContext, event: &Event) -> ModuleResult<()> {
        if !OWNED_EVENTS.contains(&event.type_url.as_str()) {
            return Ok(());
        }

        let meta = RowMeta::from_ctx(ctx);
        match TypedEvent::decode(event)? {
            TypedEvent::CreateStorageProvider(payload) => self.handle_create(payload, meta).await,
            TypedEvent::EditStorageProvider(payload) => self.handle_edit(payload, meta).await,
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl GenesisHandler for StorageProviderModule {
    /// Import the provider set declared in the sp app state.
    async fn handle_genesis(&self, doc: &GenesisDoc) -> ModuleResult<()> {
        let providers = doc
            .app_state
            .get("sp")
            .and_then(|state| state.get("storage_providers"))
            .and_then(|sps| sps.as_array())
            .cloned()
            .unwrap_or_default();

        info!(providers = providers.len(), "Importing genesis storage providers");
        let genesis_ts = doc.genesis_time.timestamp();

        for sp in providers {
            let text = |name: &str| -> String {
                sp.get(name)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };

            let sp_id = sp
                .get("id")
                .map(|v| match v {
                    serde_json::Value::String(s) => parse_i64(s),
                    serde_json::Value::Number(n) => n.as_i64().unwrap_or(0),
                    _ => 0,
                })
                .unwrap_or(0);

            self.storage
                .save_storage_provider(&StorageProvider {
                    sp_id,
                    sp_address: text("operator_address"),
                    funding_address: text("funding_address"),
                    seal_address: text("seal_address"),
                    approval_address: text("approval_address"),
                    gc_address: text("gc_address"),
                    endpoint: text("endpoint"),
                    total_deposit: parse_decimal(&text("total_deposit")),
                    status: text("status"),
                    removed: false,
                    create_at: 0,
                    create_tx_hash: String::new(),
                    create_time: genesis_ts,
                    update_at: 0,
                    update_tx_hash: String::new(),
                    update_time: genesis_ts,
                })
                .await?;
        }

        Ok(())
    }
}
