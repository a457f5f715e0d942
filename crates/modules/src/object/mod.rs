//! Object module.
//!
//! Projects object lifecycle events into the `objects` table. Cancel
//! and delete both tombstone the row; seal advances the status and
//! records the serving global virtual group.

pub mod storage;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use harbor_chain::events::{
    self, TypedEvent, EVENT_CANCEL_CREATE_OBJECT, EVENT_CREATE_OBJECT, EVENT_DELETE_OBJECT,
    EVENT_SEAL_OBJECT,
};
use harbor_core::error::ModuleResult;
use harbor_core::ports::{
    Event, EventContext, EventHandler, Module, PrepareTables, Repository,
};
use harbor_storage::Database;

use crate::util::{parse_i64, parse_u64, require_id, RowMeta};

pub use storage::{ObjectRemoval, ObjectSeal, ObjectStorage, PgObjectStorage, StorageObject};

const OWNED_EVENTS: &[&str] = &[
    EVENT_CREATE_OBJECT,
    EVENT_SEAL_OBJECT,
    EVENT_CANCEL_CREATE_OBJECT,
    EVENT_DELETE_OBJECT,
];

/// Status tags written into the row on removal, distinguishing a
/// cancelled create from a deletion.
const STATUS_CANCELLED: &str = "OBJECT_STATUS_CANCELLED";
const STATUS_DELETED: &str = "OBJECT_STATUS_DELETED";

/// Object module: owns the `objects` table.
pub struct ObjectModule {
    storage: Arc<dyn ObjectStorage>,
    repository: Arc<dyn Repository>,
}

impl ObjectModule {
    pub fn new(db: Database, repository: Arc<dyn Repository>) -> Self {
        Self {
            storage: Arc::new(PgObjectStorage::new(db)),
            repository,
        }
    }

    pub fn with_storage(storage: Arc<dyn ObjectStorage>, repository: Arc<dyn Repository>) -> Self {
        Self {
            storage,
            repository,
        }
    }

    async fn handle_create(
        &self,
        payload: events::EventCreateObject,
        meta: RowMeta,
    ) -> ModuleResult<()> {
        let object_id = require_id(&payload.object_id, EVENT_CREATE_OBJECT, "object_id")?;
        debug!(object = %payload.object_name, id = %object_id, "Object created");

        let tx_hash = meta.tx_hash.clone().unwrap_or_default();
        self.storage
            .save_object(&StorageObject {
                object_id,
                object_name: payload.object_name,
                bucket_id: if payload.bucket_id.is_empty() {
                    "0".to_string()
                } else {
                    payload.bucket_id
                },
                bucket_name: payload.bucket_name,
                owner: payload.owner,
                creator: payload.creator,
                payload_size: parse_u64(&payload.payload_size),
                visibility: payload.visibility,
                content_type: payload.content_type,
                status: payload.status,
                local_virtual_group_id: parse_i64(&payload.local_virtual_group_id),
                global_virtual_group_id: 0,
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

    async fn handle_seal(
        &self,
        payload: events::EventSealObject,
        meta: RowMeta,
    ) -> ModuleResult<()> {
        let object_id = require_id(&payload.object_id, EVENT_SEAL_OBJECT, "object_id")?;

        self.storage
            .seal_object(&ObjectSeal {
                object_id,
                status: payload.status,
                global_virtual_group_id: parse_i64(&payload.global_virtual_group_id),
                update_at: meta.height as i64,
                update_tx_hash: meta.tx_hash.clone().unwrap_or_default(),
                update_time: meta.unix_time(),
            })
            .await?;
        Ok(())
    }

    async fn handle_remove(
        &self,
        object_id: String,
        status: &str,
        meta: RowMeta,
    ) -> ModuleResult<()> {
        debug!(id = %object_id, status, "Object removed");
        self.storage
            .remove_object(&ObjectRemoval {
                object_id,
                status: status.to_string(),
                update_at: meta.height as i64,
                update_tx_hash: meta.tx_hash.clone().unwrap_or_default(),
                update_time: meta.unix_time(),
            })
            .await?;
        Ok(())
    }
}

impl Module for ObjectModule {
    fn name(&self) -> &'static str {
        "object"
    }

    fn prepare_tables(&self) -> Option<&dyn PrepareTables> {
        Some(self)
    }

    fn event_handler(&self) -> Option<&dyn EventHandler> {
        Some(self)
    }
}

#[async_trait]
impl PrepareTables for ObjectModule {
    async fn prepare_tables(&self) -> ModuleResult<()> {
        self.storage.prepare_tables().await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ObjectModule {
    fn owned_events(&self) -> &'static [&'static str] {
        OWNED_EVENTS
    }

    async fn handle_event(&self, ctx: &EventContext, event: &Event) -> ModuleResult<()> {
        if !OWNED_EVENTS.contains(&event.type_url.as_str()) {
            return Ok(());
        }

        let meta = RowMeta::from_ctx(ctx);
        match TypedEvent::decode(event)? {
            TypedEvent::CreateObject(payload) => self.handle_create(payload, meta).await,
            TypedEvent::SealObject(payload) => self.handle_seal(payload, meta).await,
            TypedEvent::CancelCreateObject(payload) => {
                let id = require_id(&payload.object_id, EVENT_CANCEL_CREATE_OBJECT, "object_id")?;
                self.handle_remove(id, STATUS_CANCELLED, meta).await
            }
            TypedEvent::DeleteObject(payload) => {
                let id = require_id(&payload.object_id, EVENT_DELETE_OBJECT, "object_id")?;
                self.handle_remove(id, STATUS_DELETED, meta).await
            }
            _ => Ok(()),
        }
    }

    async fn is_processed(&self, height: u64) -> ModuleResult<bool> {
        let epoch = self.repository.epoch().await?;
        Ok(epoch.map(|e| e.height >= height).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{ctx_at, event_with, NullRepository};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemObjectStorage {
        rows: Mutex<HashMap<String, StorageObject>>,
    }

    #[async_trait]
    impl ObjectStorage for MemObjectStorage {
        async fn prepare_tables(&self) -> harbor_core::error::StorageResult<()> {
            Ok(())
        }

        async fn save_object(
            &self,
            object: &StorageObject,
        ) -> harbor_core::error::StorageResult<()> {
            self.rows
                .lock()
                .unwrap()
                .entry(object.object_id.clone())
                .or_insert_with(|| object.clone());
            Ok(())
        }

        async fn seal_object(&self, seal: &ObjectSeal) -> harbor_core::error::StorageResult<()> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(&seal.object_id) {
                if row.update_at <= seal.update_at {
                    row.status = seal.status.clone();
                    row.global_virtual_group_id = seal.global_virtual_group_id;
                    row.update_at = seal.update_at;
                }
            }
            Ok(())
        }

        async fn remove_object(
            &self,
            removal: &ObjectRemoval,
        ) -> harbor_core::error::StorageResult<()> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(&removal.object_id) {
                if row.update_at <= removal.update_at {
                    row.removed = true;
                    row.status = removal.status.clone();
                    row.update_at = removal.update_at;
                }
            }
            Ok(())
        }
    }

    fn module(storage: Arc<MemObjectStorage>) -> ObjectModule {
        ObjectModule::with_storage(storage, Arc::new(NullRepository::default()))
    }

    #[tokio::test]
    async fn create_seal_delete_lifecycle() {
        let storage = Arc::new(MemObjectStorage::default());
        let module = module(storage.clone());

        module
            .handle_event(
                &ctx_at(10),
                &event_with(EVENT_CREATE_OBJECT, &[
                    ("object_id", "\"33\""),
                    ("object_name", "\"a.txt\""),
                    ("bucket_name", "\"b1\""),
                    ("owner", "\"0x0000000000000000000000000000000000000011\""),
                    ("payload_size", "\"2048\""),
                    ("status", "\"OBJECT_STATUS_CREATED\""),
                ]),
            )
            .await
            .unwrap();

        module
            .handle_event(
                &ctx_at(11),
                &event_with(EVENT_SEAL_OBJECT, &[
                    ("object_id", "\"33\""),
                    ("status", "\"OBJECT_STATUS_SEALED\""),
                    ("global_virtual_group_id", "\"4\""),
                ]),
            )
            .await
            .unwrap();

        {
            let rows = storage.rows.lock().unwrap();
            let row = rows.get("33").unwrap();
            assert_eq!(row.status, "OBJECT_STATUS_SEALED");
            assert_eq!(row.global_virtual_group_id, 4);
            assert_eq!(row.payload_size, 2048);
            assert!(!row.removed);
        }

        module
            .handle_event(
                &ctx_at(12),
                &event_with(EVENT_DELETE_OBJECT, &[("object_id", "\"33\"")]),
            )
            .await
            .unwrap();

        let rows = storage.rows.lock().unwrap();
        let row = rows.get("33").unwrap();
        assert!(row.removed);
        assert_eq!(row.status, STATUS_DELETED);
        assert_eq!(row.update_at, 12);
        assert_eq!(row.create_at, 10);
    }

    // Test critique: un cancel-create marque la ligne avec son propre
    // statut, distinct d'une suppression
    #[tokio::test]
    async fn cancel_is_distinguished_from_delete() {
        let storage = Arc::new(MemObjectStorage::default());
        let module = module(storage.clone());

        module
            .handle_event(
                &ctx_at(10),
                &event_with(EVENT_CREATE_OBJECT, &[
                    ("object_id", "\"34\""),
                    ("object_name", "\"b.txt\""),
                    ("bucket_name", "\"b1\""),
                    ("owner", "\"0x0000000000000000000000000000000000000011\""),
                ]),
            )
            .await
            .unwrap();
        module
            .handle_event(
                &ctx_at(11),
                &event_with(EVENT_CANCEL_CREATE_OBJECT, &[("object_id", "\"34\"")]),
            )
            .await
            .unwrap();

        let rows = storage.rows.lock().unwrap();
        let row = rows.get("34").unwrap();
        assert!(row.removed);
        assert_eq!(row.status, STATUS_CANCELLED);
    }
}
