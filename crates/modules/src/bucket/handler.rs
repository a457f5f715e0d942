//! Event handling for the bucket module.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use harbor_chain::events::{
    self, TypedEvent, EVENT_CREATE_BUCKET, EVENT_DELETE_BUCKET, EVENT_UPDATE_BUCKET_INFO,
};
use harbor_core::error::ModuleResult;
use harbor_core::ports::{Event, EventContext, EventHandler, PrepareTables, Repository};

use crate::util::{parse_i64, parse_u64, require_id, RowMeta};

use super::models::{Bucket, BucketRemoval, BucketUpdate};
use super::storage::BucketStorage;

/// Event types this module owns.
const OWNED_EVENTS: &[&str] = &[
    EVENT_CREATE_BUCKET,
    EVENT_DELETE_BUCKET,
    EVENT_UPDATE_BUCKET_INFO,
];

/// Handles bucket lifecycle events.
pub struct BucketHandler {
    storage: Arc<dyn BucketStorage>,
    repository: Arc<dyn Repository>,
}

impl BucketHandler {
    pub fn new(storage: Arc<dyn BucketStorage>, repository: Arc<dyn Repository>) -> Self {
        Self {
            storage,
            repository,
        }
    }

    async fn handle_create(
        &self,
        payload: events::EventCreateBucket,
        meta: RowMeta,
    ) -> ModuleResult<()> {
        let bucket_id = require_id(&payload.bucket_id, EVENT_CREATE_BUCKET, "bucket_id")?;
        debug!(bucket = %payload.bucket_name, id = %bucket_id, "Bucket created");

        let tx_hash = meta.tx_hash.clone().unwrap_or_default();
        self.storage
            .save_bucket(&Bucket {
                bucket_id,
                bucket_name: payload.bucket_name,
                owner: payload.owner,
                payment_address: payload.payment_address,
                visibility: payload.visibility,
                status: payload.status,
                charged_read_quota: parse_u64(&payload.charged_read_quota),
                primary_sp_id: parse_i64(&payload.primary_sp_id),
                global_virtual_group_family_id: parse_i64(
                    &payload.global_virtual_group_family_id,
                ),
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

    async fn handle_update(
        &self,
        payload: events::EventUpdateBucketInfo,
        meta: RowMeta,
    ) -> ModuleResult<()> {
        let bucket_id = require_id(&payload.bucket_id, EVENT_UPDATE_BUCKET_INFO, "bucket_id")?;

        self.storage
            .update_bucket(&BucketUpdate {
                bucket_id,
                charged_read_quota: parse_u64(&payload.charged_read_quota_after),
                payment_address: payload.payment_address_after,
                visibility: payload.visibility,
                update_at: meta.height as i64,
                update_tx_hash: meta.tx_hash.clone().unwrap_or_default(),
                update_time: meta.unix_time(),
            })
            .await?;
        Ok(())
    }

    async fn handle_delete(
        &self,
        payload: events::EventDeleteBucket,
        meta: RowMeta,
    ) -> ModuleResult<()> {
        let bucket_id = require_id(&payload.bucket_id, EVENT_DELETE_BUCKET, "bucket_id")?;
        debug!(id = %bucket_id, "Bucket removed");

        self.storage
            .remove_bucket(&BucketRemoval {
                bucket_id,
                update_at: meta.height as i64,
                update_tx_hash: meta.tx_hash.clone().unwrap_or_default(),
                update_time: meta.unix_time(),
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PrepareTables for BucketHandler {
    async fn prepare_tables(&self) -> ModuleResult<()> {
        self.storage.prepare_tables().await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for BucketHandler {
    fn owned_events(&self) -> &'static [&'static str] {
        OWNED_EVENTS
    }

    async fn handle_event(&self, ctx: &EventContext, event: &Event) -> ModuleResult<()> {
        if !OWNED_EVENTS.contains(&event.type_url.as_str()) {
            return Ok(());
        }

        let meta = RowMeta::from_ctx(ctx);
        match TypedEvent::decode(event)? {
            TypedEvent::CreateBucket(payload) => self.handle_create(payload, meta).await,
            TypedEvent::UpdateBucketInfo(payload) => self.handle_update(payload, meta).await,
            TypedEvent::DeleteBucket(payload) => self.handle_delete(payload, meta).await,
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
    use std::sync::Mutex;

    /// In-memory storage honoring the last-write-by-height contract.
    #[derive(Default)]
    struct MemBucketStorage {
        rows: Mutex<std::collections::HashMap<String, Bucket>>,
        calls: Mutex<usize>,
    }

    impl MemBucketStorage {
        fn get(&self, id: &str) -> Option<Bucket> {
            self.rows.lock().unwrap().get(id).cloned()
        }

        fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl BucketStorage for MemBucketStorage {
        async fn prepare_tables(&self) -> harbor_core::error::StorageResult<()> {
            Ok(())
        }

        async fn save_bucket(&self, bucket: &Bucket) -> harbor_core::error::StorageResult<()> {
            *self.calls.lock().unwrap() += 1;
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(&bucket.bucket_id) {
                Some(existing) => {
                    let newer = existing.update_at <= bucket.update_at;
                    existing.create_at = bucket.create_at;
                    existing.create_tx_hash = bucket.create_tx_hash.clone();
                    existing.create_time = bucket.create_time;
                    if newer {
                        existing.bucket_name = bucket.bucket_name.clone();
                        existing.owner = bucket.owner.clone();
                        existing.removed = false;
                        existing.update_at = bucket.update_at;
                    }
                }
                None => {
                    rows.insert(bucket.bucket_id.clone(), bucket.clone());
                }
            }
            Ok(())
        }

        async fn update_bucket(
            &self,
            update: &BucketUpdate,
        ) -> harbor_core::error::StorageResult<()> {
            *self.calls.lock().unwrap() += 1;
            let mut rows = self.rows.lock().unwrap();
            if let Some(existing) = rows.get_mut(&update.bucket_id) {
                if existing.update_at <= update.update_at {
                    existing.charged_read_quota = update.charged_read_quota;
                    existing.payment_address = update.payment_address.clone();
                    existing.update_at = update.update_at;
                }
            }
            Ok(())
        }

        async fn remove_bucket(
            &self,
            removal: &BucketRemoval,
        ) -> harbor_core::error::StorageResult<()> {
            *self.calls.lock().unwrap() += 1;
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(&removal.bucket_id) {
                Some(existing) => {
                    if existing.update_at <= removal.update_at {
                        existing.removed = true;
                        existing.update_at = removal.update_at;
                    }
                }
                None => {
                    rows.insert(
                        removal.bucket_id.clone(),
                        Bucket {
                            bucket_id: removal.bucket_id.clone(),
                            bucket_name: String::new(),
                            owner: String::new(),
                            payment_address: String::new(),
                            visibility: String::new(),
                            status: String::new(),
                            charged_read_quota: 0,
                            primary_sp_id: 0,
                            global_virtual_group_family_id: 0,
                            removed: true,
                            create_at: removal.update_at,
                            create_tx_hash: removal.update_tx_hash.clone(),
                            create_time: removal.update_time,
                            update_at: removal.update_at,
                            update_tx_hash: removal.update_tx_hash.clone(),
                            update_time: removal.update_time,
                        },
                    );
                }
            }
            Ok(())
        }
    }

    fn handler(storage: Arc<MemBucketStorage>) -> BucketHandler {
        BucketHandler::new(storage, Arc::new(NullRepository::default()))
    }

    fn create_event(id: &str, name: &str) -> Event {
        event_with(
            EVENT_CREATE_BUCKET,
            &[
                ("bucket_id", &format!("\"{}\"", id)),
                ("bucket_name", &format!("\"{}\"", name)),
                ("owner", "\"0x0000000000000000000000000000000000000011\""),
            ],
        )
    }

    fn delete_event(id: &str) -> Event {
        event_with(EVENT_DELETE_BUCKET, &[("bucket_id", &format!("\"{}\"", id))])
    }

    // Test critique: création puis suppression => tombstone posé,
    // create_at conservé, update_at avancé
    #[tokio::test]
    async fn create_then_delete_sets_tombstone() {
        let storage = Arc::new(MemBucketStorage::default());
        let handler = handler(storage.clone());

        handler
            .handle_event(&ctx_at(50), &create_event("171", "b1"))
            .await
            .unwrap();
        handler
            .handle_event(&ctx_at(51), &delete_event("171"))
            .await
            .unwrap();

        let row = storage.get("171").unwrap();
        assert!(row.removed);
        assert_eq!(row.create_at, 50);
        assert_eq!(row.update_at, 51);
    }

    // Test critique: workers désordonnés - delete@51 vu avant create@50,
    // la ligne converge vers removed=true avec create_at=50
    #[tokio::test]
    async fn out_of_order_delete_then_create_converges() {
        let storage = Arc::new(MemBucketStorage::default());
        let handler = handler(storage.clone());

        handler
            .handle_event(&ctx_at(51), &delete_event("171"))
            .await
            .unwrap();
        handler
            .handle_event(&ctx_at(50), &create_event("171", "b1"))
            .await
            .unwrap();

        let row = storage.get("171").unwrap();
        assert!(row.removed, "tombstone must survive the late create");
        assert_eq!(row.create_at, 50);
        assert_eq!(row.update_at, 51);
    }

    // Test critique: un événement hors du set possédé ne touche pas le
    // stockage (propriété 5)
    #[tokio::test]
    async fn foreign_event_does_not_touch_storage() {
        let storage = Arc::new(MemBucketStorage::default());
        let handler = handler(storage.clone());

        handler
            .handle_event(
                &ctx_at(50),
                &event_with(
                    "bnbchain.greenfield.storage.EventCreateObject",
                    &[("object_id", "\"1\"")],
                ),
            )
            .await
            .unwrap();

        assert_eq!(storage.call_count(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_a_decode_error() {
        let storage = Arc::new(MemBucketStorage::default());
        let handler = handler(storage.clone());

        // bucket_id must be numeric
        let err = handler
            .handle_event(
                &ctx_at(50),
                &event_with(EVENT_CREATE_BUCKET, &[
                    ("bucket_id", "\"not-a-number\""),
                    ("bucket_name", "\"b\""),
                    ("owner", "\"0x0000000000000000000000000000000000000011\""),
                ]),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bucket_id"));
        assert_eq!(storage.call_count(), 0);
    }

    // Test critique: is_processed consulte la ligne epoch
    #[tokio::test]
    async fn is_processed_consults_epoch() {
        let storage = Arc::new(MemBucketStorage::default());

        let handler = BucketHandler::new(
            storage,
            Arc::new(NullRepository::with_epoch_height(60)),
        );
        assert!(handler.is_processed(60).await.unwrap());
        assert!(handler.is_processed(59).await.unwrap());
        assert!(!handler.is_processed(61).await.unwrap());
    }
}
