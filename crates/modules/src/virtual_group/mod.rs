//! Virtual-group module.
//!
//! Projects the virtual-group topology events into the
//! `global_virtual_groups`, `global_virtual_group_families` and
//! `local_virtual_groups` tables.

pub mod storage;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use harbor_chain::events::{
    TypedEvent, EVENT_CREATE_GLOBAL_VIRTUAL_GROUP,
    EVENT_CREATE_GLOBAL_VIRTUAL_GROUP_FAMILY, EVENT_CREATE_LOCAL_VIRTUAL_GROUP,
    EVENT_DELETE_GLOBAL_VIRTUAL_GROUP, EVENT_UPDATE_GLOBAL_VIRTUAL_GROUP,
    EVENT_UPDATE_LOCAL_VIRTUAL_GROUP,
};
use harbor_core::error::ModuleResult;
use harbor_core::ports::{Event, EventContext, EventHandler, Module, PrepareTables};
use harbor_storage::Database;

use crate::util::{parse_decimal, parse_i64, parse_u64, require_id, RowMeta};

pub use storage::{
    GlobalVirtualGroup, GlobalVirtualGroupFamily, GvgUpdate, LocalVirtualGroup, LvgUpdate,
    PgVirtualGroupStorage, VirtualGroupStorage,
};

const OWNED_EVENTS: &[&str] = &[
    EVENT_CREATE_GLOBAL_VIRTUAL_GROUP,
    EVENT_DELETE_GLOBAL_VIRTUAL_GROUP,
    EVENT_UPDATE_GLOBAL_VIRTUAL_GROUP,
    EVENT_CREATE_GLOBAL_VIRTUAL_GROUP_FAMILY,
    EVENT_CREATE_LOCAL_VIRTUAL_GROUP,
    EVENT_UPDATE_LOCAL_VIRTUAL_GROUP,
];

/// Virtual-group module: owns the virtual-group topology tables.
pub struct VirtualGroupModule {
    storage: Arc<dyn VirtualGroupStorage>,
}

impl VirtualGroupModule {
    pub fn new(db: Database) -> Self {
        Self {
            storage: Arc::new(PgVirtualGroupStorage::new(db)),
        }
    }

    pub fn with_storage(storage: Arc<dyn VirtualGroupStorage>) -> Self {
        Self { storage }
    }

    fn sp_ids(raw: &[String]) -> Vec<i64> {
        raw.iter().map(|s| parse_i64(s)).collect()
    }
}

impl Module for VirtualGroupModule {
    fn name(&self) -> &'static str {
        "virtual_group"
    }

    fn prepare_tables(&self) -> Option<&dyn PrepareTables> {
        Some(self)
    }

    fn event_handler(&self) -> Option<&dyn EventHandler> {
        Some(self)
    }
}

#[async_trait]
impl PrepareTables for VirtualGroupModule {
    async fn prepare_tables(&self) -> ModuleResult<()> {
        self.storage.prepare_tables().await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for VirtualGroupModule {
    fn owned_events(&self) -> &'static [&'static str] {
        OWNED_EVENTS
    }

    async fn handle_event(&self, ctx: &EventContext, event: &Event) -> ModuleResult<()> {
        if !OWNED_EVENTS.contains(&event.type_url.as_str()) {
            return Ok(());
        }

        let meta = RowMeta::from_ctx(ctx);
        let tx_hash = meta.tx_hash.clone().unwrap_or_default();

        match TypedEvent::decode(event)? {
            TypedEvent::CreateGlobalVirtualGroup(payload) => {
                let id = require_id(&payload.id, EVENT_CREATE_GLOBAL_VIRTUAL_GROUP, "id")?;
                debug!(id = %id, "Global virtual group created");
                self.storage
                    .save_global_virtual_group(&GlobalVirtualGroup {
                        id: parse_i64(&id),
                        family_id: parse_i64(&payload.family_id),
                        primary_sp_id: parse_i64(&payload.primary_sp_id),
                        secondary_sp_ids: Self::sp_ids(&payload.secondary_sp_ids),
                        stored_size: parse_u64(&payload.stored_size),
                        virtual_payment_address: payload.virtual_payment_address,
                        total_deposit: parse_decimal(&payload.total_deposit),
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
            TypedEvent::UpdateGlobalVirtualGroup(payload) => {
                let id = require_id(&payload.id, EVENT_UPDATE_GLOBAL_VIRTUAL_GROUP, "id")?;
                self.storage
                    .update_global_virtual_group(&GvgUpdate {
                        id: parse_i64(&id),
                        stored_size: parse_u64(&payload.stored_size),
                        secondary_sp_ids: Self::sp_ids(&payload.secondary_sp_ids),
                        total_deposit: parse_decimal(&payload.total_deposit),
                        update_at: meta.height as i64,
                        update_tx_hash: tx_hash,
                        update_time: meta.unix_time(),
                    })
                    .await?;
                Ok(())
            }
            TypedEvent::DeleteGlobalVirtualGroup(payload) => {
                let id = require_id(&payload.id, EVENT_DELETE_GLOBAL_VIRTUAL_GROUP, "id")?;
                debug!(id = %id, "Global virtual group removed");
                self.storage
                    .remove_global_virtual_group(
                        parse_i64(&id),
                        meta.height as i64,
                        &tx_hash,
                        meta.unix_time(),
                    )
                    .await?;
                Ok(())
            }
            TypedEvent::CreateGlobalVirtualGroupFamily(payload) => {
                let id =
                    require_id(&payload.id, EVENT_CREATE_GLOBAL_VIRTUAL_GROUP_FAMILY, "id")?;
                self.storage
                    .save_family(&GlobalVirtualGroupFamily {
                        id: parse_i64(&id),
                        primary_sp_id: parse_i64(&payload.primary_sp_id),
                        virtual_payment_address: payload.virtual_payment_address,
                        create_at: meta.height as i64,
                        create_tx_hash: tx_hash,
                        create_time: meta.unix_time(),
                        update_at: meta.height as i64,
                        update_tx_hash: String::new(),
                        update_time: meta.unix_time(),
                    })
                    .await?;
                Ok(())
            }
            TypedEvent::CreateLocalVirtualGroup(payload) => {
                let id = require_id(&payload.id, EVENT_CREATE_LOCAL_VIRTUAL_GROUP, "id")?;
                self.storage
                    .save_local_virtual_group(&LocalVirtualGroup {
                        id: parse_i64(&id),
                        global_virtual_group_id: parse_i64(&payload.global_virtual_group_id),
                        bucket_id: if payload.bucket_id.is_empty() {
                            "0".to_string()
                        } else {
                            payload.bucket_id
                        },
                        stored_size: parse_u64(&payload.stored_size),
                        create_at: meta.height as i64,
                        create_tx_hash: tx_hash,
                        create_time: meta.unix_time(),
                        update_at: meta.height as i64,
                        update_tx_hash: String::new(),
                        update_time: meta.unix_time(),
                    })
                    .await?;
                Ok(())
            }
            TypedEvent::UpdateLocalVirtualGroup(payload) => {
                let id = require_id(&payload.id, EVENT_UPDATE_LOCAL_VIRTUAL_GROUP, "id")?;
                self.storage
                    .update_local_virtual_group(&LvgUpdate {
                        id: parse_i64(&id),
                        global_virtual_group_id: parse_i64(&payload.global_virtual_group_id),
                        stored_size: parse_u64(&payload.stored_size),
                        update_at: meta.height as i64,
                        update_tx_hash: tx_hash,
                        update_time: meta.unix_time(),
                    })
                    .await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{ctx_at, event_with};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemVgStorage {
        gvgs: Mutex<HashMap<i64, GlobalVirtualGroup>>,
        families: Mutex<HashMap<i64, GlobalVirtualGroupFamily>>,
        lvgs: Mutex<HashMap<i64, LocalVirtualGroup>>,
    }

    #[async_trait]
    impl VirtualGroupStorage for MemVgStorage {
        async fn prepare_tables(&self) -> harbor_core::error::StorageResult<()> {
            Ok(())
        }
        async fn save_global_virtual_group(
            &self,
            gvg: &GlobalVirtualGroup,
        ) -> harbor_core::error::StorageResult<()> {
            self.gvgs.lock().unwrap().insert(gvg.id, gvg.clone());
            Ok(())
        }
        async fn update_global_virtual_group(
            &self,
            update: &GvgUpdate,
        ) -> harbor_core::error::StorageResult<()> {
            if let Some(gvg) = self.gvgs.lock().unwrap().get_mut(&update.id) {
                if gvg.update_at <= update.update_at {
                    gvg.stored_size = update.stored_size;
                    gvg.secondary_sp_ids = update.secondary_sp_ids.clone();
                    gvg.update_at = update.update_at;
                }
            }
            Ok(())
        }
        async fn remove_global_virtual_group(
            &self,
            id: i64,
            update_at: i64,
            _update_tx_hash: &str,
            _update_time: i64,
        ) -> harbor_core::error::StorageResult<()> {
            if let Some(gvg) = self.gvgs.lock().unwrap().get_mut(&id) {
                if gvg.update_at <= update_at {
                    gvg.removed = true;
                    gvg.update_at = update_at;
                }
            }
            Ok(())
        }
        async fn save_family(
            &self,
            family: &GlobalVirtualGroupFamily,
        ) -> harbor_core::error::StorageResult<()> {
            self.families.lock().unwrap().insert(family.id, family.clone());
            Ok(())
        }
        async fn save_local_virtual_group(
            &self,
            lvg: &LocalVirtualGroup,
        ) -> harbor_core::error::StorageResult<()> {
            self.lvgs.lock().unwrap().insert(lvg.id, lvg.clone());
            Ok(())
        }
        async fn update_local_virtual_group(
            &self,
            update: &LvgUpdate,
        ) -> harbor_core::error::StorageResult<()> {
            if let Some(lvg) = self.lvgs.lock().unwrap().get_mut(&update.id) {
                if lvg.update_at <= update.update_at {
                    lvg.stored_size = update.stored_size;
                    lvg.update_at = update.update_at;
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn gvg_lifecycle() {
        let storage = Arc::new(MemVgStorage::default());
        let module = VirtualGroupModule::with_storage(storage.clone());

        module
            .handle_event(
                &ctx_at(30),
                &event_with(EVENT_CREATE_GLOBAL_VIRTUAL_GROUP, &[
                    ("id", "\"4\""),
                    ("family_id", "\"1\""),
                    ("primary_sp_id", "\"2\""),
                    ("secondary_sp_ids", r#"["3","5","6"]"#),
                    ("stored_size", "\"0\""),
                    ("total_deposit", "\"1000000\""),
                ]),
            )
            .await
            .unwrap();

        module
            .handle_event(
                &ctx_at(31),
                &event_with(EVENT_UPDATE_GLOBAL_VIRTUAL_GROUP, &[
                    ("id", "\"4\""),
                    ("stored_size", "\"4096\""),
                    ("secondary_sp_ids", r#"["3","5","7"]"#),
                ]),
            )
            .await
            .unwrap();

        {
            let gvgs = storage.gvgs.lock().unwrap();
            let gvg = gvgs.get(&4).unwrap();
            assert_eq!(gvg.stored_size, 4096);
            assert_eq!(gvg.secondary_sp_ids, vec![3, 5, 7]);
            assert!(!gvg.removed);
        }

        module
            .handle_event(
                &ctx_at(32),
                &event_with(EVENT_DELETE_GLOBAL_VIRTUAL_GROUP, &[("id", "\"4\"")]),
            )
            .await
            .unwrap();

        assert!(storage.gvgs.lock().unwrap().get(&4).unwrap().removed);
    }

    #[tokio::test]
    async fn family_and_lvg_rows_are_written() {
        let storage = Arc::new(MemVgStorage::default());
        let module = VirtualGroupModule::with_storage(storage.clone());

        module
            .handle_event(
                &ctx_at(30),
                &event_with(EVENT_CREATE_GLOBAL_VIRTUAL_GROUP_FAMILY, &[
                    ("id", "\"1\""),
                    ("primary_sp_id", "\"2\""),
                ]),
            )
            .await
            .unwrap();
        module
            .handle_event(
                &ctx_at(30),
                &event_with(EVENT_CREATE_LOCAL_VIRTUAL_GROUP, &[
                    ("id", "\"11\""),
                    ("global_virtual_group_id", "\"4\""),
                    ("bucket_id", "\"171\""),
                    ("stored_size", "\"2048\""),
                ]),
            )
            .await
            .unwrap();

        assert!(storage.families.lock().unwrap().contains_key(&1));
        let lvgs = storage.lvgs.lock().unwrap();
        assert_eq!(lvgs.get(&11).unwrap().bucket_id, "171");
        assert_eq!(lvgs.get(&11).unwrap().stored_size, 2048);
    }
}
