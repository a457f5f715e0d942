//! Group module.
//!
//! Projects group lifecycle and membership events into the `groups`
//! and `group_members` tables.

pub mod storage;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use harbor_chain::events::{
    self, TypedEvent, EVENT_CREATE_GROUP, EVENT_DELETE_GROUP, EVENT_LEAVE_GROUP,
    EVENT_UPDATE_GROUP_MEMBER,
};
use harbor_core::error::ModuleResult;
use harbor_core::ports::{Event, EventContext, EventHandler, Module, PrepareTables};
use harbor_storage::Database;

use crate::util::{parse_time, require_id, RowMeta};

pub use storage::{Group, GroupMember, GroupMutation, GroupStorage, PgGroupStorage};

const OWNED_EVENTS: &[&str] = &[
    EVENT_CREATE_GROUP,
    EVENT_DELETE_GROUP,
    EVENT_LEAVE_GROUP,
    EVENT_UPDATE_GROUP_MEMBER,
];

/// Group module: owns the `groups` and `group_members` tables.
pub struct GroupModule {
    storage: Arc<dyn GroupStorage>,
}

impl GroupModule {
    pub fn new(db: Database) -> Self {
        Self {
            storage: Arc::new(PgGroupStorage::new(db)),
        }
    }

    pub fn with_storage(storage: Arc<dyn GroupStorage>) -> Self {
        Self { storage }
    }

    fn member_rows(
        &self,
        group_id: &str,
        entries: &[events::GroupMemberEntry],
        meta: &RowMeta,
    ) -> Vec<GroupMember> {
        entries
            .iter()
            .map(|entry| GroupMember {
                group_id: group_id.to_string(),
                member: entry.address().to_string(),
                expiration_time: entry
                    .expiration()
                    .and_then(parse_time)
                    .map(|t| t.timestamp()),
                removed: false,
                update_at: meta.height as i64,
                update_tx_hash: meta.tx_hash.clone().unwrap_or_default(),
                update_time: meta.unix_time(),
            })
            .collect()
    }

    fn mutation(&self, group_id: &str, meta: &RowMeta) -> GroupMutation {
        GroupMutation {
            group_id: group_id.to_string(),
            update_at: meta.height as i64,
            update_tx_hash: meta.tx_hash.clone().unwrap_or_default(),
            update_time: meta.unix_time(),
        }
    }
}

impl Module for GroupModule {
    fn name(&self) -> &'static str {
        "group"
    }

    fn prepare_tables(&self) -> Option<&dyn PrepareTables> {
        Some(self)
    }

    fn event_handler(&self) -> Option<&dyn EventHandler> {
        Some(self)
    }
}

#[async_trait]
impl PrepareTables for GroupModule {
    async fn prepare_tables(&self) -> ModuleResult<()> {
        self.storage.prepare_tables().await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for GroupModule {
    fn owned_events(&self) -> &'static [&'static str] {
        OWNED_EVENTS
    }

    async fn handle_event(&self, ctx: &EventContext, event: &Event) -> ModuleResult<()> {
        if !OWNED_EVENTS.contains(&event.type_url.as_str()) {
            return Ok(());
        }

        let meta = RowMeta::from_ctx(ctx);
        match TypedEvent::decode(event)? {
            TypedEvent::CreateGroup(payload) => {
                let group_id = require_id(&payload.group_id, EVENT_CREATE_GROUP, "group_id")?;
                debug!(group = %payload.group_name, id = %group_id, "Group created");

                let tx_hash = meta.tx_hash.clone().unwrap_or_default();
                self.storage
                    .save_group(&Group {
                        group_id: group_id.clone(),
                        group_name: payload.group_name,
                        owner: payload.owner,
                        source_type: payload.source_type,
                        removed: false,
                        create_at: meta.height as i64,
                        create_tx_hash: tx_hash.clone(),
                        create_time: meta.unix_time(),
                        update_at: meta.height as i64,
                        update_tx_hash: tx_hash,
                        update_time: meta.unix_time(),
                    })
                    .await?;
                self.storage
                    .save_members(&self.member_rows(&group_id, &payload.members, &meta))
                    .await?;
                Ok(())
            }
            TypedEvent::DeleteGroup(payload) => {
                let group_id = require_id(&payload.group_id, EVENT_DELETE_GROUP, "group_id")?;
                debug!(id = %group_id, "Group removed");
                self.storage
                    .remove_group(&self.mutation(&group_id, &meta))
                    .await?;
                Ok(())
            }
            TypedEvent::LeaveGroup(payload) => {
                let group_id = require_id(&payload.group_id, EVENT_LEAVE_GROUP, "group_id")?;
                self.storage
                    .remove_members(
                        &self.mutation(&group_id, &meta),
                        &[payload.member_address],
                    )
                    .await?;
                Ok(())
            }
            TypedEvent::UpdateGroupMember(payload) => {
                let group_id =
                    require_id(&payload.group_id, EVENT_UPDATE_GROUP_MEMBER, "group_id")?;
                self.storage
                    .save_members(&self.member_rows(&group_id, &payload.members_to_add, &meta))
                    .await?;
                self.storage
                    .remove_members(&self.mutation(&group_id, &meta), &payload.members_to_delete)
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
    struct MemGroupStorage {
        groups: Mutex<HashMap<String, Group>>,
        members: Mutex<HashMap<(String, String), GroupMember>>,
    }

    #[async_trait]
    impl GroupStorage for MemGroupStorage {
        async fn prepare_tables(&self) -> harbor_core::error::StorageResult<()> {
            Ok(())
        }
        async fn save_group(&self, group: &Group) -> harbor_core::error::StorageResult<()> {
            self.groups
                .lock()
                .unwrap()
                .insert(group.group_id.clone(), group.clone());
            Ok(())
        }
        async fn remove_group(
            &self,
            mutation: &GroupMutation,
        ) -> harbor_core::error::StorageResult<()> {
            if let Some(g) = self.groups.lock().unwrap().get_mut(&mutation.group_id) {
                g.removed = true;
                g.update_at = mutation.update_at;
            }
            for ((gid, _), m) in self.members.lock().unwrap().iter_mut() {
                if gid == &mutation.group_id {
                    m.removed = true;
                }
            }
            Ok(())
        }
        async fn save_members(
            &self,
            members: &[GroupMember],
        ) -> harbor_core::error::StorageResult<()> {
            let mut map = self.members.lock().unwrap();
            for m in members {
                map.insert((m.group_id.clone(), m.member.clone()), m.clone());
            }
            Ok(())
        }
        async fn remove_members(
            &self,
            mutation: &GroupMutation,
            members: &[String],
        ) -> harbor_core::error::StorageResult<()> {
            let mut map = self.members.lock().unwrap();
            for member in members {
                if let Some(m) = map.get_mut(&(mutation.group_id.clone(), member.clone())) {
                    m.removed = true;
                    m.update_at = mutation.update_at;
                }
            }
            Ok(())
        }
    }

    const ADDR_A: &str = "0x0000000000000000000000000000000000000033";
    const ADDR_B: &str = "0x0000000000000000000000000000000000000044";

    #[tokio::test]
    async fn create_group_with_members() {
        let storage = Arc::new(MemGroupStorage::default());
        let module = GroupModule::with_storage(storage.clone());

        module
            .handle_event(
                &ctx_at(20),
                &event_with(EVENT_CREATE_GROUP, &[
                    ("group_id", "\"9\""),
                    ("group_name", "\"readers\""),
                    ("owner", "\"0x0000000000000000000000000000000000000011\""),
                    (
                        "members",
                        &format!(r#"["{}","{}"]"#, ADDR_A, ADDR_B),
                    ),
                ]),
            )
            .await
            .unwrap();

        assert!(storage.groups.lock().unwrap().contains_key("9"));
        assert_eq!(storage.members.lock().unwrap().len(), 2);
    }

    // Test critique: update-member ajoute et retire dans le même
    // événement
    #[tokio::test]
    async fn update_member_adds_and_removes() {
        let storage = Arc::new(MemGroupStorage::default());
        let module = GroupModule::with_storage(storage.clone());

        module
            .handle_event(
                &ctx_at(20),
                &event_with(EVENT_CREATE_GROUP, &[
                    ("group_id", "\"9\""),
                    ("group_name", "\"readers\""),
                    ("owner", "\"0x0000000000000000000000000000000000000011\""),
                    ("members", &format!(r#"["{}"]"#, ADDR_A)),
                ]),
            )
            .await
            .unwrap();

        module
            .handle_event(
                &ctx_at(21),
                &event_with(EVENT_UPDATE_GROUP_MEMBER, &[
                    ("group_id", "\"9\""),
                    (
                        "members_to_add",
                        &format!(r#"[{{"member":"{}","expiration_time":"2025-01-01T00:00:00Z"}}]"#, ADDR_B),
                    ),
                    ("members_to_delete", &format!(r#"["{}"]"#, ADDR_A)),
                ]),
            )
            .await
            .unwrap();

        let members = storage.members.lock().unwrap();
        let added = members.get(&("9".to_string(), ADDR_B.to_string())).unwrap();
        assert!(!added.removed);
        assert!(added.expiration_time.is_some());
        let deleted = members.get(&("9".to_string(), ADDR_A.to_string())).unwrap();
        assert!(deleted.removed);
    }

    #[tokio::test]
    async fn delete_group_tombstones_members_too() {
        let storage = Arc::new(MemGroupStorage::default());
        let module = GroupModule::with_storage(storage.clone());

        module
            .handle_event(
                &ctx_at(20),
                &event_with(EVENT_CREATE_GROUP, &[
                    ("group_id", "\"9\""),
                    ("group_name", "\"readers\""),
                    ("owner", "\"0x0000000000000000000000000000000000000011\""),
                    ("members", &format!(r#"["{}"]"#, ADDR_A)),
                ]),
            )
            .await
            .unwrap();
        module
            .handle_event(
                &ctx_at(25),
                &event_with(EVENT_DELETE_GROUP, &[("group_id", "\"9\"")]),
            )
            .await
            .unwrap();

        assert!(storage.groups.lock().unwrap().get("9").unwrap().removed);
        assert!(
            storage
                .members
                .lock()
                .unwrap()
                .get(&("9".to_string(), ADDR_A.to_string()))
                .unwrap()
                .removed
        );
    }
}
