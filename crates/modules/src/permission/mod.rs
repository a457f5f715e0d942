//! Permission module.
//!
//! Projects policy events into the `permissions` and `statements`
//! tables. A put-policy carries the policy row and its statements
//! together, so both writes run inside one storage transaction and
//! any failure rolls the whole event back.

pub mod storage;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use harbor_chain::events::{
    self, TypedEvent, EVENT_DELETE_POLICY, EVENT_PUT_POLICY,
};
use harbor_core::error::ModuleResult;
use harbor_core::ports::{Event, EventContext, EventHandler, Module, PrepareTables};
use harbor_storage::Database;

use crate::util::{parse_time, require_id, RowMeta};

pub use storage::{
    Permission, PermissionStorage, PermissionTx, PgPermissionStorage, PolicyRemoval, Statement,
};

const OWNED_EVENTS: &[&str] = &[EVENT_PUT_POLICY, EVENT_DELETE_POLICY];

/// Permission module: owns the `permissions` and `statements` tables.
pub struct PermissionModule {
    storage: Arc<dyn PermissionStorage>,
}

impl PermissionModule {
    pub fn new(db: Database) -> Self {
        Self {
            storage: Arc::new(PgPermissionStorage::new(db)),
        }
    }

    pub fn with_storage(storage: Arc<dyn PermissionStorage>) -> Self {
        Self { storage }
    }

    async fn handle_put_policy(
        &self,
        payload: events::EventPutPolicy,
        meta: RowMeta,
    ) -> ModuleResult<()> {
        let policy_id = require_id(&payload.policy_id, EVENT_PUT_POLICY, "policy_id")?;
        debug!(id = %policy_id, statements = payload.statements.len(), "Policy put");

        let tx_hash = meta.tx_hash.clone().unwrap_or_default();
        let permission = Permission {
            policy_id: policy_id.clone(),
            principal_type: payload.principal_type,
            principal_value: payload.principal_value,
            resource_type: payload.resource_type,
            resource_id: if payload.resource_id.is_empty() {
                "0".to_string()
            } else {
                payload.resource_id
            },
            expiration_time: payload
                .expiration_time
                .as_deref()
                .and_then(parse_time)
                .map(|t| t.timestamp()),
            removed: false,
            create_at: meta.height as i64,
            create_tx_hash: tx_hash.clone(),
            create_time: meta.unix_time(),
            update_at: meta.height as i64,
            update_tx_hash: tx_hash,
            update_time: meta.unix_time(),
        };

        let statements: Vec<Statement> = payload
            .statements
            .iter()
            .enumerate()
            .map(|(index, s)| Statement {
                policy_id: policy_id.clone(),
                statement_index: index as i32,
                effect: s.effect.clone(),
                actions: s.actions.clone(),
                resources: s.resources.clone(),
                expiration_time: s
                    .expiration_time
                    .as_deref()
                    .and_then(parse_time)
                    .map(|t| t.timestamp()),
                removed: false,
                update_at: meta.height as i64,
            })
            .collect();

        // Both tables or neither: rollback on any failed step.
        let mut tx = self.storage.begin().await?;
        if let Err(e) = tx.save_permission(&permission).await {
            tx.rollback().await.ok();
            return Err(e.into());
        }
        if let Err(e) = tx.save_statements(&statements).await {
            tx.rollback().await.ok();
            return Err(e.into());
        }
        tx.commit().await?;
        Ok(())
    }
}

impl Module for PermissionModule {
    fn name(&self) -> &'static str {
        "permission"
    }

    fn prepare_tables(&self) -> Option<&dyn PrepareTables> {
        Some(self)
    }

    fn event_handler(&self) -> Option<&dyn EventHandler> {
        Some(self)
    }
}

#[async_trait]
impl PrepareTables for PermissionModule {
    async fn prepare_tables(&self) -> ModuleResult<()> {
        self.storage.prepare_tables().await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for PermissionModule {
    fn owned_events(&self) -> &'static [&'static str] {
        OWNED_EVENTS
    }

    async fn handle_event(&self, ctx: &EventContext, event: &Event) -> ModuleResult<()> {
        if !OWNED_EVENTS.contains(&event.type_url.as_str()) {
            return Ok(());
        }

        let meta = RowMeta::from_ctx(ctx);
        match TypedEvent::decode(event)? {
            TypedEvent::PutPolicy(payload) => self.handle_put_policy(payload, meta).await,
            TypedEvent::DeletePolicy(payload) => {
                let policy_id = require_id(&payload.policy_id, EVENT_DELETE_POLICY, "policy_id")?;
                self.storage
                    .remove_policy(&PolicyRemoval {
                        policy_id,
                        update_at: meta.height as i64,
                        update_tx_hash: meta.tx_hash.clone().unwrap_or_default(),
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
    use harbor_core::error::{StorageError, StorageResult};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Transactional fake: writes land in a buffer and only reach the
    /// committed store on commit.
    #[derive(Default)]
    struct MemState {
        committed_permissions: Mutex<Vec<Permission>>,
        committed_statements: Mutex<Vec<Statement>>,
        fail_statements: AtomicBool,
        rollbacks: AtomicUsize,
    }

    #[derive(Default, Clone)]
    struct MemPermissionStorage {
        state: Arc<MemState>,
    }

    struct MemTx {
        state: Arc<MemState>,
        pending_permissions: Vec<Permission>,
        pending_statements: Vec<Statement>,
    }

    #[async_trait]
    impl PermissionTx for MemTx {
        async fn save_permission(&mut self, permission: &Permission) -> StorageResult<()> {
            self.pending_permissions.push(permission.clone());
            Ok(())
        }

        async fn save_statements(&mut self, statements: &[Statement]) -> StorageResult<()> {
            if self.state.fail_statements.load(Ordering::SeqCst) {
                return Err(StorageError::QueryError("statements write failed".into()));
            }
            self.pending_statements.extend_from_slice(statements);
            Ok(())
        }

        async fn commit(self: Box<Self>) -> StorageResult<()> {
            self.state
                .committed_permissions
                .lock()
                .unwrap()
                .extend(self.pending_permissions);
            self.state
                .committed_statements
                .lock()
                .unwrap()
                .extend(self.pending_statements);
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> StorageResult<()> {
            self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl PermissionStorage for MemPermissionStorage {
        async fn prepare_tables(&self) -> StorageResult<()> {
            Ok(())
        }

        async fn begin(&self) -> StorageResult<Box<dyn PermissionTx>> {
            Ok(Box::new(MemTx {
                state: self.state.clone(),
                pending_permissions: vec![],
                pending_statements: vec![],
            }))
        }

        async fn remove_policy(&self, _removal: &PolicyRemoval) -> StorageResult<()> {
            Ok(())
        }
    }

    fn put_policy_event() -> Event {
        event_with(EVENT_PUT_POLICY, &[
            ("policy_id", "\"7\""),
            ("principal_type", "\"PRINCIPAL_TYPE_GNFD_ACCOUNT\""),
            ("principal_value", "\"0x0000000000000000000000000000000000000022\""),
            ("resource_type", "\"RESOURCE_TYPE_BUCKET\""),
            ("resource_id", "\"171\""),
            (
                "statements",
                r#"[{"effect":"EFFECT_ALLOW","actions":["ACTION_DELETE_BUCKET"],"resources":[]},{"effect":"EFFECT_DENY","actions":["ACTION_COPY_OBJECT"],"resources":[]}]"#,
            ),
        ])
    }

    #[tokio::test]
    async fn put_policy_commits_both_tables() {
        let storage = MemPermissionStorage::default();
        let state = storage.state.clone();

        let module = PermissionModule::with_storage(Arc::new(storage));
        module
            .handle_event(&ctx_at(50), &put_policy_event())
            .await
            .unwrap();

        assert_eq!(state.committed_permissions.lock().unwrap().len(), 1);
        assert_eq!(state.committed_statements.lock().unwrap().len(), 2);
        assert_eq!(
            state.committed_statements.lock().unwrap()[1].effect,
            "EFFECT_DENY"
        );
    }

    // Test critique: échec de MultiSaveStatement => rollback, aucune
    // ligne permission ni statement
    #[tokio::test]
    async fn failed_statements_roll_back_everything() {
        let storage = MemPermissionStorage::default();
        let state = storage.state.clone();
        state.fail_statements.store(true, Ordering::SeqCst);

        let module = PermissionModule::with_storage(Arc::new(storage));
        let err = module
            .handle_event(&ctx_at(50), &put_policy_event())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("statements write failed"));
        assert!(state.committed_permissions.lock().unwrap().is_empty());
        assert!(state.committed_statements.lock().unwrap().is_empty());
        assert_eq!(state.rollbacks.load(Ordering::SeqCst), 1);
    }
}
