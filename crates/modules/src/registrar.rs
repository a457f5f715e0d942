//! Module registrar.
//!
//! Builds every module this build knows about; the registry then
//! keeps the ones named in `chain.modules`, in that order.

use std::sync::Arc;

use harbor_core::ports::{Module, Registrar, Repository};
use harbor_storage::Database;

use crate::bucket::BucketModule;
use crate::group::GroupModule;
use crate::object::ObjectModule;
use crate::payment::PaymentModule;
use crate::permission::PermissionModule;
use crate::storage_provider::StorageProviderModule;
use crate::virtual_group::VirtualGroupModule;

/// Registrar wiring every domain module to its PostgreSQL storage.
pub struct HarborRegistrar {
    db: Database,
    repository: Arc<dyn Repository>,
}

impl HarborRegistrar {
    pub fn new(db: Database, repository: Arc<dyn Repository>) -> Self {
        Self { db, repository }
    }
}

impl Registrar for HarborRegistrar {
    fn build_modules(&self) -> Vec<Arc<dyn Module>> {
        vec![
            Arc::new(BucketModule::new(self.db.clone(), self.repository.clone())),
            Arc::new(ObjectModule::new(self.db.clone(), self.repository.clone())),
            Arc::new(GroupModule::new(self.db.clone())),
            Arc::new(PermissionModule::new(self.db.clone())),
            Arc::new(PaymentModule::new(self.db.clone())),
            Arc::new(StorageProviderModule::new(self.db.clone())),
            Arc::new(VirtualGroupModule::new(self.db.clone())),
        ]
    }
}
