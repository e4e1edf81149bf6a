use collection_backup::scheduler::BackupScheduler;
use collection_backup::BackupService;
use std::sync::Arc;

pub struct AppState {
    pub service: Arc<BackupService>,
    pub scheduler: Arc<BackupScheduler>,
}

impl AppState {
    pub fn new(service: Arc<BackupService>, scheduler: Arc<BackupScheduler>) -> Self {
        Self { service, scheduler }
    }
}
