use crate::config::AppConfig;
use crate::driver::PageDriver;
use crate::engine::MutationEngine;
use crate::registry::FieldRegistry;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

/// The control plane proper: the fields-by-id table, the undo-by-id table,
/// and the driver handle, exclusively owned here and never exposed to
/// collaborators directly. One mutex over all three means protocol requests
/// are handled sequentially in arrival order; capture-then-mutate sequences
/// are never interleaved.
pub struct ControlPlane {
    pub driver: Box<dyn PageDriver>,
    pub registry: FieldRegistry,
    pub engine: MutationEngine,
}

/// Controller global state
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    /// Arc'd so mutation handlers can take an owned guard into a task
    /// that outlives the request future (see server::shielded)
    pub control: Arc<tokio::sync::Mutex<ControlPlane>>,
    /// Working data directory (descriptor, snapshot, default profile)
    pub runtime_dir: PathBuf,
    /// Signalled by POST /api/shutdown for a clean stop
    pub shutdown: Notify,
}

impl AppState {
    pub fn new(config: AppConfig, driver: Box<dyn PageDriver>, runtime_dir: PathBuf) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            control: Arc::new(tokio::sync::Mutex::new(ControlPlane {
                driver,
                registry: FieldRegistry::new(),
                engine: MutationEngine::new(),
            })),
            runtime_dir,
            shutdown: Notify::new(),
        }
    }
}
