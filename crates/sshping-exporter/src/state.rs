//! Shared application state and the global allocator.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;

use sshping_core::scrape::ScrapeOrchestrator;
use sshping_core::state::ExporterState;

/// Handler state. Cheap to clone.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) orchestrator: Arc<ScrapeOrchestrator>,
    pub(crate) telemetry_path: Arc<str>,
}

impl AppState {
    pub(crate) fn new(orchestrator: ScrapeOrchestrator, telemetry_path: &str) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            telemetry_path: Arc::from(telemetry_path),
        }
    }

    pub(crate) fn exporter(&self) -> &Arc<ExporterState> {
        self.orchestrator.state()
    }
}
