//! Server state management.
//!
//! One [`MessagingService`] is built at startup and shared by every request
//! and socket through axum state.

use std::sync::Arc;
use std::time::Duration;

use parlor_core::messages::DEFAULT_PAGE_SIZE;
use parlor_core::{
    Database, DatabaseConfig, Error, MessagingService, OpenDirectory, RealtimeRouter,
};

/// Default per-request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    /// SQLite file; `None` keeps everything in memory.
    pub database_path: Option<String>,
    pub request_timeout_secs: u64,
    /// Page size used when a history request gives no `limit`.
    pub default_page_size: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_path: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl RelayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MessagingService>,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(service: MessagingService, config: RelayConfig) -> Self {
        Self {
            service: Arc::new(service),
            config: Arc::new(config),
        }
    }

    /// Open the database, start realtime delivery and build the service.
    ///
    /// Users and posts are owned by other services; this relay trusts the
    /// ids it is given.
    pub fn open(config: RelayConfig) -> parlor_core::Result<Self> {
        let db = Database::open_with(&DatabaseConfig {
            path: config.database_path.clone(),
        })?;
        let router = RealtimeRouter::new();
        router.start();
        let service = MessagingService::new(
            db,
            router,
            Arc::new(OpenDirectory),
            Arc::new(OpenDirectory),
        );
        Ok(Self::new(service, config))
    }

    /// Run a service call on the blocking pool; every call may touch SQLite.
    ///
    /// Dropping the returned future (a request timeout, a client hangup) does
    /// not cancel the call. A write may commit after its request has already
    /// failed, so clients re-read before retrying a timed-out write.
    pub async fn call<T, F>(&self, f: F) -> parlor_core::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&MessagingService) -> parlor_core::Result<T> + Send + 'static,
    {
        let service = self.service.clone();
        match tokio::task::spawn_blocking(move || f(&service)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Service task failed");
                Err(Error::Internal(format!("service task failed: {}", e)))
            }
        }
    }

    /// Stop realtime delivery; every open socket's writer ends.
    pub fn shutdown(&self) {
        self.service.router().stop();
    }

    /// Users with at least one live socket.
    pub fn online_count(&self) -> usize {
        self.service.router().online_count()
    }

    pub fn connection_count(&self) -> usize {
        self.service.router().connection_count()
    }
}
