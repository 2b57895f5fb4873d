//! Service framework
//!
//! Long-running background loops implement [`Service`]; a [`ServiceManager`]
//! starts them in dependency order, reports their health and stops them on
//! shutdown.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

// ============================================================================
// Service Trait
// ============================================================================

/// A background loop owned by the [`ServiceManager`]
///
/// `start` runs until the shutdown receiver fires and should leave the
/// service's status at `Stopped` (or `Failed`) when it returns.
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// Run the service until shutdown
    async fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError>;

    /// Name used for logging and status reports
    fn name(&self) -> &'static str;

    /// Current status
    fn status(&self) -> ServiceStatus;

    /// Services that must be running before this one starts
    fn dependencies(&self) -> Vec<&'static str> {
        vec![]
    }
}

// ============================================================================
// Service Status
// ============================================================================

/// Lifecycle state of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Not started yet, or starting
    Starting,
    /// Main loop is running
    Running,
    /// Shutdown received, finishing up
    Stopping,
    /// Exited cleanly
    Stopped,
    /// Exited with an error
    Failed(String),
}

impl ServiceStatus {
    /// Check if the service is in a healthy state
    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceStatus::Running)
    }

    /// Check if the service has stopped (normally or due to failure)
    pub fn is_stopped(&self) -> bool {
        matches!(self, ServiceStatus::Stopped | ServiceStatus::Failed(_))
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Starting => f.write_str("starting"),
            ServiceStatus::Running => f.write_str("running"),
            ServiceStatus::Stopping => f.write_str("stopping"),
            ServiceStatus::Stopped => f.write_str("stopped"),
            ServiceStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

// ============================================================================
// Service Error
// ============================================================================

/// Errors raised by services and the manager
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Service could not initialize
    #[error("Service initialization failed: {0}")]
    InitializationFailed(String),

    /// Service failed while running
    #[error("Service runtime error: {0}")]
    RuntimeError(String),

    /// Service did not shut down cleanly
    #[error("Service shutdown error: {0}")]
    ShutdownError(String),

    /// A dependency is missing, not running, or circular
    #[error("Dependency not satisfied: {0}")]
    DependencyError(String),

    /// Duplicate registration or second `start_all`
    #[error("Service already running")]
    AlreadyRunning,

    /// No service registered under this name
    #[error("Service not found: {0}")]
    NotFound(String),
}

// ============================================================================
// Service Config
// ============================================================================

/// Configuration for the service manager
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Time allowed for all services to stop after the shutdown signal
    pub shutdown_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServiceConfig {
    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ============================================================================
// Service Manager
// ============================================================================

struct ServiceHandle {
    service: Arc<dyn Service>,
    task: Option<JoinHandle<Result<(), ServiceError>>>,
    started_at: Option<Instant>,
}

/// Starts, monitors and stops registered services
pub struct ServiceManager {
    config: ServiceConfig,
    services: RwLock<HashMap<&'static str, ServiceHandle>>,
    shutdown_tx: broadcast::Sender<()>,
    running: RwLock<bool>,
}

/// Shared service manager for use across threads
pub type SharedServiceManager = Arc<ServiceManager>;

impl ServiceManager {
    /// Create a new service manager
    pub fn new(config: ServiceConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            services: RwLock::new(HashMap::new()),
            shutdown_tx,
            running: RwLock::new(false),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(ServiceConfig::default())
    }

    /// Register a service; names must be unique
    pub fn register(&self, service: Arc<dyn Service>) -> Result<(), ServiceError> {
        let name = service.name();
        let mut services = self.services.write();

        if services.contains_key(name) {
            return Err(ServiceError::AlreadyRunning);
        }

        services.insert(
            name,
            ServiceHandle {
                service,
                task: None,
                started_at: None,
            },
        );

        tracing::debug!(service = name, "Service registered");
        Ok(())
    }

    /// Check that every declared dependency is registered
    pub fn validate_dependencies(&self) -> Result<(), ServiceError> {
        let services = self.services.read();
        let mut missing: Vec<String> = Vec::new();

        for (name, handle) in services.iter() {
            for dep in handle.service.dependencies() {
                if !services.contains_key(dep) {
                    missing.push(format!("'{}' depends on unregistered '{}'", name, dep));
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            missing.sort();
            Err(ServiceError::DependencyError(missing.join("; ")))
        }
    }

    /// Start every registered service, dependencies first
    pub async fn start_all(&self) -> Result<(), ServiceError> {
        self.validate_dependencies()?;

        {
            let mut running = self.running.write();
            if *running {
                return Err(ServiceError::AlreadyRunning);
            }
            *running = true;
        }

        for name in self.start_order()? {
            self.start_service(name).await?;
        }

        tracing::debug!("All services started");
        Ok(())
    }

    /// Spawn one service once its dependencies report healthy
    pub async fn start_service(&self, name: &'static str) -> Result<(), ServiceError> {
        // No await while the map is locked
        let service = {
            let mut services = self.services.write();

            let deps = match services.get(name) {
                Some(handle) => handle.service.dependencies(),
                None => return Err(ServiceError::NotFound(name.to_string())),
            };
            for dep in deps {
                let healthy = services
                    .get(dep)
                    .map(|h| h.service.status().is_healthy())
                    .unwrap_or(false);
                if !healthy {
                    return Err(ServiceError::DependencyError(format!(
                        "'{}' needs '{}' running",
                        name, dep
                    )));
                }
            }

            let handle = services
                .get_mut(name)
                .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;
            let service = handle.service.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            let task_service = service.clone();
            handle.task = Some(tokio::spawn(async move { task_service.start(shutdown_rx).await }));
            handle.started_at = Some(Instant::now());
            service
        };

        // Let the loop reach Running before dependents start
        let deadline = Instant::now() + Duration::from_millis(100);
        while Instant::now() < deadline && !service.status().is_healthy() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tracing::debug!(service = name, status = %service.status(), "Service started");
        Ok(())
    }

    /// Signal shutdown and wait for every service within the timeout
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        tracing::info!("Initiating graceful shutdown");
        let _ = self.shutdown_tx.send(());

        let tasks: Vec<(&'static str, JoinHandle<Result<(), ServiceError>>)> = {
            let mut services = self.services.write();
            services
                .iter_mut()
                .filter_map(|(name, handle)| handle.task.take().map(|task| (*name, task)))
                .collect()
        };

        let deadline = Instant::now() + self.config.shutdown_timeout;
        let mut timed_out = Vec::new();
        for (name, task) in tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, task).await {
                Ok(Ok(Ok(()))) => {
                    tracing::debug!(service = name, "Service stopped gracefully");
                },
                Ok(Ok(Err(e))) => {
                    tracing::warn!(service = name, error = %e, "Service stopped with error");
                },
                Ok(Err(e)) => {
                    tracing::error!(service = name, error = %e, "Service task panicked");
                },
                Err(_) => {
                    tracing::warn!(service = name, "Service shutdown timed out");
                    timed_out.push(name);
                },
            }
        }

        *self.running.write() = false;

        if timed_out.is_empty() {
            tracing::info!("Shutdown complete");
            Ok(())
        } else {
            Err(ServiceError::ShutdownError(format!(
                "timed out waiting for {}",
                timed_out.join(", ")
            )))
        }
    }

    /// Whether `start_all` has run and `shutdown` has not
    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    /// Status of every service, ordered by name
    pub fn status(&self) -> BTreeMap<&'static str, ServiceStatus> {
        let services = self.services.read();
        services
            .iter()
            .map(|(name, handle)| (*name, handle.service.status()))
            .collect()
    }

    /// Status of one service
    pub fn service_status(&self, name: &str) -> Option<ServiceStatus> {
        let services = self.services.read();
        services.get(name).map(|h| h.service.status())
    }

    /// Time since a service was started
    pub fn service_uptime(&self, name: &str) -> Option<Duration> {
        let services = self.services.read();
        services
            .get(name)
            .and_then(|h| h.started_at.map(|started| started.elapsed()))
    }

    /// Check if all services are running
    pub fn is_healthy(&self) -> bool {
        let services = self.services.read();
        services.values().all(|h| h.service.status().is_healthy())
    }

    /// Depth-first topological order over dependencies
    fn start_order(&self) -> Result<Vec<&'static str>, ServiceError> {
        let services = self.services.read();
        let mut names: Vec<&'static str> = services.keys().copied().collect();
        names.sort_unstable();

        let mut order = Vec::with_capacity(names.len());
        let mut marks: HashMap<&'static str, Mark> = HashMap::new();
        for name in names {
            Self::visit(name, &services, &mut marks, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        name: &'static str,
        services: &HashMap<&'static str, ServiceHandle>,
        marks: &mut HashMap<&'static str, Mark>,
        order: &mut Vec<&'static str>,
    ) -> Result<(), ServiceError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                return Err(ServiceError::DependencyError(format!(
                    "circular dependency at '{}'",
                    name
                )))
            },
            None => {},
        }

        marks.insert(name, Mark::InProgress);
        if let Some(handle) = services.get(name) {
            for dep in handle.service.dependencies() {
                Self::visit(dep, services, marks, order)?;
            }
        }
        marks.insert(name, Mark::Done);
        order.push(name);
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Mark {
    InProgress,
    Done,
}

// ============================================================================
// Tests
// ============================================================================
