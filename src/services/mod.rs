//! Background services
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   start_all / shutdown   ┌─────────────────────┐
//! │  ServiceManager  │─────────────────────────▶│ FlushService        │──▶ IngestionPipeline::flush
//! └──────────────────┘                          ├─────────────────────┤
//!          │                                    │ ArchivalService     │──▶ ArchiveMigrator::run_cycle
//!          ▼                                    └─────────────────────┘
//!   health: every service Running
//! ```
//!
//! The archival service depends on the flush service and starts after it.
//!
//! # Example
//!
//! ```rust
//! use metric_store::services::{ServiceConfig, ServiceManager};
//!
//! let manager = ServiceManager::new(ServiceConfig::default());
//! assert_eq!(manager.status().len(), 0);
//! ```

pub mod archival;
pub mod flush;
pub mod framework;

pub use archival::ArchivalService;
pub use flush::FlushService;
pub use framework::{
    Service, ServiceConfig, ServiceError, ServiceManager, ServiceStatus, SharedServiceManager,
};
