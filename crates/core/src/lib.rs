//! Resilient loading of raster map tiles from unreliable WMS-style servers.
//!
//! A failed tile is classified, retried on a backoff schedule through an
//! escalating ladder of request variants and transports, and either delivered
//! to the host through a callback or marked exhausted with a single
//! user-facing notification.

pub mod classifier;
pub mod config;
pub mod engine;
pub mod health;
pub mod loader;
pub mod locator;
pub mod models;
pub mod monitoring;
pub mod notify;
pub mod output;
pub mod scheduler;
pub mod state;
pub mod strategy;
pub mod transport;

pub use classifier::{ErrorCategory, FailureObservation};
pub use engine::{LocatorSource, RecoveredTile, RecoveryEngine, StaticLocators};
pub use health::{ServiceHealth, ServiceStatus};
pub use loader::{LoadError, TileLoader};
pub use locator::TileLocator;
pub use models::{ResourceClass, ResourceDescriptor};
pub use notify::{NotificationSink, Severity};
pub use state::{ResourcePhase, ResourceState};
