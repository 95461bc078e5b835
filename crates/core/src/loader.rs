//! Host-facing tile loader.
//!
//! The host creates one `TileLoader` per engine and calls [`TileLoader::install`]
//! once at startup; loads before installation are refused.

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::classifier::{ErrorCategory, classify, is_silent};
use crate::engine::RecoveryEngine;
use crate::models::ResourceDescriptor;
use crate::transport::TilePayload;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("tile loader is not installed")]
    NotInstalled,
    #[error("tile loader is already installed")]
    AlreadyInstalled,
    #[error("no locator for resource '{0}'")]
    NoLocator(String),
    /// Retries were used up; nothing is fetched until the resource is reinitialized
    #[error("tile recovery for '{0}' is exhausted")]
    Exhausted(String),
    /// A known gap or misconfiguration; the engine does not retry these
    #[error("tile for '{resource_id}' is unavailable ({category})")]
    Unavailable {
        resource_id: String,
        category: ErrorCategory,
    },
    /// The engine now owns recovery; a recovered tile arrives via callback
    #[error("tile for '{resource_id}' failed ({category}), recovery scheduled")]
    Deferred {
        resource_id: String,
        category: ErrorCategory,
    },
}

pub struct TileLoader {
    engine: RecoveryEngine,
    installed: AtomicBool,
}

impl TileLoader {
    pub fn new(engine: RecoveryEngine) -> Self {
        Self {
            engine,
            installed: AtomicBool::new(false),
        }
    }

    /// Activate the loader. Only the first call succeeds.
    pub fn install(&self) -> Result<(), LoadError> {
        if self.installed.swap(true, Ordering::AcqRel) {
            return Err(LoadError::AlreadyInstalled);
        }
        tracing::info!("tile loader installed");
        Ok(())
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    pub fn engine(&self) -> &RecoveryEngine {
        &self.engine
    }

    /// Load a tile once. Failures are handed to the engine, which keeps
    /// recovering in the background.
    pub async fn load(&self, resource: &ResourceDescriptor) -> Result<TilePayload, LoadError> {
        if !self.is_installed() {
            return Err(LoadError::NotInstalled);
        }

        self.engine
            .initialize_resource(&resource.id, &resource.name, resource.class)
            .await;
        if self
            .engine
            .resource_state(&resource.id)
            .await
            .is_some_and(|state| state.is_exhausted())
        {
            return Err(LoadError::Exhausted(resource.id.clone()));
        }
        let locator = self
            .engine
            .locator_for(resource)
            .ok_or_else(|| LoadError::NoLocator(resource.id.clone()))?;

        match self.engine.fetch_original(&locator).await {
            Ok(payload) => {
                self.engine.report_success(&resource.id).await;
                Ok(payload)
            }
            Err(observation) => {
                self.engine.report_failure(&resource.id, observation).await;
                let resource_id = resource.id.clone();
                let category = classify(resource.class, &observation);
                if is_silent(category) {
                    Err(LoadError::Unavailable {
                        resource_id,
                        category,
                    })
                } else {
                    Err(LoadError::Deferred {
                        resource_id,
                        category,
                    })
                }
            }
        }
    }

    /// Load several tiles concurrently; results come back in completion order
    pub async fn load_many(
        &self,
        resources: &[ResourceDescriptor],
    ) -> Vec<(String, Result<TilePayload, LoadError>)> {
        let mut pending: FuturesUnordered<_> = resources
            .iter()
            .map(|resource| async move { (resource.id.clone(), self.load(resource).await) })
            .collect();

        let mut results = Vec::with_capacity(resources.len());
        while let Some(result) = pending.next().await {
            results.push(result);
        }
        results
    }
}
