//! Observer supervisor
//!
//! Runs every configured observer as an independent task under one shared
//! cancellation token.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AgentConfig;
use crate::error::{Error, Result};

use super::runner::{CycleReport, Observer, ObserverContext, ObserverStatus, StatusMap};

/// Owns the observers and their shared status table.
pub struct ObserverSupervisor {
    observers: Vec<Observer>,
    status: StatusMap,
}

impl ObserverSupervisor {
    pub fn new(observers: Vec<Observer>) -> Self {
        let status: StatusMap = Arc::new(DashMap::new());
        let observers = observers
            .into_iter()
            .map(|o| o.with_status(status.clone()))
            .collect();
        Self { observers, status }
    }

    /// Build one observer per enabled entry in `config`.
    pub fn from_config(config: &AgentConfig, ctx: ObserverContext) -> Self {
        let observers = config
            .enabled_observers()
            .cloned()
            .map(|o| Observer::new(o, ctx.clone()))
            .collect();
        Self::new(observers)
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Shared status table, updated after every cycle.
    pub fn status(&self) -> StatusMap {
        self.status.clone()
    }

    /// True once every observer has completed a cycle.
    pub fn is_ready(status: &DashMap<String, ObserverStatus>) -> bool {
        status.iter().all(|entry| entry.cycles > 0)
    }

    /// Run all observers until `cancel` fires.
    ///
    /// An observer that fails stops on its own; the others keep running.
    /// Returns the first failure once every observer has stopped.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!(observers = self.observers.len(), "Starting observers");

        let handles: Vec<_> = self
            .observers
            .into_iter()
            .map(|mut observer| {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let name = observer.name().to_string();
                    (name, observer.run(cancel).await)
                })
            })
            .collect();

        let mut first_error = None;
        for joined in join_all(handles).await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => {
                    error!(observer = %name, "Observer exited with error: {}", e);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!("Observer task panicked: {}", e);
                    first_error.get_or_insert(Error::Internal(format!("observer task failed: {}", e)));
                }
            }
        }

        info!("All observers stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Run one cycle of every observer concurrently.
    pub async fn run_once(mut self, cancel: CancellationToken) -> Vec<(String, Result<CycleReport>)> {
        let cycles = self.observers.iter_mut().map(|observer| {
            let cancel = cancel.clone();
            async move {
                let name = observer.name().to_string();
                let result = observer.run_cycle(&cancel).await;
                (name, result)
            }
        });
        join_all(cycles).await
    }
}

impl std::fmt::Debug for ObserverSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSupervisor")
            .field("observers", &self.observers)
            .finish()
    }
}
