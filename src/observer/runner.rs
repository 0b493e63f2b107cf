//! Observer run loop
//!
//! # Cycle
//!
//! ```text
//! resolve targets ──▶ sample N rounds ──▶ per channel: evaluate ──▶ report
//!  (family walk)       (push buffers)                                 │
//!                                                                     ▼
//!                                             snapshot ──▶ signed telemetry
//! ```
//!
//! One cancellation token covers the whole cycle. Cancellation between steps
//! ends the cycle with `Error::Cancelled` and no further reports.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ObserverConfig;
use crate::domain::{
    CounterProvider, HealthReporter, MetricKind, MetricScope, ProcessDescriptor, ProcessFamily,
    SampleTarget,
};
use crate::error::{Error, Result};
use crate::health::ThresholdHealthEvaluator;
use crate::process::ProcessFamilyResolver;
use crate::stats::stats;
use crate::telemetry::{DeliveryOutcome, MetricRecord, SignedTelemetrySender, TelemetrySnapshot};

use super::channel::MetricChannel;

/// Collaborators shared by every observer.
#[derive(Clone)]
pub struct ObserverContext {
    pub node_name: String,
    pub counters: Arc<dyn CounterProvider>,
    pub resolver: ProcessFamilyResolver,
    pub reporter: Arc<dyn HealthReporter>,
    pub sender: Option<Arc<SignedTelemetrySender>>,
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Entities sampled this cycle
    pub entities: usize,
    /// Targets that could not be located
    pub missing_targets: usize,
    /// Channels evaluated
    pub evaluated: usize,
    /// Signals accepted by the health sink
    pub signals: usize,
    /// Signals the health sink rejected
    pub failed_reports: usize,
    pub delivery: Option<DeliveryOutcome>,
}

/// Last known state of an observer, for readiness and diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObserverStatus {
    pub cycles: u64,
    pub last_cycle: Option<chrono::DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Shared status table keyed by observer name.
pub type StatusMap = Arc<DashMap<String, ObserverStatus>>;

/// An entity to sample this cycle.
#[derive(Debug, Clone)]
struct ResolvedEntity {
    entity_id: String,
    /// `None` for the node itself
    family: Option<ProcessFamily>,
}

/// A periodic probe over one scope.
pub struct Observer {
    config: ObserverConfig,
    ctx: ObserverContext,
    evaluator: ThresholdHealthEvaluator,
    channels: BTreeMap<(String, MetricKind), MetricChannel>,
    status: Option<StatusMap>,
}

impl Observer {
    pub fn new(config: ObserverConfig, ctx: ObserverContext) -> Self {
        Self {
            config,
            ctx,
            evaluator: ThresholdHealthEvaluator::new(),
            channels: BTreeMap::new(),
            status: None,
        }
    }

    /// Publish per-cycle status into `status`.
    pub fn with_status(mut self, status: StatusMap) -> Self {
        status.insert(self.config.name.clone(), ObserverStatus::default());
        self.status = Some(status);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    /// Channel for one entity and metric, if it has been sampled.
    pub fn channel(&self, entity_id: &str, kind: MetricKind) -> Option<&MetricChannel> {
        self.channels.get(&(entity_id.to_string(), kind))
    }

    /// Run cycles every `run_interval` until cancelled.
    ///
    /// Returns `Ok(())` on cancellation and the error on an unexpected
    /// failure, which stops this observer.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        info!(
            observer = %self.config.name,
            interval_secs = self.config.run_interval_secs,
            "Starting observer"
        );

        let mut ticker = tokio::time::interval(self.config.run_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_cycle(&cancel).await {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    error!(observer = %self.config.name, "Observer failed: {}", e);
                    return Err(e);
                }
            }
        }

        info!(observer = %self.config.name, "Observer stopped");
        Ok(())
    }

    /// Run a single cycle.
    #[instrument(skip(self, cancel), fields(observer = %self.config.name))]
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> Result<CycleReport> {
        let result = self.cycle(cancel).await;

        let label = match &result {
            Ok(_) => "ok",
            Err(e) if e.is_cancelled() => "cancelled",
            Err(_) => "failed",
        };
        stats().record_cycle(&self.config.name, label);
        self.update_status(&result);

        result
    }

    async fn cycle(&mut self, cancel: &CancellationToken) -> Result<CycleReport> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut report = CycleReport::default();

        for channel in self.channels.values_mut() {
            channel.begin_cycle();
        }

        let (entities, missing) = self.resolve_entities(cancel).await?;
        report.entities = entities.len();
        report.missing_targets = missing;

        self.sample(&entities, cancel).await?;

        let mut snapshot = TelemetrySnapshot::new(&self.ctx.node_name, &self.config.name);
        for entity in &entities {
            for metric in &self.config.metrics {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                let key = (entity.entity_id.clone(), metric.kind);
                let Some(channel) = self.channels.get_mut(&key) else {
                    continue;
                };
                let Some(evaluation) = channel.evaluate(&self.evaluator) else {
                    debug!(entity = %entity.entity_id, metric = %metric.kind, "No samples, skipping evaluation");
                    continue;
                };
                report.evaluated += 1;

                if let Some(signal) = &evaluation.signal {
                    stats().record_signal(signal.severity);
                    match self.ctx.reporter.report(signal).await {
                        Ok(()) => report.signals += 1,
                        Err(e) => {
                            warn!(property = %signal.property_key, "Health report dropped: {}", e);
                            stats().health_report_failures.inc();
                            report.failed_reports += 1;
                        }
                    }
                }

                let buffer = channel.buffer();
                snapshot.push(MetricRecord {
                    id: Uuid::new_v4(),
                    entity_id: entity.entity_id.clone(),
                    metric: metric.kind,
                    unit: metric.kind.unit().to_string(),
                    value: evaluation.value,
                    min: buffer.min(),
                    max: buffer.max(),
                    samples: buffer.size(),
                    severity: evaluation.severity,
                    process_count: entity.family.as_ref().map(ProcessFamily::len),
                });
            }
        }

        if let Some(sender) = &self.ctx.sender {
            if !snapshot.is_empty() {
                let payload = snapshot.to_payload()?;
                report.delivery = Some(sender.send(&payload, cancel).await?);
            }
        }

        debug!(
            entities = report.entities,
            evaluated = report.evaluated,
            signals = report.signals,
            "Cycle complete"
        );
        Ok(report)
    }

    /// Entities to sample: the node, or every locatable service target.
    async fn resolve_entities(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(Vec<ResolvedEntity>, usize)> {
        if self.config.scope == MetricScope::Node {
            let node = ResolvedEntity {
                entity_id: self.ctx.node_name.clone(),
                family: None,
            };
            return Ok((vec![node], 0));
        }

        let resolver = self.ctx.resolver.clone();
        let targets = self.config.targets.clone();
        let cancel = cancel.clone();

        // Enumeration may walk the process table or spawn `ps`.
        tokio::task::spawn_blocking(move || {
            let enumerator = resolver.enumerator();
            let mut entities = Vec::with_capacity(targets.len());
            let mut missing = 0;

            for target in &targets {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                let root = match (target.pid, &target.process_name) {
                    (Some(pid), name) => Some(ProcessDescriptor::new(
                        pid,
                        name.clone().unwrap_or_else(|| pid.to_string()),
                    )),
                    (None, Some(name)) => match enumerator.find_by_name(name) {
                        Ok(found) => found.into_iter().next(),
                        Err(e) => {
                            warn!(target = %target.entity_id, "Process lookup failed: {}", e);
                            None
                        }
                    },
                    (None, None) => None,
                };

                let Some(root) = root else {
                    warn!(target = %target.entity_id, "Target process not running, skipping");
                    missing += 1;
                    continue;
                };

                let family = if target.include_children {
                    resolver.resolve(root, &cancel)?
                } else {
                    ProcessFamily::single(root)
                };
                debug!(target = %target.entity_id, processes = family.len(), "Resolved family");

                entities.push(ResolvedEntity {
                    entity_id: target.entity_id.clone(),
                    family: Some(family),
                });
            }

            Ok((entities, missing))
        })
        .await
        .map_err(|e| Error::Internal(format!("target resolution task failed: {}", e)))?
    }

    /// Take `samples_per_cycle` rounds of every metric for every entity.
    async fn sample(&mut self, entities: &[ResolvedEntity], cancel: &CancellationToken) -> Result<()> {
        let ttl = self.config.health_ttl();

        for round in 0..self.config.samples_per_cycle {
            if round > 0 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(self.config.sample_interval()) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let counters = self.ctx.counters.clone();
            let kinds: Vec<MetricKind> = self.config.metrics.iter().map(|m| m.kind).collect();
            let batch = entities.to_vec();
            let readings = tokio::task::spawn_blocking(move || read_round(counters.as_ref(), &batch, &kinds))
                .await
                .map_err(|e| Error::Internal(format!("sampling task failed: {}", e)))??;

            for (entity_id, kind, value) in readings {
                let Some(metric) = self.config.metrics.iter().find(|m| m.kind == kind) else {
                    continue;
                };
                let channel = self
                    .channels
                    .entry((entity_id.clone(), kind))
                    .or_insert_with(|| MetricChannel::new(&self.config.name, &entity_id, metric, ttl));
                channel.push(value);
            }
        }

        Ok(())
    }

    fn update_status(&self, result: &Result<CycleReport>) {
        let Some(status) = &self.status else {
            return;
        };
        let mut entry = status.entry(self.config.name.clone()).or_default();
        match result {
            Ok(_) => {
                entry.cycles += 1;
                entry.last_cycle = Some(Utc::now());
                entry.last_error = None;
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => entry.last_error = Some(e.to_string()),
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("name", &self.config.name)
            .field("scope", &self.config.scope)
            .field("channels", &self.channels.len())
            .finish()
    }
}

/// One sampling round. Transient misses produce no reading.
fn read_round(
    counters: &dyn CounterProvider,
    entities: &[ResolvedEntity],
    kinds: &[MetricKind],
) -> Result<Vec<(String, MetricKind, f64)>> {
    counters.refresh();
    let mut readings = Vec::new();

    for entity in entities {
        for &kind in kinds {
            let value = match &entity.family {
                None => counters.sample(kind, SampleTarget::Node)?,
                Some(family) => sample_family(counters, family, kind)?,
            };

            match value {
                Some(value) => readings.push((entity.entity_id.clone(), kind, value)),
                None => warn!(entity = %entity.entity_id, metric = %kind, "Sample unavailable this round"),
            }
        }
    }

    Ok(readings)
}

/// Sum of a metric over a family. `None` if the root cannot be read;
/// unreadable descendants are left out.
fn sample_family(
    counters: &dyn CounterProvider,
    family: &ProcessFamily,
    kind: MetricKind,
) -> Result<Option<f64>> {
    let Some(mut total) = counters.sample(kind, SampleTarget::Process(family.root.pid))? else {
        return Ok(None);
    };

    for descendant in &family.descendants {
        if let Some(value) = counters.sample(kind, SampleTarget::Process(descendant.pid))? {
            total += value;
        }
    }

    Ok(Some(total))
}
