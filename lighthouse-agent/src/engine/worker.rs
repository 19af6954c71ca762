//! Instance worker
//!
//! One worker per configured instance. Routing (harbor type, URL, collector) is
//! resolved once before the loop; a resolution failure is terminal for the worker.
//! Each tick runs a single cycle: collect, shape the payload for the harbor mode,
//! deliver, record the outcome in the status ledger.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::collectors::{CollectError, Collector, CollectorRegistry, MetricRecord};
use crate::config::Instance;
use crate::harbor::{self, HarborError, HarborRegistry, Mode};
use crate::status::StatusLedger;
use crate::transport::{self, CargoSample, DeliveryError, Transport};

/// Cooldown after a rate-limited batch
pub const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// Outer budget for a single collector call
pub const COLLECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    pub cooldown: Duration,
    pub collect_timeout: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            cooldown: RATE_LIMIT_COOLDOWN,
            collect_timeout: COLLECT_TIMEOUT,
        }
    }
}

/// Configuration error found while resolving an instance's routing
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Harbor(#[from] HarborError),

    #[error("configuration error: {0}")]
    Collector(#[from] CollectError),
}

pub struct InstanceWorker {
    instance: Instance,
    mode: Mode,
    url: String,
    collector: Arc<dyn Collector>,
    transport: Arc<dyn Transport>,
    ledger: StatusLedger,
    policy: DeliveryPolicy,
}

impl InstanceWorker {
    /// Resolve harbor type, delivery URL and collector for `instance`
    pub fn resolve(
        instance: Instance,
        harbors: &HarborRegistry,
        collectors: &CollectorRegistry,
        transport: Arc<dyn Transport>,
        ledger: StatusLedger,
        policy: DeliveryPolicy,
    ) -> Result<Self, StartupError> {
        let def = harbors.resolve(&instance.harbor_type)?;
        let url = harbor::ingest_url(instance.endpoint.as_deref(), &instance.harbor_id, def);
        let collector = collectors.resolve(&instance.source)?;

        Ok(Self {
            mode: def.mode,
            url,
            instance,
            collector,
            transport,
            ledger,
            policy,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Tick forever. Ticks missed while a cycle overruns are dropped, not replayed.
    pub async fn run(self) {
        let interval = self.instance.effective_interval();
        info!("Started ({} mode) -> {} every {:?}", self.mode, self.url(), interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.run_cycle().await;
        }
    }

    /// One collect-and-deliver cycle
    pub async fn run_cycle(&self) {
        let records = match self.collect().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Collection failed: {}", e);
                self.ledger.update(&self.instance.name, Some(e)).await;
                return;
            }
        };

        // Nothing collected: no request, status left as it was
        if records.is_empty() {
            debug!("Collector returned no records, skipping delivery");
            return;
        }

        match self.mode {
            Mode::Raw => self.deliver_raw(records).await,
            Mode::Cargo => self.deliver_cargo(&records).await,
        }
    }

    async fn collect(&self) -> Result<Vec<MetricRecord>, CollectError> {
        let budget = self.policy.collect_timeout;
        tokio::time::timeout(budget, self.collector.collect(&self.instance.params))
            .await
            .map_err(|_| CollectError::Timeout {
                what: format!("collector '{}'", self.instance.source),
                after: budget,
            })?
    }

    async fn deliver_raw(&self, records: Vec<MetricRecord>) {
        let Some(mut document) = records.into_iter().next() else {
            return;
        };
        document.insert("time".into(), json!(transport::timestamp()));
        document.insert("ship_id".into(), json!(self.instance.name));

        let result = self
            .transport
            .send(&self.url, &self.instance.api_key, &Value::Object(document))
            .await;

        if let Err(e) = &result {
            warn!("Send failed: {}", e);
        }
        self.ledger.update(&self.instance.name, result.err()).await;
    }

    async fn deliver_cargo(&self, records: &[MetricRecord]) {
        let samples = flatten_samples(records, &self.instance.name);
        let batch_url = format!("{}/batch", self.url);
        let batch_size = self.instance.effective_batch_size();
        let mut all_delivered = true;

        for (index, chunk) in samples.chunks(batch_size).enumerate() {
            let result = match serde_json::to_value(chunk) {
                Ok(body) => {
                    self.transport
                        .send(&batch_url, &self.instance.api_key, &body)
                        .await
                }
                Err(e) => Err(DeliveryError::from(e)),
            };

            let Err(e) = result else {
                debug!("Batch {} delivered ({} samples)", index, chunk.len());
                continue;
            };

            all_delivered = false;
            warn!("Batch {} failed: {}", index, e);
            let rate_limited = e.is_rate_limited();
            self.ledger.update(&self.instance.name, Some(e)).await;

            if rate_limited {
                warn!("Rate limited, cooling down for {:?}", self.policy.cooldown);
                tokio::time::sleep(self.policy.cooldown).await;
            }
        }

        if all_delivered {
            self.ledger.update(&self.instance.name, None::<DeliveryError>).await;
        }
    }
}

/// One timestamped sample per field across all records, record order preserved
pub fn flatten_samples(records: &[MetricRecord], ship_id: &str) -> Vec<CargoSample> {
    records
        .iter()
        .flat_map(|record| record.iter())
        .map(|(field, value)| CargoSample {
            time: transport::timestamp(),
            ship_id: ship_id.to_string(),
            cargo_id: field.clone(),
            value: value.clone(),
        })
        .collect()
}
