//! Collection-and-delivery engine
//!
//! The supervisor starts one independent task per configured instance. Tasks share
//! nothing but the status ledger, and nothing a worker does can take down another
//! worker or the process.

mod worker;

use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

use crate::collectors::CollectorRegistry;
use crate::config::Instance;
use crate::harbor::HarborRegistry;
use crate::status::StatusLedger;
use crate::transport::Transport;

pub use worker::{DeliveryPolicy, InstanceWorker};

pub struct Supervisor {
    harbors: Arc<HarborRegistry>,
    collectors: Arc<CollectorRegistry>,
    transport: Arc<dyn Transport>,
    ledger: StatusLedger,
    policy: DeliveryPolicy,
}

impl Supervisor {
    pub fn new(
        harbors: Arc<HarborRegistry>,
        collectors: Arc<CollectorRegistry>,
        transport: Arc<dyn Transport>,
        ledger: StatusLedger,
    ) -> Self {
        Self {
            harbors,
            collectors,
            transport,
            ledger,
            policy: DeliveryPolicy::default(),
        }
    }

    /// Run every instance until all workers have terminated.
    ///
    /// Healthy workers never terminate, so in practice this only returns when every
    /// instance failed to resolve. An empty list idles forever.
    pub async fn run(&self, instances: Vec<Instance>) {
        if instances.is_empty() {
            warn!("No instances configured, idling");
            std::future::pending::<()>().await;
        }

        info!("Starting {} instance worker(s)", instances.len());

        let tasks = instances.into_iter().map(|instance| {
            let span = info_span!("instance", name = %instance.name);
            let name = instance.name.clone();
            let ledger = self.ledger.clone();
            let worker = InstanceWorker::resolve(
                instance,
                &self.harbors,
                &self.collectors,
                self.transport.clone(),
                self.ledger.clone(),
                self.policy,
            );

            tokio::spawn(
                async move {
                    match worker {
                        Ok(worker) => worker.run().await,
                        Err(e) => {
                            error!("Worker not started: {}", e);
                            ledger.update(&name, Some(e)).await;
                        }
                    }
                }
                .instrument(span),
            )
        });

        for result in join_all(tasks).await {
            if let Err(e) = result {
                error!("Instance worker aborted: {}", e);
            }
        }

        warn!("All instance workers have terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpTransport;
    use std::time::Duration;

    fn supervisor(ledger: &StatusLedger) -> Supervisor {
        Supervisor::new(
            Arc::new(HarborRegistry::bundled().unwrap()),
            Arc::new(CollectorRegistry::with_builtins()),
            Arc::new(HttpTransport::new().unwrap()),
            ledger.clone(),
        )
    }

    fn instance(name: &str, source: &str, harbor_type: &str) -> Instance {
        Instance {
            name: name.into(),
            harbor_id: "1".into(),
            source: source.into(),
            harbor_type: harbor_type.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_instance_list_idles() {
        let ledger = StatusLedger::in_memory();
        let sup = supervisor(&ledger);
        let outcome = tokio::time::timeout(Duration::from_millis(200), sup.run(Vec::new())).await;
        assert!(outcome.is_err(), "supervisor must not return with no instances");
    }

    #[tokio::test]
    async fn test_misconfigured_workers_terminate_unhealthy() {
        let ledger = StatusLedger::in_memory();
        let sup = supervisor(&ledger);

        tokio::time::timeout(
            Duration::from_secs(5),
            sup.run(vec![
                instance("bad-type", "linux", "zeppelin"),
                instance("bad-source", "telepathy", "gps"),
            ]),
        )
        .await
        .expect("supervisor returns once every worker terminated");

        let bad_type = ledger.get("bad-type").unwrap();
        assert!(!bad_type.healthy);
        assert!(bad_type.last_error.contains("unknown harbor type: zeppelin"));

        let bad_source = ledger.get("bad-source").unwrap();
        assert!(!bad_source.healthy);
        assert!(bad_source.last_error.contains("unknown source: telepathy"));
    }

    #[tokio::test]
    async fn test_bad_instance_does_not_stop_others() {
        let stub = lighthouse_devkit::IngestStub::start().await.unwrap();
        let ledger = StatusLedger::in_memory();
        let sup = supervisor(&ledger);

        let mut good = instance("good", "exec", "raw");
        good.endpoint = Some(stub.base_url());
        good.params.insert("command".into(), "echo {\"v\":1}".into());

        let run = sup.run(vec![instance("bad", "linux", "zeppelin"), good]);
        let _ = tokio::time::timeout(Duration::from_secs(3), run).await;

        assert!(!ledger.get("bad").unwrap().healthy);
        if cfg!(unix) {
            assert_eq!(stub.requests_to("/api/v2/ingest").len(), 1);
            assert!(ledger.get("good").unwrap().healthy);
        }
    }
}
