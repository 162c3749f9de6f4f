use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::Receiver;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AgentArgs;
use crate::hns::HnsAgent;
use crate::hns::endpoint::resolve_endpoint_by_ip;
use crate::hns::policy::{apply_redirect, remove_redirect};
use crate::kubernetes::{PodClient, PodSnapshot};
use crate::metrics::{OUTCOME_APPLIED, OUTCOME_FAILED, OUTCOME_REMOVED, RedirectorMetrics};
use crate::Result;

/// Event-driven loop keeping metadata redirect policies in step with the pods
/// scheduled on this node.
///
/// The pod map is the loop's single source of truth for apply-vs-remove: a
/// pod is recorded iff its redirect was last known applied. Only this loop
/// ever touches the map and it processes one event to completion at a time,
/// so no locking is needed. A failed mutation never changes the map; the next
/// event for the same pod retries.
pub struct Redirector<A, P> {
    node_name: String,
    host_ip: String,
    metadata_ip: String,
    metadata_port: String,
    proxy_port: String,
    grace: Duration,
    agent: A,
    pods: P,
    metrics: RedirectorMetrics,
    ready: Arc<AtomicBool>,
    pod_map: HashMap<String, String>,
}

impl<A, P> Redirector<A, P>
where
    A: HnsAgent,
    P: PodClient,
{
    pub fn new(
        args: &AgentArgs,
        agent: A,
        pods: P,
        metrics: RedirectorMetrics,
        ready: Arc<AtomicBool>,
    ) -> Self {
        Self {
            node_name: args.node_name.clone(),
            host_ip: args.host_ip.clone(),
            metadata_ip: args.metadata_ip.clone(),
            metadata_port: args.metadata_port.clone(),
            proxy_port: args.proxy_port.clone(),
            grace: Duration::from_secs(args.shutdown_grace_seconds),
            agent,
            pods,
            metrics,
            ready,
            pod_map: HashMap::new(),
        }
    }

    /// Runs until `cancel` fires, then drains every redirect on this node,
    /// signals `drained`, sleeps the grace period and returns the process
    /// exit code.
    pub async fn run(
        mut self,
        mut events: Receiver<PodSnapshot>,
        cancel: CancellationToken,
        drained: CancellationToken,
    ) -> i32 {
        info!("redirector loop started");
        self.apply_existing().await;
        self.ready.store(true, Ordering::Release);

        loop {
            // shutdown wins over any queued event
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let code = self.drain().await;
                    drained.cancel();
                    // let downstream observe pod deletion before the process goes away
                    info!("handled termination, awaiting pod deletion");
                    sleep(self.grace).await;
                    info!("exiting with {code}");
                    return code;
                }
                event = events.recv() => match event {
                    Some(pod) => self.handle_event(pod).await,
                    None => {
                        error!("pod event channel closed, shutting down");
                        cancel.cancel();
                    }
                },
            }
        }
    }

    /// Startup pass: redirect every pod already scheduled on this node.
    /// Failures are logged and metered, never abort the remaining pods.
    async fn apply_existing(&mut self) {
        info!("applying redirect policy for existing pods");

        let pods = match self.pods.list_pods().await {
            Ok(pods) => pods,
            Err(e) => {
                error!(%e, "failed to list pods for existing pod pass");
                return;
            }
        };

        for pod in pods {
            if pod.node_name != self.node_name || pod.ip.is_empty() || pod.ip == self.host_ip {
                continue;
            }
            match self.apply(&pod.ip).await {
                Ok(_) => {
                    self.metrics.report(&pod.ip, &self.node_name, OUTCOME_APPLIED);
                    self.pod_map.insert(pod.uid, pod.ip);
                }
                Err(e) => {
                    self.metrics.report(&pod.ip, &self.node_name, OUTCOME_FAILED);
                    error!(%e, pod = %pod.name, "failed to apply redirect for existing pod");
                }
            }
        }
        info!("tracking {} pods", self.pod_map.len());
    }

    /// A tracked pod signals teardown, an untracked one signals arrival; the
    /// map is the only source of truth for which direction an event means.
    async fn handle_event(&mut self, pod: PodSnapshot) {
        if pod.node_name != self.node_name {
            return;
        }

        if let Some(recorded_ip) = self.pod_map.get(&pod.uid).cloned() {
            // the event's own IP may already be cleared by teardown, so the
            // removal targets the IP recorded at apply time
            info!(pod = %pod.name, uid = %pod.uid, "removing redirect");
            match self.remove(&recorded_ip).await {
                Ok(_) => {
                    self.metrics
                        .report(&recorded_ip, &self.node_name, OUTCOME_REMOVED);
                    self.pod_map.remove(&pod.uid);
                }
                Err(e) => {
                    self.metrics
                        .report(&recorded_ip, &self.node_name, OUTCOME_FAILED);
                    error!(%e, pod = %pod.name, "failed to remove redirect, keeping record for retry");
                }
            }
        } else {
            if pod.ip.is_empty() || pod.ip == self.host_ip {
                return;
            }
            info!(pod = %pod.name, uid = %pod.uid, "applying redirect");
            match self.apply(&pod.ip).await {
                Ok(_) => {
                    self.metrics.report(&pod.ip, &self.node_name, OUTCOME_APPLIED);
                    self.pod_map.insert(pod.uid, pod.ip);
                }
                Err(e) => {
                    self.metrics.report(&pod.ip, &self.node_name, OUTCOME_FAILED);
                    error!(%e, pod = %pod.name, "failed to apply redirect");
                }
            }
        }
    }

    /// Shutdown drain: remove the redirect for every pod on this node. A
    /// failed pod listing sets a non-zero exit code but the drain still
    /// completes.
    async fn drain(&mut self) -> i32 {
        info!("removing redirect policy for existing pods");
        let mut exit_code = 0;

        let pods = match self.pods.list_pods().await {
            Ok(pods) => pods,
            Err(e) => {
                error!(%e, "failed to list pods for shutdown drain");
                exit_code = 1;
                Vec::new()
            }
        };

        for pod in pods {
            if pod.node_name != self.node_name {
                continue;
            }
            let ip = self
                .pod_map
                .get(&pod.uid)
                .cloned()
                .unwrap_or_else(|| pod.ip.clone());
            match self.remove(&ip).await {
                Ok(_) => {
                    self.metrics.report(&ip, &self.node_name, OUTCOME_REMOVED);
                    self.pod_map.remove(&pod.uid);
                }
                Err(e) => {
                    self.metrics.report(&ip, &self.node_name, OUTCOME_FAILED);
                    error!(%e, pod = %pod.name, "failed to remove redirect during drain");
                }
            }
        }
        info!("drain complete, still tracking {} pods", self.pod_map.len());
        exit_code
    }

    async fn apply(&self, pod_ip: &str) -> Result<()> {
        let endpoint = resolve_endpoint_by_ip(&self.agent, pod_ip).await?;
        apply_redirect(
            &self.agent,
            endpoint,
            &self.metadata_ip,
            &self.metadata_port,
            &self.host_ip,
            &self.proxy_port,
        )
        .await
    }

    async fn remove(&self, pod_ip: &str) -> Result<()> {
        let endpoint = resolve_endpoint_by_ip(&self.agent, pod_ip).await?;
        remove_redirect(&self.agent, endpoint, &self.metadata_ip).await
    }
}
