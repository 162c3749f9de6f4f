pub mod crds;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, ResourceExt};
use tokio::sync::mpsc::Sender;
use tracing::{error, info};

use crate::Result;

/// The slice of a Pod the redirector cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSnapshot {
    pub uid: String,
    pub name: String,
    pub ip: String,
    pub node_name: String,
    pub host_ip: String,
}

impl From<&Pod> for PodSnapshot {
    fn from(pod: &Pod) -> Self {
        let status = pod.status.as_ref();
        Self {
            uid: pod.uid().unwrap_or_default(),
            name: pod.name_any(),
            ip: status
                .and_then(|s| s.pod_ip.clone())
                .unwrap_or_default(),
            node_name: pod
                .spec
                .as_ref()
                .and_then(|s| s.node_name.clone())
                .unwrap_or_default(),
            host_ip: status
                .and_then(|s| s.host_ip.clone())
                .unwrap_or_default(),
        }
    }
}

/// One-shot pod listing used at loop start and during the shutdown drain.
pub trait PodClient {
    fn list_pods(&self) -> impl Future<Output = Result<Vec<PodSnapshot>>> + Send;
}

#[derive(Clone)]
pub struct KubePodClient {
    api: Api<Pod>,
}

impl KubePodClient {
    pub fn new(client: kube::Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

impl PodClient for KubePodClient {
    async fn list_pods(&self) -> Result<Vec<PodSnapshot>> {
        let pods = self.api.list(&Default::default()).await?;
        Ok(pods.iter().map(PodSnapshot::from).collect())
    }
}

/// Watches all pods and forwards a snapshot for every observed change into
/// the redirector's channel. Runs until the watch stream or the channel
/// closes; the channel closing means the loop is gone and there is nobody
/// left to deliver to.
pub async fn watch_pods(client: kube::Client, tx: Sender<PodSnapshot>) -> Result<()> {
    let api: Api<Pod> = Api::all(client);
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .touched_objects()
        .boxed();

    info!("started pod watch");
    while let Some(res) = stream.next().await {
        match res {
            Ok(pod) => {
                if tx.send(PodSnapshot::from(&pod)).await.is_err() {
                    return Err(crate::Error::ChannelClosed);
                }
            }
            Err(e) => {
                error!(%e, "unexpected error with pod watch stream");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use k8s_openapi::api::core::v1::{PodSpec, PodStatus};
    use kube::api::ObjectMeta;

    use super::*;

    #[test]
    fn test_snapshot_from_pod() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("workload-a".into()),
                uid: Some("uid-a".into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("node-1".into()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                pod_ip: Some("10.244.0.7".into()),
                host_ip: Some("10.240.0.4".into()),
                ..Default::default()
            }),
        };

        let snapshot = PodSnapshot::from(&pod);
        assert_eq!(snapshot.uid, "uid-a");
        assert_eq!(snapshot.name, "workload-a");
        assert_eq!(snapshot.ip, "10.244.0.7");
        assert_eq!(snapshot.node_name, "node-1");
        assert_eq!(snapshot.host_ip, "10.240.0.4");
    }

    #[test]
    fn test_snapshot_defaults_missing_fields_to_empty() {
        let pod = Pod::default();
        let snapshot = PodSnapshot::from(&pod);
        assert!(snapshot.ip.is_empty());
        assert!(snapshot.node_name.is_empty());
    }
}
