use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::State as AxumState;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use http::StatusCode;
use kube::Api;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Result;
use crate::hns::{HnsAgent, HnsEntity, HnsOperation, HnsRequest};
use crate::http::shutdown;
use crate::kubernetes::crds::WorkloadIdentity;
use crate::metrics::REGISTRY;

pub struct State<A, K> {
    ready: Arc<AtomicBool>,
    liveness: Option<Liveness<A, K>>,
}

/// Optional deeper probe: the agent must answer an endpoint enumeration and
/// the API server must answer a WorkloadIdentity list.
pub struct Liveness<A, K> {
    pub agent: A,
    pub identities: K,
}

/// API-server side of the rich probe.
pub trait IdentitySource {
    fn probe(&self) -> impl Future<Output = Result<()>> + Send;
}

impl IdentitySource for kube::Client {
    async fn probe(&self) -> Result<()> {
        let identities: Api<WorkloadIdentity> = Api::all(self.clone());
        identities.list(&Default::default()).await?;
        Ok(())
    }
}

impl<A, K> State<A, K> {
    pub fn new(ready: Arc<AtomicBool>, liveness: Option<Liveness<A, K>>) -> Self {
        Self { ready, liveness }
    }
}

pub async fn serve<A, K>(
    addr: SocketAddr,
    state: Arc<State<A, K>>,
    cancel: CancellationToken,
) -> Result<()>
where
    A: HnsAgent + Send + Sync + 'static,
    K: IdentitySource + Send + Sync + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!("probes listening on {}", addr);

    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(cancel))
        .await?;
    Ok(())
}

pub fn router<A, K>(state: Arc<State<A, K>>) -> Router
where
    A: HnsAgent + Send + Sync + 'static,
    K: IdentitySource + Send + Sync + 'static,
{
    Router::new()
        .route("/healthz", get(healthz::<A, K>))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Always reports the readiness flag in the body; the status code only drops
/// to 500 when a configured liveness probe fails.
async fn healthz<A, K>(AxumState(state): AxumState<Arc<State<A, K>>>) -> Response
where
    A: HnsAgent + Send + Sync + 'static,
    K: IdentitySource + Send + Sync + 'static,
{
    let mut status = StatusCode::OK;

    if let Some(liveness) = &state.liveness {
        let request = HnsRequest {
            entity: HnsEntity::EndpointV1,
            operation: HnsOperation::Enumerate,
            request: None,
        };
        if let Err(e) = liveness.agent.invoke(request).await {
            error!(%e, "hns agent liveness check failed");
            status = StatusCode::INTERNAL_SERVER_ERROR;
        }

        if let Err(e) = liveness.identities.probe().await {
            error!(%e, "api server liveness check failed");
            status = StatusCode::INTERNAL_SERVER_ERROR;
        }
    }

    let body = if state.ready.load(Ordering::Acquire) {
        "Active"
    } else {
        "Not Active"
    };
    (status, body).into_response()
}

async fn metrics() -> String {
    let mut buffer = String::new();
    let guard = REGISTRY.read().unwrap();
    match prometheus_client::encoding::text::encode(&mut buffer, &guard) {
        Ok(_) => buffer,
        Err(_) => "".into(),
    }
}
