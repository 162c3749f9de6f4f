pub mod config;
pub mod hns;
pub mod http;
pub mod kubernetes;
pub mod metrics;
pub mod redirector;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("missing IP address")]
    MissingIpAddress,

    #[error("no endpoint found for IP address {0}")]
    EndpointNotFound(String),

    #[error(transparent)]
    JsonConversion(#[from] serde_json::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("hns agent error: {0}")]
    AgentError(String),

    #[error("pod event channel closed")]
    ChannelClosed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
