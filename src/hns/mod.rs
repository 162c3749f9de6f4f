pub mod endpoint;
pub mod policy;

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::{Error, Result};

/// Entity kinds understood by the host network agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HnsEntity {
    EndpointV1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HnsOperation {
    Enumerate,
    Modify,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnsRequest {
    #[serde(rename = "Entity")]
    pub entity: HnsEntity,
    #[serde(rename = "Operation")]
    pub operation: HnsOperation,
    #[serde(rename = "Request")]
    pub request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnsResponse {
    #[serde(rename = "Response")]
    pub response: Option<serde_json::Value>,
    #[serde(rename = "Error")]
    pub error: Option<String>,
}

/// Request/response boundary to the host network agent. The agent owns the
/// endpoint objects; everything this crate does to them goes through here.
pub trait HnsAgent {
    fn invoke(&self, req: HnsRequest) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Speaks the JSON request/response protocol over a local socket, one
/// connection per request.
#[derive(Debug, Clone)]
pub struct HnsAgentClient {
    addr: SocketAddr,
}

impl HnsAgentClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl HnsAgent for HnsAgentClient {
    async fn invoke(&self, req: HnsRequest) -> Result<Vec<u8>> {
        debug!("calling hns agent at {}", self.addr);
        let mut stream = TcpStream::connect(self.addr).await?;
        let payload = serde_json::to_vec(&req)?;
        stream.write_all(&payload).await?;
        stream.shutdown().await?;

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;

        let res: HnsResponse = serde_json::from_slice(&buf)?;
        if let Some(e) = res.error {
            return Err(Error::AgentError(e));
        }
        match res.response {
            Some(v) => Ok(serde_json::to_vec(&v)?),
            None => Ok(Vec::new()),
        }
    }
}
