use std::net::SocketAddr;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Commands {
    Agent(AgentArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct AgentArgs {
    /// Name of the node the agent is running on
    #[arg(long, env = "NODE_NAME")]
    pub node_name: String,

    /// IP of the host the agent is running on
    #[arg(long, env = "HOST_IP")]
    pub host_ip: String,

    /// Metadata endpoint IP that pod traffic gets redirected away from
    #[arg(long, env = "METADATA_IP", default_value = "169.254.169.254")]
    pub metadata_ip: String,

    /// Metadata endpoint port
    #[arg(long, env = "METADATA_PORT", default_value = "80")]
    pub metadata_port: String,

    /// Port the local identity proxy listens on
    #[arg(long, env = "PROXY_PORT", default_value = "2579")]
    pub proxy_port: String,

    /// Listener for health probes and metrics
    #[arg(long, default_value = "0.0.0.0:8085")]
    pub probe_address: SocketAddr,

    /// Address of the host network agent
    #[arg(long, env = "HNS_AGENT_ADDRESS", default_value = "127.0.0.1:10090")]
    pub hns_agent_address: SocketAddr,

    /// Seconds to wait after the shutdown drain so pod deletion can be observed
    #[arg(long, default_value_t = 10)]
    pub shutdown_grace_seconds: u64,

    /// Perform agent and API server liveness checks in the health probe
    #[arg(long, default_value_t = false)]
    pub rich_probe: bool,
}
