use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::Parser;
use identity_proxy_agent::config::{AgentArgs, Cli, Commands};
use identity_proxy_agent::hns::HnsAgentClient;
use identity_proxy_agent::http::probes;
use identity_proxy_agent::kubernetes::{self, KubePodClient};
use identity_proxy_agent::metrics::RedirectorMetrics;
use identity_proxy_agent::redirector::Redirector;
use identity_proxy_agent::Result;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Agent(args) => {
            setup_subscriber();
            match run(args).await {
                Ok(code) => code,
                Err(e) => {
                    error!("agent failed: {e}");
                    1
                }
            }
        }
    };
    info!("Exiting...");
    std::process::exit(code);
}

async fn run(args: AgentArgs) -> Result<i32> {
    let kube_client = kube::Client::try_default().await?;
    let agent = HnsAgentClient::new(args.hns_agent_address);
    let ready = Arc::new(AtomicBool::new(false));
    let cancel = CancellationToken::new();
    let drained = CancellationToken::new();

    let liveness = args.rich_probe.then(|| probes::Liveness {
        agent: agent.clone(),
        identities: kube_client.clone(),
    });
    let probe_state = Arc::new(probes::State::new(ready.clone(), liveness));
    // probes keep serving through the drain; they stop once it has completed
    let mut probe_handle = tokio::spawn(probes::serve(
        args.probe_address,
        probe_state,
        drained.clone(),
    ));

    let (tx, rx) = mpsc::channel(1024);
    let mut watch_handle = tokio::spawn(kubernetes::watch_pods(kube_client.clone(), tx));

    let pods = KubePodClient::new(kube_client);
    let redirector = Redirector::new(&args, agent, pods, RedirectorMetrics::default(), ready);
    let mut redirector_handle =
        tokio::spawn(redirector.run(rx, cancel.clone(), drained.clone()));

    let mut shutdown_handle = tokio::spawn(async move { shutdown_signal().await });

    // watch for shutdown and errors
    let code = tokio::select! {
        h = &mut redirector_handle => join_code(h),
        h = &mut probe_handle => {
            exit("probes", h);
            cancel.cancel();
            join_code(redirector_handle.await)
        }
        h = &mut watch_handle => {
            exit("pod watch", h);
            cancel.cancel();
            join_code(redirector_handle.await)
        }
        _ = &mut shutdown_handle => {
            info!("shutdown signal received");
            cancel.cancel();
            join_code(redirector_handle.await)
        }
    };
    Ok(code)
}

fn setup_subscriber() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "identity_proxy_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {
          info!("captured ctrl_c signal");
        },
        _ = terminate => {},
    }
}

fn exit(task: &str, out: std::result::Result<Result<()>, JoinError>) {
    match out {
        Ok(Ok(_)) => {
            info!("{task} exited")
        }
        Ok(Err(e)) => {
            error!("{task} failed with error: {e}")
        }
        Err(e) => {
            error!("{task} task failed to complete: {e}")
        }
    }
}

fn join_code(out: std::result::Result<i32, JoinError>) -> i32 {
    match out {
        Ok(code) => code,
        Err(e) => {
            error!("redirector task failed to complete: {e}");
            1
        }
    }
}
