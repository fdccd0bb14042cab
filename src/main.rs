#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use futures::future;
use ns_isolation_controller::{mirror, Admin, Admission, PluginContext};
use ns_isolation_controller_core::Plugins;
use ns_isolation_controller_k8s_api as k8s;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use structopt::StructOpt;
use tracing::{debug, info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "ns-isolation",
    about = "Enforces default-deny ingress isolation on namespaces"
)]
struct Args {
    #[structopt(long, default_value = "0.0.0.0:9990")]
    admin_addr: SocketAddr,

    #[structopt(long, default_value = "0.0.0.0:9443")]
    webhook_addr: SocketAddr,

    /// Admission plugins to enable, in order.
    #[structopt(
        long,
        default_value = "NamespaceNetworkIsolation",
        use_delimiter = true
    )]
    admission_plugins: Vec<String>,

    /// A configuration file handed to each admission plugin.
    #[structopt(long)]
    admission_config: Option<PathBuf>,

    #[structopt(long, default_value = "plain", possible_values = &["plain", "json"])]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        admin_addr,
        webhook_addr,
        admission_plugins,
        admission_config,
        log_format,
    } = Args::from_args();

    init_tracing(&log_format)?;

    let config = match admission_config {
        Some(path) => Some(
            std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?,
        ),
        None => None,
    };

    let client = kube::Client::try_default()
        .await
        .context("failed to initialize Kubernetes client")?;

    // Mirrors all namespaces so that admitted mutations can be confirmed locally.
    let k8s::ResourceWatches { namespaces } = client.into();
    let (writer, store) = mirror::pair();
    let mut index = tokio::spawn(
        mirror::index(namespaces, writer).instrument(info_span!("namespaces")),
    );

    let mut plugins = Plugins::default();
    ns_isolation_controller::register_plugins(&mut plugins)?;
    let chain = plugins.new_from_plugins(
        &admission_plugins,
        config.as_deref(),
        &PluginContext::new(Arc::new(store)),
    )?;
    let admission = Admission::new(chain);

    let (drain_tx, drain_rx) = drain::channel();

    let admin = {
        let admission = admission.clone();
        Admin::new(move || admission.is_ready())
    };
    let mut admin = tokio::spawn(
        admin
            .serve(admin_addr, drain_rx.clone())
            .instrument(info_span!("admin")),
    );
    let mut webhook = tokio::spawn(
        admission
            .serve(webhook_addr, drain_rx)
            .instrument(info_span!("webhook")),
    );

    let res = tokio::select! {
        _ = shutdown() => {
            info!("Received shutdown signal");
            Ok(())
        }
        res = &mut index => match res.context("namespace index panicked") {
            Ok(error) => Err(error.context("namespace index failed")),
            Err(error) => Err(error),
        },
        res = &mut admin => res
            .context("admin server panicked")
            .and_then(|r| r.context("admin server failed")),
        res = &mut webhook => res
            .context("webhook server panicked")
            .and_then(|r| r.context("webhook server failed")),
    };

    index.abort();
    drain_tx.drain().await;
    debug!("Drained");
    res
}

fn init_tracing(format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ns_isolation=info,warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let res = match format {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    res.map_err(|error| anyhow!(error))
}

async fn shutdown() {
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(error) => {
                warn!(%error, "Failed to register SIGTERM handler");
                future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term => {}
    }
}
