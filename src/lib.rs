use std::sync::Arc;

use anyhow::Context;
use election::{k8s::ConfigMapStore, Callbacks, Coordinator, LockKey};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod cli;
pub use cli::Cli;

/// Runs one election candidate against the cluster until ctrl-c or until it
/// loses leadership.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.election_config();
    info!(kubeconfig = %cli.kubeconfig.display(), identity = %config.identity, "connecting to cluster");

    let store = Arc::new(
        ConfigMapStore::connect(Some(&cli.kubeconfig))
            .await
            .context("failed to create cluster client")?,
    );

    let shutdown = CancellationToken::new();
    let marker = leader_marker(store.clone(), config.lock_key(), cli.id.clone());
    let callbacks = callbacks(&cli.id, shutdown.clone(), marker);
    let coordinator =
        Coordinator::new(config, store, Arc::new(callbacks)).context("invalid election config")?;

    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("got interrupt, shutting down"),
            Err(e) => error!(error = %e, "failed to listen for interrupt"),
        }
        on_signal.cancel();
    });

    coordinator.run(shutdown).await;
    Ok(())
}

/// Leader work: stamp our identity into the lock ConfigMap, giving up if
/// leadership ends first.
fn leader_marker(
    store: Arc<ConfigMapStore>,
    key: LockKey,
    identity: String,
) -> impl Fn(CancellationToken) + Send + Sync + 'static {
    move |leading: CancellationToken| {
        let (store, key, identity) = (store.clone(), key.clone(), identity.clone());
        tokio::spawn(async move {
            tokio::select! {
                () = leading.cancelled() => {}
                result = store.mark_leader(&key, &identity) => match result {
                    Ok(()) => info!(lock = %key, identity, "marked configmap with leader"),
                    Err(e) => warn!(lock = %key, error = %e, "failed to mark configmap with leader"),
                },
            }
        });
    }
}

/// Logs every transition and starts leader work; losing leadership ends the
/// process.
fn callbacks(
    identity: &str,
    shutdown: CancellationToken,
    on_leading: impl Fn(CancellationToken) + Send + Sync + 'static,
) -> Callbacks {
    let started = identity.to_string();
    let stopped = identity.to_string();
    let me = identity.to_string();

    Callbacks::new()
        .with_started_leading(move |leading| {
            info!(identity = %started, "start leading");
            on_leading(leading);
        })
        .with_stopped_leading(move || {
            info!(identity = %stopped, "stop leading");
            shutdown.cancel();
        })
        .with_new_leader(move |leader| {
            if leader != me {
                info!(leader, "new leader");
            }
        })
}
