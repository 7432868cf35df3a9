//! Keydrop file drop server

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use keydrop_server::args::Args;
use keydrop_server::db::{self, TransferLedger};
use keydrop_server::hub::ProgressHub;
use keydrop_server::server::Server;
use keydrop_server::store::{self, ObjectStore};
use keydrop_server::transfers::TransferCoordinator;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting keydropd");

    let ledger = setup_db(args.database.clone()).await;
    let store = setup_store(args.storage_root.clone()).await;

    let hub = Arc::new(ProgressHub::new());
    let coordinator = Arc::new(TransferCoordinator::new(
        args.server_config(),
        ledger,
        store,
        hub,
    ));

    // Report drift left behind by a previous run; nothing is repaired here
    match coordinator.check_consistency().await {
        Ok(missing) if !missing.is_empty() => {
            tracing::warn!(count = missing.len(), ids = ?missing, "objects recorded without bytes");
        }
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "consistency check failed"),
    }

    let server = match Server::bind(
        args.bind,
        args.transfer_port,
        args.progress_port,
        Arc::clone(&coordinator),
    )
    .await
    {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(bind = %args.bind, error = %e, "failed to bind listeners");
            process::exit(1);
        }
    };

    if let (Ok(transfer), Ok(progress)) = (server.transfer_addr(), server.progress_addr()) {
        tracing::info!(%transfer, %progress, "listening");
    }

    server.run(setup_shutdown_signal()).await;
    tracing::info!("server stopped");
}

/// Open the ledger, exiting if the database cannot be initialized
async fn setup_db(database_path: Option<PathBuf>) -> TransferLedger {
    let db_path = database_path.unwrap_or_else(|| match db::default_database_path() {
        Ok(path) => path,
        Err(e) => {
            tracing::error!(error = %e, "no database path");
            process::exit(1);
        }
    });

    let pool = match db::init_db(&db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(path = %db_path.display(), error = %e, "failed to initialize database");
            process::exit(1);
        }
    };
    tracing::info!(path = %db_path.display(), "database ready");

    TransferLedger::new(pool)
}

/// Open the object store and clear partial writes from a previous run
async fn setup_store(storage_root: Option<PathBuf>) -> ObjectStore {
    let Some(root) = storage_root.or_else(store::default_storage_root) else {
        tracing::error!("no platform data directory; pass --storage-root");
        process::exit(1);
    };

    let store = match ObjectStore::open(root).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "failed to open object store");
            process::exit(1);
        }
    };

    match store.sweep_partials().await {
        Ok(0) => {}
        Ok(removed) => tracing::info!(removed, "removed partial objects"),
        Err(e) => tracing::warn!(error = %e, "failed to sweep partial objects"),
    }
    tracing::info!(root = %store.root().display(), "object store ready");

    store
}

/// Resolve on SIGINT or SIGTERM (ctrl-c elsewhere)
async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "failed to install signal handlers");
                process::exit(1);
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            process::exit(1);
        }
    }
}
