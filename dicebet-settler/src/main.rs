// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dicebet_pg_db::{run_migrations, Db, PgEventStore};
use dicebet_settler::config::Args;
use dicebet_settler::eth_client::EthClient;
use dicebet_settler::server::{run_server, AppState};
use dicebet_settler::service::SettlerService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let contract_address = args.contract_address()?;

    run_migrations(args.database_url.as_str())
        .await
        .context("Failed to run database migrations")?;
    let db = Db::new(args.database_url.clone(), args.db_args.clone())
        .await
        .context("Failed to connect to the event store")?;
    let store = Arc::new(PgEventStore::new(db));

    let client = Arc::new(
        EthClient::new(
            &args.rpc_url,
            contract_address,
            &args.settler_private_key,
            args.rpc_timeout(),
        )
        .await
        .context("Failed to set up chain client")?,
    );

    let registry = Arc::new(prometheus::Registry::new());
    let service = Arc::new(SettlerService::new(
        args.service_config()?,
        client,
        store,
        &registry,
    ));
    service
        .start()
        .await
        .context("Failed to start settler service")?;

    let socket_address = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), args.port);
    let server_handle = run_server(
        &socket_address,
        AppState {
            service: service.clone(),
            registry,
        },
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received SIGINT, shutting down");
    service.stop().await;
    server_handle.abort();
    Ok(())
}
