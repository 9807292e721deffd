// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! The noah-indexer executable.

use std::sync::Arc;

use clap::Parser;
use noah_indexer::{
    broadcast::HttpBroadcaster,
    bus::NullBus,
    common::IndexerError,
    config::IndexerConfig,
    db::Store,
    indexer::Indexer,
    kv::SymbolTable,
    node::HttpNodeClient,
};
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() -> Result<(), IndexerError> {
    let config = IndexerConfig::parse();

    let default_level = if config.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    if config.debug {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
    }

    let store = Arc::new(Store::connect(&config.database_url).await?);
    let kv = Arc::new(SymbolTable::open(&config.kv_path)?);
    let node = Arc::new(HttpNodeClient::new(&config.node_url));
    let broadcaster = Arc::new(HttpBroadcaster::new(
        &config.ws_host,
        config.ws_port,
        &config.ws_key,
    ));
    let bus = Arc::new(NullBus);

    Indexer::new(config, node, store, kv, bus, broadcaster)
        .run()
        .await
}
