// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use chatwire::config::{ClientConfig, LogFormat};

#[tokio::main]
async fn main() {
    chatwire::install_crypto_provider();
    let config = ClientConfig::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }

    if let Err(e) = chatwire::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
