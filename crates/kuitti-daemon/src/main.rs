// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Kuitti — receipt printer service
//
// Entry point. Initialises logging, loads the config, registers the
// configured printers and serves the CloudPRNT endpoint until Ctrl-C.

mod config_path;

use std::process::ExitCode;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use kuitti_core::config::ServiceConfig;
use kuitti_core::error::Result;
use kuitti_print::PrinterService;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "kuitti stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let path = config_path::config_path();
    tracing::info!(config = %path.display(), "Kuitti starting");
    let config = ServiceConfig::load(&path)?;

    let service = PrinterService::new(config.clone())?;
    for registration in config.printers {
        let address = registration.address.clone();
        match service.register_printer(registration) {
            Ok(printer) => tracing::info!(
                printer_id = %printer.id,
                transport = %printer.transport,
                family = %printer.protocol_family,
                "printer registered"
            ),
            Err(e) => tracing::warn!(address = %address, error = %e, "skipping configured printer"),
        }
    }

    let mut server = service.cloudprnt_server();
    server.start().await?;
    let token = CancellationToken::new();
    let sweeper = service.spawn_sweeper(token.clone());

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for Ctrl-C, shutting down");
    }
    tracing::info!("shutting down");

    token.cancel();
    joined_cleanly("retention sweeper", sweeper.await);
    let stopped = server.stop().await;
    service.shutdown().await;
    stopped
}

/// Log a background task that ended by panicking or being aborted.
fn joined_cleanly(task: &str, joined: std::result::Result<(), JoinError>) -> bool {
    match joined {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(task, error = %e, panicked = e.is_panic(), "background task did not finish cleanly");
            false
        }
    }
}
