//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use clap::Parser;
use std::sync::Arc;
use thornvale_gateway::config::{Arguments, Configuration};
use thornvale_gateway::context::{ConnectionSettings, ServerContext};
use thornvale_gateway::pool::ConnectionPool;
use thornvale_gateway::shell::Shell;
use thornvale_gateway::telnet::TelnetServer;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load arguments from the command line
    let arguments: Arguments = Parser::parse();

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_ansi(true)
        .init();

    // Load environment variables from .env file if specified
    if let Some(ref env_file) = arguments.env_file {
        if std::path::Path::new(env_file).exists() {
            debug!("Loading environment variables from file: {}", env_file);
            dotenv::from_filename(env_file).ok();
        }
    } else {
        debug!("Loading environment variables from default file");
        dotenv::dotenv().ok();
    }

    // Load configuration from a file with environment variable substitution
    let config = Configuration::load(&arguments.config_file)
        .inspect_err(|err| eprintln!("Configuration load error: {}", err))?;

    debug!("Configuration loaded: {:?}", config);
    info!("Starting Thornvale Gateway Server...");

    let pool = Arc::new(ConnectionPool::new(config.telnet.max_connections));
    let handler = Arc::new(Shell::new(Arc::clone(&pool)));
    let context = ServerContext::new(
        Arc::clone(&pool),
        handler,
        ConnectionSettings::from(&config),
    );

    let shutdown = CancellationToken::new();

    // Idle sweep runs until shutdown
    let sweep = tokio::spawn(Arc::clone(&pool).run_idle_sweep(
        config.session.sweep_interval(),
        config.session.idle_timeout(),
        shutdown.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(config.telnet.addr.to_addr()).await?;
    info!(
        "Telnet Server listening on {} ({}:{})",
        config.telnet.addr,
        config.telnet.addr.to_ip(),
        config.telnet.addr.to_port(),
    );

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                signal.cancel();
            }
            Err(e) => error!("Unable to listen for shutdown signal: {}", e),
        }
    });

    let server = TelnetServer::new(context, config.session.shutdown_timeout());
    server.run_until(listener, shutdown.clone()).await?;

    shutdown.cancel();
    let _ = sweep.await;
    info!("Thornvale Gateway Server stopped");
    Ok(())
}
