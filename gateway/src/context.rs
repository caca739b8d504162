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

use crate::config::Configuration;
use crate::handler::SessionHandler;
use crate::pool::ConnectionPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-connection settings taken from the configuration
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub negotiate_naws: bool,
    pub negotiate_ttype: bool,
    pub default_color: bool,
    pub outbound_queue: usize,
    /// Time a closing connection has to flush its output
    pub shutdown_grace: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&Configuration::default())
    }
}

impl From<&Configuration> for ConnectionSettings {
    fn from(config: &Configuration) -> Self {
        Self {
            negotiate_naws: config.telnet.negotiate_naws,
            negotiate_ttype: config.telnet.negotiate_ttype,
            default_color: config.telnet.default_color,
            outbound_queue: config.telnet.outbound_queue,
            shutdown_grace: config.session.shutdown_grace(),
        }
    }
}

/// Server context containing shared resources
#[derive(Clone)]
pub struct ServerContext {
    /// Registry of live connections
    connection_pool: Arc<ConnectionPool>,

    /// Receiver of completed command lines
    handler: Arc<dyn SessionHandler>,

    settings: ConnectionSettings,

    /// Fired once the server has begun shutting down
    shutdown: CancellationToken,
}

impl ServerContext {
    /// Create a new server context
    pub fn new(
        connection_pool: Arc<ConnectionPool>,
        handler: Arc<dyn SessionHandler>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            connection_pool,
            handler,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    /// Get the connection pool
    pub fn connection_pool(&self) -> &Arc<ConnectionPool> {
        &self.connection_pool
    }

    /// Get the command handler
    pub fn handler(&self) -> &Arc<dyn SessionHandler> {
        &self.handler
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Mark the server as shutting down; connections registered from now on
    /// are closed straight away
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
