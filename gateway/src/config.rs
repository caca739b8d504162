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

use crate::error::{GatewayError, GatewayResult};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_env_field::EnvField;
use std::net::{AddrParseError, IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Arguments {
    #[arg(
        short = 'c',
        long = "config",
        help = "Path to configuration file",
        default_value = "gateway/config.yaml"
    )]
    pub config_file: String,

    #[arg(
        short = 'e',
        long = "env",
        help = "Path to environment file",
        default_value = "gateway/.env"
    )]
    pub env_file: Option<String>,
}

impl Default for Arguments {
    fn default() -> Self {
        Self {
            config_file: "config.yaml".to_string(),
            env_file: Some(".env".to_string()),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub telnet: TelnetConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

impl Configuration {
    pub fn load(path: &str) -> GatewayResult<Self> {
        tracing::debug!("Loading configuration from file: {}", path);
        let file = std::fs::File::open(path)
            .map_err(|e| GatewayError::Config(format!("Failed to open config file: {}", e)))?;

        let conf: Configuration = serde_yaml::from_reader(file)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config file: {}", e)))?;

        conf.validate()?;
        Ok(conf)
    }

    /// Reject values the gateway cannot run with
    pub fn validate(&self) -> GatewayResult<()> {
        if self.telnet.max_connections == 0 {
            return Err(GatewayError::Config(
                "telnet.max_connections must be at least 1".to_string(),
            ));
        }
        if self.telnet.outbound_queue == 0 {
            return Err(GatewayError::Config(
                "telnet.outbound_queue must be at least 1".to_string(),
            ));
        }
        if self.session.sweep_interval_seconds == 0 {
            return Err(GatewayError::Config(
                "session.sweep_interval_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TelnetConfig {
    #[serde(default)]
    pub addr: EnvField<TelnetBinding>,

    /// Connections accepted before new clients are turned away (default: 256)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Ask clients to report their window size (default: true)
    #[serde(default = "default_true")]
    pub negotiate_naws: bool,

    /// Ask clients to report their terminal type (default: true)
    #[serde(default = "default_true")]
    pub negotiate_ttype: bool,

    /// Expand color markup for new connections (default: true)
    #[serde(default = "default_true")]
    pub default_color: bool,

    /// Messages queued per connection before further ones are dropped (default: 64)
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

fn default_max_connections() -> usize {
    256
}

fn default_outbound_queue() -> usize {
    64
}

fn default_true() -> bool {
    true
}

impl Default for TelnetConfig {
    fn default() -> Self {
        TelnetConfig {
            addr: Default::default(),
            max_connections: default_max_connections(),
            negotiate_naws: true,
            negotiate_ttype: true,
            default_color: true,
            outbound_queue: default_outbound_queue(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds a playing connection may stay silent (default: 1800)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,

    /// Seconds between idle sweeps (default: 60)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    /// Seconds a closing connection has to flush its output (default: 2)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,

    /// Seconds the server waits for all connections at shutdown (default: 10)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

fn default_idle_timeout() -> u64 {
    1800
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_shutdown_grace() -> u64 {
    2
}

fn default_shutdown_timeout() -> u64 {
    10
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.idle_timeout_seconds.min(i32::MAX as u64) as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            idle_timeout_seconds: default_idle_timeout(),
            sweep_interval_seconds: default_sweep_interval(),
            shutdown_grace_seconds: default_shutdown_grace(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TelnetBinding(SocketAddr);

impl TelnetBinding {
    pub fn to_addr(&self) -> SocketAddr {
        self.0
    }
    pub fn to_ip(&self) -> IpAddr {
        self.0.ip()
    }
    pub fn to_port(&self) -> u16 {
        self.0.port()
    }
}

impl FromStr for TelnetBinding {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(SocketAddr::from_str(s)?))
    }
}

impl Default for TelnetBinding {
    fn default() -> Self {
        Self(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::new(0, 0, 0, 0),
            4000,
        )))
    }
}

impl std::fmt::Display for TelnetBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
