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

//! Thornvale Gateway Library
//!
//! This library provides the network-facing core of the Thornvale server:
//! the telnet frame processor and output formatter, per-connection session
//! state, the connection registry, and the acceptor that ties them to TCP.

pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod handler;
pub mod pool;
pub mod session;
pub mod shell;
pub mod telnet;

// Re-export commonly used types
pub use connection::{Connection, ConnectionHandle, Outbound};
pub use context::{ConnectionSettings, ServerContext};
pub use error::{GatewayError, GatewayResult, SessionError};
pub use handler::SessionHandler;
pub use pool::ConnectionPool;
pub use session::SessionState;
pub use telnet::TelnetServer;
