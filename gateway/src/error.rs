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

//! Gateway error types

use crate::session::SessionState;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the gateway outside of a single connection's protocol stream
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Underlying socket or file error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// The registry already holds the configured maximum number of connections
    #[error("Connection limit of {0} reached")]
    ConnectionLimit(usize),

    /// A connection with this identity is already registered
    #[error("Connection {0} is already registered")]
    DuplicateConnection(Uuid),

    /// No live connection has this identity
    #[error("Connection {0} not found")]
    NotFound(Uuid),
}

/// Errors raised by the session state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The requested state change is not permitted
    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
