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

//! Command handler boundary
//!
//! The gateway hands every completed line to a [`SessionHandler`] together
//! with the connection it arrived on. Authentication and gameplay live behind
//! this trait and drive the connection through `set_state`, `send` and
//! `send_raw`. Connections are identified only by id; anything a handler
//! associates with a connection is looked up by that id.

use crate::connection::Connection;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Called once after the opening negotiation has been queued
    async fn on_connect(&self, connection: &mut Connection);

    /// Called for each decoded, trimmed command line, in arrival order
    async fn on_command(&self, connection: &mut Connection, line: String);

    /// Called after the connection has left the registry
    async fn on_disconnect(&self, _id: Uuid) {}
}
