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

//! Development shell
//!
//! A minimal [`SessionHandler`] so the gateway binary is usable on its own:
//! log in by name, chat with `say`, list players with `who`, leave with
//! `quit`. Nothing is persisted; a name already online asks for any password
//! and takes over the old connection.

use crate::connection::Connection;
use crate::handler::SessionHandler;
use crate::pool::ConnectionPool;
use crate::session::SessionState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

const BANNER: &str = "&/&WWelcome to Thornvale.&e&/&/";
const NAME_PROMPT: &str = "By what name are you known? ";
const PROMPT: &str = "&w> &e";
const MAX_NAME_LENGTH: usize = 16;

const HELP_TEXT: &str = "\
&W=== Commands ===&e
  say <message>  - Speak to everyone in the game
  who            - List players online
  help           - Show this help message
  quit           - Leave the game
";

#[derive(Debug, Default)]
struct Login {
    name: String,
    password: Option<String>,
}

/// Shell command handler
pub struct Shell {
    pool: Arc<ConnectionPool>,
    logins: Mutex<HashMap<Uuid, Login>>,
}

impl Shell {
    /// Create a new shell instance
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            logins: Mutex::new(HashMap::new()),
        }
    }

    fn valid_name(name: &str) -> bool {
        (2..=MAX_NAME_LENGTH).contains(&name.len())
            && name.chars().all(|c| c.is_ascii_alphabetic())
    }

    fn capitalize(name: &str) -> String {
        let lower = name.to_lowercase();
        let mut chars = lower.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    async fn name_of(&self, id: Uuid) -> String {
        self.logins
            .lock()
            .await
            .get(&id)
            .map(|login| login.name.clone())
            .unwrap_or_default()
    }

    async fn get_name(&self, connection: &mut Connection, line: &str) {
        if !Self::valid_name(line) {
            connection.send("Illegal name, try another.\n");
            connection.send(NAME_PROMPT);
            return;
        }
        let name = Self::capitalize(line);
        let online = self.pool.find_by_name(&name).await.is_some();
        self.logins.lock().await.insert(
            connection.id(),
            Login {
                name: name.clone(),
                password: None,
            },
        );

        if online {
            connection.send("Password: ");
        } else {
            connection.send(&format!("New character {}.\nChoose a password: ", name));
        }
        self.change_state(connection, SessionState::GetPassword);
    }

    async fn get_password(&self, connection: &mut Connection, line: &str) {
        connection.send("\n");
        let name = self.name_of(connection.id()).await;
        if self.pool.find_by_name(&name).await.is_some() {
            self.enter_game(connection, &name, true).await;
            return;
        }
        if line.is_empty() {
            connection.send("Choose a password: ");
            return;
        }
        if let Some(login) = self.logins.lock().await.get_mut(&connection.id()) {
            login.password = Some(line.to_string());
        }
        connection.send("Confirm password: ");
        self.change_state(connection, SessionState::ConfirmPassword);
    }

    async fn confirm_password(&self, connection: &mut Connection, line: &str) {
        connection.send("\n");
        let matches = self
            .logins
            .lock()
            .await
            .get(&connection.id())
            .and_then(|login| login.password.as_deref())
            .is_some_and(|password| password == line);

        if matches {
            connection.send("Use color? (y/n) ");
            self.change_state(connection, SessionState::NewPlayerCreation);
        } else {
            connection.send("Passwords don't match.\nChoose a password: ");
            self.change_state(connection, SessionState::GetPassword);
        }
    }

    async fn new_player(&self, connection: &mut Connection, line: &str) {
        match line.chars().next().map(|c| c.to_ascii_lowercase()) {
            Some('y') => connection.set_color(true),
            Some('n') => connection.set_color(false),
            _ => {
                connection.send("Please answer y or n: ");
                return;
            }
        }
        let name = self.name_of(connection.id()).await;
        self.enter_game(connection, &name, false).await;
    }

    async fn enter_game(&self, connection: &mut Connection, name: &str, reconnect: bool) {
        if let Some(login) = self.logins.lock().await.get_mut(&connection.id()) {
            login.password = None;
        }
        match self.pool.register_name(connection.id(), name).await {
            Ok(Some(previous)) => {
                tracing::info!(session_id = %connection.id(), previous = %previous, "{} reconnected", name);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(session_id = %connection.id(), "Unable to register name {}: {}", name, e);
                self.change_state(connection, SessionState::Closing);
                return;
            }
        }
        self.change_state(connection, SessionState::Playing);
        if reconnect {
            connection.send("Reconnecting.\n");
        } else {
            connection.send(&format!("Welcome, {}.\n", name));
        }
        self.pool
            .broadcast(&format!("&G{} has entered the game.&e\n", name), Some(connection.id()))
            .await;
        connection.send(PROMPT);
    }

    async fn playing(&self, connection: &mut Connection, line: &str) {
        let (command, args) = match line.split_once(char::is_whitespace) {
            Some((command, args)) => (command, args.trim()),
            None => (line, ""),
        };

        match command.to_lowercase().as_str() {
            "" => {}
            "say" | "'" => self.cmd_say(connection, args).await,
            "who" => self.cmd_who(connection).await,
            "help" | "?" => connection.send(HELP_TEXT),
            "quit" => {
                connection.send("Goodbye.\n");
                let name = self.name_of(connection.id()).await;
                self.pool
                    .broadcast(&format!("&G{} has left the game.&e\n", name), Some(connection.id()))
                    .await;
                self.change_state(connection, SessionState::Closing);
                return;
            }
            _ => connection.send("Huh?\n"),
        }
        connection.send(PROMPT);
    }

    async fn cmd_say(&self, connection: &mut Connection, message: &str) {
        if message.is_empty() {
            connection.send("Say what?\n");
            return;
        }
        let name = self.name_of(connection.id()).await;
        connection.send(&format!("&cYou say '{}'&e\n", message));
        self.pool
            .broadcast(
                &format!("&c{} says '{}'&e\n{}", name, message, PROMPT),
                Some(connection.id()),
            )
            .await;
    }

    async fn cmd_who(&self, connection: &mut Connection) {
        let names = self.pool.names().await;
        let mut output = String::from("&W=== Players Online ===&e\n");
        for name in &names {
            output.push_str(&format!("  {}\n", name));
        }
        output.push_str(&format!("Total: {} player(s)\n", names.len()));
        connection.send(&output);
    }

    fn change_state(&self, connection: &mut Connection, state: SessionState) {
        if let Err(e) = connection.set_state(state) {
            tracing::warn!(session_id = %connection.id(), "{}", e);
        }
    }
}

#[async_trait]
impl SessionHandler for Shell {
    async fn on_connect(&self, connection: &mut Connection) {
        connection.send(BANNER);
        connection.send(NAME_PROMPT);
    }

    async fn on_command(&self, connection: &mut Connection, line: String) {
        match connection.state() {
            SessionState::GetName => self.get_name(connection, &line).await,
            SessionState::GetPassword => self.get_password(connection, &line).await,
            SessionState::ConfirmPassword => self.confirm_password(connection, &line).await,
            SessionState::NewPlayerCreation => self.new_player(connection, &line).await,
            SessionState::Playing => self.playing(connection, &line).await,
            SessionState::Closing | SessionState::Closed => {}
        }
    }

    async fn on_disconnect(&self, id: Uuid) {
        self.logins.lock().await.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionHandle, Outbound};
    use thornvale_common::telnet::{ECHO, IAC, WILL, WONT};
    use tokio::sync::mpsc;

    async fn connect(pool: &Arc<ConnectionPool>) -> (Connection, mpsc::Receiver<Outbound>) {
        let (handle, rx) = ConnectionHandle::new("127.0.0.1:6000", 16);
        pool.register(handle.clone()).await.unwrap();
        (Connection::new(handle, false), rx)
    }

    fn output(connection: &mut Connection) -> String {
        String::from_utf8_lossy(&connection.take_output()).to_string()
    }

    async fn login(shell: &Shell, connection: &mut Connection, name: &str) {
        shell.on_connect(connection).await;
        shell.on_command(connection, name.to_string()).await;
        shell.on_command(connection, "secret".to_string()).await;
        shell.on_command(connection, "secret".to_string()).await;
        shell.on_command(connection, "n".to_string()).await;
        connection.take_output();
    }

    #[test]
    fn test_valid_names() {
        assert!(Shell::valid_name("Aldric"));
        assert!(!Shell::valid_name("a"));
        assert!(!Shell::valid_name("bad name"));
        assert!(!Shell::valid_name("x1"));
        assert_eq!(Shell::capitalize("aLDRIC"), "Aldric");
    }

    #[tokio::test]
    async fn test_new_player_flow() {
        let pool = Arc::new(ConnectionPool::new(8));
        let shell = Shell::new(Arc::clone(&pool));
        let (mut conn, _rx) = connect(&pool).await;

        shell.on_connect(&mut conn).await;
        assert!(output(&mut conn).contains("By what name are you known?"));

        shell.on_command(&mut conn, "aldric".into()).await;
        assert_eq!(conn.state(), SessionState::GetPassword);
        let bytes = conn.take_output();
        assert!(bytes.ends_with(&[IAC, WILL, ECHO]));

        shell.on_command(&mut conn, "secret".into()).await;
        assert_eq!(conn.state(), SessionState::ConfirmPassword);
        shell.on_command(&mut conn, "wrong".into()).await;
        assert_eq!(conn.state(), SessionState::GetPassword);
        assert!(output(&mut conn).contains("Passwords don't match."));

        shell.on_command(&mut conn, "secret".into()).await;
        shell.on_command(&mut conn, "secret".into()).await;
        assert_eq!(conn.state(), SessionState::NewPlayerCreation);
        let bytes = conn.take_output();
        assert!(bytes.windows(3).any(|w| w == [IAC, WONT, ECHO]));
        assert!(conn.echo_enabled());

        shell.on_command(&mut conn, "yes".into()).await;
        assert_eq!(conn.state(), SessionState::Playing);
        assert!(conn.color());
        assert!(output(&mut conn).contains("Welcome, Aldric."));
        assert_eq!(pool.names().await, vec!["Aldric".to_string()]);
    }

    #[tokio::test]
    async fn test_say_and_who() {
        let pool = Arc::new(ConnectionPool::new(8));
        let shell = Shell::new(Arc::clone(&pool));
        let (mut speaker, _speaker_rx) = connect(&pool).await;
        let (mut listener, mut listener_rx) = connect(&pool).await;
        login(&shell, &mut speaker, "Mira").await;
        login(&shell, &mut listener, "Tobin").await;

        shell.on_command(&mut speaker, "say hello there".into()).await;
        assert!(output(&mut speaker).contains("You say 'hello there'"));
        let heard = listener_rx.try_recv().unwrap();
        assert_eq!(
            heard,
            Outbound::Text(format!("&cMira says 'hello there'&e\n{}", PROMPT))
        );

        shell.on_command(&mut listener, "who".into()).await;
        let who = output(&mut listener);
        assert!(who.contains("Mira"));
        assert!(who.contains("Tobin"));
        assert!(who.contains("Total: 2 player(s)"));
    }

    #[tokio::test]
    async fn test_reconnect_takes_over() {
        let pool = Arc::new(ConnectionPool::new(8));
        let shell = Shell::new(Arc::clone(&pool));
        let (mut first, _first_rx) = connect(&pool).await;
        login(&shell, &mut first, "Aldric").await;

        let (mut second, _second_rx) = connect(&pool).await;
        shell.on_connect(&mut second).await;
        shell.on_command(&mut second, "ALDRIC".into()).await;
        assert!(output(&mut second).contains("Password: "));
        shell.on_command(&mut second, "anything".into()).await;

        assert_eq!(second.state(), SessionState::Playing);
        assert!(first.handle().is_closing());
        assert_eq!(
            pool.find_by_name("aldric").await.map(|h| h.id()),
            Some(second.id())
        );
    }

    #[tokio::test]
    async fn test_quit_closes() {
        let pool = Arc::new(ConnectionPool::new(8));
        let shell = Shell::new(Arc::clone(&pool));
        let (mut conn, _rx) = connect(&pool).await;
        login(&shell, &mut conn, "Aldric").await;

        shell.on_command(&mut conn, "quit".into()).await;
        assert_eq!(conn.state(), SessionState::Closing);
        assert!(output(&mut conn).contains("Goodbye."));

        shell.on_disconnect(conn.id()).await;
        assert!(shell.logins.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_illegal_name_and_unknown_command() {
        let pool = Arc::new(ConnectionPool::new(8));
        let shell = Shell::new(Arc::clone(&pool));
        let (mut conn, _rx) = connect(&pool).await;

        shell.on_command(&mut conn, "no way".into()).await;
        assert_eq!(conn.state(), SessionState::GetName);
        assert!(output(&mut conn).contains("Illegal name"));

        login(&shell, &mut conn, "Aldric").await;
        shell.on_command(&mut conn, "dance".into()).await;
        assert!(output(&mut conn).contains("Huh?"));
    }
}
