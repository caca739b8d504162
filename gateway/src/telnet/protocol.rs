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

//! Telnet frame processing
//!
//! Turns raw client bytes into completed command lines and the negotiation
//! replies the server owes the client. Processing is synchronous and keeps
//! every partial construct (an unfinished IAC sequence, a half-typed line) in
//! [`TelnetState`], so feeding the same stream in any number of chunks yields
//! the same lines and replies as feeding it whole.

use thornvale_common::telnet::{
    self as telnet, AYT, DO, DONT, EC, EL, IAC, LocalPolicy, SB, SE, TERMINAL_TYPE, TTYPE_IS,
    TTYPE_SEND, TelnetCommand, WILL, WONT,
};

/// Longest pending line in bytes; anything past it is dropped
pub const MAX_INPUT_LENGTH: usize = 2048;

/// Longest sub-negotiation accepted before the stream is considered unrecoverable
pub const MAX_SUBNEGOTIATION_LENGTH: usize = 1024;

/// Line typed to repeat the previous command
pub const REPEAT_COMMAND: &str = "!";

const AYT_REPLY: &[u8] = b"\r\n[Yes]\r\n";
const BACKSPACE: u8 = 8;
const DELETE: u8 = 127;

/// Option negotiation request extracted from `IAC <command> <option>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationEvent {
    pub command: TelnetCommand,
    pub option: u8,
}

/// Fixed size set of option bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionSet([u64; 4]);

impl OptionSet {
    pub fn contains(&self, option: u8) -> bool {
        self.0[(option >> 6) as usize] & (1u64 << (option & 63)) != 0
    }

    /// Add an option, returning true if it was not already present
    pub fn insert(&mut self, option: u8) -> bool {
        let present = self.contains(option);
        self.0[(option >> 6) as usize] |= 1u64 << (option & 63);
        !present
    }

    /// Remove an option, returning true if it was present
    pub fn remove(&mut self, option: u8) -> bool {
        let present = self.contains(option);
        self.0[(option >> 6) as usize] &= !(1u64 << (option & 63));
        present
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|word| *word == 0)
    }
}

/// Options currently in effect on each side of the connection.
///
/// `local` options are performed by the server, `remote` options by the client.
/// The pending sets record requests the server sent first, so the client's
/// acknowledgement is not answered again.
#[derive(Debug, Clone, Default)]
pub struct NegotiatedOptions {
    pub local: OptionSet,
    pub remote: OptionSet,
    local_pending: OptionSet,
    remote_pending: OptionSet,
}

impl NegotiatedOptions {
    pub fn local_enabled(&self, option: u8) -> bool {
        self.local.contains(option)
    }

    pub fn remote_enabled(&self, option: u8) -> bool {
        self.remote.contains(option)
    }
}

/// Result of one [`process_incoming`] call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedInput {
    /// Completed, decoded and trimmed command lines in arrival order
    pub lines: Vec<String>,
    /// Nothing is left pending after this call
    pub complete: bool,
    /// The stream can no longer be parsed and the connection should close
    pub should_close: bool,
    /// Protocol replies to write back, in order
    pub replies: Vec<Vec<u8>>,
    /// A line completed in this call was cut to [`MAX_INPUT_LENGTH`]
    pub truncated: bool,
}

/// Per-connection protocol state
#[derive(Debug, Clone)]
pub struct TelnetState {
    leftover: Vec<u8>,
    pending: Vec<u8>,
    last_line: Option<String>,
    after_cr: bool,
    overflowed: bool,
    closed: bool,
    echo_enabled: bool,
    options: NegotiatedOptions,
    terminal_type: Option<String>,
    window_size: Option<(u16, u16)>,
}

impl Default for TelnetState {
    fn default() -> Self {
        Self::new()
    }
}

impl TelnetState {
    pub fn new() -> Self {
        Self {
            leftover: Vec::new(),
            pending: Vec::with_capacity(128),
            last_line: None,
            after_cr: false,
            overflowed: false,
            closed: false,
            echo_enabled: true,
            options: NegotiatedOptions::default(),
            terminal_type: None,
            window_size: None,
        }
    }

    /// Bytes sent when a connection opens, before any banner.
    ///
    /// Always offers suppress-go-ahead and declines echo; optionally asks the
    /// client to report its window size and terminal type.
    pub fn opening_negotiation(&mut self, naws: bool, ttype: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.extend_from_slice(&initial_negotiation());
        self.options.local_pending.insert(telnet::SUPPRESS_GO_AHEAD);
        if naws {
            out.extend_from_slice(&telnet::build_negotiation(TelnetCommand::DO, telnet::NAWS));
            self.options.remote_pending.insert(telnet::NAWS);
        }
        if ttype {
            out.extend_from_slice(&telnet::build_negotiation(
                TelnetCommand::DO,
                TERMINAL_TYPE,
            ));
            self.options.remote_pending.insert(TERMINAL_TYPE);
        }
        out
    }

    /// Switch client-side echo and return the bytes that announce it
    pub fn set_echo(&mut self, enabled: bool) -> [u8; 3] {
        self.echo_enabled = enabled;
        if enabled {
            self.options.local.remove(telnet::ECHO);
            self.options.local_pending.remove(telnet::ECHO);
        } else {
            self.options.local_pending.insert(telnet::ECHO);
        }
        set_echo(enabled)
    }

    pub fn echo_enabled(&self) -> bool {
        self.echo_enabled
    }

    pub fn options(&self) -> &NegotiatedOptions {
        &self.options
    }

    pub fn terminal_type(&self) -> Option<&str> {
        self.terminal_type.as_deref()
    }

    pub fn window_size(&self) -> Option<(u16, u16)> {
        self.window_size
    }

    /// Bytes of the line currently being typed
    pub fn pending_input(&self) -> &[u8] {
        &self.pending
    }

    pub fn last_line(&self) -> Option<&str> {
        self.last_line.as_deref()
    }

    /// The stream hit an unrecoverable protocol error
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn accept_byte(&mut self, byte: u8, out: &mut ProcessedInput) {
        if self.after_cr {
            self.after_cr = false;
            if byte == b'\n' || byte == 0 {
                return;
            }
        }
        match byte {
            b'\r' => {
                self.complete_line(out);
                self.after_cr = true;
            }
            b'\n' => self.complete_line(out),
            BACKSPACE | DELETE => {
                self.pending.pop();
            }
            _ => {
                if self.pending.len() < MAX_INPUT_LENGTH {
                    self.pending.push(byte);
                } else {
                    self.overflowed = true;
                }
            }
        }
    }

    fn complete_line(&mut self, out: &mut ProcessedInput) {
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        if self.overflowed {
            out.truncated = true;
            self.overflowed = false;
        }

        out.lines.push(line);
    }

    /// Resolve a completed line as it is dispatched.
    ///
    /// `!` is replaced with the previous command and any other non-empty line
    /// becomes the previous command. Lines read while input is masked pass
    /// through untouched and are never remembered. Echo may change between
    /// lines of a single read, so this runs per line rather than while scanning.
    pub fn recall(&mut self, line: String) -> String {
        if !self.echo_enabled {
            line
        } else if line == REPEAT_COMMAND {
            self.last_line.clone().unwrap_or(line)
        } else {
            if !line.is_empty() {
                self.last_line = Some(line.clone());
            }
            line
        }
    }

    fn handle_command(&mut self, command: TelnetCommand, out: &mut ProcessedInput) {
        match command.to_byte() {
            EC => {
                self.pending.pop();
            }
            EL => {
                self.pending.clear();
                self.overflowed = false;
            }
            AYT => out.replies.push(AYT_REPLY.to_vec()),
            _ => {}
        }
    }

    fn handle_negotiation(&mut self, event: NegotiationEvent, out: &mut ProcessedInput) {
        let option = event.option;
        let policy = telnet::option_policy(option);
        tracing::trace!(
            command = ?event.command,
            option = telnet::option_name(option),
            code = option,
            "Telnet negotiation"
        );

        match event.command.to_byte() {
            WILL => {
                if !policy.remote {
                    out.replies.push(reply(TelnetCommand::DONT, option));
                    return;
                }
                if !self.options.remote.insert(option) {
                    return;
                }
                if !self.options.remote_pending.remove(option) {
                    out.replies.push(reply(TelnetCommand::DO, option));
                }
                if option == TERMINAL_TYPE {
                    out.replies
                        .push(telnet::build_subnegotiation(TERMINAL_TYPE, &[TTYPE_SEND]));
                }
            }
            WONT => {
                self.options.remote_pending.remove(option);
                if self.options.remote.remove(option) {
                    out.replies.push(reply(TelnetCommand::DONT, option));
                }
            }
            DO => {
                let allowed = match policy.local {
                    LocalPolicy::Refuse => false,
                    LocalPolicy::Accept => true,
                    LocalPolicy::WhileMasked => !self.echo_enabled,
                };
                if !allowed {
                    self.options.local_pending.remove(option);
                    out.replies.push(reply(TelnetCommand::WONT, option));
                    return;
                }
                if !self.options.local.insert(option) {
                    return;
                }
                if !self.options.local_pending.remove(option) {
                    out.replies.push(reply(TelnetCommand::WILL, option));
                }
            }
            DONT => {
                self.options.local_pending.remove(option);
                if self.options.local.remove(option) {
                    out.replies.push(reply(TelnetCommand::WONT, option));
                }
            }
            _ => {}
        }
    }

    fn handle_subnegotiation(&mut self, option: u8, payload: &[u8]) {
        match option {
            telnet::NAWS => {
                if let Some(size) = telnet::parse_window_size(payload) {
                    tracing::debug!(width = size.0, height = size.1, "Window size reported");
                    self.window_size = Some(size);
                }
            }
            TERMINAL_TYPE => {
                if let Some((&TTYPE_IS, name)) = payload.split_first() {
                    let name = String::from_utf8_lossy(name).trim().to_string();
                    tracing::debug!(terminal = %name, "Terminal type reported");
                    self.terminal_type = Some(name);
                }
            }
            _ => {}
        }
    }
}

/// One parsed construct starting at an IAC byte
enum Sequence {
    /// More bytes are needed
    Incomplete,
    /// A sub-negotiation ran past [`MAX_SUBNEGOTIATION_LENGTH`] without `IAC SE`
    Overflow,
    /// `IAC IAC`, a literal 255
    Escaped,
    Negotiation(NegotiationEvent),
    Subnegotiation {
        body: Vec<u8>,
        length: usize,
    },
    Command(TelnetCommand),
    /// IAC followed by a byte that is not a command
    Invalid,
}

fn parse_sequence(buffer: &[u8], start: usize) -> Sequence {
    let Some(&code) = buffer.get(start + 1) else {
        return Sequence::Incomplete;
    };
    match code {
        IAC => Sequence::Escaped,
        WILL | WONT | DO | DONT => match buffer.get(start + 2) {
            Some(&option) => match TelnetCommand::from_byte(code) {
                Some(command) => Sequence::Negotiation(NegotiationEvent { command, option }),
                None => Sequence::Invalid,
            },
            None => Sequence::Incomplete,
        },
        SB => parse_subnegotiation(buffer, start),
        _ => match TelnetCommand::from_byte(code) {
            Some(command) => Sequence::Command(command),
            None => Sequence::Invalid,
        },
    }
}

/// Look for `IAC SE` within the first [`MAX_SUBNEGOTIATION_LENGTH`] bytes after
/// `start`. The decision depends only on that window, never on how much data
/// happens to be buffered beyond it.
fn parse_subnegotiation(buffer: &[u8], start: usize) -> Sequence {
    let window_end = buffer.len().min(start + MAX_SUBNEGOTIATION_LENGTH);
    let mut body = Vec::new();
    let mut index = start + 2;
    while index + 1 < window_end {
        let byte = buffer[index];
        if byte == IAC {
            match buffer[index + 1] {
                SE => {
                    return Sequence::Subnegotiation {
                        body,
                        length: index + 2 - start,
                    };
                }
                IAC => body.push(IAC),
                _ => {}
            }
            index += 2;
        } else {
            body.push(byte);
            index += 1;
        }
    }
    if buffer.len() - start >= MAX_SUBNEGOTIATION_LENGTH {
        Sequence::Overflow
    } else {
        Sequence::Incomplete
    }
}

fn reply(command: TelnetCommand, option: u8) -> Vec<u8> {
    telnet::build_negotiation(command, option).to_vec()
}

/// Bytes every connection receives first: `IAC WILL SGA`, `IAC WONT ECHO`
pub fn initial_negotiation() -> [u8; 6] {
    [
        IAC,
        WILL,
        telnet::SUPPRESS_GO_AHEAD,
        IAC,
        WONT,
        telnet::ECHO,
    ]
}

/// `IAC WILL ECHO` to stop the client echoing, `IAC WONT ECHO` to resume
pub fn set_echo(enabled: bool) -> [u8; 3] {
    if enabled {
        [IAC, WONT, telnet::ECHO]
    } else {
        [IAC, WILL, telnet::ECHO]
    }
}

/// Feed newly received bytes through the frame processor.
pub fn process_incoming(state: &mut TelnetState, data: &[u8]) -> ProcessedInput {
    let mut out = ProcessedInput::default();
    if state.closed {
        out.should_close = true;
        return out;
    }

    let mut buffer = std::mem::take(&mut state.leftover);
    buffer.extend_from_slice(data);

    let mut position = 0;
    while position < buffer.len() {
        let byte = buffer[position];
        if byte != IAC {
            state.accept_byte(byte, &mut out);
            position += 1;
            continue;
        }

        match parse_sequence(&buffer, position) {
            Sequence::Incomplete => break,
            Sequence::Overflow => {
                tracing::warn!("Unterminated telnet sub-negotiation, closing stream");
                state.closed = true;
                out.should_close = true;
                position = buffer.len();
            }
            Sequence::Escaped => {
                state.accept_byte(IAC, &mut out);
                position += 2;
            }
            Sequence::Negotiation(event) => {
                state.handle_negotiation(event, &mut out);
                position += 3;
            }
            Sequence::Subnegotiation { body, length } => {
                if let Some((&option, payload)) = body.split_first() {
                    state.handle_subnegotiation(option, payload);
                }
                position += length;
            }
            Sequence::Command(command) => {
                state.handle_command(command, &mut out);
                position += 2;
            }
            Sequence::Invalid => position += 1,
        }
    }

    state.leftover = buffer.split_off(position.min(buffer.len()));
    out.complete = state.leftover.is_empty() && state.pending.is_empty();
    out
}
