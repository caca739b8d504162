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

//! Session state machine
//!
//! Each connection moves through a login/gameplay lifecycle. The state decides
//! whether the client echoes its own input and whether input is routed to the
//! command handler at all. States are stored as a single byte so the registry
//! can mirror them in an atomic.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionState {
    /// Prompting for a character name
    #[default]
    GetName = 0,
    /// Prompting for an existing character's password
    GetPassword = 1,
    /// Prompting for a new character's password a second time
    ConfirmPassword = 2,
    /// New character creation prompts
    NewPlayerCreation = 3,
    /// In game
    Playing = 4,
    /// Input stopped, flushing output before the socket closes
    Closing = 5,
    /// Terminal; the registry slot has been released
    Closed = 6,
}

impl SessionState {
    /// Whether input typed in this state must not be echoed by the client
    pub fn masks_input(self) -> bool {
        matches!(self, Self::GetPassword | Self::ConfirmPassword)
    }

    /// Client-side echo setting required by this state, if it has one
    pub fn echo_enabled(self) -> Option<bool> {
        match self {
            Self::GetPassword | Self::ConfirmPassword => Some(false),
            Self::GetName | Self::NewPlayerCreation | Self::Playing => Some(true),
            Self::Closing | Self::Closed => None,
        }
    }

    /// Whether completed lines are dispatched to the command handler
    pub fn accepts_input(self) -> bool {
        !matches!(self, Self::Closing | Self::Closed)
    }

    /// Whether the connection is on its way out
    pub fn is_closing(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a mirrored state byte; out of range values read as `Closed`
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::GetName,
            1 => Self::GetPassword,
            2 => Self::ConfirmPassword,
            3 => Self::NewPlayerCreation,
            4 => Self::Playing,
            5 => Self::Closing,
            _ => Self::Closed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetName => "GetName",
            Self::GetPassword => "GetPassword",
            Self::ConfirmPassword => "ConfirmPassword",
            Self::NewPlayerCreation => "NewPlayerCreation",
            Self::Playing => "Playing",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An accepted state change and the echo setting it requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    /// New echo setting when it differs from the current one
    pub echo: Option<bool>,
}

/// Validate a state change.
///
/// Returns `Ok(None)` when the connection is already `Closed`, since nothing
/// applies to a closed connection. `Closing` may only move to `Closed`.
pub fn transition(
    from: SessionState,
    to: SessionState,
    echo_enabled: bool,
) -> Result<Option<Transition>, SessionError> {
    if from.is_closed() {
        return Ok(None);
    }
    if from == SessionState::Closing && !to.is_closing() {
        return Err(SessionError::InvalidTransition { from, to });
    }

    let echo = to.echo_enabled().filter(|&wanted| wanted != echo_enabled);
    Ok(Some(Transition { from, to, echo }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        assert_eq!(SessionState::default(), SessionState::GetName);
    }

    #[test]
    fn test_masking_states() {
        assert!(SessionState::GetPassword.masks_input());
        assert!(SessionState::ConfirmPassword.masks_input());
        assert!(!SessionState::GetName.masks_input());
        assert!(!SessionState::Playing.masks_input());
    }

    #[test]
    fn test_login_flow_echo_changes() {
        let t = transition(SessionState::GetName, SessionState::GetPassword, true)
            .unwrap()
            .unwrap();
        assert_eq!(t.echo, Some(false));

        let t = transition(SessionState::GetPassword, SessionState::ConfirmPassword, false)
            .unwrap()
            .unwrap();
        assert_eq!(t.echo, None);

        let t = transition(SessionState::ConfirmPassword, SessionState::NewPlayerCreation, false)
            .unwrap()
            .unwrap();
        assert_eq!(t.echo, Some(true));

        let t = transition(SessionState::NewPlayerCreation, SessionState::Playing, true)
            .unwrap()
            .unwrap();
        assert_eq!(t.echo, None);
    }

    #[test]
    fn test_closing_is_one_way() {
        assert!(transition(SessionState::Playing, SessionState::Closing, true).is_ok());
        assert!(transition(SessionState::Closing, SessionState::Closed, true).is_ok());
        assert_eq!(
            transition(SessionState::Closing, SessionState::Playing, true),
            Err(SessionError::InvalidTransition {
                from: SessionState::Closing,
                to: SessionState::Playing,
            })
        );
    }

    #[test]
    fn test_closing_leaves_echo_alone() {
        let t = transition(SessionState::GetPassword, SessionState::Closing, false)
            .unwrap()
            .unwrap();
        assert_eq!(t.echo, None);
    }

    #[test]
    fn test_closed_is_terminal() {
        for to in [
            SessionState::GetName,
            SessionState::Playing,
            SessionState::Closing,
            SessionState::Closed,
        ] {
            assert_eq!(transition(SessionState::Closed, to, true), Ok(None));
        }
    }

    #[test]
    fn test_byte_round_trip() {
        for state in [
            SessionState::GetName,
            SessionState::GetPassword,
            SessionState::ConfirmPassword,
            SessionState::NewPlayerCreation,
            SessionState::Playing,
            SessionState::Closing,
            SessionState::Closed,
        ] {
            assert_eq!(SessionState::from_u8(state.as_u8()), state);
        }
        assert_eq!(SessionState::from_u8(200), SessionState::Closed);
    }
}
