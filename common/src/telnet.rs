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

//! Telnet protocol constants and utilities
//!
//! This module defines telnet protocol commands, the option subset MUD clients
//! negotiate, the per-option negotiation policy table, and helpers for building
//! negotiation sequences.

/// Interpret As Command
pub const IAC: u8 = 255;
/// Don't do option
pub const DONT: u8 = 254;
/// Do option
pub const DO: u8 = 253;
/// Won't do option
pub const WONT: u8 = 252;
/// Will do option
pub const WILL: u8 = 251;
/// Subnegotiation begin
pub const SB: u8 = 250;
/// Go ahead
pub const GA: u8 = 249;
/// Erase line
pub const EL: u8 = 248;
/// Erase character
pub const EC: u8 = 247;
/// Are you there
pub const AYT: u8 = 246;
/// Abort output
pub const AO: u8 = 245;
/// Interrupt process
pub const IP: u8 = 244;
/// Break
pub const BRK: u8 = 243;
/// Data mark
pub const DM: u8 = 242;
/// No operation
pub const NOP: u8 = 241;
/// Subnegotiation end
pub const SE: u8 = 240;

/// Echo
pub const ECHO: u8 = 1;
/// Suppress go ahead
pub const SUPPRESS_GO_AHEAD: u8 = 3;
/// Terminal type
pub const TERMINAL_TYPE: u8 = 24;
/// Negotiate about window size
pub const NAWS: u8 = 31;

/// Terminal type subnegotiation: the peer reports its terminal name
pub const TTYPE_IS: u8 = 0;
/// Terminal type subnegotiation: ask the peer for its terminal name
pub const TTYPE_SEND: u8 = 1;

/// Telnet command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TelnetCommand {
    /// Interpret As Command
    IAC = 255,
    /// Don't do option
    DONT = 254,
    /// Do option
    DO = 253,
    /// Won't do option
    WONT = 252,
    /// Will do option
    WILL = 251,
    /// Subnegotiation begin
    SB = 250,
    /// Go ahead
    GA = 249,
    /// Erase line
    EL = 248,
    /// Erase character
    EC = 247,
    /// Are you there
    AYT = 246,
    /// Abort output
    AO = 245,
    /// Interrupt process
    IP = 244,
    /// Break
    BRK = 243,
    /// Data mark
    DM = 242,
    /// No operation
    NOP = 241,
    /// Subnegotiation end
    SE = 240,
}

impl TelnetCommand {
    /// Convert byte to telnet command
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            IAC => Some(Self::IAC),
            DONT => Some(Self::DONT),
            DO => Some(Self::DO),
            WONT => Some(Self::WONT),
            WILL => Some(Self::WILL),
            SB => Some(Self::SB),
            GA => Some(Self::GA),
            EL => Some(Self::EL),
            EC => Some(Self::EC),
            AYT => Some(Self::AYT),
            AO => Some(Self::AO),
            IP => Some(Self::IP),
            BRK => Some(Self::BRK),
            DM => Some(Self::DM),
            NOP => Some(Self::NOP),
            SE => Some(Self::SE),
            _ => None,
        }
    }

    /// Convert command to byte
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Whether this command is one of WILL/WONT/DO/DONT
    pub fn is_negotiation(self) -> bool {
        matches!(self, Self::WILL | Self::WONT | Self::DO | Self::DONT)
    }
}

/// How the server treats a request to enable an option on its own side
/// (the peer sent `DO <option>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalPolicy {
    /// Always answer `WONT`
    Refuse,
    /// Answer `WILL` once
    Accept,
    /// Answer `WILL` only while the connection masks input; echo ownership
    /// follows the session state, not the peer
    WhileMasked,
}

/// Negotiation policy for a single telnet option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionPolicy {
    /// Response to the peer asking us to perform the option
    pub local: LocalPolicy,
    /// Whether the peer may perform the option (answers `WILL` with `DO`)
    pub remote: bool,
}

impl OptionPolicy {
    /// Refuse the option in both directions
    pub const REFUSE: Self = Self {
        local: LocalPolicy::Refuse,
        remote: false,
    };
}

const fn build_option_policies() -> [OptionPolicy; 256] {
    let mut table = [OptionPolicy::REFUSE; 256];
    table[ECHO as usize] = OptionPolicy {
        local: LocalPolicy::WhileMasked,
        remote: false,
    };
    table[SUPPRESS_GO_AHEAD as usize] = OptionPolicy {
        local: LocalPolicy::Accept,
        remote: true,
    };
    table[TERMINAL_TYPE as usize] = OptionPolicy {
        local: LocalPolicy::Refuse,
        remote: true,
    };
    table[NAWS as usize] = OptionPolicy {
        local: LocalPolicy::Refuse,
        remote: true,
    };
    table
}

/// Option byte to negotiation policy. Anything not listed is refused.
pub static OPTION_POLICIES: [OptionPolicy; 256] = build_option_policies();

/// Look up the negotiation policy for an option byte
#[inline]
pub fn option_policy(option: u8) -> OptionPolicy {
    OPTION_POLICIES[option as usize]
}

/// Human readable option name for logging
pub fn option_name(option: u8) -> &'static str {
    match option {
        ECHO => "ECHO",
        SUPPRESS_GO_AHEAD => "SGA",
        TERMINAL_TYPE => "TTYPE",
        NAWS => "NAWS",
        _ => "UNKNOWN",
    }
}

/// Build a telnet negotiation sequence
pub fn build_negotiation(command: TelnetCommand, option: u8) -> [u8; 3] {
    [IAC, command.to_byte(), option]
}

/// Build a telnet subnegotiation sequence
pub fn build_subnegotiation(option: u8, data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len() + 5);
    result.extend_from_slice(&[IAC, SB, option]);

    // Escape IAC bytes in data
    for &byte in data {
        result.push(byte);
        if byte == IAC {
            result.push(byte);
        }
    }

    result.extend_from_slice(&[IAC, SE]);
    result
}

/// Parse window size from NAWS subnegotiation data
pub fn parse_window_size(data: &[u8]) -> Option<(u16, u16)> {
    if data.len() >= 4 {
        let width = u16::from_be_bytes([data[0], data[1]]);
        let height = u16::from_be_bytes([data[2], data[3]]);
        Some((width, height))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_values() {
        assert_eq!(IAC, 255);
        assert_eq!(WILL, 251);
        assert_eq!(WONT, 252);
        assert_eq!(DO, 253);
        assert_eq!(DONT, 254);
        assert_eq!(ECHO, 1);
        assert_eq!(SUPPRESS_GO_AHEAD, 3);
        assert_eq!(TERMINAL_TYPE, 24);
        assert_eq!(NAWS, 31);
    }

    #[test]
    fn test_telnet_command_conversion() {
        assert_eq!(TelnetCommand::from_byte(255), Some(TelnetCommand::IAC));
        assert_eq!(TelnetCommand::from_byte(253), Some(TelnetCommand::DO));
        assert_eq!(TelnetCommand::from_byte(251), Some(TelnetCommand::WILL));
        assert_eq!(TelnetCommand::from_byte(100), None);

        assert_eq!(TelnetCommand::IAC.to_byte(), 255);
        assert_eq!(TelnetCommand::DO.to_byte(), 253);
        assert!(TelnetCommand::DONT.is_negotiation());
        assert!(!TelnetCommand::NOP.is_negotiation());
    }

    #[test]
    fn test_option_policies() {
        assert_eq!(option_policy(ECHO).local, LocalPolicy::WhileMasked);
        assert!(!option_policy(ECHO).remote);
        assert_eq!(option_policy(SUPPRESS_GO_AHEAD).local, LocalPolicy::Accept);
        assert!(option_policy(TERMINAL_TYPE).remote);
        assert!(option_policy(NAWS).remote);
        assert_eq!(option_policy(99), OptionPolicy::REFUSE);
        assert_eq!(option_policy(255), OptionPolicy::REFUSE);
    }

    #[test]
    fn test_build_negotiation() {
        assert_eq!(build_negotiation(TelnetCommand::WILL, ECHO), [255, 251, 1]);
        assert_eq!(build_negotiation(TelnetCommand::DO, NAWS), [255, 253, 31]);
    }

    #[test]
    fn test_build_subnegotiation() {
        let subneg = build_subnegotiation(TERMINAL_TYPE, &[TTYPE_SEND]);
        assert_eq!(subneg, vec![255, 250, 24, 1, 255, 240]);
    }

    #[test]
    fn test_build_subnegotiation_with_iac() {
        let subneg = build_subnegotiation(NAWS, &[255, 100]);
        // 2 for the frame + 2 for the escaped IAC
        assert_eq!(subneg.iter().filter(|&&b| b == 255).count(), 4);
    }

    #[test]
    fn test_parse_window_size() {
        assert_eq!(parse_window_size(&[0, 80, 0, 24]), Some((80, 24)));
        assert_eq!(parse_window_size(&[1, 0, 0, 200]), Some((256, 200)));
        assert_eq!(parse_window_size(&[0, 80]), None);
    }
}
