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

//! Inline color markup tokens
//!
//! Outgoing text may carry two-byte markers of the form `&<code>`. Each code
//! maps to a fixed ANSI escape sequence. The table is immutable and shared by
//! every connection.

use once_cell::sync::Lazy;

/// Marker byte that introduces a color code
pub const MARKER: u8 = b'&';
/// Code for the newline shortcut
pub const NEWLINE_CODE: u8 = b'/';
/// Code for the reset sequence
pub const RESET_CODE: u8 = b'e';

/// A single color markup code and the bytes it expands to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorToken {
    /// Code byte following the marker
    pub code: u8,
    /// Descriptive name
    pub name: &'static str,
    /// Expansion sent to color-capable clients
    pub sequence: &'static [u8],
}

impl ColorToken {
    const fn new(code: u8, name: &'static str, sequence: &'static [u8]) -> Self {
        Self {
            code,
            name,
            sequence,
        }
    }

    /// Whether this token is the line break shortcut rather than an attribute
    pub fn is_newline(&self) -> bool {
        self.code == NEWLINE_CODE
    }
}

/// Every recognised color code
pub static COLOR_TOKENS: [ColorToken; 29] = [
    ColorToken::new(b'x', "black", b"\x1b[0;30m"),
    ColorToken::new(b'r', "red", b"\x1b[0;31m"),
    ColorToken::new(b'g', "green", b"\x1b[0;32m"),
    ColorToken::new(b'y', "brown", b"\x1b[0;33m"),
    ColorToken::new(b'b', "blue", b"\x1b[0;34m"),
    ColorToken::new(b'p', "purple", b"\x1b[0;35m"),
    ColorToken::new(b'c', "cyan", b"\x1b[0;36m"),
    ColorToken::new(b'w', "gray", b"\x1b[0;37m"),
    ColorToken::new(b'z', "dark gray", b"\x1b[1;30m"),
    ColorToken::new(b'R', "bright red", b"\x1b[1;31m"),
    ColorToken::new(b'G', "bright green", b"\x1b[1;32m"),
    ColorToken::new(b'Y', "yellow", b"\x1b[1;33m"),
    ColorToken::new(b'B', "bright blue", b"\x1b[1;34m"),
    ColorToken::new(b'P', "bright purple", b"\x1b[1;35m"),
    ColorToken::new(b'C', "bright cyan", b"\x1b[1;36m"),
    ColorToken::new(b'W', "white", b"\x1b[1;37m"),
    ColorToken::new(b'f', "blink", b"\x1b[5m"),
    ColorToken::new(b'u', "underline", b"\x1b[4m"),
    ColorToken::new(b'i', "inverse", b"\x1b[7m"),
    ColorToken::new(b'0', "background black", b"\x1b[40m"),
    ColorToken::new(b'1', "background red", b"\x1b[41m"),
    ColorToken::new(b'2', "background green", b"\x1b[42m"),
    ColorToken::new(b'3', "background brown", b"\x1b[43m"),
    ColorToken::new(b'4', "background blue", b"\x1b[44m"),
    ColorToken::new(b'5', "background purple", b"\x1b[45m"),
    ColorToken::new(b'6', "background cyan", b"\x1b[46m"),
    ColorToken::new(b'7', "background gray", b"\x1b[47m"),
    ColorToken::new(NEWLINE_CODE, "newline", b"\r\n"),
    ColorToken::new(RESET_CODE, "reset", b"\x1b[0m"),
];

static TOKEN_INDEX: Lazy<[Option<&'static ColorToken>; 128]> = Lazy::new(|| {
    let mut index = [None; 128];
    for token in COLOR_TOKENS.iter() {
        index[token.code as usize] = Some(token);
    }
    index
});

/// Look up the token for a code byte
pub fn lookup(code: u8) -> Option<&'static ColorToken> {
    TOKEN_INDEX.get(code as usize).copied().flatten()
}
