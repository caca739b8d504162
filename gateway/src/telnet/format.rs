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

//! Outgoing text formatting
//!
//! Expands `&<code>` color markup into ANSI sequences for color-capable
//! clients, or removes it for plain ones, and normalises line endings to the
//! `\r\n` telnet expects.

use thornvale_common::color::{self, MARKER};

/// Format outgoing text for the wire.
///
/// `&&` produces a literal `&`. An unknown code or a trailing `&` is passed
/// through unchanged. The newline shortcut `&/` always produces `\r\n`.
pub fn format_outgoing(text: &str, color: bool) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() + bytes.len() / 4 + 2);

    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        match byte {
            MARKER => match bytes.get(index + 1) {
                Some(&MARKER) => {
                    out.push(MARKER);
                    index += 2;
                }
                Some(&code) => match color::lookup(code) {
                    Some(token) if token.is_newline() => {
                        push_newline(&mut out);
                        index += 2;
                    }
                    Some(token) => {
                        if color {
                            out.extend_from_slice(token.sequence);
                        }
                        index += 2;
                    }
                    None => {
                        out.push(MARKER);
                        index += 1;
                    }
                },
                None => {
                    out.push(MARKER);
                    index += 1;
                }
            },
            b'\n' => {
                push_newline(&mut out);
                index += 1;
            }
            _ => {
                out.push(byte);
                index += 1;
            }
        }
    }
    out
}

fn push_newline(out: &mut Vec<u8>) {
    if out.last() != Some(&b'\r') {
        out.push(b'\r');
    }
    out.push(b'\n');
}
