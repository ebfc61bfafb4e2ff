/*
 * Copyright (c) 2020-2022, Stalwart Labs Ltd.
 *
 * This file is part of the Stalwart JMAP Server.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of
 * the License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 * in the LICENSE file at the top-level directory of this distribution.
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 *
 * You can be released from the requirements of the AGPLv3 license by
 * purchasing a commercial license. Please contact licensing@stalw.art
 * for more details.
*/

use crate::{Error, ResponseCode};

pub mod fetch;

/// Element of a sequence set, `None` bounds stand for `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sequence {
    Number { value: u32 },
    Range { start: Option<u32>, end: Option<u32> },
}

impl Sequence {
    pub fn number(value: u32) -> Sequence {
        Sequence::Number { value }
    }

    pub fn range(start: Option<u32>, end: Option<u32>) -> Sequence {
        Sequence::Range { start, end }
    }

    /// Returns true if `value` is addressed by this sequence, where `max`
    /// is the value `*` resolves to.
    pub fn contains(&self, value: u32, max: u32) -> bool {
        match self {
            Sequence::Number { value: number } => *number == value,
            Sequence::Range { start, end } => {
                let start = start.unwrap_or(max);
                let end = end.unwrap_or(max);
                // Ranges may be written in either direction.
                if start <= end {
                    value >= start && value <= end
                } else {
                    value >= end && value <= start
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    Seen,
    Draft,
    Flagged,
    Answered,
    Recent,
    Deleted,
    Keyword(String),
}

impl Flag {
    pub fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(match self {
            Flag::Seen => b"\\Seen",
            Flag::Draft => b"\\Draft",
            Flag::Flagged => b"\\Flagged",
            Flag::Answered => b"\\Answered",
            Flag::Recent => b"\\Recent",
            Flag::Deleted => b"\\Deleted",
            Flag::Keyword(keyword) => keyword.as_bytes(),
        });
    }
}

impl From<&str> for Flag {
    fn from(value: &str) -> Self {
        if value.starts_with('\\') {
            match value[1..].to_ascii_lowercase().as_str() {
                "seen" => return Flag::Seen,
                "draft" => return Flag::Draft,
                "flagged" => return Flag::Flagged,
                "answered" => return Flag::Answered,
                "recent" => return Flag::Recent,
                "deleted" => return Flag::Deleted,
                _ => (),
            }
        }
        Flag::Keyword(value.to_string())
    }
}

impl From<&String> for Flag {
    fn from(value: &String) -> Self {
        Flag::from(value.as_str())
    }
}

pub fn quoted_string(buf: &mut Vec<u8>, text: &str) {
    buf.push(b'"');
    for &c in text.as_bytes() {
        if c == b'\\' || c == b'"' {
            buf.push(b'\\');
        }
        buf.push(c);
    }
    buf.push(b'"');
}

pub fn literal_string(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.push(b'{');
    buf.extend_from_slice(bytes.len().to_string().as_bytes());
    buf.extend_from_slice(b"}\r\n");
    buf.extend_from_slice(bytes);
}

impl ResponseCode {
    pub fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(match self {
            ResponseCode::InUse => b"INUSE",
            ResponseCode::Nonexistent => b"NONEXISTENT",
            ResponseCode::ServerBug => b"SERVERBUG",
            ResponseCode::Unavailable => b"UNAVAILABLE",
        });
    }
}

impl Error {
    pub fn serialize(&self, buf: &mut Vec<u8>) {
        if let Some(tag) = &self.tag {
            buf.extend_from_slice(tag.as_bytes());
        } else {
            buf.push(b'*');
        }
        if !self.bad {
            buf.extend_from_slice(b" NO ");
        } else {
            buf.extend_from_slice(b" BAD ");
        };
        if let Some(code) = &self.code {
            buf.push(b'[');
            code.serialize(buf);
            buf.extend_from_slice(b"] ");
        }
        buf.extend_from_slice(self.message.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    pub fn into_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.message.len() + 16);
        self.serialize(&mut buf);
        buf
    }
}
