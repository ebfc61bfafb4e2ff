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

use store::chrono::{TimeZone, Utc};

use super::{literal_string, quoted_string, Flag, Sequence};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arguments {
    pub tag: String,
    pub is_uid: bool,
    pub sequence_set: Vec<Sequence>,
    pub attributes: Vec<Attribute>,
    pub changed_since: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    Envelope,
    Flags,
    InternalDate,
    Rfc822,
    Rfc822Size,
    BodyStructure,
    BodySection { peek: bool },
    Uid,
    ModSeq,
}

impl Arguments {
    pub fn new(tag: impl Into<String>) -> Self {
        Arguments {
            tag: tag.into(),
            is_uid: false,
            sequence_set: Vec::new(),
            attributes: Vec::new(),
            changed_since: None,
        }
    }

    pub fn with_uid(mut self) -> Self {
        self.is_uid = true;
        self
    }

    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence_set.push(sequence);
        self
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        if !self.attributes.contains(&attribute) {
            self.attributes.push(attribute);
        }
        self
    }

    pub fn with_changed_since(mut self, modseq: u64) -> Self {
        self.changed_since = modseq.into();
        self
    }

    /// Fetching RFC822 or a non-peek body section implicitly sets \Seen.
    pub fn sets_seen_flag(&self) -> bool {
        self.attributes.iter().any(|attribute| {
            matches!(
                attribute,
                Attribute::Rfc822 | Attribute::BodySection { peek: false }
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataItem {
    Uid { uid: u32 },
    Flags { flags: Vec<Flag> },
    InternalDate { date: i64 },
    Rfc822Size { size: u64 },
    // Envelope and body structure are stored precompiled.
    Envelope { envelope: Vec<u8> },
    BodyStructure { part: Vec<u8> },
    Rfc822 { contents: Vec<u8> },
    BodySection { contents: Vec<u8> },
    ModSeq { modseq: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchItem {
    pub id: u32,
    pub items: Vec<DataItem>,
}

impl FetchItem {
    pub fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(b"* ");
        buf.extend_from_slice(self.id.to_string().as_bytes());
        buf.extend_from_slice(b" FETCH (");
        for (pos, item) in self.items.iter().enumerate() {
            if pos > 0 {
                buf.push(b' ');
            }
            item.serialize(buf);
        }
        buf.extend_from_slice(b")\r\n");
    }

    pub fn into_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        self.serialize(&mut buf);
        buf
    }
}

impl DataItem {
    pub fn serialize(&self, buf: &mut Vec<u8>) {
        match self {
            DataItem::Uid { uid } => {
                buf.extend_from_slice(b"UID ");
                buf.extend_from_slice(uid.to_string().as_bytes());
            }
            DataItem::Flags { flags } => {
                buf.extend_from_slice(b"FLAGS (");
                for (pos, flag) in flags.iter().enumerate() {
                    if pos > 0 {
                        buf.push(b' ');
                    }
                    flag.serialize(buf);
                }
                buf.push(b')');
            }
            DataItem::InternalDate { date } => {
                buf.extend_from_slice(b"INTERNALDATE ");
                if let Some(date) = Utc.timestamp_opt(*date, 0).single() {
                    quoted_string(buf, &date.format("%d-%b-%Y %H:%M:%S %z").to_string());
                } else {
                    buf.extend_from_slice(b"NIL");
                }
            }
            DataItem::Rfc822Size { size } => {
                buf.extend_from_slice(b"RFC822.SIZE ");
                buf.extend_from_slice(size.to_string().as_bytes());
            }
            DataItem::Envelope { envelope } => {
                buf.extend_from_slice(b"ENVELOPE ");
                buf.extend_from_slice(envelope);
            }
            DataItem::BodyStructure { part } => {
                buf.extend_from_slice(b"BODYSTRUCTURE ");
                buf.extend_from_slice(part);
            }
            DataItem::Rfc822 { contents } => {
                buf.extend_from_slice(b"RFC822 ");
                literal_string(buf, contents);
            }
            DataItem::BodySection { contents } => {
                buf.extend_from_slice(b"BODY[] ");
                literal_string(buf, contents);
            }
            DataItem::ModSeq { modseq } => {
                buf.extend_from_slice(b"MODSEQ (");
                buf.extend_from_slice(modseq.to_string().as_bytes());
                buf.push(b')');
            }
        }
    }
}
