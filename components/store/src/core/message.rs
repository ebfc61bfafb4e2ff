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

use serde::{Deserialize, Serialize};

use crate::{query::Projection, MailboxId, MessageId, ModSeq, Uid};

use super::SEEN_FLAG;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub mailbox: MailboxId,
    pub uid: Uid,
    pub modseq: ModSeq,
    pub flags: Vec<String>,
    pub size: u64,
    pub internal_date: i64,

    // Lazily loaded, only present when requested in the projection.
    pub envelope: Option<Vec<u8>>,
    pub body_structure: Option<Vec<u8>>,
    pub content: Option<Vec<u8>>,
}

impl Message {
    pub fn new(mailbox: MailboxId, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        Message {
            id: 0,
            mailbox,
            uid: 0,
            modseq: 0,
            flags: Vec::new(),
            size: content.len() as u64,
            internal_date: 0,
            envelope: None,
            body_structure: None,
            content: content.into(),
        }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn with_internal_date(mut self, internal_date: i64) -> Self {
        self.internal_date = internal_date;
        self
    }

    pub fn with_envelope(mut self, envelope: impl Into<Vec<u8>>) -> Self {
        self.envelope = Some(envelope.into());
        self
    }

    pub fn with_body_structure(mut self, body_structure: impl Into<Vec<u8>>) -> Self {
        self.body_structure = Some(body_structure.into());
        self
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case(flag))
    }

    pub fn is_seen(&self) -> bool {
        self.has_flag(SEEN_FLAG)
    }

    /// Drops every optional field the projection did not ask for.
    pub fn project(mut self, projection: &Projection) -> Self {
        if !projection.flags {
            self.flags.clear();
        }
        if !projection.internal_date {
            self.internal_date = 0;
        }
        if !projection.size {
            self.size = 0;
        }
        if !projection.envelope {
            self.envelope = None;
        }
        if !projection.body_structure {
            self.body_structure = None;
        }
        if !projection.content {
            self.content = None;
        }
        self
    }
}
