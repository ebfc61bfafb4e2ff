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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MailboxId, MessageId, ModSeq, SessionId, Uid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalCommand {
    Exists,
    Expunge,
    Fetch,
}

/// A change record. Once appended it is never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub mailbox: MailboxId,
    pub modseq: Option<ModSeq>,
    pub created: Option<DateTime<Utc>>,
    pub command: JournalCommand,
    pub message: Option<MessageId>,
    pub uid: Option<Uid>,
    pub flags: Vec<String>,
    /// Session that caused the change and already knows about it.
    pub ignore: Option<SessionId>,
    pub unseen_change: bool,
    pub payload: Option<serde_json::Value>,
}

impl JournalEntry {
    pub fn new(mailbox: MailboxId, command: JournalCommand) -> Self {
        JournalEntry {
            mailbox,
            modseq: None,
            created: None,
            command,
            message: None,
            uid: None,
            flags: Vec::new(),
            ignore: None,
            unseen_change: false,
            payload: None,
        }
    }

    pub fn fetch(mailbox: MailboxId, message: MessageId, uid: Uid, flags: Vec<String>) -> Self {
        JournalEntry {
            message: message.into(),
            uid: uid.into(),
            flags,
            ..JournalEntry::new(mailbox, JournalCommand::Fetch)
        }
    }

    pub fn with_modseq(mut self, modseq: ModSeq) -> Self {
        self.modseq = modseq.into();
        self
    }

    pub fn with_ignore(mut self, session: SessionId) -> Self {
        self.ignore = session.into();
        self
    }

    pub fn with_unseen_change(mut self) -> Self {
        self.unseen_change = true;
        self
    }

    /// Entries that reference a message but carry no modseq of their own
    /// require a freshly minted modseq.
    pub fn is_update(&self) -> bool {
        self.modseq.is_none() && self.message.is_some()
    }
}
