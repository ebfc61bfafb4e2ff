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

pub mod mutex_map;

use crate::{core::SEEN_FLAG, MailboxId, Message, MessageId, Uid};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagUpdate {
    pub message: MessageId,
    pub mailbox: MailboxId,
    pub uid: Uid,
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl FlagUpdate {
    pub fn new(message: &Message) -> Self {
        FlagUpdate {
            message: message.id,
            mailbox: message.mailbox,
            uid: message.uid,
            add: Vec::new(),
            remove: Vec::new(),
        }
    }

    pub fn seen(message: &Message) -> Self {
        FlagUpdate::new(message).with_add(SEEN_FLAG)
    }

    pub fn with_add(mut self, flag: impl Into<String>) -> Self {
        self.add.push(flag.into());
        self
    }

    pub fn with_remove(mut self, flag: impl Into<String>) -> Self {
        self.remove.push(flag.into());
        self
    }

    /// Applies the update to a flag list, returns true if it changed.
    pub fn apply(&self, flags: &mut Vec<String>) -> bool {
        let mut has_changes = false;
        for flag in &self.remove {
            if let Some(pos) = flags.iter().position(|f| f.eq_ignore_ascii_case(flag)) {
                flags.remove(pos);
                has_changes = true;
            }
        }
        for flag in &self.add {
            if !flags.iter().any(|f| f.eq_ignore_ascii_case(flag)) {
                flags.push(flag.clone());
                has_changes = true;
            }
        }
        has_changes
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub matched: usize,
    pub modified: usize,
}
