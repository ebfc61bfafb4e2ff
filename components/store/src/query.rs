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

use crate::{MailboxId, Message, ModSeq, Uid};

/// Optional message fields to load. Identity, UID and modseq are always
/// returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Projection {
    pub flags: bool,
    pub internal_date: bool,
    pub size: bool,
    pub envelope: bool,
    pub body_structure: bool,
    pub content: bool,
}

impl Projection {
    pub fn all() -> Self {
        Projection {
            flags: true,
            internal_date: true,
            size: true,
            envelope: true,
            body_structure: true,
            content: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub mailbox: MailboxId,
    /// Sorted list of UIDs to match, `None` matches the whole mailbox.
    pub uids: Option<Vec<Uid>>,
    pub after_uid: Option<Uid>,
    pub changed_since: Option<ModSeq>,
    pub limit: Option<usize>,
    pub projection: Projection,
}

impl MessageQuery {
    pub fn new(mailbox: MailboxId) -> Self {
        MessageQuery {
            mailbox,
            uids: None,
            after_uid: None,
            changed_since: None,
            limit: None,
            projection: Projection::default(),
        }
    }

    pub fn with_uids(mut self, mut uids: Vec<Uid>) -> Self {
        uids.sort_unstable();
        uids.dedup();
        self.uids = uids.into();
        self
    }

    pub fn with_after_uid(mut self, uid: Uid) -> Self {
        self.after_uid = uid.into();
        self
    }

    pub fn with_changed_since(mut self, modseq: ModSeq) -> Self {
        self.changed_since = modseq.into();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.into();
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn matches(&self, message: &Message) -> bool {
        message.mailbox == self.mailbox
            && self
                .uids
                .as_ref()
                .map_or(true, |uids| uids.binary_search(&message.uid).is_ok())
            && self.after_uid.map_or(true, |uid| message.uid > uid)
            && self
                .changed_since
                .map_or(true, |modseq| message.modseq > modseq)
    }
}
