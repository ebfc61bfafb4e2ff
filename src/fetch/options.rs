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

use imap::protocol::fetch::{Arguments, Attribute};
use store::{
    query::{MessageQuery, Projection},
    MailboxId, ModSeq, Uid,
};

use crate::session::SelectedMailbox;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub flags: bool,
    pub internal_date: bool,
    pub size: bool,
    pub envelope: bool,
    pub body_structure: bool,
    /// Full content returned as `RFC822`.
    pub rfc822: bool,
    /// Full content returned as `BODY[]`.
    pub body: bool,
    pub modseq: bool,
    pub changed_since: Option<ModSeq>,
    pub mark_as_seen: bool,
    /// Requested UIDs.
    pub messages: Vec<Uid>,
    /// Resume after this UID.
    pub last_uid: Option<Uid>,
}

impl FetchOptions {
    pub fn new(messages: Vec<Uid>) -> Self {
        FetchOptions {
            messages,
            ..Default::default()
        }
    }

    pub fn from_arguments(arguments: &Arguments, mailbox: &SelectedMailbox) -> Self {
        let mut options =
            FetchOptions::new(mailbox.sequence_to_uids(&arguments.sequence_set, arguments.is_uid));

        for attribute in &arguments.attributes {
            match attribute {
                Attribute::Envelope => options.envelope = true,
                Attribute::Flags => options.flags = true,
                Attribute::InternalDate => options.internal_date = true,
                Attribute::Rfc822 => options.rfc822 = true,
                Attribute::Rfc822Size => options.size = true,
                Attribute::BodyStructure => options.body_structure = true,
                Attribute::BodySection { .. } => options.body = true,
                Attribute::ModSeq => options.modseq = true,
                Attribute::Uid => (),
            }
        }
        options.changed_since = arguments.changed_since;
        options.mark_as_seen = arguments.sets_seen_flag();
        options
    }

    pub fn with_flags(mut self) -> Self {
        self.flags = true;
        self
    }

    pub fn with_body(mut self) -> Self {
        self.body = true;
        self
    }

    pub fn with_mark_as_seen(mut self) -> Self {
        self.mark_as_seen = true;
        self
    }

    pub fn with_changed_since(mut self, modseq: ModSeq) -> Self {
        self.changed_since = modseq.into();
        self
    }

    pub fn with_last_uid(mut self, uid: Uid) -> Self {
        self.last_uid = uid.into();
        self
    }

    pub fn projection(&self) -> Projection {
        Projection {
            // Flags are needed to tell whether a message is already seen.
            flags: self.flags || self.mark_as_seen,
            internal_date: self.internal_date,
            size: self.size,
            envelope: self.envelope,
            body_structure: self.body_structure,
            content: self.rfc822 || self.body,
        }
    }

    pub fn include_modseq(&self) -> bool {
        self.modseq || self.changed_since.is_some()
    }

    /// Builds the query for one page. Full range fetches leave out the UID
    /// filter, rows outside the session snapshot are skipped while reading.
    pub(super) fn page_query(
        &self,
        mailbox_id: MailboxId,
        uids: Option<&[Uid]>,
        last_uid: Option<Uid>,
        page_size: usize,
    ) -> MessageQuery {
        let mut query = MessageQuery::new(mailbox_id)
            .with_projection(self.projection())
            .with_limit(page_size);
        if let Some(uids) = uids {
            query.uids = uids.to_vec().into();
        }
        if let Some(last_uid) = last_uid {
            query = query.with_after_uid(last_uid);
        }
        if let Some(changed_since) = self.changed_since {
            query = query.with_changed_since(changed_since);
        }
        query
    }
}
