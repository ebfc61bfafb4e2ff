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

use std::sync::Arc;

use imap::protocol::Sequence;
use store::{
    async_trait::async_trait, parking_lot::Mutex, AccountStore, MailboxId, SessionId, Uid,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Account {
    pub alias: String,
    pub domain: String,
}

impl Account {
    pub fn new(alias: impl Into<String>, domain: impl Into<String>) -> Self {
        Account {
            alias: alias.into(),
            domain: domain.into(),
        }
    }

    /// Key identifying the account across processes.
    pub fn key(&self) -> String {
        format!("{}@{}", self.alias, self.domain)
    }
}

/// Outbound half of a client connection.
#[async_trait]
pub trait SessionStream: Send + Sync {
    fn is_open(&self) -> bool;
    async fn write_bytes(&self, bytes: Vec<u8>) -> std::io::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedMailbox {
    pub id: MailboxId,
    /// UIDs visible to this session, taken when the mailbox was selected.
    pub uid_list: Vec<Uid>,
}

impl SelectedMailbox {
    pub fn new(id: MailboxId, mut uid_list: Vec<Uid>) -> Self {
        uid_list.sort_unstable();
        uid_list.dedup();
        SelectedMailbox { id, uid_list }
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.uid_list.binary_search(&uid).is_ok()
    }

    /// Sequence number of a UID, or the one it would have if inserted.
    pub fn seqnum(&self, uid: Uid) -> u32 {
        self.uid_list.partition_point(|&item| item < uid) as u32 + 1
    }

    pub fn sequence_to_uids(&self, sequence_set: &[Sequence], is_uid: bool) -> Vec<Uid> {
        let max = if is_uid {
            self.uid_list.last().copied().unwrap_or(0)
        } else {
            self.uid_list.len() as u32
        };
        self.uid_list
            .iter()
            .enumerate()
            .filter(|(pos, uid)| {
                let value = if is_uid { **uid } else { *pos as u32 + 1 };
                sequence_set.iter().any(|seq| seq.contains(value, max))
            })
            .map(|(_, uid)| *uid)
            .collect()
    }
}

pub struct Session {
    pub id: SessionId,
    pub account: Option<Account>,
    pub stream: Arc<dyn SessionStream>,
    pub selected: Option<SelectedMailbox>,
    store: Mutex<Option<Arc<dyn AccountStore>>>,
}

impl Session {
    pub fn new(id: SessionId, stream: Arc<dyn SessionStream>) -> Self {
        Session {
            id,
            account: None,
            stream,
            selected: None,
            store: Mutex::new(None),
        }
    }

    pub fn authenticate(&mut self, account: Account, store: Arc<dyn AccountStore>) {
        self.account = account.into();
        *self.store.get_mut() = store.into();
    }

    pub fn select(&mut self, mailbox: SelectedMailbox) {
        self.selected = mailbox.into();
    }

    pub fn is_authenticated(&self) -> bool {
        self.account.is_some()
    }

    pub fn store(&self) -> Option<Arc<dyn AccountStore>> {
        self.store.lock().clone()
    }

    /// Detaches the store handle, subsequent calls return `None`.
    pub fn take_store(&self) -> Option<Arc<dyn AccountStore>> {
        self.store.lock().take()
    }

    pub fn selected_mailbox(&self, mailbox_id: MailboxId) -> Option<&SelectedMailbox> {
        self.selected
            .as_ref()
            .filter(|selected| selected.id == mailbox_id)
    }
}
