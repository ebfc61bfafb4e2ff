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

use store::{
    core::SEEN_FLAG,
    tracing::{debug, error},
    write::FlagUpdate,
    AccountStore, JournalEntry, MailboxId, Message, MessageStore,
};

use crate::{session::Session, state::manager::ChangeNotifier};

/// Seen flag updates and journal entries queued while streaming a fetch.
pub(super) struct SideEffects<'x> {
    notifier: &'x ChangeNotifier,
    session: &'x Session,
    store: Arc<dyn AccountStore>,
    mailbox_id: MailboxId,
    account_key: String,
    batch_size: usize,
    updates: Vec<FlagUpdate>,
    entries: Vec<JournalEntry>,
    failed: bool,
}

impl<'x> SideEffects<'x> {
    pub fn new(
        notifier: &'x ChangeNotifier,
        session: &'x Session,
        store: Arc<dyn AccountStore>,
        mailbox_id: MailboxId,
        account_key: String,
        batch_size: usize,
    ) -> Self {
        SideEffects {
            notifier,
            session,
            store,
            mailbox_id,
            account_key,
            batch_size,
            updates: Vec::with_capacity(batch_size),
            entries: Vec::with_capacity(batch_size),
            failed: false,
        }
    }

    pub fn is_successful(&self) -> bool {
        !self.failed
    }

    pub async fn mark_seen(&mut self, message: &Message) {
        if self.failed {
            return;
        }

        let mut flags = message.flags.clone();
        flags.push(SEEN_FLAG.to_string());
        self.updates.push(FlagUpdate::seen(message));
        self.entries.push(
            JournalEntry::fetch(self.mailbox_id, message.id, message.uid, flags)
                .with_ignore(self.session.id)
                .with_unseen_change(),
        );

        if self.updates.len() >= self.batch_size {
            self.flush(false).await;
        }
    }

    /// Writes the queued flag updates, then the journal entries if they
    /// filled a batch or `force` is set. Failures are logged and stop any
    /// further side effects of this fetch.
    pub async fn flush(&mut self, force: bool) {
        if self.failed || (self.updates.is_empty() && self.entries.is_empty()) {
            return;
        }

        if !self.updates.is_empty() {
            let updates = std::mem::take(&mut self.updates);
            let count = updates.len();
            match self.store.bulk_update(updates).await {
                Ok(result) => {
                    debug!(
                        "Set seen flag on {}/{} messages in mailbox {}.",
                        result.modified, count, self.mailbox_id
                    );
                }
                Err(err) => {
                    error!(
                        "Failed to update flags of {} messages in mailbox {}: {}",
                        count, self.mailbox_id, err
                    );
                    self.abort();
                    return;
                }
            }
        }

        if force || self.entries.len() >= self.batch_size {
            let entries = std::mem::take(&mut self.entries);
            match self
                .notifier
                .add_entries(self.session, self.mailbox_id, entries)
                .await
            {
                Ok(count) => {
                    debug!(
                        "Added {} journal entries to mailbox {}.",
                        count, self.mailbox_id
                    );
                    self.notifier.fire(&self.account_key, None);
                }
                Err(err) => {
                    error!(
                        "Failed to add journal entries to mailbox {}: {}",
                        self.mailbox_id, err
                    );
                    self.abort();
                }
            }
        }
    }

    fn abort(&mut self) {
        self.failed = true;
        self.updates.clear();
        self.entries.clear();
    }
}
