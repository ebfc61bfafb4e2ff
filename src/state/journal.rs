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

use store::{
    chrono::Utc,
    tracing::{debug, error},
    JournalEntry, JournalStore, LockGuard, MailboxId, MailboxStore, MessageStore, ModSeq,
};

use super::{manager::ChangeNotifier, LOCK_NAMESPACE};
use crate::{error::Error, session::Session};

impl ChangeNotifier {
    /// Appends entries to the mailbox journal. Entries referencing a message
    /// without a modseq of their own share a newly minted modseq, and the
    /// referenced messages are raised to it.
    pub async fn add_entries(
        &self,
        session: &Session,
        mailbox_id: MailboxId,
        mut entries: Vec<JournalEntry>,
    ) -> crate::Result<usize> {
        let store = session
            .store()
            .ok_or_else(|| Error::contract("Session has no store handle."))?;
        if !session.is_authenticated() {
            return Err(Error::contract("Session is not authenticated."));
        }
        if entries.is_empty() {
            return Ok(0);
        }

        let mailbox = store
            .find_mailbox(mailbox_id)
            .await?
            .ok_or(Error::MailboxNotFound(mailbox_id))?;

        let mut updated = entries
            .iter()
            .filter(|entry| entry.is_update())
            .filter_map(|entry| entry.message)
            .collect::<Vec<_>>();
        updated.sort_unstable();
        updated.dedup();

        let (modseq, _guard) = if !updated.is_empty() {
            let guard = self.lock_mailbox(mailbox_id).await?;
            (
                store
                    .increment_modify_index(mailbox_id)
                    .await?
                    .ok_or(Error::MailboxNotFound(mailbox_id))?,
                Some(guard),
            )
        } else {
            (mailbox.modify_index, None)
        };

        let created = Utc::now();
        for entry in &mut entries {
            if entry.modseq.is_none() {
                entry.modseq = modseq.into();
            }
            if entry.created.is_none() {
                entry.created = created.into();
            }
        }

        for message_id in updated {
            match store.raise_modseq(message_id, modseq).await {
                Ok(true) => (),
                Ok(false) => {
                    debug!(
                        "Message {} already at or above modseq {}.",
                        message_id, modseq
                    );
                }
                Err(err) => {
                    error!(
                        "Failed to raise modseq of message {} in mailbox {} to {}: {}",
                        message_id, mailbox_id, modseq, err
                    );
                }
            }
        }

        Ok(store.append(entries).await?)
    }

    /// Journal entries of a mailbox newer than `since`, leaving out the ones
    /// the session caused itself.
    pub async fn get_updates(
        &self,
        session: &Session,
        mailbox_id: MailboxId,
        since: ModSeq,
    ) -> crate::Result<Vec<JournalEntry>> {
        let store = session
            .store()
            .ok_or_else(|| Error::contract("Session has no store handle."))?;
        Ok(store
            .query(mailbox_id, since)
            .await?
            .into_iter()
            .filter(|entry| entry.ignore != Some(session.id))
            .collect())
    }

    async fn lock_mailbox(&self, mailbox_id: MailboxId) -> crate::Result<LockGuard> {
        let key = mailbox_id.to_string();
        for attempt in 1..=self.lock_retries {
            if let Some(guard) = self
                .lock
                .acquire(LOCK_NAMESPACE, &key, self.lock_timeout)
                .await
            {
                return Ok(guard);
            }
            debug!(
                "Lock on mailbox {} not acquired (attempt {}/{}).",
                mailbox_id, attempt, self.lock_retries
            );
        }
        error!(
            "Giving up on lock for mailbox {} after {} attempts.",
            mailbox_id, self.lock_retries
        );
        Err(Error::LockTimeout(mailbox_id))
    }
}
