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

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use ahash::AHashMap;
use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use crate::{
    query::{MessageQuery, Order},
    write::{BulkWriteResult, FlagUpdate},
    AccountStore, JournalEntry, JournalStore, Mailbox, MailboxId, MailboxStore, Message, MessageId,
    MessageStore, ModSeq, Result, RowStream, StoreError, Uid,
};

/// Store for a single account kept entirely in memory. Every operation is
/// serialized through one mutex, mirroring a single threaded per-account
/// executor.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    closed: Arc<AtomicBool>,
    optimized: Arc<AtomicBool>,
}

#[derive(Default)]
struct Inner {
    mailboxes: AHashMap<MailboxId, Mailbox>,
    messages: BTreeMap<(MailboxId, Uid), Message>,
    message_ids: AHashMap<MessageId, (MailboxId, Uid)>,
    journal: Vec<JournalEntry>,
    last_mailbox_id: MailboxId,
    last_message_id: MessageId,
}

impl Inner {
    fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        let key = self.message_ids.get(&id)?;
        self.messages.get_mut(key)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<()> {
        if !self.closed.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(StoreError::Closed)
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn is_optimized(&self) -> bool {
        self.optimized.load(Ordering::Relaxed)
    }

    pub fn create_mailbox(&self, path: impl Into<String>) -> Mailbox {
        let mut inner = self.inner.lock();
        inner.last_mailbox_id += 1;
        let mailbox = Mailbox::new(inner.last_mailbox_id, path);
        inner.mailboxes.insert(mailbox.id, mailbox.clone());
        mailbox
    }

    pub fn set_modify_index(&self, mailbox: MailboxId, modify_index: ModSeq) {
        if let Some(mailbox) = self.inner.lock().mailboxes.get_mut(&mailbox) {
            mailbox.modify_index = modify_index;
        }
    }

    /// Delivers a message, assigning it the next UID and the current
    /// modify index of the mailbox as its modseq.
    pub fn insert_message(&self, mut message: Message) -> Result<Message> {
        let mut inner = self.inner.lock();
        let mailbox = inner.mailboxes.get_mut(&message.mailbox).ok_or_else(|| {
            StoreError::NotFound(format!("Mailbox {} does not exist.", message.mailbox))
        })?;
        message.uid = mailbox.uid_next;
        mailbox.uid_next += 1;
        if message.modseq == 0 {
            message.modseq = mailbox.modify_index;
        }
        inner.last_message_id += 1;
        message.id = inner.last_message_id;
        inner
            .message_ids
            .insert(message.id, (message.mailbox, message.uid));
        inner
            .messages
            .insert((message.mailbox, message.uid), message.clone());
        Ok(message)
    }

    pub fn delete_message(&self, id: MessageId) -> Option<Message> {
        let mut inner = self.inner.lock();
        let key = inner.message_ids.remove(&id)?;
        inner.messages.remove(&key)
    }

    pub fn get_message(&self, id: MessageId) -> Option<Message> {
        let inner = self.inner.lock();
        inner
            .message_ids
            .get(&id)
            .and_then(|key| inner.messages.get(key))
            .cloned()
    }

    pub fn get_message_by_uid(&self, mailbox: MailboxId, uid: Uid) -> Option<Message> {
        self.inner.lock().messages.get(&(mailbox, uid)).cloned()
    }

    pub fn get_mailbox(&self, id: MailboxId) -> Option<Mailbox> {
        self.inner.lock().mailboxes.get(&id).cloned()
    }

    pub fn uid_list(&self, mailbox: MailboxId) -> Vec<Uid> {
        self.inner
            .lock()
            .messages
            .range((mailbox, Uid::MIN)..=(mailbox, Uid::MAX))
            .map(|(_, message)| message.uid)
            .collect()
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.inner.lock().journal.clone()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn find(&self, query: MessageQuery, order: Order) -> Result<RowStream> {
        self.check_open()?;

        // Matching ids are resolved now, rows are loaded as they are read.
        let mut ids = self
            .inner
            .lock()
            .messages
            .range((query.mailbox, Uid::MIN)..=(query.mailbox, Uid::MAX))
            .filter(|(_, message)| query.matches(message))
            .map(|(_, message)| message.id)
            .collect::<Vec<_>>();
        if order == Order::Descending {
            ids.reverse();
        }
        if let Some(limit) = query.limit {
            ids.truncate(limit);
        }

        let inner = self.inner.clone();
        let projection = query.projection;
        Ok(Box::pin(stream::unfold(
            ids.into_iter(),
            move |mut ids| {
                let message = ids.next().and_then(|id| {
                    let inner = inner.lock();
                    inner
                        .message_ids
                        .get(&id)
                        .and_then(|key| inner.messages.get(key))
                        .map(|message| message.clone().project(&projection))
                });
                async move { message.map(|message| (Ok(message), ids)) }
            },
        )))
    }

    async fn bulk_update(&self, updates: Vec<FlagUpdate>) -> Result<BulkWriteResult> {
        self.check_open()?;

        let mut inner = self.inner.lock();
        let mut result = BulkWriteResult::default();
        let mut failed = Vec::new();

        for update in updates {
            match inner
                .message_mut(update.message)
                .filter(|message| message.mailbox == update.mailbox && message.uid == update.uid)
            {
                Some(message) => {
                    result.matched += 1;
                    if update.apply(&mut message.flags) {
                        result.modified += 1;
                    }
                }
                None => failed.push(update.message),
            }
        }

        if failed.is_empty() {
            Ok(result)
        } else {
            Err(StoreError::BulkWriteFailed {
                applied: result.matched,
                failed,
            })
        }
    }

    async fn raise_modseq(&self, message: MessageId, modseq: ModSeq) -> Result<bool> {
        self.check_open()?;

        match self.inner.lock().message_mut(message) {
            Some(message) if message.modseq < modseq => {
                message.modseq = modseq;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!(
                "Message {} does not exist.",
                message
            ))),
        }
    }
}

#[async_trait]
impl MailboxStore for MemoryStore {
    async fn find_mailbox(&self, mailbox: MailboxId) -> Result<Option<Mailbox>> {
        self.check_open()?;
        Ok(self.get_mailbox(mailbox))
    }

    async fn increment_modify_index(&self, mailbox: MailboxId) -> Result<Option<ModSeq>> {
        self.check_open()?;
        Ok(self
            .inner
            .lock()
            .mailboxes
            .get_mut(&mailbox)
            .map(|mailbox| {
                mailbox.modify_index += 1;
                mailbox.modify_index
            }))
    }
}

#[async_trait]
impl JournalStore for MemoryStore {
    async fn append(&self, entries: Vec<JournalEntry>) -> Result<usize> {
        self.check_open()?;
        if entries.iter().any(|entry| entry.modseq.is_none()) {
            return Err(StoreError::InvalidArguments(
                "Journal entries require a modseq.".to_string(),
            ));
        }
        let count = entries.len();
        self.inner.lock().journal.extend(entries);
        Ok(count)
    }

    async fn query(&self, mailbox: MailboxId, since: ModSeq) -> Result<Vec<JournalEntry>> {
        self.check_open()?;
        Ok(self
            .inner
            .lock()
            .journal
            .iter()
            .filter(|entry| entry.mailbox == mailbox && entry.modseq.unwrap_or(0) > since)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn optimize(&self) -> Result<()> {
        self.check_open()?;
        self.optimized.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::Relaxed) {
            Ok(())
        } else {
            Err(StoreError::Closed)
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::MemoryStore;
    use crate::{
        query::{MessageQuery, Order, Projection},
        write::FlagUpdate,
        AccountStore, JournalEntry, JournalStore, MailboxStore, Message, MessageStore, StoreError,
    };

    fn populate(store: &MemoryStore, count: usize) -> (u64, Vec<Message>) {
        let mailbox = store.create_mailbox("INBOX");
        let messages = (0..count)
            .map(|n| {
                store
                    .insert_message(Message::new(mailbox.id, format!("message {}", n)))
                    .unwrap()
            })
            .collect();
        (mailbox.id, messages)
    }

    #[tokio::test]
    async fn find_in_uid_order() {
        let store = MemoryStore::new();
        let (mailbox_id, messages) = populate(&store, 5);
        store.raise_modseq(messages[3].id, 10).await.unwrap();

        let rows = store
            .find(
                MessageQuery::new(mailbox_id).with_uids(vec![5, 1, 4, 2]),
                Order::Ascending,
            )
            .await
            .unwrap()
            .map(|row| row.unwrap())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(
            rows.iter().map(|m| m.uid).collect::<Vec<_>>(),
            vec![1, 2, 4, 5]
        );
        assert!(rows.iter().all(|m| m.content.is_none()));

        let rows = store
            .find(
                MessageQuery::new(mailbox_id)
                    .with_changed_since(5)
                    .with_projection(Projection::all()),
                Order::Ascending,
            )
            .await
            .unwrap()
            .map(|row| row.unwrap())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].uid, 4);
        assert_eq!(rows[0].content.as_deref(), Some(&b"message 3"[..]));

        let rows = store
            .find(
                MessageQuery::new(mailbox_id).with_after_uid(2).with_limit(2),
                Order::Ascending,
            )
            .await
            .unwrap()
            .map(|row| row.unwrap().uid)
            .collect::<Vec<_>>()
            .await;
        assert_eq!(rows, vec![3, 4]);
    }

    #[tokio::test]
    async fn cursor_ends_on_vanished_row() {
        let store = MemoryStore::new();
        let (mailbox_id, messages) = populate(&store, 4);

        let mut rows = store
            .find(MessageQuery::new(mailbox_id), Order::Ascending)
            .await
            .unwrap();
        assert_eq!(rows.next().await.unwrap().unwrap().uid, 1);
        store.delete_message(messages[1].id);
        assert!(rows.next().await.is_none());
    }

    #[tokio::test]
    async fn bulk_update_partial_failure() {
        let store = MemoryStore::new();
        let (_, messages) = populate(&store, 3);
        let mut missing = messages[1].clone();
        missing.id = 999;

        let result = store
            .bulk_update(vec![
                FlagUpdate::seen(&messages[0]),
                FlagUpdate::seen(&missing),
                FlagUpdate::seen(&messages[2]),
            ])
            .await;
        assert_eq!(
            result,
            Err(StoreError::BulkWriteFailed {
                applied: 2,
                failed: vec![999]
            })
        );
        assert!(store.get_message(messages[0].id).unwrap().is_seen());
        assert!(!store.get_message(messages[1].id).unwrap().is_seen());
        assert!(store.get_message(messages[2].id).unwrap().is_seen());
    }

    #[tokio::test]
    async fn modseq_never_decreases() {
        let store = MemoryStore::new();
        let (mailbox_id, messages) = populate(&store, 1);

        assert_eq!(store.increment_modify_index(mailbox_id).await, Ok(Some(1)));
        assert_eq!(store.increment_modify_index(999).await, Ok(None));
        assert_eq!(store.raise_modseq(messages[0].id, 8).await, Ok(true));
        assert_eq!(store.raise_modseq(messages[0].id, 4).await, Ok(false));
        assert_eq!(store.get_message(messages[0].id).unwrap().modseq, 8);
    }

    #[tokio::test]
    async fn journal_append_and_query() {
        let store = MemoryStore::new();
        let (mailbox_id, messages) = populate(&store, 2);

        assert!(store
            .append(vec![JournalEntry::fetch(mailbox_id, messages[0].id, 1, vec![])])
            .await
            .is_err());
        store
            .append(vec![
                JournalEntry::fetch(mailbox_id, messages[0].id, 1, vec![]).with_modseq(3),
                JournalEntry::fetch(mailbox_id, messages[1].id, 2, vec![]).with_modseq(4),
            ])
            .await
            .unwrap();
        let entries = store.query(mailbox_id, 3).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].uid, Some(2));
    }

    #[tokio::test]
    async fn closed_store_rejects_requests() {
        let store = MemoryStore::new();
        let (mailbox_id, _) = populate(&store, 1);

        store.optimize().await.unwrap();
        assert!(store.is_optimized());
        store.close().await.unwrap();
        assert_eq!(store.close().await, Err(StoreError::Closed));
        assert_eq!(
            store.find_mailbox(mailbox_id).await,
            Err(StoreError::Closed)
        );
    }
}
