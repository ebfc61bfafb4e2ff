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
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use store::{
    async_trait::async_trait,
    config::imap::SyncConfig,
    counters::MemoryCounters,
    futures::StreamExt,
    memory::MemoryStore,
    parking_lot::Mutex,
    query::{MessageQuery, Order},
    write::{BulkWriteResult, FlagUpdate},
    write::mutex_map::MutexMap,
    AccountStore, JournalEntry, JournalStore, LockProvider, Mailbox, MailboxId, MailboxStore,
    Message, MessageId, MessageStore, ModSeq, RowStream, SessionId, StoreError, Uid,
};

use crate::{
    session::{Account, SelectedMailbox, Session, SessionStream},
    state::broadcast::{Broadcast, LocalBroadcast},
    IMAPServer,
};

pub fn enable_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Session stream keeping every response written to it.
#[derive(Default)]
pub struct RecordingStream {
    closed: AtomicBool,
    close_after: Option<usize>,
    writes: Mutex<Vec<Vec<u8>>>,
}

impl RecordingStream {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingStream::default())
    }

    /// Reports the connection as closed once `count` responses were written.
    pub fn closing_after(count: usize) -> Arc<Self> {
        Arc::new(RecordingStream {
            close_after: count.into(),
            ..Default::default()
        })
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn responses(&self) -> Vec<String> {
        self.writes
            .lock()
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    pub fn total_bytes(&self) -> usize {
        self.writes.lock().iter().map(|bytes| bytes.len()).sum()
    }

    /// UIDs of every FETCH response, in the order they were written.
    pub fn uids(&self) -> Vec<Uid> {
        self.responses()
            .iter()
            .filter_map(|response| {
                response
                    .split_once("(UID ")
                    .and_then(|(_, rest)| {
                        rest.split(|c: char| !c.is_ascii_digit()).next()
                    })
                    .and_then(|uid| uid.parse().ok())
            })
            .collect()
    }
}

#[async_trait]
impl SessionStream for RecordingStream {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Relaxed)
    }

    async fn write_bytes(&self, bytes: Vec<u8>) -> std::io::Result<()> {
        let mut writes = self.writes.lock();
        writes.push(bytes);
        if self.close_after.map_or(false, |count| writes.len() >= count) {
            self.closed.store(true, Ordering::Relaxed);
        }
        Ok(())
    }
}

pub type RowHook = Arc<dyn Fn(&MemoryStore, &Message) + Send + Sync>;

/// In-memory store recording bulk writes, with failure injection and a
/// hook invoked for every row read.
#[derive(Default)]
pub struct TestStore {
    pub inner: MemoryStore,
    bulk_sizes: Mutex<Vec<usize>>,
    fail_bulk: AtomicBool,
    yield_on_increment: AtomicBool,
    row_hook: Mutex<Option<RowHook>>,
}

impl TestStore {
    pub fn new() -> Arc<Self> {
        Arc::new(TestStore::default())
    }

    pub fn bulk_sizes(&self) -> Vec<usize> {
        self.bulk_sizes.lock().clone()
    }

    pub fn fail_bulk_updates(&self) {
        self.fail_bulk.store(true, Ordering::Relaxed);
    }

    /// Turns `increment_modify_index` into a read, a suspension point and
    /// a write, so concurrent unserialized callers mint the same value.
    pub fn yield_on_increment(&self) {
        self.yield_on_increment.store(true, Ordering::Relaxed);
    }

    pub fn set_row_hook(&self, hook: impl Fn(&MemoryStore, &Message) + Send + Sync + 'static) {
        *self.row_hook.lock() = Some(Arc::new(hook));
    }

    /// Creates a mailbox holding `count` messages, the first `seen` of
    /// them flagged as seen.
    pub fn populate(&self, count: usize, seen: usize) -> Mailbox {
        let mailbox = self.inner.create_mailbox("INBOX");
        for num in 0..count {
            let mut message = Message::new(
                mailbox.id,
                format!("Subject: message {}\r\n\r\nbody {}", num, num),
            )
            .with_internal_date(1_600_000_000 + num as i64);
            if num < seen {
                message = message.with_flag("\\Seen");
            }
            self.inner.insert_message(message).unwrap();
        }
        mailbox
    }

    pub fn seen_count(&self, mailbox: MailboxId) -> usize {
        self.inner
            .uid_list(mailbox)
            .into_iter()
            .filter_map(|uid| self.inner.get_message_by_uid(mailbox, uid))
            .filter(|message| message.is_seen())
            .count()
    }
}

#[async_trait]
impl MessageStore for TestStore {
    async fn find(&self, query: MessageQuery, order: Order) -> store::Result<RowStream> {
        let rows = self.inner.find(query, order).await?;
        let hook = self.row_hook.lock().clone();
        Ok(if let Some(hook) = hook {
            let store = self.inner.clone();
            rows.map(move |row| {
                if let Ok(message) = &row {
                    hook(&store, message);
                }
                row
            })
            .boxed()
        } else {
            rows
        })
    }

    async fn bulk_update(&self, updates: Vec<FlagUpdate>) -> store::Result<BulkWriteResult> {
        self.bulk_sizes.lock().push(updates.len());
        if self.fail_bulk.load(Ordering::Relaxed) {
            Err(StoreError::InternalError("Write failed.".to_string()))
        } else {
            self.inner.bulk_update(updates).await
        }
    }

    async fn raise_modseq(&self, message: MessageId, modseq: ModSeq) -> store::Result<bool> {
        self.inner.raise_modseq(message, modseq).await
    }
}

#[async_trait]
impl MailboxStore for TestStore {
    async fn find_mailbox(&self, mailbox: MailboxId) -> store::Result<Option<Mailbox>> {
        self.inner.find_mailbox(mailbox).await
    }

    async fn increment_modify_index(&self, mailbox: MailboxId) -> store::Result<Option<ModSeq>> {
        if self.yield_on_increment.load(Ordering::Relaxed) {
            let modify_index = match self.inner.find_mailbox(mailbox).await? {
                Some(mailbox) => mailbox.modify_index + 1,
                None => return Ok(None),
            };
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.inner.set_modify_index(mailbox, modify_index);
            Ok(Some(modify_index))
        } else {
            self.inner.increment_modify_index(mailbox).await
        }
    }
}

#[async_trait]
impl JournalStore for TestStore {
    async fn append(&self, entries: Vec<JournalEntry>) -> store::Result<usize> {
        self.inner.append(entries).await
    }

    async fn query(&self, mailbox: MailboxId, since: ModSeq) -> store::Result<Vec<JournalEntry>> {
        self.inner.query(mailbox, since).await
    }
}

#[async_trait]
impl AccountStore for TestStore {
    async fn optimize(&self) -> store::Result<()> {
        self.inner.optimize().await
    }

    async fn close(&self) -> store::Result<()> {
        self.inner.close().await
    }
}

pub struct TestServer {
    pub server: IMAPServer,
    pub broadcast: LocalBroadcast,
    pub lock: Arc<MutexMap>,
    pub counters: Arc<MemoryCounters>,
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        lock_timeout: Duration::from_millis(50),
        lock_retries: 2,
        ..Default::default()
    }
}

pub fn init_server(config: SyncConfig) -> TestServer {
    init_server_with_broadcast(config, LocalBroadcast::new())
}

/// Servers sharing a broadcast behave like separate processes serving the
/// same accounts.
pub fn init_server_with_broadcast(config: SyncConfig, broadcast: LocalBroadcast) -> TestServer {
    enable_logging();

    let lock = Arc::new(MutexMap::default());
    let counters = Arc::new(MemoryCounters::new());
    TestServer {
        server: IMAPServer::new(
            config,
            Arc::new(broadcast.clone()) as Arc<dyn Broadcast>,
            lock.clone() as Arc<dyn LockProvider>,
            counters.clone(),
        ),
        broadcast,
        lock,
        counters,
    }
}

pub fn jane() -> Account {
    Account::new("jane", "example.org")
}

pub fn init_session(
    id: SessionId,
    account: Account,
    store: Arc<TestStore>,
    stream: Arc<dyn SessionStream>,
) -> Session {
    let mut session = Session::new(id, stream);
    session.authenticate(account, store);
    session
}

pub fn select_all(session: &mut Session, store: &TestStore, mailbox: MailboxId) -> Vec<Uid> {
    let uid_list = store.inner.uid_list(mailbox);
    session.select(SelectedMailbox::new(mailbox, uid_list.clone()));
    uid_list
}
