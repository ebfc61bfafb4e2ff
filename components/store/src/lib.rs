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

pub mod config;
pub mod core;
pub mod counters;
pub mod memory;
pub mod query;
pub mod write;

use std::any::Any;
use std::time::Duration;

use futures::stream::BoxStream;

pub use crate::core::error::StoreError;
pub use crate::core::journal::{JournalCommand, JournalEntry};
pub use crate::core::mailbox::Mailbox;
pub use crate::core::message::Message;
pub use ahash;
pub use async_trait;
pub use chrono;
pub use futures;
pub use parking_lot;
pub use serde_json;
pub use tracing;

use query::{MessageQuery, Order};
use write::{BulkWriteResult, FlagUpdate};

pub type MailboxId = u64;
pub type MessageId = u64;
pub type SessionId = u64;
pub type Uid = u32;
pub type ModSeq = u64;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Rows produced by a message query. The stream ends early when a row
/// vanished between the moment the query was evaluated and the moment the
/// row was read.
pub type RowStream = BoxStream<'static, Result<Message>>;

#[::async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    async fn find(&self, query: MessageQuery, order: Order) -> Result<RowStream>;

    /// Applies every update independently, a failing item does not prevent
    /// the remaining ones from being written.
    async fn bulk_update(&self, updates: Vec<FlagUpdate>) -> Result<BulkWriteResult>;

    /// Sets the message modseq to `modseq` only if it is currently lower.
    async fn raise_modseq(&self, message: MessageId, modseq: ModSeq) -> Result<bool>;
}

#[::async_trait::async_trait]
pub trait MailboxStore: Send + Sync {
    async fn find_mailbox(&self, mailbox: MailboxId) -> Result<Option<Mailbox>>;

    /// Atomically increments the mailbox modify index and returns the new
    /// value, or `None` if the mailbox does not exist.
    async fn increment_modify_index(&self, mailbox: MailboxId) -> Result<Option<ModSeq>>;
}

#[::async_trait::async_trait]
pub trait JournalStore: Send + Sync {
    async fn append(&self, entries: Vec<JournalEntry>) -> Result<usize>;

    async fn query(&self, mailbox: MailboxId, since: ModSeq) -> Result<Vec<JournalEntry>>;
}

/// Handle on the store of a single account.
#[::async_trait::async_trait]
pub trait AccountStore: MessageStore + MailboxStore + JournalStore {
    async fn optimize(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// A held advisory lock, released on drop.
pub struct LockGuard {
    _inner: Box<dyn Any + Send + Sync>,
}

impl LockGuard {
    pub fn new(inner: impl Any + Send + Sync) -> Self {
        LockGuard {
            _inner: Box::new(inner),
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LockGuard")
    }
}

#[::async_trait::async_trait]
pub trait LockProvider: Send + Sync {
    /// Waits at most `timeout` for the lock, returns `None` if it could not
    /// be obtained in time.
    async fn acquire(&self, namespace: &str, key: &str, timeout: Duration) -> Option<LockGuard>;
}
