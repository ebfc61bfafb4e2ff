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

use imap::protocol::{
    fetch::{DataItem, FetchItem},
    Flag,
};
use store::{
    config::imap::SyncConfig,
    futures::StreamExt,
    query::Order,
    tracing::debug,
    MailboxId, MailboxStore, Message, MessageStore, Uid,
};
use tokio::sync::watch;

use crate::{
    error::Error,
    session::{SelectedMailbox, Session},
    state::manager::ChangeNotifier,
};

use self::batch::SideEffects;
pub use self::options::FetchOptions;

pub mod batch;
pub mod options;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchResult {
    pub row_count: usize,
    pub total_bytes: usize,
    /// False when flag updates or journal entries could not be written,
    /// the responses themselves were still delivered.
    pub successful: bool,
    pub last_uid: Option<Uid>,
}

pub struct FetchPipeline {
    notifier: Arc<ChangeNotifier>,
    shutdown: watch::Receiver<bool>,
    page_size: usize,
    batch_size: usize,
}

impl FetchPipeline {
    pub fn new(
        config: &SyncConfig,
        notifier: Arc<ChangeNotifier>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        FetchPipeline {
            notifier,
            shutdown,
            page_size: std::cmp::max(config.fetch_page_size, 1),
            batch_size: std::cmp::max(config.fetch_batch_size, 1),
        }
    }

    /// Streams the requested messages to the session in ascending UID
    /// order, marking them as seen if requested.
    pub async fn fetch(
        &self,
        mailbox_id: MailboxId,
        options: &FetchOptions,
        session: &Session,
    ) -> crate::Result<FetchResult> {
        if options.messages.is_empty() {
            return Err(Error::contract("Fetch requested no messages."));
        }
        let store = session
            .store()
            .ok_or_else(|| Error::contract("Session has no store handle."))?;
        let account_key = session
            .account
            .as_ref()
            .map(|account| account.key())
            .ok_or_else(|| Error::contract("Session is not authenticated."))?;
        if store.find_mailbox(mailbox_id).await?.is_none() {
            return Err(Error::MailboxNotFound(mailbox_id));
        }

        let mut messages = options.messages.clone();
        messages.sort_unstable();
        messages.dedup();

        let snapshot = session.selected_mailbox(mailbox_id);
        let is_full_range = snapshot.map_or(false, |snapshot| snapshot.uid_list == messages);
        let uids = if !is_full_range {
            Some(messages.as_slice())
        } else {
            None
        };

        let mut result = FetchResult {
            successful: true,
            last_uid: options.last_uid,
            ..Default::default()
        };
        let mut side_effects = SideEffects::new(
            &self.notifier,
            session,
            store.clone(),
            mailbox_id,
            account_key,
            self.batch_size,
        );

        let status: crate::Result<()> = async {
            loop {
                let mut rows = store
                    .find(
                        options.page_query(mailbox_id, uids, result.last_uid, self.page_size),
                        Order::Ascending,
                    )
                    .await?;
                let mut page_rows = 0usize;

                while let Some(row) = rows.next().await {
                    let mut message = row?;

                    if *self.shutdown.borrow() {
                        debug!("Fetch of mailbox {} aborted by shutdown.", mailbox_id);
                        return Err(Error::ServerShutdown);
                    }
                    if !session.stream.is_open() {
                        debug!("Fetch of mailbox {} aborted, client gone.", mailbox_id);
                        return Err(Error::SocketClosed);
                    }

                    page_rows += 1;
                    result.last_uid = message.uid.into();

                    if is_full_range && !snapshot.map_or(false, |s| s.contains(message.uid)) {
                        continue;
                    }

                    let set_seen = options.mark_as_seen && !message.is_seen();
                    let bytes = build_item(options, &mut message, snapshot, set_seen).into_bytes();
                    let bytes_len = bytes.len();
                    session.stream.write_bytes(bytes).await.map_err(|err| {
                        debug!("Failed to write fetch response: {}", err);
                        Error::SocketClosed
                    })?;
                    result.row_count += 1;
                    result.total_bytes += bytes_len;

                    if set_seen {
                        side_effects.mark_seen(&message).await;
                    }
                }

                // A cursor may end early when a row vanished under it, only
                // an empty pass means there is nothing left after last_uid.
                if page_rows == 0 {
                    return Ok(());
                }
                debug!(
                    "Resuming fetch of mailbox {} after UID {:?} ({} rows read, page size {}).",
                    mailbox_id, result.last_uid, page_rows, self.page_size
                );
            }
        }
        .await;

        side_effects.flush(true).await;
        result.successful = side_effects.is_successful();

        status.map(|_| result)
    }
}

fn build_item(
    options: &FetchOptions,
    message: &mut Message,
    snapshot: Option<&SelectedMailbox>,
    set_seen: bool,
) -> FetchItem {
    let mut items = Vec::with_capacity(8);

    items.push(DataItem::Uid { uid: message.uid });
    if options.flags || set_seen {
        let mut flags = message.flags.iter().map(Flag::from).collect::<Vec<_>>();
        if set_seen {
            flags.push(Flag::Seen);
        }
        items.push(DataItem::Flags { flags });
    }
    if options.internal_date {
        items.push(DataItem::InternalDate {
            date: message.internal_date,
        });
    }
    if options.size {
        items.push(DataItem::Rfc822Size { size: message.size });
    }
    if options.envelope {
        if let Some(envelope) = message.envelope.take() {
            items.push(DataItem::Envelope { envelope });
        }
    }
    if options.body_structure {
        if let Some(part) = message.body_structure.take() {
            items.push(DataItem::BodyStructure { part });
        }
    }
    if let Some(contents) = message.content.take() {
        if options.rfc822 && options.body {
            items.push(DataItem::Rfc822 {
                contents: contents.clone(),
            });
            items.push(DataItem::BodySection { contents });
        } else if options.rfc822 {
            items.push(DataItem::Rfc822 { contents });
        } else if options.body {
            items.push(DataItem::BodySection { contents });
        }
    }
    if options.include_modseq() {
        items.push(DataItem::ModSeq {
            modseq: message.modseq,
        });
    }

    FetchItem {
        id: snapshot.map_or(message.uid, |snapshot| snapshot.seqnum(message.uid)),
        items,
    }
}
