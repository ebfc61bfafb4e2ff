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
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use store::{
    ahash::{AHashMap, AHashSet},
    config::imap::SyncConfig,
    counters::ConnectionCounters,
    parking_lot::{Mutex, RwLock},
    tracing::{debug, warn},
    LockProvider,
};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::{
    broadcast::Broadcast, connection::ConnectionRegistry, debounce::spawn_debouncer,
    ChangeEvent, Envelope, ListenerId, SEND_TIMEOUT_MS,
};
use crate::IPC_CHANNEL_BUFFER;

/// Local listeners grouped by account key.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<AHashMap<String, Vec<(ListenerId, mpsc::Sender<ChangeEvent>)>>>,
}

impl ListenerRegistry {
    pub fn add(&self, account_key: &str, tx: mpsc::Sender<ChangeEvent>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(account_key.to_string())
            .or_insert_with(Vec::new)
            .push((id, tx));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let mut removed = None;
        for (account_key, account_listeners) in listeners.iter_mut() {
            if let Some(pos) = account_listeners.iter().position(|(item, _)| *item == id) {
                account_listeners.swap_remove(pos);
                removed = (account_key.to_string(), account_listeners.is_empty()).into();
                break;
            }
        }
        match removed {
            Some((account_key, true)) => {
                listeners.remove(&account_key);
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn count(&self, account_key: &str) -> usize {
        self.listeners
            .read()
            .get(account_key)
            .map_or(0, |listeners| listeners.len())
    }

    /// Hands the event to every listener of its account exactly once.
    pub fn deliver(&self, event: ChangeEvent) {
        let mut closed = Vec::new();

        if let Some(listeners) = self.listeners.read().get(&event.account_key) {
            for (id, tx) in listeners {
                match tx.try_send(event.clone()) {
                    Ok(()) => (),
                    Err(TrySendError::Full(event)) => {
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            // Timeout after 500ms in case there is a blocked client
                            if let Err(err) = tx
                                .send_timeout(event, Duration::from_millis(SEND_TIMEOUT_MS))
                                .await
                            {
                                debug!("Error sending change event to listener: {}", err);
                            }
                        });
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        for id in closed {
            debug!("Removing closed listener {:?}.", id);
            self.remove(id);
        }
    }
}

/// Outbound queue state shared between `fire` and the publisher task.
struct Outbound {
    tx: mpsc::Sender<Envelope>,
    queued_pulses: Mutex<AHashSet<String>>,
}

pub struct ChangeNotifier {
    pub(super) lock: Arc<dyn LockProvider>,
    pub(super) lock_timeout: Duration,
    pub(super) lock_retries: u32,
    pub(super) counters: Arc<dyn ConnectionCounters>,
    pub(super) counter_ttl: Duration,
    pub(super) connections: ConnectionRegistry,
    listeners: Arc<ListenerRegistry>,
    outbound: Arc<Outbound>,
}

impl ChangeNotifier {
    pub fn new(
        config: &SyncConfig,
        broadcast: Arc<dyn Broadcast>,
        lock: Arc<dyn LockProvider>,
        counters: Arc<dyn ConnectionCounters>,
    ) -> Arc<Self> {
        let listeners = Arc::new(ListenerRegistry::default());
        let (outbound_tx, outbound_rx) = mpsc::channel(std::cmp::max(config.notify_queue_size, 1));
        let outbound = Arc::new(Outbound {
            tx: outbound_tx,
            queued_pulses: Mutex::new(AHashSet::new()),
        });

        spawn_publisher(
            broadcast.clone(),
            config.notify_channel.clone(),
            outbound.clone(),
            outbound_rx,
        );
        spawn_subscriber(
            broadcast,
            config.notify_channel.clone(),
            listeners.clone(),
            spawn_debouncer(
                listeners.clone(),
                config.notify_debounce,
                config.notify_max_delay,
            ),
        );

        Arc::new(ChangeNotifier {
            lock,
            lock_timeout: config.lock_timeout,
            lock_retries: std::cmp::max(config.lock_retries, 1),
            counters,
            counter_ttl: config.connection_counter_ttl,
            connections: ConnectionRegistry::default(),
            listeners,
            outbound,
        })
    }

    /// Queues a notification for every process hosting the account. Without
    /// a payload the notification is a pulse that may be coalesced.
    ///
    /// A pulse for an account that already has one queued is merged into
    /// it. When the queue is full pulses are dropped and payloads are
    /// dropped with a warning.
    pub fn fire(&self, account_key: &str, payload: Option<serde_json::Value>) {
        let is_pulse = payload.is_none();

        if is_pulse && !self.outbound.queued_pulses.lock().insert(account_key.to_string()) {
            return;
        }

        match self.outbound.tx.try_send(Envelope {
            account_key: account_key.to_string(),
            payload,
        }) {
            Ok(()) => (),
            Err(err) => {
                if is_pulse {
                    self.outbound.queued_pulses.lock().remove(account_key);
                    debug!("Dropping notification pulse for {}: {}", account_key, err);
                } else {
                    warn!("Dropping notification for {}: {}", account_key, err);
                }
            }
        }
    }

    pub fn add_listener(&self, account_key: &str, tx: mpsc::Sender<ChangeEvent>) -> ListenerId {
        self.listeners.add(account_key, tx)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn subscribe(&self, account_key: &str) -> (ListenerId, mpsc::Receiver<ChangeEvent>) {
        let (tx, rx) = mpsc::channel(IPC_CHANNEL_BUFFER);
        (self.add_listener(account_key, tx), rx)
    }

    pub fn listener_count(&self, account_key: &str) -> usize {
        self.listeners.count(account_key)
    }
}

fn spawn_publisher(
    broadcast: Arc<dyn Broadcast>,
    channel: String,
    outbound: Arc<Outbound>,
    mut outbound_rx: mpsc::Receiver<Envelope>,
) {
    tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            if envelope.payload.is_none() {
                outbound.queued_pulses.lock().remove(&envelope.account_key);
            }

            match serde_json::to_vec(&envelope) {
                Ok(message) => {
                    if let Err(err) = broadcast.publish(&channel, message).await {
                        warn!(
                            "Failed to publish notification for {}: {}",
                            envelope.account_key, err
                        );
                    }
                }
                Err(err) => {
                    warn!(
                        "Failed to serialize notification for {}: {}",
                        envelope.account_key, err
                    );
                }
            }
        }
    });
}

fn spawn_subscriber(
    broadcast: Arc<dyn Broadcast>,
    channel: String,
    listeners: Arc<ListenerRegistry>,
    debounce_tx: mpsc::Sender<String>,
) {
    let mut inbound_rx = broadcast.subscribe();

    tokio::spawn(async move {
        while let Some((inbound_channel, message)) = inbound_rx.recv().await {
            if inbound_channel != channel {
                continue;
            }

            let event = match serde_json::from_slice::<Envelope>(&message) {
                Ok(envelope) => ChangeEvent::from(envelope),
                Err(err) => {
                    debug!("Ignoring malformed notification: {}", err);
                    continue;
                }
            };

            if event.is_pulse() {
                if let Err(err) = debounce_tx.send(event.account_key).await {
                    debug!("Failed to send pulse to debouncer: {}", err);
                    break;
                }
            } else {
                listeners.deliver(event);
            }
        }
        debug!("Notification subscriber stopped.");
    });
}
