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

use std::{sync::Arc, time::Duration};

use store::{ahash::AHashMap, tracing::debug};
use tokio::{
    sync::mpsc,
    time::{self, Instant},
};

use super::{manager::ListenerRegistry, ChangeEvent, LONG_SLUMBER_MS};
use crate::IPC_CHANNEL_BUFFER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingPulse {
    count: u32,
    first_pulse: Instant,
    deadline: Instant,
}

/// Per account pulse coalescing. A burst collapses into one event once
/// `quiet` elapses without pulses, a burst older than `max_delay` is
/// flushed on the next pulse.
#[derive(Debug)]
pub struct Debouncer {
    pending: AHashMap<String, PendingPulse>,
    quiet: Duration,
    max_delay: Duration,
}

impl Debouncer {
    pub fn new(quiet: Duration, max_delay: Duration) -> Self {
        Debouncer {
            pending: AHashMap::new(),
            quiet,
            max_delay,
        }
    }

    /// Records a pulse, returns true if the account has to be notified
    /// right away.
    pub fn pulse(&mut self, account_key: &str, now: Instant) -> bool {
        if let Some(pending) = self.pending.get_mut(account_key) {
            pending.count += 1;
            if now.saturating_duration_since(pending.first_pulse) >= self.max_delay {
                debug!(
                    "Forcing notification for {} after {} pulses.",
                    account_key, pending.count
                );
                self.pending.remove(account_key);
                true
            } else {
                pending.deadline = now + self.quiet;
                false
            }
        } else {
            self.pending.insert(
                account_key.to_string(),
                PendingPulse {
                    count: 1,
                    first_pulse: now,
                    deadline: now + self.quiet,
                },
            );
            false
        }
    }

    /// Removes and returns every account whose quiet window has elapsed.
    pub fn expired(&mut self, now: Instant) -> Vec<String> {
        let mut expired = Vec::new();
        self.pending.retain(|account_key, pending| {
            if pending.deadline <= now {
                expired.push(account_key.to_string());
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    pub fn is_pending(&self, account_key: &str) -> bool {
        self.pending.contains_key(account_key)
    }
}

pub fn spawn_debouncer(
    listeners: Arc<ListenerRegistry>,
    quiet: Duration,
    max_delay: Duration,
) -> mpsc::Sender<String> {
    let (pulse_tx, mut pulse_rx) = mpsc::channel::<String>(IPC_CHANNEL_BUFFER);

    tokio::spawn(async move {
        let mut debouncer = Debouncer::new(quiet, max_delay);

        loop {
            let timeout = debouncer
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::from_millis(LONG_SLUMBER_MS));

            match time::timeout(timeout, pulse_rx.recv()).await {
                Ok(Some(account_key)) => {
                    if debouncer.pulse(&account_key, Instant::now()) {
                        listeners.deliver(ChangeEvent::pulse(account_key));
                    }
                }
                Ok(None) => {
                    debug!("Debouncer channel closed.");
                    break;
                }
                Err(_) => (),
            }

            for account_key in debouncer.expired(Instant::now()) {
                listeners.deliver(ChangeEvent::pulse(account_key));
            }
        }
    });

    pulse_tx
}
