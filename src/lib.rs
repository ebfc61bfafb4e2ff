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

use fetch::FetchPipeline;
use state::{broadcast::Broadcast, manager::ChangeNotifier};
use store::{config::imap::SyncConfig, counters::ConnectionCounters, LockProvider};
use tokio::sync::watch;

pub mod error;
pub mod fetch;
pub mod session;
pub mod state;

#[cfg(test)]
pub mod tests;

pub const IPC_CHANNEL_BUFFER: usize = 1024;

pub type Result<T> = std::result::Result<T, error::Error>;

pub struct IMAPServer {
    pub config: SyncConfig,
    pub notifier: Arc<ChangeNotifier>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl IMAPServer {
    /// Wires the synchronization core. Must be called from within a Tokio
    /// runtime, the notifier spawns its background tasks here.
    pub fn new(
        config: SyncConfig,
        broadcast: Arc<dyn Broadcast>,
        lock: Arc<dyn LockProvider>,
        counters: Arc<dyn ConnectionCounters>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        IMAPServer {
            notifier: ChangeNotifier::new(&config, broadcast, lock, counters),
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn fetch_pipeline(&self) -> FetchPipeline {
        FetchPipeline::new(&self.config, self.notifier.clone(), self.shutdown_rx.clone())
    }

    pub fn shutdown(&self) {
        if self.shutdown_tx.send(true).is_err() {
            store::tracing::debug!("No fetch pipelines were listening for shutdown.");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}
