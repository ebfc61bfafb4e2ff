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

use store::{async_trait::async_trait, tracing::debug};
use tokio::sync::{broadcast, mpsc};

use crate::IPC_CHANNEL_BUFFER;

/// Topic shared by every process serving the same accounts.
#[async_trait]
pub trait Broadcast: Send + Sync {
    async fn publish(&self, channel: &str, message: Vec<u8>) -> store::Result<()>;

    /// Returns a receiver of `(channel, message)` pairs published from now on.
    fn subscribe(&self) -> mpsc::Receiver<(String, Vec<u8>)>;
}

/// Broadcast confined to the current process, every clone shares the topic.
#[derive(Clone)]
pub struct LocalBroadcast {
    tx: broadcast::Sender<(String, Vec<u8>)>,
}

impl LocalBroadcast {
    pub fn new() -> Self {
        LocalBroadcast {
            tx: broadcast::channel(IPC_CHANNEL_BUFFER).0,
        }
    }
}

impl Default for LocalBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broadcast for LocalBroadcast {
    async fn publish(&self, channel: &str, message: Vec<u8>) -> store::Result<()> {
        if self.tx.send((channel.to_string(), message)).is_err() {
            debug!("No subscribers listening on channel {}.", channel);
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<(String, Vec<u8>)> {
        let (tx, rx) = mpsc::channel(IPC_CHANNEL_BUFFER);
        let mut broadcast_rx = self.tx.subscribe();

        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        debug!("Broadcast subscriber lagged behind {} messages.", count);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        rx
    }
}
