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
    ahash::AHashMap,
    parking_lot::Mutex,
    tracing::{debug, warn},
    AccountStore, SessionId,
};

use super::manager::ChangeNotifier;
use crate::{
    error::Error,
    session::{Account, Session},
};

/// Sessions currently counted as open connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<AHashMap<SessionId, Account>>,
}

impl ConnectionRegistry {
    pub fn insert(&self, session_id: SessionId, account: Account) -> bool {
        self.connections.lock().insert(session_id, account).is_none()
    }

    pub fn remove(&self, session_id: SessionId) -> Option<Account> {
        self.connections.lock().remove(&session_id)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn counter_keys(account: &Account) -> Vec<String> {
    vec![
        format!("imap:connections:account:{}", account.key()),
        format!("imap:connections:domain:{}", account.domain),
    ]
}

impl ChangeNotifier {
    pub async fn register_connection(&self, session: &Session) -> crate::Result<()> {
        let account = session
            .account
            .as_ref()
            .ok_or_else(|| Error::contract("Session is not authenticated."))?;

        if self.connections.insert(session.id, account.clone()) {
            if let Err(err) = self
                .counters
                .increment(&counter_keys(account), self.counter_ttl)
                .await
            {
                warn!(
                    "Failed to increment connection counters for {}: {}",
                    account.key(),
                    err
                );
            }
        }

        Ok(())
    }

    /// Tears down a session. Safe to call more than once, never fails.
    pub async fn release_connection(&self, session: &Session) -> bool {
        if !session.is_authenticated() {
            return true;
        }

        if let Some(store) = session.take_store() {
            if let Err(err) = store.optimize().await {
                debug!("Failed to optimize store of session {}: {}", session.id, err);
            }
            if let Err(err) = store.close().await {
                debug!("Failed to close store of session {}: {}", session.id, err);
            }
        }

        if let Some(account) = self.connections.remove(session.id) {
            if let Err(err) = self
                .counters
                .decrement(&counter_keys(&account), self.counter_ttl)
                .await
            {
                debug!(
                    "Failed to decrement connection counters for {}: {}",
                    account.key(),
                    err
                );
            }
        }

        true
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
