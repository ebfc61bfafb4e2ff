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

use serde::{Deserialize, Serialize};

pub mod broadcast;
pub mod connection;
pub mod debounce;
pub mod journal;
pub mod manager;

const SEND_TIMEOUT_MS: u64 = 500;
const LONG_SLUMBER_MS: u64 = 60 * 60 * 24 * 1000;
pub const LOCK_NAMESPACE: &str = "imap:mailbox";

/// Event handed to local listeners of an account.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub account_key: String,
    pub payload: Option<serde_json::Value>,
}

impl ChangeEvent {
    pub fn pulse(account_key: impl Into<String>) -> Self {
        ChangeEvent {
            account_key: account_key.into(),
            payload: None,
        }
    }

    pub fn is_pulse(&self) -> bool {
        self.payload.is_none()
    }
}

/// Wire format of a cross-process notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub account_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl From<Envelope> for ChangeEvent {
    fn from(envelope: Envelope) -> Self {
        ChangeEvent {
            account_key: envelope.account_key,
            payload: envelope.payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);
