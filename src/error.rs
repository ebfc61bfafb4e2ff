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

use std::{borrow::Cow, fmt::Display};

use imap::ResponseCode;
use store::{MailboxId, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The caller broke the contract of the operation, never recovered.
    ContractViolation(Cow<'static, str>),
    MailboxNotFound(MailboxId),
    Store(StoreError),
    ServerShutdown,
    SocketClosed,
    LockTimeout(MailboxId),
}

impl Error {
    pub fn contract(message: impl Into<Cow<'static, str>>) -> Self {
        Error::ContractViolation(message.into())
    }

    pub fn response_code(&self) -> ResponseCode {
        match self {
            Error::ContractViolation(_) => ResponseCode::ServerBug,
            Error::MailboxNotFound(_) => ResponseCode::Nonexistent,
            Error::LockTimeout(_) => ResponseCode::InUse,
            Error::Store(_) | Error::ServerShutdown | Error::SocketClosed => {
                ResponseCode::Unavailable
            }
        }
    }

    /// Disconnects and transient store failures may be retried, a shutdown
    /// or a caller bug may not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Store(_) | Error::SocketClosed | Error::LockTimeout(_)
        )
    }

    pub fn into_response(self, tag: impl Into<String>) -> imap::Error {
        imap::Error::from(self).with_tag(tag)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ContractViolation(message) => write!(f, "Contract violation: {}", message),
            Error::MailboxNotFound(id) => write!(f, "Mailbox {} does not exist.", id),
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::ServerShutdown => write!(f, "Server is shutting down."),
            Error::SocketClosed => write!(f, "Connection closed by client."),
            Error::LockTimeout(id) => write!(f, "Timed out waiting for lock on mailbox {}.", id),
        }
    }
}

impl std::error::Error for Error {}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Store(err)
    }
}

impl From<Error> for imap::Error {
    fn from(err: Error) -> Self {
        let code = err.response_code();
        match err {
            Error::ContractViolation(_) => {
                imap::Error::bad(None, code.into(), "Internal server error.")
            }
            Error::MailboxNotFound(_) => {
                imap::Error::no(None, code.into(), "Mailbox does not exist.")
            }
            Error::LockTimeout(_) => imap::Error::no(
                None,
                code.into(),
                "Mailbox is busy, try again later.",
            ),
            Error::Store(_) => imap::Error::no(
                None,
                code.into(),
                "Temporary storage failure, try again later.",
            ),
            Error::ServerShutdown => {
                imap::Error::no(None, code.into(), "Server is shutting down.")
            }
            Error::SocketClosed => imap::Error::no(None, code.into(), "Connection closed."),
        }
    }
}
