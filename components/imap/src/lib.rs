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

use std::borrow::Cow;

pub mod protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    InUse,
    Nonexistent,
    ServerBug,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub tag: Option<String>,
    pub code: Option<ResponseCode>,
    pub message: Cow<'static, str>,
    pub bad: bool,
}

impl Error {
    pub fn bad(
        tag: Option<String>,
        code: Option<ResponseCode>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Error {
            tag,
            code,
            message: message.into(),
            bad: true,
        }
    }

    pub fn no(
        tag: Option<String>,
        code: Option<ResponseCode>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Error {
            tag,
            code,
            message: message.into(),
            bad: false,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}
