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

use std::time::Duration;

use super::env_settings::EnvSettings;

pub const DEFAULT_PAGE_SIZE: usize = 2500;
pub const DEFAULT_BATCH_SIZE: usize = 150;
pub const DEFAULT_NOTIFY_CHANNEL: &str = "imap:notifications";
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub fetch_page_size: usize,
    pub fetch_batch_size: usize,

    pub notify_channel: String,
    pub notify_queue_size: usize,
    pub notify_debounce: Duration,
    pub notify_max_delay: Duration,

    pub connection_counter_ttl: Duration,

    pub lock_timeout: Duration,
    pub lock_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            fetch_page_size: DEFAULT_PAGE_SIZE,
            fetch_batch_size: DEFAULT_BATCH_SIZE,
            notify_channel: DEFAULT_NOTIFY_CHANNEL.to_string(),
            notify_queue_size: DEFAULT_QUEUE_SIZE,
            notify_debounce: Duration::from_millis(100),
            notify_max_delay: Duration::from_millis(1000),
            connection_counter_ttl: Duration::from_secs(3600),
            lock_timeout: Duration::from_millis(1000),
            lock_retries: 3,
        }
    }
}

impl From<&EnvSettings> for SyncConfig {
    fn from(settings: &EnvSettings) -> Self {
        let default = SyncConfig::default();
        SyncConfig {
            fetch_page_size: settings
                .parse::<usize>("fetch-page-size")
                .filter(|v| *v > 0)
                .unwrap_or(default.fetch_page_size),
            fetch_batch_size: settings
                .parse::<usize>("fetch-batch-size")
                .filter(|v| *v > 0)
                .unwrap_or(default.fetch_batch_size),
            notify_channel: settings
                .get("notify-channel")
                .unwrap_or(default.notify_channel),
            notify_queue_size: settings
                .parse::<usize>("notify-queue-size")
                .filter(|v| *v > 0)
                .unwrap_or(default.notify_queue_size),
            notify_debounce: settings
                .parse_millis("notify-debounce-ms")
                .unwrap_or(default.notify_debounce),
            notify_max_delay: settings
                .parse_millis("notify-max-delay-ms")
                .unwrap_or(default.notify_max_delay),
            connection_counter_ttl: settings
                .parse_secs("connection-counter-ttl")
                .unwrap_or(default.connection_counter_ttl),
            lock_timeout: settings
                .parse_millis("lock-timeout-ms")
                .unwrap_or(default.lock_timeout),
            lock_retries: settings
                .parse::<u32>("lock-retries")
                .unwrap_or(default.lock_retries),
        }
    }
}
