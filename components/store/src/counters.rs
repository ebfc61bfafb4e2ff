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

use std::time::{Duration, Instant};

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;

/// Liveness counters shared by every process serving the same accounts.
#[async_trait]
pub trait ConnectionCounters: Send + Sync {
    /// Increments every key by one and refreshes its expiry, as a single
    /// pipelined operation.
    async fn increment(&self, keys: &[String], ttl: Duration) -> crate::Result<()>;

    /// Decrements every key by one and refreshes its expiry, as a single
    /// pipelined operation.
    async fn decrement(&self, keys: &[String], ttl: Duration) -> crate::Result<()>;

    async fn get(&self, key: &str) -> crate::Result<i64>;
}

#[derive(Default)]
pub struct MemoryCounters {
    counters: Mutex<AHashMap<String, (i64, Instant)>>,
}

impl MemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, keys: &[String], ttl: Duration, value: i64) {
        let now = Instant::now();
        let mut counters = self.counters.lock();
        counters.retain(|_, (_, expires)| *expires > now);
        for key in keys {
            let counter = counters.entry(key.to_string()).or_insert((0, now + ttl));
            counter.0 += value;
            counter.1 = now + ttl;
        }
    }
}

#[async_trait]
impl ConnectionCounters for MemoryCounters {
    async fn increment(&self, keys: &[String], ttl: Duration) -> crate::Result<()> {
        self.add(keys, ttl, 1);
        Ok(())
    }

    async fn decrement(&self, keys: &[String], ttl: Duration) -> crate::Result<()> {
        self.add(keys, ttl, -1);
        Ok(())
    }

    async fn get(&self, key: &str) -> crate::Result<i64> {
        Ok(self
            .counters
            .lock()
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(value, _)| *value)
            .unwrap_or(0))
    }
}
