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

use core::hash::Hash;
use std::{hash::Hasher, sync::Arc, time::Duration};

use ahash::AHasher;
use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{LockGuard, LockProvider};

/// Fixed set of async mutexes addressed by key hash. Distinct keys may
/// share a slot, which only costs extra contention.
pub struct MutexMap {
    map: Box<[Arc<Mutex<()>>]>,
    mask: u64,
    hasher: AHasher,
}

impl MutexMap {
    pub fn with_capacity(size: usize) -> MutexMap {
        let size = size.next_power_of_two();
        MutexMap {
            map: (0..size)
                .map(|_| Arc::new(Mutex::new(())))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            mask: (size - 1) as u64,
            hasher: AHasher::default(),
        }
    }

    fn slot<U>(&self, key: U) -> Arc<Mutex<()>>
    where
        U: Hash,
    {
        let mut hasher = self.hasher.clone();
        key.hash(&mut hasher);
        self.map[(hasher.finish() & self.mask) as usize].clone()
    }

    pub async fn try_lock_hash<U>(&self, key: U, timeout: Duration) -> Option<OwnedMutexGuard<()>>
    where
        U: Hash,
    {
        tokio::time::timeout(timeout, self.slot(key).lock_owned())
            .await
            .ok()
    }
}

impl Default for MutexMap {
    fn default() -> Self {
        MutexMap::with_capacity(1024)
    }
}

#[async_trait]
impl LockProvider for MutexMap {
    async fn acquire(&self, namespace: &str, key: &str, timeout: Duration) -> Option<LockGuard> {
        self.try_lock_hash((namespace, key), timeout)
            .await
            .map(LockGuard::new)
    }
}
