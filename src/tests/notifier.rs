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

use store::{
    config::imap::SyncConfig, JournalCommand, JournalEntry, LockProvider, MailboxStore, Message,
};
use tokio::time::{self, Instant};

use crate::{
    error::Error,
    session::{Account, Session},
    state::{broadcast::Broadcast, ChangeEvent, LOCK_NAMESPACE},
    tests::utils::{
        init_server, init_server_with_broadcast, init_session, jane, test_config,
        RecordingStream, TestStore,
    },
};

fn update_entry(store: &TestStore, mailbox: u64, uid: u32) -> JournalEntry {
    let message = store.inner.get_message_by_uid(mailbox, uid).unwrap();
    JournalEntry::fetch(mailbox, message.id, uid, vec!["\\Seen".to_string()])
}

#[tokio::test]
async fn add_entries_mints_modseq() {
    let test = init_server(test_config());
    let store = TestStore::new();
    let mailbox = store.inner.create_mailbox("INBOX");
    store.inner.set_modify_index(mailbox.id, 5);
    let mut message = Message::new(mailbox.id, "hello");
    message.modseq = 3;
    let message = store.inner.insert_message(message).unwrap();
    let session = init_session(1, jane(), store.clone(), RecordingStream::new());

    assert_eq!(
        test.server
            .notifier
            .add_entries(
                &session,
                mailbox.id,
                vec![JournalEntry::fetch(mailbox.id, message.id, message.uid, vec![])],
            )
            .await,
        Ok(1)
    );

    assert_eq!(store.inner.get_mailbox(mailbox.id).unwrap().modify_index, 6);
    assert_eq!(store.inner.get_message(message.id).unwrap().modseq, 6);
    let journal = store.inner.journal();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].modseq, Some(6));
    assert!(journal[0].created.is_some());
}

#[tokio::test]
async fn add_entries_tolerates_failed_modseq_raise() {
    let test = init_server(test_config());
    let store = TestStore::new();
    let mailbox = store.populate(2, 0);
    store.inner.set_modify_index(mailbox.id, 7);
    let session = init_session(1, jane(), store.clone(), RecordingStream::new());

    // Expunged before its change is journaled.
    let entries = vec![
        update_entry(&store, mailbox.id, 1),
        update_entry(&store, mailbox.id, 2),
    ];
    let expunged = entries[0].message.unwrap();
    assert!(store.inner.delete_message(expunged).is_some());

    assert_eq!(
        test.server
            .notifier
            .add_entries(&session, mailbox.id, entries)
            .await,
        Ok(2)
    );

    assert_eq!(store.inner.get_mailbox(mailbox.id).unwrap().modify_index, 8);
    assert_eq!(
        store.inner.get_message_by_uid(mailbox.id, 2).unwrap().modseq,
        8
    );
    let journal = store.inner.journal();
    assert_eq!(
        journal
            .iter()
            .map(|entry| (entry.message, entry.modseq))
            .collect::<Vec<_>>(),
        vec![
            (Some(expunged), Some(8)),
            (store.inner.get_message_by_uid(mailbox.id, 2).map(|m| m.id), Some(8))
        ]
    );
}

#[tokio::test]
async fn add_entries_without_updates() {
    let test = init_server(test_config());
    let store = TestStore::new();
    let mailbox = store.populate(3, 0);
    store.inner.set_modify_index(mailbox.id, 9);
    let session = init_session(1, jane(), store.clone(), RecordingStream::new());
    let notifier = &test.server.notifier;

    // Empty input is a no-op.
    assert_eq!(notifier.add_entries(&session, mailbox.id, vec![]).await, Ok(0));

    // Entries with their own modseq or without a message mint nothing.
    assert_eq!(
        notifier
            .add_entries(
                &session,
                mailbox.id,
                vec![
                    update_entry(&store, mailbox.id, 1).with_modseq(4),
                    JournalEntry::new(mailbox.id, JournalCommand::Exists),
                ],
            )
            .await,
        Ok(2)
    );
    assert_eq!(store.inner.get_mailbox(mailbox.id).unwrap().modify_index, 9);
    let journal = store.inner.journal();
    assert_eq!(journal[0].modseq, Some(4));
    assert_eq!(journal[1].modseq, Some(9));
    assert_eq!(journal[0].created, journal[1].created);
    assert_eq!(
        store.inner.get_message_by_uid(mailbox.id, 1).unwrap().modseq,
        0
    );
}

#[tokio::test]
async fn add_entries_contract() {
    let test = init_server(test_config());
    let store = TestStore::new();
    let mailbox = store.populate(1, 0);
    let notifier = &test.server.notifier;

    let anonymous = Session::new(1, RecordingStream::new());
    assert!(matches!(
        notifier
            .add_entries(&anonymous, mailbox.id, vec![update_entry(&store, mailbox.id, 1)])
            .await,
        Err(Error::ContractViolation(_))
    ));

    let session = init_session(2, jane(), store.clone(), RecordingStream::new());
    assert_eq!(
        notifier
            .add_entries(&session, 999, vec![update_entry(&store, mailbox.id, 1)])
            .await,
        Err(Error::MailboxNotFound(999))
    );

    // Released store handle
    assert!(notifier.release_connection(&session).await);
    assert!(matches!(
        notifier
            .add_entries(&session, mailbox.id, vec![update_entry(&store, mailbox.id, 1)])
            .await,
        Err(Error::ContractViolation(_))
    ));
    assert!(store.inner.journal().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_add_entries_mint_unique_modseqs() {
    let test = init_server(SyncConfig {
        lock_timeout: Duration::from_secs(1),
        lock_retries: 5,
        ..test_config()
    });
    let store = TestStore::new();
    let mailbox = store.populate(20, 0);
    store.yield_on_increment();

    // Unserialized increments on this store collide.
    assert_eq!(
        tokio::join!(
            store.increment_modify_index(mailbox.id),
            store.increment_modify_index(mailbox.id)
        ),
        (Ok(Some(1)), Ok(Some(1)))
    );
    store.inner.set_modify_index(mailbox.id, 100);
    let session = Arc::new(init_session(1, jane(), store.clone(), RecordingStream::new()));
    let notifier = test.server.notifier.clone();

    let mut handles = Vec::new();
    for uid in 1..=20 {
        let entry = update_entry(&store, mailbox.id, uid);
        let session = session.clone();
        let notifier = notifier.clone();
        let mailbox_id = mailbox.id;
        handles.push(tokio::spawn(async move {
            notifier.add_entries(&session, mailbox_id, vec![entry]).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), Ok(1));
    }

    assert_eq!(
        store.inner.get_mailbox(mailbox.id).unwrap().modify_index,
        120
    );
    let mut modseqs = store
        .inner
        .journal()
        .iter()
        .map(|entry| entry.modseq.unwrap())
        .collect::<Vec<_>>();
    modseqs.sort_unstable();
    assert_eq!(modseqs, (101..=120).collect::<Vec<_>>());
}

#[tokio::test]
async fn lock_timeout_is_reported() {
    let test = init_server(SyncConfig {
        lock_timeout: Duration::from_millis(10),
        lock_retries: 2,
        ..test_config()
    });
    let store = TestStore::new();
    let mailbox = store.populate(1, 0);
    let session = init_session(1, jane(), store.clone(), RecordingStream::new());

    let _guard = test
        .lock
        .acquire(LOCK_NAMESPACE, &mailbox.id.to_string(), Duration::from_millis(10))
        .await
        .unwrap();
    let err = test
        .server
        .notifier
        .add_entries(&session, mailbox.id, vec![update_entry(&store, mailbox.id, 1)])
        .await
        .unwrap_err();

    assert_eq!(err, Error::LockTimeout(mailbox.id));
    assert!(err.is_retryable());
    assert_eq!(store.inner.get_mailbox(mailbox.id).unwrap().modify_index, 0);
    assert!(store.inner.journal().is_empty());
}

#[tokio::test]
async fn get_updates_since_modseq() {
    let test = init_server(test_config());
    let store = TestStore::new();
    let mailbox = store.populate(3, 0);
    let notifier = &test.server.notifier;
    let session = init_session(1, jane(), store.clone(), RecordingStream::new());
    let other_session = init_session(2, jane(), store.clone(), RecordingStream::new());

    for (uid, session_id) in [(1, 1), (2, 2), (3, 1)] {
        notifier
            .add_entries(
                &session,
                mailbox.id,
                vec![update_entry(&store, mailbox.id, uid).with_ignore(session_id)],
            )
            .await
            .unwrap();
    }

    let updates = notifier
        .get_updates(&session, mailbox.id, 1)
        .await
        .unwrap();
    assert_eq!(
        updates.iter().map(|entry| entry.uid).collect::<Vec<_>>(),
        vec![Some(2)]
    );
    let updates = notifier
        .get_updates(&other_session, mailbox.id, 1)
        .await
        .unwrap();
    assert_eq!(
        updates.iter().map(|entry| entry.modseq).collect::<Vec<_>>(),
        vec![Some(3)]
    );
}

#[tokio::test]
async fn payload_events_reach_every_listener() {
    let process_a = init_server(test_config());
    let process_b = init_server_with_broadcast(test_config(), process_a.broadcast.clone());
    let account_key = jane().key();

    let (_, mut rx_a) = process_a.server.notifier.subscribe(&account_key);
    let (_, mut rx_b1) = process_b.server.notifier.subscribe(&account_key);
    let (id_b2, mut rx_b2) = process_b.server.notifier.subscribe(&account_key);
    let (_, mut rx_other) = process_b
        .server
        .notifier
        .subscribe(&Account::new("john", "example.org").key());
    assert_eq!(process_b.server.notifier.listener_count(&account_key), 2);

    let payload = serde_json::json!({"command": "EXISTS", "uid": 12});
    process_a
        .server
        .notifier
        .fire(&account_key, payload.clone().into());

    for rx in [&mut rx_a, &mut rx_b1, &mut rx_b2] {
        let event = time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ChangeEvent {
                account_key: account_key.clone(),
                payload: payload.clone().into(),
            }
        );
    }

    // Removed listeners stop receiving events.
    assert!(process_b.server.notifier.remove_listener(id_b2));
    assert!(!process_b.server.notifier.remove_listener(id_b2));
    assert_eq!(process_b.server.notifier.listener_count(&account_key), 1);
    process_a
        .server
        .notifier
        .fire(&account_key, serde_json::json!({"uid": 13}).into());
    assert!(time::timeout(Duration::from_secs(1), rx_b1.recv())
        .await
        .unwrap()
        .is_some());

    assert!(rx_b2.recv().await.is_none());
    assert!(rx_other.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn pulse_burst_collapses() {
    let process_a = init_server(test_config());
    let process_b = init_server_with_broadcast(test_config(), process_a.broadcast.clone());
    let account_key = jane().key();
    let (_, mut rx) = process_b.server.notifier.subscribe(&account_key);

    let start = Instant::now();
    for _ in 0..5 {
        process_a.server.notifier.fire(&account_key, None);
        time::sleep(Duration::from_millis(10)).await;
    }

    let event = time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let elapsed = start.elapsed();
    assert_eq!(event, ChangeEvent::pulse(account_key.clone()));
    assert!(elapsed >= Duration::from_millis(140), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(200), "{:?}", elapsed);

    assert!(time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn continuous_pulses_are_flushed() {
    let process_a = init_server(test_config());
    let process_b = init_server_with_broadcast(test_config(), process_a.broadcast.clone());
    let account_key = jane().key();
    let (_, mut rx) = process_b.server.notifier.subscribe(&account_key);

    let notifier = process_a.server.notifier.clone();
    let account_key_ = account_key.clone();
    let start = Instant::now();
    tokio::spawn(async move {
        for _ in 0..=24 {
            notifier.fire(&account_key_, None);
            time::sleep(Duration::from_millis(50)).await;
        }
    });

    let mut received = Vec::new();
    while let Ok(Some(event)) = time::timeout(Duration::from_secs(2), rx.recv()).await {
        assert!(event.is_pulse());
        received.push(start.elapsed());
    }

    assert!(!received.is_empty());
    assert!(
        received[0] <= Duration::from_millis(1000),
        "{:?}",
        received
    );
    assert!(received.len() < 5, "{:?}", received);
}

#[tokio::test]
async fn queued_pulses_are_merged() {
    let test = init_server(test_config());
    let account_key = jane().key();
    let mut raw_rx = test.broadcast.subscribe();

    // No await between the calls, the publisher has not drained the queue.
    test.server.notifier.fire(&account_key, None);
    test.server.notifier.fire(&account_key, None);
    test.server.notifier.fire(&account_key, None);
    test.server
        .notifier
        .fire(&account_key, serde_json::json!({"uid": 1}).into());

    let mut messages = Vec::new();
    while let Ok(Some((channel, message))) =
        time::timeout(Duration::from_millis(200), raw_rx.recv()).await
    {
        assert_eq!(channel, test.server.config.notify_channel);
        messages.push(String::from_utf8(message).unwrap());
    }
    assert_eq!(
        messages,
        vec![
            r#"{"accountKey":"jane@example.org"}"#.to_string(),
            r#"{"accountKey":"jane@example.org","payload":{"uid":1}}"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn malformed_notifications_are_ignored() {
    let test = init_server(test_config());
    let account_key = jane().key();
    let (_, mut rx) = test.server.notifier.subscribe(&account_key);
    let channel = test.server.config.notify_channel.clone();

    for (channel, message) in [
        (channel.as_str(), &b"not json"[..]),
        (channel.as_str(), &br#"{"payload":{"uid":1}}"#[..]),
        ("other:channel", &br#"{"accountKey":"jane@example.org","payload":1}"#[..]),
        (
            channel.as_str(),
            &br#"{"accountKey":"jane@example.org","payload":2}"#[..],
        ),
    ] {
        test.broadcast
            .publish(channel, message.to_vec())
            .await
            .unwrap();
    }

    let event = time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.payload, Some(serde_json::json!(2)));
    assert!(time::timeout(Duration::from_millis(200), rx.recv())
        .await
        .is_err());
}
