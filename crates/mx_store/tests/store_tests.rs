mod common;

use std::{collections::HashMap, sync::Arc};

use chrono::Duration;

use common::{device, device_map, open_store, t, ACCOUNT, PICKLE_KEY};
use mx_crypto::{Account, InboundGroupSession, OutboundGroupSession, Session};
use mx_proto::{
    CrossSigner, CrossSigningUsage, DeviceId, EventId, IdentityKey, RoomId, SessionId, SigningKey, SyncToken,
    TrustState, UserId,
};
use mx_store::{Scheme, SqliteCryptoStore, StoreError};

// ── Replay ledger ────────────────────────────────────────────────────────────

#[tokio::test]
async fn message_index_pins_first_observation() {
    let (store, _dir) = open_store().await;
    let key = IdentityKey::from("abc");
    let session = SessionId::from("s1");
    let e1 = EventId::from("$e1");
    let e2 = EventId::from("$e2");

    assert!(store.validate_message_index(&key, &session, &e1, 0, 100).await.unwrap());
    assert!(store.validate_message_index(&key, &session, &e1, 0, 100).await.unwrap());
    assert!(!store.validate_message_index(&key, &session, &e2, 0, 100).await.unwrap());
    assert!(!store.validate_message_index(&key, &session, &e1, 0, 101).await.unwrap());

    // The rejected pairs did not overwrite the pin.
    assert!(store.validate_message_index(&key, &session, &e1, 0, 100).await.unwrap());
}

#[tokio::test]
async fn message_index_is_keyed_by_index_and_session() {
    let (store, _dir) = open_store().await;
    let key = IdentityKey::from("abc");
    let e1 = EventId::from("$e1");
    let e2 = EventId::from("$e2");

    assert!(store.validate_message_index(&key, &"s1".into(), &e1, 0, 100).await.unwrap());
    assert!(store.validate_message_index(&key, &"s1".into(), &e2, 1, 200).await.unwrap());
    assert!(store.validate_message_index(&key, &"s2".into(), &e2, 0, 200).await.unwrap());
    assert!(store.validate_message_index(&"other".into(), &"s1".into(), &e2, 0, 200).await.unwrap());
}

// ── Devices ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn untracked_and_empty_device_lists_are_distinct() {
    let (store, _dir) = open_store().await;
    let alice = UserId::from("@alice:example.org");

    assert_eq!(store.get_devices(&alice).await.unwrap(), None);

    store.put_devices(&alice, &HashMap::new()).await.unwrap();
    let devices = store.get_devices(&alice).await.unwrap().expect("tracked");
    assert!(devices.is_empty());
}

#[tokio::test]
async fn put_devices_replaces_the_whole_list() {
    let (store, _dir) = open_store().await;
    let user = "@alice:example.org";
    let alice = UserId::from(user);

    let first = device_map([
        device(user, "AAAA", TrustState::Verified),
        device(user, "BBBB", TrustState::Unset),
    ]);
    store.put_devices(&alice, &first).await.unwrap();
    assert_eq!(store.get_devices(&alice).await.unwrap(), Some(first));

    let second = device_map([device(user, "CCCC", TrustState::Blacklisted)]);
    store.put_devices(&alice, &second).await.unwrap();
    assert_eq!(store.get_devices(&alice).await.unwrap(), Some(second.clone()));
    assert_eq!(store.get_device(&alice, &DeviceId::from("AAAA")).await.unwrap(), None);

    let cccc = store.get_device(&alice, &DeviceId::from("CCCC")).await.unwrap().expect("device");
    assert_eq!(cccc.trust, TrustState::Blacklisted);
    assert_eq!(Some(&cccc), second.get(&DeviceId::from("CCCC")));
}

#[tokio::test]
async fn device_lookup_by_identity_key() {
    let (store, _dir) = open_store().await;
    let user = "@bob:example.org";
    let bob = UserId::from(user);
    store
        .put_devices(&bob, &device_map([device(user, "PHONE", TrustState::CrossSignedTofu)]))
        .await
        .unwrap();

    let found = store.find_device_by_key(&bob, &"curve-PHONE".into()).await.unwrap().expect("device");
    assert_eq!(found.device_id, DeviceId::from("PHONE"));
    assert_eq!(found.trust, TrustState::CrossSignedTofu);
    assert_eq!(found.name, "PHONE's phone");

    assert_eq!(store.find_device_by_key(&bob, &"curve-LAPTOP".into()).await.unwrap(), None);
    assert_eq!(
        store.find_device_by_key(&"@carol:example.org".into(), &"curve-PHONE".into()).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn filter_tracked_users_returns_tracked_subset() {
    let (store, _dir) = open_store().await;
    let alice = UserId::from("@alice:example.org");
    let bob = UserId::from("@bob:example.org");
    let carol = UserId::from("@carol:example.org");
    store.put_devices(&alice, &HashMap::new()).await.unwrap();
    store.put_devices(&carol, &HashMap::new()).await.unwrap();

    let mut tracked = store.filter_tracked_users(&[alice.clone(), bob, carol.clone()]).await.unwrap();
    tracked.sort();
    assert_eq!(tracked, vec![alice, carol]);
    assert!(store.filter_tracked_users(&[]).await.unwrap().is_empty());
}

// ── Megolm ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn inbound_group_session_round_trip() {
    let (store, _dir) = open_store().await;
    let room = RoomId::from("!room:example.org");
    let sender = IdentityKey::from("sender-curve");
    let session_id = SessionId::from("megolm-1");

    let mut session = InboundGroupSession::new(
        session_id.clone(),
        room.clone(),
        sender.clone(),
        SigningKey::from("sender-ed"),
        vec![7; 64],
    );
    session.forwarding_chain = vec!["fwd-1".into(), "fwd-2".into()];

    assert!(!store.has_group_session(&room, &sender, &session_id).await.unwrap());
    store.put_group_session(&room, &sender, &session_id, &session).await.unwrap();
    assert!(store.has_group_session(&room, &sender, &session_id).await.unwrap());

    let loaded = store.get_group_session(&room, &sender, &session_id).await.unwrap().expect("session");
    assert_eq!(loaded, session);
    assert_eq!(store.get_group_session(&"!other:example.org".into(), &sender, &session_id).await.unwrap(), None);

    let duplicate = store.put_group_session(&room, &sender, &session_id, &session).await;
    assert!(matches!(duplicate, Err(StoreError::Database(_))));
}

#[tokio::test]
async fn outbound_group_session_round_trip() {
    let (store, _dir) = open_store().await;
    let room = RoomId::from("!room:example.org");

    let mut session = OutboundGroupSession::new(room.clone(), "out-1".into(), vec![1, 2, 3], t(0))
        .with_rotation(50, Duration::days(3) + Duration::seconds(17));
    session.shared = true;
    session.record_use(t(10));
    session.record_use(t(20));
    store.add_outbound_group_session(&session).await.unwrap();

    let loaded = store.get_outbound_group_session(&room).await.unwrap().expect("session");
    assert_eq!(loaded, session);
    assert_eq!(loaded.message_count, 2);
    assert_eq!(loaded.max_age, Duration::days(3) + Duration::seconds(17));
    assert!(loaded.shared);

    session.record_use(t(30));
    assert!(store.update_outbound_group_session(&session).await.unwrap());
    let loaded = store.get_outbound_group_session(&room).await.unwrap().expect("session");
    assert_eq!(loaded.message_count, 3);
    assert_eq!(loaded.use_time, t(30));
}

#[tokio::test]
async fn outbound_max_age_keeps_fractional_seconds() {
    let (store, _dir) = open_store().await;
    let room = RoomId::from("!room:example.org");
    let session = OutboundGroupSession::new(room.clone(), "out-1".into(), vec![1], t(0))
        .with_rotation(5, Duration::milliseconds(1500));
    store.add_outbound_group_session(&session).await.unwrap();

    let loaded = store.get_outbound_group_session(&room).await.unwrap().expect("session");
    assert_eq!(loaded.max_age, Duration::milliseconds(1500));
}

#[tokio::test]
async fn outbound_max_age_below_a_microsecond_is_rejected() {
    let (store, _dir) = open_store().await;
    let room = RoomId::from("!room:example.org");
    let session = OutboundGroupSession::new(room.clone(), "out-1".into(), vec![1], t(0))
        .with_rotation(5, Duration::nanoseconds(1_500));

    let result = store.add_outbound_group_session(&session).await;
    assert!(matches!(result, Err(StoreError::Interval(_))));
    assert_eq!(store.get_outbound_group_session(&room).await.unwrap(), None);
}

#[tokio::test]
async fn outbound_group_session_is_replaced_per_room() {
    let (store, _dir) = open_store().await;
    let room = RoomId::from("!room:example.org");

    let old = OutboundGroupSession::new(room.clone(), "out-1".into(), vec![1], t(0));
    let new = OutboundGroupSession::new(room.clone(), "out-2".into(), vec![2], t(100));
    store.add_outbound_group_session(&old).await.unwrap();
    store.add_outbound_group_session(&new).await.unwrap();

    let loaded = store.get_outbound_group_session(&room).await.unwrap().expect("session");
    assert_eq!(loaded.session_id, SessionId::from("out-2"));

    // Updating the superseded session matches nothing.
    assert!(!store.update_outbound_group_session(&old).await.unwrap());
}

#[tokio::test]
async fn outbound_group_sessions_are_removed() {
    let (store, _dir) = open_store().await;
    let rooms: Vec<RoomId> = ["!a:x", "!b:x", "!c:x"].into_iter().map(RoomId::from).collect();
    for (n, room) in rooms.iter().enumerate() {
        let session = OutboundGroupSession::new(room.clone(), format!("out-{n}").into(), vec![0], t(0));
        store.add_outbound_group_session(&session).await.unwrap();
    }

    store.remove_outbound_group_session(&rooms[0]).await.unwrap();
    assert_eq!(store.get_outbound_group_session(&rooms[0]).await.unwrap(), None);

    assert_eq!(store.remove_outbound_group_sessions(&[]).await.unwrap(), 0);
    assert_eq!(store.remove_outbound_group_sessions(&rooms).await.unwrap(), 2);
    assert_eq!(store.get_outbound_group_session(&rooms[2]).await.unwrap(), None);
}

#[tokio::test]
async fn removing_many_rooms_spans_several_statements() {
    let (store, _dir) = open_store().await;
    let mut rooms: Vec<RoomId> = (0..1200).map(|n| RoomId::from(format!("!room{n}:x"))).collect();
    for room in [&rooms[0], &rooms[1199]] {
        let session = OutboundGroupSession::new(room.clone(), format!("out-{room}").into(), vec![0], t(0));
        store.add_outbound_group_session(&session).await.unwrap();
    }
    let kept = RoomId::from("!kept:x");
    store
        .add_outbound_group_session(&OutboundGroupSession::new(kept.clone(), "out-kept".into(), vec![0], t(0)))
        .await
        .unwrap();

    assert_eq!(store.remove_outbound_group_sessions(&rooms).await.unwrap(), 2);
    assert!(store.get_outbound_group_session(&kept).await.unwrap().is_some());

    rooms.truncate(1);
    assert_eq!(store.remove_outbound_group_sessions(&rooms).await.unwrap(), 0);
}

#[tokio::test]
async fn filtering_many_users_spans_several_statements() {
    let (store, _dir) = open_store().await;
    let users: Vec<UserId> = (0..1200).map(|n| UserId::from(format!("@user{n}:x"))).collect();
    store.put_devices(&users[3], &HashMap::new()).await.unwrap();
    store.put_devices(&users[1100], &HashMap::new()).await.unwrap();

    let mut tracked = store.filter_tracked_users(&users).await.unwrap();
    tracked.sort();
    assert_eq!(tracked, vec![users[1100].clone(), users[3].clone()]);
}

// ── Cross-signing ────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_cross_signing_key_stays_pinned() {
    let (store, _dir) = open_store().await;
    let alice = UserId::from("@alice:example.org");

    store.put_cross_signing_key(&alice, CrossSigningUsage::Master, &"K1".into()).await;
    store.put_cross_signing_key(&alice, CrossSigningUsage::Master, &"K2".into()).await;
    store.put_cross_signing_key(&alice, CrossSigningUsage::SelfSigning, &"S1".into()).await;

    let keys = store.get_cross_signing_keys(&alice).await.unwrap();
    let master = &keys[&CrossSigningUsage::Master];
    assert_eq!(master.key, SigningKey::from("K2"));
    assert_eq!(master.first, SigningKey::from("K1"));
    assert!(master.changed());
    assert!(!keys[&CrossSigningUsage::SelfSigning].changed());
    assert!(!keys.contains_key(&CrossSigningUsage::UserSigning));

    assert!(store.get_cross_signing_keys(&"@bob:example.org".into()).await.unwrap().is_empty());
}

#[tokio::test]
async fn dropping_signatures_only_affects_that_signer() {
    let (store, _dir) = open_store().await;
    let target = CrossSigner::new("@alice:example.org", "alice-master");
    let old = CrossSigner::new("@bob:example.org", "bob-old");
    let other = CrossSigner::new("@carol:example.org", "carol-key");

    store.put_signature(&target, &old, "sig-old").await;
    store.put_signature(&target, &other, "sig-carol").await;
    store.put_signature(&target, &other, "sig-carol-2").await;
    assert!(store.is_key_signed_by(&target, &old).await.unwrap());
    assert!(store.is_key_signed_by(&target, &other).await.unwrap());

    assert_eq!(store.drop_signatures_by_key(&old).await, Some(1));
    assert!(!store.is_key_signed_by(&target, &old).await.unwrap());
    assert!(store.is_key_signed_by(&target, &other).await.unwrap());

    assert_eq!(store.drop_signatures_by_key(&old).await, Some(0));
}

#[tokio::test]
async fn cross_signing_writes_are_best_effort() {
    let (store, _dir) = open_store().await;
    let alice = UserId::from("@alice:example.org");
    let target = CrossSigner::new("@alice:example.org", "alice-master");
    let signer = CrossSigner::new("@bob:example.org", "bob-key");
    store.put_signature(&target, &signer, "sig").await;

    store.pool().close().await;

    // Failures are logged and swallowed rather than returned.
    store.put_cross_signing_key(&alice, CrossSigningUsage::Master, &"K1".into()).await;
    store.put_signature(&target, &signer, "sig-2").await;
    assert_eq!(store.drop_signatures_by_key(&signer).await, None);
    assert!(matches!(store.is_key_signed_by(&target, &signer).await, Err(StoreError::Database(_))));
}

// ── Olm ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn olm_sessions_are_ordered_by_last_decryption() {
    let (store, _dir) = open_store().await;
    let key = IdentityKey::from("peer-curve");
    assert!(!store.has_session(&key).await.unwrap());
    assert!(store.get_latest_session(&key).await.unwrap().is_none());

    let mut older = Session::new("olm-old".into(), vec![1], t(0));
    older.mark_decrypted(t(10));
    let mut newer = Session::new("olm-new".into(), vec![2], t(5));
    newer.mark_decrypted(t(60));
    store.add_session(&key, older).await.unwrap();
    let newer = store.add_session(&key, newer).await.unwrap();

    assert!(store.has_session(&key).await.unwrap());
    let latest = store.get_latest_session(&key).await.unwrap().expect("session");
    assert!(Arc::ptr_eq(&latest, &newer));

    let ids: Vec<SessionId> = store
        .get_sessions(&key)
        .await
        .unwrap()
        .iter()
        .map(|s| s.lock().id().clone())
        .collect();
    assert_eq!(ids, vec![SessionId::from("olm-new"), SessionId::from("olm-old")]);
}

#[tokio::test]
async fn olm_updates_reach_a_fresh_store() {
    let (store, _dir) = open_store().await;
    let key = IdentityKey::from("peer-curve");
    let shared = store.add_session(&key, Session::new("olm-1".into(), vec![1], t(0))).await.unwrap();

    {
        let mut session = shared.lock();
        session.set_ratchet_state(vec![9, 9, 9]);
        session.mark_encrypted(t(30));
    }
    store.update_session(&key, &shared).await.unwrap();

    // A second handle on the same database starts with an empty cache.
    let fresh = SqliteCryptoStore::new(store.pool().clone(), ACCOUNT, PICKLE_KEY).unwrap();
    assert!(fresh.has_session(&key).await.unwrap());
    let loaded = fresh.get_latest_session(&key).await.unwrap().expect("session");
    {
        let loaded = loaded.lock();
        assert_eq!(loaded.ratchet_state(), [9u8, 9, 9].as_slice());
        assert_eq!(loaded.last_encrypted(), t(30));
        assert_eq!(loaded.creation_time(), t(0));
    }

    // Subsequent reads are served from the cache.
    let again = fresh.get_latest_session(&key).await.unwrap().expect("session");
    assert!(Arc::ptr_eq(&loaded, &again));
}

#[tokio::test]
async fn olm_sessions_are_scoped_to_the_account() {
    let (store, _dir) = open_store().await;
    let key = IdentityKey::from("peer-curve");
    store.add_session(&key, Session::new("olm-1".into(), vec![1], t(0))).await.unwrap();

    let other = SqliteCryptoStore::new(store.pool().clone(), "@other:example.org", PICKLE_KEY).unwrap();
    assert!(!other.has_session(&key).await.unwrap());
    assert!(other.get_sessions(&key).await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_olm_session_is_a_database_error() {
    let (store, _dir) = open_store().await;
    let key = IdentityKey::from("peer-curve");
    store.add_session(&key, Session::new("olm-1".into(), vec![1], t(0))).await.unwrap();

    let duplicate = store.add_session(&key, Session::new("olm-1".into(), vec![2], t(5))).await;
    assert!(matches!(duplicate, Err(StoreError::Database(_))));

    // The cached session is still the first one.
    let latest = store.get_latest_session(&key).await.unwrap().expect("session");
    assert_eq!(latest.lock().ratchet_state(), [1u8].as_slice());
}

#[tokio::test]
async fn wrong_pickle_key_cannot_read_olm_sessions() {
    let (store, _dir) = open_store().await;
    let key = IdentityKey::from("peer-curve");
    store.add_session(&key, Session::new("olm-1".into(), vec![1], t(0))).await.unwrap();

    let intruder = SqliteCryptoStore::new(store.pool().clone(), ACCOUNT, "not the key").unwrap();
    assert!(matches!(intruder.get_sessions(&key).await, Err(StoreError::Pickle(_))));
    assert!(matches!(intruder.get_latest_session(&key).await, Err(StoreError::Pickle(_))));
    // Existence checks never unpickle.
    assert!(intruder.has_session(&key).await.unwrap());
}

#[tokio::test]
async fn update_session_writes_through_a_divergent_cache() {
    let (store, _dir) = open_store().await;
    let key = IdentityKey::from("peer-curve");
    let cached = store.add_session(&key, Session::new("olm-1".into(), vec![1], t(0))).await.unwrap();

    // Same ID, different object and state than the cached entry.
    let detached = Arc::new(parking_lot::Mutex::new(Session::new("olm-1".into(), vec![7, 7], t(0))));
    store.update_session(&key, &detached).await.unwrap();
    assert!(detached.try_lock().is_some());
    assert_eq!(cached.lock().ratchet_state(), [1u8].as_slice());

    let fresh = SqliteCryptoStore::new(store.pool().clone(), ACCOUNT, PICKLE_KEY).unwrap();
    let loaded = fresh.get_latest_session(&key).await.unwrap().expect("session");
    assert_eq!(loaded.lock().ratchet_state(), [7u8, 7].as_slice());
}

#[tokio::test]
async fn update_session_writes_through_a_missing_cache_entry() {
    let (store, _dir) = open_store().await;
    let key = IdentityKey::from("peer-curve");
    store.add_session(&key, Session::new("olm-1".into(), vec![1], t(0))).await.unwrap();

    // A second handle has never cached the session.
    let other = SqliteCryptoStore::new(store.pool().clone(), ACCOUNT, PICKLE_KEY).unwrap();
    let mut session = Session::new("olm-1".into(), vec![3, 3, 3], t(0));
    session.mark_decrypted(t(90));
    other.update_session(&key, &Arc::new(parking_lot::Mutex::new(session))).await.unwrap();

    let fresh = SqliteCryptoStore::new(store.pool().clone(), ACCOUNT, PICKLE_KEY).unwrap();
    let loaded = fresh.get_latest_session(&key).await.unwrap().expect("session");
    let loaded = loaded.lock();
    assert_eq!(loaded.ratchet_state(), [3u8, 3, 3].as_slice());
    assert_eq!(loaded.last_decrypted(), t(90));
}

// ── Account ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn account_state_round_trip() {
    let (store, _dir) = open_store().await;
    assert_eq!(store.scheme(), Scheme::Sqlite);
    assert_eq!(store.get_account().await.unwrap(), None);
    assert_eq!(store.get_next_batch().await.unwrap(), None);

    let mut account = Account::new(vec![4; 32]);
    account.shared = true;
    store.put_account(account.clone()).await.unwrap();
    store.put_device_id(DeviceId::from("DEVICE")).await.unwrap();
    store.put_next_batch(SyncToken::from("s72594_4483")).await.unwrap();

    let fresh = SqliteCryptoStore::new(store.pool().clone(), ACCOUNT, PICKLE_KEY).unwrap();
    assert_eq!(fresh.get_account().await.unwrap(), Some(account));
    assert_eq!(fresh.get_device_id().await.unwrap(), Some(DeviceId::from("DEVICE")));
    assert_eq!(fresh.get_next_batch().await.unwrap(), Some(SyncToken::from("s72594_4483")));
}

#[tokio::test]
async fn wrong_pickle_key_cannot_read_account() {
    let (store, _dir) = open_store().await;
    store.put_account(Account::new(vec![4; 32])).await.unwrap();

    let intruder = SqliteCryptoStore::new(store.pool().clone(), ACCOUNT, "not the key").unwrap();
    assert!(matches!(intruder.get_account().await, Err(StoreError::Pickle(_))));
}

#[tokio::test]
async fn delete_wipes_account_rows_and_caches() {
    let (store, _dir) = open_store().await;
    let key = IdentityKey::from("peer-curve");
    let room = RoomId::from("!room:example.org");
    store.put_account(Account::new(vec![4; 32])).await.unwrap();
    store.put_next_batch(SyncToken::from("batch")).await.unwrap();
    store.add_session(&key, Session::new("olm-1".into(), vec![1], t(0))).await.unwrap();
    store
        .add_outbound_group_session(&OutboundGroupSession::new(room.clone(), "out-1".into(), vec![0], t(0)))
        .await
        .unwrap();

    store.delete().await.unwrap();

    assert_eq!(store.get_account().await.unwrap(), None);
    assert_eq!(store.get_next_batch().await.unwrap(), None);
    assert!(!store.has_session(&key).await.unwrap());
    assert_eq!(store.get_outbound_group_session(&room).await.unwrap(), None);
}
