#![allow(dead_code)]

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use mx_proto::{DeviceId, DeviceIdentity, TrustState, UserId};
use mx_store::{SqliteCryptoStore, StoreConfig};

pub const ACCOUNT: &str = "@bot:example.org";
pub const PICKLE_KEY: &str = "correct horse battery staple";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mx_store=debug")))
        .with_test_writer()
        .try_init();
}

/// A fresh SQLite store in its own temp directory. Keep the `TempDir` alive
/// for as long as the store is used.
pub async fn open_store() -> (SqliteCryptoStore, TempDir) {
    init_tracing();
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("crypto.db").display());
    let store = SqliteCryptoStore::open(&StoreConfig::new(url, ACCOUNT, PICKLE_KEY))
        .await
        .expect("open store");
    (store, dir)
}

pub fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

pub fn device(user: &str, id: &str, trust: TrustState) -> DeviceIdentity {
    DeviceIdentity {
        user_id: UserId::from(user),
        device_id: DeviceId::from(id),
        identity_key: format!("curve-{id}").into(),
        signing_key: format!("ed-{id}").into(),
        trust,
        deleted: false,
        name: format!("{id}'s phone"),
    }
}

pub fn device_map(devices: impl IntoIterator<Item = DeviceIdentity>) -> HashMap<DeviceId, DeviceIdentity> {
    devices.into_iter().map(|d| (d.device_id.clone(), d)).collect()
}
