//! Redis-backed snapshot store (optional).
//!
//! A snapshot lives under a single key; `SET` replaces it atomically, so no
//! reader observes a partial write.

use std::marker::PhantomData;

use redis::Commands;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{SnapshotStore, StoreError};

#[derive(Debug)]
pub struct RedisStore<T> {
    client: redis::Client,
    key: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RedisStore<T> {
    pub fn new(redis_url: impl AsRef<str>, key: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            key: key.into(),
            _marker: PhantomData,
        })
    }

    fn connection(&self) -> Result<redis::Connection, StoreError> {
        self.client
            .get_connection()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

impl<T> SnapshotStore<T> for RedisStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>, StoreError> {
        let mut conn = self.connection()?;
        let raw: Option<String> = conn
            .get(&self.key)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        raw.map(|s| serde_json::from_str(&s).map_err(|e| StoreError::Corrupt(e.to_string())))
            .transpose()
    }

    fn save(&self, value: &T) -> Result<(), StoreError> {
        let payload = serde_json::to_string(value).map_err(|e| StoreError::Serialize(e.to_string()))?;
        let mut conn = self.connection()?;
        let _: () = conn
            .set(&self.key, payload)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}
