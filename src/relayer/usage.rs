// src/relayer/usage.rs
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// Sponsored transfers per address per UTC day.
pub const DAILY_LIMIT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub count: u32,
}

/// Per-address daily counters. `try_consume` is an atomic check-and-increment.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Takes one slot for `day`. Returns the new count, or `None` when the
    /// address already used `limit` slots that day.
    async fn try_consume(
        &self,
        address: Address,
        day: NaiveDate,
        limit: u32,
    ) -> anyhow::Result<Option<u32>>;

    /// Gives back a slot taken for `day`, e.g. after a failed transfer.
    async fn refund(&self, address: Address, day: NaiveDate) -> anyhow::Result<()>;

    async fn usage(&self, address: Address, day: NaiveDate) -> anyhow::Result<u32>;
}

fn consume(
    usage: &mut HashMap<Address, DailyUsage>,
    address: Address,
    day: NaiveDate,
    limit: u32,
) -> Option<u32> {
    let entry = usage
        .entry(address)
        .or_insert(DailyUsage { date: day, count: 0 });
    if entry.date != day {
        *entry = DailyUsage { date: day, count: 0 };
    }
    if entry.count >= limit {
        return None;
    }
    entry.count += 1;
    Some(entry.count)
}

fn release(usage: &mut HashMap<Address, DailyUsage>, address: Address, day: NaiveDate) -> bool {
    match usage.get_mut(&address) {
        Some(entry) if entry.date == day && entry.count > 0 => {
            entry.count -= 1;
            true
        }
        _ => false,
    }
}

fn count(usage: &HashMap<Address, DailyUsage>, address: Address, day: NaiveDate) -> u32 {
    usage
        .get(&address)
        .filter(|entry| entry.date == day)
        .map_or(0, |entry| entry.count)
}

#[derive(Debug, Default)]
pub struct MemoryUsageStore {
    usage: Mutex<HashMap<Address, DailyUsage>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn try_consume(
        &self,
        address: Address,
        day: NaiveDate,
        limit: u32,
    ) -> anyhow::Result<Option<u32>> {
        Ok(consume(&mut *self.usage.lock().await, address, day, limit))
    }

    async fn refund(&self, address: Address, day: NaiveDate) -> anyhow::Result<()> {
        release(&mut *self.usage.lock().await, address, day);
        Ok(())
    }

    async fn usage(&self, address: Address, day: NaiveDate) -> anyhow::Result<u32> {
        Ok(count(&*self.usage.lock().await, address, day))
    }
}

/// Counters persisted as JSON after every change so limits survive restarts.
/// The in-memory map only changes once the write has succeeded.
#[derive(Debug)]
pub struct FileUsageStore {
    path: PathBuf,
    usage: Mutex<HashMap<Address, DailyUsage>>,
}

impl FileUsageStore {
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let usage = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("usage file {} is corrupt", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        debug!("Loaded usage for {} addresses from {}", usage.len(), path.display());
        Ok(Self {
            path,
            usage: Mutex::new(usage),
        })
    }

    async fn persist(&self, usage: &HashMap<Address, DailyUsage>) -> anyhow::Result<()> {
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(usage)?)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl UsageStore for FileUsageStore {
    async fn try_consume(
        &self,
        address: Address,
        day: NaiveDate,
        limit: u32,
    ) -> anyhow::Result<Option<u32>> {
        let mut usage = self.usage.lock().await;
        let mut next = usage.clone();
        let consumed = consume(&mut next, address, day, limit);
        if consumed.is_some() {
            self.persist(&next).await?;
            *usage = next;
        }
        Ok(consumed)
    }

    async fn refund(&self, address: Address, day: NaiveDate) -> anyhow::Result<()> {
        let mut usage = self.usage.lock().await;
        let mut next = usage.clone();
        if release(&mut next, address, day) {
            self.persist(&next).await?;
            *usage = next;
        }
        Ok(())
    }

    async fn usage(&self, address: Address, day: NaiveDate) -> anyhow::Result<u32> {
        Ok(count(&*self.usage.lock().await, address, day))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[tokio::test]
    async fn limit_boundary() {
        let store = MemoryUsageStore::new();
        let user = Address::repeat_byte(1);

        for expected in 1..=DAILY_LIMIT {
            assert_eq!(
                store.try_consume(user, day(1), DAILY_LIMIT).await.unwrap(),
                Some(expected)
            );
        }
        assert_eq!(store.try_consume(user, day(1), DAILY_LIMIT).await.unwrap(), None);
        assert_eq!(store.usage(user, day(1)).await.unwrap(), DAILY_LIMIT);

        // other addresses and the next day are independent
        assert_eq!(
            store
                .try_consume(Address::repeat_byte(2), day(1), DAILY_LIMIT)
                .await
                .unwrap(),
            Some(1)
        );
        assert_eq!(store.try_consume(user, day(2), DAILY_LIMIT).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn refund_frees_a_slot() {
        let store = MemoryUsageStore::new();
        let user = Address::repeat_byte(1);
        store.try_consume(user, day(1), 1).await.unwrap();
        assert_eq!(store.try_consume(user, day(1), 1).await.unwrap(), None);

        store.refund(user, day(1)).await.unwrap();
        assert_eq!(store.try_consume(user, day(1), 1).await.unwrap(), Some(1));

        // refunds for another day are ignored
        store.refund(user, day(3)).await.unwrap();
        assert_eq!(store.usage(user, day(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_never_exceed_limit() {
        let store = std::sync::Arc::new(MemoryUsageStore::new());
        let user = Address::repeat_byte(9);
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.try_consume(user, day(1), DAILY_LIMIT).await })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                granted += 1;
            }
        }
        assert_eq!(granted, DAILY_LIMIT);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let path = std::env::temp_dir().join(format!(
            "gasless-usage-{}-{}.json",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let user = Address::repeat_byte(7);

        let store = FileUsageStore::open(&path).await.unwrap();
        store.try_consume(user, day(1), DAILY_LIMIT).await.unwrap();
        store.try_consume(user, day(1), DAILY_LIMIT).await.unwrap();
        drop(store);

        let reopened = FileUsageStore::open(&path).await.unwrap();
        assert_eq!(reopened.usage(user, day(1)).await.unwrap(), 2);
        assert_eq!(
            reopened.try_consume(user, day(1), 2).await.unwrap(),
            None
        );

        tokio::fs::remove_file(&path).await.unwrap();
    }

    fn usage_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "gasless-usage-{name}-{}-{}.json",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    #[tokio::test]
    async fn failed_write_does_not_consume_a_slot() {
        let path = usage_path("write-failure");
        let tmp = path.with_extension("tmp");
        let user = Address::repeat_byte(3);
        let store = FileUsageStore::open(&path).await.unwrap();

        // a directory in place of the temp file makes every write fail
        tokio::fs::create_dir(&tmp).await.unwrap();
        for _ in 0..=DAILY_LIMIT {
            assert!(store.try_consume(user, day(1), DAILY_LIMIT).await.is_err());
        }
        assert_eq!(store.usage(user, day(1)).await.unwrap(), 0);

        tokio::fs::remove_dir(&tmp).await.unwrap();
        assert_eq!(
            store.try_consume(user, day(1), DAILY_LIMIT).await.unwrap(),
            Some(1)
        );

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn failed_write_keeps_slot_on_refund() {
        let path = usage_path("refund-failure");
        let tmp = path.with_extension("tmp");
        let user = Address::repeat_byte(4);
        let store = FileUsageStore::open(&path).await.unwrap();
        store.try_consume(user, day(1), DAILY_LIMIT).await.unwrap();

        tokio::fs::create_dir(&tmp).await.unwrap();
        assert!(store.refund(user, day(1)).await.is_err());
        assert_eq!(store.usage(user, day(1)).await.unwrap(), 1);
        tokio::fs::remove_dir(&tmp).await.unwrap();

        // memory and disk still agree
        let reopened = FileUsageStore::open(&path).await.unwrap();
        assert_eq!(reopened.usage(user, day(1)).await.unwrap(), 1);

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
