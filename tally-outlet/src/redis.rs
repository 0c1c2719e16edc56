use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tally_auth::Credentials;
use tally_redis::{AsyncRedisPool, RedisError, redis};

use crate::{ConsumerDirectory, DirectoryError, LeaseService, Record, SampleStore, StoreError};

/// Number of keys requested per `SCAN` iteration.
const SCAN_COUNT: usize = 1000;
/// Number of `HGETALL` commands sent in one pipeline.
const PIPELINE_SIZE: usize = 100;

/// Sample store backed by Redis hashes.
///
/// With a Redis cluster, `SCAN` only covers the node serving the connection.
#[derive(Clone, Debug)]
pub struct RedisSampleStore {
    pool: AsyncRedisPool,
}

impl RedisSampleStore {
    /// Creates a store using connections from `pool`.
    pub fn new(pool: AsyncRedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SampleStore for RedisSampleStore {
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut connection = self.pool.get_connection().await?;
        let mut keys = Vec::new();
        let mut cursor = 0u64;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut connection)
                .await
                .map_err(RedisError::Redis)?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Option<Record>, StoreError> {
        let mut connection = self.pool.get_connection().await?;
        let record: Record = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut connection)
            .await
            .map_err(RedisError::Redis)?;

        Ok(Some(record).filter(|record| !record.is_empty()))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Record>>, StoreError> {
        let mut connection = self.pool.get_connection().await?;
        let mut records = Vec::with_capacity(keys.len());

        for chunk in keys.chunks(PIPELINE_SIZE) {
            let mut pipeline = redis::pipe();
            for key in chunk {
                pipeline.cmd("HGETALL").arg(key);
            }

            let batch: Vec<Record> = pipeline
                .query_async(&mut connection)
                .await
                .map_err(RedisError::Redis)?;

            records.extend(
                batch
                    .into_iter()
                    .map(|record| Some(record).filter(|record| !record.is_empty())),
            );
        }

        Ok(records)
    }
}

/// Leases implemented with `SET NX PX`.
///
/// Leases are not released explicitly and expire after their TTL.
#[derive(Clone, Debug)]
pub struct RedisLeaseService {
    pool: AsyncRedisPool,
    owner: String,
}

impl RedisLeaseService {
    /// Creates a lease service identifying this process as the owner of its leases.
    pub fn new(pool: AsyncRedisPool) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|host| host.into_string().ok())
            .unwrap_or_default();

        Self {
            pool,
            owner: format!("{host}.{}", std::process::id()),
        }
    }
}

#[async_trait]
impl LeaseService for RedisLeaseService {
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut connection = self.pool.get_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(name)
            .arg(&self.owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut connection)
            .await
            .map_err(RedisError::Redis)?;

        Ok(reply.is_some())
    }
}

/// Consumer directory reading hashes named `<app_name>.consumer.<id>`.
///
/// The hash holds the fields `user` and `secret`. The older names `email` and `token` are
/// accepted as well.
#[derive(Clone, Debug)]
pub struct RedisDirectory {
    pool: AsyncRedisPool,
    prefix: String,
}

impl RedisDirectory {
    /// Creates a directory for the given application namespace.
    pub fn new(pool: AsyncRedisPool, app_name: &str) -> Self {
        Self {
            pool,
            prefix: format!("{app_name}.consumer."),
        }
    }
}

#[async_trait]
impl ConsumerDirectory for RedisDirectory {
    async fn lookup(&self, consumer: &str) -> Result<Credentials, DirectoryError> {
        let mut connection = self.pool.get_connection().await?;
        let record: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(format!("{}{consumer}", self.prefix))
            .query_async(&mut connection)
            .await
            .map_err(RedisError::Redis)?;

        credentials_from_record(&record)
            .ok_or_else(|| DirectoryError::NotFound(consumer.to_owned()))
    }
}

fn credentials_from_record(record: &HashMap<String, String>) -> Option<Credentials> {
    let field = |names: [&str; 2]| {
        names
            .into_iter()
            .find_map(|name| record.get(name).filter(|value| !value.is_empty()))
    };

    let user = field(["user", "email"])?;
    let secret = field(["secret", "token"]).map(String::as_str).unwrap_or_default();
    Some(Credentials::new(user.as_str(), secret))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[(&str, &str)]) -> HashMap<String, String> {
        fields
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_credentials_from_record() {
        assert_eq!(
            credentials_from_record(&record(&[("user", "ops"), ("secret", "tok3n")])),
            Some(Credentials::new("ops", "tok3n"))
        );
        assert_eq!(
            credentials_from_record(&record(&[("email", "ops@example.com"), ("token", "t")])),
            Some(Credentials::new("ops@example.com", "t"))
        );
        assert_eq!(
            credentials_from_record(&record(&[("user", "ops")])),
            Some(Credentials::new("ops", ""))
        );
        assert_eq!(credentials_from_record(&record(&[("token", "t")])), None);
        assert_eq!(credentials_from_record(&HashMap::new()), None);
    }

    // The tests below need a Redis server at `TALLY_REDIS_URL`, or `redis://127.0.0.1:6379`.
    // Run them with `cargo test -- --ignored`.

    fn build_pool() -> AsyncRedisPool {
        let url = std::env::var("TALLY_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_owned());
        AsyncRedisPool::single(&url, &tally_redis::RedisConfigOptions::default()).unwrap()
    }

    /// Returns a key namespace that no other test run shares.
    fn namespace(test: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("tally-test.{}.{nanos}.{test}", std::process::id())
    }

    async fn write_samples(pool: &AsyncRedisPool, keys: &[String]) {
        let mut connection = pool.get_connection().await.unwrap();
        for chunk in keys.chunks(PIPELINE_SIZE) {
            let mut pipeline = redis::pipe();
            for key in chunk {
                pipeline
                    .cmd("HSET")
                    .arg(key)
                    .arg("consumer")
                    .arg("app1")
                    .arg("value")
                    .arg(key.len())
                    .ignore();
            }
            let () = pipeline.query_async(&mut connection).await.unwrap();
        }
    }

    async fn delete(pool: &AsyncRedisPool, keys: &[String]) {
        let mut connection = pool.get_connection().await.unwrap();
        for chunk in keys.chunks(PIPELINE_SIZE) {
            let _: usize = redis::cmd("DEL")
                .arg(chunk)
                .query_async(&mut connection)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_scan_spans_cursor_pages() {
        let pool = build_pool();
        let prefix = namespace("scan");
        let mut keys: Vec<_> = (0..2500).map(|i| format!("{prefix}:{i}")).collect();
        write_samples(&pool, &keys).await;

        let store = RedisSampleStore::new(pool.clone());
        let scanned = store.scan(&format!("{prefix}:*")).await.unwrap();
        delete(&pool, &keys).await;

        keys.sort_unstable();
        assert_eq!(scanned, keys);
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_get_many_keeps_order() {
        let pool = build_pool();
        let prefix = namespace("get_many");
        let written: Vec<_> = (0..250).map(|i| format!("{prefix}:{i}")).collect();
        write_samples(&pool, &written).await;

        // A missing key in the middle of the second pipeline chunk.
        let mut requested = written.clone();
        requested.insert(150, format!("{prefix}:missing"));

        let store = RedisSampleStore::new(pool.clone());
        let records = store.get_many(&requested).await.unwrap();
        let single = store.get(&written[0]).await.unwrap();
        let missing = store.get(&requested[150]).await.unwrap();
        delete(&pool, &written).await;

        assert_eq!(records.len(), requested.len());
        for (key, record) in requested.iter().zip(&records) {
            match record {
                Some(record) => assert_eq!(record["value"], key.len().to_string(), "{key}"),
                None => assert_eq!(key, &requested[150]),
            }
        }
        assert!(records[150].is_none());
        assert_eq!(single.as_ref(), records[0].as_ref());
        assert_eq!(missing, None);
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_lease_is_exclusive() {
        let pool = build_pool();
        let name = namespace("lease");
        let leases = RedisLeaseService::new(pool.clone());
        let other = RedisLeaseService::new(pool.clone());

        let ttl = Duration::from_secs(60);
        assert!(leases.acquire(&name, ttl).await.unwrap());
        assert!(!leases.acquire(&name, ttl).await.unwrap());
        assert!(!other.acquire(&name, ttl).await.unwrap());

        let mut connection = pool.get_connection().await.unwrap();
        let owner: String = redis::cmd("GET")
            .arg(&name)
            .query_async(&mut connection)
            .await
            .unwrap();
        let remaining: i64 = redis::cmd("PTTL")
            .arg(&name)
            .query_async(&mut connection)
            .await
            .unwrap();
        delete(&pool, std::slice::from_ref(&name)).await;

        assert_eq!(owner, leases.owner);
        assert!(remaining > 0 && remaining <= 60_000, "{remaining}");
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_directory_lookup() {
        let pool = build_pool();
        let app_name = namespace("directory");
        let key = format!("{app_name}.consumer.app1");

        let mut connection = pool.get_connection().await.unwrap();
        let _: usize = redis::cmd("HSET")
            .arg(&key)
            .arg("user")
            .arg("ops")
            .arg("secret")
            .arg("tok3n")
            .query_async(&mut connection)
            .await
            .unwrap();

        let directory = RedisDirectory::new(pool.clone(), &app_name);
        let found = directory.lookup("app1").await;
        let missing = directory.lookup("app2").await;
        delete(&pool, &[key]).await;

        assert_eq!(found.unwrap(), Credentials::new("ops", "tok3n"));
        assert!(matches!(missing, Err(DirectoryError::NotFound(consumer)) if consumer == "app2"));
    }
}
