use std::fmt;

use deadpool::managed::{BuildError, PoolError};
use deadpool_redis::cluster::{
    Config as ClusterConfig, Connection as ClusterConnection, Pool as ClusterPool,
};
use deadpool_redis::redis::{Cmd, Pipeline, RedisFuture, Value};
use deadpool_redis::{
    Config as SingleConfig, ConfigError, Connection as SingleConnection, Pool as SinglePool,
};
use thiserror::Error;

use crate::config::{RedisConfig, RedisConfigOptions};

pub use deadpool_redis::redis;

/// An error type that represents various failure modes when interacting with Redis.
#[derive(Debug, Error)]
pub enum RedisError {
    /// An error that occurs during communication with Redis.
    #[error("failed to communicate with redis: {0}")]
    Redis(#[from] redis::RedisError),

    /// An error that occurs when interacting with the Redis connection pool.
    #[error("failed to interact with the redis pool: {0}")]
    Pool(#[source] PoolError<redis::RedisError>),

    /// An error that occurs when creating a Redis connection pool.
    #[error("failed to create redis pool: {0}")]
    CreatePool(#[from] BuildError),

    /// An error that occurs when configuring Redis.
    #[error("failed to configure redis: {0}")]
    ConfigError(#[from] ConfigError),
}

/// A connection pool that can manage either a single Redis instance or a Redis cluster.
#[derive(Clone)]
pub enum AsyncRedisPool {
    /// Contains a connection pool to a Redis cluster.
    Cluster(ClusterPool),
    /// Contains a connection pool to a single Redis instance.
    Single(SinglePool),
}

impl AsyncRedisPool {
    /// Creates a connection pool from the given configuration.
    pub fn from_config(config: &RedisConfig) -> Result<Self, RedisError> {
        match config {
            RedisConfig::Cluster {
                cluster_nodes,
                options,
            } => Self::cluster(cluster_nodes.iter().map(String::as_str), options),
            RedisConfig::Single(server) => Self::single(server, &RedisConfigOptions::default()),
            RedisConfig::SingleWithOpts { server, options } => Self::single(server, options),
        }
    }

    /// Creates a new connection pool for a Redis cluster.
    pub fn cluster<'a>(
        servers: impl IntoIterator<Item = &'a str>,
        opts: &RedisConfigOptions,
    ) -> Result<Self, RedisError> {
        let servers = servers.into_iter().map(str::to_owned).collect::<Vec<_>>();
        let pool = ClusterConfig::from_urls(servers)
            .builder()?
            .max_size(opts.max_connections as usize)
            .build()?;

        Ok(AsyncRedisPool::Cluster(pool))
    }

    /// Creates a new connection pool for a single Redis instance.
    pub fn single(server: &str, opts: &RedisConfigOptions) -> Result<Self, RedisError> {
        let pool = SingleConfig::from_url(server)
            .builder()?
            .max_size(opts.max_connections as usize)
            .build()?;

        Ok(AsyncRedisPool::Single(pool))
    }

    /// Acquires a connection from the pool.
    ///
    /// The connection is returned to the pool when dropped.
    pub async fn get_connection(&self) -> Result<AsyncRedisConnection, RedisError> {
        let connection = match self {
            Self::Cluster(pool) => {
                AsyncRedisConnection::Cluster(pool.get().await.map_err(RedisError::Pool)?)
            }
            Self::Single(pool) => {
                AsyncRedisConnection::Single(pool.get().await.map_err(RedisError::Pool)?)
            }
        };

        Ok(connection)
    }
}

impl fmt::Debug for AsyncRedisPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncRedisPool::Cluster(_) => write!(f, "AsyncRedisPool::Cluster"),
            AsyncRedisPool::Single(_) => write!(f, "AsyncRedisPool::Single"),
        }
    }
}

/// A pooled connection to either a single Redis instance or a Redis cluster.
pub enum AsyncRedisConnection {
    /// A connection to a Redis cluster.
    Cluster(ClusterConnection),
    /// A connection to a single Redis instance.
    Single(SingleConnection),
}

impl fmt::Debug for AsyncRedisConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cluster(_) => "Cluster",
            Self::Single(_) => "Single",
        };
        f.debug_tuple(name).finish()
    }
}

impl redis::aio::ConnectionLike for AsyncRedisConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            Self::Cluster(conn) => conn.req_packed_command(cmd),
            Self::Single(conn) => conn.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            Self::Cluster(conn) => conn.req_packed_commands(cmd, offset, count),
            Self::Single(conn) => conn.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            Self::Cluster(conn) => conn.get_db(),
            Self::Single(conn) => conn.get_db(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_pool_from_config() {
        let config = RedisConfig::Single("redis://127.0.0.1:6379".to_owned());
        let pool = AsyncRedisPool::from_config(&config).unwrap();

        assert!(matches!(pool, AsyncRedisPool::Single(_)));
    }

    #[test]
    fn test_invalid_url() {
        let config = RedisConfig::Single("not a url".to_owned());
        assert!(AsyncRedisPool::from_config(&config).is_err());
    }
}
