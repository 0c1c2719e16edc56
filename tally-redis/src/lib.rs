//! Abstraction over the Redis instance backing the sample store, leases and consumer directory.
//!
//! Both a single Redis instance and a Redis cluster are supported through [`AsyncRedisPool`].
//! Connections obtained from the pool implement [`redis::aio::ConnectionLike`], so commands are
//! issued with the regular `redis` API:
//!
//! ```ignore
//! let mut connection = pool.get_connection().await?;
//! let value: Option<String> = redis::cmd("GET").arg("key").query_async(&mut connection).await?;
//! ```
#![warn(missing_docs)]

mod config;
mod pool;

pub use self::config::*;
pub use self::pool::*;
