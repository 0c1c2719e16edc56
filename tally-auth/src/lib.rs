//! Authentication of inbound metric submissions.
//!
//! Clients submit metrics with an `Authorization` header of the form `<scheme> <base64>`. The
//! decoded payload carries the credentials of the tenant in one of three ways:
//!
//!  1. `l2met:<token>`: a reference to credentials stored in a database. The token is passed on
//!     unchanged and resolved downstream.
//!  2. A [Fernet](https://github.com/fernet/spec) token encrypting `<user>:<secret>` with one of
//!     the configured [`FernetKey`]s.
//!  3. Inline credentials, `<base64(user:secret)>:<anything>` or plain `<user>:<secret>`.
//!
//! [`AuthResolver`] tries these in order. Only a missing or malformed header is an error; any
//! payload that is neither a database reference nor a valid token is treated as inline
//! credentials.
#![warn(missing_docs)]

mod fernet;
mod resolver;

pub use self::fernet::*;
pub use self::resolver::*;
