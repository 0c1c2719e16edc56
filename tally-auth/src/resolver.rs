use std::time::Duration;

use data_encoding::BASE64;
use http::HeaderMap;
use http::header::AUTHORIZATION;
use tally_common::time::UnixTimestamp;

use crate::fernet::{self, FernetKey};

/// User name that marks a database-backed token.
pub const DATABASE_USER: &str = "l2met";

/// Maximum age of accepted Fernet tokens.
pub const TOKEN_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Raised if the `Authorization` header of a request cannot be interpreted.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum AuthError {
    /// The request has no `Authorization` header.
    #[error("authorization header not set")]
    MissingHeader,
    /// The header is not of the form `<scheme> <credentials>`.
    #[error("malformed authorization header")]
    MalformedHeader,
    /// The credentials are not valid base64.
    #[error("malformed authorization encoding")]
    MalformedEncoding,
}

/// The credentials resolved from a request.
///
/// For most schemes, these are the credentials of the tenant at the metrics API. For
/// database-backed tokens, `user` is [`DATABASE_USER`] and `secret` is the lookup token.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Credentials {
    /// The user name.
    pub user: String,
    /// The password or token. May be empty.
    pub secret: String,
}

impl Credentials {
    /// Creates credentials from a user and secret.
    pub fn new(user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: secret.into(),
        }
    }

    /// Returns `true` if these credentials refer to a database-backed token.
    pub fn is_database_token(&self) -> bool {
        self.user == DATABASE_USER
    }

    /// Splits `user:secret` at the first two colons. The secret is empty if there is no colon.
    fn split(s: &str) -> Self {
        let mut parts = s.split(':');
        let user = parts.next().unwrap_or_default();
        let secret = parts.next().unwrap_or_default();
        Self::new(user, secret)
    }

    /// Encrypts these credentials into a token that [`AuthResolver`] accepts.
    pub fn encrypt(&self, key: &FernetKey) -> String {
        key.encrypt(format!("{}:{}", self.user, self.secret).as_bytes())
    }
}

/// Returns the value of an `Authorization` header carrying the given token.
pub fn authorization_header(token: &str) -> String {
    format!("Basic {}", BASE64.encode(token.as_bytes()))
}

/// Resolves the credentials of inbound requests.
///
/// The resolver holds the key material for Fernet tokens. It is created once at startup and
/// shared by reference.
#[derive(Clone, Debug, Default)]
pub struct AuthResolver {
    keys: Vec<FernetKey>,
}

impl AuthResolver {
    /// Creates a resolver accepting tokens signed by any of `keys`.
    pub fn new(keys: Vec<FernetKey>) -> Self {
        Self { keys }
    }

    /// Resolves the credentials from the `Authorization` header.
    pub fn resolve(&self, headers: &HeaderMap) -> Result<Credentials, AuthError> {
        self.resolve_at(headers, UnixTimestamp::now())
    }

    /// Resolves the credentials, validating token timestamps against `now`.
    pub fn resolve_at(
        &self,
        headers: &HeaderMap,
        now: UnixTimestamp,
    ) -> Result<Credentials, AuthError> {
        let header = headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AuthError::MalformedHeader)?;

        let (_scheme, encoded) = header
            .split_once(' ')
            .ok_or(AuthError::MalformedHeader)?;

        let payload = BASE64
            .decode(encoded.as_bytes())
            .map_err(|_| AuthError::MalformedEncoding)?;
        let decoded = String::from_utf8_lossy(&payload);

        let mut fields = decoded.split(':');
        let first = fields.next().unwrap_or_default();
        let second = fields.next().unwrap_or_default();

        if first == DATABASE_USER && !second.is_empty() {
            return Ok(Credentials::new(first, second));
        }

        if let Ok(plaintext) = fernet::verify_and_decrypt(&payload, TOKEN_TTL, now, &self.keys) {
            return Ok(Credentials::split(&String::from_utf8_lossy(&plaintext)));
        }

        let inline = BASE64
            .decode(first.as_bytes())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());

        Ok(Credentials::split(inline.as_deref().unwrap_or(first)))
    }
}
