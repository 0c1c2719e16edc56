use std::fmt;
use std::str::FromStr;

use url::Url;

/// Basic authentication credentials.
#[derive(Clone, Eq, PartialEq)]
pub struct BasicAuth {
    /// The user name.
    pub username: String,
    /// The password. Omitted from the header if `None`.
    pub password: Option<String>,
}

impl BasicAuth {
    /// Creates credentials with a password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Some(password.into()),
        }
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .finish()
    }
}

/// A URL of the gauges API with credentials taken from its user info.
///
/// The user info is removed from the URL, so it is never sent or logged as part of it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    url: Url,
    auth: Option<BasicAuth>,
}

impl Endpoint {
    /// Creates an endpoint from a URL, moving user info into credentials.
    pub fn new(mut url: Url) -> Self {
        let auth = match url.username() {
            "" => None,
            username => Some(BasicAuth {
                username: decode(username),
                password: url.password().map(decode),
            }),
        };

        // Only fails for URLs that cannot have credentials, which never carry user info.
        url.set_username("").ok();
        url.set_password(None).ok();

        Self { url, auth }
    }

    /// Returns the URL without credentials.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the credentials from the user info, if any.
    pub fn auth(&self) -> Option<&BasicAuth> {
        self.auth.as_ref()
    }
}

impl FromStr for Endpoint {
    type Err = url::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s.parse()?))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.url.fmt(f)
    }
}

/// Percent-decodes a user info component. Unlike form data, `+` stands for itself.
fn decode(component: &str) -> String {
    let query = format!("v={}", component.replace('+', "%2B"));
    url::form_urlencoded::parse(query.as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| component.to_owned())
}
