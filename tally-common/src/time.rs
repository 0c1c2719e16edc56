//! Utilities to deal with unix timestamps and time windows.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// A unix timestamp (full seconds elapsed since 1970-01-01 00:00 UTC).
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UnixTimestamp(u64);

impl UnixTimestamp {
    /// Creates a unix timestamp from the given number of seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Creates a unix timestamp from the given system time.
    pub fn from_system(time: SystemTime) -> Self {
        let duration = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self(duration)
    }

    /// Returns the current timestamp.
    #[inline]
    pub fn now() -> Self {
        Self::from_system(SystemTime::now())
    }

    /// Returns the number of seconds since the UNIX epoch start.
    pub fn as_secs(self) -> u64 {
        self.0
    }

    /// Returns the start of the window of size `resolution` that contains this timestamp.
    ///
    /// Windows are aligned to multiples of `resolution` since the UNIX epoch. Sub-second parts
    /// of `resolution` are ignored and a resolution below one second leaves the timestamp
    /// unchanged.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use tally_common::time::UnixTimestamp;
    ///
    /// let ts = UnixTimestamp::from_secs(125);
    /// assert_eq!(ts.truncate(Duration::from_secs(60)), UnixTimestamp::from_secs(120));
    /// ```
    pub fn truncate(self, resolution: Duration) -> Self {
        match resolution.as_secs() {
            0 => self,
            secs => Self(self.0 - self.0 % secs),
        }
    }

    /// Subtracts `duration` from this timestamp, returning `None` on underflow.
    pub fn checked_sub(self, duration: Duration) -> Option<Self> {
        self.0.checked_sub(duration.as_secs()).map(Self)
    }
}

impl fmt::Debug for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnixTimestamp({})", self.as_secs())
    }
}

impl fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_secs().fmt(f)
    }
}

impl std::ops::Add<Duration> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_add(rhs.as_secs()))
    }
}

impl std::ops::Sub for UnixTimestamp {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        Duration::from_secs(self.0.saturating_sub(rhs.0))
    }
}

/// An error returned from parsing [`UnixTimestamp`].
#[derive(Clone, Copy, Debug)]
pub struct ParseUnixTimestampError(());

impl fmt::Display for ParseUnixTimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid unix timestamp")
    }
}

impl std::error::Error for ParseUnixTimestampError {}

impl std::str::FromStr for UnixTimestamp {
    type Err = ParseUnixTimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ts = s.parse().or(Err(ParseUnixTimestampError(())))?;
        Ok(Self(ts))
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.as_secs())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Self::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_aligns_to_resolution() {
        let minute = Duration::from_secs(60);
        assert_eq!(
            UnixTimestamp::from_secs(1_700_000_059).truncate(minute),
            UnixTimestamp::from_secs(1_699_999_980)
        );
        assert_eq!(
            UnixTimestamp::from_secs(1_699_999_980).truncate(minute),
            UnixTimestamp::from_secs(1_699_999_980)
        );
    }

    #[test]
    fn test_truncate_subsecond_resolution() {
        let ts = UnixTimestamp::from_secs(42);
        assert_eq!(ts.truncate(Duration::from_millis(500)), ts);
    }

    #[test]
    fn test_checked_sub() {
        let ts = UnixTimestamp::from_secs(120);
        assert_eq!(
            ts.checked_sub(Duration::from_secs(60)),
            Some(UnixTimestamp::from_secs(60))
        );
        assert_eq!(ts.checked_sub(Duration::from_secs(121)), None);
    }

    #[test]
    fn test_parse_and_serialize() {
        let ts: UnixTimestamp = "1700000000".parse().unwrap();
        assert_eq!(serde_json::to_string(&ts).unwrap(), "1700000000");
        assert!("yesterday".parse::<UnixTimestamp>().is_err());
    }
}
