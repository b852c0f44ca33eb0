//! MemberName: Display identifier for a peer in a channel.
//!
//! Names are chosen by the peer itself and are neither authenticated nor
//! namespaced. Two peers that pick the same name are indistinguishable to
//! the presence protocol: their heartbeats merge into a single table entry.

use std::borrow::Borrow;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Maximum length of a member name in bytes.
pub const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemberNameError {
    #[error("Member name must not be empty")]
    Empty,
    #[error("Member name is {0} bytes, limit is {max}", max = MAX_NAME_LEN)]
    TooLong(usize),
    #[error("Member name must not start or end with whitespace")]
    SurroundingWhitespace,
    #[error("Member name must not contain control characters")]
    ControlCharacter,
}

/// A display name.
///
/// Names we choose are validated on parse. Names heard from other peers go
/// through [`MemberName::from_wire`], which is more permissive.
///
/// # Examples
/// ```
/// use presence_core::MemberName;
///
/// let name: MemberName = "alice".parse().unwrap();
/// assert_eq!(name.as_str(), "alice");
///
/// assert!("".parse::<MemberName>().is_err());
/// assert!(" bob".parse::<MemberName>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberName(String);

impl MemberName {
    /// Generate a random name of the form `peer-1a2b3c`.
    pub fn generate() -> Self {
        use rand::Rng;
        let suffix: u32 = rand::rng().random_range(0..=0xff_ffff);
        Self(format!("peer-{:06x}", suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accept a name announced by another peer.
    ///
    /// Remote peers may follow a looser naming policy than ours, so only
    /// the empty name is refused. Envelope size bounds the length.
    pub fn from_wire(s: String) -> Result<Self, MemberNameError> {
        if s.is_empty() {
            return Err(MemberNameError::Empty);
        }
        Ok(Self(s))
    }

    fn validate(s: &str) -> Result<(), MemberNameError> {
        if s.trim().is_empty() {
            return Err(MemberNameError::Empty);
        }
        if s.len() > MAX_NAME_LEN {
            return Err(MemberNameError::TooLong(s.len()));
        }
        if s.trim() != s {
            return Err(MemberNameError::SurroundingWhitespace);
        }
        if s.chars().any(char::is_control) {
            return Err(MemberNameError::ControlCharacter);
        }
        Ok(())
    }
}

impl Display for MemberName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MemberName {
    type Err = MemberNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s)?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for MemberName {
    type Error = MemberNameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl AsRef<str> for MemberName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Lets the presence table be queried with a plain `&str`.
impl Borrow<str> for MemberName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for MemberName {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for MemberName {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Self::try_from(s).map_err(serde::de::Error::custom)
    }
}
