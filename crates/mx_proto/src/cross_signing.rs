//! Cross-signing key usages and signature graph endpoints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::ids::{SigningKey, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossSigningUsage {
    Master,
    SelfSigning,
    UserSigning,
}

impl CrossSigningUsage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::SelfSigning => "self_signing",
            Self::UserSigning => "user_signing",
        }
    }
}

impl fmt::Display for CrossSigningUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrossSigningUsage {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "master" => Ok(Self::Master),
            "self_signing" => Ok(Self::SelfSigning),
            "user_signing" => Ok(Self::UserSigning),
            other => Err(ProtoError::UnknownUsage(other.to_owned())),
        }
    }
}

/// A cross-signing key together with the first key ever seen for the same
/// user and usage. `key != first` means the identity was replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TofuSigningKey {
    pub key: SigningKey,
    pub first: SigningKey,
}

impl TofuSigningKey {
    pub fn changed(&self) -> bool {
        self.key != self.first
    }
}

/// One end of a signature edge: a key belonging to a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrossSigner {
    pub user_id: UserId,
    pub key: SigningKey,
}

impl CrossSigner {
    pub fn new(user_id: impl Into<UserId>, key: impl Into<SigningKey>) -> Self {
        Self { user_id: user_id.into(), key: key.into() }
    }
}
