//! Identifier newtypes.
//!
//! All identifiers are opaque strings on the wire and in the database. The
//! newtypes only exist so a room ID cannot be passed where a session ID is
//! expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Fully-qualified user ID, e.g. `@alice:example.org`.
    UserId
);
string_id!(
    /// Device ID, unique per user.
    DeviceId
);
string_id!(
    /// Room ID, e.g. `!abc:example.org`.
    RoomId
);
string_id!(
    /// Event ID of a decrypted group message.
    EventId
);
string_id!(
    /// Curve25519 identity key of a device (base64).
    IdentityKey
);
string_id!(
    /// Ed25519 signing key (base64).
    SigningKey
);
string_id!(
    /// Olm or Megolm session ID.
    SessionId
);
string_id!(
    /// Cursor into the sync event stream.
    SyncToken
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialise_as_bare_strings() {
        let room = RoomId::new("!room:example.org");
        assert_eq!(serde_json::to_string(&room).unwrap(), "\"!room:example.org\"");
        let back: RoomId = serde_json::from_str("\"!room:example.org\"").unwrap();
        assert_eq!(back, room);
    }

    #[test]
    fn display_matches_inner_value() {
        let key = IdentityKey::from("curve-key");
        assert_eq!(key.to_string(), "curve-key");
        assert_eq!(key.as_str(), "curve-key");
    }
}
