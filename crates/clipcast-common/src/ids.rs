//! Typed ID wrappers for type safety across clipcast.
//!
//! Catalog identifiers are plain integers owned by the external catalog. The
//! newtypes here keep a `TrackId` from being passed where a `StreamId` is
//! expected, and give every id the same `Display`/`FromStr` behaviour so route
//! handlers can parse path segments uniformly.

use serde::{Deserialize, Serialize};
use std::num::ParseIntError;
use std::str::FromStr;

macro_rules! catalog_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw catalog identifier.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// The raw catalog identifier.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<i64>().map(Self)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

catalog_id!(
    /// Identifier of a configured virtual channel.
    StreamId
);

catalog_id!(
    /// Identifier of a catalog entry inside a stream's playlist.
    ItemId
);

catalog_id!(
    /// Identifier of a track (one music video file) in the library.
    TrackId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let id: StreamId = "17".parse().unwrap();
        assert_eq!(id, StreamId::new(17));
        assert_eq!(id.to_string(), "17");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("abc".parse::<TrackId>().is_err());
        assert!("../1".parse::<ItemId>().is_err());
    }

    #[test]
    fn test_serde_transparent() {
        let id = TrackId::new(9);
        assert_eq!(serde_json::to_string(&id).unwrap(), "9");
        let back: TrackId = serde_json::from_str("9").unwrap();
        assert_eq!(back, id);
    }
}
