//! Typed identifiers for job records and leases.
//!
//! Both wrap a [`uuid::Uuid`]; keeping them apart stops a `LeaseId` from
//! being passed where a `JobId` is expected. With the `sqlx` feature they
//! encode as PostgreSQL `UUID`.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident => $generate:path
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
        #[cfg_attr(feature = "sqlx", sqlx(transparent))]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Mint a fresh identifier.
            pub fn new() -> Self {
                Self($generate())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id!(
    /// Identifier of a job record. Time-ordered (UUIDv7), so newer jobs sort later.
    JobId => Uuid::now_v7
);

define_id!(
    /// Identifier of a single lease on a job record.
    ///
    /// A fresh value is minted for every claim, so a dispatcher that lost
    /// its lease can never write through a reclaimed one.
    LeaseId => Uuid::new_v4
);
