//! Strongly typed identifiers

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::generate_id;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Mint a fresh identifier
            pub fn generate() -> Self {
                Self(generate_id($prefix))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a hosted site
    SiteId,
    "site"
);
string_id!(
    /// Identifier of a user, as resolved by the identity provider
    UserId,
    "user"
);
string_id!(
    /// Identifier of a build job
    BuildId,
    "build"
);
string_id!(
    /// Identifier of a deployment
    DeploymentId,
    "deploy"
);
string_id!(
    /// Identifier of a domain record
    DomainId,
    "domain"
);
