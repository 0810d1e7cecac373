// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The entity contract consumed by the cache.
//!
//! An entity is any serde-serializable value with a stable string id. Ids are
//! case-sensitive and chosen by the caller; normalize them (e.g. lower-case)
//! before handing them to a repository.
//!
//! # Merging
//!
//! When a peer broadcasts an update for an entity that is cached locally, the
//! repository calls [`Entity::merge`] on the cached value. The provided
//! implementation overwrites local state with the remote copy. Entity types
//! that want conflict resolution override it:
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use shard_cache::Entity;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Treasury {
//!     id: String,
//!     gold: u64,
//! }
//!
//! impl Entity for Treasury {
//!     fn id(&self) -> &str {
//!         &self.id
//!     }
//!
//!     // Keep the larger balance instead of blindly overwriting.
//!     fn merge(&mut self, remote: Self) {
//!         self.gold = self.gold.max(remote.gold);
//!     }
//! }
//!
//! let mut local = Treasury { id: "town.alpha".into(), gold: 10 };
//! local.merge(Treasury { id: "town.alpha".into(), gold: 4 });
//! assert_eq!(local.gold, 10);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A cacheable, identifiable unit of application state.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Stable identity, unique within one repository.
    fn id(&self) -> &str;

    /// Fold remote state into this value in place.
    ///
    /// Defaults to overwrite.
    fn merge(&mut self, remote: Self) {
        *self = remote;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Plain {
        id: String,
        value: u32,
    }

    impl Entity for Plain {
        fn id(&self) -> &str {
            &self.id
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        id: String,
        hits: u32,
    }

    impl Entity for Counter {
        fn id(&self) -> &str {
            &self.id
        }

        fn merge(&mut self, remote: Self) {
            self.hits += remote.hits;
        }
    }

    #[test]
    fn test_default_merge_overwrites() {
        let mut local = Plain { id: "a".into(), value: 1 };
        local.merge(Plain { id: "a".into(), value: 2 });
        assert_eq!(local.value, 2);
    }

    #[test]
    fn test_custom_merge_is_used() {
        let mut local = Counter { id: "a".into(), hits: 3 };
        local.merge(Counter { id: "a".into(), hits: 4 });
        assert_eq!(local.hits, 7);
    }
}
