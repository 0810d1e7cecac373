// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cross-process propagation of entity updates and deletes.
//!
//! - [`MemorySync`]: several repositories in one process over a [`MemoryBus`]
//! - [`RedisSync`]: one Redis pub/sub channel per repository

pub mod memory;
pub mod redis;
pub mod traits;

pub use self::memory::{MemoryBus, MemorySync};
pub use self::redis::RedisSync;
pub use self::traits::{DeleteHandler, SyncHandlers, SyncMessage, SyncService, UpdateHandler};
