// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable backends behind the repository.
//!
//! - [`MemoryStorage`]: process-local, for tests and single-server setups
//! - [`RedisStorage`]: one Redis hash per repository, shared by every server

pub mod memory;
pub mod redis;
pub mod traits;

pub use self::memory::MemoryStorage;
pub use self::redis::RedisStorage;
pub use self::traits::Storage;
