// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Process-local cache state.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Local cache state                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  local.rs   - LocalCache: id → entity, per-slot dirty flag   │
//! │  access.rs  - AccessTracker: last access + context pins      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod access;
pub mod local;

pub use access::AccessTracker;
pub use local::{DirtyEntry, LocalCache};
