// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides mod functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** In-memory group store, event bus and channel implementations

pub mod channels;
pub mod event_bus;
pub mod group_store;

pub use channels::{NullChannel, QueueChannel};
pub use event_bus::{EventBus, EventBusError, EventReceiver, GroupEventReceiver};
pub use group_store::{InMemoryMessageGroupStore, LockedGroup};
