// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `conflux-core` — Correlating Message Aggregator
//!
//! Collects related messages, groups them by correlation key, releases each
//! group once a pluggable release strategy deems it complete, and reduces the
//! group to one output message. Groups that never complete are expired by a
//! sweep that either sends a partial result or discards the pending messages.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `Message`, `MessageGroup`, strategies, events, config, errors |
//! | [`infrastructure`] | Infrastructure | `InMemoryMessageGroupStore`, `EventBus`, `QueueChannel` |
//! | [`application`] | Application | `AggregatingMessageHandler`, `GroupExpirySweeper` |
//!
//! ## Key Concepts
//!
//! - **Correlation key**: value grouping related messages; a message without
//!   one is rejected synchronously.
//! - **Release**: reduce a complete group and send the result, once.
//! - **Discard**: route a message out of the flow without aggregating it.
//! - **Sweep**: expire groups idle longer than a cutoff age.
//!
//! Groups live in memory only; there is no persistence across restarts.

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
