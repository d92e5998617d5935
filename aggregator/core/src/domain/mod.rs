// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Aggregator Domain Layer
//!
//! Pure domain types and strategy contracts. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`message`] | `Message`, `MessageHeaders`, `CorrelationKey`, `MessageBuilder` |
//! | [`channel`] | `MessageChannel`, `ChannelRef`, `DeliveryError` |
//! | [`correlation`] | `CorrelationStrategy` |
//! | [`group`] | `MessageGroup` |
//! | [`release`] | `ReleaseStrategy` and its count / sequence variants |
//! | [`processor`] | `MessageGroupProcessor` |
//! | [`events`] | `AggregatorEvent`, `DiscardReason` |
//! | [`config`] | `AggregatorConfig`, `ReaperConfig` |
//! | [`error`] | `AggregatorError` |

pub mod channel;
pub mod config;
pub mod correlation;
pub mod error;
pub mod events;
pub mod group;
pub mod message;
pub mod processor;
pub mod release;

pub use channel::*;
pub use config::*;
pub use correlation::*;
pub use error::*;
pub use events::*;
pub use group::*;
pub use message::*;
pub use processor::*;
pub use release::*;
