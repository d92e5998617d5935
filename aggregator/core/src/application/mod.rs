// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides mod functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Aggregating handler and expiry sweeper

pub mod aggregator;
pub mod expiry_sweeper;

pub use aggregator::{AggregatingMessageHandler, AggregatingMessageHandlerBuilder, SweepReport};
pub use expiry_sweeper::GroupExpirySweeper;
