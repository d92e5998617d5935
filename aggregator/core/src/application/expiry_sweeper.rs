// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Group Expiry Sweeper - on-demand and background timeout handling
//!
//! Walks the group store for groups idle longer than the configured timeout
//! and lets the handler apply its partial-result-or-discard policy to each.
//! `sweep` runs one pass synchronously; `start` runs passes on a tokio
//! interval until the shutdown token is cancelled.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Drives `AggregatingMessageHandler::expire_groups`

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::aggregator::{AggregatingMessageHandler, SweepReport};
use crate::domain::config::ReaperConfig;
use crate::domain::error::AggregatorError;

pub struct GroupExpirySweeper {
    handler: Arc<AggregatingMessageHandler>,
    config: ReaperConfig,
    shutdown_token: CancellationToken,
}

impl GroupExpirySweeper {
    /// Sweeper using the handler's own `reaper` configuration
    pub fn new(handler: Arc<AggregatingMessageHandler>) -> Self {
        let config = handler.config().reaper.clone();
        Self::with_config(handler, config)
    }

    pub fn with_config(handler: Arc<AggregatingMessageHandler>, config: ReaperConfig) -> Self {
        Self {
            handler,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// One pass with the configured group timeout
    pub fn sweep(&self) -> Result<SweepReport, AggregatorError> {
        self.sweep_older_than(self.config.group_timeout)
    }

    /// One pass expiring groups idle for longer than `age`
    pub fn sweep_older_than(&self, age: Duration) -> Result<SweepReport, AggregatorError> {
        let age = chrono::Duration::from_std(age)
            .map_err(|e| AggregatorError::Config(format!("group timeout out of range: {}", e)))?;
        self.handler.expire_groups(age)
    }

    /// Start the background sweep task
    /// Returns a handle that completes once the shutdown token is cancelled
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!(aggregator = self.handler.name(), "Group expiry sweeper is disabled");
            return;
        }

        info!(
            aggregator = self.handler.name(),
            interval_ms = self.config.interval.as_millis() as u64,
            group_timeout_ms = self.config.group_timeout.as_millis() as u64,
            "Starting group expiry sweeper"
        );

        let mut tick = interval(self.config.interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    debug!("Running group expiry sweep");

                    // Group locks block, keep them off the async workers.
                    let handler = self.handler.clone();
                    let timeout = self.config.group_timeout;
                    let outcome = tokio::task::spawn_blocking(move || {
                        let age = chrono::Duration::from_std(timeout).map_err(|e| {
                            AggregatorError::Config(format!("group timeout out of range: {}", e))
                        })?;
                        handler.expire_groups(age)
                    })
                    .await;

                    match outcome {
                        Ok(Ok(report)) if report.groups_expired > 0 => {
                            info!(
                                groups_expired = report.groups_expired,
                                "Group expiry sweep completed"
                            );
                        }
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!("Group expiry sweep failed: {}", e),
                        Err(e) => warn!("Group expiry sweep task panicked: {}", e),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping group expiry sweeper");
                    break;
                }
            }
        }

        info!("Group expiry sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::MessageBuilder;
    use crate::domain::release::MessageCountReleaseStrategy;
    use crate::infrastructure::channels::QueueChannel;

    fn handler(discard: &Arc<QueueChannel>) -> Arc<AggregatingMessageHandler> {
        Arc::new(
            AggregatingMessageHandler::builder("sweeper-test")
                .release_strategy(MessageCountReleaseStrategy::new(10))
                .discard_channel(discard.clone())
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_sweep_respects_group_timeout() {
        let discard = Arc::new(QueueChannel::new("discard"));
        let handler = handler(&discard);
        handler
            .handle(MessageBuilder::with_payload(1).correlation_id("k").build())
            .unwrap();

        let sweeper = GroupExpirySweeper::with_config(
            handler.clone(),
            ReaperConfig {
                enabled: true,
                interval: Duration::from_secs(1),
                group_timeout: Duration::from_secs(3600),
            },
        );
        assert_eq!(sweeper.sweep().unwrap().groups_expired, 0);
        assert_eq!(handler.store().group_count(), 1);

        assert_eq!(sweeper.sweep_older_than(Duration::ZERO).unwrap().groups_expired, 1);
        assert_eq!(discard.len(), 1);
        assert_eq!(handler.store().group_count(), 0);
    }

    #[tokio::test]
    async fn test_background_sweeper_expires_and_stops() {
        let discard = Arc::new(QueueChannel::new("discard"));
        let handler = handler(&discard);
        handler
            .handle(MessageBuilder::with_payload(1).correlation_id("k").build())
            .unwrap();

        let sweeper = Arc::new(GroupExpirySweeper::with_config(
            handler.clone(),
            ReaperConfig {
                enabled: true,
                interval: Duration::from_millis(10),
                group_timeout: Duration::ZERO,
            },
        ));
        let token = sweeper.shutdown_token();
        let task = sweeper.start();

        let discarded = tokio::task::spawn_blocking({
            let discard = discard.clone();
            move || discard.receive(Duration::from_secs(5))
        })
        .await
        .unwrap();
        assert!(discarded.is_some());

        token.cancel();
        task.await.unwrap();
        assert_eq!(handler.store().group_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_sweeper_returns_immediately() {
        let discard = Arc::new(QueueChannel::new("discard"));
        let sweeper = Arc::new(GroupExpirySweeper::new(handler(&discard)));
        sweeper.start().await.unwrap();
    }
}
