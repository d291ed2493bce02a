//! Fan-out of lifecycle and balance events to front-ends.
//!
//! Delivery is best effort: failures are logged and never reach the caller,
//! so a broken pub/sub link cannot hold up a settlement.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::cache::RedisStore;
use crate::ledger::UserId;

const LOG_TARGET: &str = "broadcast";

pub const EVENT_ROUND_STARTED: &str = "round_started";
pub const EVENT_COUNTDOWN: &str = "countdown";
pub const EVENT_BETTING_STOPPED: &str = "betting_stopped";
pub const EVENT_BET_VOLUME: &str = "bet_volume";
pub const EVENT_ROUND_SETTLED: &str = "round_settled";
pub const EVENT_ROUND_RESETTLED: &str = "round_resettled";
pub const EVENT_ROUND_CANCELLED: &str = "round_cancelled";
pub const EVENT_SHUFFLED: &str = "shuffled";
pub const EVENT_BALANCE_CHANGED: &str = "balance_changed";

#[async_trait]
pub trait BroadcastGateway: Send + Sync {
    async fn global_broadcast(&self, event: &str, payload: Value);

    async fn push_to_user(&self, user_id: UserId, event: &str, payload: Value);
}

#[derive(Serialize)]
struct Envelope<'a> {
    event: &'a str,
    payload: Value,
}

/// Publishes JSON envelopes on Redis channels: one global channel and one
/// channel per user.
pub struct RedisBroadcast {
    store: Arc<RedisStore>,
    channel: String,
}

impl RedisBroadcast {
    pub fn new(store: Arc<RedisStore>, channel: impl Into<String>) -> Self {
        Self {
            store,
            channel: channel.into(),
        }
    }

    async fn publish(&self, channel: &str, event: &str, payload: Value) {
        let message = match serde_json::to_string(&Envelope { event, payload }) {
            Ok(message) => message,
            Err(err) => {
                tracing::error!(target: LOG_TARGET, event, error = %err, "failed to encode event");
                return;
            }
        };
        if let Err(err) = self.store.publish(channel, &message).await {
            tracing::warn!(target: LOG_TARGET, channel, event, error = %err, "publish failed");
        }
    }
}

#[async_trait]
impl BroadcastGateway for RedisBroadcast {
    async fn global_broadcast(&self, event: &str, payload: Value) {
        self.publish(&self.channel, event, payload).await;
    }

    async fn push_to_user(&self, user_id: UserId, event: &str, payload: Value) {
        let channel = format!("{}:user:{user_id}", self.channel);
        self.publish(&channel, event, payload).await;
    }
}

/// Gateway that only logs, for deployments without a fan-out transport.
pub struct LogBroadcast;

#[async_trait]
impl BroadcastGateway for LogBroadcast {
    async fn global_broadcast(&self, event: &str, payload: Value) {
        tracing::debug!(target: LOG_TARGET, event, %payload, "broadcast");
    }

    async fn push_to_user(&self, user_id: UserId, event: &str, payload: Value) {
        tracing::debug!(target: LOG_TARGET, user_id, event, %payload, "push");
    }
}
