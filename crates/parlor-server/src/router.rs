//! Message routing: persist first, then fan out to whoever is online.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parlor_shared::{
    ChatEvent, ConversationKey, Message, NewMessage, SendRequest, Target, TypingRequest, UserId,
};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::ServerError;
use crate::membership::MembershipResolver;
use crate::message_log::MessageLog;
use crate::registry::ConnectionRegistry;
use crate::session::{DeliverySession, EnqueueOutcome, Payload};

/// Per-call outcome of a fan-out. Never reported to the sender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Users the event was addressed to.
    pub recipients: usize,
    /// Sessions that accepted the payload.
    pub queued: usize,
    /// Sessions whose queue was full.
    pub dropped: usize,
    /// Recipients without a live session.
    pub offline: usize,
}

#[derive(Debug, Default)]
struct DeliveryStats {
    sent: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    offline: AtomicU64,
}

/// Counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub offline: u64,
}

#[derive(Clone)]
pub struct MessageRouter {
    log: Arc<dyn MessageLog>,
    members: Arc<dyn MembershipResolver>,
    registry: ConnectionRegistry,
    stats: Arc<DeliveryStats>,
}

impl MessageRouter {
    pub fn new(
        log: Arc<dyn MessageLog>,
        members: Arc<dyn MembershipResolver>,
        registry: ConnectionRegistry,
    ) -> Self {
        Self {
            log,
            members,
            registry,
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Validate, persist and fan out a send request. `Ok` means the message
    /// is durably stored, not that anyone received it.
    pub async fn send(&self, request: SendRequest) -> Result<Message, ServerError> {
        let message = request.validate()?;
        self.send_message(message).await
    }

    pub async fn send_message(&self, message: NewMessage) -> Result<Message, ServerError> {
        let message = self.log.append(message, Utc::now()).await?;
        self.stats.sent.fetch_add(1, Ordering::Relaxed);

        let payload = match message.to_event().to_json() {
            Ok(json) => Payload::from(json),
            Err(e) => {
                error!(message = %message.id, error = %e, "Failed to serialize message event");
                return Ok(message);
            }
        };

        let recipients = self.resolve_recipients(&message).await;
        let report = self.fan_out(&recipients, payload).await;

        debug!(
            message = %message.id,
            from = %message.from,
            conversation = %message.conversation_key(),
            recipients = report.recipients,
            queued = report.queued,
            dropped = report.dropped,
            offline = report.offline,
            "Message routed"
        );

        Ok(message)
    }

    pub async fn typing(&self, request: TypingRequest) -> Result<DeliveryReport, ServerError> {
        let (from, to) = request.validate()?;
        Ok(self.notify_typing(from, to).await)
    }

    /// Best-effort typing notice to one user. Nothing is persisted.
    pub async fn notify_typing(&self, from: UserId, to: UserId) -> DeliveryReport {
        let event = ChatEvent::Typing { from };
        let payload = match event.to_json() {
            Ok(json) => Payload::from(json),
            Err(e) => {
                error!(error = %e, "Failed to serialize typing event");
                return DeliveryReport::default();
            }
        };

        let session = self.registry.lookup(to).await;
        self.deliver(1, session.into_iter().collect(), payload)
    }

    pub async fn history(
        &self,
        key: ConversationKey,
        limit: u32,
    ) -> Result<Vec<Message>, ServerError> {
        self.log.history(key, limit).await
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.stats.sent.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            offline: self.stats.offline.load(Ordering::Relaxed),
        }
    }

    async fn resolve_recipients(&self, message: &Message) -> Vec<UserId> {
        match message.target {
            Target::Direct(to) => vec![to],
            Target::Group(group) => match self.members.members_of(group).await {
                Ok(members) => members
                    .into_iter()
                    .filter(|member| *member != message.from)
                    .collect(),
                Err(e) => {
                    warn!(
                        group = %group,
                        message = %message.id,
                        error = %e,
                        "Membership lookup failed, message stays in history only"
                    );
                    Vec::new()
                }
            },
        }
    }

    async fn fan_out(&self, recipients: &[UserId], payload: Payload) -> DeliveryReport {
        let sessions = self.registry.lookup_many(recipients).await;
        self.deliver(recipients.len(), sessions, payload)
    }

    fn deliver(
        &self,
        recipients: usize,
        sessions: Vec<Arc<DeliverySession>>,
        payload: Payload,
    ) -> DeliveryReport {
        let mut report = DeliveryReport {
            recipients,
            offline: recipients - sessions.len(),
            ..DeliveryReport::default()
        };

        for session in sessions {
            match session.enqueue(payload.clone()) {
                EnqueueOutcome::Queued => report.queued += 1,
                EnqueueOutcome::Dropped => report.dropped += 1,
                EnqueueOutcome::Closed => report.offline += 1,
            }
        }

        self.stats
            .delivered
            .fetch_add(report.queued as u64, Ordering::Relaxed);
        self.stats
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        self.stats
            .offline
            .fetch_add(report.offline as u64, Ordering::Relaxed);

        report
    }
}
