use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::notifier::RegistrationNotifier;

/// A side effect requested by a committed state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundNotification {
    /// Invite an unregistered customer to finish registration
    RegistrationInvite {
        /// Customer the token belongs to
        customer_id: Uuid,
        /// Recipient
        email: String,
        /// Recipient name
        name: String,
        /// Registration token for the link
        token: String,
    },
}

/// Producer side of the notification queue.
///
/// The processor only enqueues after every state write for the detection has
/// succeeded, so a notifier outage can never be mistaken for a failed write.
#[derive(Clone)]
pub struct NotificationOutbox {
    sender: mpsc::UnboundedSender<OutboundNotification>,
}

impl NotificationOutbox {
    /// Creates the queue and the dispatcher that drains it
    pub fn channel(
        notifier: Arc<dyn RegistrationNotifier>,
        send_timeout: Duration,
    ) -> (Self, OutboxDispatcher) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self { sender },
            OutboxDispatcher {
                receiver,
                notifier,
                send_timeout,
            },
        )
    }

    /// Queues a notification. Returns false when the dispatcher is gone.
    pub fn enqueue(&self, notification: OutboundNotification) -> bool {
        match self.sender.send(notification) {
            Ok(()) => true,
            Err(mpsc::error::SendError(dropped)) => {
                error!("Notification outbox is closed, dropping {:?}", dropped);
                false
            }
        }
    }
}

/// Consumer side of the notification queue
pub struct OutboxDispatcher {
    receiver: mpsc::UnboundedReceiver<OutboundNotification>,
    notifier: Arc<dyn RegistrationNotifier>,
    send_timeout: Duration,
}

impl OutboxDispatcher {
    /// Delivers notifications until every producer is dropped
    pub async fn run(mut self) {
        info!("Notification outbox dispatcher started");
        while let Some(notification) = self.receiver.recv().await {
            self.dispatch(notification).await;
        }
        info!("Notification outbox closed, dispatcher stopping");
    }

    /// Delivers everything queued right now; returns how many were attempted
    pub async fn drain(&mut self) -> usize {
        let mut attempted = 0;
        while let Ok(notification) = self.receiver.try_recv() {
            self.dispatch(notification).await;
            attempted += 1;
        }
        attempted
    }

    async fn dispatch(&self, notification: OutboundNotification) -> bool {
        match notification {
            OutboundNotification::RegistrationInvite {
                customer_id,
                email,
                name,
                token,
            } => {
                let send = self
                    .notifier
                    .send_registration_invite(&email, &name, &token);

                match timeout(self.send_timeout, send).await {
                    Ok(Ok(())) => {
                        info!("Registration invite delivered for customer {}", customer_id);
                        true
                    }
                    Ok(Err(e)) => {
                        // Token stays valid; the invite can be resent out-of-band.
                        error!(
                            "Failed to deliver registration invite for customer {}: {}",
                            customer_id, e
                        );
                        false
                    }
                    Err(_) => {
                        warn!(
                            "Registration invite for customer {} timed out after {:?}",
                            customer_id, self.send_timeout
                        );
                        false
                    }
                }
            }
        }
    }
}
