/// Near-real-time ticket updates by polling
///
/// Each watch re-reads one ticket on a fixed interval and forwards a snapshot
/// whenever its status or messages change. The watch ends when its token is
/// cancelled, the receiver is dropped, or the ticket disappears.
use super::{Ticket, TicketManager};
use crate::{
    auth::Session,
    error::{RentalError, RentalResult},
};
use tokio::{
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

const SNAPSHOT_BUFFER: usize = 8;

/// Ticket poller
#[derive(Clone)]
pub struct TicketPoller {
    manager: TicketManager,
    period: Duration,
}

/// What a snapshot is compared by
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    status: &'static str,
    message_count: usize,
    last_message_id: Option<i64>,
}

impl Fingerprint {
    fn of(ticket: &Ticket) -> Self {
        Self {
            status: ticket.status.as_str(),
            message_count: ticket.messages.len(),
            last_message_id: ticket.messages.last().map(|m| m.id),
        }
    }
}

impl TicketPoller {
    pub fn new(manager: TicketManager, period: Duration) -> Self {
        Self { manager, period }
    }

    /// Start watching a ticket
    ///
    /// Access is checked up front; the first snapshot is delivered immediately.
    pub async fn watch(
        &self,
        session: Session,
        ticket_id: String,
        cancel: CancellationToken,
    ) -> RentalResult<mpsc::Receiver<Ticket>> {
        let initial = self
            .manager
            .get_ticket_with_messages(&session, &ticket_id)
            .await?;

        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let manager = self.manager.clone();
        let period = self.period;

        tokio::spawn(async move {
            let mut last = Fingerprint::of(&initial);
            if tx.send(initial).await.is_err() {
                return;
            }

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {
                        match manager.get_ticket_with_messages(&session, &ticket_id).await {
                            Ok(ticket) => {
                                let current = Fingerprint::of(&ticket);
                                if current != last {
                                    last = current;
                                    if tx.send(ticket).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(RentalError::NotFound(_)) => break,
                            Err(e) => tracing::warn!("Polling ticket {} failed: {}", ticket_id, e),
                        }
                    }
                }
            }

            tracing::debug!("Stopped watching ticket {} for {}", ticket_id, session.email);
        });

        Ok(rx)
    }
}
