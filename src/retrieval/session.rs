//! Per-session cancellation of in-flight queries.
//!
//! Starting a query for a session cancels whatever that session was still
//! waiting on. Cancellation is cooperative: the token is checked at every
//! model call.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct QuerySessions {
    active: DashMap<String, (u64, CancellationToken)>,
    next_ticket: AtomicU64,
}

/// Handle for one in-flight query.
pub struct QueryTicket {
    pub session_id: String,
    pub token: CancellationToken,
    ticket: u64,
}

impl QuerySessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new query for `session_id`, cancelling the previous one.
    /// The returned token is a child of `parent` so server shutdown also
    /// cancels it.
    pub fn begin(&self, session_id: &str, parent: &CancellationToken) -> QueryTicket {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let token = parent.child_token();
        if let Some((_, (_, previous))) = self.active.remove(session_id) {
            log::debug!("Retriever: superseding in-flight query for session {}", session_id);
            previous.cancel();
        }
        self.active
            .insert(session_id.to_string(), (ticket, token.clone()));
        QueryTicket {
            session_id: session_id.to_string(),
            token,
            ticket,
        }
    }

    /// Drop the registration if it still belongs to this ticket.
    pub fn finish(&self, ticket: &QueryTicket) {
        self.active
            .remove_if(&ticket.session_id, |_, (current, _)| *current == ticket.ticket);
    }

    pub fn in_flight(&self) -> usize {
        self.active.len()
    }
}
