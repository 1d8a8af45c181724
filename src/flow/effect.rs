//! Effects produced by flow transitions

use crate::db::NewHistoryEntry;
use crate::network::NetworkRequest;

/// Work for the executor after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send the request; the result comes back as a call event
    IssueCall {
        call_id: u64,
        step_id: String,
        request: NetworkRequest,
    },

    /// Append a completed call to call history
    RecordHistory { entry: NewHistoryEntry },

    /// Push the new state to subscribers
    PublishState,
}
