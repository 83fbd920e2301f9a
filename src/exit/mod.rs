// =============================================================================
// Exit Engine Module
// =============================================================================
//
// `rules` decides WHETHER a position should close (profit target, stop
// loss, time exit — in that priority). `manager` does the closing: order
// placement, status polling with reconciliation semantics, and the atomic
// store update.

pub mod manager;
pub mod rules;

pub use manager::{ExitManager, ExitOutcome};
pub use rules::ExitRules;
