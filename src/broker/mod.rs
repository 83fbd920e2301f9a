// =============================================================================
// Broker Module — the single shared connection to the outside world
// =============================================================================
//
// All broker interaction is cooperatively single-threaded: the gateway binds
// its callbacks to one session, so `IbkrClient` serialises RPCs internally
// and every worker that borrows the shared handle must run on its own live
// async task. The `Broker` trait is the seam the rest of the engine depends
// on; tests substitute `scripted::ScriptedBroker`.

pub mod api;
pub mod client;
pub mod pacing;

#[cfg(test)]
pub mod scripted;

pub use api::Broker;
pub use client::IbkrClient;
