//! Device discovery pipeline.
//!
//! Reachability, format validation and entity extraction run in strict sequence, each
//! gated on the previous stage. [`DiscoveryMachine`] owns the sequencing and is the only
//! place that writes discovered entities to the store.

pub mod address;
mod machine;
mod probe;
mod state;
mod transport;


pub use address::is_plausible_address;
pub use address::normalize;
pub use machine::DiscoveryMachine;
pub use machine::DiscoveryTarget;
pub use machine::MachineError;
pub use probe::Probe;
pub use state::DiscoveryError;
pub use state::DiscoveryState;
pub use state::Transition;
pub use state::TransitionError;
pub use transport::HttpResponse;
pub use transport::HttpTransport;
pub use transport::Transport;
pub use transport::TransportError;

#[cfg(test)]
pub(crate) use transport::MockReply;
#[cfg(test)]
pub(crate) use transport::MockTransport;
