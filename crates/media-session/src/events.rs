//! Events the manager surfaces to the layers above it.
//!
//! Overlays do not hook themselves into a call by swapping callback
//! pointers; the manager posts events into a queue instead, and the
//! dispatcher drains them after each protocol step, routing them to
//! whoever is stacked on top (file transfer, UI).

/// A state transition other layers may care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new inbound call was admitted. `hidden_from_ui` marks data
    /// sessions (file transfer, application sharing).
    IncomingCall {
        call_id: String,
        with: String,
        hidden_from_ui: bool,
    },

    /// The call was accepted; `local` tells by which side.
    CallAccepted { call_id: String, local: bool },

    /// The call was rejected; `local` tells by which side.
    CallRejected { call_id: String, local: bool },

    /// The call is gone; all its resources have been released.
    CallEnded { call_id: String },

    /// Connectivity checks on a stream concluded.
    CandidatePairEstablished { call_id: String, stream_id: String },

    /// A data stream has bytes ready to read.
    StreamReadable { call_id: String, stream_id: String },

    /// Phone presence should be republished (OCS 2007 servers).
    PhoneStatePublish,
}
