//! Transport seam between the gateway and its wire protocol.
//!
//! The gateway exchanges opaque byte payloads; concrete HTTP(S) bindings
//! implement [`TransportAdapter`] out of tree. The in-memory adapter backs
//! tests end to end.

pub mod adapter;

pub use adapter::{
    InMemoryAdapter, InMemoryTransportError, TransportAdapter, TransportRequest,
    TransportResponse,
};
