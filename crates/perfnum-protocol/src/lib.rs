//! Fixed-width wire record protocol
//!
//! Implements the record protocol used by the PIPES and SOCKET methods.
//! Every record, regardless of variant, occupies the same
//! number of bytes on the wire — the width of the widest payload — so a
//! reader never needs to know the tag before it knows how many bytes to
//! read. Encoding is native machine layout; this is explicitly an in-host
//! protocol, not meant to cross architectures.

mod record;

pub use record::{recv, send, RecvOutcome, Record, PID_CLIENT, PID_SERVER};
