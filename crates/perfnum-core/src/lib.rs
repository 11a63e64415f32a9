//! Substantive engineering for the perfnum system: the shared-memory
//! substrate, the worker inner loops, the three coordinator variants, and
//! the three reporter variants.

pub mod coordinator;
pub mod error;
pub mod method;
pub mod poll;
pub mod predicate;
pub mod reporter;
pub mod sem;
pub mod shm;
pub mod signal;
pub mod worker;

pub use error::{PerfError, PerfResult};
pub use method::Method;
