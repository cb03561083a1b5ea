//! Low-level building blocks shared by the storage and query layers.

/// Order-preserving byte encodings.
pub mod bytes;

/// Interruptible waits.
pub mod concurrency;

/// Clock abstraction.
pub mod time;
