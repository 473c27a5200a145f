//! error type that can cross thread boundaries.
//!
//! The pipeline loop and the I/O planes live on different threads, so any
//! error that bubbles out of a thread entry point has to be Send + Sync.
pub type BoxError = std::boxed::Box<
    dyn std::error::Error // must implement Error to satisfy ?
        + std::marker::Send // needed for threads
        + std::marker::Sync, // needed for threads
>;
