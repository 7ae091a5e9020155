//! Common utilities and helpers

pub mod cancel;

pub use cancel::CancelToken;
