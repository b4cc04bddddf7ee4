// Asset processing server core.
//
// Long-lived multi-stage background jobs over user-submitted assets, with
// two interchangeable dispatch backends, live stage streaming, and
// domain-aware outbound pacing (the `admission` crate).

pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
