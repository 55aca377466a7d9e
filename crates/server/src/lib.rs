//! VisionTag HTTP server: axum surface over the `visiontag-core`
//! pipeline, plus configuration, logging, and remote fetch.

pub mod api;
pub mod config;
pub mod logging;
pub mod remote_fetch;
pub mod shutdown;
