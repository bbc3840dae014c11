//! HTTP front end exposing the active limiter.

mod server;
mod service;

pub use server::HttpServer;
pub use service::{router, IDENTITY_HEADER};
