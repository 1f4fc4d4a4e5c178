//! HTTP plumbing shared by every multisite crate.
//!
//! * [`HttpRequest`] / [`HttpResponse`]: owned request and response values
//! * [`Server`]: one hyper HTTP/1 listener in front of a [`RequestHandler`]
//! * [`ConnectionTracker`]: counts in-flight work and drains it with a timeout
//! * [`logging`]: `tracing` subscriber setup

pub mod error;
pub mod http;
pub mod logging;
pub mod server;
pub mod shutdown;

pub use error::Error;
pub use http::{HttpRequest, HttpResponse, Json};
pub use server::{RequestHandler, Server};
pub use shutdown::{ConnectionGuard, ConnectionTracker};

pub type Result<T> = std::result::Result<T, Error>;
