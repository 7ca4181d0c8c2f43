//! External status surface

pub mod http;

pub use http::StatusServer;
