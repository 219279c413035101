//! Elasticsearch HTTP transport and scroll protocol.
//!
//! - **Safe logging** that never leaks credentials or sensitive URL parameters
//! - **Basic auth** with the password held in `secrecy::SecretString`
//! - **Scroll cursor** open / next / release calls

pub mod client;
pub mod scroll;

pub use client::{Credentials, ElasticClient};
pub use scroll::{CursorToken, ScrollClient, ScrollPage, ScrollSettings};
