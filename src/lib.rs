//! A client for the Asterisk Management Interface (AMI): message framing,
//! request/response correlation, and event fan-out over a caller-supplied
//! duplex stream.
//!
//! The caller owns the transport (typically a `tokio::net::TcpStream`) and
//! its lifetime; this crate only requires it to implement
//! [`tokio::io::AsyncRead`] + [`tokio::io::AsyncWrite`].

pub mod auth;
pub mod client;
pub mod error;
pub mod frame;
pub mod line_reader;
pub mod message;
pub mod pending;
pub mod subscriber;

pub use client::Client;
pub use error::AmiError;
pub use message::Message;
pub use subscriber::{Subscriber, SubscriptionId};
