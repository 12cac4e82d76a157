//! Inbound mail access.
//!
//! `InboundClient` opens sessions, `InboundSession` is the handful of IMAP
//! commands the fetcher needs. The real implementation lives in
//! `connection`; tests provide their own.

pub mod client;
pub mod connection;

pub use client::{InboundClient, InboundSession, RawMessage};
pub use connection::ImapConnector;
