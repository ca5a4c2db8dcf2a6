//! `tsvault` Server: encrypted ledger database served over a one-shot
//! RSA/AES TCP protocol.

pub mod client;
pub mod db;
pub mod keys;
pub mod network;
pub mod protocol;
pub mod service;

#[cfg(test)]
mod testing;

pub use client::{Client, ClientError};
pub use db::{Db, DbError};
pub use network::{NetworkModule, SessionState};
pub use service::ServerConfig;
