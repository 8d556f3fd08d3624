// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Non-blocking HTTP/TLS connection multiplex.
//!
//! One [`pool::ConnectionPool`] entry per distinct (host, port, secure)
//! tuple; every resource stub addressed at the same server shares its
//! connection and pipelines its requests over it.

pub mod address;
pub mod connection;
pub mod http;
pub mod pool;
pub mod se_connection;

pub use address::{Address, Uri};
pub use connection::{Connection, SessionStatus};
pub use pool::ConnectionPool;
