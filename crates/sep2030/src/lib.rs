// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A single-threaded, cooperative IEEE 2030.5 (Smart Energy Profile 2.0)
//! DER client engine: schema-driven XML/binary codec, non-blocking
//! HTTP/TLS connection multiplex, resource retrieval over a stub
//! dependency graph, and event scheduling.
//!
//! The engine owns all of its state in one [`engine::Engine`] value -
//! there is no ambient global registry, logger, or connection table.
//! Construct one with an [`config::EngineConfig`] and a
//! [`schema::registry::Registry`], feed it poll-ready sockets, and drain
//! [`engine::Event`]s one at a time.

pub mod codec;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod net;
pub mod retrieve;
pub mod schedule;
pub mod schema;
pub mod security;

pub use error::{Error, Result};
