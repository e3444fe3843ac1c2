//! Almacen Server Library
//!
//! A self-hosted upload gateway in front of an IPFS node: accepts large
//! binary objects over HTTP (single-shot or chunked), verifies content
//! integrity, publishes them to the node, and records a durable mapping
//! from content hash to CID.
//!
//! # Modules
//!
//! - `upload`: chunk tracking, blob index, and publish orchestration
//! - `storage`: the content-addressable backend trait and IPFS client
//! - `hash`: SHA-256 content hashing
//! - `routes`: the HTTP surface

pub mod config;
pub mod db;
pub mod error;
pub mod hash;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;
