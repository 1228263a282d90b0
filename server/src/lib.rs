//! Gatehouse Server - Authenticated real-time WebSocket gateway.
//!
//! This crate provides the gateway that:
//! - Authenticates every WebSocket connection before it can take part
//! - Keeps a registry of live, authenticated connections
//! - Broadcasts each chat message to every connection, sender included
//! - Converts handler failures into structured error frames
//! - Closes every connection cleanly on shutdown
//!
//! # Architecture
//!
//! An upgraded socket is driven by [`session::SessionHandler`]. The
//! [`auth::AuthGate`] resolves the credential through an
//! [`verifier::IdentityVerifier`] (a remote HTTP endpoint or a local EdDSA
//! JWT check) and admits the connection into the
//! [`registry::ConnectionRegistry`]. Each inbound event then runs through the
//! [`interceptor::EventInterceptor`], and chat messages are fanned out by the
//! [`broadcast::BroadcastEngine`].

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod error;
pub mod interceptor;
pub mod jwt;
pub mod registry;
pub mod remote;
pub mod routes;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod types;
pub mod verifier;
