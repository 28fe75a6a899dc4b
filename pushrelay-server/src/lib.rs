//! Push notification relay.
//!
//! Backend services `POST /push` a notification naming a user; the relay
//! forwards it over that user's open WebSocket session, if there is one.
//! Each user has at most one live session, tracked by the
//! [`registry::ConnectionRegistry`].

pub mod auth;
pub mod config;
pub mod error;
pub mod ip_filter;
pub mod protocol;
pub mod push;
pub mod registry;
pub mod server;
pub mod session;
pub mod web;
