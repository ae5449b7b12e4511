//! Authentication primitives.
//!
//! - [`jwt`] -- HS256 claim generation, validation, and the
//!   [`IdentityVerifier`](jobline_core::collaborators::IdentityVerifier)
//!   implementation used by the WebSocket handshake.

pub mod jwt;
