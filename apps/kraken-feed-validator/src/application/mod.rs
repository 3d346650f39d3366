//! Application Layer - Port definitions and the scenario suite.
//!
//! This layer defines the seam between the session and the socket, and the
//! services that drive a session end to end.

/// Port interfaces for the frame transport.
pub mod ports;

/// Validation scenarios run against a live session.
pub mod services;
