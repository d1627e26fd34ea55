//! Request handlers for the health endpoint.

pub mod health;
