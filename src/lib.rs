//! Gmail-backed email and OTP retrieval for end-to-end authentication tests.

pub mod auth;
pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod extract;
pub mod gmail_types;
pub mod retrieval;
pub mod tasks;
