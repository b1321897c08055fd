//! Stratum CLI - inspect and manage OCI image layouts and build caches.

pub mod commands;
pub mod output;
