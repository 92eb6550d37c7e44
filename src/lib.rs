//! Library crate for nmap-gate exposing reusable modules.
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod nmap;
pub mod normalize;
pub mod pool;
pub mod server;
pub mod target;
pub mod types;
