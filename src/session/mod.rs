//! Session tracking for players connected over one or more sockets

pub mod registry;

pub use registry::SessionRegistry;
