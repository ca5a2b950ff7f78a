//! Domain model: accounts, transfers, events and the ports the engine talks through.

pub mod account;
pub mod events;
pub mod ports;
pub mod transfer;
