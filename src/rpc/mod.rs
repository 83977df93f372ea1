pub mod client;
pub mod sentinel;
pub mod server;
pub mod wire;

pub use client::IndexClient;
pub use sentinel::Sentinel;
pub use server::IndexServer;
