mod handlers;
mod server;

pub use server::{ServerState, StatusServer};
