pub mod body;
pub mod cli;
pub mod connection;
pub mod counter;
pub mod error;
pub mod listener;
pub mod server;
pub mod shutdown;
