pub mod connection;
pub mod pipeline;
pub mod rooms;
