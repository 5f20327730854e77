pub mod client;
pub mod tracker;
