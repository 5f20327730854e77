pub mod client;
pub mod sent_message;
