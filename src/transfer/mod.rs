pub mod coordinator;
pub mod progress;
pub mod sender;
pub mod session;
pub mod source;
