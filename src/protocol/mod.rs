pub mod chunker;
pub mod messages;
