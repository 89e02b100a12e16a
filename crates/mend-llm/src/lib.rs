pub mod client;

pub use crate::client::{ChatClient, RemoteEmbedder};
