pub mod github;
pub mod types;

pub use crate::github::GithubClient;
