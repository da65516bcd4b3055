//! HTTP implementation of the story service consumed by
//! `storyloom-core`.

mod client;
mod error;
mod types;

pub use client::StoryServiceClient;
pub use error::{RemoteError, Result};
pub use types::{ApiErrorResponse, SuccessResponse};
