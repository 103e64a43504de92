pub mod config;
pub mod error;
pub mod evaluator;
pub mod http;
pub mod mock;

pub use config::ModerationConfig;
pub use error::ModerationError;
pub use evaluator::{
    ModerationAction, ModerationClient, ModerationRequest, ModerationResponse, ModerationStage,
};
pub use http::HttpModerationClient;
pub use mock::{FailingModerationClient, MockModerationClient};
