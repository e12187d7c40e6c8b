pub mod app;
pub mod chat;
pub mod classifier;
pub mod error;
pub mod share;
pub mod telemetry;

pub use app::AppState;
pub use error::{GatewayError, PublicError};
pub use share::{PublishRequest, ShareOutcome};

/// Events delivered to the client for one turn; same contract as the
/// provider stream.
pub use prism_provider::StreamEvent as TurnEvent;
