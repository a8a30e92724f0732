pub mod format;
pub mod providers;
pub mod retry;
pub mod router;
pub mod streaming;

pub use providers::groq::GroqClient;
pub use providers::ollama::OllamaClient;
pub use retry::{RetryPolicy, RetryingClient};
pub use router::{create_client, BackendRouter};
