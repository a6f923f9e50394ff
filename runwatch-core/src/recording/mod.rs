//! Capture of GitHub API interactions into a JSON-lines file.
//!
//! Recording is opt-in. When enabled, every request issued by the
//! [`GitHubClient`](crate::github::GitHubClient) and the matching response
//! status are appended to the recording file with credentials redacted.

pub mod logger;
pub mod middleware;
pub mod sanitizer;
pub mod types;

pub use logger::{join_writers, JsonlWriter, RecordingLogger};
pub use middleware::RecordingMiddleware;
pub use sanitizer::{Sanitizer, SENSITIVE_HEADERS};
pub use types::*;
