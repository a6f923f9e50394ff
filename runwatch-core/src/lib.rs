pub mod github;
pub mod model;
pub mod recording;
pub mod source;

pub use github::*;
pub use model::*;
pub use recording::{
    join_writers, Direction, HttpExchange, JsonlWriter, RecordedEvent, RecordingLogger,
    RecordingMiddleware, Sanitizer, CORRELATION_ID_HEADER,
};
pub use source::{ActivitySource, SourceError};
