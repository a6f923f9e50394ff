use std::time::Instant;

use chrono::Utc;
use reqwest::header::HeaderValue;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use uuid::Uuid;

use super::sanitizer::Sanitizer;
use super::types::{Direction, HttpExchange, RecordedEvent, CORRELATION_ID_HEADER};
use super::RecordingLogger;

/// Appends every request and its outcome to a [`RecordingLogger`].
pub struct RecordingMiddleware {
    logger: RecordingLogger,
}

impl RecordingMiddleware {
    pub fn new(logger: RecordingLogger) -> Self {
        Self { logger }
    }

    fn record(
        &self,
        correlation_id: &str,
        direction: Direction,
        operation: String,
        exchange: HttpExchange,
    ) {
        self.logger.append(RecordedEvent {
            timestamp: Utc::now(),
            correlation_id: correlation_id.to_string(),
            direction,
            operation,
            exchange,
        });
    }
}

#[async_trait::async_trait]
impl Middleware for RecordingMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        // Requests from one poll cycle share the caller's id
        let existing = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let correlation_id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                if let Ok(value) = HeaderValue::from_str(&id) {
                    req.headers_mut().insert(CORRELATION_ID_HEADER, value);
                }
                id
            }
        };

        let url = Sanitizer::url(req.url());
        self.record(
            &correlation_id,
            Direction::Request,
            format!("{} {}", req.method(), req.url().path()),
            HttpExchange {
                url: url.clone(),
                headers: Sanitizer::headers(req.headers()),
                ..Default::default()
            },
        );

        let started = Instant::now();
        let result = next.run(req, extensions).await;
        let elapsed_ms = Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));

        let (operation, exchange) = match &result {
            Ok(resp) => (
                format!("response_{}", resp.status().as_u16()),
                HttpExchange {
                    url: Sanitizer::url(resp.url()),
                    headers: Sanitizer::headers(resp.headers()),
                    status: Some(resp.status().as_u16()),
                    elapsed_ms,
                    error: None,
                },
            ),
            Err(err) => (
                "error".to_string(),
                HttpExchange {
                    url,
                    elapsed_ms,
                    error: Some(err.to_string()),
                    ..Default::default()
                },
            ),
        };
        self.record(&correlation_id, Direction::Response, operation, exchange);

        result
    }
}
