use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use tracing::{debug, error};

use crate::model::{Job, RepoSlug, WorkflowRun};
use crate::recording::{RecordingLogger, RecordingMiddleware, CORRELATION_ID_HEADER};
use crate::source::{ActivitySource, SourceError};

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

/// Page size requested from list endpoints. GitHub caps this at 100.
const PER_PAGE: u32 = 100;

/// GitHub Actions REST client authenticated with a personal access token.
#[derive(Clone)]
pub struct GitHubClient {
    client: ClientWithMiddleware,
    token: String,
    api_base_url: String,
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("api_base_url", &self.api_base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsResponse {
    #[serde(default)]
    workflow_runs: Option<Vec<WorkflowRun>>,
}

#[derive(Debug, Deserialize)]
struct JobsResponse {
    #[serde(default)]
    jobs: Option<Vec<Job>>,
}

impl GitHubClient {
    pub fn new(token: String) -> Self {
        Self::new_with_recording(token, DEFAULT_API_BASE_URL, None)
    }

    pub fn new_with_recording(
        token: String,
        api_base_url: &str,
        recording_logger: Option<RecordingLogger>,
    ) -> Self {
        Self {
            client: create_github_client(recording_logger),
            token,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        correlation_id: Option<&str>,
        url: &str,
    ) -> Result<T, SourceError> {
        let mut request_builder = self
            .client
            .get(url)
            .query(&[("per_page", PER_PAGE)])
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");

        if let Some(cid) = correlation_id {
            request_builder = request_builder.header(CORRELATION_ID_HEADER, cid);
        }

        let response = request_builder
            .send()
            .await
            .map_err(|e| SourceError::Request {
                operation,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
            error!("GitHub API error {}: {} - {}", operation, status, body);
            return Err(SourceError::Status {
                operation,
                status: status.as_u16(),
                body,
            });
        }

        response.json::<T>().await.map_err(|e| SourceError::Decode {
            operation,
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ActivitySource for GitHubClient {
    async fn list_runs(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoSlug,
    ) -> Result<Vec<WorkflowRun>, SourceError> {
        let url = format!(
            "{}/repos/{}/{}/actions/runs",
            self.api_base_url, repo.owner, repo.name
        );

        debug!("Fetching workflow runs for {}", repo);

        let response: WorkflowRunsResponse = self
            .get_json("listing workflow runs", correlation_id, &url)
            .await?;
        let runs = response.workflow_runs.unwrap_or_default();

        debug!("Fetched {} workflow run(s) for {}", runs.len(), repo);
        Ok(runs)
    }

    async fn list_jobs(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoSlug,
        run_id: u64,
    ) -> Result<Vec<Job>, SourceError> {
        let url = format!(
            "{}/repos/{}/{}/actions/runs/{}/jobs",
            self.api_base_url, repo.owner, repo.name, run_id
        );

        debug!("Fetching jobs for run {} in {}", run_id, repo);

        let response: JobsResponse = self
            .get_json("listing jobs", correlation_id, &url)
            .await?;
        Ok(response.jobs.unwrap_or_default())
    }
}

pub fn create_github_client(recording_logger: Option<RecordingLogger>) -> ClientWithMiddleware {
    use reqwest_middleware::ClientBuilder;

    let client = Client::builder()
        .user_agent(concat!("runwatch/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("Failed to create HTTP client");

    let mut builder = ClientBuilder::new(client);

    if let Some(logger) = recording_logger {
        builder = builder.with(RecordingMiddleware::new(logger));
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn repo() -> RepoSlug {
        RepoSlug::new("octo", "hello")
    }

    fn client(server: &MockServer) -> GitHubClient {
        GitHubClient::new_with_recording("secret-token".to_string(), &server.uri(), None)
    }

    #[tokio::test]
    async fn test_list_runs_sends_token_and_decodes_runs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/actions/runs"))
            .and(header("authorization", "Bearer secret-token"))
            .and(query_param("per_page", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total_count": 2,
                "workflow_runs": [
                    {
                        "id": 1,
                        "name": "CI",
                        "status": "completed",
                        "conclusion": "success",
                        "head_branch": "main",
                        "head_sha": "abc123",
                        "created_at": "2024-05-01T10:00:00Z",
                        "updated_at": "2024-05-01T10:10:00Z"
                    },
                    {
                        "id": 2,
                        "name": "CI",
                        "status": "queued",
                        "conclusion": null,
                        "head_branch": "feature",
                        "head_sha": "def456",
                        "created_at": "2024-05-01T10:11:00Z",
                        "updated_at": null
                    }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let runs = client(&server).list_runs(Some("cycle-1"), &repo()).await.unwrap();

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, 1);
        assert_eq!(runs[0].conclusion.as_deref(), Some("success"));
        assert_eq!(runs[1].conclusion, None);
        assert_eq!(runs[1].updated_at, None);
    }

    #[tokio::test]
    async fn test_list_runs_without_array_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/actions/runs"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"total_count": 0})),
            )
            .mount(&server)
            .await;

        let runs = client(&server).list_runs(None, &repo()).await.unwrap();
        assert!(runs.is_empty());
    }

    #[tokio::test]
    async fn test_non_success_status_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/actions/runs/5/jobs"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&server)
            .await;

        let err = client(&server).list_jobs(None, &repo(), 5).await.unwrap_err();

        match err {
            SourceError::Status { status, body, .. } => {
                assert_eq!(status, 404);
                assert_eq!(body, "Not Found");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_jobs_decodes_steps() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/actions/runs/1/jobs"))
            .and(header(CORRELATION_ID_HEADER, "cycle-7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total_count": 1,
                "jobs": [{
                    "id": 10,
                    "run_id": 1,
                    "name": "build",
                    "status": "completed",
                    "conclusion": "success",
                    "started_at": "2024-05-01T10:00:00Z",
                    "completed_at": "2024-05-01T10:05:00Z",
                    "steps": [{
                        "name": "Run tests",
                        "number": 1,
                        "status": "completed",
                        "conclusion": "failure",
                        "started_at": "2024-05-01T10:01:00Z",
                        "completed_at": "2024-05-01T10:04:00Z"
                    }]
                }]
            })))
            .mount(&server)
            .await;

        let jobs = client(&server).list_jobs(Some("cycle-7"), &repo(), 1).await.unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].steps.len(), 1);
        assert_eq!(jobs[0].steps[0].name, "Run tests");
        assert_eq!(jobs[0].steps[0].conclusion.as_deref(), Some("failure"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/actions/runs"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client(&server).list_runs(None, &repo()).await.unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_recording_redacts_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/actions/runs"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"workflow_runs": []})),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("recording.jsonl");
        let (logger, handle) = RecordingLogger::spawn(log_path.clone());

        let client =
            GitHubClient::new_with_recording("secret-token".to_string(), &server.uri(), Some(logger));
        client.list_runs(Some("cycle-3"), &repo()).await.unwrap();
        drop(client);
        handle.await.unwrap();

        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(!contents.contains("secret-token"));

        let events: Vec<crate::recording::RecordedEvent> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.correlation_id == "cycle-3"));
        assert_eq!(events[0].operation, "GET /repos/octo/hello/actions/runs");
        assert_eq!(events[1].operation, "response_200");
        assert_eq!(events[1].exchange.status, Some(200));
        assert_eq!(
            events[0].exchange.headers.get("authorization").map(String::as_str),
            Some("[REDACTED]")
        );
    }
}
