use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use runwatch_core::{RepoSlug, DEFAULT_API_BASE_URL};

#[derive(Parser)]
#[command(name = "runwatch")]
#[command(version)]
#[command(about = "Watch a repository's GitHub Actions runs, jobs and steps", long_about = None)]
pub struct Cli {
    /// Repository to watch, as owner/name
    #[arg(long, env = "RUNWATCH_REPO")]
    pub repo: String,

    /// GitHub token used for API requests
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Seconds between polls
    #[arg(long, default_value_t = 10)]
    pub interval: u64,

    /// SQLite database holding the checkpoint and observed entities
    #[arg(long, default_value = "state.db")]
    pub state_db: PathBuf,

    /// GitHub API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_BASE_URL)]
    pub api_url: String,

    /// Also append transition events to this JSON-lines file
    #[arg(long)]
    pub events_file: Option<PathBuf>,

    /// Record GitHub HTTP traffic (sanitized) to this JSON-lines file
    #[arg(long)]
    pub record_path: Option<PathBuf>,
}

#[derive(Clone)]
pub struct Config {
    pub repo: RepoSlug,
    pub token: String,
    pub interval: Duration,
    pub state_db: PathBuf,
    pub api_url: String,
    pub events_file: Option<PathBuf>,
    pub record_path: Option<PathBuf>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("repo", &self.repo)
            .field("token", &"[REDACTED]")
            .field("interval", &self.interval)
            .field("state_db", &self.state_db)
            .field("api_url", &self.api_url)
            .field("events_file", &self.events_file)
            .field("record_path", &self.record_path)
            .finish()
    }
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let repo: RepoSlug = cli.repo.parse().context("--repo must be owner/name")?;

        if cli.token.trim().is_empty() {
            bail!("GitHub token must not be empty");
        }

        if cli.interval == 0 {
            bail!("--interval must be at least 1 second");
        }

        let api_url = cli.api_url.trim_end_matches('/').to_string();
        url::Url::parse(&api_url).with_context(|| format!("invalid API URL: {}", api_url))?;

        Ok(Config {
            repo,
            token: cli.token,
            interval: Duration::from_secs(cli.interval),
            state_db: cli.state_db,
            api_url,
            events_file: cli.events_file,
            record_path: cli.record_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config> {
        let mut argv = vec!["runwatch", "--token", "ghp_test"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv)?;
        Config::from_cli(cli)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--repo", "octo/hello"]).unwrap();
        assert_eq!(config.repo, RepoSlug::new("octo", "hello"));
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.state_db, PathBuf::from("state.db"));
        assert_eq!(config.events_file, None);
        assert_eq!(config.record_path, None);
    }

    #[test]
    fn test_all_flags() {
        let config = parse(&[
            "--repo",
            "octo/hello",
            "--interval",
            "30",
            "--state-db",
            "/var/lib/runwatch/state.db",
            "--api-url",
            "http://localhost:8080/",
            "--events-file",
            "events.jsonl",
            "--record-path",
            "http.jsonl",
        ])
        .unwrap();

        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.state_db, PathBuf::from("/var/lib/runwatch/state.db"));
        assert_eq!(config.api_url, "http://localhost:8080");
        assert_eq!(config.events_file, Some(PathBuf::from("events.jsonl")));
        assert_eq!(config.record_path, Some(PathBuf::from("http.jsonl")));
    }

    #[test]
    fn test_rejects_bad_repo() {
        let err = parse(&["--repo", "octo"]).unwrap_err();
        assert!(err.to_string().contains("owner/name"));
    }

    #[test]
    fn test_rejects_repo_with_url_syntax() {
        for repo in ["octo/hello?x=1", "octo/hello#frag", "../x"] {
            let err = parse(&["--repo", repo]).unwrap_err();
            assert!(err.to_string().contains("owner/name"), "{}", repo);
        }
    }

    #[test]
    fn test_rejects_zero_interval() {
        assert!(parse(&["--repo", "octo/hello", "--interval", "0"]).is_err());
    }

    #[test]
    fn test_rejects_non_numeric_interval() {
        assert!(parse(&["--repo", "octo/hello", "--interval", "soon"]).is_err());
    }

    #[test]
    fn test_rejects_invalid_api_url() {
        assert!(parse(&["--repo", "octo/hello", "--api-url", "not a url"]).is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = parse(&["--repo", "octo/hello"]).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("ghp_test"));
        assert!(debug.contains("[REDACTED]"));
    }
}
