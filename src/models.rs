//! Command line arguments for the `devops-pacer` binary.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::api::HttpMethod;
use crate::logging::{LogFormat, LogLevel};

/// Connection and pacing arguments shared by every command that talks to
/// Azure DevOps. Anything left unset falls back to the environment, then the
/// config file, then defaults.
#[derive(ClapArgs, Clone, Default, Debug)]
pub struct SharedArgs {
    // Azure DevOps Connection
    /// Azure DevOps organization name
    #[arg(short, long, help_heading = "Azure DevOps Connection")]
    pub organization: Option<String>,

    /// Personal Access Token for Azure DevOps API authentication
    #[arg(short = 't', long, help_heading = "Azure DevOps Connection")]
    pub pat: Option<String>,

    /// Service root (defaults to https://dev.azure.com)
    #[arg(long, help_heading = "Azure DevOps Connection")]
    pub base_url: Option<String>,

    /// REST API version added to requests that do not set one
    #[arg(long, help_heading = "Azure DevOps Connection")]
    pub api_version: Option<String>,

    // Rate Limiting
    /// Sustained request rate
    #[arg(long, help_heading = "Rate Limiting")]
    pub requests_per_second: Option<f64>,

    /// Requests that may be sent back to back after an idle period
    #[arg(long, help_heading = "Rate Limiting")]
    pub burst_capacity: Option<u32>,

    /// Maximum number of requests open at once (0 for no limit)
    #[arg(long, help_heading = "Rate Limiting")]
    pub max_in_flight: Option<usize>,

    // Retry
    /// Retries after the first attempt for transient failures
    #[arg(long, help_heading = "Retry")]
    pub max_retries: Option<u32>,

    /// Multiplier applied to the backoff delay per attempt
    #[arg(long, help_heading = "Retry")]
    pub backoff_factor: Option<f64>,

    /// Delay before the first retry, in milliseconds
    #[arg(long, help_heading = "Retry")]
    pub base_delay_ms: Option<u64>,

    /// Upper bound for computed backoff delays, in milliseconds
    #[arg(long, help_heading = "Retry")]
    pub max_delay_ms: Option<u64>,

    /// Disable ±20% jitter on backoff delays
    #[arg(long, help_heading = "Retry")]
    pub no_jitter: bool,

    /// Per-request timeout in seconds
    #[arg(long, help_heading = "Retry")]
    pub timeout_secs: Option<u64>,

    /// Records requested per page (`$top`)
    #[arg(long, help_heading = "Pagination")]
    pub page_size: Option<u32>,
}

/// Parses `name=value` query arguments.
pub fn parse_query_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{s}'")),
    }
}

fn parse_method(s: &str) -> Result<HttpMethod, String> {
    HttpMethod::parse(s).ok_or_else(|| format!("unsupported HTTP method '{s}'"))
}

fn parse_json(s: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(s).map_err(|e| format!("invalid JSON body: {e}"))
}

#[derive(ClapArgs, Clone, Debug)]
pub struct RequestArgs {
    #[command(flatten)]
    pub shared: SharedArgs,

    /// HTTP method (GET, POST, PUT, PATCH, DELETE)
    #[arg(value_parser = parse_method)]
    pub method: HttpMethod,

    /// Path relative to the organization, e.g. `my-project/_apis/git/repositories`
    pub path: String,

    /// Query parameter, repeatable
    #[arg(short, long = "query", value_name = "NAME=VALUE", value_parser = parse_query_pair, help_heading = "Request")]
    pub query: Vec<(String, String)>,

    /// JSON request body
    #[arg(short, long, value_parser = parse_json, help_heading = "Request")]
    pub body: Option<serde_json::Value>,

    /// Only retry this request when the server explicitly throttles it
    #[arg(long, conflicts_with = "idempotent", help_heading = "Request")]
    pub non_idempotent: bool,

    /// Retry this request on any transient failure, even for POST or PATCH
    #[arg(long, help_heading = "Request")]
    pub idempotent: bool,
}

#[derive(ClapArgs, Clone, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub shared: SharedArgs,

    /// Path relative to the organization
    pub path: String,

    /// Query parameter, repeatable
    #[arg(short, long = "query", value_name = "NAME=VALUE", value_parser = parse_query_pair, help_heading = "Listing")]
    pub query: Vec<(String, String)>,

    /// Send the listing as a POST with this JSON body
    #[arg(short, long, value_parser = parse_json, help_heading = "Listing")]
    pub body: Option<serde_json::Value>,

    /// Stop with an error instead of fetching more than this many pages
    #[arg(long, help_heading = "Listing")]
    pub max_pages: Option<usize>,

    /// Pass the continuation token in this body field instead of the query string
    #[arg(long, value_name = "FIELD", help_heading = "Listing")]
    pub body_token: Option<String>,

    /// Page with $top/$skip instead of continuation tokens
    #[arg(long, conflicts_with = "body_token", help_heading = "Listing")]
    pub offset: bool,

    /// Resume from a continuation token printed by an earlier run
    #[arg(long, value_name = "TOKEN", help_heading = "Listing")]
    pub start_token: Option<String>,
}

#[derive(ClapArgs, Clone, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub shared: SharedArgs,
}

/// Available commands
#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Execute a single REST call with rate limiting and retry
    #[command(
        visible_alias = "r",
        after_help = "EXAMPLES:\n    \
            devops-pacer request GET _apis/projects -o myorg -t <PAT>\n    \
            devops-pacer request POST myproject/_apis/wit/wiql \\\n      \
            --body '{\"query\": \"SELECT [System.Id] FROM WorkItems\"}'"
    )]
    Request(RequestArgs),

    /// Walk a paginated listing and print one JSON record per line
    #[command(
        visible_alias = "l",
        after_help = "EXAMPLES:\n    \
            devops-pacer list myproject/_apis/git/repositories --page-size 100\n    \
            devops-pacer list _apis/projects --max-pages 5 -q stateFilter=wellFormed"
    )]
    List(ListArgs),

    /// Probe connectivity and show the effective configuration
    Check(CheckArgs),

    /// Create a sample configuration file
    InitConfig,
}

impl Commands {
    pub fn shared_args(&self) -> Option<&SharedArgs> {
        match self {
            Commands::Request(args) => Some(&args.shared),
            Commands::List(args) => Some(&args.shared),
            Commands::Check(args) => Some(&args.shared),
            Commands::InitConfig => None,
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(
    name = "devops-pacer",
    author,
    version = crate::VERSION,
    about = "Rate-limited, retrying client for the Azure DevOps REST API",
    long_about = "Rate-limited, retrying client for the Azure DevOps REST API.\n\n\
        Every request is admitted by a token bucket, retried with exponential backoff\n\
        on transient failures, and paginated lazily through continuation tokens.\n\n\
        Configuration can be provided via CLI arguments, environment variables\n\
        (DEVOPS_PACER_*), or the config file (~/.config/devops-pacer/config.toml)."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable logging at this level
    #[arg(long, global = true, value_enum, help_heading = "Logging")]
    pub log_level: Option<LogLevel>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, help_heading = "Logging")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, help_heading = "Logging")]
    pub log_format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// # Request Command Parsing
    ///
    /// Verifies method, query pairs and JSON body parsing.
    ///
    /// ## Test Scenario
    /// - Parses a POST with two query pairs, a body and shared flags
    ///
    /// ## Expected Outcome
    /// - All values land in typed fields
    #[test]
    fn test_parse_request_command() {
        let args = Args::try_parse_from([
            "devops-pacer",
            "request",
            "post",
            "proj/_apis/wit/wiql",
            "-q",
            "$top=5",
            "--query",
            "api-version=7.0",
            "--body",
            r#"{"query":"SELECT"}"#,
            "-o",
            "my-org",
            "--requests-per-second",
            "2.5",
            "--no-jitter",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(args.log_level, Some(LogLevel::Debug));
        let Commands::Request(request) = args.command else {
            panic!("expected request command");
        };
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(
            request.query,
            vec![
                ("$top".to_string(), "5".to_string()),
                ("api-version".to_string(), "7.0".to_string())
            ]
        );
        assert_eq!(request.body, Some(json!({"query": "SELECT"})));
        assert_eq!(request.shared.organization.as_deref(), Some("my-org"));
        assert_eq!(request.shared.requests_per_second, Some(2.5));
        assert!(request.shared.no_jitter);
    }

    #[test]
    fn test_parse_list_command() {
        let args = Args::try_parse_from([
            "devops-pacer",
            "list",
            "_apis/projects",
            "--page-size",
            "100",
            "--max-pages",
            "3",
            "--body-token",
            "continuationToken",
        ])
        .unwrap();

        let Commands::List(list) = args.command else {
            panic!("expected list command");
        };
        assert_eq!(list.shared.page_size, Some(100));
        assert_eq!(list.max_pages, Some(3));
        assert_eq!(list.body_token.as_deref(), Some("continuationToken"));
        assert!(!list.offset);

        let args = Args::try_parse_from([
            "devops-pacer",
            "list",
            "p/_apis/git/pullrequests",
            "--offset",
            "--start-token",
            "200",
        ])
        .unwrap();
        let Commands::List(list) = args.command else {
            panic!("expected list command");
        };
        assert!(list.offset);
        assert_eq!(list.start_token.as_deref(), Some("200"));

        assert!(
            Args::try_parse_from([
                "devops-pacer",
                "list",
                "x",
                "--offset",
                "--body-token",
                "continuationToken",
            ])
            .is_err()
        );
    }

    /// # Invalid Arguments
    ///
    /// Verifies malformed values are rejected by clap.
    #[test]
    fn test_invalid_arguments_rejected() {
        assert!(Args::try_parse_from(["devops-pacer", "request", "TRACE", "x"]).is_err());
        assert!(
            Args::try_parse_from(["devops-pacer", "request", "GET", "x", "-q", "novalue"]).is_err()
        );
        assert!(
            Args::try_parse_from(["devops-pacer", "request", "GET", "x", "--body", "{"]).is_err()
        );
        assert!(
            Args::try_parse_from([
                "devops-pacer",
                "request",
                "POST",
                "x",
                "--idempotent",
                "--non-idempotent"
            ])
            .is_err()
        );
    }

    #[test]
    fn test_parse_query_pair() {
        assert_eq!(
            parse_query_pair("a=b=c"),
            Ok(("a".to_string(), "b=c".to_string()))
        );
        assert_eq!(parse_query_pair("empty="), Ok(("empty".into(), String::new())));
        assert!(parse_query_pair("=x").is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
