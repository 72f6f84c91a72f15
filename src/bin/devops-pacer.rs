use std::io::{self, Write};
use std::process::ExitCode as ProcessExitCode;

use anyhow::Context;
use clap::Parser;
use futures::TryStreamExt;
use tracing::{debug, error};

use devops_pacer::{
    Args, AzureDevOpsClient, Config, PacerResult,
    api::{Idempotency, OperationDescriptor},
    core::{ContinuationStyle, ExitCode},
    logging::{self, LogConfig},
    models::{CheckArgs, Commands, ListArgs, RequestArgs, SharedArgs},
};

fn client_for(shared: &SharedArgs) -> PacerResult<AzureDevOpsClient> {
    let config = Config::load(shared)?.resolve()?;
    debug!(organization_url = %config.organization_url, "configuration resolved");
    Ok(AzureDevOpsClient::from_config(&config)?)
}

fn with_query(mut operation: OperationDescriptor, query: &[(String, String)]) -> OperationDescriptor {
    for (name, value) in query {
        operation.set_query(name.as_str(), value.as_str());
    }
    operation
}

async fn run_request(args: RequestArgs) -> PacerResult<()> {
    let client = client_for(&args.shared)?;

    let mut operation = with_query(OperationDescriptor::new(args.method, args.path), &args.query);
    if let Some(body) = args.body {
        operation = operation.with_body(body);
    }
    if args.non_idempotent {
        operation = operation.with_idempotency(Idempotency::NonRetryable);
    } else if args.idempotent {
        operation = operation.with_idempotency(Idempotency::Retryable);
    }

    let response = client.execute(&operation).await?;
    let rendered =
        serde_json::to_string_pretty(&response.payload).context("Failed to render response")?;
    writeln!(io::stdout().lock(), "{rendered}").context("Failed to write to stdout")?;
    Ok(())
}

async fn run_list(args: ListArgs) -> PacerResult<()> {
    let client = client_for(&args.shared)?;

    let template = match args.body {
        Some(body) => {
            OperationDescriptor::post(args.path, body).with_idempotency(Idempotency::Retryable)
        }
        None => OperationDescriptor::get(args.path),
    };
    let style = match args.body_token {
        Some(field) => ContinuationStyle::BodyField(field),
        None if args.offset => ContinuationStyle::Offset,
        None => ContinuationStyle::default(),
    };
    let mut request = client
        .page_request(with_query(template, &args.query))
        .with_style(style);
    if let Some(max) = args.max_pages {
        request = request.with_max_pages(max);
    }
    if let Some(token) = args.start_token {
        request = request.with_start_token(token);
    }

    let mut pages = client.pages(request);
    let mut resume_token: Option<String> = None;
    let mut out = io::stdout().lock();
    loop {
        match pages.try_next().await {
            Ok(Some(page)) => {
                for item in &page.items {
                    let line = serde_json::to_string(item).context("Failed to render record")?;
                    writeln!(out, "{line}").context("Failed to write to stdout")?;
                }
                resume_token = page.continuation_token;
            }
            Ok(None) => return Ok(()),
            Err(err) => {
                if let Some(token) = &resume_token {
                    eprintln!("Listing stopped early; resume with --start-token {token}");
                }
                return Err(err.into());
            }
        }
    }
}

async fn run_check(args: CheckArgs) -> PacerResult<()> {
    let config = Config::load(&args.shared)?;
    println!("Effective configuration:");
    for (name, value, source) in config.describe() {
        println!("  {name:<20} {value:<32} ({source})");
    }

    let resolved = config.resolve()?;
    let client = AzureDevOpsClient::from_config(&resolved)?;
    client.test_connection().await?;
    println!("\nConnected to {}", resolved.organization_url);

    let status = serde_json::to_string_pretty(&client.rate_limit_status())
        .context("Failed to render limiter status")?;
    println!("Rate limiter: {status}");

    let stats = serde_json::to_string_pretty(&client.request_stats())
        .context("Failed to render request stats")?;
    println!("Recent requests: {stats}");
    Ok(())
}

fn run_init_config() -> PacerResult<()> {
    let (path, created) = Config::create_sample_config()?;
    if created {
        println!("Sample config created at: {}", path.display());
    } else {
        println!("Config already exists at: {}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ProcessExitCode {
    let raw_args: Vec<String> = std::env::args().collect();
    let log_config = logging::parse_early_log_config(&raw_args);
    let args = Args::parse();

    // Flags parsed by clap override the early scan for anything it missed.
    let log_config = LogConfig {
        level: args.log_level.or(log_config.level),
        file: args.log_file.clone().or(log_config.file),
        format: args.log_format.unwrap_or(log_config.format),
    };
    let _guard = match logging::init_logging(log_config) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ExitCode::Configuration.into();
        }
    };

    let result = match args.command {
        Commands::Request(args) => run_request(args).await,
        Commands::List(args) => run_list(args).await,
        Commands::Check(args) => run_check(args).await,
        Commands::InitConfig => run_init_config(),
    };

    match result {
        Ok(()) => ExitCode::Success.into(),
        Err(err) => {
            let code = ExitCode::from(&err);
            error!(%err, exit_code = code.code(), "command failed");
            eprintln!("Error: {err}");
            code.into()
        }
    }
}
