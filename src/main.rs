//! contribmatch - GitHub lookups for contribution matching.
//!
//! A thin command-line front end over the GitHub client: loads the client
//! configuration, runs one lookup, and prints the result as JSON.
//!
//! ```text
//! contribmatch repo <owner/repo>
//! contribmatch issues <owner/repo> [label...]
//! contribmatch user <login>
//! contribmatch search <query>
//! contribmatch rate-limit
//! ```

use anyhow::{Context, bail};
use contribmatch_config::auth::resolve_token;
use contribmatch_config::{AuthConfig, ClientConfig, RepoRef, RetryConfig};
use contribmatch_github::{GitHubClient, IssueListOptions, SearchOptions, SearchSort, SortOrder};
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Retries used when no configuration file is found.
const FALLBACK_RETRIES: u32 = 2;

const USAGE: &str = "usage: contribmatch <repo OWNER/REPO | issues OWNER/REPO [LABEL...] | user LOGIN | search QUERY | rate-limit>";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Repo(RepoRef),
    Issues(RepoRef, Vec<String>),
    User(String),
    Search(String),
    RateLimit,
}

impl Command {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        let Some((name, rest)) = args.split_first() else {
            bail!(USAGE);
        };
        let command = match (name.as_str(), rest) {
            ("repo", [repo]) => Self::Repo(RepoRef::parse_short(repo)?),
            ("issues", [repo, labels @ ..]) => {
                Self::Issues(RepoRef::parse_short(repo)?, labels.to_vec())
            }
            ("user", [login]) => Self::User(login.clone()),
            ("search", query) if !query.is_empty() => Self::Search(query.join(" ")),
            ("rate-limit", []) => Self::RateLimit,
            _ => bail!(USAGE),
        };
        Ok(command)
    }
}

/// Loads the configuration file, or falls back to a token from the
/// environment or the `gh` CLI.
async fn load_config() -> anyhow::Result<ClientConfig> {
    if let Some(config) = ClientConfig::load().context("failed to load configuration")? {
        debug!(auth = config.auth.kind(), "loaded configuration file");
        return Ok(config);
    }

    let token = resolve_token(None).await.context(
        "no configuration file found and no token available; set GITHUB_TOKEN or run `gh auth login`",
    )?;
    Ok(ClientConfig::new(
        AuthConfig::token(token.expose_secret()),
        RetryConfig::new(FALLBACK_RETRIES),
    ))
}

async fn run(client: &GitHubClient, command: Command) -> anyhow::Result<Value> {
    let value = match command {
        Command::Repo(repo) => {
            serde_json::to_value(client.get_repository(repo.owner(), repo.repo()).await?)?
        }
        Command::Issues(repo, labels) => {
            let options = IssueListOptions {
                labels,
                ..IssueListOptions::default()
            };
            serde_json::to_value(
                client
                    .list_issues(repo.owner(), repo.repo(), &options)
                    .await?,
            )?
        }
        Command::User(login) => serde_json::to_value(client.get_user(&login).await?)?,
        Command::Search(query) => {
            let options = SearchOptions::new(query).sort(SearchSort::Stars, SortOrder::Desc);
            serde_json::to_value(client.search_repositories(&options).await?)?
        }
        Command::RateLimit => serde_json::to_value(client.get_rate_limit().await?)?,
    };
    Ok(value)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;

    let config = load_config().await?;
    let client = GitHubClient::new(config).context("failed to create GitHub client")?;

    let output = run(&client, command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    let stats = client.stats();
    info!(
        network_requests = stats.network_requests,
        cache_hits = stats.cache_hits,
        "done"
    );
    Ok(())
}
