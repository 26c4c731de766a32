mod cli;
mod output;

use std::collections::BTreeMap;
use std::process;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, RepoArgs, TagArgs};
use regbrowse::config::ClientConfig;
use regbrowse::error::{AppError, RegistryError};
use regbrowse::models::{DeleteResult, SearchFilter};
use regbrowse::registry::RegistryClient;
use regbrowse::search;
use regbrowse::state::{ClientState, FileStore};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "regbrowse=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Registry errors are shown with their user-facing message.
fn describe(e: RegistryError) -> anyhow::Error {
    anyhow!(e.user_message())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

struct App {
    client: RegistryClient,
    state: ClientState,
    config: ClientConfig,
    json: bool,
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = ClientConfig::new(
        cli.registry.as_deref(),
        &cli.protocol,
        &cli.host,
        cli.base_path.as_deref(),
    )?
    .with_timeouts(
        Duration::from_secs(cli.timeout),
        Duration::from_secs(cli.probe_timeout),
    )
    .with_state_dir(&cli.state_dir);
    debug!(base_url = %config.base_url, state_dir = %config.state_dir.display(), "configured");

    let app = App {
        client: RegistryClient::from_config(&config),
        state: ClientState::new(FileStore::new(&config.state_dir)),
        config,
        json: cli.json,
    };

    match cli.command {
        Command::Ping => app.ping().await,
        Command::Repos(args) => app.repos(&args).await,
        Command::Tags(args) => app.tags(&args).await,
        Command::Inspect { repo, reference } => app.inspect(&repo, &reference).await,
        Command::Platforms { repo, reference } => app.platforms(&repo, &reference).await,
        Command::DeleteTag { repo, tag, yes } => app.delete_tag(&repo, &tag, yes).await,
        Command::DeleteRepo { repo, yes } => app.delete_repo(&repo, yes).await,
        Command::Search { query } => app.search(&query).await,
        Command::Favorite { repo } => app.favorite(&repo),
        Command::Favorites => app.favorites(),
        Command::History { clear } => app.history(clear),
    }
}

impl App {
    async fn ping(&self) -> Result<()> {
        self.client.ping().await.map_err(describe)?;
        println!("Registry at {} is reachable.", self.client.base_url());
        Ok(())
    }

    async fn repos(&self, args: &RepoArgs) -> Result<()> {
        let filter = args.filter.to_filter()?;
        let mut repos = self
            .client
            .list_repositories()
            .await
            .map_err(describe)
            .context("Failed to fetch repositories")?;

        if args.summarize {
            for repo in repos.iter_mut() {
                match self.client.summarize_repository(&repo.name).await {
                    Ok(summary) => *repo = summary,
                    Err(e) => warn!(repository = %repo.name, error = %e, "could not summarize"),
                }
            }
        }

        self.state.annotate(&mut repos);
        if args.favorites {
            repos.retain(|r| r.is_favorite);
        }
        let repos = search::filter_repositories(&repos, &filter);
        let repos = search::sort_repositories(&repos, args.sort.to_option());

        if self.json {
            return print_json(&repos);
        }
        output::print_repositories(&repos);
        Ok(())
    }

    async fn tags(&self, args: &TagArgs) -> Result<()> {
        let filter = args.filter.to_filter()?;
        let pattern = args
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(AppError::from)?;
        // Size, date and platform criteria need resolved tags.
        let needs_details = args.details || filter != name_only(&filter);

        let tags = if needs_details {
            self.client.list_tags_with_details(&args.repo).await
        } else {
            self.client.list_tags(&args.repo).await
        }
        .map_err(describe)
        .with_context(|| format!("Failed to fetch tags for {}", args.repo))?;

        let mut tags = search::filter_tags(&tags, &filter);
        if let Some(re) = &pattern {
            tags.retain(|t| re.is_match(&t.name));
        }
        let tags = search::sort_tags(&tags, args.sort.to_option());

        if self.json {
            return print_json(&tags);
        }
        output::print_tags(&args.repo, &tags);
        Ok(())
    }

    async fn inspect(&self, repo: &str, reference: &str) -> Result<()> {
        let details = self
            .client
            .resolve(repo, reference)
            .await
            .map_err(describe)
            .with_context(|| format!("Failed to fetch image details for {}:{}", repo, reference))?;
        if self.json {
            return print_json(&details);
        }
        output::print_details(&self.config.display_host, repo, reference, &details);
        Ok(())
    }

    async fn platforms(&self, repo: &str, reference: &str) -> Result<()> {
        let platforms = self
            .client
            .list_platforms(repo, reference)
            .await
            .map_err(describe)
            .with_context(|| format!("Failed to fetch platforms for {}:{}", repo, reference))?;
        if self.json {
            return print_json(&platforms);
        }
        output::print_platforms(repo, reference, &platforms);
        Ok(())
    }

    async fn delete_tag(&self, repo: &str, tag: &str, yes: bool) -> Result<()> {
        if !yes {
            let digest = self
                .client
                .manifest_digest(repo, tag)
                .await
                .map_err(describe)?;
            let last_tag = self.client.is_last_tag(repo).await.map_err(describe)?;
            output::print_delete_preview(&format!("{}:{}", repo, tag), Some(&digest), last_tag);
            return Ok(());
        }
        let result = self.client.delete_tag(repo, tag).await;
        self.finish_delete(&result)
    }

    async fn delete_repo(&self, repo: &str, yes: bool) -> Result<()> {
        if !yes {
            let tags = self.client.list_tags(repo).await.map_err(describe)?;
            let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
            output::print_delete_preview(
                &format!("{} ({} tags: {})", repo, names.len(), names.join(", ")),
                None,
                false,
            );
            return Ok(());
        }
        let result = self.client.delete_repository(repo).await;
        self.finish_delete(&result)
    }

    fn finish_delete(&self, result: &DeleteResult) -> Result<()> {
        if self.json {
            print_json(result)?;
        } else {
            output::print_delete_result(result);
        }
        if result.success() {
            Ok(())
        } else {
            Err(anyhow!("{}", result.message()))
        }
    }

    async fn search(&self, query: &str) -> Result<()> {
        let mut repos = self
            .client
            .list_repositories()
            .await
            .map_err(describe)
            .context("Failed to fetch repositories")?;
        self.state.annotate(&mut repos);

        let mut tags_by_repo = BTreeMap::new();
        for repo in &repos {
            match self.client.list_tags(&repo.name).await {
                Ok(tags) => {
                    tags_by_repo.insert(repo.name.clone(), tags);
                }
                Err(e) => warn!(repository = %repo.name, error = %e, "skipping tags in search"),
            }
        }

        let results = search::global_search(&repos, &tags_by_repo, query);
        if !query.trim().is_empty() {
            self.state.add_search_to_history(query, results.total());
        }

        if self.json {
            return print_json(&results);
        }
        output::print_search_results(query, &results);
        Ok(())
    }

    fn favorite(&self, repo: &str) -> Result<()> {
        let now = self.state.toggle_favorite(repo);
        println!(
            "{} {} favourites.",
            repo,
            if now { "added to" } else { "removed from" }
        );
        Ok(())
    }

    fn favorites(&self) -> Result<()> {
        let favorites = self.state.favorites();
        if self.json {
            return print_json(&favorites);
        }
        output::print_favorites(&favorites);
        Ok(())
    }

    fn history(&self, clear: bool) -> Result<()> {
        if clear {
            self.state.clear_search_history();
            println!("Search history cleared.");
            return Ok(());
        }
        let history = self.state.search_history();
        if self.json {
            return print_json(&history);
        }
        output::print_history(&history);
        Ok(())
    }
}

fn name_only(filter: &SearchFilter) -> SearchFilter {
    SearchFilter {
        name: filter.name.clone(),
        ..Default::default()
    }
}
