use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Args, Parser, Subcommand};

use regbrowse::config::{DEFAULT_REGISTRY_HOST, DEFAULT_REGISTRY_PROTOCOL, DEFAULT_STATE_DIR};
use regbrowse::error::AppError;
use regbrowse::models::{SearchFilter, SortDirection, SortField, SortOption};
use regbrowse::search;

/// regbrowse: browse, inspect and delete images in a Docker/OCI registry
#[derive(Parser, Debug)]
#[command(name = "regbrowse", version, about)]
pub struct Cli {
    /// Registry URL (e.g., http://localhost:5000); overrides --protocol/--host
    #[arg(long, env = "REGBROWSE_REGISTRY", global = true)]
    pub registry: Option<String>,

    /// Registry host and port
    #[arg(long, env = "REGISTRY_HOST", default_value = DEFAULT_REGISTRY_HOST, global = true)]
    pub host: String,

    /// Registry protocol
    #[arg(
        long,
        env = "REGISTRY_PROTOCOL",
        default_value = DEFAULT_REGISTRY_PROTOCOL,
        value_parser = ["http", "https"],
        global = true
    )]
    pub protocol: String,

    /// Path prefix of a relay in front of the registry (e.g., /api)
    #[arg(long, env = "REGISTRY_BASE_PATH", global = true)]
    pub base_path: Option<String>,

    /// Timeout for registry requests, in seconds
    #[arg(long, default_value_t = 30, global = true)]
    pub timeout: u64,

    /// Timeout for the liveness probe, in seconds
    #[arg(long, default_value_t = 10, global = true)]
    pub probe_timeout: u64,

    /// Directory holding favourites and search history
    #[arg(long, env = "REGBROWSE_STATE_DIR", default_value = DEFAULT_STATE_DIR, global = true)]
    pub state_dir: PathBuf,

    /// Print results as JSON
    #[arg(long, default_value_t = false, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(short, long, default_value_t = false, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that the registry answers
    Ping,
    /// List repositories
    Repos(RepoArgs),
    /// List tags of a repository
    Tags(TagArgs),
    /// Show resolved image details for a tag or digest
    Inspect { repo: String, reference: String },
    /// List the platforms of a multi-platform tag
    Platforms { repo: String, reference: String },
    /// Delete a tag (deletes the manifest it points to)
    DeleteTag {
        repo: String,
        tag: String,
        /// Actually delete; without this only a preview is printed
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    /// Delete every tag of a repository
    DeleteRepo {
        repo: String,
        /// Actually delete; without this only a preview is printed
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    /// Search repository and tag names
    Search { query: String },
    /// Toggle a repository favourite
    Favorite { repo: String },
    /// List favourite repositories
    Favorites,
    /// Show recent searches
    History {
        /// Forget all recorded searches
        #[arg(long, default_value_t = false)]
        clear: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct FilterArgs {
    /// Name contains (case-insensitive)
    #[arg(long)]
    pub name: Option<String>,

    /// Minimum size in MiB
    #[arg(long)]
    pub min_size_mb: Option<u64>,

    /// Maximum size in MiB
    #[arg(long)]
    pub max_size_mb: Option<u64>,

    /// Modified on or after (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub since: Option<String>,

    /// Modified on or before (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub until: Option<String>,

    /// Architecture (tags only)
    #[arg(long)]
    pub arch: Option<String>,

    /// Operating system (tags only)
    #[arg(long)]
    pub os: Option<String>,

    /// Preset filter: large, recent, linux-amd64
    #[arg(long, conflicts_with_all = ["name", "min_size_mb", "max_size_mb", "since", "until", "arch", "os"])]
    pub quick: Option<String>,
}

impl FilterArgs {
    pub fn to_filter(&self) -> Result<SearchFilter, AppError> {
        if let Some(key) = &self.quick {
            return search::quick_filter(key)
                .map(|q| q.filter)
                .ok_or_else(|| AppError::UnknownQuickFilter(key.clone()));
        }
        const MIB: u64 = 1024 * 1024;
        Ok(SearchFilter {
            name: self.name.clone(),
            min_size: self.min_size_mb.map(|m| m.saturating_mul(MIB)),
            max_size: self.max_size_mb.map(|m| m.saturating_mul(MIB)),
            date_from: self.since.as_deref().map(|s| parse_date(s, false)).transpose()?,
            date_to: self.until.as_deref().map(|s| parse_date(s, true)).transpose()?,
            architecture: self.arch.clone(),
            os: self.os.clone(),
        })
    }
}

/// A bare date means the start of that day, or its end when `end_of_day`.
fn parse_date(s: &str, end_of_day: bool) -> Result<DateTime<Utc>, AppError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date =
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| AppError::InvalidDate(s.to_string()))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| AppError::InvalidDate(s.to_string()))?;
    Ok(date.and_time(time).and_utc())
}

#[derive(Args, Debug)]
pub struct SortArgs {
    /// Sort field
    #[arg(long, value_enum, default_value_t = SortField::Name)]
    pub sort: SortField,

    /// Sort descending
    #[arg(long, default_value_t = false)]
    pub desc: bool,
}

impl SortArgs {
    pub fn to_option(&self) -> SortOption {
        let direction = if self.desc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        SortOption::new(self.sort, direction)
    }
}

#[derive(Args, Debug)]
pub struct RepoArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub sort: SortArgs,

    /// Resolve every tag to fill in tag count, total size and last modified
    #[arg(long, default_value_t = false)]
    pub summarize: bool,

    /// Only show favourite repositories
    #[arg(long, default_value_t = false)]
    pub favorites: bool,
}

#[derive(Args, Debug)]
pub struct TagArgs {
    pub repo: String,

    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub sort: SortArgs,

    /// Only show tags matching this regex
    #[arg(long)]
    pub pattern: Option<String>,

    /// Resolve every tag to show size, platform and creation time
    #[arg(long, default_value_t = false)]
    pub details: bool,
}
