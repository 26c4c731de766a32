use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use colored::Colorize;

use regbrowse::models::{
    DeleteResult, ImageDetails, PlatformDescriptor, Repository, SearchHistoryEntry, Tag,
};
use regbrowse::search::GlobalSearchResults;

/// Human-readable size using 1024-based units.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}

pub fn format_date(dt: Option<DateTime<Utc>>) -> String {
    match dt {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "unknown".to_string(),
    }
}

pub fn truncate_digest(digest: &str) -> &str {
    match digest.char_indices().nth(19) {
        Some((end, _)) => &digest[..end],
        None => digest,
    }
}

pub fn pull_command(host: &str, repo: &str, tag: &str) -> String {
    format!("docker pull {}/{}:{}", host, repo, tag)
}

fn size_or_dash(size: Option<u64>) -> String {
    size.map(format_bytes).unwrap_or_else(|| "-".to_string())
}

pub fn print_repositories(repos: &[Repository]) {
    if repos.is_empty() {
        println!("{}", "Registry has no matching repositories.".dimmed());
        return;
    }
    for repo in repos {
        let star = if repo.is_favorite {
            "★".yellow().to_string()
        } else {
            " ".to_string()
        };
        let tags = repo
            .tag_count
            .map(|n| format!("{} tags", n))
            .unwrap_or_default();
        println!(
            "{} {:<40} {:>10} {:>12} {}",
            star,
            repo.name.bold(),
            tags,
            size_or_dash(repo.total_size),
            repo.last_modified
                .map(|d| format_date(Some(d)))
                .unwrap_or_default()
                .dimmed(),
        );
    }
    println!("\n{} repositories.", repos.len());
}

pub fn print_tags(repo: &str, tags: &[Tag]) {
    println!("\nRepository: {}", repo.bold());
    println!("{}", "─".repeat(60));
    if tags.is_empty() {
        println!("  {}", "No tags.".dimmed());
        return;
    }
    for tag in tags {
        match &tag.details {
            Some(details) => println!(
                "  {:<30} {:>12} {:<14} {}",
                tag.name,
                format_bytes(details.size),
                format!("{}/{}", details.os, details.architecture),
                format_date(tag.timestamp()).dimmed(),
            ),
            None => println!("  {}", tag.name),
        }
    }
    println!("\n{} tags.", tags.len());
}

pub fn print_details(host: &str, repo: &str, reference: &str, details: &ImageDetails) {
    println!("\n{}:{}", repo.bold(), reference.bold());
    println!("{}", "─".repeat(60));
    println!("  {:<14} {}", "Config digest", details.digest);
    println!("  {:<14} {}", "Media type", details.media_type);
    println!("  {:<14} {}", "Size", format_bytes(details.size));
    println!("  {:<14} {}", "Created", format_date(details.created));
    println!("  {:<14} {}/{}", "Platform", details.os, details.architecture);
    if let Some(workdir) = &details.config.working_dir {
        println!("  {:<14} {}", "Workdir", workdir);
    }
    if let Some(entrypoint) = &details.config.entrypoint {
        println!("  {:<14} {}", "Entrypoint", entrypoint.join(" "));
    }
    if let Some(cmd) = &details.config.cmd {
        println!("  {:<14} {}", "Cmd", cmd.join(" "));
    }
    if let Some(env) = &details.config.env {
        println!("  {}", "Env".bold());
        for var in env {
            println!("    {}", var);
        }
    }
    if let Some(labels) = &details.config.labels {
        println!("  {}", "Labels".bold());
        let sorted: BTreeSet<_> = labels.iter().collect();
        for (k, v) in sorted {
            println!("    {}={}", k, v);
        }
    }
    println!("  {} ({}):", "Layers".bold(), details.layers.len());
    for layer in &details.layers {
        println!(
            "    {} {:>12} {}",
            truncate_digest(&layer.digest),
            format_bytes(layer.size),
            layer.media_type.dimmed()
        );
    }
    println!("\n  {}", pull_command(host, repo, reference).cyan());
}

pub fn print_platforms(repo: &str, reference: &str, platforms: &[PlatformDescriptor]) {
    if platforms.is_empty() {
        println!(
            "{}:{} is a single-platform image.",
            repo.bold(),
            reference.bold()
        );
        return;
    }
    println!("\n{}:{}", repo.bold(), reference.bold());
    println!("{}", "─".repeat(60));
    for p in platforms {
        let platform = match &p.platform {
            Some(pl) => match &pl.variant {
                Some(v) => format!("{}/{}/{}", pl.os, pl.architecture, v),
                None => format!("{}/{}", pl.os, pl.architecture),
            },
            None => "unknown".to_string(),
        };
        println!(
            "  {:<24} {} {}",
            platform,
            truncate_digest(&p.digest).dimmed(),
            size_or_dash(p.size)
        );
    }
}

pub fn print_delete_result(result: &DeleteResult) {
    if result.success() {
        println!("{} {}", "DELETED".red().bold(), result.message());
        println!(
            "\n{} Run registry garbage collection to reclaim disk space:",
            "REMINDER:".yellow().bold()
        );
        println!("  docker exec <registry-container> bin/registry garbage-collect /etc/docker/registry/config.yml");
    } else {
        println!("{} {}", "FAILED".red().bold(), result.message());
    }
}

pub fn print_delete_preview(item: &str, digest: Option<&str>, last_tag: bool) {
    println!(
        " {} Would delete {}{}",
        "DRY RUN".yellow().bold(),
        item.bold(),
        digest
            .map(|d| format!(" ({})", truncate_digest(d)))
            .unwrap_or_default()
    );
    if last_tag {
        println!(
            "  {}",
            "This is the repository's last tag; the repository will be left empty.".yellow()
        );
    }
    println!("  Re-run with --yes to delete.");
}

pub fn print_search_results(query: &str, results: &GlobalSearchResults) {
    println!("\nResults for '{}':", query.bold());
    println!("  {} ({}):", "Repositories".bold(), results.repositories.len());
    for repo in &results.repositories {
        println!("    {}", repo.name);
    }
    println!("  {} ({}):", "Tags".bold(), results.tags.len());
    for m in &results.tags {
        println!("    {}:{}", m.repository, m.tag.name);
    }
}

pub fn print_favorites(favorites: &BTreeSet<String>) {
    if favorites.is_empty() {
        println!("{}", "No favourites yet.".dimmed());
        return;
    }
    for name in favorites {
        println!("{} {}", "★".yellow(), name);
    }
}

pub fn print_history(history: &[SearchHistoryEntry]) {
    if history.is_empty() {
        println!("{}", "No searches recorded.".dimmed());
        return;
    }
    for entry in history {
        println!(
            "  {:<30} {:>4} results  {}",
            entry.query,
            entry.results,
            format_date(Some(entry.timestamp)).dimmed()
        );
    }
}
