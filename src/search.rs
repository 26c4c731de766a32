//! Filtering, sorting and searching over already-fetched repositories and tags.
//!
//! Nothing here performs I/O or fails: missing data is never a reason to
//! exclude an item, and comparators are total over every input.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Serialize;

use crate::models::{Repository, SearchFilter, SortDirection, SortField, SortOption, Tag};

const MIB: u64 = 1024 * 1024;

/// `v?MAJOR.MINOR.PATCH(-PRERELEASE)?`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version<'a> {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<&'a str>,
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)(?:-(.+))?$").expect("version regex is valid")
    })
}

pub fn parse_version(name: &str) -> Option<Version<'_>> {
    let caps = version_regex().captures(name)?;
    Some(Version {
        major: caps[1].parse().ok()?,
        minor: caps[2].parse().ok()?,
        patch: caps[3].parse().ok()?,
        prerelease: caps.get(4).map(|m| m.as_str()),
    })
}

/// Semantic-version comparison. A release sorts after any prerelease of the
/// same version; prereleases compare lexicographically. Names that are not
/// versions sort after versions and equal to each other.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(va), Some(vb)) => (va.major, va.minor, va.patch)
            .cmp(&(vb.major, vb.minor, vb.patch))
            .then_with(|| match (va.prerelease, vb.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(pa), Some(pb)) => pa.cmp(pb),
            }),
    }
}

/// Case-insensitive comparison where runs of digits compare by numeric value,
/// so "image9" < "image10".
pub fn compare_natural(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();
    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
                let na = take_digits(&mut ai);
                let nb = take_digits(&mut bi);
                let ord = compare_digit_runs(&na, &nb);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(ca), Some(cb)) => {
                let ord = ca.to_lowercase().cmp(cb.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                ai.next();
                bi.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied().filter(|c| c.is_ascii_digit()) {
        run.push(c);
        chars.next();
    }
    run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Tag name ordering: semantic versions when both names parse, otherwise
/// natural string order. Equal versions ("v1.0.0" vs "1.0.0") fall through
/// to the string order.
pub fn compare_tag_names(a: &str, b: &str) -> Ordering {
    if parse_version(a).is_some() && parse_version(b).is_some() {
        compare_versions(a, b).then_with(|| compare_natural(a, b))
    } else {
        compare_natural(a, b)
    }
}

fn apply_direction(ord: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    }
}

fn epoch_millis(ts: Option<DateTime<Utc>>) -> i64 {
    ts.map(|t| t.timestamp_millis()).unwrap_or(0)
}

/// Stable merge sort. Unlike `slice::sort_by` it tolerates comparators that
/// are not a strict total order, which mixed version/non-version tag names
/// can produce.
fn stable_sort_by<T, F>(items: Vec<T>, cmp: &mut F) -> Vec<T>
where
    F: FnMut(&T, &T) -> Ordering,
{
    if items.len() <= 1 {
        return items;
    }
    let mut left = items;
    let right = left.split_off(left.len() / 2);
    let left = stable_sort_by(left, cmp);
    let right = stable_sort_by(right, cmp);

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut l = left.into_iter().peekable();
    let mut r = right.into_iter().peekable();
    loop {
        match (l.peek(), r.peek()) {
            (Some(a), Some(b)) => {
                if cmp(b, a) == Ordering::Less {
                    merged.extend(r.next());
                } else {
                    merged.extend(l.next());
                }
            }
            (Some(_), None) => {
                merged.extend(l);
                break;
            }
            (None, _) => {
                merged.extend(r);
                break;
            }
        }
    }
    merged
}

pub fn sort_repositories(repos: &[Repository], sort: SortOption) -> Vec<Repository> {
    stable_sort_by(repos.to_vec(), &mut |a: &Repository, b: &Repository| {
        let ord = match sort.field {
            SortField::Name => compare_natural(&a.name, &b.name),
            SortField::Size => a.total_size.unwrap_or(0).cmp(&b.total_size.unwrap_or(0)),
            SortField::Created | SortField::Modified => {
                epoch_millis(a.last_modified).cmp(&epoch_millis(b.last_modified))
            }
        };
        apply_direction(ord, sort.direction)
    })
}

pub fn sort_tags(tags: &[Tag], sort: SortOption) -> Vec<Tag> {
    stable_sort_by(tags.to_vec(), &mut |a: &Tag, b: &Tag| {
        let ord = match sort.field {
            SortField::Name => compare_tag_names(&a.name, &b.name),
            SortField::Size => tag_size(a).unwrap_or(0).cmp(&tag_size(b).unwrap_or(0)),
            SortField::Created | SortField::Modified => {
                epoch_millis(a.timestamp()).cmp(&epoch_millis(b.timestamp()))
            }
        };
        apply_direction(ord, sort.direction)
    })
}

fn tag_size(tag: &Tag) -> Option<u64> {
    tag.size.or_else(|| tag.details.as_ref().map(|d| d.size))
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// `value` passes unless both it and the bound are known and it falls outside.
fn within<T: PartialOrd>(value: Option<T>, min: Option<T>, max: Option<T>) -> bool {
    match value {
        None => true,
        Some(v) => {
            min.as_ref().map_or(true, |m| v >= *m) && max.as_ref().map_or(true, |m| v <= *m)
        }
    }
}

fn matches_exact(value: Option<&str>, wanted: Option<&str>) -> bool {
    match (value, wanted) {
        (Some(v), Some(w)) => v.eq_ignore_ascii_case(w),
        _ => true,
    }
}

/// Repositories matching every set criterion. Criteria the repository has no
/// data for (size, date, platform) never exclude it.
pub fn filter_repositories(repos: &[Repository], filter: &SearchFilter) -> Vec<Repository> {
    repos
        .iter()
        .filter(|repo| {
            filter
                .name
                .as_deref()
                .map_or(true, |n| contains_ignore_case(&repo.name, n))
                && within(repo.total_size, filter.min_size, filter.max_size)
                && within(repo.last_modified, filter.date_from, filter.date_to)
        })
        .cloned()
        .collect()
}

/// Tags matching every set criterion, judged against the tag's details when
/// it has been inspected. Uninspected tags only face the name criterion.
pub fn filter_tags(tags: &[Tag], filter: &SearchFilter) -> Vec<Tag> {
    tags.iter()
        .filter(|tag| {
            let details = tag.details.as_ref();
            filter
                .name
                .as_deref()
                .map_or(true, |n| contains_ignore_case(&tag.name, n))
                && within(tag_size(tag), filter.min_size, filter.max_size)
                && within(tag.timestamp(), filter.date_from, filter.date_to)
                && matches_exact(
                    details.map(|d| d.architecture.as_str()),
                    filter.architecture.as_deref(),
                )
                && matches_exact(details.map(|d| d.os.as_str()), filter.os.as_deref())
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagMatch {
    pub repository: String,
    pub tag: Tag,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalSearchResults {
    pub repositories: Vec<Repository>,
    pub tags: Vec<TagMatch>,
}

impl GlobalSearchResults {
    pub fn total(&self) -> usize {
        self.repositories.len() + self.tags.len()
    }
}

/// Case-insensitive substring search over repository names and, separately,
/// over every tag name.
pub fn global_search(
    repos: &[Repository],
    tags_by_repo: &BTreeMap<String, Vec<Tag>>,
    query: &str,
) -> GlobalSearchResults {
    let repositories = repos
        .iter()
        .filter(|r| contains_ignore_case(&r.name, query))
        .cloned()
        .collect();
    let tags = tags_by_repo
        .iter()
        .flat_map(|(repo, tags)| {
            tags.iter()
                .filter(|t| contains_ignore_case(&t.name, query))
                .map(move |t| TagMatch {
                    repository: repo.clone(),
                    tag: t.clone(),
                })
        })
        .collect();
    GlobalSearchResults { repositories, tags }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuickFilter {
    /// Short identifier used on the command line.
    pub key: &'static str,
    pub name: &'static str,
    pub filter: SearchFilter,
}

pub fn quick_filters() -> Vec<QuickFilter> {
    quick_filters_at(Utc::now())
}

/// Preset filters relative to `now`. Each is a complete filter value.
pub fn quick_filters_at(now: DateTime<Utc>) -> Vec<QuickFilter> {
    vec![
        QuickFilter {
            key: "large",
            name: "Large Images (>500MB)",
            filter: SearchFilter {
                min_size: Some(500 * MIB),
                ..Default::default()
            },
        },
        QuickFilter {
            key: "recent",
            name: "Recent (Last 30 days)",
            filter: SearchFilter {
                date_from: Some(now - Duration::days(30)),
                ..Default::default()
            },
        },
        QuickFilter {
            key: "linux-amd64",
            name: "Linux AMD64",
            filter: SearchFilter {
                architecture: Some("amd64".to_string()),
                os: Some("linux".to_string()),
                ..Default::default()
            },
        },
    ]
}

pub fn quick_filter(key: &str) -> Option<QuickFilter> {
    quick_filters().into_iter().find(|q| q.key == key)
}
