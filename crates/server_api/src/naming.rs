use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use shared::domain::BranchName;
use uuid::Uuid;

pub const BRANCH_PREFIX: &str = "device/";
const SUFFIX_LEN: usize = 8;

/// Produces the branch name for one submission attempt.
pub trait BranchNameSource: Send + Sync {
    fn branch_name(&self, slug: &str) -> BranchName;
}

/// `device/{slug}-{8 random chars}-{YYYYMMDD}` using today's UTC date.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomDatedBranchNames;

impl BranchNameSource for RandomDatedBranchNames {
    fn branch_name(&self, slug: &str) -> BranchName {
        branch_name(slug, &random_suffix(), Utc::now().date_naive())
    }
}

pub fn branch_name(slug: &str, suffix: &str, date: NaiveDate) -> BranchName {
    let slug = sanitize_slug(slug).unwrap_or_else(|| slug.trim().to_string());
    BranchName(format!(
        "{BRANCH_PREFIX}{slug}-{suffix}-{}",
        date.format("%Y%m%d")
    ))
}

pub fn random_suffix() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(SUFFIX_LEN)
        .collect()
}

/// Lower-cases the slug and keeps `[a-z0-9.-]`. `None` if nothing usable is left
/// or the result could escape its directory.
pub fn sanitize_slug(raw: &str) -> Option<String> {
    let slug: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.')
        .collect();
    if slug.is_empty() || slug.starts_with('.') || slug.contains("..") {
        return None;
    }
    Some(slug)
}

/// The trimmed slug when it is already in sanitised form. Anything that
/// [`sanitize_slug`] would rewrite is refused rather than silently renamed.
pub fn canonical_slug(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    match sanitize_slug(trimmed) {
        Some(clean) if clean == trimmed => Some(trimmed),
        _ => None,
    }
}

/// Reduces an uploaded filename to a safe basename: no directories, only
/// `[A-Za-z0-9._-]`, no leading dots.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let basename = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = basename
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches(['.', '_']);
    if cleaned.is_empty() {
        return None;
    }
    Some(cleaned.to_string())
}

/// Returns `name`, or `name` with `-2`, `-3`, ... before the extension if it was
/// already handed out.
pub fn unique_filename(name: String, used: &mut HashSet<String>) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let (stem, extension) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name.as_str(), ""),
    };
    let mut counter = 2;
    loop {
        let candidate = format!("{stem}-{counter}{extension}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

pub fn image_path(slug: &str, filename: &str) -> String {
    format!("{slug}/images/{filename}")
}

pub fn descriptor_path(slug: &str) -> String {
    format!("{slug}/device.yaml")
}

pub fn config_path(slug: &str) -> String {
    format!("{slug}/config.yaml")
}

#[cfg(test)]
#[path = "tests/naming_tests.rs"]
mod tests;
