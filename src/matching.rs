//! Photo discovery and record to photo pairing.

use anyhow::{Context, Result};
use clap::ValueEnum;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};
use walkdir::WalkDir;

use crate::identity::IdentityRecord;
use crate::utils::{has_valid_extension, sanitize_key};

pub const DEFAULT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "webp"];

/// How photos are paired with identity records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum MatchStrategy {
    /// File stem equals the record key
    #[value(name = "by-key")]
    ByKey,
    /// File stem contains the record's match column value as a whole token
    #[value(name = "by-column")]
    ByColumn,
    /// Sorted photos are paired with records in row order
    #[value(name = "by-order")]
    ByOrder,
    /// Best name similarity: the photo whose file name contains the most of the
    /// record's name parts wins; each photo is used once
    #[value(name = "by-name")]
    ByName,
}

/// Find image files below `dir`, sorted by path.
pub fn discover_images(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut image_files = Vec::new();

    let walker = WalkDir::new(dir).follow_links(false).max_depth(10);
    for entry in walker {
        let entry = entry.context("Failed to read directory entry")?;
        let path = entry.path();

        if path.is_file() && has_valid_extension(path, extensions) {
            image_files.push(path.to_path_buf());
        }
    }

    image_files.sort();
    tracing::debug!("found {} image files under {}", image_files.len(), dir.display());
    Ok(image_files)
}

#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    /// Matched pairs, in record order.
    pub pairs: Vec<(IdentityRecord, PathBuf)>,
    pub unmatched_records: Vec<IdentityRecord>,
    pub unmatched_photos: Vec<PathBuf>,
    /// Records whose rule matched more than one photo; none of those photos is used for them.
    pub ambiguous: Vec<(IdentityRecord, Vec<PathBuf>)>,
}

impl MatchReport {
    pub fn is_complete(&self) -> bool {
        self.unmatched_records.is_empty() && self.unmatched_photos.is_empty() && self.ambiguous.is_empty()
    }
}

/// Pair records with photos. Every record and photo ends up in exactly one bucket.
pub fn match_photos(
    records: &[IdentityRecord],
    photos: &[PathBuf],
    strategy: MatchStrategy,
) -> Result<MatchReport> {
    let mut report = MatchReport::default();

    if strategy == MatchStrategy::ByOrder {
        let mut sorted = photos.to_vec();
        sorted.sort();
        let mut remaining = sorted.into_iter();
        for record in records {
            match remaining.next() {
                Some(photo) => report.pairs.push((record.clone(), photo)),
                None => report.unmatched_records.push(record.clone()),
            }
        }
        report.unmatched_photos.extend(remaining);
        return Ok(report);
    }
    if strategy == MatchStrategy::ByName {
        return Ok(match_by_name(records, photos));
    }

    let stems: Vec<String> = photos.iter().map(|p| file_stem(p)).collect();
    let mut used = vec![false; photos.len()];

    // Index stems once for exact key lookup
    let mut by_stem: HashMap<String, Vec<usize>> = HashMap::new();
    if strategy == MatchStrategy::ByKey {
        for (i, stem) in stems.iter().enumerate() {
            by_stem
                .entry(sanitize_key(stem, "_").to_lowercase())
                .or_default()
                .push(i);
        }
    }

    for record in records {
        let candidates: Vec<usize> = match strategy {
            MatchStrategy::ByKey => by_stem
                .get(&record.key.to_lowercase())
                .cloned()
                .unwrap_or_default(),
            MatchStrategy::ByColumn => match &record.match_token {
                Some(token) => {
                    let pattern = token_pattern(token)?;
                    stems
                        .iter()
                        .enumerate()
                        .filter(|(_, stem)| pattern.is_match(stem))
                        .map(|(i, _)| i)
                        .collect()
                }
                None => Vec::new(),
            },
            MatchStrategy::ByOrder | MatchStrategy::ByName => unreachable!("handled above"),
        };

        match candidates.as_slice() {
            [] => report.unmatched_records.push(record.clone()),
            [only] => {
                if used[*only] {
                    report
                        .ambiguous
                        .push((record.clone(), vec![photos[*only].clone()]));
                } else {
                    used[*only] = true;
                    report.pairs.push((record.clone(), photos[*only].clone()));
                }
            }
            many => report.ambiguous.push((
                record.clone(),
                many.iter().map(|&i| photos[i].clone()).collect(),
            )),
        }
    }

    report.unmatched_photos = photos
        .iter()
        .zip(&used)
        .filter(|(_, used)| !**used)
        .map(|(p, _)| p.clone())
        .collect();

    Ok(report)
}

/// Greedy in record order: each record takes the unused photo with the highest
/// name score, ties going to the earlier photo. A zero score is no match.
fn match_by_name(records: &[IdentityRecord], photos: &[PathBuf]) -> MatchReport {
    let mut report = MatchReport::default();
    let stems: Vec<String> = photos.iter().map(|p| normalized_stem(p)).collect();
    let mut used = vec![false; photos.len()];

    for record in records {
        let terms = name_terms(record);
        let mut best: Option<(usize, usize)> = None;
        for (i, stem) in stems.iter().enumerate() {
            if used[i] {
                continue;
            }
            let score = name_score(stem, &terms);
            if score > 0 && best.map_or(true, |(_, top)| score > top) {
                best = Some((i, score));
            }
        }

        match best {
            Some((i, score)) => {
                tracing::debug!(
                    "'{}' matched {} (score {})",
                    record.key,
                    photos[i].display(),
                    score
                );
                used[i] = true;
                report.pairs.push((record.clone(), photos[i].clone()));
            }
            None => report.unmatched_records.push(record.clone()),
        }
    }

    report.unmatched_photos = photos
        .iter()
        .zip(&used)
        .filter(|(_, used)| !**used)
        .map(|(p, _)| p.clone())
        .collect();
    report
}

/// Lower-cased naming values, both full-name orders, and the match token.
fn name_terms(record: &IdentityRecord) -> Vec<String> {
    let values: Vec<String> = record
        .naming_values
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect();

    let mut terms = values.clone();
    if values.len() > 1 {
        terms.push(values.join(" "));
        let reversed: Vec<&str> = values.iter().rev().map(String::as_str).collect();
        terms.push(reversed.join(" "));
    }
    if let Some(token) = &record.match_token {
        let token = token.trim().to_lowercase();
        if !token.is_empty() {
            terms.push(token);
        }
    }
    terms
}

/// Sum of the lengths of the terms found in `stem`.
fn name_score(stem: &str, terms: &[String]) -> usize {
    terms
        .iter()
        .filter(|term| stem.contains(term.as_str()))
        .map(|term| term.chars().count())
        .sum()
}

/// Lower-cased stem with `_`, `-` and `.` read as spaces.
fn normalized_stem(path: &Path) -> String {
    file_stem(path)
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, '_' | '-' | '.') { ' ' } else { c })
        .collect()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Token surrounded by non-alphanumerics, so "12" does not match "1234".
fn token_pattern(token: &str) -> Result<Regex> {
    let pattern = format!(
        r"(?i)(?:^|[^\p{{L}}\p{{N}}]){}(?:$|[^\p{{L}}\p{{N}}])",
        regex::escape(token.trim())
    );
    Regex::new(&pattern).with_context(|| format!("Invalid match token '{}'", token))
}
