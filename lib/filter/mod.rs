//! The tag filter: a pure function deciding which tags a rule copies, per the
//! exclude → include → sort-by-recency → keep-latest-N pipeline.

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::model::TagFilter;
use crate::ReplicoreResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One candidate tag, paired with the timestamp used for `keep_latest` ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCandidate {
    /// The tag name.
    pub tag: String,
    /// When the tag's manifest was last updated, used only for `keep_latest` ordering.
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Applies `filter` to `candidates`, returning the surviving tag names in the order
/// they should be processed.
///
/// 1. Drop any tag matching an exclude pattern.
/// 2. Keep only tags matching an include pattern, or all of them if no include
///    patterns were given.
/// 3. Sort survivors by `updated_at` descending, breaking ties by tag name
///    descending for deterministic output.
/// 4. If `keep_latest` is positive, truncate to that many.
pub fn apply(filter: &TagFilter, candidates: Vec<TagCandidate>) -> ReplicoreResult<Vec<String>> {
    let exclude: Vec<Regex> = filter
        .exclude
        .iter()
        .map(|p| Regex::new(p))
        .collect::<Result<_, _>>()?;
    let include: Vec<Regex> = filter
        .include
        .iter()
        .map(|p| Regex::new(p))
        .collect::<Result<_, _>>()?;

    let mut survivors: Vec<TagCandidate> = candidates
        .into_iter()
        .filter(|c| !exclude.iter().any(|re| re.is_match(&c.tag)))
        .filter(|c| include.is_empty() || include.iter().any(|re| re.is_match(&c.tag)))
        .collect();

    survivors.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.tag.cmp(&a.tag)));

    if filter.keep_latest > 0 {
        survivors.truncate(filter.keep_latest as usize);
    }

    crate::Ok(survivors.into_iter().map(|c| c.tag).collect())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
