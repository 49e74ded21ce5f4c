//! Token-set similarity scoring for conversation topics.

use std::collections::BTreeSet;

use crate::ConversationRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredRecord {
    pub record: ConversationRecord,
    pub score: u8,
}

/// Score every record's topic against `query` and order them by descending score.
///
/// Ties keep their input order. Records without a topic score 0 but are still returned.
#[must_use]
pub fn rank_topics(query: &str, records: Vec<ConversationRecord>) -> Vec<ScoredRecord> {
    let mut scored = records
        .into_iter()
        .map(|record| {
            let score = token_set_ratio(query, record.topic.as_deref().unwrap_or(""));
            ScoredRecord { record, score }
        })
        .collect::<Vec<_>>();
    scored.sort_by(|left, right| right.score.cmp(&left.score));
    scored
}

/// Order-insensitive similarity in `0..=100` built from the shared and unshared token sets.
#[must_use]
pub fn token_set_ratio(left: &str, right: &str) -> u8 {
    let left = normalize(left);
    let right = normalize(right);
    if left.is_empty() || right.is_empty() {
        return 0;
    }

    let left_tokens = left.split_whitespace().collect::<BTreeSet<_>>();
    let right_tokens = right.split_whitespace().collect::<BTreeSet<_>>();

    let shared = join_tokens(left_tokens.intersection(&right_tokens));
    let left_only = join_tokens(left_tokens.difference(&right_tokens));
    let right_only = join_tokens(right_tokens.difference(&left_tokens));

    let combined_left = format!("{shared} {left_only}").trim().to_string();
    let combined_right = format!("{shared} {right_only}").trim().to_string();

    [
        ratio(&shared, &combined_left),
        ratio(&shared, &combined_right),
        ratio(&combined_left, &combined_right),
    ]
    .into_iter()
    .max()
    .unwrap_or(0)
}

fn normalize(value: &str) -> String {
    let mut normalized = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            normalized.extend(ch.to_lowercase());
        } else {
            normalized.push(' ');
        }
    }
    normalized.trim().to_string()
}

fn join_tokens<'a>(tokens: impl Iterator<Item = &'a &'a str>) -> String {
    tokens.copied().collect::<Vec<_>>().join(" ")
}

/// Indel similarity: `2 * LCS / (|a| + |b|)` scaled to a rounded percentage.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn ratio(left: &str, right: &str) -> u8 {
    let left = left.chars().collect::<Vec<_>>();
    let right = right.chars().collect::<Vec<_>>();
    let total = left.len() + right.len();
    if total == 0 {
        return 100;
    }

    let matched = 2 * longest_common_subsequence(&left, &right);
    let percent = 100.0 * matched as f64 / total as f64;
    percent.round_ties_even().clamp(0.0, 100.0) as u8
}

fn longest_common_subsequence(left: &[char], right: &[char]) -> usize {
    let mut previous = vec![0_usize; right.len() + 1];
    let mut current = vec![0_usize; right.len() + 1];

    for left_char in left {
        for (index, right_char) in right.iter().enumerate() {
            current[index + 1] = if left_char == right_char {
                previous[index] + 1
            } else {
                current[index].max(previous[index + 1])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[right.len()]
}
