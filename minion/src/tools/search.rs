//! Tool search strategies: keyword substring, regex, and a small BM25 index.
//!
//! Search operates on lightweight [`ToolInfo`] records only, so no tool is
//! instantiated. Ranking ties are broken by name ascending.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ToolInfo;

/// Search strategy selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    /// Case-insensitive substring over name + description.
    #[default]
    Keyword,
    /// Compiled regex over name + description.
    Regex,
    /// BM25 over tokenized name + description + category; falls back to
    /// keyword when the query produces no usable tokens.
    Bm25,
}

impl std::str::FromStr for SearchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keyword" => Ok(SearchStrategy::Keyword),
            "regex" => Ok(SearchStrategy::Regex),
            "bm25" => Ok(SearchStrategy::Bm25),
            _ => Err(format!(
                "unknown search strategy: {s} (use keyword, regex, or bm25)"
            )),
        }
    }
}

/// Searches `infos` with the given strategy; `category` filters first,
/// `top_k` truncates after ranking.
pub fn search_tools(
    infos: &[ToolInfo],
    query: &str,
    strategy: SearchStrategy,
    top_k: usize,
    category: Option<&str>,
) -> Vec<ToolInfo> {
    let filtered: Vec<&ToolInfo> = infos
        .iter()
        .filter(|i| category.map(|c| i.category == c).unwrap_or(true))
        .collect();

    let mut scored: Vec<(f64, &ToolInfo)> = match strategy {
        SearchStrategy::Keyword => keyword_scores(&filtered, query),
        SearchStrategy::Regex => regex_scores(&filtered, query),
        SearchStrategy::Bm25 => {
            let tokens = tokenize(query);
            if tokens.is_empty() {
                debug!("bm25 query produced no tokens, falling back to keyword");
                keyword_scores(&filtered, query)
            } else {
                bm25_scores(&filtered, &tokens)
            }
        }
    };

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.name.cmp(&b.1.name))
    });
    scored
        .into_iter()
        .take(top_k)
        .map(|(_, info)| info.clone())
        .collect()
}

fn keyword_scores<'a>(infos: &[&'a ToolInfo], query: &str) -> Vec<(f64, &'a ToolInfo)> {
    let q = query.to_lowercase();
    infos
        .iter()
        .filter_map(|info| {
            let in_name = info.name.to_lowercase().contains(&q);
            let in_desc = info.description.to_lowercase().contains(&q);
            if !in_name && !in_desc {
                return None;
            }
            // Name matches outrank description-only matches.
            let score = if in_name { 2.0 } else { 1.0 };
            Some((score, *info))
        })
        .collect()
}

fn regex_scores<'a>(infos: &[&'a ToolInfo], pattern: &str) -> Vec<(f64, &'a ToolInfo)> {
    let re = match regex::Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => {
            debug!(error = %e, "invalid search regex, no matches");
            return Vec::new();
        }
    };
    infos
        .iter()
        .filter_map(|info| {
            let in_name = re.is_match(&info.name);
            let in_desc = re.is_match(&info.description);
            if !in_name && !in_desc {
                return None;
            }
            let score = if in_name { 2.0 } else { 1.0 };
            Some((score, *info))
        })
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// BM25 with the usual constants (k1 = 1.5, b = 0.75) over one document per
/// tool: name + description + category.
fn bm25_scores<'a>(infos: &[&'a ToolInfo], query_tokens: &[String]) -> Vec<(f64, &'a ToolInfo)> {
    const K1: f64 = 1.5;
    const B: f64 = 0.75;

    let docs: Vec<Vec<String>> = infos
        .iter()
        .map(|i| tokenize(&format!("{} {} {}", i.name, i.description, i.category)))
        .collect();
    let n = docs.len();
    if n == 0 {
        return Vec::new();
    }
    let avg_len = docs.iter().map(Vec::len).sum::<usize>() as f64 / n as f64;

    // Document frequency per query token.
    let mut df: HashMap<&str, usize> = HashMap::new();
    for token in query_tokens {
        let count = docs.iter().filter(|d| d.iter().any(|t| t == token)).count();
        df.insert(token.as_str(), count);
    }

    infos
        .iter()
        .zip(docs.iter())
        .filter_map(|(info, doc)| {
            let mut score = 0.0;
            for token in query_tokens {
                let tf = doc.iter().filter(|t| *t == token).count() as f64;
                if tf == 0.0 {
                    continue;
                }
                let dfi = df[token.as_str()] as f64;
                let idf = ((n as f64 - dfi + 0.5) / (dfi + 0.5) + 1.0).ln();
                let denom = tf + K1 * (1.0 - B + B * doc.len() as f64 / avg_len.max(1.0));
                score += idf * tf * (K1 + 1.0) / denom;
            }
            (score > 0.0).then_some((score, *info))
        })
        .collect()
}
