//! Tool discovery and token-budget gating.
//!
//! Discovery ranks the registry against a free-text query with a
//! deterministic token-overlap score: query tokens matched against the
//! tool name weigh 3, matches against the description weigh 1. Ties
//! break by name ascending, so two identical queries against an
//! unchanged registry always yield identical ranked lists.
//!
//! Gating runs discovery with no limit and greedily selects tools in
//! rank order while the summed estimated token cost stays within budget.
//! A tool whose own cost exceeds the budget is skipped but does not stop
//! the scan.
//!
//! Both operations read a registry snapshot and are safe to run
//! concurrently with registration.

use std::cmp::Reverse;
use std::sync::Arc;

use serde::Serialize;

use crate::registry::{ToolDescriptor, ToolRegistry};

/// Token cost assumed for tools that declare no estimate.
pub const DEFAULT_TOOL_TOKENS: u32 = 100;

/// Score weight for query tokens matching the tool name.
const NAME_WEIGHT: u32 = 3;

/// Score weight for query tokens matching the description.
const DESCRIPTION_WEIGHT: u32 = 1;

/// A discovery result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredTool {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// Relevance score for the query.
    pub score: u32,
}

/// A gating result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedTool {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// Token cost counted toward the budget.
    pub estimated_tokens: u32,
}

/// Lowercases and splits on non-alphanumeric boundaries.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Scores one tool against pre-tokenized query terms.
fn score_tool(tool: &ToolDescriptor, query_tokens: &[String]) -> u32 {
    let name_tokens = tokenize(&tool.name);
    let description_tokens = tokenize(&tool.description);

    query_tokens
        .iter()
        .map(|term| {
            let name_hits = name_tokens.iter().filter(|t| *t == term).count() as u32;
            let description_hits = description_tokens.iter().filter(|t| *t == term).count() as u32;
            name_hits * NAME_WEIGHT + description_hits * DESCRIPTION_WEIGHT
        })
        .sum()
}

/// Ranks registered tools against the query.
///
/// Tools that match no query token are excluded; a query with no
/// tokens at all leaves the whole catalog in, ordered by name, so
/// gating over an unfiltered registry still works. Ordering is score
/// descending, then name ascending.
#[must_use]
pub fn rank(registry: &ToolRegistry, query: &str) -> Vec<(Arc<ToolDescriptor>, u32)> {
    let query_tokens = tokenize(query);
    let mut ranked: Vec<(Arc<ToolDescriptor>, u32)> = registry
        .list()
        .into_iter()
        .map(|tool| {
            let score = score_tool(&tool, &query_tokens);
            (tool, score)
        })
        .filter(|(_, score)| query_tokens.is_empty() || *score > 0)
        .collect();

    ranked.sort_by(|(a, sa), (b, sb)| Reverse(sa).cmp(&Reverse(sb)).then(a.name.cmp(&b.name)));
    ranked
}

/// Returns the top `limit` tools for the query.
#[must_use]
pub fn discover(registry: &ToolRegistry, query: &str, limit: usize) -> Vec<DiscoveredTool> {
    rank(registry, query)
        .into_iter()
        .take(limit)
        .map(|(tool, score)| DiscoveredTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            score,
        })
        .collect()
}

/// Greedily selects ranked tools whose summed cost fits `max_tokens`.
///
/// Selection preserves rank order; an over-budget tool is skipped and
/// the scan continues so cheaper lower-ranked tools can still fit.
#[must_use]
pub fn provision(registry: &ToolRegistry, query: &str, max_tokens: u32) -> Vec<ProvisionedTool> {
    let mut selected = Vec::new();
    let mut budget_used: u32 = 0;

    for (tool, _score) in rank(registry, query) {
        let cost = tool.estimated_tokens.unwrap_or(DEFAULT_TOOL_TOKENS);
        if budget_used + cost > max_tokens {
            continue;
        }
        budget_used += cost;
        selected.push(ProvisionedTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            estimated_tokens: cost,
        });
    }

    selected
}
