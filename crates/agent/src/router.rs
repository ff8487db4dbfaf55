use std::collections::BTreeSet;
use std::sync::Arc;

use crate::registry::{AgentConfig, AgentRegistry};

/// Words shorter than this are matched whole; longer words match on this many leading chars.
const STEM_CHARS: usize = 5;

const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "but", "by", "can", "could", "do", "does",
    "for", "from", "have", "how", "i", "in", "is", "it", "me", "my", "of", "on", "or", "please",
    "related", "should", "so", "that", "the", "this", "to", "user", "user's", "want", "what",
    "when", "which", "with", "would", "you", "your",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteReason {
    /// A tool decision is outstanding; the owning agent keeps control.
    PendingToolRequest,
    KeywordMatch,
    /// Nothing matched; the previously active agent continues.
    KeptActive,
    Fallback,
}

#[derive(Clone)]
pub struct RouteDecision {
    pub agent: Arc<AgentConfig>,
    pub reason: RouteReason,
    pub score: usize,
}

/// Deterministic description-to-intent matcher.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordRouter;

impl KeywordRouter {
    pub fn route(
        &self,
        registry: &AgentRegistry,
        active: Option<&str>,
        tool_pending: bool,
        message: &str,
    ) -> RouteDecision {
        let active = active.and_then(|name| registry.get(name));

        if let (true, Some(agent)) = (tool_pending, active) {
            return RouteDecision {
                agent: Arc::clone(agent),
                reason: RouteReason::PendingToolRequest,
                score: 0,
            };
        }

        let message_stems = stems(message);
        let mut best: Option<(usize, &Arc<AgentConfig>)> = None;
        for agent in registry.agents() {
            let score = overlap(&message_stems, agent);
            if score > best.map_or(0, |(best_score, _)| best_score) {
                best = Some((score, agent));
            }
        }

        // Handing off needs a strictly better match than the active agent.
        if let (Some((best_score, _)), Some(agent)) = (best, active) {
            if overlap(&message_stems, agent) == best_score {
                return RouteDecision {
                    agent: Arc::clone(agent),
                    reason: RouteReason::KeywordMatch,
                    score: best_score,
                };
            }
        }

        match (best, active) {
            (Some((score, agent)), _) => {
                RouteDecision { agent: Arc::clone(agent), reason: RouteReason::KeywordMatch, score }
            }
            (None, Some(agent)) => RouteDecision {
                agent: Arc::clone(agent),
                reason: RouteReason::KeptActive,
                score: 0,
            },
            (None, None) => RouteDecision {
                agent: Arc::clone(registry.fallback()),
                reason: RouteReason::Fallback,
                score: 0,
            },
        }
    }
}

fn overlap(message_stems: &BTreeSet<String>, agent: &AgentConfig) -> usize {
    let mut vocabulary = stems(agent.name());
    vocabulary.extend(stems(agent.description()));
    for keyword in agent.keywords() {
        vocabulary.extend(stems(keyword));
    }
    message_stems.intersection(&vocabulary).count()
}

fn stems(text: &str) -> BTreeSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric() && ch != '\'')
        .map(|word| word.trim_matches('\'').to_lowercase())
        .filter(|word| !word.is_empty() && !STOP_WORDS.contains(&word.as_str()))
        .map(|word| word.chars().take(STEM_CHARS).collect())
        .collect()
}
