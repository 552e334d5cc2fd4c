//! Supervisor auto-resolution of recurring tactical questions.
//!
//! When a worker comes back blocked on a *tactical-decision* question, the
//! supervisor first consults a durable per-workspace decision cache, then a
//! small "which of {options}" heuristic. A resolved blocker re-queues the
//! task without human involvement; every other category stays open.
//!
//! Decision-kind canonicalization (the cache key): lowercase, strip
//! non-alphanumerics except spaces, collapse whitespace, truncate to 120
//! chars.

use crate::blockers::BlockerService;
use crate::errors::StoreError;
use crate::store::StateStore;
use crate::store::models::{Blocker, BlockerCategory};
use regex::Regex;
use std::sync::{Arc, OnceLock};

const KIND_MAX_CHARS: usize = 120;

#[derive(Clone)]
pub struct Supervisor {
    store: Arc<StateStore>,
    blockers: BlockerService,
}

impl Supervisor {
    pub fn new(store: Arc<StateStore>, blockers: BlockerService) -> Self {
        Self { store, blockers }
    }

    /// Attempt to answer a blocker automatically. Returns the answer used,
    /// or None when the blocker must wait for a human.
    pub fn try_auto_resolve(
        &self,
        workspace_id: &str,
        blocker: &Blocker,
    ) -> Result<Option<String>, StoreError> {
        if blocker.category != BlockerCategory::TacticalDecision {
            return Ok(None);
        }
        let kind = canonical_kind(&blocker.question);

        if let Some(cached) = self.store.lookup_decision(workspace_id, &kind)? {
            tracing::info!(blocker_id = %blocker.id, kind, "auto-resolving from decision cache");
            self.blockers.answer(&blocker.id, &cached)?;
            self.blockers.resolve(&blocker.id)?;
            return Ok(Some(cached));
        }

        if let Some(choice) = heuristic_choice(&blocker.question) {
            tracing::info!(blocker_id = %blocker.id, choice, "auto-resolving via option heuristic");
            self.store.record_decision(workspace_id, &kind, &choice)?;
            self.blockers.answer(&blocker.id, &choice)?;
            self.blockers.resolve(&blocker.id)?;
            return Ok(Some(choice));
        }

        Ok(None)
    }
}

/// Canonical cache key for a decision question.
pub fn canonical_kind(question: &str) -> String {
    let cleaned: String = question
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == ' ' { c } else { ' ' })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(KIND_MAX_CHARS).collect()
}

fn option_set_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "which of X, Y or Z ..." / "should I use X or Y"
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:which of|should i use|do you prefer)\s+(?P<options>[^?.]+)")
            .expect("valid option regex")
    })
}

/// Answer "which of {option-set}" questions by taking the first option.
/// Deterministic and recorded, so every later occurrence gets the same
/// answer from the cache.
fn heuristic_choice(question: &str) -> Option<String> {
    let caps = option_set_regex().captures(question)?;
    let options_text = caps["options"].trim();
    let first = options_text
        .split(|c| c == ',' || c == '/')
        .flat_map(|part| part.split(" or "))
        .map(|part| part.trim().trim_end_matches('?'))
        .find(|part| !part.is_empty())?;
    if first.split_whitespace().count() > 4 {
        return None;
    }
    Some(first.to_string())
}
