//! Signal tags the model can emit in assistant text.
//!
//! The tool surface is closed at seven tools, so blocker emission rides on
//! an inline tag channel instead: the agent scans each assistant message
//! for `<blocker ...>question</blocker>` tags and files them. Attributes
//! select the mode and category; both are optional.
//!
//! ```text
//! <blocker mode="async" category="tactical-decision">Which ORM should I use?</blocker>
//! ```

use crate::store::models::{BlockerCategory, BlockerMode};
use regex::Regex;
use std::sync::OnceLock;

/// A blocker request parsed out of assistant text.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockerSignal {
    pub question: String,
    pub mode: BlockerMode,
    pub category: BlockerCategory,
}

fn blocker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<blocker(?P<attrs>[^>]*)>(?P<question>.*?)</blocker>"#)
            .expect("valid blocker regex")
    })
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?P<key>\w+)\s*=\s*"(?P<value>[^"]*)""#).expect("valid attr regex")
    })
}

/// Extract all blocker tags from one assistant message, in order. Malformed
/// attributes fall back to SYNC / missing-info rather than being dropped:
/// a garbled cry for help is still a cry for help.
pub fn parse_blockers(text: &str) -> Vec<BlockerSignal> {
    blocker_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let question = caps["question"].trim().to_string();
            if question.is_empty() {
                return None;
            }
            let mut mode = BlockerMode::Sync;
            let mut category = BlockerCategory::MissingInfo;
            for attr in attr_regex().captures_iter(&caps["attrs"]) {
                match &attr["key"] {
                    "mode" => {
                        if let Ok(parsed) = attr["value"].parse() {
                            mode = parsed;
                        }
                    }
                    "category" => {
                        if let Ok(parsed) = attr["value"].parse() {
                            category = parsed;
                        }
                    }
                    _ => {}
                }
            }
            Some(BlockerSignal {
                question,
                mode,
                category,
            })
        })
        .collect()
}

/// Assistant text with blocker tags removed, for clean summaries and
/// conversation history.
pub fn strip_blocker_tags(text: &str) -> String {
    blocker_regex().replace_all(text, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_blocker_with_defaults() {
        let signals = parse_blockers("I need help.\n<blocker>What auth scheme?</blocker>");
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].question, "What auth scheme?");
        assert_eq!(signals[0].mode, BlockerMode::Sync);
        assert_eq!(signals[0].category, BlockerCategory::MissingInfo);
    }

    #[test]
    fn parses_attributes() {
        let text = r#"<blocker mode="async" category="tactical-decision">Which of pytest or unittest should I use?</blocker>"#;
        let signals = parse_blockers(text);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].mode, BlockerMode::Async);
        assert_eq!(signals[0].category, BlockerCategory::TacticalDecision);
    }

    #[test]
    fn multiple_and_multiline_blockers() {
        let text = "<blocker>first\nquestion</blocker> work text <blocker category=\"escalation\">second</blocker>";
        let signals = parse_blockers(text);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].question, "first\nquestion");
        assert_eq!(signals[1].category, BlockerCategory::Escalation);
    }

    #[test]
    fn invalid_attribute_values_fall_back() {
        let text = r#"<blocker mode="yelling" category="nonsense">q</blocker>"#;
        let signals = parse_blockers(text);
        assert_eq!(signals[0].mode, BlockerMode::Sync);
        assert_eq!(signals[0].category, BlockerCategory::MissingInfo);
    }

    #[test]
    fn empty_question_is_dropped() {
        assert!(parse_blockers("<blocker>   </blocker>").is_empty());
    }

    #[test]
    fn strip_removes_tags_only() {
        let text = "Summary of work. <blocker>q?</blocker>";
        assert_eq!(strip_blocker_tags(text), "Summary of work.");
        assert_eq!(strip_blocker_tags("no tags"), "no tags");
    }
}
