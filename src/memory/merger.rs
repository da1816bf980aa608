//! Episode merger: fold the selected episodes into one bounded summary
//!
//! Pure over its inputs. The orchestrator fetches the episodes and hands
//! them in, so the merger never touches the backend itself.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{truncate_with_ellipsis, Episode, MemoryPointer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Character budget for the whole merged summary
    pub max_summary_chars: usize,
    /// Body excerpt appended after each summary when the body adds text
    pub body_excerpt_chars: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_summary_chars: 600,
            body_excerpt_chars: 160,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No episode content and no excerpt to fall back on
    Missing,
    /// Summary budget exhausted
    Budget,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedPointer {
    pub episode_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeOutcome {
    pub summary: Option<String>,
    /// Pointers that contributed a line, in input order
    pub used_pointers: Vec<MemoryPointer>,
    pub skipped: Vec<SkippedPointer>,
    pub segments: Vec<String>,
    /// Pointers whose episode was absent and that fell back to their excerpt
    pub excerpt_fallbacks: usize,
}

impl MergeOutcome {
    pub fn diagnostics(&self) -> serde_json::Value {
        serde_json::json!({
            "segments": self.segments.len(),
            "used": self.used_pointers.len(),
            "excerpt_fallbacks": self.excerpt_fallbacks,
            "skipped": self.skipped,
            "chars": self.summary.as_ref().map(|s| s.chars().count()).unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct EpisodeMerger {
    config: MergeConfig,
}

impl EpisodeMerger {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// Build one line per pointer, in the order given, until the budget runs out.
    ///
    /// `episodes` may be partial or empty; a pointer without its episode
    /// falls back to the pointer's own excerpt.
    pub fn merge(&self, pointers: &[MemoryPointer], episodes: &[Episode]) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        if pointers.is_empty() {
            return outcome;
        }

        let by_id: HashMap<&str, &Episode> = episodes.iter().map(|e| (e.id.as_str(), e)).collect();
        let budget = self.config.max_summary_chars;
        let mut used_chars = 0usize;
        let mut exhausted = false;

        for pointer in pointers {
            if exhausted {
                outcome.skipped.push(SkippedPointer {
                    episode_id: pointer.episode_id.clone(),
                    reason: SkipReason::Budget,
                });
                continue;
            }

            let text = match by_id.get(pointer.episode_id.as_str()) {
                Some(episode) => self.describe(episode),
                None => {
                    let excerpt = pointer.summary_excerpt.trim();
                    if !excerpt.is_empty() {
                        outcome.excerpt_fallbacks += 1;
                    }
                    excerpt.to_string()
                }
            };
            if text.is_empty() {
                outcome.skipped.push(SkippedPointer {
                    episode_id: pointer.episode_id.clone(),
                    reason: SkipReason::Missing,
                });
                continue;
            }

            let mut line = format!("[{}] {}", outcome.segments.len() + 1, text);
            let separator = usize::from(!outcome.segments.is_empty());
            let line_chars = line.chars().count();

            if used_chars + separator + line_chars > budget {
                // the first line is cut to fit rather than dropping everything
                if outcome.segments.is_empty() && budget > 0 {
                    line = truncate_with_ellipsis(&line, budget.saturating_sub(1));
                } else {
                    exhausted = true;
                    outcome.skipped.push(SkippedPointer {
                        episode_id: pointer.episode_id.clone(),
                        reason: SkipReason::Budget,
                    });
                    continue;
                }
            }

            used_chars += separator + line.chars().count();
            outcome.segments.push(line);
            outcome.used_pointers.push(pointer.clone());
        }

        if !outcome.segments.is_empty() {
            outcome.summary = Some(outcome.segments.join("\n"));
        }
        tracing::debug!(
            used = outcome.used_pointers.len(),
            skipped = outcome.skipped.len(),
            "merge"
        );
        outcome
    }

    /// `summary: body excerpt`, or just one of them when the other adds nothing
    fn describe(&self, episode: &Episode) -> String {
        let summary = episode.summary.trim();
        let body = episode.body.trim();
        if body.is_empty() || body == summary || summary.starts_with(body) {
            return summary.to_string();
        }
        if summary.is_empty() {
            return truncate_with_ellipsis(body, self.config.body_excerpt_chars);
        }
        // summaries are body prefixes for recorded turns; drop the repeat
        let rest = body.strip_prefix(summary).map(str::trim).unwrap_or(body);
        if rest.is_empty() {
            return summary.to_string();
        }
        format!(
            "{}: {}",
            summary,
            truncate_with_ellipsis(rest, self.config.body_excerpt_chars)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::tests::episode;
    use pretty_assertions::assert_eq;

    fn pointer_for(e: &Episode) -> MemoryPointer {
        MemoryPointer::episodic(e, 0.5)
    }

    #[test]
    fn test_empty_input() {
        let out = EpisodeMerger::default().merge(&[], &[]);
        assert_eq!(out.summary, None);
        assert!(out.used_pointers.is_empty());
    }

    #[test]
    fn test_numbered_lines_in_pointer_order() {
        let a = episode("a", "garden layout", 5);
        let mut b = episode("b", "tomato varieties", 3);
        b.body = "comparing heirloom tomatoes".to_string();

        let pointers = vec![pointer_for(&b), pointer_for(&a)];
        let out = EpisodeMerger::default().merge(&pointers, &[a.clone(), b.clone()]);

        assert_eq!(
            out.summary.as_deref(),
            Some("[1] tomato varieties: comparing heirloom tomatoes\n[2] garden layout")
        );
        assert_eq!(out.used_pointers.len(), 2);
    }

    #[test]
    fn test_missing_episode_falls_back_to_excerpt() {
        let a = episode("a", "garden layout", 5);
        let out = EpisodeMerger::default().merge(&[pointer_for(&a)], &[]);
        assert_eq!(out.summary.as_deref(), Some("[1] garden layout"));
        assert_eq!(out.excerpt_fallbacks, 1);
    }

    #[test]
    fn test_nothing_to_say_is_reported_missing() {
        let mut p = pointer_for(&episode("ghost", "", 1));
        p.summary_excerpt = "   ".into();
        let out = EpisodeMerger::default().merge(&[p], &[]);
        assert_eq!(out.summary, None);
        assert_eq!(out.skipped[0].reason, SkipReason::Missing);
    }

    #[test]
    fn test_budget_skips_are_reported() {
        let episodes: Vec<Episode> = (0..4)
            .map(|i| episode(&format!("e{}", i), &"x".repeat(30), i))
            .collect();
        let pointers: Vec<MemoryPointer> = episodes.iter().map(pointer_for).collect();
        let merger = EpisodeMerger::new(MergeConfig {
            max_summary_chars: 80,
            ..Default::default()
        });

        let out = merger.merge(&pointers, &episodes);
        let summary = out.summary.unwrap();
        assert!(summary.chars().count() <= 80);
        assert_eq!(out.used_pointers.len() + out.skipped.len(), 4);
        assert!(out.skipped.iter().all(|s| s.reason == SkipReason::Budget));
    }

    #[test]
    fn test_oversized_first_line_is_cut() {
        let e = episode("big", &"long ".repeat(100), 1);
        let merger = EpisodeMerger::new(MergeConfig {
            max_summary_chars: 50,
            ..Default::default()
        });
        let out = merger.merge(&[pointer_for(&e)], &[e.clone()]);
        let summary = out.summary.unwrap();
        assert!(summary.ends_with('…'));
        assert!(summary.chars().count() <= 50);
    }
}
