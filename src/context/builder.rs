use serde::{Deserialize, Serialize};

use super::shared::{ContextEntry, truncate_chars};
use crate::retrieval::Snippet;

pub const BACKGROUND: &str = "background";
pub const PRIOR_CONTEXT: &str = "prior context";
pub const CONVERSATION: &str = "conversation";
pub const SIBLING_OUTPUTS: &str = "sibling outputs";

const SECTION_SEPARATOR: &str = "\n\n";
const ITEM_SEPARATOR: &str = "\n\n";

/// A turn of the conversation that led to the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: String,
    pub text: String,
}

/// Size limits for a context bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    /// Hard ceiling on the rendered bundle, in characters.
    pub max_chars: usize,
    pub background_items: usize,
    pub background_item_chars: usize,
    pub prior_items: usize,
    pub conversation_turns: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_chars: 12_000,
            background_items: 5,
            background_item_chars: 1_500,
            prior_items: 5,
            conversation_turns: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub label: &'static str,
    pub items: Vec<String>,
}

impl Section {
    fn header(label: &str) -> String {
        format!("## {label}\n")
    }

    fn render(&self) -> String {
        format!("{}{}", Self::header(self.label), self.items.join(ITEM_SEPARATOR))
    }
}

/// Labeled context handed to one agent invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextBundle {
    sections: Vec<Section>,
}

impl ContextBundle {
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, label: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.label == label)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(Section::render)
            .collect::<Vec<_>>()
            .join(SECTION_SEPARATOR)
    }
}

/// The three parts of a model call, kept apart so the backend can tell
/// instructions and background from the actual ask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBundle {
    pub role: String,
    pub instruction: String,
    pub context: String,
    pub request: String,
}

/// Assembles size-bounded context bundles.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextBuilder {
    limits: ContextLimits,
}

/// Section candidates in fill order: highest priority first, and within a
/// section the items to keep first.
struct Candidate {
    label: &'static str,
    items: Vec<String>,
    /// Items were collected newest-first and must be shown oldest-first.
    reverse_for_display: bool,
}

impl ContextBuilder {
    pub fn new(limits: ContextLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ContextLimits {
        &self.limits
    }

    /// Builds a bundle whose rendering never exceeds `max_chars`.
    ///
    /// Sections are filled by priority: background, sibling outputs, prior
    /// context, conversation. When space runs out the oldest items of the
    /// lowest-priority sections are the ones left out.
    pub fn build(
        &self,
        history: &[ConversationTurn],
        prior: &[ContextEntry],
        knowledge: &[Snippet],
        siblings: &[ContextEntry],
    ) -> ContextBundle {
        let limits = &self.limits;

        let candidates = [
            Candidate {
                label: BACKGROUND,
                items: knowledge
                    .iter()
                    .take(limits.background_items)
                    .map(|s| {
                        truncate_chars(
                            &format!("[{}] {}", s.source, s.text),
                            limits.background_item_chars,
                        )
                    })
                    .collect(),
                reverse_for_display: false,
            },
            Candidate {
                label: SIBLING_OUTPUTS,
                items: siblings.iter().rev().map(format_entry).collect(),
                reverse_for_display: true,
            },
            Candidate {
                label: PRIOR_CONTEXT,
                items: prior
                    .iter()
                    .rev()
                    .take(limits.prior_items)
                    .map(format_entry)
                    .collect(),
                reverse_for_display: true,
            },
            Candidate {
                label: CONVERSATION,
                items: history
                    .iter()
                    .rev()
                    .take(limits.conversation_turns)
                    .map(|t| format!("{}: {}", t.speaker, t.text))
                    .collect(),
                reverse_for_display: true,
            },
        ];

        let mut remaining = limits.max_chars;
        let mut placed: Vec<Section> = Vec::new();

        for candidate in candidates {
            if candidate.items.is_empty() {
                continue;
            }
            let separator = if placed.is_empty() {
                0
            } else {
                SECTION_SEPARATOR.len()
            };
            let overhead = Section::header(candidate.label).chars().count() + separator;
            if overhead >= remaining {
                continue;
            }
            let budget = remaining - overhead;

            let mut kept: Vec<String> = Vec::new();
            let mut used = 0;
            for item in candidate.items {
                let item_len = item.chars().count();
                let cost = item_len + if kept.is_empty() { 0 } else { ITEM_SEPARATOR.len() };
                if used + cost <= budget {
                    used += cost;
                    kept.push(item);
                } else {
                    if kept.is_empty() {
                        let cut = truncate_chars(&item, budget);
                        used = cut.chars().count();
                        kept.push(cut);
                    }
                    break;
                }
            }

            if candidate.reverse_for_display {
                kept.reverse();
            }
            remaining -= overhead + used;
            placed.push(Section {
                label: candidate.label,
                items: kept,
            });
        }

        let display_order = [BACKGROUND, PRIOR_CONTEXT, CONVERSATION, SIBLING_OUTPUTS];
        placed.sort_by_key(|s| display_order.iter().position(|l| *l == s.label));
        ContextBundle { sections: placed }
    }
}

fn format_entry(entry: &ContextEntry) -> String {
    format!("[{}] {}", entry.source, entry.text)
}
