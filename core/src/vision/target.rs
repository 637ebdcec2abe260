use crate::config::TargetingConfig;
use crate::prelude::{RigError, RigResult};

/// What a caller asked the rig to look for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRequest {
    Word(String),
    Group(String),
    Default,
}

/// Resolved text predicate used against tracked detections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelector {
    /// Exact or substring match, case-sensitive.
    Word(String),
    /// Case-insensitive substring match on any of the words.
    AnyOf { label: String, words: Vec<String> },
}

impl TargetSelector {
    pub fn resolve(request: &TargetRequest, targeting: &TargetingConfig) -> RigResult<Self> {
        match request {
            TargetRequest::Word(word) if !word.trim().is_empty() => {
                Ok(TargetSelector::Word(word.trim().to_string()))
            }
            TargetRequest::Group(group) => {
                let words = targeting
                    .ocr_groups
                    .get(group)
                    .ok_or_else(|| RigError::NotFound {
                        kind: "OCR group",
                        name: group.clone(),
                    })?;
                Ok(TargetSelector::any_of(group.clone(), words.clone()))
            }
            TargetRequest::Word(_) | TargetRequest::Default => Ok(Self::default_for(targeting)),
        }
    }

    fn default_for(targeting: &TargetingConfig) -> Self {
        let selected = targeting.selected_target_word.trim();
        if !selected.is_empty() {
            return TargetSelector::Word(selected.to_string());
        }
        let mut words = targeting.target_words.clone();
        let legacy = targeting.target_text.trim();
        if !legacy.is_empty() && !words.iter().any(|word| word == legacy) {
            words.push(legacy.to_string());
        }
        TargetSelector::any_of(words.join("/"), words)
    }

    fn any_of(label: String, words: Vec<String>) -> Self {
        let words = words
            .into_iter()
            .map(|word| word.trim().to_lowercase())
            .filter(|word| !word.is_empty())
            .collect();
        TargetSelector::AnyOf { label, words }
    }

    pub fn matches(&self, text: &str) -> bool {
        match self {
            TargetSelector::Word(word) => text == word || text.contains(word.as_str()),
            TargetSelector::AnyOf { words, .. } => {
                let text = text.to_lowercase();
                words.iter().any(|word| text.contains(word.as_str()))
            }
        }
    }

    pub fn describe(&self) -> &str {
        match self {
            TargetSelector::Word(word) => word,
            TargetSelector::AnyOf { label, .. } => label,
        }
    }
}
