use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Ordered taps fired when the no-change counter reaches its trigger interval.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuxiliarySequence {
    #[serde(default)]
    pub positions: Vec<String>,
    /// Press the final "collect" control after the taps.
    #[serde(default, alias = "click_take")]
    pub collect: bool,
}

/// Raw action document keyed by title keyword.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionTable {
    /// Taps performed right after entering a target.
    #[serde(default)]
    pub keyword_actions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub machine_actions: BTreeMap<String, AuxiliarySequence>,
}

/// Actions resolved for one target at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedActions {
    pub entry: Option<(String, Vec<String>)>,
    pub auxiliary: Option<(String, AuxiliarySequence)>,
}

impl ActionTable {
    pub fn resolve(&self, title_code: &str) -> ResolvedActions {
        if title_code.is_empty() {
            return ResolvedActions::default();
        }
        let entry = self
            .keyword_actions
            .iter()
            .find(|(kw, _)| !kw.is_empty() && title_code.contains(kw.as_str()))
            .map(|(kw, positions)| (kw.clone(), positions.clone()));
        let auxiliary = self
            .machine_actions
            .iter()
            .find(|(kw, _)| !kw.is_empty() && title_code.contains(kw.as_str()))
            .map(|(kw, seq)| (kw.clone(), seq.clone()));
        ResolvedActions { entry, auxiliary }
    }

    /// Infer a detection tag from a title code: machine keywords first, then entry keywords.
    pub fn infer_tag(&self, title_code: Option<&str>) -> Option<String> {
        let title = title_code.filter(|t| !t.is_empty())?;
        self.machine_actions
            .keys()
            .chain(self.keyword_actions.keys())
            .find(|kw| !kw.is_empty() && title.contains(kw.as_str()))
            .cloned()
    }
}
