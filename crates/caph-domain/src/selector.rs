use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

/// A machine's host selector: a label-equality map plus set-based
/// expressions, both of which must hold for a host to match.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostSelector {
    #[serde(default)]
    pub match_labels: HashMap<String, String>,
    #[serde(default)]
    pub match_expressions: Vec<SelectorRequirement>,
}

impl HostSelector {
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        for (k, v) in &self.match_labels {
            if labels.get(k) != Some(v) {
                return false;
            }
        }
        for req in &self.match_expressions {
            let present = labels.get(&req.key);
            let ok = match req.operator {
                SelectorOperator::In => present.map_or(false, |v| req.values.contains(v)),
                SelectorOperator::NotIn => present.map_or(true, |v| !req.values.contains(v)),
                SelectorOperator::Exists => present.is_some(),
                SelectorOperator::DoesNotExist => present.is_none(),
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn empty_selector_matches_everything() {
        let sel = HostSelector::default();
        assert!(sel.matches(&labels(&[("a", "b")])));
        assert!(sel.matches(&HashMap::new()));
    }

    #[test]
    fn match_labels_requires_exact_value() {
        let sel = HostSelector {
            match_labels: labels(&[("rack", "r1")]),
            match_expressions: vec![],
        };
        assert!(sel.matches(&labels(&[("rack", "r1")])));
        assert!(!sel.matches(&labels(&[("rack", "r2")])));
        assert!(!sel.matches(&HashMap::new()));
    }

    #[test]
    fn exists_and_does_not_exist() {
        let exists = SelectorRequirement {
            key: "gpu".into(),
            operator: SelectorOperator::Exists,
            values: vec![],
        };
        let sel = HostSelector { match_labels: HashMap::new(), match_expressions: vec![exists] };
        assert!(sel.matches(&labels(&[("gpu", "a100")])));
        assert!(!sel.matches(&HashMap::new()));
    }

    #[test]
    fn in_and_not_in() {
        let req = SelectorRequirement {
            key: "region".into(),
            operator: SelectorOperator::In,
            values: vec!["fsn1".into(), "nbg1".into()],
        };
        let sel = HostSelector { match_labels: HashMap::new(), match_expressions: vec![req] };
        assert!(sel.matches(&labels(&[("region", "fsn1")])));
        assert!(!sel.matches(&labels(&[("region", "hel1")])));
    }
}
