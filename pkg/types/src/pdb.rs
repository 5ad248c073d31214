use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::pod::Pod;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: HashMap<String, String>,
}

impl LabelSelector {
    /// An empty selector matches nothing.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        !self.match_labels.is_empty()
            && self
                .match_labels
                .iter()
                .all(|(k, v)| labels.get(k) == Some(v))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PdbStatus {
    #[serde(default)]
    pub disruptions_allowed: i32,
    /// Names of pods already being disrupted; they do not count again.
    #[serde(default)]
    pub disrupted_pods: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodDisruptionBudget {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub selector: LabelSelector,
    #[serde(default)]
    pub status: PdbStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl PodDisruptionBudget {
    pub fn matches(&self, pod: &Pod) -> bool {
        self.namespace == pod.namespace && self.selector.matches(&pod.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::PodSpec;

    #[test]
    fn selector_matching() {
        let pdb = PodDisruptionBudget {
            name: "web".into(),
            namespace: "team-a".into(),
            selector: LabelSelector {
                match_labels: HashMap::from([("app".to_string(), "web".to_string())]),
            },
            status: PdbStatus::default(),
            created_at: Utc::now(),
        };
        let mut pod = Pod::new("team-a", "web-0", PodSpec::default());
        assert!(!pdb.matches(&pod));
        pod.labels.insert("app".into(), "web".into());
        assert!(pdb.matches(&pod));
        pod.namespace = "team-b".into();
        assert!(!pdb.matches(&pod));
    }
}
