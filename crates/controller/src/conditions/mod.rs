//! Condition ledger shared by both infrastructure kinds.
//!
//! A [`ConditionSet`] holds at most one [`Condition`] per type. Setting a
//! condition to the status it already has only refreshes its reason and
//! message, so `lastTransitionTime` marks real transitions and repeated
//! reconciles of a converged object leave the status untouched.

pub mod vocabulary;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use vocabulary::{AVAILABLE, READY};

/// Status of a condition.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g. `Ready`, `InstanceReady`)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition
    pub status: ConditionStatus,

    /// Machine-readable reason for the last status or message change
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the status changed
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Set of conditions keyed by type.
///
/// Serialized as a list ordered by type. When a list carries the same type
/// twice, the later entry wins.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Condition>", into = "Vec<Condition>")]
pub struct ConditionSet {
    conditions: BTreeMap<String, Condition>,
}

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a condition.
    ///
    /// `lastTransitionTime` is only moved when `status` differs from the
    /// current one. Returns `true` if anything changed.
    pub fn set(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) -> bool {
        let message = message.into();
        match self.conditions.get_mut(type_) {
            Some(existing) if existing.status == status => {
                if existing.reason == reason && existing.message == message {
                    return false;
                }
                existing.reason = reason.to_string();
                existing.message = message;
                true
            }
            _ => {
                self.conditions.insert(
                    type_.to_string(),
                    Condition::new(type_, status, reason, message),
                );
                true
            }
        }
    }

    pub fn mark_true(&mut self, type_: &str, reason: &str, message: impl Into<String>) -> bool {
        self.set(type_, ConditionStatus::True, reason, message)
    }

    pub fn mark_false(&mut self, type_: &str, reason: &str, message: impl Into<String>) -> bool {
        self.set(type_, ConditionStatus::False, reason, message)
    }

    pub fn mark_unknown(&mut self, type_: &str, reason: &str, message: impl Into<String>) -> bool {
        self.set(type_, ConditionStatus::Unknown, reason, message)
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.conditions.get(type_)
    }

    pub fn is_true(&self, type_: &str) -> bool {
        self.get(type_).is_some_and(Condition::is_true)
    }

    /// Reason of the condition, if present.
    pub fn reason(&self, type_: &str) -> Option<&str> {
        self.get(type_).map(|c| c.reason.as_str())
    }

    pub fn remove(&mut self, type_: &str) -> Option<Condition> {
        self.conditions.remove(type_)
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.values()
    }

    /// AND over the required condition types. Absent counts as not ready.
    pub fn summary(&self, required: &[&str]) -> bool {
        required.iter().all(|type_| self.is_true(type_))
    }

    /// Write the top-level `Ready` condition from the required subset.
    ///
    /// When not ready, `Ready` mirrors the reason and message of the first
    /// required condition that is not `True`.
    pub fn set_summary(&mut self, required: &[&str]) -> bool {
        let blocking = required
            .iter()
            .find(|type_| !self.is_true(type_))
            .map(|type_| match self.get(type_) {
                Some(c) => (c.reason.clone(), c.message.clone()),
                None => (
                    vocabulary::NOT_REPORTED.to_string(),
                    format!("Condition {type_} has not been reported yet"),
                ),
            });

        match blocking {
            None => self.mark_true(READY, AVAILABLE, ""),
            Some((reason, message)) => self.mark_false(READY, &reason, message),
        }
    }
}

impl From<Vec<Condition>> for ConditionSet {
    fn from(list: Vec<Condition>) -> Self {
        let conditions = list
            .into_iter()
            .map(|c| (c.type_.clone(), c))
            .collect();
        Self { conditions }
    }
}

impl From<ConditionSet> for Vec<Condition> {
    fn from(set: ConditionSet) -> Self {
        set.conditions.into_values().collect()
    }
}

impl JsonSchema for ConditionSet {
    fn schema_name() -> String {
        "ConditionSet".to_string()
    }

    fn is_referenceable() -> bool {
        false
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        <Vec<Condition>>::json_schema(gen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vocabulary::*;

    #[test]
    fn test_set_same_status_keeps_transition_time() {
        let mut set = ConditionSet::new();
        assert!(set.mark_false(INSTANCE_READY, INSTANCE_PROVISIONING, "allocating"));
        let first = set.get(INSTANCE_READY).unwrap().last_transition_time;

        assert!(set.mark_false(INSTANCE_READY, INSTANCE_INSTALLING, "installing os"));
        let updated = set.get(INSTANCE_READY).unwrap();
        assert_eq!(updated.last_transition_time, first);
        assert_eq!(updated.reason, INSTANCE_INSTALLING);
        assert_eq!(updated.message, "installing os");
    }

    #[test]
    fn test_identical_set_reports_no_change() {
        let mut set = ConditionSet::new();
        set.mark_true(PRIVATE_NETWORK_READY, READY, "");
        let before = set.clone();

        assert!(!set.mark_true(PRIVATE_NETWORK_READY, READY, ""));
        assert_eq!(set, before);
    }

    #[test]
    fn test_status_change_moves_transition_time() {
        let mut set = ConditionSet::new();
        set.mark_false(INSTANCE_READY, INSTANCE_PROVISIONING, "");
        let mut stale = set.get(INSTANCE_READY).unwrap().clone();
        stale.last_transition_time = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        set = ConditionSet::from(vec![stale]);

        set.mark_true(INSTANCE_READY, AVAILABLE, "");
        let c = set.get(INSTANCE_READY).unwrap();
        assert_eq!(c.status, ConditionStatus::True);
        assert!(c.last_transition_time.timestamp() > 0);
    }

    #[test]
    fn test_summary_treats_absent_as_not_ready() {
        let mut set = ConditionSet::new();
        set.mark_true(CONTROL_PLANE_ENDPOINT_READY, READY, "");
        assert!(set.summary(&[CONTROL_PLANE_ENDPOINT_READY]));
        assert!(!set.summary(&[CONTROL_PLANE_ENDPOINT_READY, PRIVATE_NETWORK_READY]));
        assert!(set.summary(&[]));
    }

    #[test]
    fn test_set_summary_mirrors_first_blocking_condition() {
        let mut set = ConditionSet::new();
        set.mark_true(CONTROL_PLANE_ENDPOINT_READY, READY, "");
        set.mark_false(PRIVATE_NETWORK_READY, CREATING, "network net-1 is being created");
        set.mark_false(SSH_KEY_READY, WAITING_FOR_SSH_KEY_SECRET, "secret missing");

        set.set_summary(&[
            CONTROL_PLANE_ENDPOINT_READY,
            PRIVATE_NETWORK_READY,
            SSH_KEY_READY,
        ]);
        let ready = set.get(READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, CREATING);
        assert_eq!(ready.message, "network net-1 is being created");

        set.mark_true(PRIVATE_NETWORK_READY, READY, "");
        set.mark_true(SSH_KEY_READY, READY, "");
        set.set_summary(&[
            CONTROL_PLANE_ENDPOINT_READY,
            PRIVATE_NETWORK_READY,
            SSH_KEY_READY,
        ]);
        assert!(set.is_true(READY));
        assert_eq!(set.reason(READY), Some(AVAILABLE));
    }

    #[test]
    fn test_set_summary_with_unreported_condition() {
        let mut set = ConditionSet::new();
        set.set_summary(&[INSTANCE_READY]);
        assert_eq!(set.reason(READY), Some(NOT_REPORTED));
        assert!(!set.is_true(READY));
    }

    #[test]
    fn test_serializes_as_sorted_list() {
        let mut set = ConditionSet::new();
        set.mark_true(SSH_KEY_READY, READY, "");
        set.mark_false(CONTROL_PLANE_ENDPOINT_READY, WAITING_FOR_CONTROL_PLANE_ENDPOINT, "");

        let json = serde_json::to_value(&set).unwrap();
        let types: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec![CONTROL_PLANE_ENDPOINT_READY, SSH_KEY_READY]);
        assert_eq!(json[0]["status"], "False");
        assert!(json[0]["lastTransitionTime"].is_string());
    }

    #[test]
    fn test_duplicate_types_collapse_to_last() {
        let json = serde_json::json!([
            {"type": "Ready", "status": "False", "reason": "A", "message": "", "lastTransitionTime": "2024-01-01T00:00:00Z"},
            {"type": "Ready", "status": "True", "reason": "B", "message": "", "lastTransitionTime": "2024-01-02T00:00:00Z"}
        ]);
        let set: ConditionSet = serde_json::from_value(json).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.reason(READY), Some("B"));
        assert!(set.is_true(READY));
    }

    #[test]
    fn test_remove() {
        let mut set = ConditionSet::new();
        set.mark_unknown(PRIVATE_NETWORK_ATTACHED, MACHINE_PRIVATE_NETWORK_ATTACHING, "");
        assert!(set.remove(PRIVATE_NETWORK_ATTACHED).is_some());
        assert!(set.is_empty());
    }
}
