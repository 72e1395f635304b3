//! Minimal field-level patches between remote and desired state.
//!
//! Every patch field is tri-state at the wire level: omitted (no change)
//! or present with a value. The milestone field adds a third state,
//! present-and-null, so clearing a milestone never looks like "no change".

use serde::Serialize;

use crate::model::LocalIssue;
use crate::sync::tracker::{RemoteIssue, RemoteMilestone, RemoteState};

/// Line prefixes of relationship annotations older versions wrote into
/// issue bodies. They are ignored when comparing bodies.
const LEGACY_ANNOTATIONS: [&str; 4] = ["Blocked by: #", "Blocks: #", "Parent: #", "Depends on: #"];

/// Changed fields of a remote issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<RemoteState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,
    /// `Some(None)` serializes as `"milestone": null`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<Option<u64>>,
}

impl UpdatePatch {
    /// Patch that only changes the state.
    #[must_use]
    pub fn state(state: RemoteState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// True iff at least one field is set.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.title.is_some()
            || self.body.is_some()
            || self.state.is_some()
            || self.labels.is_some()
            || self.issue_type.is_some()
            || self.milestone.is_some()
    }

    /// Names of the changed fields, for logs and dry-run output.
    #[must_use]
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push("title");
        }
        if self.body.is_some() {
            fields.push("body");
        }
        if self.state.is_some() {
            fields.push("state");
        }
        if self.labels.is_some() {
            fields.push("labels");
        }
        if self.issue_type.is_some() {
            fields.push("type");
        }
        if self.milestone.is_some() {
            fields.push("milestone");
        }
        fields
    }
}

/// Changed fields of a remote milestone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MilestonePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<RemoteState>,
}

impl MilestonePatch {
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.title.is_some() || self.description.is_some() || self.state.is_some()
    }
}

/// Compute the minimal patch taking `remote` to the desired state.
#[must_use]
pub fn build_update(
    remote: &RemoteIssue,
    local: &LocalIssue,
    desired_body: &str,
    desired_state: RemoteState,
    desired_type: Option<&str>,
    desired_labels: &[String],
    desired_milestone: Option<u64>,
) -> UpdatePatch {
    let mut patch = UpdatePatch::default();

    if remote.title != local.title {
        patch.title = Some(local.title.clone());
    }

    if normalize_body(&remote.body) != normalize_body(desired_body) {
        patch.body = Some(desired_body.to_string());
    }

    if remote.state != desired_state {
        patch.state = Some(desired_state);
    }

    let desired = sorted_labels(desired_labels);
    if sorted_labels(&remote.labels) != desired {
        patch.labels = Some(desired);
    }

    match desired_type {
        Some(wanted) if !wanted.is_empty() && remote.issue_type.as_deref() != Some(wanted) => {
            patch.issue_type = Some(wanted.to_string());
        }
        _ => {}
    }

    if remote.milestone != desired_milestone {
        patch.milestone = Some(desired_milestone);
    }

    patch
}

/// Compute the minimal patch for a milestone.
#[must_use]
pub fn build_milestone_update(
    remote: &RemoteMilestone,
    title: &str,
    description: &str,
    state: RemoteState,
) -> MilestonePatch {
    MilestonePatch {
        title: (remote.title != title).then(|| title.to_string()),
        description: (normalize_body(&remote.description) != normalize_body(description))
            .then(|| description.to_string()),
        state: (remote.state != state).then_some(state),
    }
}

/// Drop legacy annotation lines and trailing whitespace.
#[must_use]
pub fn normalize_body(body: &str) -> String {
    let kept: Vec<&str> = body
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !LEGACY_ANNOTATIONS
                .iter()
                .any(|prefix| trimmed.starts_with(prefix))
        })
        .collect();
    kept.join("\n").trim_end().to_string()
}

fn sorted_labels(labels: &[String]) -> Vec<String> {
    let mut sorted = labels.to_vec();
    sorted.sort();
    sorted.dedup();
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote() -> RemoteIssue {
        RemoteIssue {
            id: 1001,
            number: 1,
            title: "Fix bug".into(),
            body: "Details".into(),
            state: RemoteState::Open,
            labels: vec!["frontend".into(), "api".into()],
            issue_type: Some("Bug".into()),
            milestone: None,
            url: "https://github.example/o/r/issues/1".into(),
        }
    }

    fn local() -> LocalIssue {
        LocalIssue::new("t1", "Fix bug").with_body("Details")
    }

    fn labels() -> Vec<String> {
        vec!["api".into(), "frontend".into()]
    }

    fn patch_for(remote: &RemoteIssue, local: &LocalIssue) -> UpdatePatch {
        build_update(
            remote,
            local,
            &local.body,
            RemoteState::Open,
            Some("Bug"),
            &labels(),
            None,
        )
    }

    #[test]
    fn test_identical_pair_has_no_changes() {
        let patch = patch_for(&remote(), &local());
        assert!(!patch.has_changes());
        assert_eq!(serde_json::to_value(&patch).unwrap(), json!({}));
    }

    #[test]
    fn test_single_field_differences() {
        let mut renamed = local();
        renamed.title = "Fix the bug".into();
        let patch = patch_for(&remote(), &renamed);
        assert_eq!(patch.changed_fields(), vec!["title"]);

        let rebodied = local().with_body("New details");
        assert_eq!(patch_for(&remote(), &rebodied).changed_fields(), vec!["body"]);

        let patch = build_update(
            &remote(),
            &local(),
            "Details",
            RemoteState::Closed,
            Some("Bug"),
            &labels(),
            None,
        );
        assert_eq!(patch.changed_fields(), vec!["state"]);
    }

    #[test]
    fn test_label_order_is_ignored() {
        let mut reordered = remote();
        reordered.labels = vec!["api".into(), "frontend".into()];
        assert!(!patch_for(&reordered, &local()).has_changes());

        let patch = build_update(
            &remote(),
            &local(),
            "Details",
            RemoteState::Open,
            Some("Bug"),
            &["api".to_string()],
            None,
        );
        assert_eq!(patch.labels, Some(vec!["api".to_string()]));
    }

    #[test]
    fn test_type_only_when_desired_non_empty() {
        let patch = build_update(
            &remote(),
            &local(),
            "Details",
            RemoteState::Open,
            Some(""),
            &labels(),
            None,
        );
        assert!(!patch.has_changes());

        let patch = build_update(
            &remote(),
            &local(),
            "Details",
            RemoteState::Open,
            None,
            &labels(),
            None,
        );
        assert!(!patch.has_changes());

        let patch = build_update(
            &remote(),
            &local(),
            "Details",
            RemoteState::Open,
            Some("Feature"),
            &labels(),
            None,
        );
        assert_eq!(patch.issue_type.as_deref(), Some("Feature"));
    }

    #[test]
    fn test_milestone_clear_serializes_as_null() {
        let mut with_milestone = remote();
        with_milestone.milestone = Some(1);
        let patch = patch_for(&with_milestone, &local());

        assert_eq!(patch.milestone, Some(None));
        assert!(patch.has_changes());
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, json!({"milestone": null}));
    }

    #[test]
    fn test_milestone_set() {
        let patch = build_update(
            &remote(),
            &local(),
            "Details",
            RemoteState::Open,
            Some("Bug"),
            &labels(),
            Some(3),
        );
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!({"milestone": 3})
        );
    }

    #[test]
    fn test_legacy_annotations_do_not_diff() {
        let mut annotated = remote();
        annotated.body = "Details\n\nBlocked by: #4, #5\nParent: #2\n".into();
        assert!(!patch_for(&annotated, &local()).has_changes());
    }

    #[test]
    fn test_milestone_patch() {
        let remote = RemoteMilestone {
            number: 2,
            title: "v1".into(),
            description: "First".into(),
            state: RemoteState::Open,
            url: String::new(),
        };
        assert!(!build_milestone_update(&remote, "v1", "First", RemoteState::Open).has_changes());

        let patch = build_milestone_update(&remote, "v1", "First", RemoteState::Closed);
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!({"state": "closed"})
        );
    }
}
