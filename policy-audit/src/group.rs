use crate::fingerprint::ContentFingerprint;
use crate::okta::OktaApplication;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Labels shown in a group title before collapsing into "+ N more".
const TITLE_LABEL_LIMIT: usize = 3;

/// An application paired with the sign-on rules of its access policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedApplication {
    pub app: OktaApplication,
    pub rules: Value
}

/// Applications keyed by the fingerprint of their rule content.
///
/// Keys keep first-insertion order and members keep append order. Groups are
/// never empty and never hold the same application twice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupedResult {
    groups: IndexMap<ContentFingerprint, Vec<AnnotatedApplication>>
}

impl GroupedResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `entry` under `fingerprint`. Returns false if the application
    /// is already in any group.
    pub fn insert(&mut self, fingerprint: ContentFingerprint, entry: AnnotatedApplication) -> bool {
        if self.contains_application(&entry.app.id) {
            return false;
        }
        self.groups.entry(fingerprint).or_default().push(entry);
        true
    }

    pub fn contains_application(&self, app_id: &str) -> bool {
        self.groups
            .values()
            .flatten()
            .any(|member| member.app.id == app_id)
    }

    pub fn get(&self, fingerprint: &ContentFingerprint) -> Option<&[AnnotatedApplication]> {
        self.groups.get(fingerprint).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContentFingerprint, &[AnnotatedApplication])> {
        self.groups
            .iter()
            .map(|(fingerprint, members)| (fingerprint, members.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn application_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

impl FromIterator<(ContentFingerprint, AnnotatedApplication)> for GroupedResult {
    fn from_iter<I: IntoIterator<Item = (ContentFingerprint, AnnotatedApplication)>>(
        iter: I
    ) -> Self {
        let mut grouped = Self::new();
        for (fingerprint, entry) in iter {
            grouped.insert(fingerprint, entry);
        }
        grouped
    }
}

/// Human-readable heading for a group of applications.
pub fn group_title(members: &[AnnotatedApplication]) -> String {
    match members {
        [] => String::new(),
        [only] => format!("Single app: {}", only.app.label),
        _ => {
            let mut title = members
                .iter()
                .take(TITLE_LABEL_LIMIT)
                .map(|member| member.app.label.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            if members.len() > TITLE_LABEL_LIMIT {
                title.push_str(&format!(" + {} more", members.len() - TITLE_LABEL_LIMIT));
            }
            title
        }
    }
}
