//! Project Matcher
//!
//! Each research project owns a labeling convention for the patient names its
//! studies are exported under. A project is configured with a regular
//! expression carrying the named groups `subj_id` and `event_id`, plus a
//! template that rebuilds the registry-side subject identifier from the
//! captured groups. Matching is pure: decoding a label never touches the
//! registry or the filesystem.

use std::collections::HashSet;

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};

/// A project as it appears in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectDefinition {
    /// Project name as known to the subject registry
    pub name: String,
    /// Pattern applied to the patient identity, with `subj_id` and
    /// `event_id` named groups. Matching is anchored at the start.
    pub pattern: String,
    /// Template rebuilding the registry subject id, e.g. `"NDOSE_{subj_id}"`
    pub subject_template: String,
}

/// Compiled label pattern for one project.
#[derive(Debug, Clone)]
pub struct ProjectPattern {
    regex: Regex,
}

/// Raw pieces extracted from a matching label, before event validation.
#[derive(Debug, Clone)]
pub struct LabelParts {
    /// All named groups that captured, in declaration order
    pub fields: Vec<(String, String)>,
    /// Parsed `event_id` group, 1-based and not yet range checked
    pub event_index: usize,
}

impl ProjectPattern {
    /// Compile a configured pattern, requiring the two mandatory groups.
    pub fn compile(pattern: &str) -> Result<Self> {
        // \A pins the match to the start of the label; trailing text after
        // the pattern is still accepted, matching how exports append scan
        // qualifiers to the subject label.
        let regex = Regex::new(&format!(r"\A(?:{pattern})"))
            .map_err(|e| Error::Config(format!("invalid project pattern {pattern:?}: {e}")))?;
        for required in ["subj_id", "event_id"] {
            if !regex.capture_names().flatten().any(|n| n == required) {
                return Err(Error::Config(format!(
                    "project pattern {pattern:?} is missing the ({required}) named group"
                )));
            }
        }
        Ok(Self { regex })
    }

    /// Names of all capture groups in this pattern.
    pub fn group_names(&self) -> Vec<&str> {
        self.regex.capture_names().flatten().collect()
    }

    /// Match a patient label and pull out the named groups.
    ///
    /// Returns `None` when the label does not belong to this project, or when
    /// the event group captured something non-numeric.
    pub fn parse(&self, label: &str) -> Option<LabelParts> {
        let caps = self.regex.captures(label)?;
        let event_raw = caps.name("event_id")?.as_str();
        let event_index = match event_raw.parse::<usize>() {
            Ok(idx) => idx,
            Err(_) => {
                warn!(label, event = event_raw, "event id in label is not numeric");
                return None;
            }
        };
        let fields = self
            .regex
            .capture_names()
            .flatten()
            .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
            .collect();
        Some(LabelParts { fields, event_index })
    }
}

/// Subject id template with `{group}` placeholders.
#[derive(Debug, Clone)]
pub struct SubjectTemplate {
    template: String,
}

impl SubjectTemplate {
    /// Validate a template against the capture groups it may reference.
    pub fn compile(template: &str, pattern: &ProjectPattern) -> Result<Self> {
        let known = pattern.group_names();
        for placeholder in placeholders(template) {
            if !known.contains(&placeholder) {
                return Err(Error::Config(format!(
                    "subject template {template:?} references unknown group ({placeholder})"
                )));
            }
        }
        Ok(Self {
            template: template.to_string(),
        })
    }

    /// Substitute captured fields into the template.
    pub fn render(&self, fields: &[(String, String)]) -> String {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            rest = &rest[open + 1..];
            match rest.find('}') {
                Some(close) => {
                    let name = &rest[..close];
                    if let Some((_, value)) = fields.iter().find(|(n, _)| n == name) {
                        out.push_str(value);
                    }
                    rest = &rest[close + 1..];
                }
                None => break,
            }
        }
        out.push_str(rest);
        out
    }
}

/// Placeholder names referenced by a `{group}` template.
fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        rest = &rest[open + 1..];
        match rest.find('}') {
            Some(close) => {
                names.push(&rest[..close]);
                rest = &rest[close + 1..];
            }
            None => break,
        }
    }
    names
}

/// Per-project registry state, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct ProjectState {
    /// Event labels in registry declaration order; `event_id` N in a patient
    /// label selects the N-th entry (1-based)
    pub events: Vec<String>,
    /// Subject ids the registry already knows
    pub subjects: HashSet<String>,
}

/// Registry-side coordinates of one study.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyKey {
    pub subject_id: String,
    pub event_label: String,
}

/// A compiled project with its registry state.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pattern: ProjectPattern,
    template: SubjectTemplate,
    pub state: ProjectState,
}

impl Project {
    /// Compile a configured project definition. State starts empty and is
    /// filled by [`crate::registry::RegistryClient::load_project_state`].
    pub fn compile(def: &ProjectDefinition) -> Result<Self> {
        let pattern = ProjectPattern::compile(&def.pattern)?;
        let template = SubjectTemplate::compile(&def.subject_template, &pattern)?;
        Ok(Self {
            name: def.name.clone(),
            pattern,
            template,
            state: ProjectState::default(),
        })
    }

    /// Decode a patient label into this project's subject and event.
    ///
    /// `None` means the label is not claimed by this project: no pattern
    /// match, a non-numeric event, or an event index outside the project's
    /// known event list (indices are 1-based, so 0 is always rejected).
    pub fn decode(&self, label: &str) -> Option<StudyKey> {
        let parts = self.pattern.parse(label)?;
        if parts.event_index < 1 || parts.event_index > self.state.events.len() {
            warn!(
                project = %self.name,
                label,
                event_index = parts.event_index,
                known_events = self.state.events.len(),
                "event index out of range, label ignored"
            );
            return None;
        }
        let subject_id = self.template.render(&parts.fields);
        let event_label = self.state.events[parts.event_index - 1].clone();
        Some(StudyKey {
            subject_id,
            event_label,
        })
    }
}

/// Build a [`ProjectState`] from the registry's subject and event payloads.
pub fn state_from_registry(
    subjects: impl IntoIterator<Item = String>,
    events: IndexMap<String, String>,
) -> ProjectState {
    ProjectState {
        subjects: subjects.into_iter().collect(),
        events: events.into_values().collect(),
    }
}
