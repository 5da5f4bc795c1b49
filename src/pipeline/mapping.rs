//! Row reshaping between source and destination: renames, projections,
//! defaults and staging overlays.
use serde_json::Value;

use crate::backend::{is_non_empty, Row};
use crate::pipeline::job::{OverlayMode, OverlaySpec};

/// Declarative column remap applied to each row right before it is written.
///
/// Order of application: renames, projection, drops, blank-to-null, defaults,
/// forced values.
#[derive(Debug, Clone, Default)]
pub struct FieldMapping {
    renames: Vec<(&'static str, &'static str)>,
    keep: Option<&'static [&'static str]>,
    drops: Vec<&'static str>,
    blank_to_null: Vec<&'static str>,
    defaults: Vec<(&'static str, Value)>,
    forced: Vec<(&'static str, Value)>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rename(mut self, from: &'static str, to: &'static str) -> Self {
        self.renames.push((from, to));
        self
    }

    /// Keep only these columns (after renames).
    pub fn keep(mut self, columns: &'static [&'static str]) -> Self {
        self.keep = Some(columns);
        self
    }

    pub fn drop(mut self, column: &'static str) -> Self {
        self.drops.push(column);
        self
    }

    /// Empty strings in `column` become null.
    pub fn blank_to_null(mut self, column: &'static str) -> Self {
        self.blank_to_null.push(column);
        self
    }

    /// Fill `column` when it is missing or null.
    pub fn default_value(mut self, column: &'static str, value: Value) -> Self {
        self.defaults.push((column, value));
        self
    }

    /// Always set `column`, whatever the source says.
    pub fn force(mut self, column: &'static str, value: Value) -> Self {
        self.forced.push((column, value));
        self
    }

    pub fn apply(&self, mut row: Row) -> Row {
        for (from, to) in &self.renames {
            if let Some(v) = row.remove(*from) {
                row.insert((*to).to_string(), v);
            }
        }
        if let Some(keep) = self.keep {
            row.retain(|k, _| keep.contains(&k.as_str()));
        }
        for column in &self.drops {
            row.remove(*column);
        }
        for column in &self.blank_to_null {
            if let Some(v) = row.get_mut(*column) {
                if v.as_str().is_some_and(str::is_empty) {
                    *v = Value::Null;
                }
            }
        }
        for (column, value) in &self.defaults {
            let entry = row.entry(*column).or_insert(Value::Null);
            if entry.is_null() {
                *entry = value.clone();
            }
        }
        for (column, value) in &self.forced {
            row.insert((*column).to_string(), value.clone());
        }
        row
    }
}

/// Copy overlay fields from `overlay` (a row of another table for the same
/// key) onto `row`.
pub fn apply_overlay(row: &mut Row, overlay: Option<&Row>, spec: &OverlaySpec) {
    for field in spec.fields {
        let value = overlay.and_then(|o| o.get(*field));
        match spec.mode {
            OverlayMode::WhenPresent => {
                if let Some(v) = value {
                    row.insert((*field).to_string(), v.clone());
                }
            }
            OverlayMode::WhenNonEmpty => {
                if let Some(v) = value.filter(|v| is_non_empty(v)) {
                    row.insert((*field).to_string(), v.clone());
                }
            }
            OverlayMode::Always => {
                row.insert((*field).to_string(), value.cloned().unwrap_or(Value::Null));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::row;
    use crate::pipeline::job::Side;
    use serde_json::json;

    fn overlay(mode: OverlayMode) -> OverlaySpec {
        OverlaySpec {
            side: Side::Destination,
            table: "stagedbuckets",
            key_column: "user_id",
            fields: &["resume_url", "avatar_url"],
            mode,
        }
    }

    #[test]
    fn mapping_steps_apply_in_order() {
        let mapping = FieldMapping::new()
            .rename("id", "user_id")
            .keep(&["user_id", "resume_url", "avatar_url", "wav_file_url"])
            .blank_to_null("wav_file_url")
            .default_value("resume_url", json!(""))
            .force("avatar_url", Value::Null);
        let out = mapping.apply(row(json!({
            "id": 7, "email": "a@b", "avatar_url": "x", "wav_file_url": ""
        })));
        assert_eq!(
            out,
            row(json!({"user_id": 7, "resume_url": "", "avatar_url": null, "wav_file_url": null}))
        );
    }

    #[test]
    fn drop_removes_columns() {
        let out = FieldMapping::new().drop("secret").apply(row(json!({"id": 1, "secret": 2})));
        assert_eq!(out, row(json!({"id": 1})));
    }

    #[test]
    fn when_present_copies_nulls_and_blanks() {
        let mut target = row(json!({"id": 1, "resume_url": "old", "avatar_url": "old"}));
        let staged = row(json!({"user_id": 1, "resume_url": "", "avatar_url": null}));
        apply_overlay(&mut target, Some(&staged), &overlay(OverlayMode::WhenPresent));
        assert_eq!(target, row(json!({"id": 1, "resume_url": "", "avatar_url": null})));
    }

    #[test]
    fn when_non_empty_keeps_source_for_blank_staging() {
        let mut target = row(json!({"id": 1, "resume_url": "old", "avatar_url": "old"}));
        let staged = row(json!({"user_id": 1, "resume_url": " ", "avatar_url": "new"}));
        apply_overlay(&mut target, Some(&staged), &overlay(OverlayMode::WhenNonEmpty));
        assert_eq!(target["resume_url"], json!("old"));
        assert_eq!(target["avatar_url"], json!("new"));
    }

    #[test]
    fn always_defaults_to_null_without_overlay_row() {
        let mut target = row(json!({"id": 1}));
        apply_overlay(&mut target, None, &overlay(OverlayMode::Always));
        assert_eq!(target, row(json!({"id": 1, "resume_url": null, "avatar_url": null})));
        let mut untouched = row(json!({"id": 1, "resume_url": "r"}));
        apply_overlay(&mut untouched, None, &overlay(OverlayMode::WhenPresent));
        assert_eq!(untouched["resume_url"], json!("r"));
    }
}
