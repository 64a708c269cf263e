// src/task/outputs.rs

//! Completed/incomplete outputs of a task instance.

use std::collections::BTreeMap;

pub const OUTPUT_EXPIRED: &str = "expired";
pub const OUTPUT_SUBMITTED: &str = "submitted";
pub const OUTPUT_SUBMIT_FAILED: &str = "submit-failed";
pub const OUTPUT_STARTED: &str = "started";
pub const OUTPUT_SUCCEEDED: &str = "succeeded";
pub const OUTPUT_FAILED: &str = "failed";

/// Standard outputs, in the order they are reported.
pub const STANDARD_OUTPUTS: [&str; 6] = [
    OUTPUT_EXPIRED,
    OUTPUT_SUBMITTED,
    OUTPUT_SUBMIT_FAILED,
    OUTPUT_STARTED,
    OUTPUT_SUCCEEDED,
    OUTPUT_FAILED,
];

/// Normalise trigger shorthand (`succeed`, `fail`, ...) to an output label.
pub fn normalise_output_label(label: &str) -> &str {
    match label {
        "succeed" | "success" => OUTPUT_SUCCEEDED,
        "fail" => OUTPUT_FAILED,
        "submit" => OUTPUT_SUBMITTED,
        "submit-fail" => OUTPUT_SUBMIT_FAILED,
        "start" => OUTPUT_STARTED,
        "expire" => OUTPUT_EXPIRED,
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Output {
    label: String,
    message: String,
    completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutputs {
    outputs: Vec<Output>,
}

impl TaskOutputs {
    /// Standard outputs plus the given custom `label -> message` pairs.
    pub fn new(custom: &BTreeMap<String, String>) -> Self {
        let mut outputs: Vec<Output> = STANDARD_OUTPUTS
            .iter()
            .map(|label| Output {
                label: label.to_string(),
                message: label.to_string(),
                completed: false,
            })
            .collect();
        outputs.extend(custom.iter().map(|(label, message)| Output {
            label: label.clone(),
            message: message.clone(),
            completed: false,
        }));
        Self { outputs }
    }

    pub fn is_standard(label: &str) -> bool {
        STANDARD_OUTPUTS.contains(&label)
    }

    pub fn exists(&self, label: &str) -> bool {
        self.outputs.iter().any(|o| o.label == label)
    }

    pub fn is_completed(&self, label: &str) -> bool {
        self.outputs.iter().any(|o| o.label == label && o.completed)
    }

    pub fn set_completion(&mut self, label: &str, completed: bool) {
        if let Some(o) = self.outputs.iter_mut().find(|o| o.label == label) {
            o.completed = completed;
        }
    }

    /// Complete the output whose message is `message`; returns its label.
    pub fn set_msg_completed(&mut self, message: &str) -> Option<String> {
        let o = self.outputs.iter_mut().find(|o| o.message == message)?;
        o.completed = true;
        Some(o.label.clone())
    }

    pub fn label_for_message(&self, message: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|o| o.message == message)
            .map(|o| o.label.as_str())
    }

    pub fn message_for_label(&self, label: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|o| o.label == label)
            .map(|o| o.message.as_str())
    }

    pub fn set_all_incomplete(&mut self) {
        for o in self.outputs.iter_mut() {
            o.completed = false;
        }
    }

    pub fn set_all_completed(&mut self) {
        for o in self.outputs.iter_mut() {
            o.completed = true;
        }
    }

    /// Labels of completed outputs, standard ones first.
    pub fn completed_labels(&self) -> Vec<&str> {
        self.outputs
            .iter()
            .filter(|o| o.completed)
            .map(|o| o.label.as_str())
            .collect()
    }

    /// Messages of completed outputs (what gets persisted).
    pub fn completed_messages(&self) -> Vec<String> {
        self.outputs
            .iter()
            .filter(|o| o.completed)
            .map(|o| o.message.clone())
            .collect()
    }

    /// Custom (non-standard) outputs as `(label, message)`.
    pub fn custom(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outputs
            .iter()
            .filter(|o| !Self::is_standard(&o.label))
            .map(|o| (o.label.as_str(), o.message.as_str()))
    }

    /// All outputs as `(label, message, completed)`.
    pub fn all(&self) -> impl Iterator<Item = (&str, &str, bool)> {
        self.outputs
            .iter()
            .map(|o| (o.label.as_str(), o.message.as_str(), o.completed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_custom() -> TaskOutputs {
        let mut custom = BTreeMap::new();
        custom.insert("x".to_string(), "file x ready".to_string());
        TaskOutputs::new(&custom)
    }

    #[test]
    fn completes_by_message_and_label() {
        let mut outputs = with_custom();
        assert_eq!(outputs.set_msg_completed("file x ready"), Some("x".to_string()));
        assert!(outputs.is_completed("x"));
        assert_eq!(outputs.set_msg_completed("nonsense"), None);

        outputs.set_completion(OUTPUT_STARTED, true);
        outputs.set_completion(OUTPUT_SUBMITTED, true);
        assert_eq!(outputs.completed_labels(), vec!["submitted", "started", "x"]);
        assert_eq!(outputs.custom().count(), 1);
    }

    #[test]
    fn normalises_trigger_shorthand() {
        assert_eq!(normalise_output_label("fail"), OUTPUT_FAILED);
        assert_eq!(normalise_output_label("x"), "x");
    }
}
