// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Error recovery suggestions
//!
//! Provides actionable suggestions for recovering from errors.

use crate::pipeline::StepLink;

use super::StepflowError;

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
}

impl RecoverySuggestion {
    /// Suggest how to get a link created
    pub fn for_missing_link(link: &StepLink) -> Self {
        match link {
            StepLink::InternalImage(tag) => Self {
                action: format!("Produce pipeline image '{}'", tag),
                steps: vec![
                    format!("Add an image build whose 'to' is '{}'", tag),
                    format!("or add a base image named '{}' under base_images", tag),
                ],
            },
            StepLink::ExternalImage(reference) => Self {
                action: format!("Publish '{}'", reference),
                steps: vec![format!(
                    "Build a project image tagged '{}' so it is promoted to '{}'",
                    reference.tag, reference.name
                )],
            },
            StepLink::ReleaseImages => Self {
                action: "Create the stable output stream".into(),
                steps: vec!["Define at least one project image under images".into()],
            },
            StepLink::ReleasePayloadImage(name) => Self {
                action: format!("Import release payload '{}'", name),
                steps: vec![format!(
                    "Add '{}: <pull spec>' under releases in the build configuration",
                    name
                )],
            },
            StepLink::ImagesReady => Self {
                action: "Build the project images".into(),
                steps: vec!["Define the images the pipeline should build".into()],
            },
        }
    }

    /// Collect suggestions for an error, if any apply
    pub fn for_error(error: &StepflowError) -> Vec<Self> {
        match error {
            StepflowError::MissingDependencies { missing } => {
                let mut suggestions: Vec<Self> = Vec::new();
                let mut seen: Vec<&StepLink> = Vec::new();
                for entry in missing {
                    for link in &entry.links {
                        if !seen.contains(&link) {
                            seen.push(link);
                            suggestions.push(Self::for_missing_link(link));
                        }
                    }
                }
                suggestions
            }
            StepflowError::StepFailed { step, .. } => vec![Self {
                action: format!("Fix and re-run '{}'", step),
                steps: vec![
                    "Steps that already finished are skipped on the next run".into(),
                    format!("Run 'stepflow run --target {}' to retry only this step", step),
                ],
            }],
            StepflowError::ToolNotFound { tool, .. } => vec![Self {
                action: format!("Install {}", tool),
                steps: vec![format!("Install {} and ensure it's in your PATH", tool)],
            }],
            _ => Vec::new(),
        }
    }

    /// Format suggestion for display
    pub fn format(&self) -> String {
        let mut output = format!("→ {}\n", self.action);
        for step in &self.steps {
            output.push_str(&format!("    • {}\n", step));
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MissingDependencies;

    #[test]
    fn test_suggestions_are_deduplicated_per_link() {
        let err = StepflowError::MissingDependencies {
            missing: vec![
                MissingDependencies {
                    step: "a".into(),
                    links: vec![StepLink::internal_image("foo")],
                },
                MissingDependencies {
                    step: "b".into(),
                    links: vec![StepLink::internal_image("foo"), StepLink::ImagesReady],
                },
            ],
        };

        let suggestions = RecoverySuggestion::for_error(&err);
        assert_eq!(suggestions.len(), 2);
        assert!(suggestions[0].format().contains("foo"));
    }

    #[test]
    fn test_step_failure_suggests_targeted_retry() {
        let err = StepflowError::StepFailed {
            step: "bin".into(),
            description: "Build bin".into(),
            message: "exit 1".into(),
        };

        let suggestions = RecoverySuggestion::for_error(&err);
        assert_eq!(suggestions.len(), 1);
        assert!(suggestions[0].format().contains("--target bin"));
    }
}
