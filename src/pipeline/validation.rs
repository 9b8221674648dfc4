// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Pipeline validation
//!
//! Validates a step list before execution.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::errors::StepflowError;
use crate::pipeline::{link_names, Step, StepGraph};

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate `steps`, optionally restricted to `targets`
    pub fn validate(steps: &[Arc<dyn Step>], targets: &[String]) -> ValidationResult {
        let mut result = ValidationResult::new();

        if steps.is_empty() {
            result.add_error("Pipeline has no steps");
            return result;
        }

        // Check for empty and duplicate step names
        let mut seen_names = HashSet::new();
        for (position, step) in steps.iter().enumerate() {
            let name = step.name();
            if name.is_empty() {
                result.add_error(&format!("Step #{} has no name", position));
            } else if !seen_names.insert(name.clone()) {
                result.add_error(&format!("Duplicate step name: '{}'", name));
            }
        }

        // Parameters provided by more than one step
        let mut providers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for step in steps {
            if let Some((map, _)) = step.provides() {
                for name in map.keys() {
                    providers.entry(name.clone()).or_default().push(step.name());
                }
            }
        }
        for (parameter, steps) in providers.iter().filter(|(_, s)| s.len() > 1) {
            result.add_warning(&format!(
                "Parameter '{}' is provided by {}; the last one wins",
                parameter,
                steps.join(", ")
            ));
        }

        // Steps that neither require nor create anything
        for step in steps {
            if step.requires().is_empty() && step.creates().is_empty() {
                result.add_warning(&format!(
                    "Step '{}' has no links; it runs independently of everything else",
                    step.name()
                ));
            }
        }

        // Validate graph structure (missing producers and cycles)
        let graph = StepGraph::build(steps.to_vec());
        match graph.topological_sort() {
            Ok(_) => {}
            Err(StepflowError::MissingDependencies { missing }) => {
                for entry in missing {
                    result.add_error(&format!(
                        "Step '{}' is missing dependencies: {}",
                        entry.step,
                        link_names(&entry.links).join(", ")
                    ));
                }
            }
            Err(e) => result.add_error(&format!("Graph validation error: {}", e)),
        }

        if !targets.is_empty() {
            if let Err(e) = graph.dependency_closure(targets) {
                result.add_error(&e.to_string());
            }
        }

        result
    }
}

/// Result of pipeline validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::FakeStep;
    use crate::pipeline::{ParameterMap, Resolver, StepLink};

    #[test]
    fn test_validate_empty_pipeline() {
        let result = PipelineValidator::validate(&[], &[]);
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("no steps"));
    }

    #[test]
    fn test_validate_duplicate_names() {
        let steps = vec![
            FakeStep::new("dup")
                .creates(vec![StepLink::internal_image("a")])
                .build(),
            FakeStep::new("dup")
                .creates(vec![StepLink::internal_image("b")])
                .build(),
        ];

        let result = PipelineValidator::validate(&steps, &[]);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("Duplicate")));
    }

    #[test]
    fn test_validate_missing_dependency() {
        let steps = vec![FakeStep::new("A")
            .requires(vec![StepLink::internal_image("foo")])
            .build()];

        let result = PipelineValidator::validate(&steps, &[]);
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("'A'"));
        assert!(result.errors[0].contains("internal-image(foo)"));
    }

    #[test]
    fn test_validate_unknown_target() {
        let steps = vec![FakeStep::new("root")
            .creates(vec![StepLink::internal_image("root")])
            .build()];

        let result = PipelineValidator::validate(&steps, &["nope".to_string()]);
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("nope"));
    }

    #[test]
    fn test_validate_parameter_collision_warns() {
        let mut map = ParameterMap::new();
        map.insert("X".into(), Resolver::value("1"));
        let steps = vec![
            FakeStep::new("first")
                .creates(vec![StepLink::internal_image("a")])
                .provides(map.clone(), StepLink::internal_image("a"))
                .build(),
            FakeStep::new("second")
                .creates(vec![StepLink::internal_image("b")])
                .provides(map, StepLink::internal_image("b"))
                .build(),
        ];

        let result = PipelineValidator::validate(&steps, &[]);
        assert!(result.is_valid());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("'X'") && w.contains("first, second")));
    }
}
