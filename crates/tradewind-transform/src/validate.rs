//! Pipeline input validation
//!
//! Errors are blocking; warnings are reserved. A step must name where it
//! reads from (`source`, `left`, or `sources` depending on the operator)
//! and where it writes (`output`).

use serde_json::Value;

use tradewind_core::validation::{ValidationIssue, ValidationResult};

use crate::types::CreatePipelineInput;

/// Validate a pipeline input document.
pub fn validate_pipeline(input: &CreatePipelineInput) -> ValidationResult {
    let mut errors = Vec::new();
    if input.name.trim().is_empty() {
        errors.push(ValidationIssue::required("name"));
    }
    if input.steps.is_empty() {
        errors.push(ValidationIssue::required("steps"));
    }
    for (index, step) in input.steps.iter().enumerate() {
        let config = step.config.as_object();
        let has_source = config.is_some_and(|c| {
            ["source", "left", "sources"].iter().any(|key| {
                c.get(*key)
                    .map(|v| !v.is_null() && v != &Value::String(String::new()))
                    .unwrap_or(false)
            })
        });
        if !has_source {
            errors.push(ValidationIssue::required(format!("steps[{index}].source")));
        }
        let has_output = config.is_some_and(|c| {
            c.get("output")
                .and_then(Value::as_str)
                .is_some_and(|s| !s.trim().is_empty())
        });
        if !has_output {
            errors.push(ValidationIssue::required(format!("steps[{index}].output")));
        }
    }
    ValidationResult::from_errors(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StepType, TransformStep};
    use serde_json::json;
    use tradewind_core::validation::REQUIRED_FIELD;

    fn step(config: Value) -> TransformStep {
        TransformStep {
            id: "s1".to_string(),
            name: None,
            step_type: StepType::Filter,
            config,
            order: 0,
            depends_on: vec![],
        }
    }

    #[test]
    fn test_empty_name_is_required_field() {
        let input = CreatePipelineInput {
            name: String::new(),
            steps: vec![step(json!({"source": "a", "output": "b"}))],
            ..Default::default()
        };
        let result = validate_pipeline(&input);
        assert!(!result.valid);
        assert_eq!(result.errors[0].code, REQUIRED_FIELD);
        assert_eq!(result.errors[0].field, "name");
    }

    #[test]
    fn test_empty_steps_rejected() {
        let input = CreatePipelineInput {
            name: "p".to_string(),
            ..Default::default()
        };
        let result = validate_pipeline(&input);
        assert!(result.errors.iter().any(|e| e.field == "steps"));
    }

    #[test]
    fn test_step_needs_source_and_output() {
        let input = CreatePipelineInput {
            name: "p".to_string(),
            steps: vec![step(json!({}))],
            ..Default::default()
        };
        let result = validate_pipeline(&input);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["steps[0].source", "steps[0].output"]);
    }

    #[test]
    fn test_left_and_sources_count_as_source() {
        for config in [
            json!({"left": "a", "right": "b", "output": "o"}),
            json!({"sources": ["a", "b"], "output": "o"}),
        ] {
            let input = CreatePipelineInput {
                name: "p".to_string(),
                steps: vec![step(config)],
                ..Default::default()
            };
            assert!(validate_pipeline(&input).valid);
        }
    }
}
