//! Workflow templates: named, ordered lists of role-tagged steps.
//!
//! A step may depend on earlier steps by index. Task text may contain a
//! `{goal}` placeholder, filled in when the workflow is executed.

use serde::{Deserialize, Serialize};

/// Placeholder replaced by the caller's goal string.
pub const GOAL_PLACEHOLDER: &str = "{goal}";

/// One step of a workflow template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub task: String,
    pub role: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Indices of earlier steps that must complete first.
    #[serde(default)]
    pub dependencies: Vec<usize>,
}

const fn default_priority() -> u8 {
    5
}

/// A named workflow template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowTemplate {
    /// Task text for a step with the goal substituted.
    pub fn render_task(&self, index: usize, goal: &str) -> Option<String> {
        self.steps
            .get(index)
            .map(|step| step.task.replace(GOAL_PLACEHOLDER, goal))
    }
}

fn step(task: &str, role: &str, priority: u8, dependencies: &[usize]) -> WorkflowStep {
    WorkflowStep {
        task: task.to_string(),
        role: role.to_string(),
        priority,
        dependencies: dependencies.to_vec(),
    }
}

/// Built-in templates in stable order.
pub fn builtin_templates() -> Vec<WorkflowTemplate> {
    vec![
        WorkflowTemplate {
            name: "feature".to_string(),
            description: "Design, implement, test, review and document a feature".to_string(),
            steps: vec![
                step("Design the architecture for: {goal}", "architect", 8, &[]),
                step("Implement: {goal}", "implementer", 7, &[0]),
                step("Write and run tests for: {goal}", "tester", 6, &[1]),
                step("Review the implementation of: {goal}", "reviewer", 6, &[1, 2]),
                step("Document: {goal}", "documenter", 4, &[3]),
            ],
        },
        WorkflowTemplate {
            name: "bugfix".to_string(),
            description: "Reproduce, fix, verify and review a defect".to_string(),
            steps: vec![
                step("Reproduce the bug and write a failing test: {goal}", "tester", 9, &[]),
                step("Fix the bug: {goal}", "implementer", 9, &[0]),
                step("Verify the fix and check for regressions: {goal}", "tester", 8, &[1]),
                step("Review the fix for: {goal}", "reviewer", 7, &[2]),
            ],
        },
        WorkflowTemplate {
            name: "review".to_string(),
            description: "Parallel code review and coverage audit, then a summary".to_string(),
            steps: vec![
                step("Review the code in: {goal}", "reviewer", 6, &[]),
                step("Audit test coverage of: {goal}", "tester", 6, &[]),
                step("Summarize review findings for: {goal}", "documenter", 4, &[0, 1]),
            ],
        },
        WorkflowTemplate {
            name: "release".to_string(),
            description: "Test, build, write release notes and deploy".to_string(),
            steps: vec![
                step("Run the full test suite for release: {goal}", "tester", 9, &[]),
                step("Build release artifacts for: {goal}", "devops", 8, &[0]),
                step("Write release notes for: {goal}", "documenter", 5, &[0]),
                step("Deploy release: {goal}", "devops", 8, &[1, 2]),
            ],
        },
    ]
}

/// Merge user templates over the built-ins.
///
/// A user template with the same name as a built-in replaces it in place;
/// the rest are appended in the given order.
pub fn merge_templates(extra: &[WorkflowTemplate]) -> Vec<WorkflowTemplate> {
    let mut templates = builtin_templates();
    for template in extra {
        if let Some(existing) = templates.iter_mut().find(|t| t.name == template.name) {
            *existing = template.clone();
        } else {
            templates.push(template.clone());
        }
    }
    templates
}

/// Find a template by name (case-insensitive).
pub fn find_template<'a>(
    templates: &'a [WorkflowTemplate],
    name: &str,
) -> Option<&'a WorkflowTemplate> {
    templates
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(name.trim()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::roles::find_role;

    #[test]
    fn builtin_dependencies_point_backwards() {
        for template in builtin_templates() {
            for (i, step) in template.steps.iter().enumerate() {
                for &dep in &step.dependencies {
                    assert!(dep < i, "{}: step {i} depends on {dep}", template.name);
                }
            }
        }
    }

    #[test]
    fn builtin_roles_exist() {
        for template in builtin_templates() {
            for step in &template.steps {
                assert!(
                    find_role(&step.role).is_some(),
                    "{} uses unknown role {}",
                    template.name,
                    step.role
                );
            }
        }
    }

    #[test]
    fn render_task_substitutes_goal() {
        let templates = builtin_templates();
        let feature = find_template(&templates, "Feature").unwrap();
        assert_eq!(
            feature.render_task(1, "OAuth login").unwrap(),
            "Implement: OAuth login"
        );
        assert!(feature.render_task(99, "x").is_none());
    }

    #[test]
    fn merge_overrides_by_name_and_appends() {
        let custom = WorkflowTemplate {
            name: "review".to_string(),
            description: String::new(),
            steps: vec![step("Just review {goal}", "reviewer", 5, &[])],
        };
        let extra = WorkflowTemplate {
            name: "spike".to_string(),
            description: String::new(),
            steps: vec![step("Prototype {goal}", "generalist", 3, &[])],
        };
        let merged = merge_templates(&[custom, extra]);
        let builtin_count = builtin_templates().len();
        assert_eq!(merged.len(), builtin_count + 1);
        assert_eq!(find_template(&merged, "review").unwrap().steps.len(), 1);
        assert_eq!(merged.last().unwrap().name, "spike");
    }

    #[test]
    fn step_deserializes_with_defaults() {
        let step: WorkflowStep =
            serde_json::from_str(r#"{"task":"t","role":"tester"}"#).unwrap();
        assert_eq!(step.priority, 5);
        assert!(step.dependencies.is_empty());
    }
}
