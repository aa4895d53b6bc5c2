//! Workflow expander: turns a template into a chain of submitted tasks.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use conductor_core::workflow::WorkflowTemplate;

use super::manager::Orchestrator;
use super::record::TaskRequest;

/// Per-run inputs for a workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowOptions {
    /// Substituted for `{goal}` in step task text.
    pub goal: String,
    pub working_directory: Option<PathBuf>,
    /// Replacement task text keyed by step index. Role, priority and
    /// dependencies of the step are kept.
    pub overrides: HashMap<usize, String>,
}

/// Map step-index dependencies of step `index` onto already-assigned ids.
///
/// Indices that do not point at an earlier step are dropped.
pub fn resolve_dependencies(
    template: &str,
    index: usize,
    dependencies: &[usize],
    assigned: &[String],
) -> Vec<String> {
    dependencies
        .iter()
        .filter_map(|&dep| {
            if dep < index && dep < assigned.len() {
                Some(assigned[dep].clone())
            } else {
                warn!(
                    workflow = template,
                    step = index,
                    dependency = dep,
                    "Dropping invalid workflow dependency"
                );
                None
            }
        })
        .collect()
}

/// Submit every step of `template` in order. Returns the process ids, one
/// per step.
pub async fn execute(
    orchestrator: &Orchestrator,
    template: &WorkflowTemplate,
    options: &WorkflowOptions,
) -> Vec<String> {
    let mut ids: Vec<String> = Vec::with_capacity(template.steps.len());
    for (index, step) in template.steps.iter().enumerate() {
        let task = options
            .overrides
            .get(&index)
            .cloned()
            .or_else(|| template.render_task(index, &options.goal))
            .unwrap_or_default();
        let mut request = TaskRequest::new(task)
            .with_priority(i64::from(step.priority))
            .with_role(step.role.clone())
            .with_dependencies(resolve_dependencies(
                &template.name,
                index,
                &step.dependencies,
                &ids,
            ));
        request.working_directory.clone_from(&options.working_directory);
        ids.push(orchestrator.submit(request).await);
    }
    info!(workflow = %template.name, steps = ids.len(), "Workflow submitted");
    ids
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use conductor_core::config::OrchestratorConfig;
    use conductor_core::status::ProcessStatus;
    use conductor_core::workflow::{WorkflowStep, builtin_templates, find_template};

    use crate::subprocess::ManualLauncher;

    fn orchestrator(launcher: &Arc<ManualLauncher>) -> Orchestrator {
        Orchestrator::new(
            OrchestratorConfig {
                worker_executable_path: Some("/usr/local/bin/agent".into()),
                ..Default::default()
            },
            launcher.clone(),
        )
    }

    #[test]
    fn forward_and_out_of_range_dependencies_are_dropped() {
        let assigned = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            resolve_dependencies("t", 2, &[0, 1, 2, 7], &assigned),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(resolve_dependencies("t", 0, &[0], &[]).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn feature_workflow_wires_dependencies() {
        let launcher = Arc::new(ManualLauncher::new());
        let orchestrator = orchestrator(&launcher);
        orchestrator.start().await;

        let templates = builtin_templates();
        let feature = find_template(&templates, "feature").unwrap();
        let options = WorkflowOptions {
            goal: "user login".to_string(),
            ..Default::default()
        };
        let ids = execute(&orchestrator, feature, &options).await;
        assert_eq!(ids.len(), feature.steps.len());

        let first = orchestrator.get(&ids[0]).await.unwrap();
        assert_eq!(first.role, feature.steps[0].role);
        assert!(first.task.contains("user login"));
        assert!(first.dependencies.is_empty());

        for (index, step) in feature.steps.iter().enumerate() {
            let snapshot = orchestrator.get(&ids[index]).await.unwrap();
            let expected: Vec<String> = step.dependencies.iter().map(|&d| ids[d].clone()).collect();
            assert_eq!(snapshot.dependencies, expected, "step {index}");
        }

        // Only the root step can run; the rest wait on dependencies.
        assert_eq!(launcher.launch_count(), 1);
        assert_eq!(first.status, ProcessStatus::Running);
        assert_eq!(orchestrator.list_pending().await.len(), ids.len() - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overrides_replace_only_task_text() {
        let launcher = Arc::new(ManualLauncher::new());
        let orchestrator = orchestrator(&launcher);
        let template = WorkflowTemplate {
            name: "pair".to_string(),
            description: String::new(),
            steps: vec![
                WorkflowStep {
                    task: "Design {goal}".to_string(),
                    role: "architect".to_string(),
                    priority: 9,
                    dependencies: vec![],
                },
                WorkflowStep {
                    task: "Build {goal}".to_string(),
                    role: "implementer".to_string(),
                    priority: 6,
                    dependencies: vec![0, 1],
                },
            ],
        };
        let options = WorkflowOptions {
            goal: "cache".to_string(),
            working_directory: Some("/srv/app".into()),
            overrides: HashMap::from([(1, "Build it with LRU eviction".to_string())]),
        };

        let ids = execute(&orchestrator, &template, &options).await;
        let second = orchestrator.get(&ids[1]).await.unwrap();
        assert_eq!(second.task, "Build it with LRU eviction");
        assert_eq!(second.role, "implementer");
        assert_eq!(second.priority, 6);
        // The self-reference is dropped.
        assert_eq!(second.dependencies, vec![ids[0].clone()]);
        assert_eq!(second.working_directory, Some(PathBuf::from("/srv/app")));
        assert_eq!(orchestrator.get(&ids[0]).await.unwrap().task, "Design cache");
    }

    #[test]
    fn options_accept_string_index_keys() {
        let options: WorkflowOptions =
            serde_json::from_str(r#"{"goal":"x","overrides":{"2":"custom"}}"#).unwrap();
        assert_eq!(options.overrides.get(&2).map(String::as_str), Some("custom"));
        assert!(options.working_directory.is_none());
    }
}
