//! Control server: newline-delimited JSON-RPC over a byte stream.
//!
//! Each request maps onto one [`Orchestrator`] operation. Unknown process
//! ids are not errors; they produce `false` or `null` results.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument, warn};

use conductor_core::config::ConfigUpdate;
use conductor_core::protocol::{
    ControlError, ControlRequest, ControlResponse, encode_response, parse_request,
};
use conductor_core::roles;
use conductor_core::status::ProcessStatus;
use conductor_core::workflow::{WorkflowTemplate, find_template};

use crate::orchestration::workflow::{self, WorkflowOptions};
use crate::orchestration::{Orchestrator, TaskRequest};

/// Default row count for `history`.
const DEFAULT_HISTORY_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

#[derive(Debug, Deserialize)]
struct InputParams {
    id: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct PriorityParams {
    id: String,
    priority: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListParams {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunWorkflowParams {
    name: String,
    #[serde(default)]
    goal: String,
    #[serde(default)]
    working_directory: Option<PathBuf>,
    #[serde(default)]
    overrides: HashMap<usize, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HistoryParams {
    limit: Option<u32>,
}

/// Dispatches control requests onto an [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct ControlServer {
    orchestrator: Orchestrator,
    workflows: Vec<WorkflowTemplate>,
}

impl ControlServer {
    pub const fn new(orchestrator: Orchestrator, workflows: Vec<WorkflowTemplate>) -> Self {
        Self {
            orchestrator,
            workflows,
        }
    }

    pub const fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Handle one request.
    #[instrument(skip(self, request), fields(method = %request.method))]
    pub async fn handle(&self, request: &ControlRequest) -> ControlResponse {
        match self.dispatch(request).await {
            Ok(result) => ControlResponse::success(request.id.clone(), result),
            Err(e) => {
                debug!(error = %e, "Control request failed");
                ControlResponse::failure(request.id.clone(), &e)
            }
        }
    }

    async fn dispatch(&self, request: &ControlRequest) -> Result<Value, ControlError> {
        let orchestrator = &self.orchestrator;
        match request.method.as_str() {
            "submit" => {
                let task: TaskRequest = request.params()?;
                if task.task.trim().is_empty() {
                    return Err(ControlError::InvalidParams("task must not be empty".into()));
                }
                let id = orchestrator.submit(task).await;
                Ok(json!({ "id": id }))
            }
            "send_input" => {
                let p: InputParams = request.params()?;
                Ok(json!(orchestrator.send_input(&p.id, &p.text).await))
            }
            "stop" => {
                let p: IdParams = request.params()?;
                Ok(json!(orchestrator.stop(&p.id).await))
            }
            "update_priority" => {
                let p: PriorityParams = request.params()?;
                Ok(json!(orchestrator.update_priority(&p.id, p.priority).await))
            }
            "remove_task" => {
                let p: IdParams = request.params()?;
                Ok(json!(orchestrator.remove_task(&p.id).await))
            }
            "get" => {
                let p: IdParams = request.params()?;
                to_value(&orchestrator.get(&p.id).await)
            }
            "list" => {
                let p: ListParams = request.params()?;
                let processes = match p.status {
                    Some(status) => {
                        let status: ProcessStatus = status
                            .parse()
                            .map_err(|e: conductor_core::Error| {
                                ControlError::InvalidParams(e.to_string())
                            })?;
                        orchestrator.list_by_status(status).await
                    }
                    None => orchestrator.list_all().await,
                };
                to_value(&processes)
            }
            "list_pending" => to_value(&orchestrator.list_pending().await),
            "runtime" => {
                let p: IdParams = request.params()?;
                Ok(json!(orchestrator.runtime_seconds(&p.id).await))
            }
            "update_config" => {
                let update: ConfigUpdate = request.params()?;
                to_value(&orchestrator.update_config(update).await)
            }
            "get_config" => to_value(&orchestrator.config().await),
            "list_roles" => to_value(roles::list_roles()),
            "list_workflows" => to_value(&self.workflows),
            "run_workflow" => {
                let p: RunWorkflowParams = request.params()?;
                let template = find_template(&self.workflows, &p.name).ok_or_else(|| {
                    ControlError::InvalidParams(format!("unknown workflow {}", p.name))
                })?;
                let options = WorkflowOptions {
                    goal: p.goal,
                    working_directory: p.working_directory,
                    overrides: p.overrides,
                };
                let ids = workflow::execute(orchestrator, template, &options).await;
                Ok(json!({ "workflow": template.name, "ids": ids }))
            }
            "history" => {
                let p: HistoryParams = request.params()?;
                let rows = orchestrator
                    .history(p.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
                    .await
                    .map_err(|e| ControlError::Internal(e.to_string()))?;
                to_value(&rows)
            }
            other => Err(ControlError::MethodNotFound(other.to_string())),
        }
    }

    /// Serve requests line by line until `reader` reaches EOF.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = match parse_request(&line) {
                Ok(request) => self.handle(&request).await,
                Err(e) => {
                    warn!(error = %e, "Malformed control request");
                    ControlResponse::failure(Value::Null, &e)
                }
            };
            let mut out = encode_response(&response);
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
        }
        debug!("Control input closed");
        Ok(())
    }
}

fn to_value<T: serde::Serialize + ?Sized>(value: &T) -> Result<Value, ControlError> {
    serde_json::to_value(value).map_err(|e| ControlError::Internal(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use conductor_core::config::OrchestratorConfig;
    use conductor_core::workflow::builtin_templates;

    use crate::orchestration::ProcessSnapshot;
    use crate::subprocess::ManualLauncher;

    async fn server(max: usize) -> (Arc<ManualLauncher>, ControlServer) {
        let launcher = Arc::new(ManualLauncher::new());
        let orchestrator = Orchestrator::new(
            OrchestratorConfig {
                max_concurrent_processes: max,
                worker_executable_path: Some("/usr/local/bin/agent".into()),
                ..Default::default()
            },
            launcher.clone(),
        );
        orchestrator.start().await;
        (launcher, ControlServer::new(orchestrator, builtin_templates()))
    }

    async fn call(server: &ControlServer, method: &str, params: Value) -> ControlResponse {
        server.handle(&ControlRequest::new(1, method, params)).await
    }

    async fn result(server: &ControlServer, method: &str, params: Value) -> Value {
        let response = call(server, method, params).await;
        assert!(response.is_success(), "{method}: {:?}", response.error);
        response.result.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn submit_then_get() {
        let (_launcher, server) = server(1).await;
        let submitted = result(
            &server,
            "submit",
            json!({ "task": "Run tests", "role": "tester", "priority": 7 }),
        )
        .await;
        let id = submitted["id"].as_str().unwrap().to_string();

        let got: ProcessSnapshot =
            serde_json::from_value(result(&server, "get", json!({ "id": id })).await).unwrap();
        assert_eq!(got.role, "tester");
        assert_eq!(got.priority, 7);
        assert_eq!(got.status, ProcessStatus::Running);

        let running = result(&server, "list", json!({ "status": "running" })).await;
        assert_eq!(running.as_array().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_ids_are_not_errors() {
        let (_launcher, server) = server(1).await;
        assert_eq!(result(&server, "stop", json!({ "id": "x" })).await, json!(false));
        assert_eq!(
            result(&server, "send_input", json!({ "id": "x", "text": "y" })).await,
            json!(false)
        );
        assert_eq!(
            result(&server, "update_priority", json!({ "id": "x", "priority": 3 })).await,
            json!(false)
        );
        assert_eq!(result(&server, "remove_task", json!({ "id": "x" })).await, json!(false));
        assert_eq!(result(&server, "get", json!({ "id": "x" })).await, Value::Null);
        assert_eq!(result(&server, "runtime", json!({ "id": "x" })).await, Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn bad_requests_map_to_rpc_codes() {
        let (_launcher, server) = server(1).await;
        let unknown = call(&server, "fly", Value::Null).await;
        assert_eq!(unknown.error.unwrap().code, -32601);

        let missing = call(&server, "stop", json!({})).await;
        assert_eq!(missing.error.unwrap().code, -32602);

        let status = call(&server, "list", json!({ "status": "sleeping" })).await;
        assert_eq!(status.error.unwrap().code, -32602);

        let workflow = call(&server, "run_workflow", json!({ "name": "nope" })).await;
        assert_eq!(workflow.error.unwrap().code, -32602);

        let empty = call(&server, "submit", json!({ "task": "  " })).await;
        assert_eq!(empty.error.unwrap().code, -32602);
    }

    #[tokio::test(start_paused = true)]
    async fn catalogs_and_config() {
        let (_launcher, server) = server(1).await;
        let roles = result(&server, "list_roles", Value::Null).await;
        assert_eq!(roles.as_array().unwrap().len(), roles::list_roles().len());
        let workflows = result(&server, "list_workflows", Value::Null).await;
        assert_eq!(workflows.as_array().unwrap().len(), 4);

        let config = result(
            &server,
            "update_config",
            json!({ "max_concurrent_processes": 5 }),
        )
        .await;
        assert_eq!(config["max_concurrent_processes"], json!(5));
        let config = result(&server, "get_config", Value::Null).await;
        assert_eq!(config["max_concurrent_processes"], json!(5));

        assert_eq!(result(&server, "history", Value::Null).await, json!([]));
    }

    #[tokio::test(start_paused = true)]
    async fn run_workflow_returns_ids() {
        let (launcher, server) = server(3).await;
        let response = result(
            &server,
            "run_workflow",
            json!({ "name": "Review", "goal": "the parser", "overrides": { "2": "Write it up" } }),
        )
        .await;
        assert_eq!(response["workflow"], json!("review"));
        let ids = response["ids"].as_array().unwrap();
        assert_eq!(ids.len(), 3);
        // Two independent steps start right away.
        assert_eq!(launcher.launch_count(), 2);

        let summary = result(&server, "get", json!({ "id": ids[2] })).await;
        assert_eq!(summary["task"], json!("Write it up"));
        assert_eq!(summary["status"], json!("pending"));
    }

    #[tokio::test(start_paused = true)]
    async fn serve_answers_line_by_line() {
        let (_launcher, server) = server(1).await;
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"list_pending"}"#,
            "\n\n",
            "not json\n",
            r#"{"jsonrpc":"2.0","id":"b","method":"stop","params":{"id":"zzz"}}"#,
            "\n",
        );
        let mut output = Vec::new();
        server.serve(input.as_bytes(), &mut output).await.unwrap();

        let lines: Vec<ControlResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].id, json!(1));
        assert_eq!(lines[0].result, Some(json!([])));
        assert_eq!(lines[1].error.as_ref().unwrap().code, -32700);
        assert_eq!(lines[1].id, Value::Null);
        assert_eq!(lines[2].id, json!("b"));
        assert_eq!(lines[2].result, Some(json!(false)));
    }
}
