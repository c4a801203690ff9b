use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::collector::{collect, ExecutionSuccess};
use crate::validate::{validate, ExecutionRequest, SCRIPT_FIELD};
use crate::{ErrorCategory, ExecutionError, SandboxConfig, SandboxLauncher, Workspace};

/// Runs scripts end to end: validation, workspace, sandbox, result.
///
/// The executor only holds read-only state, the same instance can serve any number of concurrent
/// requests.
#[derive(Clone)]
pub struct ScriptExecutor {
    config: Arc<SandboxConfig>,
    launcher: Arc<dyn SandboxLauncher>,
}

impl std::fmt::Debug for ScriptExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScriptExecutor {
    /// Make a new executor using the provided launcher.
    pub fn new<L: SandboxLauncher + 'static>(config: SandboxConfig, launcher: L) -> Self {
        ScriptExecutor {
            config: Arc::new(config),
            launcher: Arc::new(launcher),
        }
    }

    /// The configuration of this executor.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Execute the script contained in the body of a request.
    pub fn execute(&self, body: &Value) -> Result<ExecutionSuccess, ExecutionError> {
        let id = Uuid::new_v4();
        let result = validate(body, self.config.max_script_bytes)
            .and_then(|request| self.execute_request(id, request));
        log_result(id, &result);
        result
    }

    /// Execute the script, applying the same checks of a request.
    pub fn execute_script(&self, script: &str) -> Result<ExecutionSuccess, ExecutionError> {
        self.execute(&serde_json::json!({ SCRIPT_FIELD: script }))
    }

    fn execute_request(
        &self,
        id: Uuid,
        request: ExecutionRequest,
    ) -> Result<ExecutionSuccess, ExecutionError> {
        debug!("[{}] Validated script of {} bytes", id, request.script.len());
        self.launcher.check(&self.config)?;
        let workspace = Workspace::prepare(
            self.config.workspace_dir.as_deref(),
            &request.script,
            &self.config.runner_path,
        )
        .map_err(ExecutionError::Workspace)?;
        debug!("[{}] Workspace prepared at {}", id, workspace.path().display());
        let launch = self.launcher.launch(&self.config, &workspace);
        debug!("[{}] Sandbox finished, collecting", id);
        collect(launch, &workspace, &self.config)
        // the workspace is removed here
    }
}

fn log_result(id: Uuid, result: &Result<ExecutionSuccess, ExecutionError>) {
    let err = match result {
        Ok(success) => {
            debug!(
                "[{}] Success, {} bytes of stdout",
                id,
                success.stdout.len()
            );
            return;
        }
        Err(err) => err,
    };
    match err.category() {
        ErrorCategory::Validation | ErrorCategory::Script => info!("[{}] {}", id, err),
        ErrorCategory::Timeout | ErrorCategory::Infrastructure => warn!("[{}] {}", id, err),
        ErrorCategory::Configuration => error!("[{}] {}", id, err),
    }
}
