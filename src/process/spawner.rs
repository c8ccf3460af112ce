use crate::error::{Result, WardenError};
use crate::process::types::ProcessRecord;
use std::process::Stdio;
use tokio::process::Command;

/// Launch a fresh instance of a supervised process.
///
/// The command is built from the record's executable, arguments and launch
/// directory (the executable's folder unless a working directory is set).
/// Standard streams are detached; the child is not tied to the supervisor's
/// lifetime and is reaped by the runtime once it exits.
///
/// Must be called from within a tokio runtime.
///
/// # Returns
/// * `Ok(pid)` - The OS process id of the new instance
/// * `Err(WardenError)` - Failed to launch the process
pub fn spawn_process(record: &ProcessRecord) -> Result<u32> {
    // Validate that the executable exists
    if !record.executable_path.exists() {
        return Err(WardenError::SpawnError(format!(
            "Executable does not exist: {}",
            record.executable_path.display()
        )));
    }

    let mut command = Command::new(&record.executable_path);

    if !record.arguments.is_empty() {
        command.args(&record.arguments);
    }

    if let Some(dir) = record.launch_directory() {
        command.current_dir(dir);
    }

    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(false);

    let child = command.spawn().map_err(|e| {
        WardenError::SpawnError(format!("Failed to launch process '{}': {}", record.name, e))
    })?;

    child.id().ok_or_else(|| {
        WardenError::SpawnError(format!("Failed to get PID for process '{}'", record.name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_spawn_simple_process() {
        let record = ProcessRecord::new("test-echo", "/bin/echo");

        let pid = spawn_process(&record).unwrap();
        assert!(pid > 0);
    }

    #[tokio::test]
    async fn test_spawn_with_args() {
        let mut record = ProcessRecord::new("test-echo-args", "/bin/echo");
        record.arguments = vec!["hello".to_string(), "world".to_string()];

        assert!(spawn_process(&record).is_ok());
    }

    #[tokio::test]
    async fn test_spawn_with_working_directory() {
        let temp_dir = TempDir::new().unwrap();
        let mut record = ProcessRecord::new("test-pwd", "/bin/pwd");
        record.working_directory = Some(temp_dir.path().to_path_buf());

        assert!(spawn_process(&record).is_ok());
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_executable() {
        let record = ProcessRecord::new("test-nonexistent", "/nonexistent/program");

        match spawn_process(&record) {
            Err(WardenError::SpawnError(msg)) => assert!(msg.contains("does not exist")),
            other => panic!("Expected SpawnError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_invalid_working_directory() {
        let mut record = ProcessRecord::new("test-invalid-cwd", "/bin/echo");
        record.working_directory = Some(PathBuf::from("/nonexistent/directory"));

        assert!(matches!(
            spawn_process(&record),
            Err(WardenError::SpawnError(_))
        ));
    }
}
