use std::future::Future;

use reqwest::Method;

use crate::{
    error::{Error, Result},
    job::{Job, JobMode},
};

/// Executes one job to completion. The scheduler only ever awaits this
/// from a spawned dispatch task, so implementations may block as long as
/// the job does.
pub trait JobRunner: Send + Sync + Clone + 'static {
    fn run(&self, job: &Job) -> impl Future<Output = Result<()>> + Send;
}

/// The shipped runner: `shell` jobs through `/bin/sh -c`, `http-*` jobs as
/// the corresponding request against the job's `exec` URL.
#[derive(Clone, Default)]
pub struct ExecRunner {
    http: reqwest::Client,
}

impl ExecRunner {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run_http(&self, job: &Job) -> Result<()> {
        let method = match job.mode {
            JobMode::HttpGet => Method::GET,
            JobMode::HttpPost => Method::POST,
            JobMode::HttpPut => Method::PUT,
            JobMode::HttpPatch => Method::PATCH,
            JobMode::HttpDelete => Method::DELETE,
            JobMode::HttpHead => Method::HEAD,
            JobMode::HttpOptions => Method::OPTIONS,
            JobMode::Shell => unreachable!("shell jobs never reach run_http"),
        };

        let mut request = self.http.request(method.clone(), &job.exec);
        let carries_body =
            method == Method::POST || method == Method::PUT || method == Method::PATCH;
        if carries_body && !job.args.is_empty() {
            request = request.json(&job.args);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Runner(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Runner(format!(
                "{} returned {}",
                job.exec,
                response.status()
            )));
        }
        tracing::debug!(job = %job.name, url = %job.exec, "http job completed");
        Ok(())
    }
}

async fn run_shell(job: &Job) -> Result<()> {
    let output = tokio::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(&job.exec)
        .kill_on_drop(true)
        .output()
        .await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        tracing::info!(job = %job.name, output = %stdout.trim(), "job output");
    }
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Runner(format!(
            "process exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

impl JobRunner for ExecRunner {
    async fn run(&self, job: &Job) -> Result<()> {
        match job.mode {
            JobMode::Shell => run_shell(job).await,
            _ => self.run_http(job).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobDraft;

    fn shell_job(exec: &str) -> Job {
        JobDraft {
            name: "sh".to_string(),
            spec: "* * * * * *".to_string(),
            mode: JobMode::Shell,
            exec: exec.to_string(),
            desc: String::new(),
            args: serde_json::Map::new(),
            depend: Vec::new(),
            exec_num: None,
        }
        .into_job(1)
        .unwrap()
    }

    #[tokio::test]
    async fn shell_job_succeeds_on_zero_exit() {
        let runner = ExecRunner::new();
        runner.run(&shell_job("true")).await.unwrap();
    }

    #[tokio::test]
    async fn shell_job_reports_nonzero_exit() {
        let runner = ExecRunner::new();
        let err = runner.run(&shell_job("exit 3")).await.unwrap_err();
        assert!(matches!(err, Error::Runner(_)));
    }
}
