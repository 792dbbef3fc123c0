use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const MAX_NAME_LEN: usize = 20;
pub const MAX_EXEC_LEN: usize = 100;
pub const MAX_DESC_LEN: usize = 255;

/// The byte terminating every record in the on-disk logs. String fields
/// may not contain it, or the framing would tear.
pub const JOB_SEPARATOR: u8 = b'|';

/// Job lifecycle state, serialized as its integer value.
///
/// `Deleted` is terminal: it only ever appears in `job_update` tombstone
/// frames and is rejected on any inbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum JobStatus {
    Off = 1,
    On = 2,
    Deleted = 3,
}

impl TryFrom<u8> for JobStatus {
    type Error = String;

    fn try_from(v: u8) -> std::result::Result<Self, String> {
        match v {
            1 => Ok(JobStatus::Off),
            2 => Ok(JobStatus::On),
            3 => Ok(JobStatus::Deleted),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

impl From<JobStatus> for u8 {
    fn from(s: JobStatus) -> u8 {
        s as u8
    }
}

/// How a job's side effect is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobMode {
    Shell,
    HttpGet,
    HttpPost,
    HttpPut,
    HttpPatch,
    HttpDelete,
    HttpHead,
    HttpOptions,
}

/// A catalog record. `id` is cluster-unique and immutable; everything else
/// is mutable through `update_by_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub name: String,
    pub spec: String,
    pub mode: JobMode,
    pub exec: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub depend: Vec<u64>,
    #[serde(default = "default_exec_num")]
    pub exec_num: u32,
    pub status: JobStatus,
}

fn default_exec_num() -> u32 {
    1
}

impl Job {
    /// Field-level invariants shared by add and update paths.
    pub fn validate(&self) -> Result<()> {
        validate_text("name", &self.name, MAX_NAME_LEN, true)?;
        validate_text("exec", &self.exec, MAX_EXEC_LEN, true)?;
        validate_text("desc", &self.desc, MAX_DESC_LEN, false)?;
        if self.spec.contains(JOB_SEPARATOR as char) {
            return Err(Error::Validation(
                "spec must not contain the record separator '|'".to_string(),
            ));
        }
        dcron_schedule::parse(&self.spec)?;
        if self.exec_num == 0 {
            return Err(Error::Validation("exec_num must be >= 1".to_string()));
        }
        if self.status == JobStatus::Deleted {
            return Err(Error::Validation("unknown job status: 3".to_string()));
        }
        Ok(())
    }
}

fn validate_text(field: &str, value: &str, max: usize, required: bool) -> Result<()> {
    if required && value.is_empty() {
        return Err(Error::Validation(format!("{field} can't be empty")));
    }
    if value.chars().count() > max {
        return Err(Error::Validation(format!(
            "{field} exceeds {max} characters"
        )));
    }
    if value.contains(JOB_SEPARATOR as char) {
        return Err(Error::Validation(format!(
            "{field} must not contain the record separator '|'"
        )));
    }
    Ok(())
}

/// The body of `POST /job`: everything but the identity, which the cluster
/// sequencer assigns. New jobs always start `Off`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobDraft {
    pub name: String,
    pub spec: String,
    pub mode: JobMode,
    pub exec: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub depend: Vec<u64>,
    #[serde(default)]
    pub exec_num: Option<u32>,
}

impl JobDraft {
    pub fn into_job(self, id: u64) -> Result<Job> {
        let job = Job {
            id,
            name: self.name,
            spec: self.spec,
            mode: self.mode,
            exec: self.exec,
            desc: self.desc,
            args: self.args,
            depend: self.depend,
            exec_num: self.exec_num.unwrap_or(1),
            status: JobStatus::Off,
        };
        job.validate()?;
        Ok(job)
    }
}

/// The body of `PATCH /job/{id}`. Absent or empty fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobPatch {
    pub name: Option<String>,
    pub spec: Option<String>,
    pub mode: Option<JobMode>,
    pub exec: Option<String>,
    pub desc: Option<String>,
    pub args: Option<Map<String, Value>>,
    pub depend: Option<Vec<u64>>,
    pub exec_num: Option<u32>,
    pub status: Option<JobStatus>,
}

impl JobPatch {
    /// Apply non-empty patch fields onto `job`. Returns the status
    /// transition, if the patch caused one.
    pub fn apply(self, job: &mut Job) -> Option<JobStatus> {
        if let Some(name) = self.name.filter(|n| !n.is_empty()) {
            job.name = name;
        }
        if let Some(spec) = self.spec.filter(|s| !s.is_empty()) {
            job.spec = spec;
        }
        if let Some(mode) = self.mode {
            job.mode = mode;
        }
        if let Some(exec) = self.exec.filter(|e| !e.is_empty()) {
            job.exec = exec;
        }
        if let Some(desc) = self.desc.filter(|d| !d.is_empty()) {
            job.desc = desc;
        }
        if let Some(args) = self.args {
            job.args = args;
        }
        if let Some(depend) = self.depend.filter(|d| !d.is_empty()) {
            job.depend = depend;
        }
        if let Some(exec_num) = self.exec_num.filter(|n| *n > 0) {
            job.exec_num = exec_num;
        }
        match self.status {
            Some(status) if status != job.status => {
                job.status = status;
                Some(status)
            }
            _ => None,
        }
    }
}
