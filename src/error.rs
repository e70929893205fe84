use super::*;

#[derive(Debug, Error)]
pub enum Error {
  #[error("cgroup error: {0}")]
  Cgroup(String),
  #[error("sandboxed process failed during setup: {0}")]
  ChildSetup(String),
  #[error("configuration error: {0}")]
  Config(String),
  #[error("invalid directory rule: {0}")]
  DirRule(String),
  #[error("invalid environment variable: {0}")]
  EnvironmentVariable(String),
  #[error("filesystem error: {0}")]
  Filesystem(#[from] io::Error),
  #[error("mount error: {0}")]
  Mount(String),
  #[error("operation requires root privileges")]
  NotRoot,
  #[error("permission error: {0}")]
  Permission(String),
  #[error("process error: {0}")]
  Process(String),
  #[error("process id {0} out of range (allowed: 0-{1})")]
  ProcessIdOutOfRange(u32, u32),
  #[error("quota error: {0}")]
  Quota(String),
  #[error("resource limit error: {0}")]
  ResourceLimit(String),
  #[error("system error: {0}")]
  System(String),
}
