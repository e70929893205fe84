use super::*;

/// Per-process kernel limits applied in the child just before privileges
/// are dropped.
///
/// Address space is deliberately absent: memory is enforced by the
/// control group.
#[derive(Clone, Copy, Debug)]
pub struct Limits {
  file_size_kb: u64,
  max_processes: u32,
  stack_kb: u64,
}

impl Limits {
  pub fn new(config: &SandboxConfig) -> Self {
    Self {
      file_size_kb: config.file_size_limit_kb,
      max_processes: config.max_processes,
      stack_kb: config.stack_limit_kb,
    }
  }

  pub fn apply(&self) -> Result {
    for (resource, limit) in self.plan() {
      set(resource, limit)?;
    }

    Ok(())
  }

  /// The ordered list of `(resource, limit)` pairs to install, soft and
  /// hard both set to the same value.
  fn plan(&self) -> Vec<(Resource, u64)> {
    let mut plan = Vec::new();

    if self.file_size_kb != 0 {
      plan.push((Resource::RLIMIT_FSIZE, self.file_size_kb * 1024));
    }

    if self.stack_kb != 0 {
      plan.push((Resource::RLIMIT_STACK, self.stack_kb * 1024));
    } else {
      plan.push((Resource::RLIMIT_STACK, RLIM_INFINITY));
    }

    plan.push((Resource::RLIMIT_NOFILE, 64));

    // Keep the process from pinning pages into RAM and dodging swap.
    plan.push((Resource::RLIMIT_MEMLOCK, 0));

    if self.max_processes != 0 {
      plan.push((Resource::RLIMIT_NPROC, self.max_processes.into()));
    }

    plan
  }
}

fn set(resource: Resource, limit: u64) -> Result {
  setrlimit(resource, limit, limit).map_err(|error| {
    Error::ResourceLimit(format!("setrlimit({resource:?}, {limit}): {error}"))
  })
}
