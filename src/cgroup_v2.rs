use super::*;

/// Unified-hierarchy back-end: a single directory under the cgroup2
/// mount.
#[derive(Debug)]
pub struct CgroupV2 {
  name: String,
  root: Utf8PathBuf,
}

impl CgroupV2 {
  pub fn new(root: impl Into<Utf8PathBuf>, name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      root: root.into(),
    }
  }

  fn directory(&self) -> Utf8PathBuf {
    self.root.join(&self.name)
  }

  fn attribute(&self, name: &str) -> Utf8PathBuf {
    self.directory().join(name)
  }
}

impl Backend for CgroupV2 {
  fn prepare(&self) -> Result {
    let directory = self.directory();

    // A leftover group from a crashed run is empty once its processes
    // are gone, so rmdir resets it.
    if directory.exists() {
      info!("control group {directory} already exists, trying to empty it");
      fs::remove_dir(&directory)
        .map_err(|error| Error::Cgroup(format!("failed to reset {directory}: {error}")))?;
    }

    for controller in ["+memory", "+cpuset"] {
      write_attribute(&self.root.join("cgroup.subtree_control"), controller)?;
    }

    fs::create_dir(&directory)
      .map_err(|error| Error::Cgroup(format!("failed to create {directory}: {error}")))?;

    // Copy the effective CPU and memory configuration from the parent.
    if let Some(cpus) = try_read_attribute(&self.attribute("cpuset.cpus.effective")) {
      try_write_attribute(&self.attribute("cpuset.cpus"), &cpus);
    }

    if let Some(mems) = try_read_attribute(&self.attribute("cpuset.mems.effective")) {
      try_write_attribute(&self.attribute("cpuset.mems"), &mems);
    }

    Ok(())
  }

  fn enter(&self, memory_limit_kb: u64) -> Result {
    write_attribute(&self.attribute("cgroup.procs"), &getpid().to_string())?;

    if memory_limit_kb != 0 {
      let limit = (memory_limit_kb * 1024).to_string();
      write_attribute(&self.attribute("memory.max"), &limit)?;
      try_write_attribute(&self.attribute("memory.swap.max"), &limit);
    }

    Ok(())
  }

  fn cpu_time_ms(&self) -> u64 {
    try_read_attribute(&self.attribute("cpu.stat"))
      .map(|content| parse_cpu_stat(&content).cpu_ms)
      .unwrap_or(0)
  }

  fn times(&self) -> TimeStat {
    try_read_attribute(&self.attribute("cpu.stat"))
      .map(|content| parse_cpu_stat(&content))
      .unwrap_or_default()
  }

  fn memory_kb(&self) -> u64 {
    let mut peak = try_read_attribute(&self.attribute("memory.peak"))
      .and_then(|content| content.parse().ok())
      .unwrap_or(0u64);

    if let Some(swap) = try_read_attribute(&self.attribute("memory.swap.peak")) {
      if let Ok(swap) = swap.parse::<u64>() {
        if swap > peak {
          peak = swap;
        }
      }
    }

    peak >> 10
  }

  fn cleanup(&self) -> Result {
    let directory = self.directory();

    if !directory.exists() {
      info!("control group {directory} not found, nothing to clean up");
      return Ok(());
    }

    if let Some(tasks) = try_read_attribute(&self.attribute("cgroup.procs")) {
      ensure!(
        tasks.is_empty(),
        Error::Cgroup(format!(
          "some processes left in control group {}, refusing to remove it",
          self.name
        ))
      );
    }

    fs::remove_dir(&directory)
      .map_err(|error| Error::Cgroup(format!("cannot remove {directory}: {error}")))
  }
}

/// Parse the `cpu.stat` attribute, microsecond counters per line.
fn parse_cpu_stat(content: &str) -> TimeStat {
  let mut time = TimeStat::default();

  for line in content.lines() {
    let Some((key, value)) = line.split_once(' ') else {
      continue;
    };

    let Ok(usec) = value.parse::<u64>() else {
      continue;
    };

    match key {
      "usage_usec" => time.cpu_ms = usec / 1000,
      "user_usec" => time.user_ms = usec / 1000,
      "system_usec" => time.system_ms = usec / 1000,
      _ => {}
    }
  }

  time
}
