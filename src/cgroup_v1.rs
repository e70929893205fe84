use super::*;

const JIFFY_MS: u64 = 10;

/// Split-hierarchy back-end: one directory per subsystem under
/// `/sys/fs/cgroup/{memory,cpuacct,cpuset}`.
///
/// `cpuset` is optional; the other two are mandatory.
#[derive(Debug)]
pub struct CgroupV1 {
  name: String,
  root: Utf8PathBuf,
}

impl CgroupV1 {
  pub fn new(root: impl Into<Utf8PathBuf>, name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      root: root.into(),
    }
  }

  fn directory(&self, subsystem: &str) -> Utf8PathBuf {
    self.root.join(subsystem).join(&self.name)
  }

  fn attribute(&self, subsystem: &str, name: &str) -> Utf8PathBuf {
    self.directory(subsystem).join(name)
  }

  fn create(&self, subsystem: &str) -> Result {
    let directory = self.directory(subsystem);

    if directory.exists() {
      info!("control group {directory} already exists, trying to empty it");
      fs::remove_dir(&directory)
        .map_err(|error| Error::Cgroup(format!("failed to reset {directory}: {error}")))?;
    }

    fs::create_dir(&directory)
      .map_err(|error| Error::Cgroup(format!("failed to create {directory}: {error}")))
  }
}

impl Backend for CgroupV1 {
  fn prepare(&self) -> Result {
    self.create("memory")?;
    self.create("cpuacct")?;

    if self.root.join("cpuset").is_dir() {
      if let Err(error) = self.create("cpuset") {
        warn!("{error}");
      } else {
        // New cpuset groups start empty; without cpus and mems the
        // group cannot accept tasks.
        for attribute in ["cpuset.cpus", "cpuset.mems"] {
          if let Some(value) = try_read_attribute(&self.root.join("cpuset").join(attribute)) {
            try_write_attribute(&self.attribute("cpuset", attribute), &value);
          }
        }
      }
    }

    Ok(())
  }

  fn enter(&self, memory_limit_kb: u64) -> Result {
    let pid = getpid().to_string();

    write_attribute(&self.attribute("memory", "tasks"), &pid)?;
    write_attribute(&self.attribute("cpuacct", "tasks"), &pid)?;

    if self.directory("cpuset").exists() {
      try_write_attribute(&self.attribute("cpuset", "tasks"), &pid);
    }

    if memory_limit_kb != 0 {
      let limit = (memory_limit_kb * 1024).to_string();
      write_attribute(&self.attribute("memory", "memory.limit_in_bytes"), &limit)?;
      try_write_attribute(
        &self.attribute("memory", "memory.memsw.limit_in_bytes"),
        &limit,
      );
    }

    write_attribute(&self.attribute("cpuacct", "cpuacct.usage"), "0")?;

    Ok(())
  }

  fn cpu_time_ms(&self) -> u64 {
    try_read_attribute(&self.attribute("cpuacct", "cpuacct.usage"))
      .and_then(|content| content.parse::<u64>().ok())
      .map(|nanoseconds| nanoseconds / 1_000_000)
      .unwrap_or(0)
  }

  fn times(&self) -> TimeStat {
    let mut time = try_read_attribute(&self.attribute("cpuacct", "cpuacct.stat"))
      .map(|content| parse_cpuacct_stat(&content))
      .unwrap_or_default();

    time.cpu_ms = self.cpu_time_ms();

    time
  }

  fn memory_kb(&self) -> u64 {
    let mut peak = try_read_attribute(&self.attribute("memory", "memory.max_usage_in_bytes"))
      .and_then(|content| content.parse().ok())
      .unwrap_or(0u64);

    if let Some(swap) =
      try_read_attribute(&self.attribute("memory", "memory.memsw.max_usage_in_bytes"))
    {
      if let Ok(swap) = swap.parse::<u64>() {
        if swap > peak {
          peak = swap;
        }
      }
    }

    peak >> 10
  }

  fn cleanup(&self) -> Result {
    if let Some(tasks) = try_read_attribute(&self.attribute("memory", "tasks")) {
      ensure!(
        tasks.is_empty(),
        Error::Cgroup(format!(
          "some processes left in control group {}, refusing to remove it",
          self.name
        ))
      );
    }

    for subsystem in ["memory", "cpuacct", "cpuset"] {
      let directory = self.directory(subsystem);

      if !directory.exists() {
        continue;
      }

      let removed = fs::remove_dir(&directory);

      if subsystem == "cpuset" {
        if let Err(error) = removed {
          warn!("cannot remove {directory}: {error}");
        }
      } else {
        removed
          .map_err(|error| Error::Cgroup(format!("cannot remove {directory}: {error}")))?;
      }
    }

    Ok(())
  }
}

/// Parse the `cpuacct.stat` attribute, jiffy counters per line.
fn parse_cpuacct_stat(content: &str) -> TimeStat {
  let mut time = TimeStat::default();

  for line in content.lines() {
    let Some((key, value)) = line.split_once(' ') else {
      continue;
    };

    let Ok(jiffies) = value.parse::<u64>() else {
      continue;
    };

    match key {
      "user" => time.user_ms = jiffies * JIFFY_MS,
      "system" => time.system_ms = jiffies * JIFFY_MS,
      _ => {}
    }
  }

  time
}
