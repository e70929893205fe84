use super::*;

/// One control group back-end: v1 split hierarchies or the v2 unified
/// hierarchy, selected once per process by filesystem probe.
pub trait Backend: fmt::Debug {
  fn prepare(&self) -> Result;
  fn enter(&self, memory_limit_kb: u64) -> Result;
  fn cpu_time_ms(&self) -> u64;
  fn times(&self) -> TimeStat;
  fn memory_kb(&self) -> u64;
  fn cleanup(&self) -> Result;
}

/// The per-sandbox control group, named `box-<cgid>`.
///
/// The parent reads CPU time and peak memory out of it while the child
/// runs; the child enters it before the root change.
#[derive(Debug)]
pub struct Cgroup {
  backend: Box<dyn Backend>,
  memory_limit_kb: u64,
  name: String,
}

impl Cgroup {
  pub fn new(cgid: u32, memory_limit_kb: u64) -> Result<Self> {
    let name = format!("box-{cgid}");

    let backend = probe(&name)?;

    info!("using control group {name}");

    Ok(Self {
      backend,
      memory_limit_kb,
      name,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn prepare(&self) -> Result {
    info!("preparing control group {}", self.name);
    self.backend.prepare()
  }

  pub fn enter(&self) -> Result {
    info!("entering control group {}", self.name);
    self.backend.enter(self.memory_limit_kb)
  }

  pub fn cpu_time_ms(&self) -> u64 {
    self.backend.cpu_time_ms()
  }

  pub fn times(&self) -> TimeStat {
    self.backend.times()
  }

  pub fn memory_kb(&self) -> u64 {
    self.backend.memory_kb()
  }

  pub fn cleanup(&self) -> Result {
    self.backend.cleanup()
  }
}

fn probe(name: &str) -> Result<Box<dyn Backend>> {
  let root = Utf8Path::new("/sys/fs/cgroup");

  ensure!(
    root.is_dir(),
    Error::Cgroup(format!("control group filesystem at {root} not mounted"))
  );

  if is_cgroup2(root)? {
    return Ok(Box::new(CgroupV2::new(root, name)));
  }

  let unified = root.join("unified");

  if unified.is_dir() && is_cgroup2(&unified)? {
    return Ok(Box::new(CgroupV2::new(&unified, name)));
  }

  if root.join("memory").is_dir() && root.join("cpuacct").is_dir() {
    return Ok(Box::new(CgroupV1::new(root, name)));
  }

  Err(Error::Cgroup(
    "no usable control group hierarchy found".into(),
  ))
}

fn is_cgroup2(path: &Utf8Path) -> Result<bool> {
  let fs = statfs(path.as_std_path())
    .map_err(|error| Error::Cgroup(format!("cannot stat {path}: {error}")))?;

  Ok(fs.filesystem_type() == CGROUP2_SUPER_MAGIC)
}

pub(crate) fn read_attribute(path: &Utf8Path) -> Result<String> {
  let value = fs::read_to_string(path)
    .map_err(|error| Error::Cgroup(format!("cannot read {path}: {error}")))?;

  let value = value.trim_end_matches('\n').to_string();

  debug!("cg: read {path} = {value:?}");

  Ok(value)
}

pub(crate) fn try_read_attribute(path: &Utf8Path) -> Option<String> {
  match read_attribute(path) {
    Ok(value) => Some(value),
    Err(error) => {
      debug!("{error}");
      None
    }
  }
}

pub(crate) fn write_attribute(path: &Utf8Path, value: &str) -> Result {
  debug!("cg: write {path} = {value}");

  fs::write(path, value)
    .map_err(|error| Error::Cgroup(format!("cannot set {path} to {value}: {error}")))
}

pub(crate) fn try_write_attribute(path: &Utf8Path, value: &str) -> bool {
  match write_attribute(path, value) {
    Ok(()) => true,
    Err(error) => {
      warn!("{error}");
      false
    }
  }
}
