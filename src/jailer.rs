use super::*;

const CHILD_STACK_SIZE: usize = 1024 * 1024;

#[derive(Debug)]
enum MetaSink {
  File(fs::File),
  Stdout,
}

/// Orchestrates the three sandbox operations and owns everything both
/// sides of the clone need: the sandbox directory, the control group,
/// the derived credentials and the meta sink.
#[derive(Debug)]
pub struct Jailer {
  box_dir: Utf8PathBuf,
  cgroup: Cgroup,
  config: SandboxConfig,
  credentials: Credentials,
  meta: MetaSink,
}

impl Jailer {
  pub fn new(config: SandboxConfig, environment: &Environment) -> Result<Self> {
    Self::with_system(config, environment, &MaterialSystem)
  }

  fn with_system(
    config: SandboxConfig,
    environment: &Environment,
    system: &impl System,
  ) -> Result<Self> {
    ensure!(system.geteuid().is_root(), Error::NotRoot);

    let credentials = environment.credentials(config.box_id, config.process_id)?;

    let box_dir = environment.box_dir(config.box_id);

    // New files default to 0750.
    system.umask(FileMode::from_bits_truncate(0o027));

    let meta = match &config.meta_file {
      Some(path) => MetaSink::File(
        fs::OpenOptions::new()
          .write(true)
          .create(true)
          .truncate(true)
          .mode(0o777)
          .open(path)?,
      ),
      None => MetaSink::Stdout,
    };

    let cgroup = Cgroup::new(credentials.cgid, config.memory_limit_kb)?;

    Ok(Self {
      box_dir,
      cgroup,
      config,
      credentials,
      meta,
    })
  }

  pub fn start(&mut self, mode: Mode) -> Result {
    fs::create_dir_all(&self.box_dir)?;
    env::set_current_dir(&self.box_dir)?;

    match mode {
      Mode::Init => self.init(),
      Mode::Run => self.run(),
      Mode::Cleanup => self.cleanup(),
    }
  }

  fn init(&mut self) -> Result {
    info!("preparing sandbox directory");

    Utf8PathBuf::from("box").recreate(0o750)?;

    self.cgroup.prepare()?;

    quota::apply(&self.config.disk_quota, self.credentials.uid)
  }

  fn run(&mut self) -> Result {
    let result = self.run_inner();

    // The caller must always see a result record, even when the engine
    // itself fails.
    if result.is_err() {
      self.emit_error_record();
    }

    result
  }

  fn run_inner(&mut self) -> Result {
    info!("start running");

    ensure!(
      !self.config.run_command.trim().is_empty(),
      Error::Config("run mode requires a command to run".into())
    );

    ensure!(
      Utf8Path::new("box").is_dir(),
      Error::Config("box directory not found, did you run --init?".into())
    );

    self.cgroup.prepare()?;

    let (pipe_read, pipe_write) = pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)
      .map_err(|error| Error::System(format!("pipe: {error}")))?;

    let child = self.clone_child(&pipe_read, &pipe_write)?;

    drop(pipe_write);

    info!("start waiting for process");

    let keeper = Keeper::new(&self.config, &self.cgroup, child, pipe_read);

    let stats = keeper.supervise()?;

    self.emit(&stats)
  }

  fn clone_child(&self, pipe_read: &OwnedFd, pipe_write: &OwnedFd) -> Result<Pid> {
    let initializer = Initializer::new(
      &self.config,
      &self.cgroup,
      self.credentials,
      pipe_read.as_raw_fd(),
      pipe_write.as_raw_fd(),
    );

    let mut flags = CloneFlags::CLONE_NEWIPC | CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWPID;

    if !self.config.share_network {
      flags |= CloneFlags::CLONE_NEWNET;
    }

    let mut stack = vec![0u8; CHILD_STACK_SIZE];

    unsafe {
      nix::sched::clone(
        Box::new(move || initializer.run()),
        &mut stack,
        flags,
        Some(libc::SIGCHLD),
      )
    }
    .map_err(|error| Error::Process(format!("clone: {error}")))
  }

  fn cleanup(&mut self) -> Result {
    if Utf8Path::new("box").is_dir() {
      info!("deleting sandbox directory");
    } else {
      info!("box directory not found, there isn't anything to clean up");
    }

    env::set_current_dir("/")?;

    if self.box_dir.exists() {
      fs::remove_dir_all(&self.box_dir)?;
    }

    self.cgroup.cleanup()
  }

  fn emit(&mut self, stats: &RunStats) -> Result {
    let rendered = stats.render(self.config.meta_format())?;

    match &mut self.meta {
      MetaSink::File(file) => file.write_all(rendered.as_bytes())?,
      MetaSink::Stdout => io::stdout().write_all(rendered.as_bytes())?,
    }

    Ok(())
  }

  fn emit_error_record(&mut self) {
    let stats = RunStats {
      internal_message: "No results provided.".into(),
      result_code: ResultCode::InternalError,
      ..Default::default()
    };

    if let Err(error) = self.emit(&stats) {
      warn!("cannot write error meta record: {error}");
    }
  }
}
