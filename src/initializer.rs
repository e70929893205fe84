use super::*;

/// Child-side setup between namespace creation and program execution.
///
/// Runs inside the cloned child with fresh mount, PID and IPC
/// namespaces. Every step is fatal: a failure is written to the error
/// pipe so the parent can surface it, and the child exits.
pub struct Initializer<'a> {
  cgroup: &'a Cgroup,
  config: &'a SandboxConfig,
  credentials: Credentials,
  error_pipe_read: RawFd,
  error_pipe_write: RawFd,
}

impl<'a> Initializer<'a> {
  pub fn new(
    config: &'a SandboxConfig,
    cgroup: &'a Cgroup,
    credentials: Credentials,
    error_pipe_read: RawFd,
    error_pipe_write: RawFd,
  ) -> Self {
    Self {
      cgroup,
      config,
      credentials,
      error_pipe_read,
      error_pipe_write,
    }
  }

  /// Entry point of the cloned child. Never returns on success; the
  /// return value is the child's exit status otherwise.
  pub fn run(&self) -> isize {
    let _ = close(self.error_pipe_read);

    let error = match self.setup() {
      Ok(never) => match never {},
      Err(error) => error,
    };

    let mut sink = unsafe { fs::File::from_raw_fd(self.error_pipe_write) };
    let _ = write!(sink, "{error}");

    1
  }

  fn setup(&self) -> Result<Infallible> {
    self.cgroup.enter()?;

    MountPlan::new(&self.config.dir_rules)?.apply()?;

    self.redirect_streams()?;

    FilePermissions::new(&self.config.file_permissions).apply(self.credentials.uid)?;

    Limits::new(self.config).apply()?;

    self.drop_privileges()?;

    if let Some(directory) = &self.config.exec_directory {
      chdir(directory.as_std_path())
        .map_err(|error| Error::Process(format!("chdir({directory}): {error}")))?;
    }

    self.execute()
  }

  fn redirect_streams(&self) -> Result {
    if self.config.swap_pipe_order {
      self.open_stdout()?;
      self.open_stdin()?;
    } else {
      self.open_stdin()?;
      self.open_stdout()?;
    }

    if let Some(path) = &self.config.stderr_path {
      open_as(path, 2, OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC)?;
    } else {
      dup2(1, 2).map_err(|error| Error::Process(format!("dup2: {error}")))?;
    }

    Ok(())
  }

  fn open_stdin(&self) -> Result {
    if let Some(path) = &self.config.stdin_path {
      open_as(path, 0, OFlag::O_RDONLY)?;
    }

    Ok(())
  }

  fn open_stdout(&self) -> Result {
    if let Some(path) = &self.config.stdout_path {
      open_as(path, 1, OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC)?;
    }

    Ok(())
  }

  fn drop_privileges(&self) -> Result {
    let uid = Uid::from_raw(self.credentials.uid);
    let gid = Gid::from_raw(self.credentials.gid);

    setresgid(gid, gid, gid)
      .map_err(|error| Error::Process(format!("setresgid: {error}")))?;

    setgroups(&[]).map_err(|error| Error::Process(format!("setgroups: {error}")))?;

    setresuid(uid, uid, uid)
      .map_err(|error| Error::Process(format!("setresuid: {error}")))?;

    // Own process group, so that kill(-pid) from the keeper reaches
    // every descendant.
    setpgid(Pid::from_raw(0), Pid::from_raw(0))
      .map_err(|error| Error::Process(format!("setpgid: {error}")))?;

    Ok(())
  }

  fn execute(&self) -> Result<Infallible> {
    debug!("provided run command: {}", self.config.run_command);

    let words = arguments::word_split(&self.config.run_command);

    ensure!(
      !words.is_empty(),
      Error::Process("run command is empty".into())
    );

    let argv = words
      .iter()
      .map(|word| CString::new(word.as_str()))
      .collect::<Result<Vec<CString>, _>>()
      .map_err(|_| Error::Process("run command contains a NUL byte".into()))?;

    let environment = variable::build_environment(&self.config.environment)
      .into_iter()
      .map(CString::new)
      .collect::<Result<Vec<CString>, _>>()
      .map_err(|_| Error::Process("environment contains a NUL byte".into()))?;

    for word in &words {
      debug!("run command word: {word}");
    }

    execvpe(&argv[0], &argv, &environment)
      .map_err(|error| Error::Process(format!("execvpe({}): {error}", words[0])))
  }
}

/// Open `path` so that it lands exactly on the given descriptor, the
/// way redirections are inherited across exec.
fn open_as(path: &Utf8Path, expected: RawFd, flags: OFlag) -> Result {
  let _ = close(expected);

  let fd = nix::fcntl::open(
    path.as_std_path(),
    flags,
    FileMode::from_bits_truncate(0o666),
  )
  .map_err(|error| Error::Process(format!("open({path}): {error}")))?;

  ensure!(
    fd == expected,
    Error::Process(format!(
      "open({path}) landed on descriptor {fd}, expected {expected}"
    ))
  );

  Ok(())
}
