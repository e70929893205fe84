use super::*;

/// Signals the keeper absorbs instead of crashing: anything unexpected
/// tears the child down and reports an internal error, SIGALRM drives
/// the periodic limit check.
const CAUGHT_SIGNALS: [Signal; 12] = [
  Signal::SIGHUP,
  Signal::SIGINT,
  Signal::SIGQUIT,
  Signal::SIGILL,
  Signal::SIGABRT,
  Signal::SIGFPE,
  Signal::SIGSEGV,
  Signal::SIGPIPE,
  Signal::SIGTERM,
  Signal::SIGUSR1,
  Signal::SIGUSR2,
  Signal::SIGALRM,
];

/// The active keeper, reachable from signal handlers.
///
/// Non-null exactly while one `supervise` call is in flight; the parent
/// is single-threaded and handlers run on its only thread, so the
/// pointer is never dereferenced concurrently.
static ACTIVE_KEEPER: AtomicPtr<Keeper<'static>> = AtomicPtr::new(ptr::null_mut());

extern "C" fn keeper_signal_handler(signum: libc::c_int) {
  let keeper = ACTIVE_KEEPER.load(Ordering::Acquire);

  if keeper.is_null() {
    return;
  }

  unsafe { &mut *keeper }.handle_signal(signum);
}

/// Parent-side supervisor: waits for the child, polls limits on a
/// periodic timer, kills on violation and reconciles the final status
/// with accounting data.
pub struct Keeper<'a> {
  cgroup: &'a Cgroup,
  child: Pid,
  config: &'a SandboxConfig,
  error_pipe: Option<fs::File>,
  stats: RunStats,
  wall_clock: Instant,
}

impl<'a> Keeper<'a> {
  pub fn new(
    config: &'a SandboxConfig,
    cgroup: &'a Cgroup,
    child: Pid,
    error_pipe: OwnedFd,
  ) -> Self {
    Self {
      cgroup,
      child,
      config,
      error_pipe: Some(fs::File::from(error_pipe)),
      stats: RunStats::default(),
      wall_clock: Instant::now(),
    }
  }

  pub fn supervise(mut self) -> Result<RunStats> {
    let previous = ACTIVE_KEEPER.compare_exchange(
      ptr::null_mut(),
      &mut self as *mut Self as *mut Keeper<'static>,
      Ordering::AcqRel,
      Ordering::Acquire,
    );

    ensure!(
      previous.is_ok(),
      Error::System("another supervised run is already in flight".into())
    );

    let result = self.supervise_inner();

    ACTIVE_KEEPER.store(ptr::null_mut(), Ordering::Release);

    result.map(|()| self.stats)
  }

  fn supervise_inner(&mut self) -> Result {
    self.wall_clock = Instant::now();

    self.install_signal_handlers()?;

    if self.config.check_interval_ms > 0 {
      set_interval_timer(self.config.check_interval_ms)
        .map_err(|error| Error::System(format!("setitimer failed: {error}")))?;
    }

    loop {
      let outcome = wait4(self.child);

      // A kill issued from a signal handler has already reaped the
      // child and recorded the cause.
      if self.stats.process_was_killed {
        self.drain_error_pipe()?;
        return Ok(());
      }

      let (pid, status, usage) = match outcome {
        Err(Errno::EINTR) => continue,
        Err(error) => return Err(Error::Process(format!("wait4: {error}"))),
        Ok(reaped) => reaped,
      };

      ensure!(
        pid == self.child,
        Error::Process(format!("wait4: unknown pid {pid} exited"))
      );

      self.clear_timer();

      self.drain_error_pipe()?;

      self.update_stats();
      self.stats.update_rusage(&usage);

      debug!("process status: {status}");

      match WaitStatus::from_raw(pid, status)
        .map_err(|error| Error::Process(format!("wait4: {error}")))?
      {
        WaitStatus::Exited(_, 0) => {
          self.stats.result_code = ResultCode::Ok;
          self.stats.exit_code = 0;
        }
        WaitStatus::Exited(_, code) => {
          self.stats.result_code = ResultCode::NonZeroExitStatus;
          self.stats.exit_code = code;
        }
        WaitStatus::Signaled(_, signal, _) => {
          self.stats.result_code = ResultCode::RuntimeError;
          self.stats.terminal_signal = signal as i32;
        }
        WaitStatus::Stopped(..) => {
          self.stats.result_code = ResultCode::AbnormalTermination;
          return Err(Error::Process(
            "process has stopped; tracing is not supported".into(),
          ));
        }
        status => {
          self.stats.result_code = ResultCode::InternalError;
          return Err(Error::Process(format!("wait4: unexpected status {status:?}")));
        }
      }

      // The child may have crossed a limit between the last timer tick
      // and its exit; limits dominate the exit status.
      if let Some(code) = self.violated_limit() {
        self.stats.result_code = code;
      }

      return Ok(());
    }
  }

  fn handle_signal(&mut self, signum: libc::c_int) {
    if signum == libc::SIGALRM {
      if let Some(code) = self.violated_limit() {
        self.kill_child(code, String::new());
      }
    } else {
      self.kill_child(
        ResultCode::InternalError,
        format!("keeper caught unexpected signal {signum}"),
      );
    }
  }

  /// Kill the child and record the cause. Group first, then the leader,
  /// to catch stray descendants.
  fn kill_child(&mut self, reason: ResultCode, message: String) {
    self.clear_timer();

    let _ = kill(Pid::from_raw(-self.child.as_raw()), Signal::SIGKILL);
    let _ = kill(self.child, Signal::SIGKILL);

    loop {
      match wait4(self.child) {
        Err(Errno::EINTR) => continue,
        Err(_) => break,
        Ok((_, _, usage)) => {
          self.stats.update_rusage(&usage);
          break;
        }
      }
    }

    self.stats.process_was_killed = true;
    self.stats.update_result(reason);
    self.stats.exit_code = 0;
    self.stats.internal_message = message;

    self.update_stats();
  }

  fn violated_limit(&self) -> Option<ResultCode> {
    limit_violation(
      self.config,
      self.cgroup.cpu_time_ms(),
      self.wall_ms(),
      self.cgroup.memory_kb(),
    )
  }

  fn wall_ms(&self) -> u64 {
    self.wall_clock.elapsed().as_millis() as u64
  }

  fn update_stats(&mut self) {
    let time = self.cgroup.times();
    self.stats.update_time(&time);
    self.stats.time.wall_ms = self.wall_ms();
    self.stats.memory_kb = self.cgroup.memory_kb();
  }

  fn install_signal_handlers(&self) -> Result {
    let action = SigAction::new(
      SigHandler::Handler(keeper_signal_handler),
      SaFlags::empty(),
      SigSet::empty(),
    );

    for signal in CAUGHT_SIGNALS {
      unsafe { sigaction(signal, &action) }
        .map_err(|error| Error::System(format!("sigaction({signal}): {error}")))?;
    }

    Ok(())
  }

  fn clear_timer(&self) {
    let _ = set_interval_timer(0);
  }

  /// Drained exactly once per run, after the child has been reaped. Any
  /// message means the initializer died before exec.
  fn drain_error_pipe(&mut self) -> Result {
    let Some(mut pipe) = self.error_pipe.take() else {
      return Ok(());
    };

    let mut message = String::new();

    match pipe.read_to_string(&mut message) {
      Ok(_) => {}
      Err(error) if error.kind() == io::ErrorKind::WouldBlock => {}
      Err(error) => {
        return Err(Error::System(format!("cannot read error pipe: {error}")));
      }
    }

    ensure!(message.is_empty(), Error::ChildSetup(message));

    Ok(())
  }
}

/// Which configured limit, if any, the observed usage exceeds. Ties
/// break in the order cpu, wall, memory.
fn limit_violation(
  config: &SandboxConfig,
  cpu_ms: u64,
  wall_ms: u64,
  memory_kb: u64,
) -> Option<ResultCode> {
  if config.cpu_time_limit_ms != 0 && cpu_ms >= config.cpu_time_limit_ms + config.extra_time_ms {
    return Some(ResultCode::TimeLimitExceeded);
  }

  if config.wall_time_limit_ms != 0 && wall_ms >= config.wall_time_limit_ms + config.extra_time_ms
  {
    return Some(ResultCode::WallTimeLimitExceeded);
  }

  if config.memory_limit_kb != 0 && memory_kb >= config.memory_limit_kb {
    return Some(ResultCode::MemoryLimitExceeded);
  }

  None
}

fn wait4(pid: Pid) -> Result<(Pid, i32, libc::rusage), Errno> {
  let mut status = 0;
  let mut usage = unsafe { mem::zeroed::<libc::rusage>() };

  let result = unsafe { libc::wait4(pid.as_raw(), &mut status, 0, &mut usage) };

  if result < 0 {
    Err(Errno::last())
  } else {
    Ok((Pid::from_raw(result), status, usage))
  }
}

fn set_interval_timer(interval_ms: u64) -> io::Result<()> {
  let interval = libc::timeval {
    tv_sec: (interval_ms / 1000) as libc::time_t,
    tv_usec: ((interval_ms % 1000) * 1000) as libc::suseconds_t,
  };

  let timer = libc::itimerval {
    it_interval: interval,
    it_value: interval,
  };

  if unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, ptr::null_mut()) } != 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(cpu: u64, wall: u64, extra: u64, memory: u64) -> SandboxConfig {
    SandboxConfig {
      cpu_time_limit_ms: cpu,
      wall_time_limit_ms: wall,
      extra_time_ms: extra,
      memory_limit_kb: memory,
      ..Default::default()
    }
  }

  #[test]
  fn no_limits_no_violation() {
    assert_eq!(
      limit_violation(&config(0, 0, 0, 0), u64::MAX, u64::MAX, u64::MAX),
      None
    );
  }

  #[test]
  fn cpu_limit_includes_extra_time() {
    let config = config(1000, 0, 500, 0);

    assert_eq!(limit_violation(&config, 1499, 0, 0), None);

    assert_eq!(
      limit_violation(&config, 1500, 0, 0),
      Some(ResultCode::TimeLimitExceeded)
    );
  }

  #[test]
  fn zero_extra_time_kills_at_the_limit() {
    let config = config(1000, 0, 0, 0);

    assert_eq!(
      limit_violation(&config, 1000, 0, 0),
      Some(ResultCode::TimeLimitExceeded)
    );
  }

  #[test]
  fn wall_limit() {
    let config = config(0, 2000, 100, 0);

    assert_eq!(limit_violation(&config, u64::MAX, 2099, 0), None);

    assert_eq!(
      limit_violation(&config, 0, 2100, 0),
      Some(ResultCode::WallTimeLimitExceeded)
    );
  }

  #[test]
  fn memory_limit_has_no_extra_margin() {
    let config = config(0, 0, 500, 4096);

    assert_eq!(limit_violation(&config, 0, 0, 4095), None);

    assert_eq!(
      limit_violation(&config, 0, 0, 4096),
      Some(ResultCode::MemoryLimitExceeded)
    );
  }

  #[test]
  fn ties_break_cpu_then_wall_then_memory() {
    let config = config(100, 100, 0, 100);

    assert_eq!(
      limit_violation(&config, 100, 100, 100),
      Some(ResultCode::TimeLimitExceeded)
    );

    assert_eq!(
      limit_violation(&config, 0, 100, 100),
      Some(ResultCode::WallTimeLimitExceeded)
    );

    assert_eq!(
      limit_violation(&config, 0, 0, 100),
      Some(ResultCode::MemoryLimitExceeded)
    );
  }
}
