use super::*;

pub const VERSION: &str = "2.0";

/// Outcome of one sandboxed run.
///
/// Anything except `Ok` is a fail.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ResultCode {
  #[default]
  Undefined = 0,
  Ok = 1,
  /// Reserved for syscall filtering; never produced by this engine.
  RestrictedFunction = 2,
  TimeLimitExceeded = 3,
  WallTimeLimitExceeded = 4,
  MemoryLimitExceeded = 5,
  OutputLimitExceeded = 6,
  NonZeroExitStatus = 7,
  RuntimeError = 8,
  AbnormalTermination = 9,
  InternalError = 10,
}

impl From<ResultCode> for u8 {
  fn from(code: ResultCode) -> u8 {
    code as u8
  }
}

impl TryFrom<u8> for ResultCode {
  type Error = String;

  fn try_from(value: u8) -> Result<Self, String> {
    match value {
      0 => Ok(ResultCode::Undefined),
      1 => Ok(ResultCode::Ok),
      2 => Ok(ResultCode::RestrictedFunction),
      3 => Ok(ResultCode::TimeLimitExceeded),
      4 => Ok(ResultCode::WallTimeLimitExceeded),
      5 => Ok(ResultCode::MemoryLimitExceeded),
      6 => Ok(ResultCode::OutputLimitExceeded),
      7 => Ok(ResultCode::NonZeroExitStatus),
      8 => Ok(ResultCode::RuntimeError),
      9 => Ok(ResultCode::AbnormalTermination),
      10 => Ok(ResultCode::InternalError),
      value => Err(format!("unknown result code {value}")),
    }
  }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TimeStat {
  /// Wall clock time usage in ms.
  pub wall_ms: u64,
  /// CPU usage time in ms.
  pub cpu_ms: u64,
  /// CPU usage in user mode in ms.
  pub user_ms: u64,
  /// CPU usage in kernel mode in ms.
  pub system_ms: u64,
}

/// Statistics about one run, written out as the meta record.
///
/// Numeric and enum fields are only overwritten by truthy values, so
/// reconciliation with `wait4` after a kill cannot zero out counters that
/// were already observed by the periodic status check.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RunStats {
  pub time: TimeStat,

  /// Memory as queried from the control group, in kilobytes.
  pub memory_kb: u64,

  /// Resident set peak size (memory in RAM, not swap).
  pub rss_peak: i64,
  /// Number of context switches caused by the process giving up the CPU.
  pub csw_voluntary: i64,
  /// Number of context switches forced by the kernel.
  pub csw_forced: i64,
  /// Minor page faults (number of pages).
  pub soft_page_faults: u64,
  /// Major page faults (number of pages).
  pub hard_page_faults: u64,

  /// Signal that killed the process.
  pub terminal_signal: i32,
  /// Exit code the program terminated with naturally.
  pub exit_code: i32,
  /// True if the process was killed by the keeper.
  pub process_was_killed: bool,
  /// If not `Ok`, the reason the run did not pass.
  pub result_code: ResultCode,

  pub internal_message: String,
  pub version: String,
}

impl Default for RunStats {
  fn default() -> Self {
    Self {
      time: TimeStat::default(),
      memory_kb: 0,
      rss_peak: 0,
      csw_voluntary: 0,
      csw_forced: 0,
      soft_page_faults: 0,
      hard_page_faults: 0,
      terminal_signal: 0,
      exit_code: 0,
      process_was_killed: false,
      result_code: ResultCode::Undefined,
      internal_message: String::new(),
      version: VERSION.into(),
    }
  }
}

fn merge_u64(lhs: &mut u64, rhs: u64) {
  if rhs != 0 {
    *lhs = rhs;
  }
}

fn merge_i64(lhs: &mut i64, rhs: i64) {
  if rhs != 0 {
    *lhs = rhs;
  }
}

impl RunStats {
  pub fn update_time(&mut self, time: &TimeStat) {
    merge_u64(&mut self.time.wall_ms, time.wall_ms);
    merge_u64(&mut self.time.cpu_ms, time.cpu_ms);
    merge_u64(&mut self.time.user_ms, time.user_ms);
    merge_u64(&mut self.time.system_ms, time.system_ms);
  }

  pub fn update_result(&mut self, result_code: ResultCode) {
    if result_code != ResultCode::Undefined {
      self.result_code = result_code;
    }
  }

  pub fn update_rusage(&mut self, usage: &libc::rusage) {
    merge_i64(&mut self.rss_peak, usage.ru_maxrss);
    merge_i64(&mut self.csw_voluntary, usage.ru_nvcsw);
    merge_i64(&mut self.csw_forced, usage.ru_nivcsw);
    merge_u64(&mut self.soft_page_faults, usage.ru_minflt as u64);
    merge_u64(&mut self.hard_page_faults, usage.ru_majflt as u64);
  }

  pub fn render(&self, format: MetaFormat) -> Result<String> {
    match format {
      MetaFormat::Default => serde_json::to_string_pretty(self)
        .map_err(|error| Error::System(format!("cannot encode run stats: {error}"))),
      MetaFormat::Legacy => Ok(self.legacy_json()),
    }
  }

  /// The historical meta format, kept for callers that predate the
  /// default encoding. Syscall counters are always zero.
  fn legacy_json(&self) -> String {
    format!(
      "{{\n\
       \t\"wallTimeMs\": {},\n\
       \t\"cpuTimeMs\": {},\n\
       \t\"userTimeMs\": {},\n\
       \t\"systemTimeMs\": {},\n\
       \t\"memoryKb\": {},\n\
       \t\"rssPeak\": {},\n\
       \t\"cswVoluntary\": {},\n\
       \t\"cswForced\": {},\n\
       \t\"softPageFaults\": {},\n\
       \t\"hardPageFaults\": {},\n\
       \t\"nrSysCalls\": 0,\n\
       \t\"lastSysCall\": 0,\n\
       \t\"terminalSignal\": {},\n\
       \t\"exitCode\": {},\n\
       \t\"processWasKilled\": {},\n\
       \t\"resultCode\": {},\n\
       \t\"version\": \"{}\",\n\
       \t\"internalMessage\": \"{}\"\n\
       }}\n",
      self.time.wall_ms,
      self.time.cpu_ms,
      self.time.user_ms,
      self.time.system_ms,
      self.memory_kb,
      self.rss_peak,
      self.csw_voluntary,
      self.csw_forced,
      self.soft_page_faults,
      self.hard_page_faults,
      self.terminal_signal,
      self.exit_code,
      self.process_was_killed,
      u8::from(self.result_code),
      VERSION,
      self.internal_message,
    )
  }
}

#[derive(Clone, Copy, Debug)]
pub enum MetaFormat {
  Default,
  Legacy,
}
