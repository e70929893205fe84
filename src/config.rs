use super::*;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum Mode {
  /// Create the sandbox directory and the control group.
  Init,
  /// Run a command inside the prepared sandbox.
  Run,
  /// Remove the sandbox directory and the control group.
  Cleanup,
}

/// Disk quota applied to the filesystem hosting the sandbox directory.
///
/// Unlike other options, quotas are applied during `--init`.
///
/// This requires the filesystem to be mounted with support for quotas and
/// currently works only on the ext family of filesystems. If the quota is
/// reached, system calls expanding files fail with error EDQUOT.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DiskQuota {
  /// Limit on the number of allocated disk blocks. 0 = unlimited.
  pub blocks: u32,
  /// Limit on the number of allocated inodes. 0 = unlimited.
  pub inodes: u32,
}

/// Environment rules for the sandboxed program.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EnvironmentConfig {
  /// Inherit all variables from the parent.
  ///
  /// UNIX processes normally inherit all environment variables from their
  /// parent. The sandbox however passes only those variables which are
  /// explicitly requested by environment rules.
  pub pass_environment: bool,

  /// Custom rules, applied in order after the defaults.
  pub rules: Vec<Variable>,
}

/// File permission rules applied inside `/box` before privileges are
/// dropped.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PermissionConfig {
  /// Grant the sandbox user full access over the box directory and its
  /// immediate children before any custom rule applies.
  pub full_over_folder: bool,

  /// Custom rules, applied in the order given.
  pub rules: Vec<Permission>,
}

impl Default for PermissionConfig {
  fn default() -> Self {
    Self {
      full_over_folder: true,
      rules: Vec::new(),
    }
  }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SandboxConfig {
  /// When multiple sandboxes are used in parallel, each must get a unique
  /// ID.
  pub box_id: u32,

  /// Time in milliseconds between two status checks of the sandboxed
  /// process. 0 disables the periodic check.
  pub check_interval_ms: u64,

  /// Limit run time of the program to this many milliseconds.
  ///
  /// Time in which the OS assigns the processor to other tasks is not
  /// counted. 0 = unlimited.
  ///
  /// If this limit is exceeded, the program is killed (after
  /// `extra_time_ms`, if set).
  pub cpu_time_limit_ms: u64,

  /// Directory rules applied on top of the default set.
  pub dir_rules: Vec<DirRule>,

  /// Disk quota for the sandbox user.
  pub disk_quota: DiskQuota,

  /// Environment rules.
  pub environment: EnvironmentConfig,

  /// Change directory to this path (inside the sandbox) before executing
  /// the program.
  pub exec_directory: Option<Utf8PathBuf>,

  /// When a time limit is exceeded, do not kill the program immediately,
  /// but wait until `extra_time_ms` more milliseconds elapse.
  ///
  /// This allows to report the real execution time, even if it exceeds the
  /// limit slightly, and absorbs the quantization jitter of the periodic
  /// status check.
  pub extra_time_ms: u64,

  /// Limit size of each file created (or modified) by the program to this
  /// many kilobytes. 0 = unlimited.
  ///
  /// If this limit is reached, system calls expanding files fail with
  /// error EFBIG and the program receives the SIGXFSZ signal.
  pub file_size_limit_kb: u64,

  /// File permission rules.
  pub file_permissions: PermissionConfig,

  /// Print the meta record in the legacy format.
  pub legacy_meta_json: bool,

  /// Permit the program to create up to this many processes and/or
  /// threads. 0 = unlimited. By default, only one process is permitted.
  ///
  /// If this limit is exceeded, system calls creating processes fail with
  /// error EAGAIN.
  pub max_processes: u32,

  /// Limit the memory of the whole control group to this many kilobytes.
  /// 0 = unlimited.
  ///
  /// This is enforced by the control group rather than an address-space
  /// rlimit: RLIMIT_AS counts virtual address space including mapped
  /// files, which misclassifies many language runtimes.
  pub memory_limit_kb: u64,

  /// Write the meta record to this file instead of standard output.
  pub meta_file: Option<Utf8PathBuf>,

  /// Run more tasks inside one sandbox but under separate control groups
  /// and credentials. Must be in `[0, max_per_box)`.
  pub process_id: u32,

  /// The command executed inside the sandbox, as a shell-quoted
  /// concatenation of words. It is word-split again just before exec.
  pub run_command: String,

  /// By default, the child gets a new network namespace containing no
  /// network devices. This switch keeps the child in the parent's network
  /// namespace instead.
  pub share_network: bool,

  /// Limit process stack to this many kilobytes. 0 = unlimited.
  ///
  /// If this limit is exceeded, the program receives the SIGSEGV signal.
  pub stack_limit_kb: u64,

  /// Redirect standard error output to this file, opened inside the
  /// sandbox. If unset, standard error is a duplicate of standard output.
  pub stderr_path: Option<Utf8PathBuf>,

  /// Redirect standard input from this file, opened inside the sandbox.
  pub stdin_path: Option<Utf8PathBuf>,

  /// Redirect standard output to this file, opened inside the sandbox.
  pub stdout_path: Option<Utf8PathBuf>,

  /// Open the standard output redirection before the standard input one.
  ///
  /// For interactive bidirectional FIFOs, opening stdin first deadlocks:
  /// open(O_RDONLY) blocks until a writer appears on the other end.
  /// Reversing the order breaks the cycle.
  pub swap_pipe_order: bool,

  /// Verbosity of status reporting (0 = warnings only).
  pub verbose_level: u8,

  /// Limit wall-clock time to this many milliseconds. 0 = unlimited.
  ///
  /// This clock measures the time from the start of the program to its
  /// exit, so it does not stop when the program has lost the CPU or when
  /// it is waiting for an external event.
  pub wall_time_limit_ms: u64,
}

impl Default for SandboxConfig {
  fn default() -> Self {
    Self {
      box_id: 0,
      check_interval_ms: 100,
      cpu_time_limit_ms: 0,
      dir_rules: Vec::new(),
      disk_quota: DiskQuota::default(),
      environment: EnvironmentConfig::default(),
      exec_directory: None,
      extra_time_ms: 0,
      file_size_limit_kb: 0,
      file_permissions: PermissionConfig::default(),
      legacy_meta_json: false,
      max_processes: 1,
      memory_limit_kb: 0,
      meta_file: None,
      process_id: 0,
      run_command: String::new(),
      share_network: false,
      stack_limit_kb: 0,
      stderr_path: None,
      stdin_path: None,
      stdout_path: None,
      swap_pipe_order: false,
      verbose_level: 0,
      wall_time_limit_ms: 0,
    }
  }
}

impl SandboxConfig {
  pub fn meta_format(&self) -> MetaFormat {
    if self.legacy_meta_json {
      MetaFormat::Legacy
    } else {
      MetaFormat::Default
    }
  }
}
