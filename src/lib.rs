use {
  crate::{
    cgroup::{try_read_attribute, try_write_attribute, write_attribute, Backend},
    cgroup_v1::CgroupV1,
    cgroup_v2::CgroupV2,
    initializer::Initializer,
    keeper::Keeper,
    limits::Limits,
    mount::MountPlan,
    path_ext::PathExt,
    permissions::FilePermissions,
    system::{MaterialSystem, System},
  },
  camino::{Utf8Path, Utf8PathBuf},
  clap::{ArgAction, ArgGroup, Parser},
  nix::{
    errno::Errno,
    fcntl::OFlag,
    mount::{mount, MsFlags},
    sched::CloneFlags,
    sys::{
      resource::{setrlimit, Resource, RLIM_INFINITY},
      signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal},
      stat::{stat, umask, Mode as FileMode, SFlag},
      statfs::{statfs, CGROUP2_SUPER_MAGIC},
      wait::WaitStatus,
    },
    unistd::{
      chdir, chroot, close, dup2, execvpe, geteuid, getpid, pipe2, setgroups, setpgid, setresgid,
      setresuid, Gid, Pid, Uid,
    },
  },
  serde::{Deserialize, Serialize},
  std::{
    collections::BTreeMap,
    convert::Infallible,
    env,
    ffi::CString,
    fmt, fs,
    io::{self, Read, Write},
    mem,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    os::unix::fs::{OpenOptionsExt, PermissionsExt},
    path::PathBuf,
    process::Command,
    ptr,
    str::FromStr,
    sync::atomic::{AtomicPtr, Ordering},
    time::Instant,
  },
  thiserror::Error,
  tracing::{debug, info, warn},
};

pub use crate::{
  arguments::Arguments,
  cgroup::Cgroup,
  config::{DiskQuota, EnvironmentConfig, Mode, PermissionConfig, SandboxConfig},
  dir_rule::{DirOptions, DirRule, DirRules},
  environment::{Credentials, Environment},
  error::Error,
  jailer::Jailer,
  permissions::Permission,
  stats::{MetaFormat, ResultCode, RunStats, TimeStat},
  variable::{Action, Variable},
};

pub type Result<T = (), E = Error> = std::result::Result<T, E>;

mod arguments;
mod cgroup;
mod cgroup_v1;
mod cgroup_v2;
mod config;
mod dir_rule;
mod ensure;
mod environment;
mod error;
mod initializer;
mod jailer;
mod keeper;
mod limits;
mod mount;
mod path_ext;
mod permissions;
mod quota;
mod stats;
mod system;
mod variable;
