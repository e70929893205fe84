//! End-to-end scenarios. These require root, mounted cgroups and the
//! namespace syscalls, so they are gated behind the `integration`
//! feature and meant to run inside a privileged judge host:
//!
//! ```text
//! cargo test --features integration -- --test-threads 1
//! ```

#![cfg(feature = "integration")]

use {
  boxjail::{Environment, Jailer, Mode, ResultCode, RunStats, SandboxConfig},
  camino::Utf8PathBuf,
  std::fs,
};

const BOX_ID: u32 = 990;

fn environment() -> Environment {
  Environment::default()
}

fn quoted(words: &[&str]) -> String {
  words
    .iter()
    .map(|word| format!("\"{word}\""))
    .collect::<Vec<String>>()
    .join(" ")
}

fn execute(box_id: u32, configure: impl FnOnce(&mut SandboxConfig)) -> RunStats {
  let environment = environment();

  let meta_file = Utf8PathBuf::from(format!("/tmp/boxjail-meta-{box_id}.json"));

  let base = SandboxConfig {
    box_id,
    meta_file: Some(meta_file.clone()),
    ..Default::default()
  };

  let mut init_config = base.clone();
  init_config.run_command = String::new();

  Jailer::new(init_config, &environment)
    .unwrap()
    .start(Mode::Init)
    .unwrap();

  let mut run_config = base.clone();
  configure(&mut run_config);

  let run_result = Jailer::new(run_config, &environment)
    .unwrap()
    .start(Mode::Run);

  let stats: RunStats =
    serde_json::from_str(&fs::read_to_string(&meta_file).unwrap()).unwrap();

  Jailer::new(base, &environment)
    .unwrap()
    .start(Mode::Cleanup)
    .unwrap();

  fs::remove_file(&meta_file).ok();

  run_result.unwrap();

  stats
}

#[test]
fn exit_zero() {
  let stats = execute(BOX_ID, |config| {
    config.run_command = quoted(&["/bin/true"]);
  });

  assert_eq!(stats.result_code, ResultCode::Ok);
  assert_eq!(stats.exit_code, 0);
  assert!(!stats.process_was_killed);
  assert_eq!(stats.terminal_signal, 0);
  assert!(stats.time.wall_ms > 0);
}

#[test]
fn non_zero_exit() {
  let stats = execute(BOX_ID + 1, |config| {
    config.run_command = quoted(&["/bin/false"]);
  });

  assert_eq!(stats.result_code, ResultCode::NonZeroExitStatus);
  assert_eq!(stats.exit_code, 1);
}

#[test]
fn cpu_limit_kills_busy_loop() {
  let stats = execute(BOX_ID + 2, |config| {
    config.run_command = quoted(&["/bin/sh", "-c", "while :; do :; done"]);
    config.cpu_time_limit_ms = 100;
    config.extra_time_ms = 50;
    config.wall_time_limit_ms = 10000;
  });

  assert_eq!(stats.result_code, ResultCode::TimeLimitExceeded);
  assert!(stats.process_was_killed);
  assert!(stats.time.cpu_ms >= 100);
}

#[test]
fn wall_limit_kills_sleeper() {
  let stats = execute(BOX_ID + 3, |config| {
    config.run_command = quoted(&["/bin/sleep", "5"]);
    config.wall_time_limit_ms = 100;
    config.extra_time_ms = 50;
  });

  assert_eq!(stats.result_code, ResultCode::WallTimeLimitExceeded);
  assert!(stats.process_was_killed);
  assert!(stats.time.wall_ms >= 100);
  assert!(stats.time.wall_ms < 5000);
}

#[test]
fn memory_limit() {
  let stats = execute(BOX_ID + 4, |config| {
    config.run_command = quoted(&[
      "/bin/sh",
      "-c",
      "a=x; while :; do a=$a$a; done",
    ]);
    config.memory_limit_kb = 4096;
    config.wall_time_limit_ms = 10000;
    config.extra_time_ms = 100;
  });

  // Either the keeper observes the limit first, or the kernel's OOM
  // killer gets there before it.
  assert!(
    stats.result_code == ResultCode::MemoryLimitExceeded
      || (stats.result_code == ResultCode::RuntimeError && stats.terminal_signal == 9),
    "unexpected outcome: {stats:?}"
  );
}

#[test]
fn fatal_signal_is_a_runtime_error() {
  let stats = execute(BOX_ID + 5, |config| {
    config.run_command = quoted(&["/bin/sh", "-c", "kill -SEGV $$"]);
  });

  assert_eq!(stats.result_code, ResultCode::RuntimeError);
  assert_eq!(stats.terminal_signal, 11);
}

#[test]
fn stdout_redirection_lands_in_box() {
  let stats = execute(BOX_ID + 6, |config| {
    config.run_command = quoted(&["/bin/echo", "hello"]);
    config.stdout_path = Some(Utf8PathBuf::from("output.txt"));
  });

  assert_eq!(stats.result_code, ResultCode::Ok);
}

#[test]
fn cleanup_is_idempotent() {
  let environment = environment();

  let config = SandboxConfig {
    box_id: BOX_ID + 7,
    ..Default::default()
  };

  Jailer::new(config.clone(), &environment)
    .unwrap()
    .start(Mode::Init)
    .unwrap();

  Jailer::new(config.clone(), &environment)
    .unwrap()
    .start(Mode::Cleanup)
    .unwrap();

  assert!(!environment.box_dir(BOX_ID + 7).join("box").exists());

  Jailer::new(config, &environment)
    .unwrap()
    .start(Mode::Cleanup)
    .unwrap();
}

#[test]
fn init_replaces_existing_box() {
  let environment = environment();

  let config = SandboxConfig {
    box_id: BOX_ID + 8,
    ..Default::default()
  };

  Jailer::new(config.clone(), &environment)
    .unwrap()
    .start(Mode::Init)
    .unwrap();

  let marker = environment.box_dir(BOX_ID + 8).join("box").join("marker");
  fs::write(&marker, "stale").unwrap();

  Jailer::new(config.clone(), &environment)
    .unwrap()
    .start(Mode::Init)
    .unwrap();

  assert!(!marker.exists());

  Jailer::new(config, &environment)
    .unwrap()
    .start(Mode::Cleanup)
    .unwrap();
}
