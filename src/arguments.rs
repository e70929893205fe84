use super::*;

const ALL_OPTIONS: [&str; 28] = [
  "box-id",
  "chdir",
  "cleanup",
  "env",
  "extra-time",
  "file-size",
  "full-env",
  "help",
  "include-dir",
  "init",
  "interactive",
  "legacy-meta-json",
  "memory",
  "meta",
  "permission",
  "process-id",
  "processes",
  "quota-blocks",
  "quota-inodes",
  "run",
  "share-net",
  "stack",
  "stderr",
  "stdin",
  "stdout",
  "time",
  "verbose",
  "wall-time",
];

#[derive(Debug, Parser)]
#[command(
  name = "boxjail",
  about = "Run untrusted programs under strict, enforceable resource limits",
  group = ArgGroup::new("mode").required(true).multiple(false).args(["init", "run", "cleanup"]),
)]
pub struct Arguments {
  #[arg(short, long, help = "Initialize sandbox")]
  init: bool,

  #[arg(short, long, help = "Run given command in sandbox (positional arguments)")]
  run: bool,

  #[arg(long, help = "Clean up sandbox")]
  cleanup: bool,

  #[arg(
    short,
    long,
    value_name = "ID",
    help = "When multiple sandboxes are used in parallel, each must get a unique ID"
  )]
  box_id: u32,

  #[arg(
    short,
    long,
    default_value_t = 0,
    value_name = "ID",
    help = "Run more tasks inside a sandbox but in different cgroups"
  )]
  process_id: u32,

  #[arg(
    short,
    long,
    action = ArgAction::Count,
    help = "Be verbose (repeat for bigger verbosity)"
  )]
  verbose: u8,

  #[arg(
    long,
    value_name = "FILE",
    num_args = 0..=1,
    default_missing_value = "metares.txt",
    help = "Output run stats to specified file (default: stdout)"
  )]
  meta: Option<Utf8PathBuf>,

  #[arg(long, help = "Print meta file in old format")]
  legacy_meta_json: bool,

  #[arg(
    short,
    long,
    default_value_t = 0.0,
    value_name = "SECONDS",
    help = "Run time limit (seconds, real; 0 is unlimited)"
  )]
  time: f64,

  #[arg(
    long,
    default_value_t = 0.0,
    value_name = "SECONDS",
    help = "Wall clock time limit (seconds, real; 0 is unlimited)"
  )]
  wall_time: f64,

  #[arg(
    long,
    default_value_t = 0.0,
    value_name = "SECONDS",
    help = "Extra time before which a timing-out program is not yet killed (seconds, real)"
  )]
  extra_time: f64,

  #[arg(
    short,
    long,
    default_value_t = 0,
    value_name = "SIZE",
    help = "Limit memory of the whole control group to <SIZE> KB (0 is unlimited)"
  )]
  memory: u64,

  #[arg(
    long,
    default_value_t = 0,
    value_name = "SIZE",
    help = "Limit stack size to <SIZE> KB (0 is unlimited)"
  )]
  stack: u64,

  #[arg(
    long,
    default_value_t = 0,
    value_name = "SIZE",
    help = "Max size (in KB) of files that can be created (0 is unlimited)"
  )]
  file_size: u64,

  #[arg(
    long,
    value_name = "MAX",
    num_args = 0..=1,
    default_value_t = 1,
    default_missing_value = "0",
    help = "Enable multiple processes (at most <MAX> of them; 0 is unlimited)"
  )]
  processes: u32,

  #[arg(long, default_value_t = 0, value_name = "BLOCKS", help = "Set disk quota to <BLOCKS> blocks")]
  quota_blocks: u32,

  #[arg(long, default_value_t = 0, value_name = "INODES", help = "Set disk quota to <INODES> inodes")]
  quota_inodes: u32,

  #[arg(long, value_name = "FILE", help = "Redirect stdin from <FILE>")]
  stdin: Option<Utf8PathBuf>,

  #[arg(long, value_name = "FILE", help = "Redirect stdout to <FILE>")]
  stdout: Option<Utf8PathBuf>,

  #[arg(long, value_name = "FILE", help = "Redirect stderr to <FILE>")]
  stderr: Option<Utf8PathBuf>,

  #[arg(
    long,
    help = "Swap stdin and stdout open order, so interactive FIFO pairs don't deadlock on open"
  )]
  interactive: bool,

  #[arg(long, value_name = "DIR", help = "Change directory to <DIR> before executing the program")]
  chdir: Option<Utf8PathBuf>,

  #[arg(
    long,
    value_name = "SPEC",
    help = "Mount a directory inside the sandbox; SPEC is box[=local][:rw][:dev][:noexec][:fs][:maybe]"
  )]
  include_dir: Vec<DirRule>,

  #[arg(long, help = "Inherit full environment of the parent process")]
  full_env: bool,

  #[arg(
    long,
    value_name = "VAR[=VAL]",
    help = "Set environment variable <VAR> to <VAL>, or inherit it from the parent if <VAL> is omitted"
  )]
  env: Vec<Variable>,

  #[arg(
    long,
    value_name = "FILE[:MODE]",
    help = "Grant <MODE> (an rwx string, default none) on <FILE> to the sandbox user; applied in the given order"
  )]
  permission: Vec<Permission>,

  #[arg(long, help = "Share network namespace with the parent process")]
  share_net: bool,

  #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
  command: Vec<String>,
}

impl Arguments {
  /// Like `parse`, but unknown options get a suggestion computed from
  /// the known option list, and all argument errors exit with status 1.
  pub fn parse_or_suggest() -> Self {
    match Self::try_parse() {
      Ok(arguments) => arguments,
      Err(error) => match error.kind() {
        clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
          error.exit()
        }
        clap::error::ErrorKind::UnknownArgument => {
          if let Some(clap::error::ContextValue::String(argument)) =
            error.get(clap::error::ContextKind::InvalidArg)
          {
            let wrong = argument
              .trim_start_matches('-')
              .split('=')
              .next()
              .unwrap_or_default();

            eprintln!(
              "unknown option '{argument}'. Did you mean '--{}'?",
              closest_option(wrong)
            );

            std::process::exit(1);
          }

          let _ = error.print();
          std::process::exit(1);
        }
        _ => {
          let _ = error.print();
          std::process::exit(1);
        }
      },
    }
  }

  pub fn verbose_level(&self) -> u8 {
    self.verbose
  }

  pub fn into_config(self) -> Result<(Mode, SandboxConfig)> {
    let mode = if self.init {
      Mode::Init
    } else if self.run {
      Mode::Run
    } else {
      Mode::Cleanup
    };

    ensure!(
      mode != Mode::Run || !self.command.is_empty(),
      Error::Config("--run mode requires a command to run".into())
    );

    let config = SandboxConfig {
      box_id: self.box_id,
      cpu_time_limit_ms: seconds_to_ms(self.time),
      dir_rules: self.include_dir,
      disk_quota: DiskQuota {
        blocks: self.quota_blocks,
        inodes: self.quota_inodes,
      },
      environment: EnvironmentConfig {
        pass_environment: self.full_env,
        rules: self.env,
      },
      exec_directory: self.chdir,
      extra_time_ms: seconds_to_ms(self.extra_time),
      file_size_limit_kb: self.file_size,
      file_permissions: PermissionConfig {
        rules: self.permission,
        ..Default::default()
      },
      legacy_meta_json: self.legacy_meta_json,
      max_processes: self.processes,
      memory_limit_kb: self.memory,
      meta_file: self.meta,
      process_id: self.process_id,
      run_command: quote_join(&self.command),
      share_network: self.share_net,
      stack_limit_kb: self.stack,
      stderr_path: self.stderr,
      stdin_path: self.stdin,
      stdout_path: self.stdout,
      swap_pipe_order: self.interactive,
      verbose_level: self.verbose,
      wall_time_limit_ms: seconds_to_ms(self.wall_time),
      ..Default::default()
    };

    Ok((mode, config))
  }
}

fn seconds_to_ms(seconds: f64) -> u64 {
  (seconds * 1000.0) as u64
}

/// Join command words into the shell-quoted form carried by the
/// configuration; `word_split` undoes it in the child.
pub fn quote_join(words: &[String]) -> String {
  words
    .iter()
    .map(|word| format!("\"{word}\""))
    .collect::<Vec<String>>()
    .join(" ")
}

/// Split a command line into words, honoring double quotes.
pub fn word_split(command: &str) -> Vec<String> {
  let mut words = Vec::new();
  let mut current = String::new();
  let mut quoted = false;
  let mut pending = false;

  for c in command.chars() {
    match c {
      '"' => {
        quoted = !quoted;
        pending = true;
      }
      c if c.is_whitespace() && !quoted => {
        if pending || !current.is_empty() {
          words.push(mem::take(&mut current));
          pending = false;
        }
      }
      c => current.push(c),
    }
  }

  if pending || !current.is_empty() {
    words.push(current);
  }

  words
}

/// The known option closest to a mistyped one, by minimum edit distance
/// over all permutations of each option's hyphen-separated tokens, so
/// that e.g. `time-wall` still suggests `wall-time`.
fn closest_option(wrong: &str) -> &'static str {
  let mut best_distance = usize::MAX;
  let mut best = ALL_OPTIONS[0];

  for option in ALL_OPTIONS {
    let tokens: Vec<&str> = option.split('-').collect();

    for permutation in permutations(tokens.len()) {
      let candidate = permutation
        .iter()
        .map(|index| tokens[*index])
        .collect::<Vec<&str>>()
        .join("-");

      let distance = levenshtein(wrong, &candidate);

      if distance < best_distance {
        best_distance = distance;
        best = option;
      }
    }
  }

  best
}

fn permutations(n: usize) -> Vec<Vec<usize>> {
  fn fill(prefix: &mut Vec<usize>, n: usize, out: &mut Vec<Vec<usize>>) {
    if prefix.len() == n {
      out.push(prefix.clone());
      return;
    }

    for index in 0..n {
      if !prefix.contains(&index) {
        prefix.push(index);
        fill(prefix, n, out);
        prefix.pop();
      }
    }
  }

  let mut out = Vec::new();
  fill(&mut Vec::new(), n, &mut out);
  out
}

fn levenshtein(a: &str, b: &str) -> usize {
  let a: Vec<char> = a.chars().collect();
  let b: Vec<char> = b.chars().collect();

  let mut distances = vec![vec![0; b.len() + 1]; a.len() + 1];

  for (i, row) in distances.iter_mut().enumerate() {
    row[0] = i;
  }

  for j in 0..=b.len() {
    distances[0][j] = j;
  }

  for i in 1..=a.len() {
    for j in 1..=b.len() {
      let substitution = usize::from(a[i - 1] != b[j - 1]);

      distances[i][j] = (distances[i - 1][j] + 1)
        .min(distances[i][j - 1] + 1)
        .min(distances[i - 1][j - 1] + substitution);
    }
  }

  distances[a.len()][b.len()]
}

#[cfg(test)]
mod tests {
  use {super::*, assert_matches::assert_matches};

  fn parse(arguments: &[&str]) -> Arguments {
    Arguments::try_parse_from(arguments).unwrap()
  }

  #[test]
  fn levenshtein_distance() {
    assert_eq!(levenshtein("time", "time"), 0);
    assert_eq!(levenshtein("tmie", "time"), 2);
    assert_eq!(levenshtein("", "abc"), 3);
    assert_eq!(levenshtein("kitten", "sitting"), 3);
  }

  #[test]
  fn permutation_count() {
    assert_eq!(permutations(1).len(), 1);
    assert_eq!(permutations(2).len(), 2);
    assert_eq!(permutations(3).len(), 6);
  }

  #[test]
  fn closest_option_simple_typo() {
    assert_eq!(closest_option("tmie"), "time");
    assert_eq!(closest_option("memroy"), "memory");
  }

  #[test]
  fn closest_option_permuted_tokens() {
    assert_eq!(closest_option("time-wall"), "wall-time");
    assert_eq!(closest_option("json-meta-legacy"), "legacy-meta-json");
  }

  #[test]
  fn quote_join_word_split_round_trip() {
    let words = vec![
      "/bin/sh".to_string(),
      "-c".to_string(),
      "echo hello world".to_string(),
    ];

    assert_eq!(word_split(&quote_join(&words)), words);
  }

  #[test]
  fn word_split_preserves_empty_quoted_words() {
    assert_eq!(word_split("\"a\" \"\" \"b c\""), ["a", "", "b c"]);
  }

  #[test]
  fn word_split_unquoted() {
    assert_eq!(word_split("  echo   hello  "), ["echo", "hello"]);
    assert_eq!(word_split(""), Vec::<String>::new());
  }

  #[test]
  fn mode_selection() {
    let (mode, _) = parse(&["boxjail", "--init", "-b", "0"]).into_config().unwrap();
    assert_eq!(mode, Mode::Init);

    let (mode, _) = parse(&["boxjail", "--cleanup", "-b", "0"])
      .into_config()
      .unwrap();
    assert_eq!(mode, Mode::Cleanup);

    let (mode, config) = parse(&["boxjail", "--run", "-b", "0", "/bin/true"])
      .into_config()
      .unwrap();
    assert_eq!(mode, Mode::Run);
    assert_eq!(config.run_command, "\"/bin/true\"");
  }

  #[test]
  fn exactly_one_mode_is_required() {
    assert!(Arguments::try_parse_from(["boxjail", "-b", "0"]).is_err());

    assert!(Arguments::try_parse_from(["boxjail", "--init", "--run", "-b", "0"]).is_err());
  }

  #[test]
  fn run_requires_a_command() {
    let result = parse(&["boxjail", "--run", "-b", "0"]).into_config();

    assert_matches!(
      result,
      Err(Error::Config(message)) if message.contains("requires a command")
    );
  }

  #[test]
  fn times_convert_to_milliseconds() {
    let (_, config) = parse(&[
      "boxjail",
      "--run",
      "-b",
      "0",
      "--time",
      "1.5",
      "--wall-time",
      "30",
      "--extra-time",
      "0.05",
      "/bin/true",
    ])
    .into_config()
    .unwrap();

    assert_eq!(config.cpu_time_limit_ms, 1500);
    assert_eq!(config.wall_time_limit_ms, 30000);
    assert_eq!(config.extra_time_ms, 50);
  }

  #[test]
  fn quota_flags_assign_distinct_fields() {
    let (_, config) = parse(&[
      "boxjail",
      "--init",
      "-b",
      "0",
      "--quota-blocks",
      "1000",
      "--quota-inodes",
      "64",
    ])
    .into_config()
    .unwrap();

    assert_eq!(
      config.disk_quota,
      DiskQuota {
        blocks: 1000,
        inodes: 64,
      }
    );
  }

  #[test]
  fn processes_flag_alone_means_unlimited() {
    let (_, config) = parse(&["boxjail", "--run", "-b", "0", "--processes", "--", "/bin/true"])
      .into_config()
      .unwrap();

    assert_eq!(config.max_processes, 0);

    let (_, config) = parse(&["boxjail", "--run", "-b", "0", "/bin/true"])
      .into_config()
      .unwrap();

    assert_eq!(config.max_processes, 1);
  }

  #[test]
  fn meta_flag_alone_uses_default_file() {
    let (_, config) = parse(&["boxjail", "--init", "-b", "0", "--meta"])
      .into_config()
      .unwrap();

    assert_eq!(config.meta_file, Some(Utf8PathBuf::from("metares.txt")));
  }

  #[test]
  fn repeatable_rules_accumulate_in_order() {
    let (_, config) = parse(&[
      "boxjail",
      "--run",
      "-b",
      "0",
      "--include-dir",
      "etc",
      "--include-dir",
      "data=/srv/data:rw",
      "--env",
      "HOME=/box",
      "--env",
      "PATH",
      "--permission",
      "input.txt:r",
      "/bin/true",
    ])
    .into_config()
    .unwrap();

    assert_eq!(config.dir_rules.len(), 2);
    assert_eq!(config.dir_rules[1].box_path(), "data");

    assert_eq!(
      config.environment.rules,
      [
        Variable::with_set_value("HOME", "/box"),
        Variable::new("PATH", Action::Inherit),
      ]
    );

    assert_eq!(
      config.file_permissions.rules,
      [Permission::new("input.txt", "r")]
    );
  }

  #[test]
  fn interactive_swaps_pipe_order() {
    let (_, config) = parse(&["boxjail", "--run", "-b", "0", "--interactive", "/bin/cat"])
      .into_config()
      .unwrap();

    assert!(config.swap_pipe_order);
  }
}
