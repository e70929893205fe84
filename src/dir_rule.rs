use super::*;

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DirOptions {
  /// Allow access to character and block devices.
  pub allow_devices: bool,

  /// Instead of binding a directory, mount a device-less filesystem named
  /// by `local_path`.
  ///
  /// For example, this can be `proc` or `sysfs`.
  pub filesystem: bool,

  /// Silently ignore the rule if the directory to be bound does not exist.
  pub maybe: bool,

  /// Disallow execution of binaries.
  pub no_exec: bool,

  /// Allow read-write access.
  pub read_write: bool,
}

/// One directory rule for the sandbox root.
///
/// The rules are executed in the order in which they are given. Default
/// rules come before all user rules. When a rule is replaced, it retains
/// the original position in the order. This matters when one rule's
/// `box_path` is a sub-directory of another rule's `box_path`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DirRule {
  /// Path inside the sandbox root, always relative.
  box_path: Utf8PathBuf,
  /// Path outside the sandbox, or a bare filesystem type under the
  /// `filesystem` option.
  local_path: Utf8PathBuf,
  /// Mount options for this directory.
  options: DirOptions,
}

impl DirRule {
  pub fn new(
    box_path: impl AsRef<Utf8Path>,
    local_path: impl AsRef<Utf8Path>,
    options: DirOptions,
  ) -> Result<Self> {
    let box_path = box_path.as_ref().as_str().trim_start_matches('/');
    let local_path = local_path.as_ref().as_str();

    ensure!(
      !box_path.is_empty(),
      Error::DirRule("sandbox path must not be empty".into())
    );

    if options.filesystem {
      ensure!(
        !local_path.starts_with('/'),
        Error::DirRule(format!(
          "`{local_path}` must be a bare filesystem type, not a path"
        ))
      );
    } else if !local_path.is_empty() {
      ensure!(
        local_path.starts_with('/') || local_path.starts_with("./"),
        Error::DirRule(format!(
          "`{local_path}` must be absolute or begin with `./`"
        ))
      );
    }

    Ok(Self {
      box_path: box_path.into(),
      local_path: local_path.into(),
      options,
    })
  }

  pub fn read_only(box_path: impl AsRef<Utf8Path>) -> Result<Self> {
    let local = format!("/{}", box_path.as_ref());
    Self::new(box_path.as_ref(), local, DirOptions::default())
  }

  pub fn read_write(
    box_path: impl AsRef<Utf8Path>,
    local_path: impl AsRef<Utf8Path>,
  ) -> Result<Self> {
    Self::new(
      box_path,
      local_path,
      DirOptions {
        read_write: true,
        ..Default::default()
      },
    )
  }

  pub fn device(box_path: impl AsRef<Utf8Path>) -> Result<Self> {
    let local = format!("/{}", box_path.as_ref());
    Self::new(
      box_path.as_ref(),
      local,
      DirOptions {
        allow_devices: true,
        ..Default::default()
      },
    )
  }

  pub fn optional(box_path: impl AsRef<Utf8Path>) -> Result<Self> {
    let local = format!("/{}", box_path.as_ref());
    Self::new(
      box_path.as_ref(),
      local,
      DirOptions {
        maybe: true,
        ..Default::default()
      },
    )
  }

  pub fn filesystem(
    box_path: impl AsRef<Utf8Path>,
    fs_type: impl AsRef<Utf8Path>,
  ) -> Result<Self> {
    Self::new(
      box_path,
      fs_type,
      DirOptions {
        filesystem: true,
        ..Default::default()
      },
    )
  }

  pub fn box_path(&self) -> &Utf8Path {
    &self.box_path
  }

  pub fn local_path(&self) -> &Utf8Path {
    &self.local_path
  }

  pub fn options(&self) -> &DirOptions {
    &self.options
  }
}

impl FromStr for DirRule {
  type Err = Error;

  /// Parse `box[=local][:flag...]` with flags `rw`, `dev`, `noexec`,
  /// `fs` and `maybe`. Without `local`, `/<box>` is bound.
  fn from_str(spec: &str) -> Result<Self> {
    let mut segments = spec.split(':');

    let paths = segments.next().unwrap_or_default();

    let (box_path, local_path) = match paths.split_once('=') {
      Some((box_path, local_path)) => (box_path.to_string(), local_path.to_string()),
      None => (
        paths.to_string(),
        format!("/{}", paths.trim_start_matches('/')),
      ),
    };

    let mut options = DirOptions::default();

    for flag in segments {
      match flag {
        "dev" => options.allow_devices = true,
        "fs" => options.filesystem = true,
        "maybe" => options.maybe = true,
        "noexec" => options.no_exec = true,
        "rw" => options.read_write = true,
        flag => {
          return Err(Error::DirRule(format!(
            "unknown directory rule flag `{flag}`"
          )))
        }
      }
    }

    Self::new(box_path, local_path, options)
  }
}

/// The ordered rule set applied when the sandbox root is assembled.
///
/// Defaults are seeded first so that user rules can override them; a
/// second rule with the same `box_path` overwrites the first in place.
#[derive(Debug)]
pub struct DirRules {
  rules: Vec<DirRule>,
}

impl DirRules {
  pub fn with_defaults(user_rules: &[DirRule]) -> Result<Self> {
    let mut rules = Self {
      rules: Self::default_rules()?,
    };

    for rule in user_rules {
      rules.add(rule.clone());
    }

    Ok(rules)
  }

  fn default_rules() -> Result<Vec<DirRule>> {
    Ok(vec![
      DirRule::read_write("box", "./box")?,
      DirRule::read_only("bin")?,
      DirRule::device("dev")?,
      DirRule::read_only("lib")?,
      DirRule::optional("lib64")?,
      DirRule::filesystem("proc", "proc")?,
      DirRule::read_only("usr")?,
    ])
  }

  fn add(&mut self, rule: DirRule) {
    if let Some(existing) = self
      .rules
      .iter_mut()
      .find(|existing| existing.box_path == rule.box_path)
    {
      *existing = rule;
    } else {
      self.rules.push(rule);
    }
  }

  pub fn rules(&self) -> &[DirRule] {
    &self.rules
  }
}

#[cfg(test)]
mod tests {
  use {super::*, assert_matches::assert_matches};

  #[test]
  fn leading_slashes_are_stripped() {
    let rule = DirRule::new("//etc/alternatives", "/etc/alternatives", DirOptions::default())
      .unwrap();

    assert_eq!(rule.box_path(), "etc/alternatives");
  }

  #[test]
  fn empty_box_path_is_rejected() {
    let result = DirRule::new("///", "/etc", DirOptions::default());

    assert_matches!(
      result,
      Err(Error::DirRule(message)) if message.contains("must not be empty")
    );
  }

  #[test]
  fn filesystem_rule_takes_bare_type() {
    assert!(DirRule::filesystem("proc", "proc").is_ok());

    let result = DirRule::new(
      "proc",
      "/proc",
      DirOptions {
        filesystem: true,
        ..Default::default()
      },
    );

    assert_matches!(
      result,
      Err(Error::DirRule(message)) if message.contains("bare filesystem type")
    );
  }

  #[test]
  fn bind_rule_requires_anchored_local_path() {
    let result = DirRule::new("data", "data", DirOptions::default());

    assert_matches!(
      result,
      Err(Error::DirRule(message)) if message.contains("begin with `./`")
    );

    assert!(DirRule::new("data", "./data", DirOptions::default()).is_ok());
  }

  #[test]
  fn parse_bare_box_path() {
    let rule: DirRule = "etc".parse().unwrap();

    assert_eq!(rule.box_path(), "etc");
    assert_eq!(rule.local_path(), "/etc");
    assert_eq!(rule.options(), &DirOptions::default());
  }

  #[test]
  fn parse_with_local_path_and_flags() {
    let rule: DirRule = "data=/srv/data:rw:noexec".parse().unwrap();

    assert_eq!(rule.box_path(), "data");
    assert_eq!(rule.local_path(), "/srv/data");
    assert!(rule.options().read_write);
    assert!(rule.options().no_exec);
    assert!(!rule.options().allow_devices);
  }

  #[test]
  fn parse_filesystem_flag() {
    let rule: DirRule = "sys=sysfs:fs".parse().unwrap();

    assert_eq!(rule.box_path(), "sys");
    assert_eq!(rule.local_path(), "sysfs");
    assert!(rule.options().filesystem);
  }

  #[test]
  fn parse_unknown_flag() {
    let result: Result<DirRule> = "etc:bogus".parse();

    assert_matches!(
      result,
      Err(Error::DirRule(message)) if message.contains("unknown directory rule flag")
    );
  }

  #[test]
  fn defaults_come_first() {
    let rules = DirRules::with_defaults(&[]).unwrap();

    let box_paths: Vec<&str> = rules
      .rules()
      .iter()
      .map(|rule| rule.box_path().as_str())
      .collect();

    assert_eq!(
      box_paths,
      ["box", "bin", "dev", "lib", "lib64", "proc", "usr"]
    );
  }

  #[test]
  fn user_rule_overrides_default_in_place() {
    let user = DirRule::read_write("dev", "/dev").unwrap();

    let rules = DirRules::with_defaults(std::slice::from_ref(&user)).unwrap();

    let dev_position = rules
      .rules()
      .iter()
      .position(|rule| rule.box_path() == "dev")
      .unwrap();

    assert_eq!(dev_position, 2);
    assert_eq!(rules.rules()[dev_position], user);
    assert_eq!(rules.rules().len(), 7);
  }

  #[test]
  fn later_duplicate_wins() {
    let first: DirRule = "data=/srv/a".parse().unwrap();
    let second: DirRule = "data=/srv/b:rw".parse().unwrap();

    let rules = DirRules::with_defaults(&[first, second.clone()]).unwrap();

    let data_rules: Vec<&DirRule> = rules
      .rules()
      .iter()
      .filter(|rule| rule.box_path() == "data")
      .collect();

    assert_eq!(data_rules, [&second]);
  }
}
