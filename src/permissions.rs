use super::*;

/// One ACL rule: grant `mode` to the sandbox user on `path`, or revoke
/// all access when `mode` is empty.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Permission {
  path: String,
  mode: String,
}

impl Permission {
  pub fn new(path: impl Into<String>, mode: &str) -> Self {
    Self {
      path: path.into(),
      mode: normalize_mode(mode),
    }
  }

  pub fn path(&self) -> &str {
    &self.path
  }

  pub fn mode(&self) -> &str {
    &self.mode
  }
}

impl FromStr for Permission {
  type Err = Error;

  /// Parse `file[:mode]`; a missing mode means revoke.
  fn from_str(rule: &str) -> Result<Self> {
    let (path, mode) = match rule.split_once(':') {
      Some((path, mode)) => (path, mode),
      None => (rule, ""),
    };

    ensure!(
      !path.is_empty(),
      Error::Permission("permission rule path must not be empty".into())
    );

    Ok(Self::new(path, mode))
  }
}

/// Normalize a mode string to the canonical deduplicated `xwr` order.
fn normalize_mode(mode: &str) -> String {
  let mut normalized = String::new();

  for letter in ['x', 'w', 'r'] {
    if mode.chars().any(|c| c.eq_ignore_ascii_case(&letter)) {
      normalized.push(letter);
    }
  }

  normalized
}

/// Whitelist of files the sandboxed user may touch inside `/box`.
///
/// World access is stripped first, then the rules are handed to the
/// external ACL tool as one batch, in the order given.
#[derive(Debug)]
pub struct FilePermissions {
  rules: Vec<Permission>,
}

impl FilePermissions {
  pub fn new(config: &PermissionConfig) -> Self {
    let mut rules = Vec::new();

    if config.full_over_folder {
      rules.push(Permission::new(".", "rxw"));
      rules.push(Permission::new("*", "rxw"));
    }

    rules.extend(config.rules.iter().cloned());

    Self { rules }
  }

  pub fn apply(&self, uid: u32) -> Result {
    let cwd = env::current_dir()?;

    ensure!(
      cwd == PathBuf::from("/box"),
      Error::Permission(format!(
        "file permissions must be applied in /box, not {}",
        cwd.display()
      ))
    );

    ensure!(geteuid().is_root(), Error::NotRoot);

    // Strip world access from the box directory and its children before
    // granting anything back.
    fs::set_permissions(".", fs::Permissions::from_mode(0o750))?;

    for entry in fs::read_dir(".")? {
      let entry = entry?;
      fs::set_permissions(entry.path(), fs::Permissions::from_mode(0o750))?;
    }

    let arguments = batch(&self.expand_globs()?, uid);

    if arguments.is_empty() {
      return Ok(());
    }

    debug!("setfacl {}", arguments.join(" "));

    let status = Command::new("setfacl")
      .args(&arguments)
      .status()
      .map_err(|error| Error::Permission(format!("cannot run setfacl: {error}")))?;

    ensure!(
      status.success(),
      Error::Permission(format!("setfacl failed with {status}"))
    );

    Ok(())
  }

  /// The ACL tool is invoked without a shell, so `*` must be expanded
  /// here into the immediate children of the current directory.
  fn expand_globs(&self) -> Result<Vec<Permission>> {
    let mut expanded = Vec::new();

    for rule in &self.rules {
      if rule.path == "*" {
        for entry in fs::read_dir(".")? {
          let name = entry?.file_name();
          expanded.push(Permission {
            path: name.to_string_lossy().into_owned(),
            mode: rule.mode.clone(),
          });
        }
      } else {
        expanded.push(rule.clone());
      }
    }

    Ok(expanded)
  }
}

/// Compose the argument batch for one ACL tool invocation.
fn batch(rules: &[Permission], uid: u32) -> Vec<String> {
  let mut arguments = Vec::new();

  for rule in rules {
    if rule.mode.is_empty() {
      arguments.push("-x".into());
      arguments.push(format!("u:{uid}"));
    } else {
      arguments.push("-m".into());
      arguments.push(format!("u:{uid}:{}", rule.mode));
    }

    arguments.push(rule.path.clone());
  }

  arguments
}

#[cfg(test)]
mod tests {
  use {super::*, assert_matches::assert_matches};

  #[test]
  fn mode_normalization() {
    assert_eq!(normalize_mode("rwx"), "xwr");
    assert_eq!(normalize_mode("XWR"), "xwr");
    assert_eq!(normalize_mode("rrr"), "r");
    assert_eq!(normalize_mode("wxrwx"), "xwr");
    assert_eq!(normalize_mode(""), "");
    assert_eq!(normalize_mode("q"), "");
  }

  #[test]
  fn parse_rule_with_mode() {
    let rule: Permission = "data.txt:wr".parse().unwrap();

    assert_eq!(rule.path(), "data.txt");
    assert_eq!(rule.mode(), "wr");
  }

  #[test]
  fn parse_rule_without_mode_revokes() {
    let rule: Permission = "secret.txt".parse().unwrap();

    assert_eq!(rule.path(), "secret.txt");
    assert_eq!(rule.mode(), "");
  }

  #[test]
  fn parse_empty_path() {
    assert_matches!(
      ":rw".parse::<Permission>(),
      Err(Error::Permission(message)) if message.contains("must not be empty")
    );
  }

  #[test]
  fn batch_composition() {
    let rules = [
      Permission::new("input.txt", "r"),
      Permission::new("output.txt", "rw"),
      Permission::new("secret.txt", ""),
    ];

    assert_eq!(
      batch(&rules, 50001),
      [
        "-m",
        "u:50001:r",
        "input.txt",
        "-m",
        "u:50001:wr",
        "output.txt",
        "-x",
        "u:50001",
        "secret.txt",
      ]
    );
  }

  #[test]
  fn full_over_folder_seeds_rules() {
    let permissions = FilePermissions::new(&PermissionConfig {
      full_over_folder: true,
      rules: vec![Permission::new("secret.txt", "")],
    });

    assert_eq!(
      permissions.rules,
      [
        Permission::new(".", "rxw"),
        Permission::new("*", "rxw"),
        Permission::new("secret.txt", ""),
      ]
    );
  }

  #[test]
  fn rules_apply_in_order() {
    let permissions = FilePermissions::new(&PermissionConfig {
      full_over_folder: false,
      rules: vec![
        Permission::new("a", "r"),
        Permission::new("a", ""),
      ],
    });

    let arguments = batch(&permissions.rules, 50000);

    assert_eq!(arguments, ["-m", "u:50000:r", "a", "-x", "u:50000", "a"]);
  }
}
