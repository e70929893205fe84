use super::*;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Action {
  /// Inherit the variable's value from the parent environment.
  Inherit,
  /// Remove the variable from the final environment block.
  Clear,
  /// Set the variable to the given value.
  Set(String),
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Action::Inherit => write!(f, "inherit"),
      Action::Clear => write!(f, "clear"),
      Action::Set(value) => write!(f, "set({})", value),
    }
  }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Variable {
  pub key: String,
  pub action: Action,
}

impl Variable {
  pub fn new(key: impl Into<String>, action: Action) -> Self {
    Self {
      key: key.into(),
      action,
    }
  }

  pub fn with_set_value(key: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      key: key.into(),
      action: Action::Set(value.into()),
    }
  }
}

impl FromStr for Variable {
  type Err = Error;

  /// Parse `NAME` (inherit), `NAME=` (remove) or `NAME=VAL` (set).
  fn from_str(rule: &str) -> Result<Self> {
    let (key, action) = match rule.split_once('=') {
      None => (rule, Action::Inherit),
      Some((key, "")) => (key, Action::Clear),
      Some((key, value)) => (key, Action::Set(value.into())),
    };

    ensure!(
      !key.is_empty(),
      Error::EnvironmentVariable("variable name must not be empty".into())
    );

    Ok(Self::new(key, action))
  }
}

/// Construct the environment block handed to the executed program.
///
/// Later entries overwrite earlier ones: the optional parent seed first,
/// then defaults, then user rules in order. Variables whose final value
/// is empty are omitted, which is how removal is expressed.
pub fn build_environment(config: &EnvironmentConfig) -> Vec<String> {
  let parent: BTreeMap<String, String> = env::vars().collect();

  build_environment_from(&parent, config)
}

fn build_environment_from(
  parent: &BTreeMap<String, String>,
  config: &EnvironmentConfig,
) -> Vec<String> {
  let mut variables = BTreeMap::new();

  if config.pass_environment {
    variables.extend(parent.clone());
  }

  variables.insert("LIBC_FATAL_STDERR_".into(), "1".into());

  for rule in &config.rules {
    let value = match &rule.action {
      Action::Inherit => parent.get(&rule.key).cloned().unwrap_or_default(),
      Action::Clear => String::new(),
      Action::Set(value) => value.clone(),
    };

    variables.insert(rule.key.clone(), value);
  }

  variables
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .map(|(key, value)| format!("{key}={value}"))
    .collect()
}

#[cfg(test)]
mod tests {
  use {super::*, assert_matches::assert_matches};

  fn parent() -> BTreeMap<String, String> {
    [
      ("HOME".to_string(), "/root".to_string()),
      ("PATH".to_string(), "/usr/bin:/bin".to_string()),
      ("TERM".to_string(), "xterm".to_string()),
    ]
    .into()
  }

  #[test]
  fn parse_rules() {
    assert_eq!(
      "PATH".parse::<Variable>().unwrap(),
      Variable::new("PATH", Action::Inherit)
    );

    assert_eq!(
      "PATH=".parse::<Variable>().unwrap(),
      Variable::new("PATH", Action::Clear)
    );

    assert_eq!(
      "PATH=/bin".parse::<Variable>().unwrap(),
      Variable::with_set_value("PATH", "/bin")
    );
  }

  #[test]
  fn parse_empty_name() {
    assert_matches!(
      "".parse::<Variable>(),
      Err(Error::EnvironmentVariable(message)) if message.contains("must not be empty")
    );

    assert_matches!(
      "=value".parse::<Variable>(),
      Err(Error::EnvironmentVariable(_))
    );
  }

  #[test]
  fn default_block_carries_libc_fatal_stderr() {
    let block = build_environment_from(&parent(), &EnvironmentConfig::default());

    assert_eq!(block, ["LIBC_FATAL_STDERR_=1"]);
  }

  #[test]
  fn pass_environment_seeds_parent() {
    let config = EnvironmentConfig {
      pass_environment: true,
      rules: Vec::new(),
    };

    let block = build_environment_from(&parent(), &config);

    assert!(block.contains(&"HOME=/root".to_string()));
    assert!(block.contains(&"PATH=/usr/bin:/bin".to_string()));
    assert!(block.contains(&"LIBC_FATAL_STDERR_=1".to_string()));
  }

  #[test]
  fn inherit_rule_reads_parent_value() {
    let config = EnvironmentConfig {
      pass_environment: false,
      rules: vec![Variable::new("TERM", Action::Inherit)],
    };

    let block = build_environment_from(&parent(), &config);

    assert!(block.contains(&"TERM=xterm".to_string()));
  }

  #[test]
  fn inherit_rule_with_no_parent_value_is_omitted() {
    let config = EnvironmentConfig {
      pass_environment: false,
      rules: vec![Variable::new("NOPE", Action::Inherit)],
    };

    let block = build_environment_from(&parent(), &config);

    assert!(!block.iter().any(|entry| entry.starts_with("NOPE=")));
  }

  #[test]
  fn clear_rule_removes_seeded_variable() {
    let config = EnvironmentConfig {
      pass_environment: true,
      rules: vec![Variable::new("PATH", Action::Clear)],
    };

    let block = build_environment_from(&parent(), &config);

    assert!(!block.iter().any(|entry| entry.starts_with("PATH=")));
    assert!(block.contains(&"HOME=/root".to_string()));
  }

  #[test]
  fn later_rules_overwrite_earlier_ones() {
    let config = EnvironmentConfig {
      pass_environment: false,
      rules: vec![
        Variable::with_set_value("LANG", "C"),
        Variable::with_set_value("LANG", "en_US.UTF-8"),
      ],
    };

    let block = build_environment_from(&parent(), &config);

    assert!(block.contains(&"LANG=en_US.UTF-8".to_string()));
    assert!(!block.contains(&"LANG=C".to_string()));
  }
}
