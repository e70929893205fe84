use super::*;

/// Assembles the sandbox root inside the child's fresh mount namespace.
///
/// Must run with the sandbox directory as the current directory; after
/// `apply` returns, the process is chrooted with `/box` as its working
/// directory.
#[derive(Debug)]
pub struct MountPlan {
  rules: DirRules,
}

impl MountPlan {
  pub fn new(user_rules: &[DirRule]) -> Result<Self> {
    Ok(Self {
      rules: DirRules::with_defaults(user_rules)?,
    })
  }

  pub fn apply(&self) -> Result {
    Utf8PathBuf::from("root").create(0o750)?;

    // Ensure all mounts are private, not shared: our mounts must not
    // appear outside of this namespace (systemd mounts filesystems
    // shared by default).
    mount(
      None::<&str>,
      "/",
      None::<&str>,
      MsFlags::MS_REC | MsFlags::MS_PRIVATE,
      None::<&str>,
    )
    .map_err(|error| Error::Mount(format!("cannot privatize mounts: {error}")))?;

    mount(
      Some("none"),
      "root",
      Some("tmpfs"),
      MsFlags::empty(),
      Some("mode=755"),
    )
    .map_err(|error| Error::Mount(format!("cannot mount root ramdisk: {error}")))?;

    for rule in self.rules.rules() {
      self.apply_rule(rule)?;
    }

    chroot("root").map_err(|error| Error::Mount(format!("chroot failed: {error}")))?;

    chdir("/box").map_err(|error| Error::Mount(format!("cannot change directory: {error}")))?;

    let tmp = Utf8PathBuf::from("/tmp");
    tmp.create(0o777)?;

    Ok(())
  }

  fn apply_rule(&self, rule: &DirRule) -> Result {
    let local_path = rule.local_path();
    let box_path = rule.box_path();
    let options = rule.options();

    if local_path.as_str().is_empty() {
      debug!("not binding anything on {box_path}");
      return Ok(());
    }

    if options.maybe && !local_path.is_dir() {
      debug!("not binding {local_path} on {box_path} (does not exist)");
      return Ok(());
    }

    let target = Utf8PathBuf::from("root").join(box_path);
    target.create(0o755)?;

    let mut flags = MsFlags::empty();

    if !options.read_write {
      flags |= MsFlags::MS_RDONLY;
    }

    if options.no_exec {
      flags |= MsFlags::MS_NOEXEC;
    }

    if !options.allow_devices {
      flags |= MsFlags::MS_NODEV;
    }

    if options.filesystem {
      debug!("mounting {local_path} on {box_path} (flags {flags:?})");
      mount(
        Some("none"),
        target.as_std_path(),
        Some(local_path.as_str()),
        flags,
        None::<&str>,
      )
      .map_err(|error| {
        Error::Mount(format!("cannot mount {local_path} on {box_path}: {error}"))
      })?;
    } else {
      flags |= MsFlags::MS_BIND | MsFlags::MS_NOSUID;
      debug!("binding {local_path} on {box_path} (flags {flags:?})");
      // The kernel ignores most flags on the initial bind; the remount
      // carries the intended ones.
      mount(
        Some(local_path.as_std_path()),
        target.as_std_path(),
        None::<&str>,
        flags,
        None::<&str>,
      )
      .and_then(|()| {
        mount(
          Some(local_path.as_std_path()),
          target.as_std_path(),
          None::<&str>,
          MsFlags::MS_REMOUNT | flags,
          None::<&str>,
        )
      })
      .map_err(|error| {
        Error::Mount(format!("cannot bind {local_path} on {box_path}: {error}"))
      })?;
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plan_carries_seeded_rules() {
    let plan = MountPlan::new(&[]).unwrap();

    assert_eq!(plan.rules.rules().len(), 7);
    assert_eq!(plan.rules.rules()[0].box_path(), "box");
  }

  #[test]
  fn plan_applies_user_overrides() {
    let user: DirRule = "usr:noexec".parse().unwrap();

    let plan = MountPlan::new(&[user]).unwrap();

    let usr = plan
      .rules
      .rules()
      .iter()
      .find(|rule| rule.box_path() == "usr")
      .unwrap();

    assert!(usr.options().no_exec);
  }
}
