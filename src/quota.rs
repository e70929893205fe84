use super::*;

/// Apply the configured disk quota for the sandbox user on the
/// filesystem hosting the current directory.
///
/// Quota installation itself goes through the external quota tool; this
/// module only identifies and sanity-checks the block device.
pub fn apply(quota: &DiskQuota, uid: u32) -> Result {
  if quota.blocks == 0 {
    return Ok(());
  }

  let cwd = env::current_dir()?;

  let mounts = fs::read_to_string("/proc/mounts")
    .map_err(|error| Error::Quota(format!("cannot read /proc/mounts: {error}")))?;

  let device = find_device(&cwd.to_string_lossy(), &mounts).ok_or_else(|| {
    Error::Quota(format!(
      "cannot identify filesystem which contains {}",
      cwd.display()
    ))
  })?;

  info!("quota: mapped path {} to a filesystem on {device}", cwd.display());

  let device_stat = stat(device.as_str())
    .map_err(|error| Error::Quota(format!("cannot identify block device {device}: {error}")))?;

  ensure!(
    device_stat.st_mode & SFlag::S_IFMT.bits() == SFlag::S_IFBLK.bits(),
    Error::Quota(format!("expected {device} to be a block device"))
  );

  let cwd_stat =
    stat(".").map_err(|error| Error::Quota(format!("cannot stat current directory: {error}")))?;

  ensure!(
    cwd_stat.st_dev == device_stat.st_rdev,
    Error::Quota(format!(
      "identified {} as a filesystem on {device}, but it is obviously false",
      cwd.display()
    ))
  );

  let status = Command::new("setquota")
    .arg("-u")
    .arg(uid.to_string())
    .arg(quota.blocks.to_string())
    .arg(quota.blocks.to_string())
    .arg(quota.inodes.to_string())
    .arg(quota.inodes.to_string())
    .arg(&device)
    .status()
    .map_err(|error| Error::Quota(format!("cannot run setquota: {error}")))?;

  ensure!(
    status.success(),
    Error::Quota(format!("setquota failed with {status}"))
  );

  info!(
    "quota: set block quota {} and inode quota {}",
    quota.blocks, quota.inodes
  );

  Ok(())
}

/// Find the `/dev` device whose mount point is the longest prefix of
/// `path`.
fn find_device(path: &str, mounts: &str) -> Option<String> {
  let mut best_len = 0;
  let mut best_device = None;

  for line in mounts.lines() {
    let mut fields = line.split_whitespace();

    let (Some(device), Some(mount_point)) = (fields.next(), fields.next()) else {
      continue;
    };

    if !device.starts_with("/dev") {
      continue;
    }

    let is_prefix = path == mount_point
      || mount_point == "/"
      || path
        .strip_prefix(mount_point)
        .is_some_and(|rest| rest.starts_with('/'));

    if is_prefix && mount_point.len() > best_len {
      best_len = mount_point.len();
      best_device = Some(device.to_string());
    }
  }

  best_device
}
