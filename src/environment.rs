use super::*;

/// Host-side layout shared by all sandboxes.
///
/// Operators running several judge hosts must assign non-overlapping
/// uid/gid/cgroup ranges here; disjoint ranges are what keeps concurrent
/// sandboxes from colliding.
#[derive(Clone, Debug)]
pub struct Environment {
  /// All sandbox directories are created under this directory.
  pub base_dir: Utf8PathBuf,

  /// First control group ID to use for sandboxes.
  pub base_cgid: u32,

  /// First GID to use for sandboxes.
  pub first_gid: u32,

  /// First UID to use for sandboxes.
  pub first_uid: u32,

  /// Number of process slots per sandbox; `process_id` must stay below
  /// this.
  pub max_per_box: u32,
}

impl Default for Environment {
  fn default() -> Self {
    Self {
      base_dir: Utf8PathBuf::from("/tmp/box"),
      base_cgid: 1000,
      first_gid: 50000,
      first_uid: 50000,
      max_per_box: 10,
    }
  }
}

/// Identity of one sandbox slot, derived from `box_id` and `process_id`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Credentials {
  /// Control group ID (`base_cgid + max_per_box * box_id + process_id`).
  pub cgid: u32,
  /// Group ID the sandboxed process runs as.
  pub gid: u32,
  /// User ID the sandboxed process runs as.
  pub uid: u32,
}

impl Environment {
  pub fn credentials(&self, box_id: u32, process_id: u32) -> Result<Credentials> {
    ensure!(
      process_id < self.max_per_box,
      Error::ProcessIdOutOfRange(process_id, self.max_per_box - 1)
    );

    let slot = self.max_per_box * box_id + process_id;

    Ok(Credentials {
      cgid: self.base_cgid + slot,
      gid: self.first_gid + slot,
      uid: self.first_uid + slot,
    })
  }

  pub fn box_dir(&self, box_id: u32) -> Utf8PathBuf {
    self.base_dir.join(box_id.to_string())
  }
}
