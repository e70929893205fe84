use super::*;

pub trait System {
  fn geteuid(&self) -> Uid;
  fn umask(&self, mask: FileMode) -> FileMode;
}

pub struct MaterialSystem;

impl System for MaterialSystem {
  fn geteuid(&self) -> Uid {
    geteuid()
  }

  fn umask(&self, mask: FileMode) -> FileMode {
    umask(mask)
  }
}
