#![forbid(unsafe_code)]

//! Process-level safety checks shared by the binaries.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Refuses to start when the effective user is root. The mirror writes into
/// its media and database directories with whatever user it runs as, so a
/// root launch would leave root-owned files behind for later runs to trip
/// over.
pub fn refuse_root(binary: &str) -> Result<()> {
    refuse_root_for(Uid::effective(), binary)
}

fn refuse_root_for(uid: Uid, binary: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{binary} refuses to run as root; start it as the service user instead");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuse_root_accepts_regular_user() {
        assert!(refuse_root_for(Uid::from_raw(1234), "backend").is_ok());
    }

    #[test]
    fn refuse_root_rejects_uid_zero() {
        let err = refuse_root_for(Uid::from_raw(0), "backend").unwrap_err();
        assert!(err.to_string().contains("refuses to run as root"));
    }
}
