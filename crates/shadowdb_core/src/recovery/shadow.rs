//! Shadow copy of the live store directory.
//!
//! After every checkpoint flush the live directory is copied to a sibling
//! `<live>-recovery` directory. The copy is staged under `<shadow>.tmp`,
//! synced, and then swapped in by rename, so the shadow on disk is always a
//! complete snapshot of some checkpoint:
//!
//! ```text
//! data/                 live, may be mid-write after a crash
//! data-recovery/        last published snapshot
//! data-recovery.tmp/    snapshot being staged
//! data-recovery.old/    previous snapshot during the swap
//! ```

use crate::dir::sync_directory;
use crate::error::{CoreError, CoreResult};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

const SHADOW_SUFFIX: &str = "-recovery";
const STAGING_SUFFIX: &str = ".tmp";
const RETIRED_SUFFIX: &str = ".old";

/// The live/shadow directory pair.
#[derive(Debug, Clone)]
pub struct ShadowCopy {
    live: PathBuf,
    shadow: PathBuf,
    staging: PathBuf,
    retired: PathBuf,
}

impl ShadowCopy {
    /// Derives the shadow paths for a live directory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLayout` if `live` has no final path component.
    pub fn for_live(live: &Path) -> CoreResult<Self> {
        let name = live
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                CoreError::invalid_layout(format!(
                    "live directory has no usable name: {}",
                    live.display()
                ))
            })?;
        let shadow_name = format!("{name}{SHADOW_SUFFIX}");

        Ok(Self {
            live: live.to_path_buf(),
            shadow: live.with_file_name(&shadow_name),
            staging: live.with_file_name(format!("{shadow_name}{STAGING_SUFFIX}")),
            retired: live.with_file_name(format!("{shadow_name}{RETIRED_SUFFIX}")),
        })
    }

    /// Returns the live directory.
    #[must_use]
    pub fn live(&self) -> &Path {
        &self.live
    }

    /// Returns the shadow directory.
    #[must_use]
    pub fn shadow(&self) -> &Path {
        &self.shadow
    }

    /// Returns true if a published shadow exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.shadow.is_dir()
    }

    /// Copies the live directory into a new shadow and swaps it in.
    ///
    /// The previous shadow, if any, stays in place until the final rename.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if copying or renaming fails. The previous
    /// shadow is then still valid, possibly under its retired name, which
    /// [`clean_leftovers`](Self::clean_leftovers) puts back.
    pub fn publish(&self) -> CoreResult<()> {
        if self.staging.exists() {
            fs::remove_dir_all(&self.staging)?;
        }
        copy_dir_recursive(&self.live, &self.staging)?;

        let had_shadow = self.exists();
        if had_shadow {
            if self.retired.exists() {
                fs::remove_dir_all(&self.retired)?;
            }
            fs::rename(&self.shadow, &self.retired)?;
        }
        fs::rename(&self.staging, &self.shadow)?;
        self.sync_parent()?;

        if had_shadow {
            fs::remove_dir_all(&self.retired)?;
        }
        tracing::debug!(shadow = %self.shadow.display(), "published shadow copy");
        Ok(())
    }

    /// Replaces the live directory with a copy of the shadow.
    ///
    /// # Errors
    ///
    /// Returns an I/O error. A partially restored live directory is simply
    /// restored again on the next attempt.
    pub fn restore(&self) -> CoreResult<()> {
        if self.live.exists() {
            fs::remove_dir_all(&self.live)?;
        }
        copy_dir_recursive(&self.shadow, &self.live)?;
        self.sync_parent()
    }

    /// Removes the shadow and any transient directories.
    ///
    /// # Errors
    ///
    /// Returns an I/O error.
    pub fn discard(&self) -> CoreResult<()> {
        for path in [&self.staging, &self.retired, &self.shadow] {
            if path.exists() {
                fs::remove_dir_all(path)?;
            }
        }
        self.sync_parent()
    }

    /// Cleans up after a publish that was interrupted by a crash.
    ///
    /// A staging directory is always incomplete and is removed. A retired
    /// shadow is put back if the swap never completed, and removed if it did.
    ///
    /// # Errors
    ///
    /// Returns an I/O error.
    pub fn clean_leftovers(&self) -> CoreResult<()> {
        if self.staging.exists() {
            fs::remove_dir_all(&self.staging)?;
        }
        if self.retired.exists() {
            if self.exists() {
                fs::remove_dir_all(&self.retired)?;
            } else {
                tracing::warn!(
                    shadow = %self.shadow.display(),
                    "reinstating shadow copy from an interrupted checkpoint"
                );
                fs::rename(&self.retired, &self.shadow)?;
            }
        }
        self.sync_parent()
    }

    fn sync_parent(&self) -> CoreResult<()> {
        match self.live.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => sync_directory(parent),
            _ => Ok(()),
        }
    }
}

/// Copies `src` onto `dst` recursively, syncing every file and directory.
///
/// Entries that are neither files nor directories are skipped.
pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> CoreResult<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else if src_path.is_file() {
            fs::copy(&src_path, &dst_path)?;
            File::open(&dst_path)?.sync_all()?;
        }
    }

    sync_directory(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn paths_are_siblings() {
        let shadow = ShadowCopy::for_live(Path::new("/db/data")).unwrap();
        assert_eq!(shadow.live(), Path::new("/db/data"));
        assert_eq!(shadow.shadow(), Path::new("/db/data-recovery"));
        assert_eq!(shadow.staging, Path::new("/db/data-recovery.tmp"));
        assert_eq!(shadow.retired, Path::new("/db/data-recovery.old"));
    }

    #[test]
    fn root_has_no_shadow() {
        assert!(matches!(
            ShadowCopy::for_live(Path::new("/")),
            Err(CoreError::InvalidLayout { .. })
        ));
    }

    #[test]
    fn copy_is_recursive() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        write(&src.join("a.tbl"), "a");
        write(&src.join("nested/b.tbl"), "b");

        let dst = temp.path().join("dst");
        copy_dir_recursive(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("a.tbl")).unwrap(), "a");
        assert_eq!(fs::read_to_string(dst.join("nested/b.tbl")).unwrap(), "b");
    }

    #[test]
    fn publish_replaces_previous_shadow() {
        let temp = tempdir().unwrap();
        let live = temp.path().join("data");
        let pair = ShadowCopy::for_live(&live).unwrap();

        write(&live.join("t.tbl"), "v1");
        write(&live.join("gone.tbl"), "x");
        pair.publish().unwrap();
        assert_eq!(fs::read_to_string(pair.shadow().join("t.tbl")).unwrap(), "v1");

        write(&live.join("t.tbl"), "v2");
        fs::remove_file(live.join("gone.tbl")).unwrap();
        pair.publish().unwrap();

        assert_eq!(fs::read_to_string(pair.shadow().join("t.tbl")).unwrap(), "v2");
        assert!(!pair.shadow().join("gone.tbl").exists());
        assert!(!pair.staging.exists());
        assert!(!pair.retired.exists());
    }

    #[test]
    fn restore_discards_live_contents() {
        let temp = tempdir().unwrap();
        let live = temp.path().join("data");
        let pair = ShadowCopy::for_live(&live).unwrap();

        write(&live.join("t.tbl"), "good");
        pair.publish().unwrap();
        write(&live.join("t.tbl"), "half-written");
        write(&live.join("extra.tbl"), "junk");

        pair.restore().unwrap();
        assert_eq!(fs::read_to_string(live.join("t.tbl")).unwrap(), "good");
        assert!(!live.join("extra.tbl").exists());
    }

    #[test]
    fn leftovers_of_interrupted_swap_are_resolved() {
        let temp = tempdir().unwrap();
        let live = temp.path().join("data");
        let pair = ShadowCopy::for_live(&live).unwrap();

        // Crash after the old shadow was retired but before the new one moved in.
        write(&pair.retired.join("t.tbl"), "previous");
        write(&pair.staging.join("t.tbl"), "incomplete");

        pair.clean_leftovers().unwrap();
        assert!(!pair.staging.exists());
        assert!(!pair.retired.exists());
        assert_eq!(
            fs::read_to_string(pair.shadow().join("t.tbl")).unwrap(),
            "previous"
        );

        // Crash after the swap but before the retired copy was removed.
        write(&pair.retired.join("t.tbl"), "older");
        pair.clean_leftovers().unwrap();
        assert!(!pair.retired.exists());
        assert_eq!(
            fs::read_to_string(pair.shadow().join("t.tbl")).unwrap(),
            "previous"
        );
    }

    #[test]
    fn discard_removes_everything_but_live() {
        let temp = tempdir().unwrap();
        let live = temp.path().join("data");
        let pair = ShadowCopy::for_live(&live).unwrap();
        write(&live.join("t.tbl"), "v");
        pair.publish().unwrap();

        pair.discard().unwrap();
        assert!(!pair.exists());
        assert!(live.join("t.tbl").exists());
    }
}
