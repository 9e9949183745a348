//! Startup priming: choose between the live directory and its shadow.

use crate::error::CoreResult;
use crate::recovery::shadow::ShadowCopy;
use std::fmt;
use std::fs;
use std::path::Path;

/// What [`prime`] did to the live directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimeOutcome {
    /// Neither directory existed; a fresh live directory was created.
    Initialized,
    /// The live directory was used without changes.
    OpenedAsIs,
    /// The live directory was replaced by a copy of the shadow.
    RestoredFromShadow,
}

impl fmt::Display for PrimeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initialized => "initialized",
            Self::OpenedAsIs => "opened as is",
            Self::RestoredFromShadow => "restored from shadow",
        })
    }
}

/// Prepares the live store directory before recovery runs.
///
/// With shadow copies enabled, an existing shadow is the trusted snapshot of
/// the last checkpoint and always wins over the live directory, which may
/// have been mid-flush when the process died:
///
/// | live    | shadow  | action                       |
/// |---------|---------|------------------------------|
/// | missing | missing | create live (and empty shadow) |
/// | missing | present | copy shadow to live          |
/// | present | missing | open live as is              |
/// | present | present | replace live with shadow     |
///
/// With shadow copies disabled, a stale shadow left by an earlier run is
/// removed and the live directory is used as is.
///
/// # Errors
///
/// Returns an I/O error, or `InvalidLayout` if the live path has no name.
pub fn prime(live: &Path, shadow_enabled: bool) -> CoreResult<PrimeOutcome> {
    let pair = ShadowCopy::for_live(live)?;

    if !shadow_enabled {
        if pair.exists() {
            tracing::info!(shadow = %pair.shadow().display(), "removing unused shadow copy");
            pair.discard()?;
        }
        if live.exists() {
            return Ok(PrimeOutcome::OpenedAsIs);
        }
        fs::create_dir_all(live)?;
        return Ok(PrimeOutcome::Initialized);
    }

    pair.clean_leftovers()?;

    let outcome = match (live.exists(), pair.exists()) {
        (false, false) => {
            fs::create_dir_all(live)?;
            pair.publish()?;
            PrimeOutcome::Initialized
        }
        (true, false) => PrimeOutcome::OpenedAsIs,
        (_, true) => {
            tracing::warn!(
                live = %live.display(),
                shadow = %pair.shadow().display(),
                "restoring live directory from shadow copy"
            );
            pair.restore()?;
            PrimeOutcome::RestoredFromShadow
        }
    };

    tracing::debug!(live = %live.display(), %outcome, "primed store directory");
    Ok(outcome)
}
