//! Database configuration.

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether every log append is followed by a forced sync.
    ///
    /// Turning this off removes the per-record durability barrier and is
    /// only meant for throwaway databases.
    pub sync_on_write: bool,

    /// Whether checkpoints maintain the `-recovery` shadow directory.
    pub shadow_copy: bool,

    /// Whether opening takes a checkpoint after recovery closed any loser
    /// transaction.
    ///
    /// Recovery logs its own undo, so this only moves the next replay start
    /// past the undone work.
    pub checkpoint_after_recovery: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: true,
            shadow_copy: true,
            checkpoint_after_recovery: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the log after every append.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets whether checkpoints maintain the shadow directory.
    #[must_use]
    pub const fn shadow_copy(mut self, value: bool) -> Self {
        self.shadow_copy = value;
        self
    }

    /// Sets whether to checkpoint after a recovery that undid work.
    #[must_use]
    pub const fn checkpoint_after_recovery(mut self, value: bool) -> Self {
        self.checkpoint_after_recovery = value;
        self
    }
}
