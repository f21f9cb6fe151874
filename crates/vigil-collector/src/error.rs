/// Failures while executing a user-mapped command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Mapper disabled or the item key has no mapping. Callers fall through
    /// to the next value source.
    #[error("no command mapped for item key")]
    NotMapped,

    /// The surrounding context was cancelled while waiting or executing.
    #[error("command execution cancelled")]
    Cancelled,

    /// The attempt exceeded its per-command timeout.
    #[error("command timed out after {0}s")]
    Timeout(u64),

    #[error("command exited with status {status}: {stderr}")]
    NonZeroExit { status: i32, stderr: String },

    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    /// The query returned no rows or no columns.
    #[error("query produced no result")]
    EmptyResult,
}

/// Failures while loading the command-mapping file.
#[derive(Debug, thiserror::Error)]
pub enum MapperLoadError {
    #[error("failed to read command map: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse command map: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Failures while resolving an item key to a value.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Command(#[from] CommandError),

    /// No source knows this key. Logged once per item by the scheduler; the
    /// task keeps its cadence so a later mapping reload can succeed.
    #[error("no value source for item key '{0}'")]
    UnknownKey(String),
}
