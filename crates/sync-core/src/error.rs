/// Error vocabulary shared by the replication engine.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Configuration rejected at startup
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Foreign keys form a cycle; carries the cycle path
    #[error("Foreign key cycle between tables: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// Table missing from the source catalog
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Target table is absent and table creation is disabled
    #[error("Target table '{0}' does not exist")]
    MissingTargetTable(String),

    /// Audit record cannot be turned into a target statement
    #[error("Cannot apply audit record {id}: {reason}")]
    MalformedRecord { id: i64, reason: String },

    /// Daemon exceeded its resident memory ceiling
    #[error("Memory limit exceeded: {used_mb} MiB used, limit {limit_mb} MiB")]
    MemoryLimitExceeded { used_mb: u64, limit_mb: u64 },
}
