//! Checkpoint configuration
//!
//! The partition count of the running process and how strictly a reader
//! treats a checkpoint written under a different one.

/// Checkpoint configuration shared by writers and readers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Number of execution partitions in this process
    pub partition_count: u32,
    /// Fail header decode when the stored partition count differs
    ///
    /// When false the mismatch is logged and restore continues.
    pub error_on_partition_mismatch: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        CheckpointConfig {
            partition_count: 1,
            error_on_partition_mismatch: true,
        }
    }
}

impl CheckpointConfig {
    /// Config for a process with `partition_count` partitions
    pub fn for_partitions(partition_count: u32) -> Self {
        CheckpointConfig {
            partition_count,
            ..Default::default()
        }
    }

    /// Set the partition count
    pub fn with_partition_count(mut self, partition_count: u32) -> Self {
        self.partition_count = partition_count;
        self
    }

    /// Set whether a partition count mismatch is fatal
    pub fn with_error_on_partition_mismatch(mut self, error: bool) -> Self {
        self.error_on_partition_mismatch = error;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partition_count == 0 {
            return Err(ConfigError::ZeroPartitions);
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Partition count must be at least one
    #[error("partition_count must be at least 1")]
    ZeroPartitions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CheckpointConfig::default();
        assert_eq!(config.partition_count, 1);
        assert!(config.error_on_partition_mismatch);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = CheckpointConfig::default()
            .with_partition_count(8)
            .with_error_on_partition_mismatch(false);

        assert_eq!(config.partition_count, 8);
        assert!(!config.error_on_partition_mismatch);
    }

    #[test]
    fn test_for_partitions_keeps_strict_default() {
        let config = CheckpointConfig::for_partitions(4);
        assert_eq!(config.partition_count, 4);
        assert!(config.error_on_partition_mismatch);
    }

    #[test]
    fn test_zero_partitions_invalid() {
        let config = CheckpointConfig::for_partitions(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroPartitions));
    }
}
