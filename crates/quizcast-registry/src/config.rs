/// Tuning for a session's connection registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Capacity of each connection's outbound queue. A client that falls
    /// this many events behind is evicted and must resync.
    ///
    /// Default: 256.
    pub channel_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}
