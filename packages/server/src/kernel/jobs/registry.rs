//! Processor registry and the worker pool built from it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::dispatch::DispatchBackend;
use super::job::AssetType;
use super::worker::{AssetProcessor, Worker, WorkerConfig};
use crate::kernel::stages::ProcessingReporter;

/// Maps each asset type to the processor that handles it.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<AssetType, Arc<dyn AssetProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under its own asset type. A re-registration
    /// replaces the previous processor with a warning.
    pub fn register(&mut self, processor: Arc<dyn AssetProcessor>) {
        let asset_type = processor.asset_type();
        if self.processors.insert(asset_type, processor).is_some() {
            warn!(asset_type = %asset_type, "processor re-registered, replacing previous");
        }
    }

    pub fn get(&self, asset_type: AssetType) -> Option<Arc<dyn AssetProcessor>> {
        self.processors.get(&asset_type).cloned()
    }

    pub fn asset_types(&self) -> Vec<AssetType> {
        self.processors.keys().copied().collect()
    }
}

/// One worker loop per registered processor, all sharing the backend and
/// reporter.
pub struct WorkerPool;

impl WorkerPool {
    pub fn spawn(
        registry: &ProcessorRegistry,
        backend: Arc<dyn DispatchBackend>,
        reporter: Arc<ProcessingReporter>,
        base_config: &WorkerConfig,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        registry
            .processors
            .values()
            .map(|processor| {
                let config = WorkerConfig {
                    worker_id: format!("{}-{}", base_config.worker_id, processor.asset_type()),
                    ..base_config.clone()
                };
                let worker = Arc::new(Worker::new(
                    Arc::clone(&backend),
                    Arc::clone(processor),
                    Arc::clone(&reporter),
                    config,
                ));
                tokio::spawn(worker.run(shutdown.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::error::ProcessingError;
    use crate::kernel::jobs::worker::JobContext;

    struct NoopProcessor(AssetType);

    #[async_trait::async_trait]
    impl AssetProcessor for NoopProcessor {
        fn asset_type(&self) -> AssetType {
            self.0
        }

        async fn process(&self, _ctx: JobContext) -> Result<(), ProcessingError> {
            Ok(())
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(NoopProcessor(AssetType::Photo)));
        registry.register(Arc::new(NoopProcessor(AssetType::Note)));

        assert!(registry.get(AssetType::Photo).is_some());
        assert!(registry.get(AssetType::Bookmark).is_none());
        assert_eq!(registry.asset_types().len(), 2);
    }

    #[test]
    fn re_registration_replaces() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(NoopProcessor(AssetType::Photo)));
        registry.register(Arc::new(NoopProcessor(AssetType::Photo)));
        assert_eq!(registry.asset_types().len(), 1);
    }
}
