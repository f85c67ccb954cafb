//! Application context: the one place shared components live.

use crate::config::ServerConfig;
use recordroute_engines::{
    EmbeddingEngine, InferenceClient, SttEngine, SubprocessSttEngine, SummaryEngine,
};
use recordroute_events::ProgressBus;
use recordroute_history::HistoryStore;
use recordroute_jobs::JobRegistry;
use recordroute_storage::DataLayout;
use recordroute_vector::VectorIndex;
use recordroute_workflow::{Scheduler, WorkflowSettings};
use std::sync::Arc;
use tokio::sync::watch;

/// Everything a handler can reach, injected through axum state. There is no
/// other shared mutable state in the process.
pub struct AppContext {
    pub config: ServerConfig,
    pub layout: DataLayout,
    pub history: Arc<HistoryStore>,
    pub vector: Arc<VectorIndex>,
    pub bus: ProgressBus,
    pub registry: Arc<JobRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub embedder: Arc<dyn EmbeddingEngine>,
    pub inference: Arc<InferenceClient>,
    shutdown_tx: watch::Sender<bool>,
}

pub type SharedContext = Arc<AppContext>;

impl AppContext {
    /// Wire the full production component graph under one data root.
    pub fn build(config: ServerConfig, layout: DataLayout) -> anyhow::Result<SharedContext> {
        let inference = Arc::new(InferenceClient::new(config.inference.clone()).map_err(
            |e| anyhow::anyhow!("failed to build inference client: {e}"),
        )?);
        let stt: Arc<dyn SttEngine> = Arc::new(SubprocessSttEngine::new(
            config.stt.command.clone(),
            config.stt.model.clone(),
            config.stt.language.clone(),
        ));
        Self::assemble(
            config,
            layout,
            stt,
            Arc::clone(&inference) as Arc<dyn EmbeddingEngine>,
            Arc::clone(&inference) as Arc<dyn SummaryEngine>,
            inference,
        )
    }

    /// Wire the graph with caller-provided engines. Tests inject mocks here.
    pub fn assemble(
        config: ServerConfig,
        layout: DataLayout,
        stt: Arc<dyn SttEngine>,
        embedder: Arc<dyn EmbeddingEngine>,
        summarizer: Arc<dyn SummaryEngine>,
        inference: Arc<InferenceClient>,
    ) -> anyhow::Result<SharedContext> {
        let history = Arc::new(HistoryStore::open(layout.clone())?);
        let vector = Arc::new(VectorIndex::open(&layout)?);
        let bus = ProgressBus::new();
        let registry = Arc::new(JobRegistry::new());

        // Crash GC: collect directories no record references anymore.
        let records = history.list();
        let known_ids: Vec<&str> = records.iter().map(|r| r.record_id.as_str()).collect();
        let known_uploads: Vec<&str> = records
            .iter()
            .filter_map(|r| r.upload_dir_name())
            .collect();
        layout.sweep_orphans(known_ids.iter().copied(), known_uploads.iter().copied())?;

        let scheduler = Arc::new(Scheduler::new(
            layout.clone(),
            Arc::clone(&history),
            Arc::clone(&vector),
            bus.clone(),
            Arc::clone(&registry),
            stt,
            Arc::clone(&embedder),
            summarizer,
            WorkflowSettings::default(),
        ));

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Arc::new(AppContext {
            config,
            layout,
            history,
            vector,
            bus,
            registry,
            scheduler,
            embedder,
            inference,
            shutdown_tx,
        }))
    }

    /// Ask the process to stop accepting work and drain.
    pub fn request_shutdown(&self) {
        self.registry.cancel_all();
        let _ = self.shutdown_tx.send(true);
    }

    /// Future resolving when shutdown has been requested.
    pub fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown_tx.subscribe();
        async move {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}
