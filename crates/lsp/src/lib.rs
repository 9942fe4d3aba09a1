pub mod capabilities;
pub mod diagnostics;

use scanlight_core::analysis::{
    AnalysisBackend, AnalysisExecutor, AnalysisScheduler, AnalysisTaskRegistry,
    FileExclusionFilter,
};
use scanlight_core::config::SchedulerConfig;
use scanlight_core::document::{Document, OpenDocuments};
use scanlight_core::findings::FindingCaches;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

pub struct LspServer {
    client: Client,
    executor: Arc<AnalysisExecutor>,
    registry: Arc<AnalysisTaskRegistry>,
    exclusions: Arc<dyn FileExclusionFilter>,
    pub documents: Arc<OpenDocuments>,
    pub caches: Arc<FindingCaches>,
    scheduler: Arc<RwLock<Option<Arc<AnalysisScheduler>>>>,
    config: RwLock<SchedulerConfig>,
    cancel_token: CancellationToken,
}

impl LspServer {
    pub fn new(
        client: Client,
        backend: Arc<dyn AnalysisBackend>,
        exclusions: Arc<dyn FileExclusionFilter>,
    ) -> Self {
        let registry = AnalysisTaskRegistry::new();
        let executor = AnalysisExecutor::new(backend, registry.clone());
        Self {
            client,
            executor,
            registry,
            exclusions,
            documents: Arc::new(OpenDocuments::new()),
            caches: FindingCaches::new(),
            scheduler: Arc::new(RwLock::new(None)),
            config: RwLock::new(SchedulerConfig::default()),
            cancel_token: CancellationToken::new(),
        }
    }

    /// The registry the backend transport routes `didRaiseFinding` /
    /// `didFinishAnalysis` notifications through.
    pub fn registry(&self) -> &Arc<AnalysisTaskRegistry> {
        &self.registry
    }

    /// Workspace-level trigger (classpath changed, server mode changed):
    /// re-analyze every open document matching `predicate`.
    pub async fn analyze_open_files_matching<P>(&self, reason: &str, predicate: P)
    where
        P: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        let scheduler = self.scheduler.read().await;
        if let Some(scheduler) = scheduler.as_ref() {
            scheduler.analyze_open_files_matching(reason, predicate);
        }
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for LspServer {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let config = SchedulerConfig::from_initialization_options(params.initialization_options);

        {
            let scheduler = AnalysisScheduler::new(
                self.executor.clone(),
                self.documents.clone(),
                self.caches.clone(),
                self.exclusions.clone(),
                config.clone(),
            );
            let mut slot = self.scheduler.write().await;
            *slot = Some(Arc::new(scheduler));
        }
        *self.config.write().await = config;

        diagnostics::spawn_publisher(
            self.client.clone(),
            self.caches.clone(),
            self.cancel_token.clone(),
        );

        Ok(InitializeResult {
            server_info: Some(ServerInfo {
                name: "Scanlight".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            capabilities: capabilities::server_capabilities(),
        })
    }

    async fn initialized(&self, _params: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "Scanlight analysis ready")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        self.cancel_token.cancel();
        let scheduler = self.scheduler.read().await;
        if let Some(scheduler) = scheduler.as_ref() {
            scheduler.shutdown();
        }
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        self.documents.open(Document::new(
            uri.clone(),
            params.text_document.text,
            params.text_document.version,
        ));

        let scheduler = self.scheduler.read().await;
        if let Some(scheduler) = scheduler.as_ref() {
            scheduler.did_open(uri);
        }
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        // Full sync: the last change carries the complete text.
        let Some(change) = params.content_changes.into_iter().next_back() else {
            return;
        };
        if self.documents.update(&uri, change.text, version).is_none() {
            return;
        }

        let scheduler = self.scheduler.read().await;
        if let Some(scheduler) = scheduler.as_ref() {
            scheduler.did_change(uri, version);
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;
        let Some(document) = self.documents.get(&uri) else {
            return;
        };
        let fetch_server_findings = self.config.read().await.fetch_server_findings_on_save;

        let scheduler = self.scheduler.read().await;
        if let Some(scheduler) = scheduler.as_ref() {
            scheduler.did_save(uri, document.version, fetch_server_findings);
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.documents.close(&uri);
        // Eviction notifies the publisher, which clears the editor's
        // diagnostics for the file.
        self.caches.evict(&uri);
    }
}

pub async fn run_server(
    backend: Arc<dyn AnalysisBackend>,
    exclusions: Arc<dyn FileExclusionFilter>,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = tower_lsp::LspService::new(move |client| {
        LspServer::new(client, backend.clone(), exclusions.clone())
    });
    tower_lsp::Server::new(stdin, stdout, socket)
        .serve(service)
        .await;

    Ok(())
}
