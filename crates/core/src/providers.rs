//! Process-wide provider holder.
//!
//! The engine and services take their providers by injection. This holder
//! exists for call sites that cannot thread them through; concurrent
//! readers see whichever set was initialized last.

use crate::llm::{Embedder, Generator, Retriever};
use std::sync::{Arc, RwLock};

/// The collaborator capabilities available to the process.
#[derive(Clone)]
pub struct ProviderSet {
    pub generator: Arc<dyn Generator>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub retriever: Option<Arc<dyn Retriever>>,
}

impl ProviderSet {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            embedder: None,
            retriever: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("generator", &self.generator.name())
            .field("embedder", &self.embedder.is_some())
            .field("retriever", &self.retriever.is_some())
            .finish()
    }
}

static PROVIDERS: RwLock<Option<Arc<ProviderSet>>> = RwLock::new(None);

/// Install `set` as the process-wide providers, replacing any previous set.
pub fn initialize(set: ProviderSet) {
    let mut slot = PROVIDERS.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    tracing::debug!(generator = set.generator.name(), "Initialized process-wide providers");
    *slot = Some(Arc::new(set));
}

/// The current provider set, if initialized.
pub fn current() -> Option<Arc<ProviderSet>> {
    PROVIDERS
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// Drop the process-wide providers. Callers holding an `Arc` keep theirs.
pub fn shutdown() {
    let mut slot = PROVIDERS.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = None;
}
