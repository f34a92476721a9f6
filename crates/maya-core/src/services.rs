use std::sync::Arc;

use maya_provider::{
    EvaluationService, FeedbackStore, GenerationService, HttpBackend, PromptStore,
    ReflectionService,
};

/// Handles to every external collaborator.
#[derive(Clone)]
pub struct Services {
    pub generation: Arc<dyn GenerationService>,
    pub evaluation: Arc<dyn EvaluationService>,
    pub reflection: Arc<dyn ReflectionService>,
    pub feedback: Arc<dyn FeedbackStore>,
    pub prompts: Arc<dyn PromptStore>,
}

impl Services {
    /// Route every service through one HTTP backend.
    pub fn from_backend(backend: HttpBackend) -> Self {
        let backend = Arc::new(backend);
        Self {
            generation: backend.clone(),
            evaluation: backend.clone(),
            reflection: backend.clone(),
            feedback: backend.clone(),
            prompts: backend,
        }
    }
}
