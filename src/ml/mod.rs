//! Model-facing components: embeddings, prompts and text generation
//!
//! Everything that talks to a language or embedding model lives here, behind
//! the [`Embedder`] and [`TextGenerator`] traits so that the pipeline can run
//! against hosted models or fully offline.

pub mod embedding;
pub mod generation;
pub mod models;
pub mod prompt;

// Re-export main types and functions
pub use embedding::{
    Embedder, Embedding, EmbeddingBackend, EmbeddingConfig, HubEmbedder, LocalEmbedder,
    build_embedder,
};
pub use generation::{
    ContextOnlyGenerator, GenerationParams, GenerationRequest, HubGenerator, OpenAiGenerator,
    TextGenerator, build_generator,
};
pub use models::{ModelManager, known_dimension};
pub use prompt::PromptTemplate;
