//! Question answering over the indexed safety data sheets
//!
//! [`QaBot`] combines a [`Retriever`] with a prompt template and a
//! [`TextGenerator`]. It must be initialised before it answers anything,
//! which keeps construction cheap and lets a packaged bot be loaded first and
//! connected to its model afterwards.

use crate::api::retriever::Retriever;
use crate::config::Config;
use crate::error::{QaBotError, Result};
use crate::ml::embedding::build_embedder;
use crate::ml::generation::{GenerationParams, GenerationRequest, TextGenerator, build_generator};
use crate::ml::prompt::PromptTemplate;
use crate::registry::artifact::ModelArtifact;
use crate::storage::{MetadataFilter, ScoredEntry};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// One answered question
#[derive(Debug, Clone)]
pub struct Answer {
    pub question: String,
    pub text: String,
    /// Chunks the answer was generated from
    pub sources: Vec<ScoredEntry>,
    /// How many fewer than `k` chunks were found
    pub shortfall: usize,
}

/// Retrieval-augmented question answering
pub struct QaBot {
    config: Config,
    retriever: Retriever,
    credential: Option<String>,
    template: Option<PromptTemplate>,
    generator: Option<Arc<dyn TextGenerator>>,
    params: GenerationParams,
}

impl QaBot {
    pub fn new(config: Config, retriever: Retriever, credential: Option<String>) -> Self {
        let params = config.generation.effective_params();
        Self {
            config,
            retriever,
            credential,
            template: None,
            generator: None,
            params,
        }
    }

    /// Load a packaged bot; the index is read from the artifact directory
    pub fn from_artifact(artifact: &ModelArtifact, credential: Option<String>) -> Result<Self> {
        let mut config = artifact.config.clone();
        config.paths.vector_persist_dir = artifact.index_dir();
        config.prompt_template = artifact.prompt_template.clone();

        let embedder = build_embedder(&config.embedding, credential.clone())?;
        let retriever = Retriever::open(&config, embedder)?;
        log::info!(
            "Loaded packaged bot {} ({} indexed chunks)",
            artifact.manifest.name,
            retriever.store().len()
        );
        Ok(Self::new(config, retriever, credential))
    }

    /// Load the prompt template and connect the configured generator
    pub fn initialize(&mut self) -> Result<()> {
        let generator = build_generator(&self.config.generation, self.credential.clone())?;
        self.initialize_with(generator)
    }

    /// Initialise with an explicitly constructed generator
    pub fn initialize_with(&mut self, generator: Arc<dyn TextGenerator>) -> Result<()> {
        self.template = Some(PromptTemplate::new(self.config.prompt_template.as_str())?);
        log::info!("QA bot ready with generator {}", generator.name());
        self.generator = Some(generator);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.template.is_some() && self.generator.is_some()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// Answer one question, optionally restricted by a metadata filter
    pub async fn answer(&self, question: &str, filter: Option<&MetadataFilter>) -> Result<Answer> {
        let (Some(template), Some(generator)) = (&self.template, &self.generator) else {
            return Err(QaBotError::NotInitialized);
        };

        let retrieval = self.retriever.retrieve(question, filter).await?;
        let request = GenerationRequest {
            prompt: template.render(&retrieval.context(), question),
            question: question.to_string(),
            context: retrieval.texts(),
        };
        let text = generator.generate(&request, &self.params).await?;

        Ok(Answer {
            question: question.to_string(),
            text,
            shortfall: retrieval.shortfall,
            sources: retrieval.documents,
        })
    }

    /// Answer a batch of questions.
    ///
    /// `filters` is either empty (no filtering) or holds one filter per
    /// question. Items are answered one after another and independently.
    pub async fn predict(&self, questions: &[String], filters: &[MetadataFilter]) -> Result<Vec<String>> {
        if !self.is_initialized() {
            return Err(QaBotError::NotInitialized);
        }
        if !filters.is_empty() && filters.len() != questions.len() {
            return Err(QaBotError::InvalidRequest(format!(
                "{} questions but {} filters",
                questions.len(),
                filters.len()
            )));
        }

        let mut answers = Vec::with_capacity(questions.len());
        for (i, question) in questions.iter().enumerate() {
            let answer = self.answer(question, filters.get(i)).await?;
            answers.push(answer.text);
        }
        Ok(answers)
    }

    /// Answer a tabular batch
    pub async fn predict_frame(&self, frame: PredictFrame) -> Result<Vec<String>> {
        let (questions, filters) = frame.into_requests()?;
        self.predict(&questions, &filters).await
    }
}

/// Tabular prediction input with `question` and optional `filter` columns.
///
/// Accepts the `split` orientation
/// (`{"columns": ["question", "filter"], "data": [[q, {...}], ...]}`) and
/// the column-dict form (`{"question": [...], "filter": [...]}`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PredictFrame {
    Split {
        columns: Vec<String>,
        data: Vec<Vec<Value>>,
    },
    Columns {
        #[serde(alias = "questions")]
        question: Vec<String>,
        #[serde(default)]
        filter: Vec<Value>,
    },
}

impl PredictFrame {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| QaBotError::InvalidRequest(format!("Unrecognised prediction frame: {}", e)))
    }

    /// Split into questions and per-question filters
    pub fn into_requests(self) -> Result<(Vec<String>, Vec<MetadataFilter>)> {
        match self {
            PredictFrame::Split { columns, data, .. } => {
                let question_col = columns
                    .iter()
                    .position(|c| c == "question" || c == "questions")
                    .ok_or_else(|| QaBotError::InvalidRequest("Frame has no question column".to_string()))?;
                let filter_col = columns.iter().position(|c| c == "filter");

                let mut questions = Vec::with_capacity(data.len());
                let mut filters = Vec::with_capacity(data.len());
                for (row_index, row) in data.into_iter().enumerate() {
                    let question = row
                        .get(question_col)
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            QaBotError::InvalidRequest(format!("Row {} has no question text", row_index))
                        })?;
                    questions.push(question.to_string());
                    let filter = filter_col.and_then(|c| row.get(c)).cloned().unwrap_or(Value::Null);
                    filters.push(parse_filter(filter)?);
                }
                Ok((questions, filters))
            }
            PredictFrame::Columns { question, filter } => {
                if !filter.is_empty() && filter.len() != question.len() {
                    return Err(QaBotError::InvalidRequest(format!(
                        "{} questions but {} filters",
                        question.len(),
                        filter.len()
                    )));
                }
                let filters = filter.into_iter().map(parse_filter).collect::<Result<Vec<_>>>()?;
                Ok((question, filters))
            }
        }
    }
}

/// Filters arrive as objects, as JSON-encoded strings, or as null
fn parse_filter(value: Value) -> Result<MetadataFilter> {
    match value {
        Value::Null => Ok(MetadataFilter::new()),
        Value::String(s) if s.trim().is_empty() => Ok(MetadataFilter::new()),
        Value::String(s) => serde_json::from_str(&s)
            .map_err(|e| QaBotError::InvalidRequest(format!("Invalid filter {:?}: {}", s, e))),
        Value::Object(_) => serde_json::from_value(value)
            .map_err(|e| QaBotError::InvalidRequest(format!("Invalid filter: {}", e))),
        other => Err(QaBotError::InvalidRequest(format!(
            "Filter must be an object, got {}",
            other
        ))),
    }
}
