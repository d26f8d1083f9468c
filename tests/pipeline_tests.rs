//! End-to-end ingestion, retrieval and question answering over text fact sheets

mod common;

use common::{RecordingGenerator, test_config};
use sds_qabot::config::{FilterStrategy, StoreKind};
use sds_qabot::{
    Config, Ingestor, MetadataFilter, PredictFrame, QaBot, QaBotError, Retriever, build_embedder,
};
use std::sync::Arc;
use tempfile::TempDir;

async fn ingest(config: &Config) -> sds_qabot::IngestStats {
    let embedder = build_embedder(&config.embedding, None).unwrap();
    Ingestor::new(config.clone(), embedder).unwrap().run().await.unwrap()
}

fn open_retriever(config: &Config) -> Retriever {
    let embedder = build_embedder(&config.embedding, None).unwrap();
    Retriever::open(config, embedder).unwrap()
}

fn acetone() -> MetadataFilter {
    MetadataFilter::single("Name", "ACETONE")
}

#[tokio::test]
async fn test_ingest_tags_every_chunk() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let stats = ingest(&config).await;

    assert_eq!(stats.documents, 2);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.named_documents, 2);
    assert!(stats.chunks > 2, "expected several chunks, got {}", stats.chunks);

    let retriever = open_retriever(&config);
    assert_eq!(retriever.store().len(), stats.chunks);
    let ids = retriever.store().ids().unwrap();
    // acetaldehyde.txt sorts first, notes.csv is entry 3 and skipped
    assert!(ids.contains(&"id-0-1".to_string()));
    assert!(ids.contains(&"id-0-2".to_string()));
    assert!(!ids.iter().any(|id| id.ends_with("-3")));
}

#[tokio::test]
async fn test_filtered_retrieval_only_returns_matching_sheet() {
    for kind in [StoreKind::Flat, StoreKind::Sqlite] {
        for strategy in [FilterStrategy::PostFilter, FilterStrategy::PreFilter] {
            let temp = TempDir::new().unwrap();
            let mut config = test_config(temp.path());
            config.store.kind = kind;
            config.retrieval.strategy = strategy;
            ingest(&config).await;

            let retriever = open_retriever(&config);
            let filter = acetone();
            let retrieval = retriever
                .retrieve("What are the workplace exposure limits?", Some(&filter))
                .await
                .unwrap();

            assert!(!retrieval.is_empty(), "{:?}/{:?}", kind, strategy);
            assert!(retrieval.filtered);
            assert_eq!(retrieval.requested, 10);
            assert_eq!(retrieval.documents.len() + retrieval.shortfall, 10);
            assert!(retrieval.documents.iter().all(|d| d.name() == "ACETONE"));
            assert!(
                retrieval
                    .documents
                    .windows(2)
                    .all(|w| w[0].distance <= w[1].distance)
            );
        }
    }
}

#[tokio::test]
async fn test_unknown_name_returns_nothing() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    ingest(&config).await;

    let retriever = open_retriever(&config);
    let filter = MetadataFilter::single("Name", "BENZENE");
    let retrieval = retriever.retrieve("flammability", Some(&filter)).await.unwrap();
    assert!(retrieval.is_empty());
    assert_eq!(retrieval.shortfall, 10);
}

#[tokio::test]
async fn test_empty_filter_means_unfiltered() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let stats = ingest(&config).await;

    let retriever = open_retriever(&config);
    let question = "Which extinguishers should be used in a fire?";
    let unfiltered = retriever.retrieve(question, None).await.unwrap();
    let empty = retriever
        .retrieve(question, Some(&MetadataFilter::new()))
        .await
        .unwrap();

    assert!(!empty.filtered);
    assert_eq!(unfiltered.documents.len(), stats.chunks.min(10));
    let ids = |r: &sds_qabot::Retrieval| r.documents.iter().map(|d| d.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&unfiltered), ids(&empty));
}

#[tokio::test]
async fn test_predict_requires_initialization() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    ingest(&config).await;

    let retriever = open_retriever(&config);
    let bot = QaBot::new(config, retriever, None);
    assert!(!bot.is_initialized());

    let result = bot.predict(&["What is acetone?".to_string()], &[]).await;
    assert!(matches!(result, Err(QaBotError::NotInitialized)));
}

#[tokio::test]
async fn test_predict_uses_only_filtered_context() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    ingest(&config).await;

    let retriever = open_retriever(&config);
    let mut bot = QaBot::new(config, retriever, None);
    let generator = Arc::new(RecordingGenerator::default());
    bot.initialize_with(generator.clone()).unwrap();

    let questions = vec![
        "What are the health hazards?".to_string(),
        "How should it be stored?".to_string(),
    ];
    let answers = bot.predict(&questions, &[acetone(), acetone()]).await.unwrap();
    assert_eq!(answers, vec!["answer 1".to_string(), "answer 2".to_string()]);

    let requests = generator.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    for (request, question) in requests.iter().zip(&questions) {
        assert_eq!(&request.question, question);
        assert!(request.prompt.contains(question.as_str()));
        assert!(!request.context.is_empty());
        for chunk in &request.context {
            assert!(!chunk.to_lowercase().contains("acetaldehyde"), "leaked: {}", chunk);
        }
    }
}

#[tokio::test]
async fn test_predict_rejects_mismatched_filters() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    ingest(&config).await;

    let retriever = open_retriever(&config);
    let mut bot = QaBot::new(config, retriever, None);
    bot.initialize_with(Arc::new(RecordingGenerator::default())).unwrap();

    let questions = vec!["a".to_string(), "b".to_string()];
    let result = bot.predict(&questions, &[acetone()]).await;
    assert!(matches!(result, Err(QaBotError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_predict_frame_mixed_filters() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    ingest(&config).await;

    let retriever = open_retriever(&config);
    let mut bot = QaBot::new(config, retriever, None);
    let generator = Arc::new(RecordingGenerator::default());
    bot.initialize_with(generator.clone()).unwrap();

    let frame = PredictFrame::from_json(
        r#"{
            "columns": ["question", "filter"],
            "data": [
                ["What is the exposure limit?", "{\"Name\": \"ACETALDEHYDE\"}"],
                ["Is it flammable?", null]
            ]
        }"#,
    )
    .unwrap();
    let answers = bot.predict_frame(frame).await.unwrap();
    assert_eq!(answers.len(), 2);

    let contexts = generator.contexts();
    assert!(
        contexts[0]
            .iter()
            .all(|chunk| !chunk.contains("Acetone") && !chunk.contains("ACETONE"))
    );
    assert_eq!(contexts[1].len(), 10.min(bot.retriever().store().len()));
}
