//! Integration tests: hybrid and keyword-only retrieval over ingested documents

mod common;

use bodhi::chunking::TextChunker;
use common::{filler, services, services_with, text_upload, QueryFailingEmbedder, ScriptedResponder};
use std::sync::Arc;
use tempfile::TempDir;

async fn seeded(temp: &TempDir) -> bodhi::services::Services {
    let services = services(temp, Arc::new(ScriptedResponder::answering(&["ok"]))).await;
    let chunker = TextChunker::new(200, 20).unwrap();

    let outcomes = services
        .ingestion()
        .ingest(
            vec![
                text_upload(
                    "finance.pdf",
                    "Quarterly revenue grew by twelve percent. Operating margin improved.",
                ),
                text_upload(
                    "hr.pdf",
                    "Employee onboarding takes two weeks. Benefits start on day one.",
                ),
                text_upload(
                    "security.pdf",
                    "Passwords rotate every ninety days. Revenue systems require MFA.",
                ),
            ],
            &chunker,
        )
        .await;
    assert!(outcomes.iter().all(|o| o.result.is_ok()));
    services
}

#[tokio::test]
async fn test_keyword_only_ranks_by_bm25() {
    let temp = TempDir::new().unwrap();
    let services = seeded(&temp).await;

    let result = services
        .retriever()
        .retrieve("quarterly revenue", 5, false)
        .await
        .unwrap();

    assert!(!result.hybrid);
    // Only chunks containing a query word are returned
    let names: Vec<&str> = result.document_names().collect();
    assert_eq!(names, vec!["finance.pdf", "security.pdf"]);
    assert!(result.chunks[0].score >= result.chunks[1].score);
}

#[tokio::test]
async fn test_hybrid_adds_semantic_candidates() {
    let temp = TempDir::new().unwrap();
    let services = seeded(&temp).await;

    let result = services
        .retriever()
        .retrieve("quarterly revenue", 5, true)
        .await
        .unwrap();

    assert!(result.hybrid);
    assert!(result.len() <= 5);
    // Present in both lists, so fused to the top
    assert_eq!(result.chunks[0].document_name, "finance.pdf");
    // The vector side returns every chunk, including ones without query words
    assert!(result.document_names().any(|n| n == "hr.pdf"));

    for pair in result.chunks.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn test_k_bounds_result_size() {
    let temp = TempDir::new().unwrap();
    let services = seeded(&temp).await;
    let retriever = services.retriever();

    let one = retriever.retrieve("revenue", 1, true).await.unwrap();
    assert_eq!(one.len(), 1);

    let none = retriever.retrieve("revenue", 0, true).await.unwrap();
    assert!(none.is_empty());

    let blank = retriever.retrieve("   ", 5, true).await.unwrap();
    assert!(blank.is_empty());
}

#[tokio::test]
async fn test_empty_index_returns_nothing() {
    let temp = TempDir::new().unwrap();
    let services = services(&temp, Arc::new(ScriptedResponder::answering(&["ok"]))).await;

    let result = services
        .retriever()
        .retrieve("anything at all", 5, true)
        .await
        .unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn test_keyword_only_never_embeds_the_query() {
    let temp = TempDir::new().unwrap();
    let services = services_with(
        &temp,
        Arc::new(QueryFailingEmbedder),
        Arc::new(ScriptedResponder::answering(&["ok"])),
    )
    .await;

    let outcomes = services
        .ingestion()
        .ingest(
            vec![text_upload("a.pdf", "lexical search still works")],
            &TextChunker::new(100, 10).unwrap(),
        )
        .await;
    assert!(outcomes[0].result.is_ok());

    let retriever = services.retriever();
    let lexical = retriever.retrieve("lexical", 3, false).await.unwrap();
    assert_eq!(lexical.len(), 1);

    assert!(retriever.retrieve("lexical", 3, true).await.is_err());
}

#[tokio::test]
async fn test_report_scenario() {
    let temp = TempDir::new().unwrap();
    let services = services(&temp, Arc::new(ScriptedResponder::answering(&["ok"]))).await;

    let mut text = String::from("Quarterly revenue summary. ");
    text.push_str(&filler("item", 1200 - text.len()));
    assert_eq!(text.chars().count(), 1200);

    let outcomes = services
        .ingestion()
        .ingest(
            vec![text_upload("report.pdf", &text)],
            &TextChunker::new(500, 100).unwrap(),
        )
        .await;
    assert_eq!(outcomes[0].result.as_ref().unwrap().chunk_count, 3);

    let names = services.index.list_document_names().await.unwrap();
    assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["report.pdf"]);

    let result = services
        .retriever()
        .retrieve("quarterly revenue", 5, true)
        .await
        .unwrap();
    assert!(!result.is_empty());
    assert!(result.len() <= 5);
    assert!(result.document_names().all(|n| n == "report.pdf"));
    assert_eq!(result.chunks[0].doc_id, "report.pdf_0");
}
