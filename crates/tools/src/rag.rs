//! First-party retrieval tools over the [`Retriever`] capability.

use crate::naming::{RAG_INGEST, RAG_QUERY};
use async_trait::async_trait;
use rago_core::error::ToolError;
use rago_core::llm::{IngestSource, RetrievalAnswer, RetrievalQuery, Retriever};
use rago_core::schema::{JsonType, PropertySchema, ToolSchema, ValidatedArgs};
use rago_core::tool::{Tool, ToolOutput};
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_TOP_K: u64 = 5;

pub struct RagQueryTool {
    retriever: Arc<dyn Retriever>,
}

impl RagQueryTool {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }
}

fn render_answer(answer: &RetrievalAnswer) -> String {
    let mut text = answer.answer.trim().to_string();
    if !answer.sources.is_empty() {
        text.push_str("\n\nSources:");
        for (i, source) in answer.sources.iter().enumerate() {
            text.push_str(&format!(
                "\n[{}] (score {:.2}) {}",
                i + 1,
                source.score,
                source.content.trim()
            ));
        }
    }
    text
}

#[async_trait]
impl Tool for RagQueryTool {
    fn name(&self) -> &str {
        RAG_QUERY
    }

    fn description(&self) -> &str {
        "Answer a question from the indexed document collection. Returns an answer with numbered sources."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::object()
            .property("query", PropertySchema::string("The question to answer"))
            .property(
                "top_k",
                PropertySchema::integer("Number of passages to retrieve")
                    .with_default(json!(DEFAULT_TOP_K)),
            )
            .property("temperature", PropertySchema::number("Sampling temperature for the answer"))
            .require("query")
    }

    async fn call(&self, args: ValidatedArgs) -> Result<ToolOutput, ToolError> {
        let query = RetrievalQuery {
            query: args.str("query").unwrap_or_default().to_string(),
            top_k: args.u64("top_k").unwrap_or(DEFAULT_TOP_K).max(1) as usize,
            temperature: args.f64("temperature").map(|t| t as f32),
        };
        let answer = self
            .retriever
            .query(query)
            .await
            .map_err(|e| ToolError::execution(RAG_QUERY, e.to_string()))?;
        Ok(ToolOutput {
            text: render_answer(&answer),
            data: serde_json::to_value(&answer).ok(),
        })
    }
}

pub struct RagIngestTool {
    retriever: Arc<dyn Retriever>,
}

impl RagIngestTool {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl Tool for RagIngestTool {
    fn name(&self) -> &str {
        RAG_INGEST
    }

    fn description(&self) -> &str {
        "Add a document to the retrieval index, either inline text or a file path."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::object()
            .property("content", PropertySchema::string("Document text to index"))
            .property("path", PropertySchema::string("Path of a file to index"))
            .property(
                "metadata",
                PropertySchema::typed(JsonType::Object, "Metadata stored with the document"),
            )
    }

    async fn call(&self, args: ValidatedArgs) -> Result<ToolOutput, ToolError> {
        let source = match (args.str("content"), args.str("path")) {
            (Some(content), None) => IngestSource::Text(content.to_string()),
            (None, Some(path)) => IngestSource::Path(PathBuf::from(path)),
            _ => {
                return Err(ToolError::invalid_args(
                    RAG_INGEST,
                    "exactly one of 'content' or 'path' is required",
                ));
            }
        };
        let metadata = match args.get("metadata") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        let report = self
            .retriever
            .ingest(source, metadata)
            .await
            .map_err(|e| ToolError::execution(RAG_INGEST, e.to_string()))?;
        Ok(ToolOutput {
            text: format!(
                "Ingested document {} ({} chunks)",
                report.document_id, report.chunks
            ),
            data: serde_json::to_value(&report).ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rago_core::error::RetrievalError;
    use rago_core::llm::{IngestReport, RetrievalSource};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRetriever {
        queries: Mutex<Vec<RetrievalQuery>>,
    }

    #[async_trait]
    impl Retriever for FakeRetriever {
        async fn query(&self, query: RetrievalQuery) -> Result<RetrievalAnswer, RetrievalError> {
            if query.query == "fail" {
                return Err(RetrievalError("index offline".into()));
            }
            self.queries.lock().unwrap().push(query);
            Ok(RetrievalAnswer {
                answer: "Rust has no garbage collector.".into(),
                sources: vec![RetrievalSource {
                    content: "Rust enforces memory safety without a GC.".into(),
                    score: 0.91,
                    metadata: Map::new(),
                }],
            })
        }

        async fn ingest(
            &self,
            source: IngestSource,
            _metadata: Map<String, Value>,
        ) -> Result<IngestReport, RetrievalError> {
            let id = match source {
                IngestSource::Text(_) => "doc-text",
                IngestSource::Path(_) => "doc-file",
            };
            Ok(IngestReport {
                document_id: id.into(),
                chunks: 2,
            })
        }
    }

    #[tokio::test]
    async fn query_renders_numbered_sources() {
        let retriever = Arc::new(FakeRetriever::default());
        let tool = RagQueryTool::new(retriever.clone());
        let args = tool.schema().validate(RAG_QUERY, json!({"query": "gc?"})).unwrap();
        let out = tool.call(args).await.unwrap();

        assert!(out.text.starts_with("Rust has no garbage collector."));
        assert!(out.text.contains("[1] (score 0.91) Rust enforces"));
        assert_eq!(retriever.queries.lock().unwrap()[0].top_k, 5);
    }

    #[tokio::test]
    async fn query_failure_is_execution_error() {
        let tool = RagQueryTool::new(Arc::new(FakeRetriever::default()));
        let args = tool.schema().validate(RAG_QUERY, json!({"query": "fail"})).unwrap();
        let err = tool.call(args).await.unwrap_err();
        assert!(err.to_string().contains("index offline"));
    }

    #[tokio::test]
    async fn ingest_requires_exactly_one_source() {
        let tool = RagIngestTool::new(Arc::new(FakeRetriever::default()));
        let both = tool
            .schema()
            .validate(RAG_INGEST, json!({"content": "x", "path": "/tmp/x"}))
            .unwrap();
        assert!(matches!(tool.call(both).await, Err(ToolError::InvalidArgs { .. })));

        let text = tool.schema().validate(RAG_INGEST, json!({"content": "x"})).unwrap();
        let out = tool.call(text).await.unwrap();
        assert_eq!(out.text, "Ingested document doc-text (2 chunks)");
    }
}
