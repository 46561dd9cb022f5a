use rago_core::error::StoreError;
use rago_core::llm::{GenerateOptions, Generator};
use rago_core::message::{Message, Role};
use rago_core::session::{Compaction, Session, SessionBackend};
use std::sync::Arc;
use tracing::{debug, info};

/// Session lifecycle on top of a [`SessionBackend`], plus LLM compaction.
pub struct SessionManager {
    backend: Arc<dyn SessionBackend>,
    generator: Arc<dyn Generator>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn SessionBackend>, generator: Arc<dyn Generator>) -> Self {
        Self { backend, generator }
    }

    pub fn backend(&self) -> &Arc<dyn SessionBackend> {
        &self.backend
    }

    pub async fn create(&self, agent_id: &str) -> Result<Session, StoreError> {
        let session = self.backend.create(Session::new(agent_id)).await?;
        debug!(session = %session.id, agent = agent_id, "Session created");
        Ok(session)
    }

    /// Fetch `id`, creating it under `agent_id` when it does not exist yet.
    pub async fn get_or_create(&self, id: &str, agent_id: &str) -> Result<Session, StoreError> {
        match self.backend.get(id).await? {
            Some(session) => Ok(session),
            None => self.backend.create(Session::new(agent_id).with_id(id)).await,
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        self.backend.get(id).await
    }

    pub async fn append(&self, id: &str, message: Message) -> Result<(), StoreError> {
        self.backend.append(id, message).await
    }

    /// The raw log, compactions ignored.
    pub async fn messages(&self, id: &str) -> Result<Vec<Message>, StoreError> {
        self.backend.messages(id).await
    }

    /// The log as the model should see it: the latest summary followed by
    /// every message recorded after the compaction point.
    pub async fn context(&self, id: &str) -> Result<Vec<Message>, StoreError> {
        let raw = self.backend.messages(id).await?;
        Ok(match self.backend.latest_compaction(id).await? {
            Some(compaction) => compaction.project(raw),
            None => raw,
        })
    }

    /// Summarize everything except the last `keep_tail` messages.
    ///
    /// Returns `None` when there is nothing new to fold into the summary.
    /// Raw messages are never removed.
    pub async fn compact(&self, id: &str, keep_tail: usize) -> Result<Option<Compaction>, StoreError> {
        let raw = self.backend.messages(id).await?;
        let mut upto = raw.len().saturating_sub(keep_tail);
        // Keep tool results with the assistant message that requested them.
        while upto > 0 && raw.get(upto).is_some_and(|m| m.role == Role::Tool) {
            upto -= 1;
        }
        let previous = self.backend.latest_compaction(id).await?;
        let from = previous.as_ref().map_or(0, |c| c.upto);
        if upto <= from {
            return Ok(None);
        }

        let prompt = compaction_prompt(previous.as_ref().map(|c| c.summary.as_str()), &raw[from..upto]);
        let summary = self
            .generator
            .generate(&prompt, &GenerateOptions::default().with_temperature(0.2))
            .await
            .map_err(|e| StoreError::Compaction(e.to_string()))?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(StoreError::Compaction("model returned an empty summary".into()));
        }

        let compaction = Compaction::new(summary, upto);
        self.backend.save_compaction(id, compaction.clone()).await?;
        info!(session = id, upto, "Session compacted");
        Ok(Some(compaction))
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<Session>, StoreError> {
        self.backend.list(limit).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.backend.delete(id).await
    }
}

fn compaction_prompt(previous: Option<&str>, messages: &[Message]) -> String {
    let mut prompt = String::from(
        "Summarize the conversation below so it can replace the original messages. \
         Keep facts, decisions, tool results and open questions. Reply with the summary only.\n\n",
    );
    if let Some(previous) = previous {
        prompt.push_str("Earlier summary:\n");
        prompt.push_str(previous);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Conversation:\n");
    for message in messages {
        prompt.push_str(message.role.as_str());
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemorySessionBackend;
    use rago_core::testing::ScriptedGenerator;

    async fn seeded(texts: Vec<&str>, count: usize) -> (SessionManager, Arc<ScriptedGenerator>, String) {
        let generator = Arc::new(ScriptedGenerator::new(vec![]).with_texts(texts));
        let manager = SessionManager::new(Arc::new(InMemorySessionBackend::new()), generator.clone());
        let session = manager.create("default").await.unwrap();
        for i in 0..count {
            let message = if i % 2 == 0 {
                Message::user(format!("question {i}"))
            } else {
                Message::assistant(format!("answer {i}"))
            };
            manager.append(&session.id, message).await.unwrap();
        }
        (manager, generator, session.id)
    }

    #[tokio::test]
    async fn compaction_projects_summary_and_tail() {
        let (manager, generator, id) = seeded(vec!["they asked 0..3"], 6).await;

        let compaction = manager.compact(&id, 2).await.unwrap().unwrap();
        assert_eq!(compaction.upto, 4);
        assert!(generator.prompts()[0].contains("user: question 0"));
        assert!(!generator.prompts()[0].contains("question 4"));

        let context = manager.context(&id).await.unwrap();
        assert_eq!(context.len(), 3);
        assert!(context[0].content.contains("they asked 0..3"));
        assert_eq!(context[1].content, "question 4");
        assert_eq!(context[2].content, "answer 5");

        // raw log untouched
        assert_eq!(manager.messages(&id).await.unwrap().len(), 6);
        assert_eq!(
            manager.get(&id).await.unwrap().unwrap().summary.as_deref(),
            Some("they asked 0..3")
        );
    }

    #[tokio::test]
    async fn tail_survives_later_appends() {
        let (manager, _, id) = seeded(vec!["first", "second"], 4).await;
        manager.compact(&id, 1).await.unwrap();
        manager.append(&id, Message::user("late")).await.unwrap();

        let raw = manager.messages(&id).await.unwrap();
        let context = manager.context(&id).await.unwrap();
        let tail: Vec<&str> = context[1..].iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<&str> = raw[3..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(tail, expected);

        let second = manager.compact(&id, 1).await.unwrap().unwrap();
        assert_eq!(second.upto, 4);
    }

    #[tokio::test]
    async fn compaction_never_orphans_tool_results() {
        let generator = Arc::new(ScriptedGenerator::new(vec![]).with_texts(vec!["asked for the time"]));
        let manager = SessionManager::new(Arc::new(InMemorySessionBackend::new()), generator);
        let id = manager.create("default").await.unwrap().id;
        let call = |id: &str| rago_core::message::MessageToolCall {
            id: id.into(),
            name: "mcp_clock_now".into(),
            arguments: serde_json::json!({}),
        };
        for message in [
            Message::user("what time is it?"),
            Message::assistant_tool_calls("", vec![call("c1"), call("c2")]),
            Message::tool_result("c1", "12:00"),
            Message::tool_result("c2", "12:00"),
            Message::assistant("It is noon."),
        ] {
            manager.append(&id, message).await.unwrap();
        }

        // A tail of 2 would start at the second tool result.
        let compaction = manager.compact(&id, 2).await.unwrap().unwrap();
        assert_eq!(compaction.upto, 1);

        let context = manager.context(&id).await.unwrap();
        assert!(context[0].has_flag("summary"));
        assert_eq!(context[1].tool_calls.len(), 2);
        assert_eq!(context.len(), 5);
    }

    #[tokio::test]
    async fn nothing_to_compact() {
        let (manager, generator, id) = seeded(vec![], 2).await;
        assert!(manager.compact(&id, 5).await.unwrap().is_none());
        assert!(generator.prompts().is_empty());
        assert_eq!(manager.context(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn generator_failure_is_reported() {
        let (manager, _, id) = seeded(vec![], 4).await;
        let err = manager.compact(&id, 0).await.unwrap_err();
        assert!(matches!(err, StoreError::Compaction(_)));
        assert!(manager.backend().latest_compaction(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_or_create_reuses_existing() {
        let (manager, _, id) = seeded(vec![], 1).await;
        let same = manager.get_or_create(&id, "other").await.unwrap();
        assert_eq!(same.agent_id, "default");
        let fresh = manager.get_or_create("chosen-id", "default").await.unwrap();
        assert_eq!(fresh.id, "chosen-id");
        assert_eq!(manager.list(10).await.unwrap().len(), 2);
    }
}
