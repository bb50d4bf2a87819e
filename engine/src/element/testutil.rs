//! Shared fixtures for element handler tests

use chrono::Utc;
use sdk::types::ParseMode;
use std::collections::VecDeque;
use tempfile::TempDir;
use tokio::sync::Mutex;

use super::{
    Answer, AnswerInput, Element, ElementHandler, ElementKind, ElementSpec, Evaluation,
    RenderContext,
};
use crate::config::LlmConfig;
use crate::db::log::{ConversationLog, NewRecord, RecordRole};
use crate::db::runs::{Run, RunStore};
use crate::db::waiting::WaitingStore;
use crate::db::Database;
use crate::llm::{ChatModel, LlmError, ModelParams};
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::Turn;

/// Scripted chat model: pops one canned reply per call
pub(crate) struct StubChat {
    replies: Mutex<VecDeque<String>>,
}

impl StubChat {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        }
    }
}

#[async_trait]
impl ChatModel for StubChat {
    async fn complete(&self, _messages: &[Turn], _params: &ModelParams) -> Result<String, LlmError> {
        self.replies
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| LlmError::Unavailable("no scripted reply left".to_string()))
    }
}

/// Everything a handler test needs, backed by a throwaway SQLite database
pub(crate) struct Harness {
    _dir: TempDir,
    pub run: Run,
    pub runs: RunStore,
    pub log: ConversationLog,
    pub waiting: WaitingStore,
    pub llm: StubChat,
    pub llm_defaults: LlmConfig,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_replies(&[]).await
    }

    pub async fn with_replies(replies: &[&str]) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::new(&dir.path().join("test.db"))
            .await
            .expect("test database");
        let runs = db.runs();
        let run = runs.create(100, "demo").await.expect("run");
        let log = db.log();
        let waiting = db.waiting();

        Self {
            _dir: dir,
            run,
            runs,
            log,
            waiting,
            llm: StubChat::new(replies),
            llm_defaults: LlmConfig::default(),
        }
    }

    pub fn ctx(&self) -> RenderContext<'_> {
        RenderContext {
            run: &self.run,
            runs: &self.runs,
            log: &self.log,
            waiting: &self.waiting,
            llm: &self.llm,
            llm_defaults: &self.llm_defaults,
            now: Utc::now(),
        }
    }

    /// Append a bot record for an element and return its log id
    pub async fn log_element(&self, element: &Element) -> i64 {
        self.log
            .append(NewRecord {
                chat_id: self.run.chat_id,
                course_id: self.run.course_id.clone(),
                run_id: self.run.run_id,
                element_id: element.id.clone(),
                element_type: element.type_tag().to_string(),
                role: RecordRole::Bot,
                report: element.spec().text.clone(),
                snapshot: element.snapshot.to_json().expect("snapshot json"),
                score: None,
                max_score: None,
            })
            .await
            .expect("append record")
    }
}

/// Build a plain spec of the given kind with optional text
pub(crate) fn spec_of(kind: ElementKind, text: Option<&str>) -> ElementSpec {
    ElementSpec {
        text: text.map(|t| t.to_string()),
        parse_mode: ParseMode::Markdown,
        link_preview: None,
        button: None,
        media: vec![],
        kind,
    }
}

/// Quiz spec from (text, correct, feedback) triples
pub(crate) fn quiz_spec(answers: &[(&str, bool, Option<&str>)]) -> ElementSpec {
    spec_of(
        ElementKind::Quiz {
            answers: answers
                .iter()
                .map(|(text, correct, feedback)| Answer {
                    text: text.to_string(),
                    correct: *correct,
                    feedback: feedback.map(|f| f.to_string()),
                })
                .collect(),
        },
        Some("Pick one"),
    )
}

/// Evaluate a fresh element of `spec` against `input` through `handler`
pub(crate) async fn eval(
    handler: &dyn ElementHandler,
    spec: ElementSpec,
    input: AnswerInput,
) -> Result<Evaluation, EngineError> {
    let harness = Harness::new().await;
    let mut element = Element::new("q_0", "demo", spec);
    let record_id = harness.log_element(&element).await;
    let record = harness
        .log
        .get(record_id)
        .await
        .expect("fetch record")
        .expect("record exists");

    handler
        .evaluate(&harness.ctx(), &mut element, &record, &input)
        .await
}
