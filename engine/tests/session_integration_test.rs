//! End-to-end tests of the course progression surface

use async_trait::async_trait;
use coursive_engine::config::LlmConfig;
use coursive_engine::course::{parse_course, CourseDefinition, CourseStore};
use coursive_engine::db::Database;
use coursive_engine::element::AnswerInput;
use coursive_engine::llm::{ChatModel, LlmError, ModelParams};
use coursive_engine::session::CourseService;
use sdk::errors::EngineError;
use sdk::types::{ScorePair, Turn};
use std::collections::VecDeque;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

/// Serves one parsed course under its id
struct StaticStore(CourseDefinition);

#[async_trait]
impl CourseStore for StaticStore {
    async fn load(&self, course_id: &str) -> Result<CourseDefinition, EngineError> {
        if course_id == self.0.course_id {
            Ok(self.0.clone())
        } else {
            Err(EngineError::NotFound(format!("course '{}'", course_id)))
        }
    }
}

/// Scripted chat model popping one canned reply per call
struct ScriptedChat(Mutex<VecDeque<String>>);

impl ScriptedChat {
    fn new(replies: &[&str]) -> Self {
        Self(Mutex::new(replies.iter().map(|r| r.to_string()).collect()))
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, _messages: &[Turn], _params: &ModelParams) -> Result<String, LlmError> {
        self.0
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| LlmError::Unavailable("script exhausted".to_string()))
    }
}

struct TestBed {
    _dir: TempDir,
    db: Database,
    service: CourseService,
}

async fn testbed(course_yaml: &str, replies: &[&str]) -> TestBed {
    let dir = TempDir::new().unwrap();
    let db = Database::new(&dir.path().join("test.db")).await.unwrap();
    let course = parse_course("demo", course_yaml).unwrap();

    let service = CourseService::new(
        Arc::new(StaticStore(course)),
        &db,
        Arc::new(ScriptedChat::new(replies)),
        LlmConfig::default(),
    );

    TestBed {
        _dir: dir,
        db,
        service,
    }
}

const TWO_ELEMENT_COURSE: &str = "\
a:
  type: message
  text: hello
b:
  type: quiz
  text: Important
  answers:
    - text: X
      correct: yes
      feedback: Yes
    - text: Y
";

#[tokio::test]
async fn message_auto_advances_into_the_quiz() {
    let bed = testbed(TWO_ELEMENT_COURSE, &[]).await;

    let rendered = bed.service.start(1, "demo").await.unwrap();
    assert_eq!(rendered.len(), 2);
    assert_eq!(rendered[0].element_id, "a");
    assert!(!rendered[0].waits_for_input);
    assert_eq!(rendered[1].element_id, "b");
    assert!(rendered[1].waits_for_input);

    let current = bed.service.current(1).await.unwrap().unwrap();
    assert_eq!(current.element_id, "b");
}

#[tokio::test]
async fn correct_quiz_answer_returns_score_and_feedback() {
    let bed = testbed(TWO_ELEMENT_COURSE, &[]).await;
    bed.service.start(1, "demo").await.unwrap();

    let outcome = bed.service.submit(1, AnswerInput::Index(0)).await.unwrap();
    assert_eq!(outcome.feedback.as_deref(), Some("Yes"));
    assert_eq!(outcome.score, Some(ScorePair::new(1.0, 1.0)));
    // b was the last element; the course is complete.
    assert!(outcome.next.is_empty());
}

#[tokio::test]
async fn identical_resubmission_is_replayed_not_rescored() {
    let bed = testbed(TWO_ELEMENT_COURSE, &[]).await;
    bed.service.start(1, "demo").await.unwrap();

    bed.service.submit(1, AnswerInput::Index(0)).await.unwrap();
    let user_records_before: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM conversation WHERE role = 'user'")
            .fetch_one(bed.db.pool())
            .await
            .unwrap();

    let replayed = bed.service.submit(1, AnswerInput::Index(0)).await.unwrap();
    assert_eq!(replayed.feedback.as_deref(), Some("Yes"));
    assert_eq!(replayed.score, Some(ScorePair::new(1.0, 1.0)));

    let user_records_after: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM conversation WHERE role = 'user'")
            .fetch_one(bed.db.pool())
            .await
            .unwrap();
    assert_eq!(user_records_before, user_records_after);
}

#[tokio::test]
async fn malformed_submission_leaves_the_log_unchanged() {
    let bed = testbed(TWO_ELEMENT_COURSE, &[]).await;
    bed.service.start(1, "demo").await.unwrap();

    let records_before: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversation")
        .fetch_one(bed.db.pool())
        .await
        .unwrap();

    // Text where an index is expected
    let result = bed
        .service
        .submit(1, AnswerInput::Text("X".to_string()))
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    let records_after: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversation")
        .fetch_one(bed.db.pool())
        .await
        .unwrap();
    assert_eq!(records_before, records_after);
}

#[tokio::test]
async fn jump_goto_branches_to_the_target() {
    let course = "\
j:
  type: jump
  text: Continue?
  options:
    - text: Onward
    - text: Skip to the end
      goto: z
y:
  type: message
  text: never shown
  button: OK
z:
  type: message
  text: the target
  button: OK
";
    let bed = testbed(course, &[]).await;
    bed.service.start(1, "demo").await.unwrap();

    let outcome = bed.service.submit(1, AnswerInput::Index(1)).await.unwrap();
    assert_eq!(outcome.next.len(), 1);
    assert_eq!(outcome.next[0].element_id, "z");
    assert_eq!(outcome.next[0].text.as_deref(), Some("the target"));
}

#[tokio::test]
async fn dialog_conversation_runs_until_stop() {
    let course = "\
d:
  type: dialog
  text: Ask me anything.
  prompt: You are a tutor.
";
    let bed = testbed(course, &["Glad you asked!", "Good luck!{STOP}"]).await;
    bed.service.start(1, "demo").await.unwrap();

    let first = bed
        .service
        .submit(1, AnswerInput::Text("what is ownership?".to_string()))
        .await
        .unwrap();
    assert_eq!(first.feedback.as_deref(), Some("Glad you asked!"));
    assert!(first.next.is_empty());

    // Still on the dialog.
    let current = bed.service.current(1).await.unwrap().unwrap();
    assert_eq!(current.element_id, "d");

    let last = bed
        .service
        .submit(1, AnswerInput::Text("thanks, bye".to_string()))
        .await
        .unwrap();
    assert_eq!(last.feedback.as_deref(), Some("Good luck!"));
    // The stop marker finished the dialog and the course.
    assert!(last.next.is_empty());
}

#[tokio::test]
async fn generation_failure_surfaces_but_preserves_the_turn() {
    let course = "\
d:
  type: dialog
  text: Ask me anything.
  prompt: You are a tutor.
";
    // No scripted replies: the first completion fails.
    let bed = testbed(course, &[]).await;
    bed.service.start(1, "demo").await.unwrap();

    let result = bed
        .service
        .submit(1, AnswerInput::Text("hello?".to_string()))
        .await;
    assert!(matches!(result, Err(EngineError::Generation(_))));

    let user_turns: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM conversation WHERE role = 'user' AND element_id = 'd'",
    )
    .fetch_one(bed.db.pool())
    .await
    .unwrap();
    assert_eq!(user_turns, 1);
}

#[tokio::test]
async fn end_element_finishes_the_run() {
    let course = "\
a:
  type: message
  text: bye now
e:
  type: end
";
    let bed = testbed(course, &[]).await;
    let rendered = bed.service.start(1, "demo").await.unwrap();

    // message auto-advances into end
    assert_eq!(rendered.len(), 2);
    assert_eq!(rendered[1].element_type, "end");
    assert_eq!(rendered[1].text.as_deref(), Some("Course ended"));

    // No current element once the run has ended.
    assert!(bed.service.current(1).await.unwrap().is_none());
    assert!(bed.service.advance(1).await.is_err());
}

#[tokio::test]
async fn unknown_types_render_as_placeholders_and_never_block() {
    let course = "\
a:
  type: message
  text: start
m:
  type: hologram
  text: from the future
b:
  type: message
  text: done
  button: OK
";
    let bed = testbed(course, &[]).await;
    let rendered = bed.service.start(1, "demo").await.unwrap();

    // a auto-advances; the unknown element is skipped by `next`, so b is
    // reached directly.
    let ids: Vec<&str> = rendered.iter().map(|r| r.element_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}
