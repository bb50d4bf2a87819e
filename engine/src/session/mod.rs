//! Inbound request surface
//!
//! One `CourseService` serves every chat: it resolves the current element
//! from the conversation log, dispatches submissions through the element
//! registry, drains active revision chains, and walks the course forward,
//! auto-advancing through elements that don't wait for input.
//!
//! Every operation is a single synchronous request/response; the only
//! component with its own timer is the scheduler.

use chrono::Utc;
use sdk::errors::EngineError;
use sdk::types::{ReadyNotification, RenderedElement, ScorePair};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::course::{CourseDefinition, CourseStore};
use crate::db::log::{ConversationLog, ConversationRecord, NewRecord, RecordRole};
use crate::db::runs::{Run, RunStore};
use crate::db::waiting::WaitingStore;
use crate::db::Database;
use crate::element::{
    AnswerInput, Element, ElementKind, ElementRegistry, ElementSpec, NextStep, RenderContext,
    Snapshot,
};
use crate::llm::ChatModel;
use crate::nav;
use crate::revision;

/// Result of an accepted submission
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// Feedback for the answer, if the element produced any
    pub feedback: Option<String>,

    /// Score awarded, for scored element types
    pub score: Option<ScorePair>,

    /// Elements rendered by the follow-up advance, in order
    pub next: Vec<RenderedElement>,
}

/// The course progression service
pub struct CourseService {
    store: Arc<dyn CourseStore>,
    registry: ElementRegistry,
    runs: RunStore,
    log: ConversationLog,
    waiting: WaitingStore,
    llm: Arc<dyn ChatModel>,
    llm_defaults: LlmConfig,
}

impl CourseService {
    pub fn new(
        store: Arc<dyn CourseStore>,
        db: &Database,
        llm: Arc<dyn ChatModel>,
        llm_defaults: LlmConfig,
    ) -> Self {
        Self {
            store,
            registry: ElementRegistry::standard(),
            runs: db.runs(),
            log: db.log(),
            waiting: db.waiting(),
            llm,
            llm_defaults,
        }
    }

    fn ctx<'a>(&'a self, run: &'a Run) -> RenderContext<'a> {
        RenderContext {
            run,
            runs: &self.runs,
            log: &self.log,
            waiting: &self.waiting,
            llm: &*self.llm,
            llm_defaults: &self.llm_defaults,
            now: Utc::now(),
        }
    }

    /// Start a new run of a course and render its opening elements
    pub async fn start(
        &self,
        chat_id: i64,
        course_id: &str,
    ) -> Result<Vec<RenderedElement>, EngineError> {
        let course = self.store.load(course_id).await?;
        let run = self
            .runs
            .create(chat_id, course_id)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?;

        info!(chat_id, course_id, run = run.run_id, "course started");

        let (start_id, start_spec) = course.start()?;
        let start = (start_id.to_string(), start_spec.clone());
        self.render_chain(&run, &course, start).await
    }

    /// The element the chat is currently on, re-presented from its record
    ///
    /// `None` once the run has ended or when nothing was started yet.
    /// Re-presentation is side-effect free: it rebuilds the payload from
    /// the stored snapshot and report instead of rendering again.
    pub async fn current(&self, chat_id: i64) -> Result<Option<RenderedElement>, EngineError> {
        let Some(record) = self
            .log
            .latest_for_chat(chat_id)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        if self
            .runs
            .is_ended(record.run_id)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?
        {
            debug!(chat_id, course = %record.course_id, "run has ended");
            return Ok(None);
        }

        let element = Element::from_record(&record)?;
        let mut payload = element.base_payload();
        if record.report.is_some() {
            payload.text = record.report.clone();
        }
        Ok(Some(payload))
    }

    /// Submit an answer for the chat's current element
    ///
    /// Identical resubmissions replay the stored evaluation instead of
    /// double-scoring. For dialogs the learner's turn is persisted before
    /// the model call, so an upstream failure never loses it.
    pub async fn submit(
        &self,
        chat_id: i64,
        input: AnswerInput,
    ) -> Result<SubmitOutcome, EngineError> {
        let (run, record) = self.active_position(chat_id).await?;
        let mut element = Element::from_record(&record)?;
        let handler = self.registry.handler_for(element.spec());

        let canonical = input.report_text(element.spec());
        let is_dialog = matches!(element.spec().kind, ElementKind::Dialog { .. });

        // Idempotent resubmission: an answer whose logging already completed
        // is acknowledged, not re-scored. The latest record tells the two
        // retry shapes apart from a legitimate re-presentation (revision
        // replay, goto loop): it is either the identical answer itself, or a
        // feedback record — feedback records carry the score pair, renders
        // never do. Dialogs are exempt; repeating yourself at a tutor is
        // legitimate conversation.
        if !is_dialog {
            if let Some(previous) = self.completed_submission(&run, &record, &canonical).await? {
                debug!(chat_id, element = %element.id, "replaying identical submission");
                return self.replay(&previous).await;
            }
        }

        let evaluation = if is_dialog {
            // The handler persists the learner's turn into the dialog
            // snapshot before calling the model, so an upstream failure
            // still leaves the turn durable; the report record is appended
            // either way.
            match handler
                .evaluate(&self.ctx(&run), &mut element, &record, &input)
                .await
            {
                Ok(evaluation) => {
                    self.append_answer(&run, &element, &canonical, None).await?;
                    evaluation
                }
                Err(err @ EngineError::Generation(_)) => {
                    self.append_answer(&run, &element, &canonical, None).await?;
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        } else {
            let evaluation = handler
                .evaluate(&self.ctx(&run), &mut element, &record, &input)
                .await?;
            // A goto must resolve before anything is logged, so a broken
            // branch target leaves the log untouched.
            if let NextStep::Goto(target) = &evaluation.next {
                let course = self.store.load(&record.course_id).await?;
                if course.get(target).is_none() {
                    return Err(EngineError::Definition(format!(
                        "jump target '{}' not in course '{}'",
                        target, record.course_id
                    )));
                }
            }
            self.append_answer(&run, &element, &canonical, evaluation.score)
                .await?;
            evaluation
        };

        if let Some(feedback) = &evaluation.feedback {
            self.append_bot(&run, &element, Some(feedback.clone()), evaluation.score)
                .await?;
        }

        let next = match &evaluation.next {
            NextStep::Stay | NextStep::Deferred => Vec::new(),
            NextStep::Advance => {
                let position = self.latest_record(chat_id).await?;
                self.advance_from(&run, &position).await?
            }
            NextStep::Goto(target) => {
                let course = self.store.load(&record.course_id).await?;
                let spec = course.get(target).ok_or_else(|| {
                    EngineError::Definition(format!(
                        "jump target '{}' not in course '{}'",
                        target, record.course_id
                    ))
                })?;
                self.render_chain(&run, &course, (target.clone(), spec.clone()))
                    .await?
            }
        };

        Ok(SubmitOutcome {
            feedback: evaluation.feedback,
            score: evaluation.score,
            next,
        })
    }

    /// Advance past the current element (continue buttons, auto-flow)
    ///
    /// An active revision chain is drained first; once empty, navigation
    /// resumes from the chain anchor's successor.
    pub async fn advance(&self, chat_id: i64) -> Result<Vec<RenderedElement>, EngineError> {
        let (run, record) = self.active_position(chat_id).await?;
        self.advance_from(&run, &record).await
    }

    /// Continue a run after its waiting entry fired
    pub async fn resume(
        &self,
        notification: &ReadyNotification,
    ) -> Result<Vec<RenderedElement>, EngineError> {
        let run = self
            .runs
            .latest_for_chat(notification.chat_id, &notification.course_id)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "no run of '{}' for chat {}",
                    notification.course_id, notification.chat_id
                ))
            })?;
        if run.ended {
            return Ok(Vec::new());
        }

        match &notification.target_element_id {
            Some(target) => {
                let course = self.store.load(&notification.course_id).await?;
                let spec = course.get(target).ok_or_else(|| {
                    EngineError::Definition(format!(
                        "waiting target '{}' not in course '{}'",
                        target, notification.course_id
                    ))
                })?;
                self.render_chain(&run, &course, (target.clone(), spec.clone()))
                    .await
            }
            None => self.advance(notification.chat_id).await,
        }
    }

    /// Latest record plus its run, rejecting ended runs
    async fn active_position(
        &self,
        chat_id: i64,
    ) -> Result<(Run, ConversationRecord), EngineError> {
        let record = self.latest_record(chat_id).await?;
        let run = self
            .runs
            .get(record.run_id)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?
            .ok_or_else(|| EngineError::NotFound(format!("run {}", record.run_id)))?;

        if run.ended {
            return Err(EngineError::NotFound(format!(
                "run {} has ended",
                run.run_id
            )));
        }

        Ok((run, record))
    }

    async fn latest_record(&self, chat_id: i64) -> Result<ConversationRecord, EngineError> {
        self.log
            .latest_for_chat(chat_id)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?
            .ok_or_else(|| EngineError::NotFound(format!("no active course for chat {}", chat_id)))
    }

    /// The user record of an already-completed identical submission, if the
    /// current position shows one
    async fn completed_submission(
        &self,
        run: &Run,
        record: &ConversationRecord,
        canonical: &str,
    ) -> Result<Option<ConversationRecord>, EngineError> {
        match record.role {
            // Crash between the answer append and the feedback append.
            RecordRole::User => {
                if record.report.as_deref() == Some(canonical) {
                    return Ok(Some(record.clone()));
                }
            }
            // A feedback record (it carries a score pair; renders don't):
            // the answer right before it may be the same submission.
            RecordRole::Bot if record.score.is_some() => {
                let previous = self
                    .log
                    .latest_user_of_element(record.chat_id, &record.element_id)
                    .await
                    .map_err(|e| EngineError::Database(e.to_string()))?;
                if let Some(previous) = previous {
                    if previous.run_id == run.run_id
                        && previous.report.as_deref() == Some(canonical)
                    {
                        return Ok(Some(previous));
                    }
                }
            }
            RecordRole::Bot => {}
        }
        Ok(None)
    }

    /// Reconstruct the outcome of an already-recorded submission
    async fn replay(&self, user_record: &ConversationRecord) -> Result<SubmitOutcome, EngineError> {
        let score = match (user_record.score, user_record.max_score) {
            (Some(score), Some(max_score)) => Some(ScorePair::new(score, max_score)),
            _ => None,
        };

        // The feedback, if any, is the bot record that followed the answer.
        let feedback = self
            .log
            .latest_of_element(user_record.chat_id, &user_record.element_id)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?
            .filter(|r| r.role == RecordRole::Bot && r.id > user_record.id)
            .and_then(|r| r.report);

        Ok(SubmitOutcome {
            feedback,
            score,
            next: Vec::new(),
        })
    }

    /// Advance from a known position: revision chain first, then `next`
    async fn advance_from(
        &self,
        run: &Run,
        record: &ConversationRecord,
    ) -> Result<Vec<RenderedElement>, EngineError> {
        let snapshot = Snapshot::from_record(record)?;

        let from_id = match &snapshot.revision {
            Some(chain) if !chain.queue.is_empty() => {
                let popped = revision::advance(&self.log, record)
                    .await?
                    .ok_or_else(|| EngineError::Conflict(record.id))?;

                let mut element = Element {
                    id: popped.entry.element_id.clone(),
                    course_id: record.course_id.clone(),
                    snapshot: Snapshot {
                        element: popped.entry.element,
                        revision: Some(popped.remaining),
                    },
                };
                let payload = self.render_one(run, &mut element).await?;
                return Ok(vec![payload]);
            }
            // Chain drained: resume from the anchor's successor.
            Some(chain) => chain.anchor_element_id.clone(),
            None => record.element_id.clone(),
        };

        let course = self.store.load(&record.course_id).await?;
        match nav::next(&course, &from_id) {
            Some((id, spec)) => {
                let start = (id.to_string(), spec.clone());
                self.render_chain(run, &course, start).await
            }
            None => {
                info!(course = %record.course_id, run = run.run_id, "course complete");
                Ok(Vec::new())
            }
        }
    }

    /// Render from `start`, logging each element and auto-advancing until
    /// one waits for input, the course ends, or the order runs out
    async fn render_chain(
        &self,
        run: &Run,
        course: &CourseDefinition,
        start: (String, ElementSpec),
    ) -> Result<Vec<RenderedElement>, EngineError> {
        let mut rendered = Vec::new();
        let (mut id, mut spec) = start;

        loop {
            let mut element = Element::new(id.clone(), course.course_id.clone(), spec);
            let payload = self.render_one(run, &mut element).await?;
            let waits = payload.waits_for_input;
            let is_end = matches!(element.spec().kind, ElementKind::End);
            rendered.push(payload);

            if waits || is_end {
                break;
            }
            match nav::next(course, &element.id) {
                Some((next_id, next_spec)) => {
                    id = next_id.to_string();
                    spec = next_spec.clone();
                }
                None => break,
            }
        }

        Ok(rendered)
    }

    /// Render one element and append its bot record
    async fn render_one(
        &self,
        run: &Run,
        element: &mut Element,
    ) -> Result<RenderedElement, EngineError> {
        let handler = self.registry.handler_for(element.spec());
        let payload = handler.render(&self.ctx(run), element).await?;

        let report = payload.text.clone().or_else(|| silent_report(element));
        self.append_bot(run, element, report, None).await?;

        Ok(payload)
    }

    async fn append_bot(
        &self,
        run: &Run,
        element: &Element,
        report: Option<String>,
        score: Option<ScorePair>,
    ) -> Result<i64, EngineError> {
        self.append_record(run, element, RecordRole::Bot, report, score)
            .await
    }

    async fn append_answer(
        &self,
        run: &Run,
        element: &Element,
        report: &str,
        score: Option<ScorePair>,
    ) -> Result<i64, EngineError> {
        self.append_record(run, element, RecordRole::User, Some(report.to_string()), score)
            .await
    }

    async fn append_record(
        &self,
        run: &Run,
        element: &Element,
        role: RecordRole,
        report: Option<String>,
        score: Option<ScorePair>,
    ) -> Result<i64, EngineError> {
        self.log
            .append(NewRecord {
                chat_id: run.chat_id,
                course_id: element.course_id.clone(),
                run_id: run.run_id,
                element_id: element.id.clone(),
                element_type: element.type_tag().to_string(),
                role,
                report,
                snapshot: element.snapshot.to_json()?,
                score: score.map(|s| s.score),
                max_score: score.map(|s| s.max_score),
            })
            .await
            .map_err(|e| EngineError::Database(e.to_string()))
    }
}

/// Log line for elements that show the learner nothing
fn silent_report(element: &Element) -> Option<String> {
    match &element.spec().kind {
        ElementKind::Delay { wait, goto } => Some(format!(
            "Silent delay to element '{}' for {}",
            goto, wait
        )),
        _ => None,
    }
}
