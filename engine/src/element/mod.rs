//! Element variant model and registry
//!
//! A course is an ordered sequence of typed elements. Each element kind is a
//! variant of [`ElementKind`] sharing the common fields of [`ElementSpec`],
//! and is dispatched through the [`ElementRegistry`] to a handler
//! implementing the uniform render/evaluate capability interface.
//!
//! The snapshot stored with every conversation record embeds the element
//! spec as it looked when the record was written, so revision replays and
//! prompt references are immune to later course edits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::types::{Button, ParseMode, RenderedElement, ScorePair, Turn};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::db::log::{ConversationLog, ConversationRecord};
use crate::db::runs::{Run, RunStore};
use crate::db::waiting::WaitingStore;
use crate::llm::ChatModel;

pub mod audio;
pub mod delay;
pub mod dialog;
pub mod duration;
pub mod end;
pub mod input;
pub mod jump;
pub mod media;
pub mod message;
pub mod multichoice;
pub mod question;
pub mod quiz;
pub mod revision;
pub mod unknown;

#[cfg(test)]
pub(crate) mod testutil;

pub use duration::parse_duration;

/// Deserialize a course-script flag
///
/// Authors write `yes`/`no` as much as `true`/`false`; YAML 1.2 parses the
/// former as strings, so both shapes are accepted here.
fn de_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    struct FlagVisitor;

    impl Visitor<'_> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "a boolean or yes/no")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
            match v.to_lowercase().as_str() {
                "yes" | "true" | "1" | "on" => Ok(true),
                "no" | "false" | "0" | "off" => Ok(false),
                other => Err(E::custom(format!("invalid flag '{}'", other))),
            }
        }
    }

    deserializer.deserialize_any(FlagVisitor)
}

/// `de_flag` for optional fields
fn de_opt_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "de_flag")] bool);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
}

/// One answer of a quiz, question or multichoice element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub text: String,

    /// Whether selecting this answer is (or contributes to) the correct one
    #[serde(default, deserialize_with = "de_flag")]
    pub correct: bool,

    /// Per-answer feedback shown after selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// One option of a jump element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JumpOption {
    pub text: String,

    /// Branch target; selecting resumes from this element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goto: Option<String>,

    /// Duration string; selecting schedules a deferred continuation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<String>,
}

/// Normalization mode of an input element
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Trim and casefold both sides, exact equality
    #[default]
    Text,

    /// Strip every non-digit character from both sides, exact equality
    Sequence,
}

/// Error-percentage threshold key of a test element's score table
///
/// Thresholds arrive as YAML numbers and live as JSON string keys inside
/// snapshots, so deserialization accepts both shapes. Ordering is numeric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold(pub f64);

impl Eq for Threshold {}

impl Ord for Threshold {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for Threshold {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Threshold {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_score(self.0))
    }
}

impl<'de> Deserialize<'de> for Threshold {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ThresholdVisitor;

        impl Visitor<'_> for ThresholdVisitor {
            type Value = Threshold;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a numeric error-percentage threshold")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Threshold, E> {
                Ok(Threshold(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Threshold, E> {
                Ok(Threshold(v as f64))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Threshold, E> {
                Ok(Threshold(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Threshold, E> {
                v.parse::<f64>()
                    .map(Threshold)
                    .map_err(|_| E::custom(format!("invalid threshold '{}'", v)))
            }
        }

        deserializer.deserialize_any(ThresholdVisitor)
    }
}

/// Format a score without trailing zeros: 7.0 renders as "7", 0.5 as "0.5"
pub fn format_score(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Type-specific payload of an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementKind {
    Message,

    Audio,

    Quiz {
        answers: Vec<Answer>,
    },

    Question {
        answers: Vec<Answer>,
    },

    MultiChoice {
        answers: Vec<Answer>,
        feedback_correct: String,
        feedback_partial: String,
        feedback_incorrect: String,
    },

    Input {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correct_answer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback_correct: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback_incorrect: Option<String>,
        #[serde(default)]
        input_type: InputMode,
    },

    Dialog {
        /// System prompt template, resolved through the prompt variable
        /// resolver on the first turn
        prompt: String,

        /// Conversation so far; empty until the first learner turn
        #[serde(default)]
        conversation: Vec<Turn>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temperature: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,

        /// Voice response settings, carried for the delivery layer
        #[serde(default, deserialize_with = "de_flag")]
        voice_response: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tts_voice: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tts_model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tts_speed: Option<f64>,
    },

    Test {
        prefix: String,

        /// Ascending error-percentage thresholds mapped to feedback text
        score: BTreeMap<Threshold, String>,
    },

    Revision {
        prefix: String,

        /// Shown when no mistakes were found under the prefix
        #[serde(default, skip_serializing_if = "Option::is_none")]
        no_mistakes: Option<String>,
    },

    Jump {
        options: Vec<JumpOption>,
    },

    Delay {
        /// Duration string in the shared grammar
        wait: String,

        /// Element to continue from once the delay fires
        goto: String,
    },

    End,

    /// Any type tag this engine does not implement. Rendered as a
    /// placeholder and skipped by the navigation resolver.
    #[serde(other)]
    Unknown,
}

impl ElementKind {
    /// Registry key of this kind
    pub fn type_tag(&self) -> &'static str {
        match self {
            ElementKind::Message => "message",
            ElementKind::Audio => "audio",
            ElementKind::Quiz { .. } => "quiz",
            ElementKind::Question { .. } => "question",
            ElementKind::MultiChoice { .. } => "multi_choice",
            ElementKind::Input { .. } => "input",
            ElementKind::Dialog { .. } => "dialog",
            ElementKind::Test { .. } => "test",
            ElementKind::Revision { .. } => "revision",
            ElementKind::Jump { .. } => "jump",
            ElementKind::Delay { .. } => "delay",
            ElementKind::End => "end",
            ElementKind::Unknown => "unknown",
        }
    }
}

/// One element spec: common fields plus the type-specific payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default)]
    pub parse_mode: ParseMode,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_opt_flag"
    )]
    pub link_preview: Option<bool>,

    /// A single continue button; present on messages, tests and revisions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<String>,

    /// Media URLs, resolved to direct-download links at render time
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,

    #[serde(flatten)]
    pub kind: ElementKind,
}

impl ElementSpec {
    /// Whether progression pauses on this element until the learner responds
    pub fn waits_for_input(&self) -> bool {
        match &self.kind {
            ElementKind::Message => self.button.is_some(),
            ElementKind::Audio => false,
            ElementKind::Test { .. } => self.button.is_some(),
            ElementKind::Unknown => false,
            _ => true,
        }
    }

    /// Buttons the delivery layer should offer for this element
    pub fn buttons(&self) -> Vec<Button> {
        match &self.kind {
            ElementKind::Quiz { answers }
            | ElementKind::Question { answers }
            | ElementKind::MultiChoice { answers, .. } => answers
                .iter()
                .enumerate()
                .map(|(i, a)| Button {
                    text: a.text.clone(),
                    payload: i.to_string(),
                })
                .collect(),
            ElementKind::Jump { options } => options
                .iter()
                .enumerate()
                .map(|(i, o)| Button {
                    text: o.text.clone(),
                    payload: i.to_string(),
                })
                .collect(),
            _ => self
                .button
                .iter()
                .map(|label| Button {
                    text: label.clone(),
                    payload: "continue".to_string(),
                })
                .collect(),
        }
    }

    /// Whether the transport may render a link preview
    ///
    /// Defaults to off for buttoned messages and dialogs, on otherwise.
    pub fn link_preview(&self) -> bool {
        self.link_preview.unwrap_or(
            !(self.button.is_some() || matches!(self.kind, ElementKind::Dialog { .. })),
        )
    }
}

/// The mistake-retry chain attached to a record's snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevisionChain {
    /// The revision element that built this chain; navigation resumes from
    /// its successor once the queue drains
    pub anchor_element_id: String,

    pub queue: Vec<QueueEntry>,
}

/// One queued replay: the element's id and its spec as snapshotted at
/// initiation time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    pub element_id: String,
    pub element: ElementSpec,
}

/// What a conversation record stores about its element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub element: ElementSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionChain>,
}

impl Snapshot {
    pub fn new(element: ElementSpec) -> Self {
        Self {
            element,
            revision: None,
        }
    }

    pub fn from_record(record: &ConversationRecord) -> Result<Self, EngineError> {
        serde_json::from_str(&record.snapshot).map_err(|e| {
            EngineError::Definition(format!(
                "corrupt snapshot on record {}: {}",
                record.id, e
            ))
        })
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string(self)
            .map_err(|e| EngineError::Definition(format!("unserializable snapshot: {}", e)))
    }
}

/// Re-read, mutate and write back a record's snapshot under the version stamp
///
/// The two sanctioned in-place updates (dialog growth, revision pop) go
/// through here. A stale stamp triggers one re-read-and-retry before the
/// conflict is surfaced.
pub async fn mutate_snapshot<F>(
    log: &ConversationLog,
    record_id: i64,
    mut apply: F,
) -> Result<Snapshot, EngineError>
where
    F: FnMut(&mut Snapshot) -> Result<(), EngineError>,
{
    for attempt in 0..2 {
        let record = log
            .get(record_id)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?
            .ok_or_else(|| EngineError::NotFound(format!("conversation record {}", record_id)))?;

        let mut snapshot = Snapshot::from_record(&record)?;
        apply(&mut snapshot)?;

        match log
            .update_snapshot(record.id, &snapshot.to_json()?, record.version)
            .await
        {
            Ok(()) => return Ok(snapshot),
            Err(EngineError::Conflict(_)) if attempt == 0 => continue,
            Err(e) => return Err(e),
        }
    }

    Err(EngineError::Conflict(record_id))
}

/// One element bound to its position in a course
#[derive(Debug, Clone)]
pub struct Element {
    pub id: String,
    pub course_id: String,
    pub snapshot: Snapshot,
}

impl Element {
    pub fn new(id: impl Into<String>, course_id: impl Into<String>, spec: ElementSpec) -> Self {
        Self {
            id: id.into(),
            course_id: course_id.into(),
            snapshot: Snapshot::new(spec),
        }
    }

    pub fn from_record(record: &ConversationRecord) -> Result<Self, EngineError> {
        Ok(Self {
            id: record.element_id.clone(),
            course_id: record.course_id.clone(),
            snapshot: Snapshot::from_record(record)?,
        })
    }

    pub fn spec(&self) -> &ElementSpec {
        &self.snapshot.element
    }

    pub fn type_tag(&self) -> &'static str {
        self.snapshot.element.kind.type_tag()
    }

    /// Base outbound payload with the common fields filled in
    pub fn base_payload(&self) -> RenderedElement {
        let spec = self.spec();
        RenderedElement {
            element_id: self.id.clone(),
            element_type: spec.kind.type_tag().to_string(),
            text: spec.text.clone(),
            parse_mode: spec.parse_mode,
            link_preview: spec.link_preview(),
            media: spec.media.iter().map(|u| media::direct_download_link(u)).collect(),
            buttons: spec.buttons(),
            waits_for_input: spec.waits_for_input(),
        }
    }
}

/// The answer payload of a submission
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerInput {
    /// Index of the selected answer/option
    Index(usize),

    /// Set of selected answer indexes (multichoice)
    Selection(Vec<usize>),

    /// Free text (input and dialog elements)
    Text(String),
}

impl AnswerInput {
    /// Canonical report text stored in the learner's log record; also the
    /// key for idempotent-resubmission detection.
    pub fn report_text(&self, spec: &ElementSpec) -> String {
        match (self, &spec.kind) {
            (AnswerInput::Index(i), ElementKind::Quiz { answers })
            | (AnswerInput::Index(i), ElementKind::Question { answers }) => answers
                .get(*i)
                .map(|a| a.text.clone())
                .unwrap_or_else(|| i.to_string()),
            (AnswerInput::Index(i), ElementKind::Jump { options }) => options
                .get(*i)
                .map(|o| o.text.clone())
                .unwrap_or_else(|| i.to_string()),
            (AnswerInput::Selection(set), ElementKind::MultiChoice { answers, .. }) => set
                .iter()
                .filter_map(|i| answers.get(*i).map(|a| a.text.as_str()))
                .collect::<Vec<_>>()
                .join(", "),
            (AnswerInput::Text(text), _) => text.clone(),
            (AnswerInput::Index(i), _) => i.to_string(),
            (AnswerInput::Selection(set), _) => set
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// What happens after an answer is accepted
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    /// Move to the following element
    Advance,

    /// The element keeps the floor (unfinished dialog)
    Stay,

    /// Branch to a specific element
    Goto(String),

    /// A waiting entry was registered; progression resumes on sweep
    Deferred,
}

/// Result of evaluating a submission
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub feedback: Option<String>,
    pub score: Option<ScorePair>,
    pub next: NextStep,
}

impl Evaluation {
    pub fn advance() -> Self {
        Self {
            feedback: None,
            score: None,
            next: NextStep::Advance,
        }
    }
}

/// Collaborators available to element handlers
pub struct RenderContext<'a> {
    pub run: &'a Run,
    pub runs: &'a RunStore,
    pub log: &'a ConversationLog,
    pub waiting: &'a WaitingStore,
    pub llm: &'a dyn ChatModel,
    pub llm_defaults: &'a LlmConfig,
    pub now: DateTime<Utc>,
}

/// Uniform capability interface of an element kind
///
/// `render` may have side effects (registering a waiting entry, building a
/// revision chain, ending the run) and may amend the element's snapshot;
/// the caller persists the snapshot with the rendered record. `evaluate` is
/// only called for answerable kinds; the default rejects the submission.
#[async_trait]
pub trait ElementHandler: Send + Sync {
    fn type_tag(&self) -> &'static str;

    async fn render(
        &self,
        ctx: &RenderContext<'_>,
        element: &mut Element,
    ) -> Result<RenderedElement, EngineError>;

    async fn evaluate(
        &self,
        _ctx: &RenderContext<'_>,
        element: &mut Element,
        _record: &ConversationRecord,
        _input: &AnswerInput,
    ) -> Result<Evaluation, EngineError> {
        Err(EngineError::Validation(format!(
            "element '{}' does not accept answers",
            element.id
        )))
    }
}

/// Registry mapping type tags to handlers
pub struct ElementRegistry {
    handlers: HashMap<&'static str, Arc<dyn ElementHandler>>,
    fallback: Arc<dyn ElementHandler>,
}

impl ElementRegistry {
    /// Registry with every built-in element kind registered
    pub fn standard() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
            fallback: Arc::new(unknown::UnknownHandler),
        };

        registry.register(Arc::new(message::MessageHandler));
        registry.register(Arc::new(audio::AudioHandler));
        registry.register(Arc::new(quiz::QuizHandler));
        registry.register(Arc::new(question::QuestionHandler));
        registry.register(Arc::new(multichoice::MultiChoiceHandler));
        registry.register(Arc::new(input::InputHandler));
        registry.register(Arc::new(dialog::DialogHandler));
        registry.register(Arc::new(test::TestHandler));
        registry.register(Arc::new(revision::RevisionHandler));
        registry.register(Arc::new(jump::JumpHandler));
        registry.register(Arc::new(delay::DelayHandler));
        registry.register(Arc::new(end::EndHandler));

        registry
    }

    pub fn register(&mut self, handler: Arc<dyn ElementHandler>) {
        self.handlers.insert(handler.type_tag(), handler);
    }

    /// Handler for a spec; unimplemented kinds get the placeholder handler
    pub fn handler_for(&self, spec: &ElementSpec) -> Arc<dyn ElementHandler> {
        self.handlers
            .get(spec.kind.type_tag())
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}
