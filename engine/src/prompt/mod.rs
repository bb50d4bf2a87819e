//! Prompt variable resolver
//!
//! Dialog prompt templates may reference earlier elements with `{{ref}}`
//! tokens. A reference substitutes the referenced element's stored text, or
//! — for dialogs — a transcript of its conversation. Clip specs bound the
//! transcript: `N]element_id` keeps the first N turns, `element_id[M` the
//! last M; the element's own leading text line counts as turn 1.
//!
//! Resolution never fails: an unresolvable reference degrades to a literal
//! `NOT_FOUND` and a warning, so a missing element weakens the prompt
//! rather than blocking the dialog.

use regex::Regex;
use sdk::types::Role;
use std::sync::OnceLock;
use tracing::warn;

use crate::db::log::ConversationLog;
use crate::element::{ElementKind, Snapshot};

/// Sentinel substituted for references that cannot be resolved
pub const NOT_FOUND: &str = "NOT_FOUND";

fn comment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("comment regex compiles"))
}

fn var_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(.*?)\}\}").expect("variable regex compiles"))
}

/// Parsed `{{ref}}` token: the element id and the turn clip
///
/// A positive clip keeps the first N turns, a negative one the last M, zero
/// keeps everything. A malformed clip number degrades to the bare name.
fn parse_ref(raw: &str) -> (&str, i64) {
    if let Some(i) = raw.find(']') {
        if i > 0 {
            let name = &raw[i + 1..];
            return match raw[..i].parse::<i64>() {
                Ok(n) => (name, n),
                Err(_) => (name, 0),
            };
        }
    }
    if let Some(i) = raw.find('[') {
        if i > 0 {
            let name = &raw[..i];
            return match raw[i + 1..].parse::<i64>() {
                Ok(m) => (name, -m),
                Err(_) => (name, 0),
            };
        }
    }
    (raw, 0)
}

/// Resolves `{{ref}}` tokens against a chat's conversation history
pub struct PromptResolver<'a> {
    log: &'a ConversationLog,
}

impl<'a> PromptResolver<'a> {
    pub fn new(log: &'a ConversationLog) -> Self {
        Self { log }
    }

    /// Interpolate every reference in `template` against this run's history
    pub async fn resolve(&self, template: &str, run_id: i64) -> String {
        let stripped = comment_regex().replace_all(template, "");

        let mut resolved = String::with_capacity(stripped.len());
        let mut last_end = 0;
        for captures in var_regex().captures_iter(&stripped) {
            let whole = captures.get(0).expect("match exists");
            let raw = &captures[1];

            resolved.push_str(&stripped[last_end..whole.start()]);
            resolved.push_str(&self.lookup(raw, run_id).await);
            last_end = whole.end();
        }
        resolved.push_str(&stripped[last_end..]);

        resolved
    }

    async fn lookup(&self, raw: &str, run_id: i64) -> String {
        let (element_id, clip) = parse_ref(raw);

        let record = match self.log.latest_of_element_in_run(run_id, element_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(%element_id, "prompt reference not found among previous elements");
                return NOT_FOUND.to_string();
            }
            Err(e) => {
                warn!(%element_id, error = %e, "prompt reference lookup failed");
                return NOT_FOUND.to_string();
            }
        };

        let snapshot = match Snapshot::from_record(&record) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(%element_id, error = %e, "prompt reference snapshot unreadable");
                return NOT_FOUND.to_string();
            }
        };

        conversation_text(&snapshot, clip)
    }
}

/// Render a referenced element: its literal text, or — for a dialog with
/// turns — a transcript with the clip applied.
fn conversation_text(snapshot: &Snapshot, clip: i64) -> String {
    let base = snapshot.element.text.clone().unwrap_or_default();

    let ElementKind::Dialog { conversation, .. } = &snapshot.element.kind else {
        return base;
    };
    if conversation.is_empty() {
        return base;
    }

    let mut text = format!("### assistant:\n{}\n", base);
    // The leading text block counts as turn 1; `n` mirrors the clip math of
    // the transcript format, where the length includes the system turn.
    let mut i: i64 = 1;
    let n = conversation.len() as i64 + clip;
    for turn in conversation {
        if turn.role == Role::System {
            continue;
        }
        if clip < 0 && i == n {
            text.clear();
        }
        text.push_str(&format!("### {}:\n{}\n\n", turn.role, turn.content));
        i += 1;
        if clip > 0 && i >= clip {
            break;
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementSpec, Snapshot};
    use sdk::types::{ParseMode, Turn};

    fn dialog_snapshot(text: &str, turns: Vec<Turn>) -> Snapshot {
        Snapshot::new(ElementSpec {
            text: Some(text.to_string()),
            parse_mode: ParseMode::Markdown,
            link_preview: None,
            button: None,
            media: vec![],
            kind: ElementKind::Dialog {
                prompt: "p".to_string(),
                conversation: turns,
                model: None,
                temperature: None,
                reasoning: None,
                voice_response: false,
                tts_voice: None,
                tts_model: None,
                tts_speed: None,
            },
        })
    }

    fn sample_turns() -> Vec<Turn> {
        vec![
            Turn::system("be brief"),
            Turn::user("u1"),
            Turn::assistant("a1"),
            Turn::user("u2"),
            Turn::assistant("a2"),
        ]
    }

    #[test]
    fn parses_clip_specs() {
        assert_eq!(parse_ref("intro"), ("intro", 0));
        assert_eq!(parse_ref("3]d_1"), ("d_1", 3));
        assert_eq!(parse_ref("d_1[2"), ("d_1", -2));
        // malformed numbers degrade to a bare lookup of the name part
        assert_eq!(parse_ref("x]d_1"), ("d_1", 0));
        assert_eq!(parse_ref("d_1[y"), ("d_1", 0));
    }

    #[test]
    fn plain_elements_substitute_their_text() {
        let snapshot = Snapshot::new(ElementSpec {
            text: Some("the answer".to_string()),
            parse_mode: ParseMode::Markdown,
            link_preview: None,
            button: None,
            media: vec![],
            kind: ElementKind::Message,
        });
        assert_eq!(conversation_text(&snapshot, 0), "the answer");
    }

    #[test]
    fn dialog_transcript_skips_system_turns() {
        let snapshot = dialog_snapshot("intro", sample_turns());
        let text = conversation_text(&snapshot, 0);

        assert!(text.starts_with("### assistant:\nintro\n"));
        assert!(!text.contains("be brief"));
        assert!(text.contains("### user:\nu1\n"));
        assert!(text.contains("### assistant:\na2\n"));
    }

    #[test]
    fn positive_clip_keeps_leading_text_plus_first_turns() {
        let snapshot = dialog_snapshot("intro", sample_turns());
        let text = conversation_text(&snapshot, 2);

        // clip 2 = intro (turn 1) + first non-system turn
        assert!(text.contains("intro"));
        assert!(text.contains("u1"));
        assert!(!text.contains("a1"));
    }

    #[test]
    fn negative_clip_keeps_only_the_tail() {
        let snapshot = dialog_snapshot("intro", sample_turns());
        let text = conversation_text(&snapshot, -2);

        assert!(!text.contains("intro"));
        assert!(!text.contains("u1"));
        assert!(text.contains("u2"));
        assert!(text.contains("a2"));
    }

    #[tokio::test]
    async fn unresolvable_reference_degrades_to_sentinel() {
        let harness = crate::element::testutil::Harness::new().await;
        let resolver = PromptResolver::new(&harness.log);

        let resolved = resolver
            .resolve(
                "Context: {{missing_element}} <!-- a note -->and more",
                harness.run.run_id,
            )
            .await;
        assert_eq!(resolved, format!("Context: {} and more", NOT_FOUND));
    }
}
