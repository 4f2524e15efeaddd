//! crates/tutor_core/src/intent.rs
//!
//! Labels a learner reply as an answer, a question back to the tutor, or both.

use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::outcome::{FallbackReason, Outcome};
use crate::ports::{Prompt, PromptKind, ReasoningService};
use crate::reasoning::ask;
use crate::settings::TutorSettings;
use crate::text::{contains_phrase, is_numeric, normalize_phrase, tokens, word_count};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    DirectAnswer,
    Mixed,
    ReturnQuestion,
}

impl Intent {
    pub fn token(self) -> &'static str {
        match self {
            Intent::DirectAnswer => "DIRECT_ANSWER",
            Intent::Mixed => "MIXED",
            Intent::ReturnQuestion => "RETURN_QUESTION",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A classifier token as it arrives from the outside world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentLabel {
    Intent(Intent),
    Unrecognized(String),
}

impl IntentLabel {
    pub fn parse(token: &str) -> Self {
        match token.trim().to_uppercase().as_str() {
            "DIRECT_ANSWER" => IntentLabel::Intent(Intent::DirectAnswer),
            "MIXED" => IntentLabel::Intent(Intent::Mixed),
            "RETURN_QUESTION" => IntentLabel::Intent(Intent::ReturnQuestion),
            _ => IntentLabel::Unrecognized(token.to_string()),
        }
    }

    pub fn token(&self) -> &str {
        match self {
            IntentLabel::Intent(intent) => intent.token(),
            IntentLabel::Unrecognized(raw) => raw,
        }
    }
}

impl From<Intent> for IntentLabel {
    fn from(intent: Intent) -> Self {
        IntentLabel::Intent(intent)
    }
}

//=========================================================================================
// Classifier
//=========================================================================================

const CLASSIFICATION_INSTRUCTIONS: &str = r#"You label a learner's reply in a tutoring conversation.
Apply these rules in order and stop at the first that fits:
1. The reply attempts an answer AND asks something (a question, a request to explain) -> MIXED
2. The reply only asks a question or asks for clarification -> RETURN_QUESTION
3. The reply attempts an answer, however short or wrong, including "I don't know" -> DIRECT_ANSWER
Polite phrases such as "please" or "tell me" do not make a reply MIXED on their own.
Respond with exactly one token: DIRECT_ANSWER, MIXED or RETURN_QUESTION."#;

pub struct IntentClassifier {
    reasoning: Arc<dyn ReasoningService>,
    settings: Arc<TutorSettings>,
}

impl IntentClassifier {
    pub fn new(reasoning: Arc<dyn ReasoningService>, settings: Arc<TutorSettings>) -> Self {
        Self { reasoning, settings }
    }

    /// Service first, deterministic rules when the service can't give a valid token.
    pub async fn classify(&self, reply: &str) -> Intent {
        self.classify_with_service(reply).await.or_fallback(|reason| {
            let intent = classify_by_rules(reply, &self.settings);
            debug!(%reason, intent = intent.token(), "intent classified by rules");
            intent
        })
    }

    pub async fn classify_with_service(&self, reply: &str) -> Outcome<Intent> {
        let prompt = Prompt::new(
            PromptKind::IntentClassification,
            format!("{CLASSIFICATION_INSTRUCTIONS}\n\nLearner reply:\n\"\"\"\n{reply}\n\"\"\""),
            self.settings.classification_max_tokens,
        );
        ask(self.reasoning.as_ref(), &prompt).await.and_then(|text| parse_service_token(&text))
    }
}

fn parse_service_token(text: &str) -> Outcome<Intent> {
    let first = text
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_');
    match IntentLabel::parse(first) {
        IntentLabel::Intent(intent) => Outcome::Ok(intent),
        IntentLabel::Unrecognized(raw) => Outcome::Fallback(FallbackReason::UnrecognizedToken(raw)),
    }
}

//=========================================================================================
// Rule-based fallback
//=========================================================================================

const INTERROGATIVES: &[&str] = &[
    "what", "why", "how", "when", "where", "which", "who", "whom", "whose", "can", "could",
    "would", "should", "is", "are", "do", "does", "did", "will", "shall", "may", "kya", "kyun",
    "kyon", "kaise", "kab", "kahan", "kaun", "kitna", "kitne", "kitni",
];

const WEAK_MARKERS: &[&str] = &[
    "explain", "tell me", "clarify", "confused", "dont understand", "didnt understand",
    "not clear", "meaning of", "help me", "samjhao", "samjha do", "batao", "bata do", "matlab",
];

/// Words that carry no content on their own: politeness, hesitation, connectors.
const FILLERS: &[&str] = &[
    "ok", "okay", "hmm", "hm", "um", "uh", "please", "pls", "sir", "maam", "thanks", "thank",
    "sorry", "also", "and", "so", "well", "acha", "accha", "haan", "ji", "yeah", "but",
];

/// The strongest question cue found in a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cue {
    ExplicitQuestion,
    WeakQuestion,
    Statement,
    TooShort,
}

struct Segment {
    words: Vec<String>,
    question_like: bool,
}

fn first_content_word(words: &[String]) -> Option<&str> {
    words.iter().map(String::as_str).find(|w| !FILLERS.contains(w))
}

fn has_weak_marker(text: &str) -> bool {
    let normalized = normalize_phrase(text);
    WEAK_MARKERS.iter().any(|m| contains_phrase(&normalized, m))
}

/// Splits on sentence terminators that are followed by whitespace or the end,
/// so "3.5" stays in one piece.
fn segments(reply: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let chars: Vec<char> = reply.chars().collect();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        current.push(c);
        let at_boundary = chars.get(i + 1).map_or(true, |n| n.is_whitespace());
        if (matches!(c, '.' | '!' | '?') && at_boundary) || c == '\n' {
            push_segment(&mut out, &current);
            current.clear();
        }
    }
    push_segment(&mut out, &current);
    out
}

fn push_segment(out: &mut Vec<Segment>, raw: &str) {
    let trimmed = raw.trim();
    let words = tokens(trimmed);
    if words.is_empty() {
        return;
    }
    let question_like = trimmed.ends_with('?')
        || first_content_word(&words).is_some_and(|w| INTERROGATIVES.contains(&w))
        || has_weak_marker(trimmed);
    out.push(Segment { words, question_like });
}

fn cue(reply: &str, settings: &TutorSettings) -> Cue {
    let words = tokens(reply);
    let starts_interrogative = first_content_word(&words).is_some_and(|w| INTERROGATIVES.contains(&w));
    let alnum = reply.chars().filter(|c| c.is_alphanumeric()).count();

    match () {
        _ if starts_interrogative || reply.contains('?') => Cue::ExplicitQuestion,
        _ if has_weak_marker(reply) => Cue::WeakQuestion,
        _ if alnum >= settings.min_meaningful_chars => Cue::Statement,
        _ => Cue::TooShort,
    }
}

/// A non-question sentence with real content next to the question.
fn carries_statement(reply: &str) -> bool {
    segments(reply).iter().any(|segment| {
        !segment.question_like
            && (segment.words.iter().any(|w| is_numeric(w))
                || segment.words.iter().filter(|w| !FILLERS.contains(&w.as_str())).count() >= 2)
    })
}

/// Deterministic classification used whenever the service can't be trusted.
pub fn classify_by_rules(reply: &str, settings: &TutorSettings) -> Intent {
    let looks_mixed = || word_count(reply) > settings.long_message_words || carries_statement(reply);

    match cue(reply, settings) {
        Cue::ExplicitQuestion | Cue::WeakQuestion if looks_mixed() => Intent::Mixed,
        Cue::ExplicitQuestion | Cue::WeakQuestion => Intent::ReturnQuestion,
        Cue::Statement => Intent::DirectAnswer,
        Cue::TooShort => Intent::ReturnQuestion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedReasoning;

    fn rules(reply: &str) -> Intent {
        classify_by_rules(reply, &TutorSettings::default())
    }

    #[test]
    fn plain_question_is_a_return_question() {
        assert_eq!(rules("What is resonance?"), Intent::ReturnQuestion);
    }

    #[test]
    fn short_statement_is_a_direct_answer() {
        assert_eq!(rules("Yes, it's 42"), Intent::DirectAnswer);
        assert_eq!(rules("I don't know"), Intent::DirectAnswer);
    }

    #[test]
    fn answer_followed_by_question_is_mixed() {
        assert_eq!(
            rules("The answer is 3. Also, can you show how to derive it?"),
            Intent::Mixed
        );
    }

    #[test]
    fn long_questions_are_mixed() {
        let reply = "why does the frequency of the driving force need to match the natural \
                     frequency of the system for the amplitude to grow this much";
        assert_eq!(rules(reply), Intent::Mixed);
    }

    #[test]
    fn polite_preface_does_not_force_mixed() {
        assert_eq!(rules("Please tell me what resonance means"), Intent::ReturnQuestion);
        assert_eq!(rules("Please explain it again"), Intent::ReturnQuestion);
    }

    #[test]
    fn weak_marker_with_an_answer_is_mixed() {
        assert_eq!(rules("Plants make food from light. Please explain the rest"), Intent::Mixed);
    }

    #[test]
    fn hinglish_interrogatives_count() {
        assert_eq!(rules("kya matlab hai iska"), Intent::ReturnQuestion);
    }

    #[test]
    fn decimals_do_not_split_sentences() {
        assert_eq!(rules("It is 3.5 metres"), Intent::DirectAnswer);
    }

    #[test]
    fn too_short_to_interpret() {
        assert_eq!(rules("k"), Intent::ReturnQuestion);
        assert_eq!(rules(""), Intent::ReturnQuestion);
    }

    #[test]
    fn rules_are_deterministic() {
        let reply = "The answer is 3. Also, can you show how to derive it?";
        let first = rules(reply);
        for _ in 0..10 {
            assert_eq!(rules(reply), first);
        }
    }

    #[test]
    fn labels_round_trip_tokens() {
        assert_eq!(IntentLabel::parse("mixed"), IntentLabel::Intent(Intent::Mixed));
        assert_eq!(IntentLabel::parse("SHRUG"), IntentLabel::Unrecognized("SHRUG".into()));
        assert_eq!(IntentLabel::from(Intent::DirectAnswer).token(), "DIRECT_ANSWER");
    }

    #[tokio::test]
    async fn service_token_wins_when_valid() {
        let reasoning = ScriptedReasoning::new();
        reasoning.push(PromptKind::IntentClassification, "**MIXED** because it asks too");
        let classifier = IntentClassifier::new(Arc::new(reasoning), Arc::new(TutorSettings::default()));
        assert_eq!(classifier.classify("What is resonance?").await, Intent::Mixed);
    }

    #[tokio::test]
    async fn invalid_service_token_falls_back_to_rules() {
        let reasoning = ScriptedReasoning::new();
        reasoning.push(PromptKind::IntentClassification, "ANSWERISH");
        let classifier = IntentClassifier::new(Arc::new(reasoning), Arc::new(TutorSettings::default()));

        assert_eq!(
            classifier.classify_with_service("Yes, it's 42").await,
            Outcome::Fallback(FallbackReason::UnrecognizedToken("ANSWERISH".into()))
        );
        assert_eq!(classifier.classify("Yes, it's 42").await, Intent::DirectAnswer);
    }

    #[tokio::test]
    async fn service_errors_fall_back_to_rules() {
        let reasoning = ScriptedReasoning::new();
        reasoning.push(PromptKind::IntentClassification, "Error: upstream unavailable");
        let classifier = IntentClassifier::new(Arc::new(reasoning), Arc::new(TutorSettings::default()));
        assert_eq!(classifier.classify("What is resonance?").await, Intent::ReturnQuestion);
    }
}
