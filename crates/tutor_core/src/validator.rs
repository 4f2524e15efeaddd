//! crates/tutor_core/src/validator.rs
//!
//! Gates a learner reply before it is scored. Rejections are not errors: they
//! produce a corrective re-ask and leave the session where it was.

use regex::Regex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::language::LanguageStyle;
use crate::outcome::{FallbackReason, Outcome};
use crate::ports::{Prompt, PromptKind, ReasoningService};
use crate::reasoning::ask;
use crate::settings::TutorSettings;
use crate::text::{
    contains_phrase, is_numeric, is_stop_word, keywords, keywords_match, normalize_phrase, tokens,
    truncate_words, word_count,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    Emoji,
    Gibberish,
    Irrelevant,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::Emoji => "emoji",
            Rejection::Gibberish => "gibberish",
            Rejection::Irrelevant => "irrelevant",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of the gate a reply goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateScope {
    /// Every check, including keyword relevance against the current question.
    Full,
    /// Noise and off-topic/meta checks only; questions back to the tutor may
    /// legitimately share no words with the current question.
    MetaOnly,
}

//=========================================================================================
// Individual checks
//=========================================================================================

const IGNORANCE_PHRASES: &[&str] = &[
    "i dont know", "i do not know", "dont know", "idk", "dunno", "no idea", "not sure",
    "i have no idea", "i am not sure", "im not sure", "pata nahi", "nahi pata", "mujhe nahi pata",
    "pta nahi", "nahi pta", "maloom nahi", "nahi maloom", "malum nahi", "nahi malum",
    "mujhe nahi maloom", "nahi aata", "samajh nahi aaya", "yaad nahi",
];

/// Chit-chat openers; only decisive on short replies.
const CHIT_CHAT_OPENERS: &[&str] = &[
    "i like", "i love", "i hate", "my favorite", "my favourite", "how are you", "whats up",
    "good morning", "good night", "tell me a joke", "i am bored", "im bored", "lol", "lmao",
];

/// Questions about the product or the tutor itself.
const META_PHRASES: &[&str] = &[
    "who are you", "what is your name", "whats your name", "who made you", "who created you",
    "are you a bot", "are you an ai", "are you human", "chatgpt", "openai", "gemini",
    "subscription", "pricing", "refund", "customer support", "contact support", "customer care",
    "delete my account", "reset my password", "app is not working", "app crash", "premium plan",
];

/// Padding that can surround an admission without adding an answer to it.
const ADMISSION_FILLERS: &[&str] = &[
    "sorry", "really", "honestly", "actually", "sir", "maam", "mam", "yaar", "bhai", "bro", "um",
    "umm", "uh", "hmm", "ok", "okay", "please", "lol", "i", "im", "am", "yet", "at", "abhi", "ji",
    "bilkul", "sach", "mujhe", "iska", "iske", "baare",
];

const CHIT_CHAT_MAX_WORDS: usize = 6;

/// True only when the reply is the admission and nothing more. A hedge in
/// front of an actual answer ("not sure, but I think...") does not count.
pub fn is_admission_of_ignorance(reply: &str) -> bool {
    let normalized = normalize_phrase(reply);
    if !IGNORANCE_PHRASES.iter().any(|p| contains_phrase(&normalized, p)) {
        return false;
    }
    let mut phrases = IGNORANCE_PHRASES.to_vec();
    phrases.sort_by_key(|p| std::cmp::Reverse(p.len()));
    let mut rest = format!(" {normalized} ");
    for phrase in phrases {
        let padded = format!(" {phrase} ");
        while rest.contains(&padded) {
            rest = rest.replace(&padded, " ");
        }
    }
    rest.split_whitespace()
        .all(|w| ADMISSION_FILLERS.contains(&w) || is_stop_word(w))
}

pub fn is_emoji_only(reply: &str) -> bool {
    let trimmed = reply.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_alphanumeric) {
        return false;
    }
    trimmed.chars().count() <= 3
        || trimmed.chars().all(|c| c.is_whitespace() || !c.is_control())
}

fn is_vowel(c: char) -> bool {
    matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u' | 'y')
}

fn longest_run(text: &str, pred: impl Fn(char) -> bool) -> usize {
    let (mut best, mut run) = (0, 0);
    for c in text.chars() {
        if pred(c) {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best
}

fn longest_repeat(text: &str) -> usize {
    let (mut best, mut run, mut prev) = (0, 0, None);
    for c in text.chars() {
        if Some(c) == prev {
            run += 1;
        } else {
            run = 1;
            prev = Some(c);
        }
        best = best.max(run);
    }
    best
}

/// A single token that could plausibly be a real word.
fn is_dictionary_like(word: &str) -> bool {
    let word = word.trim_matches(|c: char| !c.is_alphanumeric());
    let len = word.chars().count();
    if len == 0 || len > 24 || !word.chars().all(char::is_alphabetic) {
        return false;
    }
    if !word.is_ascii() {
        return true;
    }
    word.chars().any(is_vowel)
        && longest_run(word, |c| !is_vowel(c)) < 5
        && longest_repeat(word) <= 2
}

fn alpha_ratio(reply: &str) -> f64 {
    let visible: Vec<char> = reply.chars().filter(|c| !c.is_whitespace()).collect();
    if visible.is_empty() {
        return 0.0;
    }
    let letters = visible.iter().filter(|c| c.is_alphabetic()).count();
    letters as f64 / visible.len() as f64
}

/// Terse expected answers (numbers, a word or two) make terse replies legitimate.
fn expects_terse_reply(expected_answer: Option<&str>) -> bool {
    expected_answer.is_some_and(|e| is_numeric(e.trim()) || word_count(e) <= 3)
}

pub fn is_gibberish(reply: &str, expected_answer: Option<&str>, settings: &TutorSettings) -> bool {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return true;
    }
    let relaxed = expects_terse_reply(expected_answer);
    let words: Vec<&str> = trimmed.split_whitespace().collect();

    if longest_repeat(trimmed) > settings.max_repeated_chars {
        return true;
    }

    if !relaxed && words.len() < settings.min_reply_words {
        let exempt = words.len() == 1 && (is_dictionary_like(words[0]) || is_numeric(words[0]));
        if !exempt {
            return true;
        }
    }

    let bare_number = words.len() == 1 && is_numeric(words[0]);
    if !relaxed && !bare_number && alpha_ratio(trimmed) < settings.gibberish_alpha_ratio {
        return true;
    }

    let letters: Vec<char> = trimmed.chars().filter(|c| c.is_alphabetic()).collect();
    words.len() > 1
        && !letters.is_empty()
        && letters.iter().all(char::is_ascii)
        && !letters.iter().any(|c| is_vowel(*c))
}

/// Small talk and questions about the product rather than the lesson.
pub fn is_off_topic(reply: &str) -> bool {
    let normalized = normalize_phrase(reply);
    if META_PHRASES.iter().any(|p| contains_phrase(&normalized, p)) {
        return true;
    }
    word_count(&normalized) <= CHIT_CHAT_MAX_WORDS && opens_with_chit_chat(&normalized)
}

fn opens_with_chit_chat(normalized: &str) -> bool {
    CHIT_CHAT_OPENERS
        .iter()
        .any(|p| normalized == *p || normalized.starts_with(&format!("{p} ")))
}

/// Keyword overlap between the reply and the current question (plus the expected answer).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Relevance {
    pub matched: usize,
    pub total: usize,
    pub score: f64,
}

pub fn keyword_relevance(reply: &str, question: &str, expected_answer: Option<&str>) -> Relevance {
    let mut wanted = keywords(question);
    if let Some(expected) = expected_answer {
        for kw in keywords(expected) {
            if !wanted.contains(&kw) {
                wanted.push(kw);
            }
        }
    }
    if wanted.is_empty() {
        return Relevance { matched: 0, total: 0, score: 0.5 };
    }

    let offered = keywords(reply);
    let matched = wanted
        .iter()
        .filter(|w| offered.iter().any(|o| keywords_match(w, o)))
        .count();
    Relevance {
        matched,
        total: wanted.len(),
        score: matched as f64 / wanted.len() as f64,
    }
}

fn number_regex() -> &'static Regex {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    NUMBER.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").expect("number regex is valid"))
}

/// Reads a 0-1 relevance from service text; percentages are scaled down.
fn parse_relevance(text: &str) -> Outcome<f64> {
    let Some(found) = number_regex().find(text) else {
        return Outcome::Fallback(FallbackReason::Malformed(format!("no number in '{text}'")));
    };
    match found.as_str().parse::<f64>() {
        Ok(v) if v <= 1.0 => Outcome::Ok(v),
        Ok(v) if v <= 100.0 => Outcome::Ok(v / 100.0),
        _ => Outcome::Fallback(FallbackReason::Malformed(format!("out of range: '{text}'"))),
    }
}

//=========================================================================================
// Validator
//=========================================================================================

pub struct MessageValidator {
    reasoning: Option<Arc<dyn ReasoningService>>,
    settings: Arc<TutorSettings>,
}

impl MessageValidator {
    pub fn new(reasoning: Option<Arc<dyn ReasoningService>>, settings: Arc<TutorSettings>) -> Self {
        Self { reasoning, settings }
    }

    /// `None` means the reply is accepted.
    pub async fn categorize(
        &self,
        reply: &str,
        question: &str,
        expected_answer: Option<&str>,
        scope: GateScope,
    ) -> Option<Rejection> {
        if let Some(rejection) = screen(reply, expected_answer, scope, &self.settings) {
            return rejection;
        }

        if expected_answer.is_some_and(|e| is_numeric(e.trim()))
            && tokens(reply).iter().any(|t| is_numeric(t))
        {
            return None;
        }

        let heuristic = keyword_relevance(reply, question, expected_answer);
        let heuristic_ok = heuristic.total == 0 || heuristic.matched >= self.settings.min_keyword_overlap;

        let service = match &self.reasoning {
            Some(reasoning) => self.service_relevance(reasoning.as_ref(), reply, question).await,
            None => Outcome::Fallback(FallbackReason::ServiceError("no reasoning service".into())),
        };

        let accepted = match service {
            Outcome::Ok(score) if score <= self.settings.decisive_irrelevance => false,
            Outcome::Ok(score) => {
                heuristic_ok || heuristic.score.max(score) >= self.settings.relevance_threshold
            }
            // Without a service verdict only obvious small talk is sent back.
            Outcome::Fallback(reason) => {
                debug!(%reason, "relevance service unavailable, failing open");
                heuristic_ok
                    || heuristic.matched > 0
                    || word_count(reply) < 2
                    || !opens_with_chit_chat(&normalize_phrase(reply))
            }
        };
        debug!(
            matched = heuristic.matched,
            total = heuristic.total,
            accepted,
            "relevance checked"
        );
        (!accepted).then_some(Rejection::Irrelevant)
    }

    pub async fn service_relevance(
        &self,
        reasoning: &dyn ReasoningService,
        reply: &str,
        question: &str,
    ) -> Outcome<f64> {
        let prompt = Prompt::new(
            PromptKind::Relevance,
            format!(
                "Rate how relevant the learner's reply is to the tutor's question, from 0 (unrelated) \
                 to 1 (on topic). A wrong but on-topic answer is still relevant.\n\
                 Question: {question}\nReply: {reply}\nRespond with only the number."
            ),
            self.settings.relevance_max_tokens,
        );
        ask(reasoning, &prompt).await.and_then(|text| parse_relevance(&text))
    }
}

/// The checks that never need the reasoning service, in priority order.
/// `Some(None)` is an early accept; `None` means keep going.
fn screen(
    reply: &str,
    expected_answer: Option<&str>,
    scope: GateScope,
    settings: &TutorSettings,
) -> Option<Option<Rejection>> {
    match reply.trim() {
        _ if is_admission_of_ignorance(reply) => Some(None),
        "" => Some(Some(Rejection::Gibberish)),
        _ if is_emoji_only(reply) => Some(Some(Rejection::Emoji)),
        _ if is_gibberish(reply, expected_answer, settings) => Some(Some(Rejection::Gibberish)),
        _ if is_off_topic(reply) => Some(Some(Rejection::Irrelevant)),
        _ if scope == GateScope::MetaOnly => Some(None),
        _ => None,
    }
}

/// Names the problem in the learner's register and re-asks the question.
pub fn corrective_message(
    rejection: Rejection,
    language: LanguageStyle,
    question: &str,
    reask_words: usize,
) -> String {
    let problem = match rejection {
        Rejection::Emoji => language.emoji_problem(),
        Rejection::Gibberish => language.gibberish_problem(),
        Rejection::Irrelevant => language.irrelevant_problem(),
    };
    format!(
        "{problem}\n\n{} {}",
        language.reask_prefix(),
        truncate_words(question, reask_words)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedReasoning;

    fn offline() -> MessageValidator {
        MessageValidator::new(None, Arc::new(TutorSettings::default()))
    }

    fn with_service(reasoning: ScriptedReasoning) -> MessageValidator {
        MessageValidator::new(Some(Arc::new(reasoning)), Arc::new(TutorSettings::default()))
    }

    #[tokio::test]
    async fn thumbs_up_is_emoji() {
        assert_eq!(
            offline().categorize("👍", "Explain photosynthesis", None, GateScope::Full).await,
            Some(Rejection::Emoji)
        );
    }

    #[tokio::test]
    async fn keyboard_mash_is_gibberish() {
        assert_eq!(
            offline().categorize("asdkjasd 123???", "Explain photosynthesis", None, GateScope::Full).await,
            Some(Rejection::Gibberish)
        );
    }

    #[tokio::test]
    async fn small_talk_is_irrelevant() {
        assert_eq!(
            offline().categorize("I like pizza", "Explain photosynthesis", None, GateScope::Full).await,
            Some(Rejection::Irrelevant)
        );
    }

    #[tokio::test]
    async fn on_topic_reply_is_accepted_when_the_service_agrees() {
        let reasoning = ScriptedReasoning::new();
        reasoning.push(PromptKind::Relevance, "0.9");
        let validator = with_service(reasoning);
        assert_eq!(
            validator.categorize("Plants use sunlight", "Explain photosynthesis", None, GateScope::Full).await,
            None
        );
    }

    #[tokio::test]
    async fn on_topic_reply_is_accepted_from_expected_answer_keywords() {
        assert_eq!(
            offline()
                .categorize(
                    "Plants use sunlight",
                    "Explain photosynthesis",
                    Some("Plants convert sunlight, water and carbon dioxide into glucose"),
                    GateScope::Full,
                )
                .await,
            None
        );
    }

    #[tokio::test]
    async fn on_topic_reply_is_accepted_without_a_service() {
        assert_eq!(
            offline().categorize("Plants use sunlight", "Explain photosynthesis", None, GateScope::Full).await,
            None
        );
    }

    #[tokio::test]
    async fn service_outage_still_rejects_long_small_talk() {
        let reasoning = ScriptedReasoning::new();
        reasoning.push_error(PromptKind::Relevance, "upstream timed out");
        let validator = with_service(reasoning);
        assert_eq!(
            validator
                .categorize(
                    "I like playing cricket with my friends every single evening",
                    "Explain photosynthesis",
                    None,
                    GateScope::Full,
                )
                .await,
            Some(Rejection::Irrelevant)
        );
        assert_eq!(
            offline()
                .categorize("Light gets trapped by the green pigment", "Explain photosynthesis", None, GateScope::Full)
                .await,
            None
        );
    }

    #[test]
    fn only_bare_admissions_count_as_ignorance() {
        assert!(is_admission_of_ignorance("Sorry, I really have no idea"));
        assert!(is_admission_of_ignorance("umm idk"));
        assert!(!is_admission_of_ignorance(
            "I'm not sure, but I think it is chlorophyll that absorbs the light"
        ));
        assert!(!is_admission_of_ignorance("Chlorophyll"));
    }

    #[tokio::test]
    async fn near_zero_service_score_is_decisive() {
        let reasoning = ScriptedReasoning::new();
        reasoning.push(PromptKind::Relevance, "0.0");
        let validator = with_service(reasoning);
        assert_eq!(
            validator
                .categorize("photosynthesis is my cat's name", "Explain photosynthesis", None, GateScope::Full)
                .await,
            Some(Rejection::Irrelevant)
        );
    }

    #[tokio::test]
    async fn ignorance_is_always_accepted() {
        for reply in ["I don't know", "idk", "Mujhe nahi pata", "no idea!!"] {
            assert_eq!(
                offline().categorize(reply, "Explain photosynthesis", None, GateScope::Full).await,
                None,
                "{reply}"
            );
        }
    }

    #[tokio::test]
    async fn meta_questions_are_irrelevant_even_in_meta_scope() {
        assert_eq!(
            offline().categorize("Are you ChatGPT?", "Explain photosynthesis", None, GateScope::MetaOnly).await,
            Some(Rejection::Irrelevant)
        );
    }

    #[tokio::test]
    async fn questions_back_skip_keyword_overlap() {
        assert_eq!(
            offline()
                .categorize("What is chlorophyll exactly?", "Explain photosynthesis", None, GateScope::MetaOnly)
                .await,
            None
        );
    }

    #[tokio::test]
    async fn numeric_expectations_relax_the_gate() {
        assert_eq!(
            offline().categorize("42", "What is six times seven?", Some("42"), GateScope::Full).await,
            None
        );
    }

    #[test]
    fn repeated_characters_and_vowelless_replies_are_gibberish() {
        let settings = TutorSettings::default();
        assert!(is_gibberish("nooooooo way", None, &settings));
        assert!(is_gibberish("sdf ghjk", None, &settings));
        assert!(!is_gibberish("Chlorophyll", None, &settings));
        assert!(!is_gibberish("42", None, &settings));
        assert!(is_gibberish("xkcdqwrt", None, &settings));
    }

    #[test]
    fn relevance_defaults_to_half_without_keywords() {
        let r = keyword_relevance("anything", "What is it?", None);
        assert_eq!(r, Relevance { matched: 0, total: 0, score: 0.5 });
    }

    #[test]
    fn relevance_is_matched_over_total() {
        let r = keyword_relevance("the water evaporates", "Describe the water cycle", None);
        assert_eq!(r.matched, 1);
        assert_eq!(r.total, 2);
        assert!((r.score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn service_relevance_parsing() {
        assert_eq!(parse_relevance("0.35"), Outcome::Ok(0.35));
        assert_eq!(parse_relevance("Relevance: 80"), Outcome::Ok(0.8));
        assert!(parse_relevance("high").is_fallback());
    }

    #[test]
    fn corrective_message_reasks_a_truncated_question() {
        let question = "Explain in detail how the light dependent reactions of photosynthesis \
                        produce ATP and NADPH inside the thylakoid membranes of chloroplasts";
        let msg = corrective_message(Rejection::Gibberish, LanguageStyle::Standard, question, 15);
        assert!(msg.starts_with(LanguageStyle::Standard.gibberish_problem()));
        assert!(msg.contains("Here's the question again: Explain in detail"));
        assert!(msg.ends_with("..."));
    }
}
