//! crates/tutor_core/src/rag.rs
//!
//! Answers a learner's own question from their study material, falling back to
//! general knowledge and finally to a templated "couldn't find it" reply.

use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use crate::domain::Session;
use crate::language::LanguageStyle;
use crate::outcome::{FallbackReason, Outcome};
use crate::ports::{
    Prompt, PromptKind, ReasoningService, RetrievalQuery, RetrievalService, RetrievedPassage,
};
use crate::reasoning::ask;
use crate::settings::TutorSettings;
use crate::text::{normalize_phrase, truncate_words};

/// Sentinel the context-bound prompt must emit when the material lacks the answer.
pub const NOT_IN_CONTEXT: &str = "NOT_IN_CONTEXT";

const GROUNDED_STATEMENT_WORDS: usize = 40;

//=========================================================================================
// Tenant-scoped retrieval
//=========================================================================================

/// Queries the index and drops anything recorded under another tenant.
pub async fn scoped_passages(
    retrieval: &dyn RetrievalService,
    query: &RetrievalQuery,
) -> Outcome<Vec<RetrievedPassage>> {
    let passages = match retrieval.query(query).await {
        Ok(passages) => passages,
        Err(e) => {
            warn!(tenant = %query.tenant_tag, error = %e, "retrieval failed");
            return Outcome::Fallback(FallbackReason::ServiceError(e.to_string()));
        }
    };

    let returned = passages.len();
    let kept: Vec<RetrievedPassage> = passages
        .into_iter()
        .filter(|p| p.tenant_tag == query.tenant_tag)
        .collect();
    if kept.len() < returned {
        warn!(
            tenant = %query.tenant_tag,
            dropped = returned - kept.len(),
            "dropped passages belonging to another tenant"
        );
    }

    if kept.is_empty() {
        Outcome::Fallback(FallbackReason::EmptyContext)
    } else {
        Outcome::Ok(kept)
    }
}

/// Numbered passage block for prompts.
pub fn join_passages(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[{}] {}", i + 1, p.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

//=========================================================================================
// Answering
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSource {
    Material,
    GeneralKnowledge,
    Template,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RagAnswer {
    pub text: String,
    pub source: AnswerSource,
}

pub struct RagAnswerer {
    reasoning: Arc<dyn ReasoningService>,
    retrieval: Arc<dyn RetrievalService>,
    settings: Arc<TutorSettings>,
}

impl RagAnswerer {
    pub fn new(
        reasoning: Arc<dyn ReasoningService>,
        retrieval: Arc<dyn RetrievalService>,
        settings: Arc<TutorSettings>,
    ) -> Self {
        Self { reasoning, retrieval, settings }
    }

    pub async fn answer(&self, session: &Session, question: &str) -> RagAnswer {
        let language = session.language;
        let query = RetrievalQuery {
            tenant_tag: session.tenant_tag(),
            source_id: session.document_id,
            text: question.to_string(),
            top_k: self.settings.rag_top_k,
        };
        let passages = scoped_passages(self.retrieval.as_ref(), &query).await;

        let grounded = match &passages {
            Outcome::Ok(found) => self.answer_from_material(question, found, language).await,
            Outcome::Fallback(reason) => Outcome::Fallback(reason.clone()),
        };
        match grounded {
            Outcome::Ok(text) => {
                let found = passages.ok().unwrap_or_default();
                return RagAnswer {
                    text: polish(&text, &found, language),
                    source: AnswerSource::Material,
                };
            }
            Outcome::Fallback(reason) => {
                debug!(session_id = %session.id, %reason, "material could not answer, asking generally");
            }
        }

        match self.answer_generally(question, language).await {
            Outcome::Ok(text) => RagAnswer {
                text: polish(&text, &[], language),
                source: AnswerSource::GeneralKnowledge,
            },
            Outcome::Fallback(_) => RagAnswer {
                text: language.no_answer_found().to_string(),
                source: AnswerSource::Template,
            },
        }
    }

    async fn answer_from_material(
        &self,
        question: &str,
        passages: &[RetrievedPassage],
        language: LanguageStyle,
    ) -> Outcome<String> {
        let max_words = self.settings.rag_max_words;
        let prompt = Prompt::new(
            PromptKind::ContextAnswer,
            format!(
                "You are a patient tutor answering a learner's question.\n\
                 Use ONLY the study material below. If it does not contain the answer, \
                 reply with exactly {NOT_IN_CONTEXT} and nothing else.\n\
                 Do not praise the learner, mention points or levels, or ask them a question back.\n\
                 {}\nKeep the answer under {max_words} words.\n\n\
                 Study material:\n{}\n\nLearner's question: {question}",
                language.prompt_instruction(),
                join_passages(passages),
            ),
            self.settings.answer_max_tokens,
        )
        .with_max_words(max_words);

        let min_chars = self.settings.min_rag_answer_chars;
        ask(self.reasoning.as_ref(), &prompt).await.and_then(|text| {
            if text.contains(NOT_IN_CONTEXT) {
                Outcome::Fallback(FallbackReason::NotInContext)
            } else if text.chars().count() < min_chars {
                Outcome::Fallback(FallbackReason::Insufficient {
                    got: text.chars().count(),
                    needed: min_chars,
                })
            } else {
                Outcome::Ok(text)
            }
        })
    }

    async fn answer_generally(&self, question: &str, language: LanguageStyle) -> Outcome<String> {
        let max_words = self.settings.rag_max_words;
        let prompt = Prompt::new(
            PromptKind::GeneralAnswer,
            format!(
                "You are a patient tutor. Answer the learner's question accurately from general \
                 knowledge.\nDo not praise the learner, mention points or levels, or ask them a \
                 question back.\n{}\nKeep the answer under {max_words} words.\n\n\
                 Learner's question: {question}",
                language.prompt_instruction(),
            ),
            self.settings.answer_max_tokens,
        )
        .with_max_words(max_words);

        ask(self.reasoning.as_ref(), &prompt).await.and_then(|text| {
            if text.contains(NOT_IN_CONTEXT) {
                Outcome::Fallback(FallbackReason::NotInContext)
            } else {
                Outcome::Ok(text)
            }
        })
    }
}

//=========================================================================================
// Post-processing
//=========================================================================================

fn gamification_regex() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(great job|good job|well done|awesome|excellent|nice work|level up|\+\s*\d+\s*xp|\d+\s*xp)\b[\s!.,:;\-]*",
        )
        .expect("gamification regex is valid")
    })
}

const REPROMPT_OPENERS: &[&str] = &[
    "what do you think", "can you tell me", "can you explain", "could you tell me",
    "why dont you", "try to", "think about", "how would you", "aap batao", "tum batao",
];

/// Removes leading praise, point awards and emoji decorations.
fn strip_gamification(text: &str) -> String {
    let mut current = text.trim().to_string();
    loop {
        let without_symbols = current
            .trim_start_matches(|c: char| !c.is_alphanumeric() && !matches!(c, '"' | '(' | '\'' | '+'))
            .to_string();
        let without_praise = gamification_regex().replace(&without_symbols, "").into_owned();
        if without_praise == current {
            return current;
        }
        current = without_praise;
    }
}

/// Output that only throws the question back at the learner.
fn is_reprompt(text: &str) -> bool {
    let trimmed = text.trim();
    if !trimmed.ends_with('?') {
        return false;
    }
    let normalized = normalize_phrase(trimmed);
    let single_sentence = !trimmed[..trimmed.len() - 1].contains(['.', '!', '?']);
    single_sentence || REPROMPT_OPENERS.iter().any(|o| normalized.starts_with(o))
}

fn polish(text: &str, passages: &[RetrievedPassage], language: LanguageStyle) -> String {
    let stripped = strip_gamification(text);
    if !is_reprompt(&stripped) {
        return stripped;
    }
    match passages.first() {
        Some(passage) => format!(
            "{} {}",
            language.from_material_prefix(),
            truncate_words(passage.text.trim(), GROUNDED_STATEMENT_WORDS)
        ),
        None => stripped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TenantTag;
    use crate::testing::{ScriptedReasoning, StaticRetrieval};
    use chrono::Utc;
    use uuid::Uuid;

    fn session() -> Session {
        Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            document_id: Some(Uuid::new_v4()),
            language: LanguageStyle::Standard,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn passage(tenant: TenantTag, text: &str) -> RetrievedPassage {
        RetrievedPassage { source_id: Uuid::new_v4(), chunk_index: 0, text: text.into(), tenant_tag: tenant }
    }

    fn answerer(reasoning: Arc<ScriptedReasoning>, retrieval: StaticRetrieval) -> RagAnswerer {
        RagAnswerer::new(reasoning, Arc::new(retrieval), Arc::new(TutorSettings::default()))
    }

    #[tokio::test]
    async fn answers_from_material_and_filters_foreign_passages() {
        let s = session();
        let retrieval = StaticRetrieval::new(vec![
            passage(s.tenant_tag(), "Resonance happens when a system is driven at its natural frequency."),
            passage(TenantTag::from_raw("learner:someone-else"), "SECRET notes of another learner."),
        ]);
        let reasoning = Arc::new(ScriptedReasoning::new());
        reasoning.push(
            PromptKind::ContextAnswer,
            "Great job! +10 XP Resonance is a large response when driving at the natural frequency.",
        );

        let answer = answerer(reasoning.clone(), retrieval).answer(&s, "What is resonance?").await;

        assert_eq!(answer.source, AnswerSource::Material);
        assert_eq!(answer.text, "Resonance is a large response when driving at the natural frequency.");
        let prompts = reasoning.prompts();
        assert!(prompts[0].text.contains("natural frequency"));
        assert!(!prompts[0].text.contains("SECRET"));
    }

    #[tokio::test]
    async fn sentinel_falls_back_to_general_knowledge() {
        let s = session();
        let retrieval = StaticRetrieval::new(vec![passage(s.tenant_tag(), "Unrelated chapter text.")]);
        let reasoning = Arc::new(ScriptedReasoning::new());
        reasoning.push(PromptKind::ContextAnswer, NOT_IN_CONTEXT);
        reasoning.push(PromptKind::GeneralAnswer, "A light-year is the distance light travels in a year.");

        let answer = answerer(reasoning.clone(), retrieval).answer(&s, "What is a light-year?").await;

        assert_eq!(answer.source, AnswerSource::GeneralKnowledge);
        assert_eq!(reasoning.calls(PromptKind::GeneralAnswer), 1);
    }

    #[tokio::test]
    async fn too_short_material_answers_are_retried_generally() {
        let s = session();
        let retrieval = StaticRetrieval::new(vec![passage(s.tenant_tag(), "Some text.")]);
        let reasoning = Arc::new(ScriptedReasoning::new());
        reasoning.push(PromptKind::ContextAnswer, "Yes.");
        reasoning.push(PromptKind::GeneralAnswer, "Because friction converts motion into heat.");

        let answer = answerer(reasoning, retrieval).answer(&s, "Why do brakes get hot?").await;
        assert_eq!(answer.source, AnswerSource::GeneralKnowledge);
    }

    #[tokio::test]
    async fn everything_failing_yields_the_template() {
        let s = session();
        let reasoning = Arc::new(ScriptedReasoning::new());
        let answer = answerer(reasoning, StaticRetrieval::failing()).answer(&s, "What is entropy?").await;
        assert_eq!(answer.source, AnswerSource::Template);
        assert_eq!(answer.text, LanguageStyle::Standard.no_answer_found());
    }

    #[tokio::test]
    async fn reprompts_become_grounded_statements() {
        let s = session();
        let retrieval = StaticRetrieval::new(vec![passage(
            s.tenant_tag(),
            "Osmosis is the movement of water across a membrane toward higher solute concentration.",
        )]);
        let reasoning = Arc::new(ScriptedReasoning::new());
        reasoning.push(PromptKind::ContextAnswer, "What do you think happens to water across a membrane?");

        let answer = answerer(reasoning, retrieval).answer(&s, "What is osmosis?").await;
        assert!(answer.text.starts_with("According to your material: Osmosis is the movement"));
    }

    #[test]
    fn strips_stacked_prefixes() {
        assert_eq!(strip_gamification("🎉 Well done! Level up: Plants need light."), "Plants need light.");
        assert_eq!(strip_gamification("Plants need light."), "Plants need light.");
    }
}
