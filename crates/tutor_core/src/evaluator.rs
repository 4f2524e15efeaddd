//! crates/tutor_core/src/evaluator.rs
//!
//! Grades a direct answer against the expected answer.

use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{EvaluatorResult, FollowupAction};
use crate::language::LanguageStyle;
use crate::outcome::{FallbackReason, Outcome};
use crate::ports::{Prompt, PromptKind, ReasoningService};
use crate::reasoning::{ask, bool_field, number_field, parse_json_object, string_field};
use crate::settings::TutorSettings;
use crate::validator::is_admission_of_ignorance;

const CORRECT_THRESHOLD: f64 = 0.75;

/// A grade before it is tied to a message and a question item.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub score: f64,
    pub is_correct: bool,
    pub xp: i64,
    pub explanation: String,
    pub confidence: f64,
    pub followup_action: FollowupAction,
    pub suggested_correction: Option<String>,
}

impl Evaluation {
    /// Used whenever the grade cannot be trusted.
    pub fn safe_default() -> Self {
        Self {
            score: 0.5,
            is_correct: false,
            xp: 25,
            explanation: "partial credit".to_string(),
            confidence: 0.3,
            followup_action: FollowupAction::None,
            suggested_correction: None,
        }
    }

    pub fn for_admitted_ignorance(expected_answer: &str, language: LanguageStyle) -> Self {
        Self {
            score: 0.0,
            is_correct: false,
            xp: xp_for_score(0.0),
            explanation: language.ignorance_explanation().to_string(),
            confidence: 0.9,
            followup_action: FollowupAction::ShowSolution,
            suggested_correction: Some(expected_answer.to_string()),
        }
    }

    pub fn into_result(self, session_id: Uuid, message_id: Uuid, question_item_id: Uuid) -> EvaluatorResult {
        EvaluatorResult {
            id: Uuid::new_v4(),
            session_id,
            message_id,
            question_item_id,
            score: self.score,
            is_correct: self.is_correct,
            xp: self.xp,
            explanation: self.explanation,
            confidence: self.confidence,
            followup_action: self.followup_action,
            suggested_correction: self.suggested_correction,
            created_at: Utc::now(),
        }
    }
}

/// Linear inside each band; every band boundary maps to the band's lower bound.
pub fn xp_for_score(score: f64) -> i64 {
    let s = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
    let band = |lo: f64, hi: f64, xp_lo: i64, xp_hi: i64| {
        let t = (s - lo) / (hi - lo);
        let xp = xp_lo as f64 + t * (xp_hi - xp_lo) as f64;
        (xp.round() as i64).clamp(xp_lo, xp_hi)
    };
    match s {
        s if s >= 0.9 => band(0.9, 1.0, 80, 100),
        s if s >= 0.75 => band(0.75, 0.9, 60, 79),
        s if s >= 0.5 => band(0.5, 0.75, 40, 59),
        s if s >= 0.25 => band(0.25, 0.5, 20, 39),
        s => ((s * 80.0).floor() as i64).max(1),
    }
}

fn parse_evaluation(map: &Map<String, Value>) -> Outcome<Evaluation> {
    let Some(score) = number_field(map, "score") else {
        return Outcome::Fallback(FallbackReason::Malformed("missing score".into()));
    };
    let Some(explanation) = string_field(map, "explanation") else {
        return Outcome::Fallback(FallbackReason::Malformed("missing explanation".into()));
    };
    let score = if score > 1.0 && score <= 100.0 { score / 100.0 } else { score }.clamp(0.0, 1.0);

    let confidence = number_field(map, "confidence")
        .map(|c| if c > 1.0 && c <= 100.0 { c / 100.0 } else { c })
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);
    let xp = number_field(map, "xp")
        .map(|xp| (xp.round() as i64).clamp(0, 100))
        .unwrap_or_else(|| xp_for_score(score));

    Outcome::Ok(Evaluation {
        score,
        is_correct: bool_field(map, "correct").unwrap_or(score >= CORRECT_THRESHOLD),
        xp,
        explanation,
        confidence,
        followup_action: string_field(map, "followup_action")
            .map(|a| FollowupAction::parse_lenient(&a))
            .unwrap_or_default(),
        suggested_correction: string_field(map, "suggested_correction"),
    })
}

pub struct AnswerEvaluator {
    reasoning: Arc<dyn ReasoningService>,
    settings: Arc<TutorSettings>,
}

impl AnswerEvaluator {
    pub fn new(reasoning: Arc<dyn ReasoningService>, settings: Arc<TutorSettings>) -> Self {
        Self { reasoning, settings }
    }

    pub async fn evaluate(
        &self,
        context: &str,
        expected_answer: &str,
        answer: &str,
        language: LanguageStyle,
    ) -> Evaluation {
        if is_admission_of_ignorance(answer) {
            debug!("graded an admission of ignorance without the service");
            return Evaluation::for_admitted_ignorance(expected_answer, language);
        }

        let context = if context.trim().is_empty() { "(no study material available)" } else { context };
        let prompt = Prompt::new(
            PromptKind::Evaluation,
            format!(
                "Grade a learner's answer against the expected answer, using the study material \
                 for reference. Judge meaning, not wording.\n\
                 Respond with a single JSON object with keys:\n\
                 \"score\" (0 to 1), \"correct\" (true/false), \"explanation\" (one or two sentences \
                 addressed to the learner), \"confidence\" (0 to 1), \"followup_action\" (one of \
                 none, give_hint, ask_clarification, show_solution), \"xp\" (0 to 100, optional), \
                 \"suggested_correction\" (optional).\n\
                 Write the explanation in this register: {}\n\n\
                 Study material:\n{context}\n\nExpected answer: {expected_answer}\n\
                 Learner's answer: {answer}",
                language.prompt_instruction(),
            ),
            self.settings.evaluation_max_tokens,
        );

        ask(self.reasoning.as_ref(), &prompt)
            .await
            .and_then(|raw| match parse_json_object(&raw) {
                Ok(map) => parse_evaluation(&map),
                Err(e) => Outcome::Fallback(FallbackReason::Malformed(e)),
            })
            .or_fallback(|reason| {
                warn!(%reason, "grading fell back to the safe default");
                Evaluation::safe_default()
            })
    }
}
