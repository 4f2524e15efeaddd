//! crates/tutor_core/src/insight.rs
//!
//! End-of-session summary: three diagnostic zones plus experience and accuracy.

use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{EvaluatorResult, InsightStatus, Session, SessionInsight, Zone};
use crate::error::{TutorError, TutorResult};
use crate::language::{LanguageStyle, ZoneCopy};
use crate::outcome::{FallbackReason, Outcome};
use crate::ports::{DatabaseService, PortError, Prompt, PromptKind, ReasoningService};
use crate::reasoning::{ask, number_field, parse_json_object};
use crate::settings::TutorSettings;
use crate::text::truncate_words;

const MAX_ZONE_POINTS: usize = 2;
const STRONG_SCORE: f64 = 0.75;
const WEAK_SCORE: f64 = 0.5;
const ZONE_QUESTION_WORDS: usize = 12;

/// One graded exchange, with everything the zone prompt needs.
#[derive(Debug, Clone, PartialEq)]
pub struct QaPair {
    pub question: String,
    pub expected_answer: String,
    pub answer: String,
    pub explanation: String,
    pub score: f64,
}

/// `(session_xp, accuracy_percent)` for a set of graded answers.
pub fn session_totals(evaluations: &[EvaluatorResult]) -> (i64, f64) {
    if evaluations.is_empty() {
        return (0, 0.0);
    }
    let n = evaluations.len() as f64;
    let correct = evaluations.iter().filter(|e| e.is_correct).count() as f64;
    let accuracy = 100.0 * correct / n;
    let mean_xp = evaluations.iter().map(|e| e.xp as f64).sum::<f64>() / n;
    ((mean_xp * accuracy / 100.0).round() as i64, accuracy)
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Zones {
    focus: Zone,
    steady: Zone,
    edge: Zone,
}

//=========================================================================================
// Parsing service zones
//=========================================================================================

fn ranked_points(items: &[Value]) -> Vec<String> {
    let mut scored: Vec<(f64, String)> = items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => Some((0.0, s.trim().to_string())),
            Value::Object(map) => {
                let text = ["text", "point", "insight"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|t| !t.is_empty())?;
                let rank: f64 = ["actionability", "specificity", "relevance"]
                    .iter()
                    .filter_map(|k| number_field(map, k))
                    .sum();
                Some((rank, text.to_string()))
            }
            _ => None,
        })
        .collect();
    // Stable sort keeps model order among ties.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(MAX_ZONE_POINTS).map(|(_, text)| text).collect()
}

fn paired_reasons(map: &Map<String, Value>, key: &str) -> Vec<String> {
    let reasons: Vec<String> = map
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .take(MAX_ZONE_POINTS)
                .collect()
        })
        .unwrap_or_default();
    if reasons.len() == MAX_ZONE_POINTS { reasons } else { Vec::new() }
}

fn parse_zone(map: &Map<String, Value>, name: &str) -> Result<Zone, FallbackReason> {
    let items = map
        .get(&format!("{name}_zone"))
        .or_else(|| map.get(name))
        .and_then(Value::as_array)
        .ok_or_else(|| FallbackReason::Malformed(format!("missing {name} zone")))?;
    let points = ranked_points(items);
    if points.is_empty() {
        return Err(FallbackReason::Malformed(format!("empty {name} zone")));
    }
    Ok(Zone { points, reasons: paired_reasons(map, &format!("{name}_zone_reasons")) })
}

fn zones_from_map(map: &Map<String, Value>) -> Result<Zones, FallbackReason> {
    Ok(Zones {
        focus: parse_zone(map, "focus")?,
        steady: parse_zone(map, "steady")?,
        edge: parse_zone(map, "edge")?,
    })
}

fn parse_zones(raw: &str) -> Outcome<Zones> {
    parse_json_object(raw)
        .map_err(FallbackReason::Malformed)
        .and_then(|map| zones_from_map(&map))
        .into()
}

//=========================================================================================
// Heuristic zones
//=========================================================================================

fn heuristic_zone(pairs: &[&QaPair], total: usize, copy: ZoneCopy, language: LanguageStyle) -> Zone {
    if pairs.is_empty() {
        return Zone::new(vec![copy.empty.to_string()]);
    }
    let points = pairs
        .iter()
        .take(MAX_ZONE_POINTS)
        .map(|p| format!("{}: {}", copy.label, truncate_words(&p.question, ZONE_QUESTION_WORDS)))
        .collect();
    let mean = pairs.iter().map(|p| p.score).sum::<f64>() / pairs.len() as f64;
    Zone {
        points,
        reasons: vec![
            language.zone_share(pairs.len(), total, copy.share),
            language.zone_average(mean),
        ],
    }
}

fn heuristic_zones(pairs: &[QaPair], language: LanguageStyle) -> Zones {
    let strong: Vec<&QaPair> = pairs.iter().filter(|p| p.score >= STRONG_SCORE).collect();
    let weak: Vec<&QaPair> = pairs.iter().filter(|p| p.score < WEAK_SCORE).collect();
    let edge: Vec<&QaPair> = pairs
        .iter()
        .filter(|p| p.score >= WEAK_SCORE && p.score < STRONG_SCORE)
        .collect();
    let total = pairs.len();

    let [focus, steady, almost] = language.heuristic_zone_copy();
    Zones {
        focus: heuristic_zone(&weak, total, focus, language),
        steady: heuristic_zone(&strong, total, steady, language),
        edge: heuristic_zone(&edge, total, almost, language),
    }
}

//=========================================================================================
// Generator
//=========================================================================================

pub struct InsightGenerator {
    store: Arc<dyn DatabaseService>,
    reasoning: Arc<dyn ReasoningService>,
    settings: Arc<TutorSettings>,
}

impl InsightGenerator {
    pub fn new(
        store: Arc<dyn DatabaseService>,
        reasoning: Arc<dyn ReasoningService>,
        settings: Arc<TutorSettings>,
    ) -> Self {
        Self { store, reasoning, settings }
    }

    /// `None` when nothing was graded. Upserts `processing` before the zones
    /// are known and `completed` (or `failed`) afterwards.
    pub async fn generate(&self, session: &Session) -> TutorResult<Option<SessionInsight>> {
        let evaluations = self.store.get_evaluations_for_session(session.id).await?;
        if evaluations.is_empty() {
            info!(session_id = %session.id, "no graded answers, skipping insight");
            return Ok(None);
        }
        let (session_xp, accuracy) = session_totals(&evaluations);

        let now = Utc::now();
        let mut insight = self
            .store
            .upsert_insight(SessionInsight {
                id: Uuid::new_v4(),
                session_id: session.id,
                focus_zone: Zone::default(),
                steady_zone: Zone::default(),
                edge_zone: Zone::default(),
                session_xp,
                accuracy,
                qa_pair_count: evaluations.len(),
                status: InsightStatus::Processing,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let pairs = match self.load_pairs(session, &evaluations).await {
            Ok(pairs) => pairs,
            Err(e) => {
                error!(session_id = %session.id, error = %e, "could not load graded pairs for insight");
                insight.status = InsightStatus::Failed;
                self.store.upsert_insight(insight).await?;
                return Err(e);
            }
        };

        let zones = self
            .zones_from_service(&pairs, session.language)
            .await
            .or_fallback(|reason| {
                warn!(session_id = %session.id, %reason, "insight zones fell back to score shares");
                heuristic_zones(&pairs, session.language)
            });

        insight.focus_zone = zones.focus;
        insight.steady_zone = zones.steady;
        insight.edge_zone = zones.edge;
        insight.status = InsightStatus::Completed;
        let stored = self.store.upsert_insight(insight).await?;
        info!(session_id = %session.id, session_xp, accuracy, "session insight completed");
        Ok(Some(stored))
    }

    async fn load_pairs(&self, session: &Session, evaluations: &[EvaluatorResult]) -> TutorResult<Vec<QaPair>> {
        let batch = self
            .store
            .get_batch_for_session(session.id)
            .await?
            .ok_or(TutorError::MissingBatch(session.id))?;
        let items: HashMap<Uuid, _> = self
            .store
            .get_question_items(batch.id)
            .await?
            .into_iter()
            .map(|i| (i.id, i))
            .collect();
        let messages: HashMap<Uuid, String> = self
            .store
            .get_messages_for_session(session.id)
            .await?
            .into_iter()
            .map(|m| (m.id, m.content))
            .collect();

        evaluations
            .iter()
            .map(|e| -> TutorResult<QaPair> {
                let item = items
                    .get(&e.question_item_id)
                    .ok_or_else(|| PortError::NotFound(format!("question item {}", e.question_item_id)))?;
                let answer = messages
                    .get(&e.message_id)
                    .ok_or_else(|| PortError::NotFound(format!("message {}", e.message_id)))?;
                Ok(QaPair {
                    question: item.question_text.clone(),
                    expected_answer: item.expected_answer.clone(),
                    answer: answer.clone(),
                    explanation: e.explanation.clone(),
                    score: e.score,
                })
            })
            .collect()
    }

    async fn zones_from_service(&self, pairs: &[QaPair], language: LanguageStyle) -> Outcome<Zones> {
        let transcript = pairs
            .iter()
            .enumerate()
            .map(|(i, p)| {
                format!(
                    "{}. Question: {}\n   Expected: {}\n   Learner: {}\n   Feedback: {}\n   Score: {:.2}",
                    i + 1,
                    p.question,
                    p.expected_answer,
                    p.answer,
                    p.explanation,
                    p.score
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = Prompt::new(
            PromptKind::Insight,
            format!(
                "Summarise this tutoring session for the learner in three zones:\n\
                 focus (what to work on next), steady (what they have mastered), edge (what they \
                 almost have).\n\
                 Respond with a JSON object with keys \"focus_zone\", \"steady_zone\", \"edge_zone\", \
                 each an array of up to two objects {{\"text\", \"actionability\", \"specificity\", \
                 \"relevance\"}} (scores 0 to 1), and optionally \"focus_zone_reasons\", \
                 \"steady_zone_reasons\", \"edge_zone_reasons\", each exactly two short strings.\n\
                 {}\n\nSession:\n{transcript}",
                language.prompt_instruction(),
            ),
            self.settings.insight_max_tokens,
        );
        ask(self.reasoning.as_ref(), &prompt).await.and_then(|raw| parse_zones(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FollowupAction;
    use serde_json::json;

    fn graded(xp: i64, is_correct: bool) -> EvaluatorResult {
        EvaluatorResult {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            question_item_id: Uuid::new_v4(),
            score: if is_correct { 1.0 } else { 0.0 },
            is_correct,
            xp,
            explanation: String::new(),
            confidence: 0.9,
            followup_action: FollowupAction::None,
            suggested_correction: None,
            created_at: Utc::now(),
        }
    }

    fn pair(question: &str, score: f64) -> QaPair {
        QaPair {
            question: question.into(),
            expected_answer: "x".into(),
            answer: "y".into(),
            explanation: "z".into(),
            score,
        }
    }

    #[test]
    fn totals_weight_mean_xp_by_accuracy() {
        let (xp, accuracy) = session_totals(&[graded(100, true), graded(1, false)]);
        assert_eq!(accuracy, 50.0);
        assert_eq!(xp, 25);
    }

    #[test]
    fn totals_of_nothing_are_zero() {
        assert_eq!(session_totals(&[]), (0, 0.0));
    }

    #[test]
    fn zone_items_are_ranked_and_truncated() {
        let raw = json!({
            "focus_zone": [
                {"text": "vague", "actionability": 0.1, "specificity": 0.1, "relevance": 0.1},
                {"text": "best", "actionability": 0.9, "specificity": 0.9, "relevance": 0.9},
                {"text": "middle", "actionability": 0.5, "specificity": 0.5, "relevance": 0.5}
            ],
            "steady_zone": ["Knows the light reactions"],
            "edge_zone": [{"point": "Calvin cycle inputs"}],
            "focus_zone_reasons": ["Missed both chlorophyll questions", "Confused ATP with NADPH"],
            "steady_zone_reasons": ["only one"]
        })
        .to_string();

        let zones = parse_zones(&raw).ok().unwrap();
        assert_eq!(zones.focus.points, vec!["best", "middle"]);
        assert_eq!(zones.focus.reasons.len(), 2);
        assert!(zones.steady.reasons.is_empty());
        assert_eq!(zones.edge.points, vec!["Calvin cycle inputs"]);
    }

    #[test]
    fn missing_zone_is_malformed() {
        let raw = json!({"focus_zone": ["a"], "steady_zone": ["b"]}).to_string();
        assert!(parse_zones(&raw).is_fallback());
    }

    #[test]
    fn heuristic_zones_follow_score_thresholds() {
        let pairs = vec![
            pair("What is chlorophyll?", 0.9),
            pair("Where does the Calvin cycle happen?", 0.6),
            pair("Why do leaves change colour?", 0.1),
        ];
        let zones = heuristic_zones(&pairs, LanguageStyle::Standard);
        assert_eq!(zones.steady.points, vec!["Solid on: What is chlorophyll?"]);
        assert_eq!(zones.edge.points, vec!["Almost there: Where does the Calvin cycle happen?"]);
        assert_eq!(zones.focus.points, vec!["Revisit: Why do leaves change colour?"]);
        assert_eq!(zones.focus.reasons[0], "1 of 3 answers scored below 50%.");
    }

    #[test]
    fn heuristic_zones_speak_hinglish() {
        let pairs = vec![pair("What is chlorophyll?", 0.9), pair("Why do leaves change colour?", 0.1)];
        let zones = heuristic_zones(&pairs, LanguageStyle::Hinglish);
        assert_eq!(zones.steady.points, vec!["Strong ho: What is chlorophyll?"]);
        assert_eq!(zones.focus.reasons[0], "2 mein se 1 answers 50% se neeche rahe.");
        assert_eq!(zones.focus.reasons[1], "Yahan average score 10% raha.");
        assert_eq!(zones.edge.points, vec!["Is baar kuch borderline nahi tha."]);
    }
}
