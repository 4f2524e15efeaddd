//! crates/tutor_core/src/settings.rs
//!
//! Tunable thresholds for the orchestrator. The service crate fills these
//! from the environment; everything has a working default.

#[derive(Debug, Clone, PartialEq)]
pub struct TutorSettings {
    /// How many questions to ask the reasoning service for.
    pub question_batch_size: usize,
    /// Fewer usable generated questions than this means the batch falls back.
    pub min_generated_questions: usize,
    /// Passages fetched when generating questions.
    pub context_top_k: usize,
    /// Passages fetched when answering a learner's question.
    pub rag_top_k: usize,
    /// Passages fetched as grading context. Zero disables retrieval for grading.
    pub evaluation_context_top_k: usize,

    /// Above this many words a question-shaped reply is treated as mixed.
    pub long_message_words: usize,
    /// Below this many alphanumerics a reply is too short to interpret.
    pub min_meaningful_chars: usize,

    pub min_reply_words: usize,
    pub gibberish_alpha_ratio: f64,
    pub max_repeated_chars: usize,
    pub min_keyword_overlap: usize,
    pub relevance_threshold: f64,
    /// Service relevance at or below this is decisive, whatever the heuristic says.
    pub decisive_irrelevance: f64,
    /// Words of the original question kept in a corrective re-ask.
    pub reask_words: usize,

    /// Shorter context-bound answers trigger the general-knowledge retry.
    pub min_rag_answer_chars: usize,
    pub rag_max_words: u32,

    pub classification_max_tokens: u32,
    pub relevance_max_tokens: u32,
    pub generation_max_tokens: u32,
    pub evaluation_max_tokens: u32,
    pub answer_max_tokens: u32,
    pub insight_max_tokens: u32,
}

impl Default for TutorSettings {
    fn default() -> Self {
        Self {
            question_batch_size: 10,
            min_generated_questions: 5,
            context_top_k: 8,
            rag_top_k: 5,
            evaluation_context_top_k: 3,
            long_message_words: 15,
            min_meaningful_chars: 2,
            min_reply_words: 2,
            gibberish_alpha_ratio: 0.6,
            max_repeated_chars: 5,
            min_keyword_overlap: 1,
            relevance_threshold: 0.5,
            decisive_irrelevance: 0.05,
            reask_words: 15,
            min_rag_answer_chars: 20,
            rag_max_words: 120,
            classification_max_tokens: 8,
            relevance_max_tokens: 8,
            generation_max_tokens: 3000,
            evaluation_max_tokens: 600,
            answer_max_tokens: 500,
            insight_max_tokens: 800,
        }
    }
}

impl TutorSettings {
    /// Keeps the minimum usable question count consistent with the target size.
    pub fn normalized(mut self) -> Self {
        self.question_batch_size = self.question_batch_size.max(1);
        self.min_generated_questions = self.min_generated_questions.clamp(1, self.question_batch_size);
        self
    }
}
