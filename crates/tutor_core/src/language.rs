//! crates/tutor_core/src/language.rs
//!
//! The learner-facing register and every templated string the tutor says.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the tutor talks to a learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LanguageStyle {
    /// Transliterated Hindi mixed with English technical vocabulary.
    #[default]
    Hinglish,
    Standard,
}

impl LanguageStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            LanguageStyle::Hinglish => "hinglish",
            LanguageStyle::Standard => "standard",
        }
    }

    /// Instruction appended to prompts whose output reaches the learner.
    pub fn prompt_instruction(self) -> &'static str {
        match self {
            LanguageStyle::Hinglish => {
                "Reply in Hinglish: conversational Hindi written in Latin script, keeping technical terms in English."
            }
            LanguageStyle::Standard => "Reply in clear, simple standard English.",
        }
    }

    pub fn emoji_problem(self) -> &'static str {
        match self {
            LanguageStyle::Hinglish => "Sirf emoji se answer samajh nahi aata. Thoda words mein likho na.",
            LanguageStyle::Standard => "I can't grade an emoji-only reply. Please answer in words.",
        }
    }

    pub fn gibberish_problem(self) -> &'static str {
        match self {
            LanguageStyle::Hinglish => "Yeh reply thoda unclear lag raha hai. Proper sentence mein answer do.",
            LanguageStyle::Standard => "That reply doesn't look like a readable answer. Please try again in a full sentence.",
        }
    }

    pub fn irrelevant_problem(self) -> &'static str {
        match self {
            LanguageStyle::Hinglish => "Yeh answer question se related nahi lag raha. Chalo topic pe wapas aate hain.",
            LanguageStyle::Standard => "That doesn't seem related to the question. Let's get back to the topic.",
        }
    }

    pub fn reask_prefix(self) -> &'static str {
        match self {
            LanguageStyle::Hinglish => "Question phir se:",
            LanguageStyle::Standard => "Here's the question again:",
        }
    }

    pub fn clarify_request(self) -> &'static str {
        match self {
            LanguageStyle::Hinglish => "Main samjha nahi. Kya aap thoda clearly bata sakte ho?",
            LanguageStyle::Standard => "I didn't quite catch that. Could you clarify what you meant?",
        }
    }

    pub fn session_complete(self) -> &'static str {
        match self {
            LanguageStyle::Hinglish => "Shabash! Aaj ke saare questions ho gaye. Aapka session summary ready hai.",
            LanguageStyle::Standard => "Well done! You've finished every question for this session. Your summary is ready.",
        }
    }

    pub fn no_answer_found(self) -> &'static str {
        match self {
            LanguageStyle::Hinglish => "Is baare mein abhi mere paas clear answer nahi hai. Chalo aage badhte hain.",
            LanguageStyle::Standard => "I couldn't find a reliable answer to that right now. Let's keep going.",
        }
    }

    pub fn from_material_prefix(self) -> &'static str {
        match self {
            LanguageStyle::Hinglish => "Aapke material ke hisaab se:",
            LanguageStyle::Standard => "According to your material:",
        }
    }

    pub fn ignorance_explanation(self) -> &'static str {
        match self {
            LanguageStyle::Hinglish => "Koi baat nahi, aapne bataya ki aapko answer nahi pata. Sahi answer dekh lo.",
            LanguageStyle::Standard => "You said you didn't know this one. Have a look at the correct answer.",
        }
    }

    /// Copy for the focus, steady and edge zones when they are built without the service.
    pub fn heuristic_zone_copy(self) -> [ZoneCopy; 3] {
        match self {
            LanguageStyle::Hinglish => [
                ZoneCopy { label: "Dobara dekho", empty: "Is session mein koi bada gap nahi dikha.", share: "50% se neeche rahe" },
                ZoneCopy { label: "Strong ho", empty: "Basics pe aise hi kaam karte raho.", share: "75% ya usse upar rahe" },
                ZoneCopy { label: "Bas thoda aur", empty: "Is baar kuch borderline nahi tha.", share: "correct ke kareeb the" },
            ],
            LanguageStyle::Standard => [
                ZoneCopy { label: "Revisit", empty: "No major gaps this session.", share: "scored below 50%" },
                ZoneCopy { label: "Solid on", empty: "Keep building on the basics.", share: "scored 75% or more" },
                ZoneCopy { label: "Almost there", empty: "Nothing borderline this session.", share: "were close to correct" },
            ],
        }
    }

    pub fn zone_share(self, count: usize, total: usize, share: &str) -> String {
        match self {
            LanguageStyle::Hinglish => format!("{total} mein se {count} answers {share}."),
            LanguageStyle::Standard => format!("{count} of {total} answers {share}."),
        }
    }

    pub fn zone_average(self, mean: f64) -> String {
        match self {
            LanguageStyle::Hinglish => format!("Yahan average score {:.0}% raha.", mean * 100.0),
            LanguageStyle::Standard => format!("Average score here was {:.0}%.", mean * 100.0),
        }
    }

    pub fn fallback_question(self) -> (&'static str, &'static str) {
        match self {
            LanguageStyle::Hinglish => (
                "Apne words mein batao, jo material aapne padha uska main idea kya hai?",
                "A short summary of the central idea of the studied material.",
            ),
            LanguageStyle::Standard => (
                "In your own words, what is the main idea of the material you studied?",
                "A short summary of the central idea of the studied material.",
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneCopy {
    pub label: &'static str,
    pub empty: &'static str,
    pub share: &'static str,
}

impl fmt::Display for LanguageStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LanguageStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hinglish" | "code_mixed" | "code-mixed" => Ok(LanguageStyle::Hinglish),
            "standard" | "english" => Ok(LanguageStyle::Standard),
            other => Err(format!("unknown language style '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases() {
        assert_eq!("code-mixed".parse::<LanguageStyle>(), Ok(LanguageStyle::Hinglish));
        assert_eq!("Standard".parse::<LanguageStyle>(), Ok(LanguageStyle::Standard));
        assert!("klingon".parse::<LanguageStyle>().is_err());
    }

    #[test]
    fn styles_produce_different_copy() {
        assert_ne!(
            LanguageStyle::Hinglish.session_complete(),
            LanguageStyle::Standard.session_complete()
        );
        assert_ne!(
            LanguageStyle::Hinglish.ignorance_explanation(),
            LanguageStyle::Standard.ignorance_explanation()
        );
    }
}
