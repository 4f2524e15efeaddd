//! crates/tutor_core/src/text.rs
//!
//! Small tokenisation helpers shared by the classifier, validator and prompts.

const STOP_WORDS: &[&str] = &[
    // English function words
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could", "did", "do",
    "does", "for", "from", "had", "has", "have", "how", "if", "in", "into", "is", "it", "its",
    "me", "my", "of", "on", "or", "our", "should", "so", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "those", "to", "was", "we", "were", "what", "when",
    "where", "which", "who", "whom", "whose", "why", "will", "with", "would", "you", "your",
    "about", "also", "any", "some", "such", "very", "just", "not", "no", "yes", "all", "each",
    "one", "two", "use", "used", "using",
    // Instruction verbs that say nothing about the topic
    "explain", "describe", "define", "discuss", "state", "list", "give", "tell", "write", "name",
    "identify", "mention", "briefly", "example", "examples", "answer", "question", "own", "words",
    // Transliterated Hindi function words
    "kya", "hai", "hain", "ka", "ki", "ke", "ko", "se", "mein", "aur", "ye", "yeh", "wo", "woh",
    "kaise", "kyun", "kyon", "batao", "samjhao", "hota", "hoti", "hote", "karo", "kar",
];

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Lower-cased alphanumeric tokens.
pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'' && c != '’')
        .map(|t| t.trim_matches(|c| c == '\'' || c == '’').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Crude plural stripping, enough to line up "plants" with "plant".
pub fn stem(word: &str) -> String {
    let word = word.trim_end_matches("'s").trim_end_matches("’s");
    if word.len() > 4 && word.ends_with("ies") {
        format!("{}y", &word[..word.len() - 3])
    } else if word.len() > 3
        && word.ends_with('s')
        && !word.ends_with("ss")
        && !word.ends_with("us")
        && !word.ends_with("is")
    {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Content words of a text: stop-words and short tokens removed, stemmed, de-duplicated.
pub fn keywords(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in tokens(text) {
        if token.chars().count() < 3 || is_stop_word(&token) || is_numeric(&token) {
            continue;
        }
        let stemmed = stem(&token);
        if !out.contains(&stemmed) {
            out.push(stemmed);
        }
    }
    out
}

/// Two stems refer to the same thing if equal or if one clearly extends the other.
pub fn keywords_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.len() >= 5 && long.starts_with(short) {
        return true;
    }
    let common = a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count();
    common >= 7
}

/// Digits with an optional sign, decimal point or fraction bar. Words that
/// happen to parse as floats ("nan", "inf") are not numbers here.
pub fn is_numeric(token: &str) -> bool {
    let cleaned: String = token.chars().filter(|c| *c != ',' && *c != '_').collect();
    let is_decimal = |s: &str| {
        let s = s.strip_prefix(|c: char| c == '-' || c == '+').unwrap_or(s);
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        (!whole.is_empty() || !frac.is_empty())
            && whole.chars().all(|c| c.is_ascii_digit())
            && frac.chars().all(|c| c.is_ascii_digit())
    };
    match cleaned.split_once('/') {
        Some((n, d)) => is_decimal(n) && is_decimal(d),
        None => is_decimal(&cleaned),
    }
}

/// Keeps the first `max_words` words, marking the cut with an ellipsis.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        words.join(" ")
    } else {
        format!("{}...", words[..max_words].join(" "))
    }
}

/// Lower-cases and drops apostrophes so "Don't" and "dont" compare equal.
pub fn normalize_phrase(text: &str) -> String {
    let stripped: String = text
        .to_lowercase()
        .chars()
        .filter(|c| *c != '\'' && *c != '’')
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True if `phrase` occurs in `normalized` on word boundaries.
pub fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    let padded = format!(" {normalized} ");
    padded.contains(&format!(" {phrase} "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_skip_instruction_verbs_and_stop_words() {
        assert_eq!(keywords("Explain photosynthesis"), vec!["photosynthesis"]);
        assert_eq!(
            keywords("What are the stages of the water cycle?"),
            vec!["stage", "water", "cycle"]
        );
    }

    #[test]
    fn stems_line_up_plurals() {
        assert_eq!(stem("plants"), "plant");
        assert_eq!(stem("batteries"), "battery");
        assert_eq!(stem("glass"), "glass");
        assert_eq!(stem("photosynthesis"), "photosynthesis");
    }

    #[test]
    fn related_forms_match() {
        assert!(keywords_match("photosynthesis", "photosynthetic"));
        assert!(keywords_match("chlorophyll", "chlorophyll"));
        assert!(!keywords_match("plant", "pizza"));
    }

    #[test]
    fn numeric_detection() {
        assert!(is_numeric("42"));
        assert!(is_numeric("3.14"));
        assert!(is_numeric("1,000"));
        assert!(is_numeric("3/4"));
        assert!(!is_numeric("4a"));
        assert!(is_numeric("-0.5"));
        for word in ["nan", "inf", "Infinity", "-inf", ".", "/", ""] {
            assert!(!is_numeric(word), "{word}");
        }
    }

    #[test]
    fn truncation_marks_the_cut() {
        assert_eq!(truncate_words("one two three", 5), "one two three");
        assert_eq!(truncate_words("one two three four", 2), "one two...");
    }

    #[test]
    fn phrases_match_on_word_boundaries() {
        let n = normalize_phrase("Honestly, I don't know!");
        assert_eq!(n, "honestly i dont know");
        assert!(contains_phrase(&n, "i dont know"));
        assert!(!contains_phrase(&normalize_phrase("idkfa"), "idk"));
    }
}
