//! Tokenization shared by the fallback embedder and the BM25 scorer.

/// Common English stop words excluded from the term set. High-frequency
/// words would otherwise dominate both the hash embedding and BM25.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "was", "has", "are", "not", "this", "that", "with", "from", "have",
    "you", "can", "its", "will", "but", "they", "all", "been", "also", "into", "more", "than",
    "when", "who", "what", "how", "out", "our", "new", "now",
];

/// Split text into scoring terms.
///
/// ASCII runs are split on non-alphanumerics and lowercased; CJK characters
/// produce one term per character plus adjacent bigrams, since those scripts
/// carry no whitespace word boundaries.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut word = String::new();
    let mut prev_cjk: Option<char> = None;

    for ch in text.chars() {
        if is_cjk(ch) {
            flush_word(&mut word, &mut terms);
            terms.push(ch.to_string());
            if let Some(prev) = prev_cjk {
                terms.push(format!("{prev}{ch}"));
            }
            prev_cjk = Some(ch);
        } else if ch.is_alphanumeric() {
            word.extend(ch.to_lowercase());
            prev_cjk = None;
        } else {
            flush_word(&mut word, &mut terms);
            prev_cjk = None;
        }
    }
    flush_word(&mut word, &mut terms);
    terms
}

fn flush_word(word: &mut String, terms: &mut Vec<String>) {
    if word.len() >= 2 && !STOP_WORDS.contains(&word.as_str()) {
        terms.push(std::mem::take(word));
    } else {
        word.clear();
    }
}

fn is_cjk(ch: char) -> bool {
    matches!(ch,
        '\u{4E00}'..='\u{9FFF}'     // CJK Unified Ideographs
        | '\u{3400}'..='\u{4DBF}'   // Extension A
        | '\u{3040}'..='\u{30FF}'   // Hiragana + Katakana
        | '\u{AC00}'..='\u{D7AF}'   // Hangul syllables
    )
}
