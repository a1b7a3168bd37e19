//! Phrasing catalog for clarification questions.
//!
//! Slots are detected by the LLM during stage B; this catalog only decides
//! how to ask for them in a friendly way.

/// Question fragment for a known slot name. Unknown slots fall back to the
/// slot name itself.
fn slot_fragment(slot: &str) -> String {
    match slot {
        "location" => "which location you mean".to_string(),
        "keyword" => "what keyword or topic to search for".to_string(),
        "date" => "which date or time range you have in mind".to_string(),
        "url" => "the link you're referring to".to_string(),
        "email" => "the email address to use".to_string(),
        "quantity" => "how many you need".to_string(),
        "name" => "who or what this is about".to_string(),
        "language" => "which language you'd like".to_string(),
        other => format!("the {}", other.replace('_', " ")),
    }
}

/// Compose a single friendly question covering every missing slot.
pub fn clarification_text(missing: &[String]) -> String {
    let fragments: Vec<String> = missing.iter().map(|s| slot_fragment(s)).collect();
    match fragments.len() {
        0 => "Could you tell me a bit more about what you need?".to_string(),
        1 => format!("Happy to help — could you tell me {}?", fragments[0]),
        _ => {
            let (last, rest) = fragments.split_last().expect("len >= 2");
            format!(
                "Happy to help — could you tell me {} and {}?",
                rest.join(", "),
                last
            )
        }
    }
}
