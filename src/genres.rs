use crate::mood::Mood;

const FALLBACK: &[&str] = &["pop"];

pub fn genres_for(mood: Mood) -> &'static [&'static str] {
    genres_for_label(mood.as_str())
}

/// Genre search terms for a mood label. Labels outside the known
/// moods get a plain `pop` search.
pub fn genres_for_label(label: &str) -> &'static [&'static str] {
    match label.to_lowercase().as_str() {
        "happy" => &["pop", "dance", "happy"],
        "sad" => &["acoustic", "sad", "piano"],
        "neutral" => &["chill", "ambient", "indie"],
        _ => FALLBACK,
    }
}
