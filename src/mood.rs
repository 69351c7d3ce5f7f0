use std::fmt;

const HAPPY_THRESHOLD: f64 = 0.05;
const SAD_THRESHOLD: f64 = -0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mood {
    Happy,
    Sad,
    Neutral,
}

impl Mood {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Happy => "happy",
            Mood::Sad => "sad",
            Mood::Neutral => "neutral",
        }
    }

    /// Capitalized label, used for playlist names
    pub fn title(&self) -> &'static str {
        match self {
            Mood::Happy => "Happy",
            Mood::Sad => "Sad",
            Mood::Neutral => "Neutral",
        }
    }

    pub fn from_score(score: f64) -> Self {
        if score >= HAPPY_THRESHOLD {
            Mood::Happy
        } else if score <= SAD_THRESHOLD {
            Mood::Sad
        } else {
            Mood::Neutral
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produces a compound sentiment score in `[-1, 1]` for a piece of text
pub trait SentimentScorer: Send + Sync {
    fn compound(&self, text: &str) -> f64;
}

/// VADER's compound polarity score. The analyzer only borrows
/// vader's static lexicons, so it's cheap to build per call.
#[derive(Default)]
pub struct VaderScorer;

impl VaderScorer {
    pub fn new() -> Self {
        VaderScorer
    }
}

impl SentimentScorer for VaderScorer {
    fn compound(&self, text: &str) -> f64 {
        vader_sentiment::SentimentIntensityAnalyzer::new()
            .polarity_scores(text)
            .get("compound")
            .copied()
            .unwrap_or(0.0)
    }
}

pub struct MoodDetector {
    scorer: Box<dyn SentimentScorer>,
}

impl MoodDetector {
    pub fn new(scorer: Box<dyn SentimentScorer>) -> Self {
        Self { scorer }
    }

    pub fn infer(&self, text: &str) -> Mood {
        Mood::from_score(self.scorer.compound(text))
    }
}
