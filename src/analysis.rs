// src/analysis.rs
//
// Turns the vision model's text reply into a fixed score structure.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

pub const PROVIDER: &str = "openai";

const DEFAULT_SCORE: f64 = 5.0;
const DEFAULT_CONFIDENCE: f64 = 75.0;
const SCRAPED_CONFIDENCE: f64 = 85.0;
const DEFAULT_FEEDBACK: &str = "Detailed analysis required";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CategoryScore {
    pub score: f64,
    pub feedback: String,
    pub issues: Vec<String>,
    pub tips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Breakdown {
    pub skin_condition: CategoryScore,
    pub nail_health: CategoryScore,
    pub foot_structure: CategoryScore,
    pub symmetry: CategoryScore,
    pub cleanliness: CategoryScore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AnalysisResult {
    pub is_foot_detected: bool,
    pub overall_score: f64,
    pub breakdown: Breakdown,
    pub detected_issues: Vec<String>,
    pub improvement_tips: Vec<String>,
    pub confidence_score: f64,
    pub medical_warning: Option<String>,
    pub provider: String,
}

/// Outcome of reading a model reply. Callers can tell a confident parse
/// from a scraped guess.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedAnalysis {
    Parsed(AnalysisResult),
    Fallback(AnalysisResult),
    Failed(String),
}

impl ParsedAnalysis {
    pub fn mode(&self) -> &'static str {
        match self {
            ParsedAnalysis::Parsed(_) => "parsed",
            ParsedAnalysis::Fallback(_) => "fallback",
            ParsedAnalysis::Failed(_) => "failed",
        }
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match self {
            ParsedAnalysis::Parsed(r) | ParsedAnalysis::Fallback(r) => Some(r),
            ParsedAnalysis::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Skin,
    Nails,
    Structure,
    Symmetry,
    Cleanliness,
}

impl Category {
    fn default_tips(self) -> Vec<String> {
        let tips: [&str; 2] = match self {
            Category::Skin => ["Apply daily moisturizer", "Address dry or cracked skin"],
            Category::Nails => ["Maintain proper nail trimming", "Keep nails clean"],
            Category::Structure => ["Monitor foot structure", "Check for alignment issues"],
            Category::Symmetry => ["Check bilateral balance", "Monitor symmetry"],
            Category::Cleanliness => ["Maintain daily hygiene", "Keep feet clean and dry"],
        };
        tips.iter().map(|t| t.to_string()).collect()
    }
}

const ISSUE_TIPS: &[(&str, &str)] = &[
    ("dry", "Apply a high-quality foot moisturizer daily, especially to heels"),
    ("crack", "Use a healing balm with urea or salicylic acid for cracked skin"),
    ("callus", "Gently exfoliate calluses and moisturize regularly"),
    ("rough", "Use a pumice stone weekly and moisturize daily"),
    ("discolor", "Consult a podiatrist about skin discoloration"),
    ("nail", "Maintain proper nail trimming and hygiene"),
    ("thick", "Consider professional pedicure treatment"),
    ("flak", "Address flaking skin with intensive moisturizing"),
    ("hard", "Soften hard patches with regular moisturizing"),
];

const CONSULT_TIP: &str = "Consult with a foot care professional for proper assessment";

/// Maps observed issues to care tips by keyword, without duplicates.
pub fn tips_for_issues(issues: &[String]) -> Vec<String> {
    if issues.is_empty() {
        return Vec::new();
    }

    let mut tips: Vec<String> = Vec::new();
    for issue in issues {
        let lower = issue.to_lowercase();
        for (keyword, tip) in ISSUE_TIPS {
            if lower.contains(keyword) && !tips.iter().any(|t| t == tip) {
                tips.push(tip.to_string());
            }
        }
    }

    if tips.is_empty() {
        tips.push(CONSULT_TIP.to_string());
    }
    tips
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return DEFAULT_SCORE;
    }
    score.clamp(0.0, 10.0)
}

/// Accepts `7`, `7.5` and `"7"` alike; anything else reads as absent.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Default, Deserialize)]
struct RawCategory {
    #[serde(default, deserialize_with = "lenient_number")]
    score: Option<f64>,
    feedback: Option<String>,
    issues: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnalysis {
    is_foot_detected: Option<bool>,
    skin_condition: Option<RawCategory>,
    nail_health: Option<RawCategory>,
    #[serde(alias = "footShape")]
    foot_structure: Option<RawCategory>,
    symmetry: Option<RawCategory>,
    cleanliness: Option<RawCategory>,
    #[serde(default, deserialize_with = "lenient_number")]
    overall_score: Option<f64>,
    detected_issues: Option<Vec<String>>,
    improvement_tips: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_number")]
    confidence_score: Option<f64>,
    #[serde(alias = "medicalWarning")]
    medical_recommendation: Option<String>,
}

fn category_from_raw(raw: Option<RawCategory>, category: Category) -> CategoryScore {
    let raw = raw.unwrap_or_default();
    let tips = match &raw.issues {
        Some(issues) => tips_for_issues(issues),
        None => category.default_tips(),
    };
    CategoryScore {
        score: clamp_score(raw.score.unwrap_or(DEFAULT_SCORE)),
        feedback: raw.feedback.unwrap_or_else(|| DEFAULT_FEEDBACK.to_string()),
        issues: raw.issues.unwrap_or_default(),
        tips,
    }
}

fn default_detected_issues() -> Vec<String> {
    vec!["Analysis incomplete - manual assessment needed".to_string()]
}

fn default_improvement_tips() -> Vec<String> {
    vec!["Consider professional foot care consultation".to_string()]
}

pub fn not_a_foot() -> AnalysisResult {
    let empty = CategoryScore {
        score: 0.0,
        feedback: "No foot detected".to_string(),
        issues: Vec::new(),
        tips: Vec::new(),
    };
    AnalysisResult {
        is_foot_detected: false,
        overall_score: 0.0,
        breakdown: Breakdown {
            skin_condition: empty.clone(),
            nail_health: empty.clone(),
            foot_structure: empty.clone(),
            symmetry: empty.clone(),
            cleanliness: empty,
        },
        detected_issues: vec!["Image does not contain feet".to_string()],
        improvement_tips: vec!["Please upload a clear photo of feet for analysis".to_string()],
        confidence_score: 100.0,
        medical_warning: Some(
            "This image does not appear to contain feet. Please upload a clear photo of feet for accurate analysis."
                .to_string(),
        ),
        provider: PROVIDER.to_string(),
    }
}

fn from_raw(raw: RawAnalysis) -> AnalysisResult {
    if raw.is_foot_detected == Some(false) {
        return not_a_foot();
    }

    AnalysisResult {
        is_foot_detected: true,
        overall_score: clamp_score(raw.overall_score.unwrap_or(DEFAULT_SCORE)),
        breakdown: Breakdown {
            skin_condition: category_from_raw(raw.skin_condition, Category::Skin),
            nail_health: category_from_raw(raw.nail_health, Category::Nails),
            foot_structure: category_from_raw(raw.foot_structure, Category::Structure),
            symmetry: category_from_raw(raw.symmetry, Category::Symmetry),
            cleanliness: category_from_raw(raw.cleanliness, Category::Cleanliness),
        },
        detected_issues: raw.detected_issues.unwrap_or_else(default_detected_issues),
        improvement_tips: raw.improvement_tips.unwrap_or_else(default_improvement_tips),
        confidence_score: raw
            .confidence_score
            .map(|c| c.clamp(0.0, 100.0))
            .unwrap_or(DEFAULT_CONFIDENCE),
        medical_warning: raw.medical_recommendation.filter(|m| !m.trim().is_empty()),
        provider: PROVIDER.to_string(),
    }
}

/// The span from the first `{` to the last `}`, for replies that wrap the
/// object in prose or a code fence.
fn json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn score_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)([a-z]+).*?(\d+(?:\.\d+)?)\s*/\s*10").expect("score pattern is valid")
    })
}

enum Scraped {
    Category(Category),
    Overall,
}

fn classify_word(word: &str) -> Option<Scraped> {
    let word = word.to_lowercase();
    let category = if word.starts_with("skin") {
        Category::Skin
    } else if word.starts_with("nail") {
        Category::Nails
    } else if word.starts_with("structur") || word.starts_with("shape") || word == "foot" {
        Category::Structure
    } else if word.starts_with("symmetr") {
        Category::Symmetry
    } else if word.starts_with("clean") || word.starts_with("hygien") {
        Category::Cleanliness
    } else if word == "overall" || word == "total" {
        return Some(Scraped::Overall);
    } else {
        return None;
    };
    Some(Scraped::Category(category))
}

/// Best-effort read of a prose reply: picks up "<word> ... N/10" pairs whose
/// word names a known category. Never fails.
pub fn scrape_text(text: &str) -> AnalysisResult {
    let lower = text.to_lowercase();
    if text.contains("NOT_A_FOOT") || lower.contains("not a foot") {
        return not_a_foot();
    }

    let mut scores: Vec<(Category, f64)> = Vec::new();
    let mut overall = None;
    for caps in score_pattern().captures_iter(text) {
        let Some(score) = caps.get(2).and_then(|m| m.as_str().parse::<f64>().ok()) else {
            continue;
        };
        match caps.get(1).and_then(|m| classify_word(m.as_str())) {
            Some(Scraped::Category(category)) => {
                if !scores.iter().any(|(c, _)| *c == category) {
                    scores.push((category, clamp_score(score)));
                }
            }
            Some(Scraped::Overall) => overall = overall.or(Some(clamp_score(score))),
            None => {}
        }
    }

    let category = |category: Category| match scores.iter().find(|(c, _)| *c == category) {
        Some((_, score)) => CategoryScore {
            score: *score,
            feedback: "AI analysis provided".to_string(),
            issues: Vec::new(),
            tips: Vec::new(),
        },
        None => CategoryScore {
            score: DEFAULT_SCORE,
            feedback: DEFAULT_FEEDBACK.to_string(),
            issues: Vec::new(),
            tips: category.default_tips(),
        },
    };

    let overall_score = overall.unwrap_or_else(|| {
        if scores.is_empty() {
            DEFAULT_SCORE
        } else {
            scores.iter().map(|(_, s)| s).sum::<f64>() / scores.len() as f64
        }
    });

    AnalysisResult {
        is_foot_detected: true,
        overall_score,
        breakdown: Breakdown {
            skin_condition: category(Category::Skin),
            nail_health: category(Category::Nails),
            foot_structure: category(Category::Structure),
            symmetry: category(Category::Symmetry),
            cleanliness: category(Category::Cleanliness),
        },
        detected_issues: default_detected_issues(),
        improvement_tips: default_improvement_tips(),
        confidence_score: SCRAPED_CONFIDENCE,
        medical_warning: None,
        provider: PROVIDER.to_string(),
    }
}

pub fn parse_response(text: &str) -> ParsedAnalysis {
    if text.trim().is_empty() {
        return ParsedAnalysis::Failed("empty response from model".to_string());
    }

    let candidate = json_span(text).unwrap_or(text);
    match serde_json::from_str::<RawAnalysis>(candidate) {
        Ok(raw) => ParsedAnalysis::Parsed(from_raw(raw)),
        Err(e) => {
            log::warn!("model reply is not valid JSON, scraping text instead: {e}");
            ParsedAnalysis::Fallback(scrape_text(text))
        }
    }
}
