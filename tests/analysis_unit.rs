use footrate_api::analysis::{parse_response, ParsedAnalysis};
use footrate_api::verdict::meme_verdict;

#[test]
fn well_formed_reply_is_taken_as_is() {
    let reply = r#"{
        "isFootDetected": true,
        "skinCondition": {"score": 7, "feedback": "Slightly dry", "issues": ["dry heel"]},
        "nailHealth": {"score": 8, "feedback": "Neat", "issues": []},
        "footStructure": {"score": 6, "feedback": "Mild bunion", "issues": ["bunion"]},
        "symmetry": {"score": 9, "feedback": "Balanced", "issues": []},
        "cleanliness": {"score": 8, "feedback": "Clean", "issues": []},
        "overallScore": 7.6,
        "detectedIssues": ["dry heel", "bunion"],
        "improvementTips": ["Moisturize nightly"],
        "confidenceScore": 92,
        "medicalRecommendation": "See a podiatrist about the bunion"
    }"#;

    let parsed = parse_response(reply);
    assert_eq!(parsed.mode(), "parsed");
    let ParsedAnalysis::Parsed(result) = parsed else {
        panic!("expected a parsed result");
    };

    assert!(result.is_foot_detected);
    assert_eq!(result.overall_score, 7.6);
    assert_eq!(result.breakdown.skin_condition.score, 7.0);
    assert_eq!(result.breakdown.skin_condition.feedback, "Slightly dry");
    assert_eq!(result.breakdown.symmetry.score, 9.0);
    assert_eq!(result.detected_issues, vec!["dry heel", "bunion"]);
    assert_eq!(result.improvement_tips, vec!["Moisturize nightly"]);
    assert_eq!(result.confidence_score, 92.0);
    assert_eq!(
        result.medical_warning.as_deref(),
        Some("See a podiatrist about the bunion")
    );
    // tips are derived from the category's own issues
    assert!(result.breakdown.skin_condition.tips[0].contains("moisturizer"));
}

#[test]
fn reply_wrapped_in_prose_still_parses() {
    let reply = "Here you go:\n```json\n{\"isFootDetected\": true, \"overallScore\": 8}\n```";
    let parsed = parse_response(reply);
    assert_eq!(parsed.mode(), "parsed");
    assert_eq!(parsed.result().unwrap().overall_score, 8.0);
}

#[test]
fn missing_fields_get_defaults() {
    let parsed = parse_response(r#"{"isFootDetected": true}"#);
    let result = parsed.result().unwrap();
    assert_eq!(result.overall_score, 5.0);
    assert_eq!(result.confidence_score, 75.0);
    assert_eq!(result.breakdown.nail_health.score, 5.0);
    assert_eq!(result.breakdown.nail_health.tips.len(), 2);
    assert!(!result.detected_issues.is_empty());
}

#[test]
fn prose_reply_falls_back_to_scraped_scores() {
    let reply = "Skin condition: 7/10\nNail health: 6/10\nSymmetry looks fine at 8 / 10\nOverall: 6.5/10";
    let parsed = parse_response(reply);
    assert_eq!(parsed.mode(), "fallback");

    let result = parsed.result().unwrap();
    assert!(result.is_foot_detected);
    assert_eq!(result.breakdown.skin_condition.score, 7.0);
    assert_eq!(result.breakdown.nail_health.score, 6.0);
    assert_eq!(result.breakdown.symmetry.score, 8.0);
    assert_eq!(result.breakdown.cleanliness.score, 5.0);
    assert_eq!(result.overall_score, 6.5);
    assert_eq!(result.confidence_score, 85.0);
}

#[test]
fn not_a_foot_is_reported_both_ways() {
    let from_json = parse_response(r#"{"isFootDetected": false}"#);
    let result = from_json.result().unwrap();
    assert!(!result.is_foot_detected);
    assert_eq!(result.overall_score, 0.0);
    assert!(result.medical_warning.is_some());

    let from_text = parse_response("NOT_A_FOOT, this is a cat");
    assert_eq!(from_text.mode(), "fallback");
    assert!(!from_text.result().unwrap().is_foot_detected);
}

#[test]
fn empty_reply_is_a_failure() {
    assert!(matches!(parse_response("   \n"), ParsedAnalysis::Failed(_)));
    assert!(parse_response("").result().is_none());
}

#[test]
fn verdict_matches_rounded_score() {
    let verdict = meme_verdict(9.6);
    assert_eq!(verdict.score, 10);
    assert_eq!(verdict.label, "Exceptional");
    assert_eq!(verdict.score_emojis, "🔥👑✨");
    assert!(verdict.share_text.contains("10/10"));
}
