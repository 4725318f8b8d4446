// src/verdict.rs

use rand::seq::SliceRandom;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct MemeVerdict {
    pub score: u8,
    pub label: &'static str,
    pub verdict: &'static str,
    pub emoji: &'static str,
    pub score_emojis: &'static str,
    pub share_text: String,
}

type Verdict = (&'static str, &'static str);

const VERDICTS: [&[Verdict]; 10] = [
    // 1
    &[
        ("Emergency podiatrist appointment needed.", "🚨"),
        ("These feet are a medical mystery.", "🔬"),
        ("Foot apocalypse. End times for toes.", "💥"),
        ("These feet need an exorcism.", "👻"),
    ],
    // 2
    &[
        ("Looks like you walk on Legos daily.", "💀"),
        ("Certified Crocs-only feet.", "🩴"),
        ("These feet need witness protection.", "🕵️"),
        ("These toes have been through war.", "⚔️"),
    ],
    // 3
    &[
        ("Ouch. Walking must be painful.", "😵"),
        ("These feet have seen things. Dark things.", "😱"),
        ("Foot emergency. Call the foot doctor.", "🚑"),
    ],
    // 4
    &[
        ("Yikes. Time for some TLC.", "😬"),
        ("These feet need therapy. And maybe a spa day.", "🧖"),
        ("Foot situation: concerning. But fixable.", "⚠️"),
    ],
    // 5
    &[
        ("Meh. At least they're attached to your legs.", "🤷"),
        ("Questionable feet. But functional.", "❓"),
        ("Not great, not terrible. Just... feet.", "😕"),
    ],
    // 6
    &[
        ("Average feet. Would pass unnoticed in sandals.", "😐"),
        ("Standard issue feet. Nothing special.", "📦"),
        ("Basic feet. At least they work.", "😐"),
    ],
    // 7
    &[
        ("Not bad at all. Could do worse.", "👍"),
        ("Decent feet. Nothing to hide here.", "😊"),
        ("Fine feet. No complaints from me.", "👍"),
    ],
    // 8
    &[
        ("Pretty decent feet. Sandal season ready.", "🩴"),
        ("Solid foot game. No shame in these toes.", "👏"),
        ("Good looking feet. Beach approved.", "🏖️"),
    ],
    // 9
    &[
        ("Cinderella-ready. Glass slipper approved.", "🥿"),
        ("Foot goals achieved. Instagram worthy.", "📸"),
        ("Almost perfect. Just missing the crown.", "👑"),
    ],
    // 10
    &[
        ("Foot model material.", "👑"),
        ("These feet belong in a museum. Perfect specimen.", "🏛️"),
        ("Certified foot royalty. Bow down to these toes.", "✨"),
    ],
];

pub fn rating_label(score: f64) -> &'static str {
    if score >= 9.0 {
        "Exceptional"
    } else if score >= 8.0 {
        "Excellent"
    } else if score >= 7.0 {
        "Good"
    } else {
        "Fair"
    }
}

pub fn score_emojis(score: f64) -> &'static str {
    match score {
        s if s >= 9.5 => "🔥👑✨",
        s if s >= 8.5 => "🔥👑",
        s if s >= 7.5 => "🔥👍",
        s if s >= 6.5 => "👍😊",
        s if s >= 5.5 => "😐🤷",
        s if s >= 4.5 => "😕❓",
        s if s >= 3.5 => "😬⚠️",
        s if s >= 2.5 => "😵😱",
        s if s >= 1.5 => "💀😭",
        _ => "🚨💥",
    }
}

/// Rounds the score into a 1..=10 bucket.
pub fn bucket(score: f64) -> u8 {
    if score.is_nan() {
        return 1;
    }
    score.round().clamp(1.0, 10.0) as u8
}

pub fn meme_verdict(score: f64) -> MemeVerdict {
    let bucket = bucket(score);
    let choices = VERDICTS[usize::from(bucket - 1)];
    let (verdict, emoji) = *choices
        .choose(&mut rand::thread_rng())
        .unwrap_or(&choices[0]);

    MemeVerdict {
        score: bucket,
        label: rating_label(score),
        verdict,
        emoji,
        score_emojis: score_emojis(score),
        share_text: format!(
            "AI roasted my feet {emoji} Got a {bucket}/10 on FootRate AI 👣 footrateai.com"
        ),
    }
}
