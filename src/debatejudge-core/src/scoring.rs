//! Turning judges' raw answers into scorecards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::character::{CharacterConfig, ScoringDimension};
use crate::error::DebateError;
use crate::provider::ProviderResponse;

/// One judge's verdict on one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scorecard {
    pub judge_id: String,
    pub judge_name: String,
    pub round: u32,
    /// Debater name → dimension → score.
    pub scores: BTreeMap<String, BTreeMap<String, f32>>,
    /// Debater name → weighted total.
    pub totals: BTreeMap<String, f32>,
    pub winner: Option<String>,
    pub reasoning: String,
}

/// Converts a judge's provider response into a [`Scorecard`].
pub trait ScoreAggregator: Send + Sync {
    fn aggregate(
        &self,
        judge: &CharacterConfig,
        round: u32,
        debaters: &[String],
        response: &ProviderResponse,
    ) -> Result<Scorecard, DebateError>;
}

/// Parses the JSON verdict format requested by the judge prompt and scores it
/// against the judge's rubric.
#[derive(Debug, Default, Clone, Copy)]
pub struct RubricScorer;

#[derive(Deserialize)]
struct RawVerdict {
    scores: BTreeMap<String, BTreeMap<String, f32>>,
    #[serde(default)]
    winner: Option<String>,
    #[serde(default)]
    reasoning: String,
}

/// Pull the outermost JSON object out of free text (handles code fences and
/// chatter around the answer).
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn find_key<'a, V>(map: &'a BTreeMap<String, V>, wanted: &str) -> Option<&'a V> {
    map.iter()
        .find(|(key, _)| key.trim().eq_ignore_ascii_case(wanted))
        .map(|(_, value)| value)
}

fn score_debater(
    rubric: &[ScoringDimension],
    raw: &BTreeMap<String, f32>,
) -> (BTreeMap<String, f32>, f32) {
    let mut scores = BTreeMap::new();
    let mut total = 0.0;
    for dimension in rubric {
        let value = find_key(raw, &dimension.name)
            .copied()
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, dimension.max as f32);
        total += value * dimension.weight;
        scores.insert(dimension.name.clone(), value);
    }
    (scores, total)
}

impl ScoreAggregator for RubricScorer {
    fn aggregate(
        &self,
        judge: &CharacterConfig,
        round: u32,
        debaters: &[String],
        response: &ProviderResponse,
    ) -> Result<Scorecard, DebateError> {
        let malformed = |reason: String| {
            DebateError::MalformedVerdict {
                judge: judge.id.clone(),
                reason,
            }
        };

        let json = extract_json(&response.text)
            .ok_or_else(|| malformed("no JSON object in response".to_string()))?;
        let verdict: RawVerdict =
            serde_json::from_str(json).map_err(|e| malformed(e.to_string()))?;

        let rubric = judge.effective_rubric();
        let mut scores = BTreeMap::new();
        let mut totals = BTreeMap::new();
        for debater in debaters {
            let raw = find_key(&verdict.scores, debater)
                .ok_or_else(|| malformed(format!("no scores for '{}'", debater)))?;
            let (per_dimension, total) = score_debater(&rubric, raw);
            scores.insert(debater.clone(), per_dimension);
            totals.insert(debater.clone(), total);
        }

        let winner = verdict
            .winner
            .as_deref()
            .and_then(|w| debaters.iter().find(|d| d.eq_ignore_ascii_case(w.trim())))
            .cloned()
            .or_else(|| leader(&totals));

        Ok(Scorecard {
            judge_id: judge.id.clone(),
            judge_name: judge.name.clone(),
            round,
            scores,
            totals,
            winner,
            reasoning: verdict.reasoning,
        })
    }
}

/// The debater with the strictly highest total, if there is one.
pub fn leader(totals: &BTreeMap<String, f32>) -> Option<String> {
    let mut ranked: Vec<_> = totals.iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(a.1));
    match ranked.as_slice() {
        [(first, top), (_, second), ..] if top > second => Some((*first).clone()),
        [(only, _)] => Some((*only).clone()),
        _ => None,
    }
}

/// Sum weighted totals per debater across scorecards.
pub fn combine_totals<'a>(scorecards: impl IntoIterator<Item = &'a Scorecard>) -> BTreeMap<String, f32> {
    let mut combined = BTreeMap::new();
    for card in scorecards {
        for (debater, total) in &card.totals {
            *combined.entry(debater.clone()).or_insert(0.0) += total;
        }
    }
    combined
}

/// Render a rubric for a judge prompt.
pub fn describe_rubric(rubric: &[ScoringDimension]) -> String {
    rubric
        .iter()
        .map(|d| {
            if d.description.is_empty() {
                format!("- {} (0-{})", d.name, d.max)
            } else {
                format!("- {} (0-{}): {}", d.name, d.max, d.description)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
