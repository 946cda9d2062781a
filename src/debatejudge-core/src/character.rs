//! Judge, debater and moderator personas.
//!
//! Characters are defined at configuration time and handed out as snapshots:
//! [`CharacterStore::get`] returns an owned copy, so a running debate keeps
//! the prompts it started with even if the store is edited later.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use crate::error::DebateError;
use crate::provider::ModelConfig;

/// Part a character plays in a debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterRole {
    Judge,
    Debater,
    Moderator,
}

impl CharacterRole {
    pub fn display_name(&self) -> &str {
        match self {
            CharacterRole::Judge => "JUDGE",
            CharacterRole::Debater => "DEBATER",
            CharacterRole::Moderator => "MODERATOR",
        }
    }
}

impl fmt::Display for CharacterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One axis a judge scores on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringDimension {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Highest score a debater can get on this dimension.
    #[serde(default = "default_max_score")]
    pub max: u32,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_max_score() -> u32 {
    10
}

fn default_weight() -> f32 {
    1.0
}

impl ScoringDimension {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            max: default_max_score(),
            weight: default_weight(),
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }
}

/// Rubric used when a judge does not define its own.
pub fn default_rubric() -> Vec<ScoringDimension> {
    vec![
        ScoringDimension::new("logic", "Soundness and internal consistency of the argument."),
        ScoringDimension::new("evidence", "Use of facts, examples and sources."),
        ScoringDimension::new("rebuttal", "How directly the opponent's points were answered."),
        ScoringDimension::new("delivery", "Clarity, structure and persuasiveness."),
    ]
}

/// A configured persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterConfig {
    pub id: String,
    pub name: String,
    pub role: CharacterRole,
    /// May contain `{name}`, `{topic}`, `{position}` and `{opponent_name}` placeholders.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Default model call for this character.
    #[serde(default)]
    pub call_config: Option<ModelConfig>,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Scoring rubric; only meaningful for judges.
    #[serde(default)]
    pub rubric: Vec<ScoringDimension>,
}

fn default_active() -> bool {
    true
}

impl CharacterConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: CharacterRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
            system_prompt: None,
            call_config: None,
            active: true,
            rubric: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_call_config(mut self, config: ModelConfig) -> Self {
        self.call_config = Some(config);
        self
    }

    pub fn with_rubric(mut self, rubric: Vec<ScoringDimension>) -> Self {
        self.rubric = rubric;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// The rubric this judge scores with.
    pub fn effective_rubric(&self) -> Vec<ScoringDimension> {
        if self.rubric.is_empty() {
            default_rubric()
        } else {
            self.rubric.clone()
        }
    }

    /// Get the full display name with role.
    pub fn display_name_with_role(&self) -> String {
        format!("{} ({})", self.name, self.role.display_name())
    }
}

/// Shared catalogue of characters keyed by id.
#[derive(Debug, Default)]
pub struct CharacterStore {
    characters: RwLock<BTreeMap<String, CharacterConfig>>,
}

impl CharacterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_characters(characters: impl IntoIterator<Item = CharacterConfig>) -> Self {
        let store = Self::new();
        for character in characters {
            store.upsert(character);
        }
        store
    }

    /// Insert or replace a character. Returns the previous definition, if any.
    pub fn upsert(&self, character: CharacterConfig) -> Option<CharacterConfig> {
        self.characters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(character.id.clone(), character)
    }

    /// Snapshot of a character.
    pub fn get(&self, id: &str) -> Result<CharacterConfig, DebateError> {
        self.characters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| DebateError::CharacterNotFound(id.to_string()))
    }

    /// Active characters with the given role, ordered by id.
    pub fn active_by_role(&self, role: CharacterRole) -> Vec<CharacterConfig> {
        self.characters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|c| c.active && c.role == role)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.characters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const DEBATER_PROMPT: &str = r#"You are {name} participating in a formal, judged debate.

DEBATE TOPIC: {topic}

YOUR POSITION: You are arguing {position} the topic.
YOUR OPPONENT: {opponent_name}

DEBATE RULES:
- Present clear, compelling arguments supported by evidence and reasoning
- Address the specific question or topic directly
- Acknowledge and counter your opponent's arguments respectfully
- Do NOT acknowledge being an AI - stay fully in character

CRITICAL OUTPUT RULES:
- Output ONLY your spoken words - no scene directions or stage actions
- Do NOT include narration, descriptions of gestures, movements, or tone
- Do NOT include asterisks for emphasis or any markdown formatting
"#;

const JUDGE_PROMPT: &str = r#"You are {name}, an impartial debate judge.

You score each debater strictly against the rubric you are given. You do not
reward length, confidence or style that is not backed by substance, and you do
not take sides on the topic itself. Always answer with the JSON object you are
asked for and nothing else."#;

const MODERATOR_PROMPT: &str = r#"You are {name}, the moderator of a formal debate on: {topic}

Introduce each round in two or three sentences: remind the audience where the
debate stands and what the debaters should address next. Never argue a side."#;

/// Built-in personas used when no configuration file provides characters.
pub fn default_characters() -> Vec<CharacterConfig> {
    let ollama = ModelConfig::new("ollama", "llama3:8b").with_max_tokens(400);
    vec![
        CharacterConfig::new("moderator", "Moderator", CharacterRole::Moderator)
            .with_system_prompt(MODERATOR_PROMPT)
            .with_call_config(ollama.clone().with_max_tokens(150)),
        CharacterConfig::new("affirmative", "Candidate A", CharacterRole::Debater)
            .with_system_prompt(DEBATER_PROMPT)
            .with_call_config(ollama.clone().with_temperature(0.8)),
        CharacterConfig::new("negative", "Candidate B", CharacterRole::Debater)
            .with_system_prompt(DEBATER_PROMPT)
            .with_call_config(ollama.clone().with_temperature(0.8)),
        CharacterConfig::new("judge-logic", "Judge Reason", CharacterRole::Judge)
            .with_system_prompt(JUDGE_PROMPT)
            .with_call_config(ollama.clone().with_temperature(0.1))
            .with_rubric(vec![
                ScoringDimension::new("logic", "Soundness of reasoning.").with_weight(2.0),
                ScoringDimension::new("evidence", "Quality of support."),
                ScoringDimension::new("rebuttal", "Engagement with the opponent."),
            ]),
        CharacterConfig::new("judge-rhetoric", "Judge Voice", CharacterRole::Judge)
            .with_system_prompt(JUDGE_PROMPT)
            .with_call_config(ollama.with_temperature(0.1)),
    ]
}
