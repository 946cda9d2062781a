//! Debate coordination.
//!
//! A [`Debate`] binds a [`Session`] to a fixed cast of characters and drives
//! provider calls for each round: debaters speak in turn, judges score in
//! parallel. Provider calls never run under the session lock; their results
//! are recorded afterwards only if the session still accepts them.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::capability::CapabilityPolicy;
use crate::character::{CharacterConfig, CharacterRole, CharacterStore};
use crate::config::{PromptsConfig, render};
use crate::error::DebateError;
use crate::provider::{Prompt, ProviderResponse, Usage};
use crate::registry::ProviderRegistry;
use crate::scoring::{RubricScorer, ScoreAggregator, Scorecard, combine_totals, describe_rubric, leader};
use crate::session::{Session, SessionStatus};

/// Which side of the motion a debater argues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Arguing in favor of the topic.
    For,
    /// Arguing against the topic.
    Against,
}

impl Side {
    pub fn display_name(&self) -> &str {
        match self {
            Side::For => "FOR",
            Side::Against => "AGAINST",
        }
    }

    fn position(&self) -> &str {
        match self {
            Side::For => "IN FAVOR OF",
            Side::Against => "AGAINST",
        }
    }
}

/// A debater snapshot with the side it was assigned.
#[derive(Debug, Clone)]
pub struct Debater {
    pub character: CharacterConfig,
    pub side: Side,
}

/// Who takes part in a debate and how it is run.
#[derive(Debug, Clone)]
pub struct DebateSetup {
    pub topic: String,
    /// Exactly two debater ids: the first argues for, the second against.
    pub debater_ids: Vec<String>,
    /// Judge ids; every active judge in the store when empty.
    pub judge_ids: Vec<String>,
    pub moderator_id: Option<String>,
    pub policy: CapabilityPolicy,
    pub prompts: PromptsConfig,
}

impl DebateSetup {
    pub fn new(topic: impl Into<String>, for_id: impl Into<String>, against_id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            debater_ids: vec![for_id.into(), against_id.into()],
            judge_ids: Vec::new(),
            moderator_id: None,
            policy: CapabilityPolicy::default(),
            prompts: PromptsConfig::default(),
        }
    }

    pub fn with_judges(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.judge_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_moderator(mut self, id: impl Into<String>) -> Self {
        self.moderator_id = Some(id.into());
        self
    }

    pub fn with_policy(mut self, policy: CapabilityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_prompts(mut self, prompts: PromptsConfig) -> Self {
        self.prompts = prompts;
        self
    }
}

/// A statement in the debate transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub round: u32,
    pub speaker_id: String,
    pub speaker_name: String,
    /// `None` for the moderator.
    pub side: Option<Side>,
    pub content: String,
    pub usage: Usage,
    pub created_at: DateTime<Utc>,
}

/// Result of playing one round.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    Completed {
        round: u32,
        entries: Vec<TranscriptEntry>,
    },
    /// The session finished or moved on while a call was outstanding.
    Discarded { round: u32 },
}

/// All judges' scores for a round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundScores {
    pub round: u32,
    pub scorecards: Vec<Scorecard>,
    /// Debater name → summed weighted total across judges.
    pub totals: BTreeMap<String, f32>,
    pub winner: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScoringOutcome {
    Scored(RoundScores),
    /// The session finished while judges were still scoring.
    Discarded { round: u32 },
}

#[derive(Debug, Default)]
struct DebateRecord {
    transcript: Vec<TranscriptEntry>,
    scorecards: Vec<Scorecard>,
    /// Rounds a `run_round` call has claimed.
    played_rounds: BTreeSet<u32>,
}

/// Runs provider turns for one session.
pub struct Debate {
    session: Arc<Session>,
    registry: Arc<ProviderRegistry>,
    scorer: Arc<dyn ScoreAggregator>,
    topic: String,
    prompts: PromptsConfig,
    policy: CapabilityPolicy,
    debaters: Vec<Debater>,
    judges: Vec<CharacterConfig>,
    moderator: Option<CharacterConfig>,
    record: Mutex<DebateRecord>,
}

fn snapshot_role(
    store: &CharacterStore,
    id: &str,
    role: CharacterRole,
) -> Result<CharacterConfig, DebateError> {
    let character = store.get(id)?;
    if character.role != role {
        return Err(DebateError::InvalidConfig(format!(
            "character '{}' is a {}, not a {}",
            id, character.role, role
        )));
    }
    if !character.active {
        return Err(DebateError::InvalidConfig(format!(
            "character '{}' is inactive",
            id
        )));
    }
    if character.call_config.is_none() {
        return Err(DebateError::InvalidConfig(format!(
            "character '{}' has no call_config",
            id
        )));
    }
    Ok(character)
}

impl Debate {
    /// Snapshot the cast from `store` and bind it to `session`.
    pub fn new(
        setup: DebateSetup,
        session: Arc<Session>,
        store: &CharacterStore,
        registry: Arc<ProviderRegistry>,
    ) -> Result<Self, DebateError> {
        if setup.debater_ids.len() != 2 {
            return Err(DebateError::InvalidConfig(format!(
                "a debate needs exactly 2 debaters, got {}",
                setup.debater_ids.len()
            )));
        }

        let debaters = setup
            .debater_ids
            .iter()
            .zip([Side::For, Side::Against])
            .map(|(id, side)| {
                snapshot_role(store, id, CharacterRole::Debater)
                    .map(|character| Debater { character, side })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let names: HashSet<_> = debaters.iter().map(|d| d.character.name.to_lowercase()).collect();
        if names.len() != debaters.len() {
            return Err(DebateError::InvalidConfig(
                "debaters must have distinct names".to_string(),
            ));
        }

        let judges = if setup.judge_ids.is_empty() {
            store
                .active_by_role(CharacterRole::Judge)
                .into_iter()
                .filter(|j| j.call_config.is_some())
                .collect()
        } else {
            setup
                .judge_ids
                .iter()
                .map(|id| snapshot_role(store, id, CharacterRole::Judge))
                .collect::<Result<Vec<_>, _>>()?
        };
        if judges.is_empty() {
            return Err(DebateError::InvalidConfig(
                "a debate needs at least one judge".to_string(),
            ));
        }

        let moderator = setup
            .moderator_id
            .as_deref()
            .map(|id| snapshot_role(store, id, CharacterRole::Moderator))
            .transpose()?;

        info!(
            session = %session.id(),
            topic = %setup.topic,
            judges = judges.len(),
            moderated = moderator.is_some(),
            "debate configured"
        );

        Ok(Self {
            session,
            registry,
            scorer: Arc::new(RubricScorer),
            topic: setup.topic,
            prompts: setup.prompts,
            policy: setup.policy,
            debaters,
            judges,
            moderator,
            record: Mutex::new(DebateRecord::default()),
        })
    }

    /// Replace the default rubric scorer.
    pub fn with_scorer(mut self, scorer: Arc<dyn ScoreAggregator>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn debaters(&self) -> &[Debater] {
        &self.debaters
    }

    pub fn judges(&self) -> &[CharacterConfig] {
        &self.judges
    }

    pub fn moderator(&self) -> Option<&CharacterConfig> {
        self.moderator.as_ref()
    }

    fn lock_record(&self) -> MutexGuard<'_, DebateRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the full transcript.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.lock_record().transcript.clone()
    }

    pub fn scorecards(&self) -> Vec<Scorecard> {
        self.lock_record().scorecards.clone()
    }

    /// Totals per debater over every recorded scorecard.
    pub fn standings(&self) -> BTreeMap<String, f32> {
        combine_totals(&self.lock_record().scorecards)
    }

    fn debater_names(&self) -> Vec<String> {
        self.debaters.iter().map(|d| d.character.name.clone()).collect()
    }

    fn transcript_text(&self, round: Option<u32>) -> String {
        let record = self.lock_record();
        let lines: Vec<String> = record
            .transcript
            .iter()
            .filter(|e| round.is_none_or(|r| e.round == r))
            .map(|e| match e.side {
                Some(side) => format!(
                    "[Round {}] {} ({}): {}",
                    e.round,
                    e.speaker_name,
                    side.display_name(),
                    e.content
                ),
                None => format!("[Round {}] {}: {}", e.round, e.speaker_name, e.content),
            })
            .collect();

        if lines.is_empty() {
            "(no statements yet)".to_string()
        } else {
            lines.join("\n\n")
        }
    }

    fn debater_system_prompt(&self, index: usize) -> Option<String> {
        let debater = &self.debaters[index];
        let opponent = &self.debaters[1 - index];
        debater.character.system_prompt.as_deref().map(|template| {
            render(template, &[
                ("name", debater.character.display_name_with_role().as_str()),
                ("topic", self.topic.as_str()),
                ("position", debater.side.position()),
                ("opponent_name", opponent.character.name.as_str()),
            ])
        })
    }

    fn plain_system_prompt(&self, character: &CharacterConfig) -> Option<String> {
        character.system_prompt.as_deref().map(|template| {
            render(template, &[("name", character.name.as_str()), ("topic", self.topic.as_str())])
        })
    }

    /// Resolve, capability-gate and call the provider behind `character`.
    async fn invoke(
        &self,
        character: &CharacterConfig,
        prompt: Prompt,
    ) -> Result<ProviderResponse, DebateError> {
        let config = character.call_config.as_ref().ok_or_else(|| {
            DebateError::InvalidConfig(format!("character '{}' has no call_config", character.id))
        })?;
        let client = self.registry.resolve(config)?;
        let gated = client
            .capabilities()
            .gate(client.name(), config, &prompt.full_text(), self.policy)?;

        debug!(
            character = %character.id,
            provider = %client.name(),
            model = %gated.model,
            "dispatching provider call"
        );
        let response = client.complete(&prompt, &gated).await;
        if let Err(e) = &response {
            warn!(character = %character.id, error = %e, "provider call failed");
        }

        let response = response?;
        if response.text.trim().is_empty() {
            return Err(DebateError::provider(
                client.name(),
                format!("'{}' returned an empty response", character.name),
            ));
        }
        Ok(response)
    }

    /// Append an entry unless the session finished or moved past `round`.
    fn record_turn(&self, entry: TranscriptEntry) -> Option<TranscriptEntry> {
        let round = entry.round;
        let applied = self.session.apply_if(
            |state| state.status() != SessionStatus::Finished && state.current_round() == round,
            || self.lock_record().transcript.push(entry.clone()),
        );
        if applied {
            Some(entry)
        } else {
            info!(round, speaker = %entry.speaker_id, "discarding result for a closed round");
            None
        }
    }

    fn entry(
        round: u32,
        character: &CharacterConfig,
        side: Option<Side>,
        response: ProviderResponse,
    ) -> TranscriptEntry {
        TranscriptEntry {
            round,
            speaker_id: character.id.clone(),
            speaker_name: character.name.clone(),
            side,
            content: response.text,
            usage: response.usage,
            created_at: response.created_at,
        }
    }

    /// Claim `round` for playing while the session is still on it.
    fn claim_round(&self, round: u32) -> Result<(), DebateError> {
        let mut first_play = false;
        let on_round = self.session.apply_if(
            |state| state.status() == SessionStatus::Ongoing && state.current_round() == round,
            || first_play = self.lock_record().played_rounds.insert(round),
        );
        match (on_round, first_play) {
            (true, true) => Ok(()),
            (true, false) => Err(DebateError::InvalidTransition {
                operation: "replay a round of",
                from: SessionStatus::Ongoing,
            }),
            (false, _) => Err(DebateError::InvalidTransition {
                operation: "play",
                from: self.session.status(),
            }),
        }
    }

    /// Forget a failed round so it can be played again from scratch.
    fn release_round(&self, round: u32) {
        let mut record = self.lock_record();
        record.played_rounds.remove(&round);
        record.transcript.retain(|e| e.round != round);
    }

    /// Play the current round: optional moderator introduction, then each
    /// debater once. Speaking order alternates between rounds.
    ///
    /// Each round is played at most once. A provider failure releases the
    /// round and drops its partial statements.
    pub async fn run_round(&self) -> Result<RoundOutcome, DebateError> {
        let round = self.session.require_active("play")?;
        self.claim_round(round)?;

        let outcome = self.play_claimed_round(round).await;
        if let Err(e) = &outcome {
            warn!(round, error = %e, "round failed; releasing it");
            self.release_round(round);
        }
        outcome
    }

    async fn play_claimed_round(&self, round: u32) -> Result<RoundOutcome, DebateError> {
        let snapshot = self.session.snapshot();
        let mut entries = Vec::new();

        if let Some(moderator) = &self.moderator {
            let round_text = round.to_string();
            let total_text = snapshot.total_rounds().to_string();
            let user = render(&self.prompts.moderator_intro, &[
                ("round", round_text.as_str()),
                ("total_rounds", total_text.as_str()),
                ("debaters", self.debater_names().join(" and ").as_str()),
                ("transcript", self.transcript_text(None).as_str()),
            ]);
            let prompt = Prompt::new(self.plain_system_prompt(moderator), user);
            let response = self.invoke(moderator, prompt).await?;
            match self.record_turn(Self::entry(round, moderator, None, response)) {
                Some(entry) => entries.push(entry),
                None => return Ok(RoundOutcome::Discarded { round }),
            }
        }

        let order: [usize; 2] = if round % 2 == 1 { [0, 1] } else { [1, 0] };
        for index in order {
            let round_text = round.to_string();
            let total_text = snapshot.total_rounds().to_string();
            let user = render(&self.prompts.debater_turn, &[
                ("round", round_text.as_str()),
                ("total_rounds", total_text.as_str()),
                ("transcript", self.transcript_text(None).as_str()),
            ]);
            let prompt = Prompt::new(self.debater_system_prompt(index), user);
            let debater = &self.debaters[index];
            let response = self.invoke(&debater.character, prompt).await?;

            match self.record_turn(Self::entry(round, &debater.character, Some(debater.side), response)) {
                Some(entry) => entries.push(entry),
                None => return Ok(RoundOutcome::Discarded { round }),
            }
        }

        info!(round, statements = entries.len(), "round played");
        Ok(RoundOutcome::Completed { round, entries })
    }

    async fn judge_round(
        &self,
        judge: &CharacterConfig,
        round: u32,
        debaters: &[String],
        transcript: &str,
    ) -> Result<Scorecard, DebateError> {
        let round_text = round.to_string();
        let user = render(&self.prompts.judge_scoring, &[
            ("topic", self.topic.as_str()),
            ("round", round_text.as_str()),
            ("debaters", debaters.join(", ").as_str()),
            ("rubric", describe_rubric(&judge.effective_rubric()).as_str()),
            ("transcript", transcript),
        ]);
        let prompt = Prompt::new(self.plain_system_prompt(judge), user);
        let response = self.invoke(judge, prompt).await?;
        self.scorer.aggregate(judge, round, debaters, &response)
    }

    /// Ask every judge to score `round` in parallel.
    ///
    /// Waits for all judges; the first failure is returned once every call
    /// has completed. Scoring started after the debate finished is kept;
    /// scoring overtaken by the debate finishing is discarded.
    pub async fn score_round(&self, round: u32) -> Result<ScoringOutcome, DebateError> {
        let snapshot = self.session.snapshot();
        if round == 0 || round > snapshot.current_round() {
            return Err(DebateError::InvalidConfig(format!(
                "round {} has not been played",
                round
            )));
        }
        let has_statements = self
            .lock_record()
            .transcript
            .iter()
            .any(|e| e.round == round && e.side.is_some());
        if !has_statements {
            return Err(DebateError::InvalidConfig(format!(
                "round {} has no statements to score",
                round
            )));
        }

        let finished_at_dispatch = snapshot.status() == SessionStatus::Finished;
        let debaters = self.debater_names();
        let transcript = self.transcript_text(Some(round));

        let results = join_all(
            self.judges
                .iter()
                .map(|judge| self.judge_round(judge, round, &debaters, &transcript)),
        )
        .await;
        let scorecards = results.into_iter().collect::<Result<Vec<_>, _>>()?;

        let totals = combine_totals(&scorecards);
        let scores = RoundScores {
            round,
            winner: leader(&totals),
            totals,
            scorecards,
        };

        let applied = self.session.apply_if(
            |state| finished_at_dispatch || state.status() != SessionStatus::Finished,
            || {
                let mut record = self.lock_record();
                record.scorecards.retain(|c| c.round != round);
                record.scorecards.extend(scores.scorecards.iter().cloned());
            },
        );

        if applied {
            info!(round, winner = ?scores.winner, "round scored");
            Ok(ScoringOutcome::Scored(scores))
        } else {
            info!(round, "discarding scores for a finished debate");
            Ok(ScoringOutcome::Discarded { round })
        }
    }
}
