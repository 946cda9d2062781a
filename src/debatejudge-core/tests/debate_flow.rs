//! End-to-end debates driven through a stub provider registered in the
//! registry.

use async_trait::async_trait;
use chrono::Utc;
use debatejudge_core::{
    CapabilityDescriptor, CapabilityPolicy, CharacterConfig, CharacterRole, CharacterStore,
    Debate, DebateError, DebateSetup, ManualClock, ModelConfig, Parameter, Prompt,
    ProviderClient, ProviderRegistry, ProviderResponse, RoundOutcome, ScoringOutcome, Session,
    SessionStatus, Side, Usage,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Barrier, Notify};

const JUDGE_FOR_ADA: &str = r#"{"scores": {"Ada": {"logic": 8, "evidence": 7, "rebuttal": 6, "delivery": 5},
  "Grace": {"logic": 5, "evidence": 5, "rebuttal": 5, "delivery": 5}},
  "winner": "Ada", "reasoning": "Ada answered every point."}"#;

const JUDGE_FOR_GRACE: &str = r#"Here is my verdict:
```json
{"scores": {"ada": {"logic": 4, "evidence": 4, "rebuttal": 4, "delivery": 4},
  "grace": {"logic": 6, "evidence": 6, "rebuttal": 6, "delivery": 6}},
  "winner": "grace", "reasoning": "Grace had the stronger evidence."}
```"#;

/// Answers according to the requested model name.
struct StubProvider {
    capabilities: CapabilityDescriptor,
    seen: Mutex<Vec<ModelConfig>>,
    /// Signalled on entry and awaited before answering, when set.
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    /// Restricts the gate to one model; every call is gated when unset.
    gate_model: Option<&'static str>,
    /// Every judge call waits here, when set.
    barrier: Option<Arc<Barrier>>,
}

impl StubProvider {
    fn new() -> Self {
        Self {
            capabilities: CapabilityDescriptor::new(100_000, 1_000)
                .with_parameters([Parameter::Temperature, Parameter::MaxTokens]),
            seen: Mutex::new(Vec::new()),
            gate: None,
            gate_model: None,
            barrier: None,
        }
    }
}

#[async_trait]
impl ProviderClient for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn capabilities(&self) -> &CapabilityDescriptor {
        &self.capabilities
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        config: &ModelConfig,
    ) -> Result<ProviderResponse, DebateError> {
        self.seen.lock().unwrap().push(config.clone());

        let gated = self.gate_model.is_none_or(|m| m == config.model);
        if let (Some((entered, release)), true) = (&self.gate, gated) {
            entered.notify_one();
            release.notified().await;
        }

        let text = match config.model.as_str() {
            "judge-ada" | "judge-grace" => {
                if let Some(barrier) = &self.barrier {
                    barrier.wait().await;
                }
                if config.model == "judge-ada" {
                    JUDGE_FOR_ADA.to_string()
                } else {
                    JUDGE_FOR_GRACE.to_string()
                }
            }
            "prose" => "Both were fine, I suppose.".to_string(),
            "silent" => "   ".to_string(),
            model => format!(
                "{} speaks after {} statements",
                model,
                prompt.user.matches("] Ada (").count() + prompt.user.matches("] Grace (").count()
            ),
        };

        Ok(ProviderResponse {
            text,
            model: config.model.clone(),
            usage: Usage::new(10, 5),
            created_at: Utc::now(),
        })
    }
}

fn stub(model: &str) -> ModelConfig {
    ModelConfig::new("stub", model)
}

fn characters(judge_models: &[&str]) -> CharacterStore {
    let mut all = vec![
        CharacterConfig::new("ada", "Ada", CharacterRole::Debater).with_call_config(stub("ada")),
        CharacterConfig::new("grace", "Grace", CharacterRole::Debater)
            .with_call_config(stub("grace")),
    ];
    for (i, model) in judge_models.iter().enumerate() {
        all.push(
            CharacterConfig::new(format!("j{}", i + 1), format!("Judge {}", i + 1), CharacterRole::Judge)
                .with_call_config(stub(model)),
        );
    }
    CharacterStore::from_characters(all)
}

fn registry(provider: Arc<StubProvider>) -> Arc<ProviderRegistry> {
    let registry = ProviderRegistry::new();
    registry.register("Stub", move |_| Ok(provider.clone() as Arc<dyn ProviderClient>));
    Arc::new(registry)
}

fn debate_with(
    provider: Arc<StubProvider>,
    store: &CharacterStore,
    rounds: u32,
    policy: CapabilityPolicy,
) -> Debate {
    let session = Session::new(Some(rounds))
        .unwrap()
        .with_clock(Arc::new(ManualClock::new()));
    Debate::new(
        DebateSetup::new("Open source beats closed source", "ada", "grace").with_policy(policy),
        Arc::new(session),
        store,
        registry(provider),
    )
    .unwrap()
}

#[tokio::test]
async fn test_full_debate() {
    let provider = Arc::new(StubProvider::new());
    let store = characters(&["judge-ada", "judge-grace"]);
    let debate = debate_with(provider.clone(), &store, 2, CapabilityPolicy::Reject);
    let session = debate.session().clone();

    session.start().unwrap();
    let RoundOutcome::Completed { round, entries } = debate.run_round().await.unwrap() else {
        panic!("round 1 was discarded");
    };
    assert_eq!(round, 1);
    assert_eq!(entries[0].speaker_name, "Ada");
    assert_eq!(entries[0].side, Some(Side::For));
    assert_eq!(entries[0].content, "ada speaks after 0 statements");
    assert_eq!(entries[1].content, "grace speaks after 1 statements");

    let ScoringOutcome::Scored(scores) = debate.score_round(1).await.unwrap() else {
        panic!("round 1 scores were discarded");
    };
    assert_eq!(scores.scorecards.len(), 2);
    assert_eq!(scores.totals["Ada"], 42.0);
    assert_eq!(scores.totals["Grace"], 44.0);
    assert_eq!(scores.winner.as_deref(), Some("Grace"));

    assert_eq!(session.advance_round().unwrap(), 2);
    let RoundOutcome::Completed { entries, .. } = debate.run_round().await.unwrap() else {
        panic!("round 2 was discarded");
    };
    // Speaking order alternates.
    assert_eq!(entries[0].speaker_name, "Grace");
    assert_eq!(entries[0].content, "grace speaks after 2 statements");

    debate.score_round(2).await.unwrap();
    assert_eq!(
        session.advance_round(),
        Err(DebateError::RoundLimitExceeded { total_rounds: 2 })
    );
    session.end().unwrap();

    assert_eq!(debate.transcript().len(), 4);
    assert_eq!(debate.scorecards().len(), 4);
    let standings = debate.standings();
    assert_eq!(standings["Ada"], 84.0);
    assert_eq!(standings["Grace"], 88.0);

    // 4 debater turns and 4 judge calls.
    assert_eq!(provider.seen.lock().unwrap().len(), 8);
}

#[tokio::test]
async fn test_rescoring_a_round_replaces_its_scorecards() {
    let provider = Arc::new(StubProvider::new());
    let store = characters(&["judge-ada"]);
    let debate = debate_with(provider, &store, 1, CapabilityPolicy::Reject);

    debate.session().start().unwrap();
    debate.run_round().await.unwrap();
    debate.score_round(1).await.unwrap();
    debate.score_round(1).await.unwrap();

    assert_eq!(debate.scorecards().len(), 1);
    assert_eq!(debate.standings()["Ada"], 26.0);
}

#[tokio::test]
async fn test_statement_arriving_after_end_is_discarded() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let provider = Arc::new(StubProvider {
        gate: Some((entered.clone(), release.clone())),
        ..StubProvider::new()
    });
    let store = characters(&["judge-ada"]);
    let debate = Arc::new(debate_with(provider, &store, 3, CapabilityPolicy::Reject));
    debate.session().start().unwrap();

    let running = debate.clone();
    let handle = tokio::spawn(async move { running.run_round().await });

    entered.notified().await;
    debate.session().end().unwrap();
    release.notify_one();

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, RoundOutcome::Discarded { round: 1 });
    assert!(debate.transcript().is_empty());
    assert_eq!(debate.session().status(), SessionStatus::Finished);
}

#[tokio::test]
async fn test_run_round_rejected_while_paused() {
    let provider = Arc::new(StubProvider::new());
    let store = characters(&["judge-ada"]);
    let debate = debate_with(provider.clone(), &store, 3, CapabilityPolicy::Reject);
    debate.session().start().unwrap();
    assert!(debate.session().pause());

    let err = debate.run_round().await.unwrap_err();
    assert_eq!(
        err,
        DebateError::InvalidTransition {
            operation: "play",
            from: SessionStatus::Paused,
        }
    );
    assert!(provider.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_judges_score_in_parallel() {
    // Each judge blocks until both have been called; sequential dispatch
    // would never get past the first.
    let provider = Arc::new(StubProvider {
        barrier: Some(Arc::new(Barrier::new(2))),
        ..StubProvider::new()
    });
    let store = characters(&["judge-ada", "judge-grace"]);
    let debate = debate_with(provider, &store, 1, CapabilityPolicy::Reject);
    debate.session().start().unwrap();
    debate.run_round().await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), debate.score_round(1))
        .await
        .expect("judges were not called in parallel")
        .unwrap();
    assert!(matches!(outcome, ScoringOutcome::Scored(s) if s.scorecards.len() == 2));
}

#[tokio::test]
async fn test_scores_overtaken_by_end_are_discarded() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let provider = Arc::new(StubProvider {
        gate: Some((entered.clone(), release.clone())),
        gate_model: Some("judge-ada"),
        ..StubProvider::new()
    });
    let store = characters(&["judge-ada"]);
    let debate = Arc::new(debate_with(provider, &store, 1, CapabilityPolicy::Reject));
    debate.session().start().unwrap();
    debate.run_round().await.unwrap();

    let scoring = debate.clone();
    let handle = tokio::spawn(async move { scoring.score_round(1).await });

    entered.notified().await;
    debate.session().end().unwrap();
    release.notify_one();

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, ScoringOutcome::Discarded { round: 1 });
    assert!(debate.scorecards().is_empty());
    assert_eq!(debate.transcript().len(), 2);
}

#[tokio::test]
async fn test_scoring_after_end_is_kept() {
    let provider = Arc::new(StubProvider::new());
    let store = characters(&["judge-ada"]);
    let debate = debate_with(provider, &store, 1, CapabilityPolicy::Reject);
    debate.session().start().unwrap();
    debate.run_round().await.unwrap();
    debate.session().end().unwrap();

    let outcome = debate.score_round(1).await.unwrap();
    assert!(matches!(outcome, ScoringOutcome::Scored(_)));
    assert_eq!(debate.scorecards().len(), 1);
}

#[tokio::test]
async fn test_malformed_verdict_records_nothing() {
    let provider = Arc::new(StubProvider::new());
    let store = characters(&["judge-ada", "prose"]);
    let debate = debate_with(provider, &store, 1, CapabilityPolicy::Reject);
    debate.session().start().unwrap();
    debate.run_round().await.unwrap();

    let err = debate.score_round(1).await.unwrap_err();
    assert!(matches!(err, DebateError::MalformedVerdict { judge, .. } if judge == "j2"));
    assert!(debate.scorecards().is_empty());
}

#[tokio::test]
async fn test_failed_round_is_released() {
    let provider = Arc::new(StubProvider::new());
    let store = characters(&["judge-ada"]);
    store.upsert(
        CharacterConfig::new("grace", "Grace", CharacterRole::Debater).with_call_config(stub("silent")),
    );
    let debate = debate_with(provider.clone(), &store, 1, CapabilityPolicy::Reject);
    debate.session().start().unwrap();

    let err = debate.run_round().await.unwrap_err();
    assert!(matches!(err, DebateError::ProviderError { ref provider, .. } if provider == "stub"));
    // Ada's statement is dropped with the failed round.
    assert!(debate.transcript().is_empty());

    // The round can be attempted again and fails the same way.
    let err = debate.run_round().await.unwrap_err();
    assert!(matches!(err, DebateError::ProviderError { .. }));
    assert_eq!(provider.seen.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_round_cannot_be_played_twice() {
    let provider = Arc::new(StubProvider::new());
    let store = characters(&["judge-ada"]);
    let debate = debate_with(provider.clone(), &store, 2, CapabilityPolicy::Reject);
    debate.session().start().unwrap();

    debate.run_round().await.unwrap();
    let err = debate.run_round().await.unwrap_err();
    assert_eq!(
        err,
        DebateError::InvalidTransition {
            operation: "replay a round of",
            from: SessionStatus::Ongoing,
        }
    );
    assert_eq!(debate.transcript().len(), 2);
    assert_eq!(provider.seen.lock().unwrap().len(), 2);

    debate.session().advance_round().unwrap();
    assert!(debate.run_round().await.is_ok());
    assert_eq!(debate.transcript().len(), 4);
}

#[tokio::test]
async fn test_simultaneous_plays_of_one_round() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let provider = Arc::new(StubProvider {
        gate: Some((entered.clone(), release.clone())),
        gate_model: Some("ada"),
        ..StubProvider::new()
    });
    let store = characters(&["judge-ada"]);
    let debate = Arc::new(debate_with(provider, &store, 1, CapabilityPolicy::Reject));
    debate.session().start().unwrap();

    let first = debate.clone();
    let handle = tokio::spawn(async move { first.run_round().await });
    entered.notified().await;

    // The first call is mid-round; a second one is turned away.
    assert!(matches!(
        debate.run_round().await,
        Err(DebateError::InvalidTransition { .. })
    ));

    release.notify_one();
    let outcome = handle.await.unwrap().unwrap();
    assert!(matches!(outcome, RoundOutcome::Completed { ref entries, .. } if entries.len() == 2));
    assert_eq!(debate.transcript().len(), 2);
}

#[tokio::test]
async fn test_unknown_provider() {
    let provider = Arc::new(StubProvider::new());
    let store = characters(&["judge-ada"]);
    store.upsert(
        CharacterConfig::new("ada", "Ada", CharacterRole::Debater)
            .with_call_config(ModelConfig::new("nowhere", "m")),
    );
    let debate = debate_with(provider.clone(), &store, 1, CapabilityPolicy::Reject);
    debate.session().start().unwrap();

    let err = debate.run_round().await.unwrap_err();
    assert_eq!(err, DebateError::UnknownProvider("nowhere".to_string()));
    assert!(provider.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unsupported_parameter_rejected_before_call() {
    let provider = Arc::new(StubProvider::new());
    let store = characters(&["judge-ada"]);
    store.upsert(
        CharacterConfig::new("ada", "Ada", CharacterRole::Debater)
            .with_call_config(stub("ada").with_top_p(0.9)),
    );
    let debate = debate_with(provider.clone(), &store, 1, CapabilityPolicy::Reject);
    debate.session().start().unwrap();

    let err = debate.run_round().await.unwrap_err();
    assert_eq!(
        err,
        DebateError::UnsupportedCapability {
            provider: "stub".to_string(),
            parameter: "top_p".to_string(),
        }
    );
    assert!(provider.seen.lock().unwrap().is_empty());
    assert!(debate.transcript().is_empty());
}

#[tokio::test]
async fn test_unsupported_parameter_dropped_under_drop_policy() {
    let provider = Arc::new(StubProvider::new());
    let store = characters(&["judge-ada"]);
    store.upsert(
        CharacterConfig::new("ada", "Ada", CharacterRole::Debater)
            .with_call_config(stub("ada").with_top_p(0.9).with_temperature(0.5)),
    );
    let debate = debate_with(provider.clone(), &store, 1, CapabilityPolicy::Drop);
    debate.session().start().unwrap();
    debate.run_round().await.unwrap();

    let seen = provider.seen.lock().unwrap();
    assert_eq!(seen[0].model, "ada");
    assert_eq!(seen[0].top_p, None);
    assert_eq!(seen[0].temperature, Some(0.5));
    // The stored character is untouched.
    assert_eq!(store.get("ada").unwrap().call_config.unwrap().top_p, Some(0.9));
}

#[tokio::test]
async fn test_response_budget_over_limit() {
    let provider = Arc::new(StubProvider::new());
    let store = characters(&["judge-ada"]);
    store.upsert(
        CharacterConfig::new("ada", "Ada", CharacterRole::Debater)
            .with_call_config(stub("ada").with_max_tokens(5_000)),
    );
    let debate = debate_with(provider, &store, 1, CapabilityPolicy::Drop);
    debate.session().start().unwrap();

    let err = debate.run_round().await.unwrap_err();
    assert_eq!(
        err,
        DebateError::ContextTooLarge {
            provider: "stub".to_string(),
            requested: 5_000,
            limit: 1_000,
        }
    );
}
