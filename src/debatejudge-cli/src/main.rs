//! DebateJudge CLI - operator console for AI-judged debates
//!
//! Runs a debate between two AI debaters, round by round, while a panel of AI
//! judges scores each round. The operator steps the session with commands on
//! stdin, or lets it run unattended with `--auto`.

use clap::{ArgAction, Parser};
use colored::Colorize;
use debatejudge_core::config::default_config;
use debatejudge_core::{
    CharacterConfig, CharacterRole, CharacterStore, Config, Debate, DebateError, DebateSetup,
    ModelConfig, ProviderRegistry, RoundOutcome, ScoringOutcome, Session, SessionEvent,
    SessionStatus, TranscriptEntry,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "debatejudge",
    version,
    about = "AI Debate Judge - Run and score debates between AIs",
    long_about = "An operator console for debates between AI debaters, scored round by round by a panel of AI judges."
)]
struct Cli {
    /// The topic to debate
    #[arg(value_name = "TOPIC")]
    topic: String,

    /// Number of debate rounds (defaults to the configuration, usually 3)
    #[arg(short, long, value_name = "ROUNDS")]
    rounds: Option<u32>,

    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debater model as provider:model (specify twice: for, then against)
    #[arg(short, long, action = ArgAction::Append, value_name = "PROVIDER:MODEL")]
    debater: Vec<String>,

    /// Judge model as provider:model (repeatable; replaces configured judges)
    #[arg(short, long, action = ArgAction::Append, value_name = "PROVIDER:MODEL")]
    judge: Vec<String>,

    /// Play and score every round without waiting for commands
    #[arg(long)]
    auto: bool,
}

const HELP: &str = "Commands:
  next    play the next round
  score   score the last played round
  pause   pause the debate clock
  resume  resume after a pause
  status  show session status and standings
  end     finish the debate
  help    show this help";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };

    let store = CharacterStore::from_characters(config.characters.clone());
    let (for_id, against_id) = assign_debaters(&store, &cli.debater)?;
    let judge_ids = assign_judges(&store, &cli.judge)?;
    let moderator_id = store
        .active_by_role(CharacterRole::Moderator)
        .into_iter()
        .next()
        .map(|m| m.id);

    let registry = Arc::new(ProviderRegistry::with_providers(&config.providers));
    let session = Arc::new(Session::new(Some(cli.rounds.unwrap_or(config.session.total_rounds)))?);
    session.subscribe(Box::new(print_event));

    let mut setup = DebateSetup::new(&cli.topic, for_id, against_id)
        .with_judges(judge_ids)
        .with_policy(config.session.capability_policy)
        .with_prompts(config.prompts.clone());
    if let Some(id) = moderator_id {
        setup = setup.with_moderator(id);
    }
    let debate = Debate::new(setup, session.clone(), &store, registry)?;

    print_header(&debate);
    session.start()?;

    if cli.auto {
        run_auto(&debate).await?;
    } else {
        run_console(&debate).await?;
    }

    if session.status() != SessionStatus::Finished {
        session.end()?;
    }
    print_standings(&debate.standings());

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  Debate concluded.".bright_green().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();

    Ok(())
}

/// Pick the first two active debaters, applying `--debater` model overrides.
fn assign_debaters(
    store: &CharacterStore,
    overrides: &[String],
) -> Result<(String, String), DebateError> {
    if !overrides.is_empty() && overrides.len() != 2 {
        return Err(DebateError::InvalidConfig(format!(
            "--debater must be given exactly twice, got {}",
            overrides.len()
        )));
    }

    let debaters = store.active_by_role(CharacterRole::Debater);
    let [first, second, ..] = debaters.as_slice() else {
        return Err(DebateError::InvalidConfig(
            "the configuration needs two active debaters".to_string(),
        ));
    };

    for (character, target) in [first, second].into_iter().zip(overrides) {
        let model = ModelConfig::parse(target)?;
        let call_config = match &character.call_config {
            Some(existing) => existing.merged_with(&model),
            None => model,
        };
        store.upsert(character.clone().with_call_config(call_config));
    }

    Ok((first.id.clone(), second.id.clone()))
}

/// Configured judges, or one fresh judge per `--judge` model.
fn assign_judges(store: &CharacterStore, models: &[String]) -> Result<Vec<String>, DebateError> {
    if models.is_empty() {
        return Ok(Vec::new());
    }

    let template = store.active_by_role(CharacterRole::Judge).into_iter().next();
    for existing in store.active_by_role(CharacterRole::Judge) {
        store.upsert(existing.inactive());
    }

    let mut ids = Vec::new();
    for (i, target) in models.iter().enumerate() {
        let model = ModelConfig::parse(target)?;
        let id = format!("judge-{}", i + 1);
        let mut judge = CharacterConfig::new(&id, format!("Judge {}", i + 1), CharacterRole::Judge)
            .with_call_config(model);
        if let Some(template) = &template {
            judge.system_prompt = template.system_prompt.clone();
            judge.rubric = template.rubric.clone();
        }
        debug!(judge = %id, model = %target, "configured judge from command line");
        store.upsert(judge);
        ids.push(id);
    }
    Ok(ids)
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::StatusChanged(status) => {
            println!("{} {}", "●".bright_magenta(), format!("Session {}", status).bright_magenta());
        }
        SessionEvent::RoundChanged(round) => {
            println!("{} {}", "●".bright_magenta(), format!("Round {}", round).bright_magenta());
        }
    }
}

fn print_header(debate: &Debate) {
    let state = debate.session().snapshot();
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!("  {} - {} rounds", "DebateJudge".bold(), state.total_rounds())
            .bright_blue()
            .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Topic:".bold(), debate.topic().bright_white());
    println!();
    println!("{}", "Debaters:".bold());
    for (i, d) in debate.debaters().iter().enumerate() {
        println!(
            "  {}. {} ({}) - using {}",
            i + 1,
            d.character.name.bright_cyan(),
            d.side.display_name().yellow(),
            model_label(&d.character).dimmed()
        );
    }
    println!("{}", "Judges:".bold());
    for judge in debate.judges() {
        println!(
            "  - {} - using {}",
            judge.name.bright_cyan(),
            model_label(judge).dimmed()
        );
    }
    println!();
    println!("{}", "─".repeat(70).dimmed());
}

fn model_label(character: &CharacterConfig) -> String {
    character
        .call_config
        .as_ref()
        .map(|c| format!("{}:{}", c.provider, c.model))
        .unwrap_or_default()
}

fn print_entry(entry: &TranscriptEntry) {
    let role = entry
        .side
        .map(|s| s.display_name().to_string())
        .unwrap_or_else(|| "MODERATOR".to_string());
    println!(
        "{} {} {}",
        "▶".bright_cyan(),
        entry.speaker_name.bright_cyan().bold(),
        format!("({})", role).yellow()
    );
    // Word wrap and indent the content
    let wrapped = textwrap(&entry.content, 66);
    for line in wrapped.lines() {
        println!("  {}", line);
    }
    println!();
}

async fn play_round(debate: &Debate) -> Result<bool, DebateError> {
    let round = debate.session().current_round();
    println!();
    println!("{}", "═".repeat(70).bright_magenta());
    println!("{}", format!("  ROUND {}", round).bright_magenta().bold());
    println!("{}", "═".repeat(70).bright_magenta());
    println!();

    match debate.run_round().await? {
        RoundOutcome::Completed { entries, .. } => {
            entries.iter().for_each(print_entry);
            Ok(true)
        }
        RoundOutcome::Discarded { round } => {
            println!("{}", format!("Round {} was closed before it finished.", round).yellow());
            Ok(false)
        }
    }
}

async fn score(debate: &Debate, round: u32) -> Result<(), DebateError> {
    println!("{}", format!("Judges are scoring round {}...", round).dimmed());
    match debate.score_round(round).await? {
        ScoringOutcome::Scored(scores) => {
            for card in &scores.scorecards {
                let totals = card
                    .totals
                    .iter()
                    .map(|(name, total)| format!("{} {:.1}", name, total))
                    .collect::<Vec<_>>()
                    .join(", ");
                println!(
                    "  {} {} {}",
                    card.judge_name.bright_cyan(),
                    totals,
                    card.winner
                        .as_deref()
                        .map(|w| format!("(favours {})", w))
                        .unwrap_or_default()
                        .yellow()
                );
                if !card.reasoning.is_empty() {
                    for line in textwrap(&card.reasoning, 62).lines() {
                        println!("    {}", line.dimmed());
                    }
                }
            }
            match scores.winner {
                Some(winner) => println!("  {} {}", "Round winner:".bold(), winner.bright_green()),
                None => println!("  {}", "Round drawn.".bold()),
            }
            println!();
        }
        ScoringOutcome::Discarded { round } => {
            println!("{}", format!("Scores for round {} were discarded.", round).yellow());
        }
    }
    Ok(())
}

fn print_standings(standings: &BTreeMap<String, f32>) {
    if standings.is_empty() {
        println!("{}", "No rounds were scored.".dimmed());
        return;
    }
    println!("{}", "Standings:".bold());
    for (name, total) in standings {
        println!("  {} {:.1}", name.bright_cyan(), total);
    }
}

async fn run_auto(debate: &Debate) -> Result<(), DebateError> {
    let session = debate.session();
    loop {
        let round = session.current_round();
        if play_round(debate).await? {
            score(debate, round).await?;
        }
        if round >= session.snapshot().total_rounds() {
            break;
        }
        session.advance_round()?;
    }
    session.end()
}

async fn run_console(debate: &Debate) -> Result<(), Box<dyn std::error::Error>> {
    let session = debate.session();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut played: Option<u32> = None;

    println!("{}", HELP.dimmed());
    loop {
        print!("{} ", ">".bright_blue());
        std::io::Write::flush(&mut std::io::stdout())?;

        let Some(line) = lines.next_line().await? else {
            info!("stdin closed, ending debate");
            break;
        };

        let result = match line.trim().to_lowercase().as_str() {
            "" => Ok(()),
            "next" => next_round(debate, &mut played).await,
            "score" => match played {
                Some(round) => score(debate, round).await,
                None => Err(DebateError::InvalidConfig("no round has been played yet".to_string())),
            },
            "pause" => {
                if !session.pause() {
                    println!("{}", "Nothing to pause.".dimmed());
                }
                Ok(())
            }
            "resume" => {
                if !session.resume() {
                    println!("{}", "Nothing to resume.".dimmed());
                }
                Ok(())
            }
            "status" => {
                let state = session.snapshot();
                println!(
                    "{} active {:.1}s",
                    state.status_line(),
                    session.elapsed_active_duration().as_secs_f64()
                );
                print_standings(&debate.standings());
                Ok(())
            }
            "end" => break,
            "help" => {
                println!("{}", HELP);
                Ok(())
            }
            other => Err(DebateError::InvalidConfig(format!("unknown command '{}'", other))),
        };

        if let Err(e) = result {
            println!("{} {}", "Error:".red().bold(), e);
        }
    }
    Ok(())
}

/// Play the current round, or advance first if it has already been played.
async fn next_round(debate: &Debate, played: &mut Option<u32>) -> Result<(), DebateError> {
    let session = debate.session();
    if *played == Some(session.current_round()) {
        session.advance_round()?;
    }
    let round = session.current_round();
    if play_round(debate).await? {
        *played = Some(round);
    }
    Ok(())
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();

    for (i, paragraph) in text.split("\n\n").enumerate() {
        if i > 0 {
            result.push_str("\n\n");
        }
        let mut current_line_len = 0;
        for word in paragraph.split_whitespace() {
            if current_line_len + word.len() + 1 > width && current_line_len > 0 {
                result.push('\n');
                current_line_len = 0;
            }
            if current_line_len > 0 {
                result.push(' ');
                current_line_len += 1;
            }
            result.push_str(word);
            current_line_len += word.len();
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use debatejudge_core::character::default_characters;

    #[test]
    fn test_textwrap_keeps_paragraphs() {
        let wrapped = textwrap("one two three\n\nfour", 8);
        assert_eq!(wrapped, "one two\nthree\n\nfour");
    }

    #[test]
    fn test_assign_debaters_applies_overrides() {
        let store = CharacterStore::from_characters(default_characters());
        let (a, b) = assign_debaters(
            &store,
            &["deepseek:deepseek-chat".to_string(), "openai:gpt-4o-mini".to_string()],
        )
        .unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("affirmative", "negative"));

        let config = store.get("affirmative").unwrap().call_config.unwrap();
        assert_eq!(config.provider, "deepseek");
        assert_eq!(config.model, "deepseek-chat");
        assert_eq!(config.temperature, Some(0.8));
    }

    #[test]
    fn test_assign_debaters_requires_two_overrides() {
        let store = CharacterStore::from_characters(default_characters());
        assert!(assign_debaters(&store, &["ollama:llama3".to_string()]).is_err());
    }

    #[test]
    fn test_assign_judges_replaces_panel() {
        let store = CharacterStore::from_characters(default_characters());
        let ids = assign_judges(&store, &["ollama:qwen2.5".to_string()]).unwrap();
        assert_eq!(ids, vec!["judge-1"]);

        let judges = store.active_by_role(CharacterRole::Judge);
        assert_eq!(judges.len(), 1);
        assert_eq!(judges[0].call_config.as_ref().unwrap().model, "qwen2.5");
        assert!(judges[0].system_prompt.is_some());
    }
}
