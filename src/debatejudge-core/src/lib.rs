//! DebateJudge Core Library
//!
//! Session lifecycle control, the provider registry with capability gating,
//! character configuration and judge scoring for AI-judged debates.

pub mod capability;
pub mod character;
pub mod clock;
pub mod config;
pub mod debate;
pub mod error;
pub mod provider;
pub mod registry;
pub mod scoring;
pub mod session;

pub use capability::{CapabilityDescriptor, CapabilityPolicy, Parameter};
pub use character::{CharacterConfig, CharacterRole, CharacterStore, ScoringDimension};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{Config, PromptsConfig, ProviderKind, ProviderSettings};
pub use debate::{Debate, DebateSetup, RoundOutcome, RoundScores, ScoringOutcome, Side, TranscriptEntry};
pub use error::DebateError;
pub use provider::{ModelConfig, Prompt, ProviderClient, ProviderResponse, Usage};
pub use registry::ProviderRegistry;
pub use scoring::{RubricScorer, ScoreAggregator, Scorecard};
pub use session::{Session, SessionEvent, SessionObserver, SessionState, SessionStatus};
