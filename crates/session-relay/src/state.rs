//! Session state machine.
//!
//! `SessionState` is the local view of one server-tracked session. Inbound
//! frames are folded into it with [`SessionState::apply`]; the connection
//! lifecycle moves it through `connecting` and `disconnected`. Once the
//! session reaches `completed` or `failed` nothing changes it again.

use crate::messages::InboundFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Round count assumed until the server says otherwise.
pub const DEFAULT_TOTAL_ROUNDS: u32 = 5;

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    InProgress,
    Completed,
    Failed,
    Disconnected,
}

impl SessionStatus {
    /// `completed` and `failed` end the session for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundMessage {
    pub round_number: u32,
    pub speaker: String,
    pub content: String,
}

/// Final numeric results, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scores(BTreeMap<String, f64>);

impl Scores {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Scores {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Outcome of folding one frame into the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Frame was dropped (session already terminal, or invalid content).
    Ignored,
    /// Frame accepted but nothing observable changed.
    Unchanged,
    /// State changed; session still live.
    Updated,
    /// State changed and the session is now terminal.
    Terminal,
}

impl Transition {
    pub fn changed(self) -> bool {
        matches!(self, Self::Updated | Self::Terminal)
    }
}

/// Local view of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub current_round: u32,
    pub total_rounds: u32,
    pub messages: Vec<RoundMessage>,
    pub scores: Option<Scores>,
    pub analysis: Option<serde_json::Value>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(DEFAULT_TOTAL_ROUNDS)
    }
}

impl SessionState {
    /// Initial state: disconnected, round 0, nothing received.
    pub fn new(total_rounds: u32) -> Self {
        Self {
            status: SessionStatus::Disconnected,
            current_round: 0,
            total_rounds: total_rounds.max(1),
            messages: Vec::new(),
            scores: None,
            analysis: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fold an inbound frame into the state.
    pub fn apply(&mut self, frame: InboundFrame) -> Transition {
        if self.is_terminal() {
            return self.apply_late_results(frame);
        }

        match frame {
            InboundFrame::State {
                status,
                current_round,
                total_rounds,
                messages,
            } => {
                self.status = status;
                self.current_round = self.current_round.max(current_round);
                if let Some(total) = total_rounds.filter(|t| *t > 0) {
                    self.total_rounds = total;
                }
                self.messages = messages;
            }
            InboundFrame::RoundMessage {
                round_number,
                speaker,
                content,
            } => {
                if round_number == 0 {
                    return Transition::Ignored;
                }
                self.status = SessionStatus::InProgress;
                self.current_round = self.current_round.max(round_number);
                self.messages.push(RoundMessage {
                    round_number,
                    speaker,
                    content,
                });
            }
            InboundFrame::Completed { scores, analysis } => {
                self.status = SessionStatus::Completed;
                self.scores = scores;
                self.analysis = analysis;
            }
            InboundFrame::Error { .. } => {
                self.status = SessionStatus::Failed;
            }
            InboundFrame::Pong {} => return Transition::Unchanged,
        }

        if self.is_terminal() {
            Transition::Terminal
        } else {
            Transition::Updated
        }
    }

    /// A `state` frame can report `completed` before the results frame
    /// arrives. Results still fill in, each field at most once.
    fn apply_late_results(&mut self, frame: InboundFrame) -> Transition {
        let InboundFrame::Completed { scores, analysis } = frame else {
            return Transition::Ignored;
        };
        if self.status != SessionStatus::Completed {
            return Transition::Ignored;
        }

        let mut filled = false;
        if self.scores.is_none() && scores.is_some() {
            self.scores = scores;
            filled = true;
        }
        if self.analysis.is_none() && analysis.is_some() {
            self.analysis = analysis;
            filled = true;
        }

        if filled {
            Transition::Updated
        } else {
            Transition::Ignored
        }
    }

    /// A connect attempt is starting. Returns whether the status changed.
    pub fn begin_connecting(&mut self) -> bool {
        self.set_live_status(SessionStatus::Connecting)
    }

    /// The connection dropped. Returns whether the status changed.
    pub fn mark_disconnected(&mut self) -> bool {
        self.set_live_status(SessionStatus::Disconnected)
    }

    fn set_live_status(&mut self, status: SessionStatus) -> bool {
        if self.is_terminal() || self.status == status {
            return false;
        }
        self.status = status;
        true
    }
}
