use serde::{Deserialize, Serialize};

use crate::models::{ItemId, Mood};

/// Keys used in the session store
pub mod session_keys {
    /// Run configuration and every saved turn
    pub const CONFIG_DATA: &str = "configData";
    /// Final recommendation result
    pub const RECOMMENDATIONS: &str = "recommendations";
    /// In-progress selection of the active user
    pub const TURN_STATE: &str = "turn_state";
    /// Pending command for the next selection step
    pub const TURN_COMMAND: &str = "turn_command";
    /// Aggregated pools waiting for the resolver
    pub const CANDIDATE_POOLS: &str = "candidate_pools";
}

/// One user interaction during a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TurnCommand {
    /// Load a fresh candidate batch for the active user
    Enter,
    /// Select or deselect a candidate
    Toggle { item_id: ItemId },
    /// Pick (or clear) the active user's mood
    Mood {
        #[serde(default)]
        mood: Option<Mood>,
    },
    /// Save the active user's turn and move on
    Advance,
    /// Return to the previous user's turn
    Back,
}
