//! Turn controller: walks the users through their selections one at a time.
//!
//! ```text
//! AwaitingInput --enter--> Selecting --toggle/mood--> TurnComplete --advance--+
//!       ^                                                                    |
//!       +--------------------------- next user ------------------------------+
//!                                                        last user --> AllTurnsComplete
//! ```
//!
//! The `Configuration` in the session store is the source of truth for saved turns and the cursor.
//! The controller's own `TurnState` only holds the active user's unsaved picks, and the
//! configuration is re-read from the store right before every write.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use turn_flow::Context;

use crate::{
    catalog::Catalog,
    error::{FetchError, RunError, RunResult},
    models::{Configuration, Item, ItemId, Mood, UserTurn},
    tasks::{TurnCommand, session_keys},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    /// No candidates loaded for the active user
    AwaitingInput,
    /// Candidates loaded, picks in progress
    Selecting,
    /// Enough picks (and a mood, when required) to advance
    TurnComplete,
    /// Every user has finished
    AllTurnsComplete,
}

/// Unsaved selection of the active user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnState {
    pub user_index: usize,
    pub candidates: Vec<Item>,
    pub selected: Vec<ItemId>,
    pub mood: Option<Mood>,
}

impl TurnState {
    fn for_user(user_index: usize) -> Self {
        Self {
            user_index,
            ..Self::default()
        }
    }
}

/// What a command did to the run
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The active user is still choosing
    Selecting,
    /// A different user's turn started. `load_error` is set when the candidate fetch failed and
    /// the turn is waiting for a retry.
    TurnStarted {
        user_index: usize,
        load_error: Option<String>,
    },
    /// The last user finished
    AllTurnsComplete,
}

/// Client-facing picture of the active turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnView {
    pub phase: TurnPhase,
    pub current_user: usize,
    pub num_users: usize,
    pub completed_turns: usize,
    pub selections_per_user: usize,
    pub require_mood: bool,
    pub candidates: Vec<Item>,
    pub selected: Vec<ItemId>,
    pub mood: Option<Mood>,
    pub can_advance: bool,
}

pub struct TurnController {
    config: Configuration,
    state: TurnState,
}

impl TurnController {
    /// Read the configuration and any in-progress turn from the store.
    pub async fn load(store: &Context) -> RunResult<Self> {
        let config: Configuration = store
            .get(session_keys::CONFIG_DATA)
            .await
            .ok_or(RunError::MissingConfiguration)?;
        let state = store
            .get(session_keys::TURN_STATE)
            .await
            .unwrap_or_else(|| TurnState::for_user(config.current_user_index));

        Ok(Self { config, state })
    }

    pub async fn save(&self, store: &Context) -> RunResult<()> {
        store.set(session_keys::TURN_STATE, &self.state).await?;
        Ok(())
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    pub fn phase(&self) -> TurnPhase {
        if self.config.all_turns_complete() {
            TurnPhase::AllTurnsComplete
        } else if self.state.candidates.is_empty() {
            TurnPhase::AwaitingInput
        } else if self.selection_ready() {
            TurnPhase::TurnComplete
        } else {
            TurnPhase::Selecting
        }
    }

    fn selection_ready(&self) -> bool {
        self.state.selected.len() == self.config.selections_per_user
            && (!self.config.require_mood || self.state.mood.is_some())
    }

    pub async fn apply(
        &mut self,
        command: TurnCommand,
        store: &Context,
        catalog: &dyn Catalog,
    ) -> RunResult<TurnOutcome> {
        if self.config.all_turns_complete() {
            return Err(RunError::RunComplete);
        }

        match command {
            TurnCommand::Enter => {
                self.enter_turn(catalog).await?;
                Ok(TurnOutcome::Selecting)
            }
            TurnCommand::Toggle { item_id } => {
                self.toggle(&item_id);
                Ok(TurnOutcome::Selecting)
            }
            TurnCommand::Mood { mood } => {
                self.state.mood = mood;
                Ok(TurnOutcome::Selecting)
            }
            TurnCommand::Advance => {
                self.advance(store).await?;
                if self.config.all_turns_complete() {
                    Ok(TurnOutcome::AllTurnsComplete)
                } else {
                    Ok(self.start_turn(catalog).await)
                }
            }
            TurnCommand::Back => {
                if self.back(store).await? {
                    Ok(self.start_turn(catalog).await)
                } else {
                    Ok(TurnOutcome::Selecting)
                }
            }
        }
    }

    /// Load a fresh batch of candidates for the user at the cursor.
    ///
    /// A turn the user already saved (they came back to it) is pre-seeded: its movies go to the
    /// front of the batch and are selected again, and its mood is restored. On failure the turn is
    /// left without candidates.
    pub async fn enter_turn(&mut self, catalog: &dyn Catalog) -> RunResult<()> {
        let user_index = self.config.current_user_index;
        let wanted = self.config.movies_per_user;
        self.state = TurnState::for_user(user_index);

        let batch = catalog.fetch_random_batch(wanted).await?;
        let saved = self.config.turn_at(user_index).cloned();

        let mut seen = HashSet::new();
        let candidates: Vec<Item> = saved
            .iter()
            .flat_map(|turn| turn.items.iter().cloned())
            .chain(batch.results)
            .filter(|item| seen.insert(item.id.clone()))
            .take(wanted)
            .collect();

        if candidates.len() < self.config.selections_per_user {
            return Err(FetchError::ShortBatch {
                got: candidates.len(),
                needed: self.config.selections_per_user,
            }
            .into());
        }

        info!(
            user_index,
            candidates = candidates.len(),
            resumed = saved.is_some(),
            "turn entered"
        );
        self.state.candidates = candidates;
        if let Some(turn) = saved {
            self.state.selected = turn
                .items
                .iter()
                .map(|item| item.id.clone())
                .take(self.config.selections_per_user)
                .collect();
            self.state.mood = turn.mood;
        }
        Ok(())
    }

    /// Select or deselect a candidate. Returns whether the selection changed.
    ///
    /// Deselecting always works. Selecting past the cap, or selecting something that is not in
    /// the loaded batch, does nothing.
    pub fn toggle(&mut self, item_id: &ItemId) -> bool {
        if let Some(pos) = self.state.selected.iter().position(|id| id == item_id) {
            self.state.selected.remove(pos);
            return true;
        }

        let known = self.state.candidates.iter().any(|item| &item.id == item_id);
        if !known || self.state.selected.len() >= self.config.selections_per_user {
            return false;
        }

        self.state.selected.push(item_id.clone());
        true
    }

    /// Save the active user's turn at the cursor and move the cursor on.
    pub async fn advance(&mut self, store: &Context) -> RunResult<usize> {
        if self.state.candidates.is_empty() {
            return Err(RunError::CandidatesNotLoaded);
        }
        if !self.selection_ready() {
            return Err(RunError::TurnIncomplete {
                selected: self.state.selected.len(),
                required: self.config.selections_per_user,
                mood_missing: self.config.require_mood && self.state.mood.is_none(),
            });
        }

        let mut latest: Configuration = store
            .get(session_keys::CONFIG_DATA)
            .await
            .ok_or(RunError::MissingConfiguration)?;

        if latest.current_user_index != self.state.user_index {
            let (expected, found) = (self.state.user_index, latest.current_user_index);
            warn!(expected, found, "turn advanced elsewhere, discarding this selection");
            self.state = TurnState::for_user(found);
            self.config = latest;
            return Err(RunError::StaleTurn { expected, found });
        }

        let items: Vec<Item> = self
            .state
            .candidates
            .iter()
            .filter(|item| self.state.selected.contains(&item.id))
            .cloned()
            .collect();
        let turn = UserTurn {
            items,
            mood: self.state.mood,
        };

        let cursor = latest.record_turn(turn)?;
        store.set(session_keys::CONFIG_DATA, &latest).await?;

        info!(
            user_index = self.state.user_index,
            cursor,
            num_users = latest.num_users,
            "turn saved"
        );
        self.config = latest;
        self.state = TurnState::for_user(cursor);
        Ok(cursor)
    }

    /// Move the cursor back to the previous user. False when already at the first user.
    pub async fn back(&mut self, store: &Context) -> RunResult<bool> {
        let mut latest: Configuration = store
            .get(session_keys::CONFIG_DATA)
            .await
            .ok_or(RunError::MissingConfiguration)?;

        let moved = latest.rewind();
        if moved {
            store.set(session_keys::CONFIG_DATA, &latest).await?;
            info!(cursor = latest.current_user_index, "went back one turn");
        }
        self.state = TurnState::for_user(latest.current_user_index);
        self.config = latest;
        Ok(moved)
    }

    /// Enter the turn at the cursor, reporting a failed fetch instead of returning it.
    pub async fn start_turn(&mut self, catalog: &dyn Catalog) -> TurnOutcome {
        let user_index = self.config.current_user_index;
        let load_error = match self.enter_turn(catalog).await {
            Ok(()) => None,
            Err(e) => {
                warn!(user_index, error = %e, "could not load candidates for the next turn");
                Some(e.to_string())
            }
        };
        TurnOutcome::TurnStarted {
            user_index,
            load_error,
        }
    }

    pub fn view(&self) -> TurnView {
        TurnView {
            phase: self.phase(),
            current_user: self.config.current_user_index,
            num_users: self.config.num_users,
            completed_turns: self.config.completed_turns(),
            selections_per_user: self.config.selections_per_user,
            require_mood: self.config.require_mood,
            candidates: self.state.candidates.clone(),
            selected: self.state.selected.clone(),
            mood: self.state.mood,
            can_advance: self.phase() == TurnPhase::TurnComplete,
        }
    }
}
