use std::{fmt, ops::RangeInclusive};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::RunError;

/// Catalog identifier. The catalog hands out integers; hand-curated pools may use strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    Number(i64),
    Text(String),
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Number(n) => write!(f, "{n}"),
            ItemId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ItemId {
    fn from(value: i64) -> Self {
        ItemId::Number(value)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        ItemId::Text(value.to_string())
    }
}

/// Catalog genre id
pub type TagId = u32;

/// A recommendable movie. Identity is the `id` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_average: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genre_ids: Vec<TagId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_path: Option<String>,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            release_date: None,
            vote_average: None,
            overview: None,
            genre_ids: Vec::new(),
            poster_path: None,
        }
    }

    /// Year part of the release date, if any
    pub fn release_year(&self) -> Option<&str> {
        self.release_date
            .as_deref()
            .and_then(|date| date.split('-').next())
            .filter(|year| !year.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: TagId,
    pub name: String,
}

/// One page of catalog results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PagedItems {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub results: Vec<Item>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub total_results: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mood {
    Happy,
    Sad,
    Excited,
    Calm,
    Anxious,
    Romantic,
}

impl Mood {
    pub const ALL: [Mood; 6] = [
        Mood::Happy,
        Mood::Sad,
        Mood::Excited,
        Mood::Calm,
        Mood::Anxious,
        Mood::Romantic,
    ];
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Mood::Happy => "Happy",
            Mood::Sad => "Sad",
            Mood::Excited => "Excited",
            Mood::Calm => "Calm",
            Mood::Anxious => "Anxious",
            Mood::Romantic => "Romantic",
        };
        f.write_str(label)
    }
}

/// An empty mood string means "not chosen".
fn empty_mood_as_none<'de, D>(deserializer: D) -> Result<Option<Mood>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(label) => Mood::deserialize(serde::de::value::StrDeserializer::<D::Error>::new(label))
            .map(Some),
    }
}

/// One user's finished selection for the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTurn {
    #[serde(rename = "movies", default)]
    pub items: Vec<Item>,
    #[serde(default, deserialize_with = "empty_mood_as_none")]
    pub mood: Option<Mood>,
}

impl UserTurn {
    pub fn is_complete(&self, selections_per_user: usize) -> bool {
        self.items.len() == selections_per_user
    }
}

/// Allowed ranges for run settings
pub struct RunBounds;

impl RunBounds {
    pub const USERS: RangeInclusive<usize> = 1..=5;
    pub const ITEMS_PER_TURN: RangeInclusive<usize> = 5..=20;
    pub const SELECTIONS_PER_TURN: RangeInclusive<usize> = 1..=10;
}

fn default_require_mood() -> bool {
    true
}

/// Run-wide state, stored under `configData`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub num_users: usize,
    pub movies_per_user: usize,
    pub selections_per_user: usize,
    #[serde(default = "default_require_mood")]
    pub require_mood: bool,
    #[serde(default)]
    pub user_selections: Vec<Option<UserTurn>>,
    #[serde(default)]
    pub current_user_index: usize,
}

impl Configuration {
    /// Validates the bounds and builds the only valid initial state: every turn absent, cursor 0.
    pub fn new(
        num_users: usize,
        movies_per_user: usize,
        selections_per_user: usize,
        require_mood: bool,
    ) -> Result<Self, RunError> {
        check_bound("num_users", num_users, RunBounds::USERS)?;
        check_bound("movies_per_user", movies_per_user, RunBounds::ITEMS_PER_TURN)?;
        check_bound(
            "selections_per_user",
            selections_per_user,
            RunBounds::SELECTIONS_PER_TURN,
        )?;
        if selections_per_user > movies_per_user {
            return Err(RunError::InvalidConfiguration(format!(
                "selections_per_user ({selections_per_user}) cannot exceed movies_per_user ({movies_per_user})"
            )));
        }

        Ok(Self {
            num_users,
            movies_per_user,
            selections_per_user,
            require_mood,
            user_selections: vec![None; num_users],
            current_user_index: 0,
        })
    }

    pub fn all_turns_complete(&self) -> bool {
        self.current_user_index >= self.num_users
    }

    pub fn turn_at(&self, index: usize) -> Option<&UserTurn> {
        self.user_selections.get(index).and_then(Option::as_ref)
    }

    pub fn completed_turns(&self) -> usize {
        self.user_selections.iter().flatten().count()
    }

    /// Store `turn` at the cursor and move the cursor on. Returns the new cursor.
    pub fn record_turn(&mut self, turn: UserTurn) -> Result<usize, RunError> {
        self.user_selections = ensure_length(&self.user_selections, self.num_users);
        if self.all_turns_complete() {
            return Err(RunError::RunComplete);
        }

        self.user_selections[self.current_user_index] = Some(turn);
        self.current_user_index += 1;
        Ok(self.current_user_index)
    }

    /// Step the cursor back one user, keeping that user's saved turn. False at user 0.
    pub fn rewind(&mut self) -> bool {
        self.user_selections = ensure_length(&self.user_selections, self.num_users);
        if self.current_user_index == 0 {
            return false;
        }
        self.current_user_index -= 1;
        true
    }
}

fn check_bound(name: &str, value: usize, range: RangeInclusive<usize>) -> Result<(), RunError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(RunError::InvalidConfiguration(format!(
            "{name} must be between {} and {}, got {value}",
            range.start(),
            range.end()
        )))
    }
}

/// `list` resized to exactly `len` entries: missing turns become absent, extra entries are dropped.
pub fn ensure_length(list: &[Option<UserTurn>], len: usize) -> Vec<Option<UserTurn>> {
    let mut repaired: Vec<Option<UserTurn>> = list.iter().take(len).cloned().collect();
    repaired.resize(len, None);
    repaired
}
