use std::{collections::HashSet, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    catalog::Catalog,
    error::{RunError, RunResult},
    models::{Configuration, Item, ItemId, TagId, UserTurn},
};

/// Input for the resolver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidatePools {
    /// Every movie the users picked, in user order
    pub primary: Vec<Item>,
    /// Enrichment candidates, none of which appear in `primary`
    pub secondary: Vec<Item>,
    /// One label per user with a valid turn, empty when no mood was given
    pub moods_by_user: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    /// Fetch popular and per-genre candidates on top of the users' picks
    pub enrich: bool,
    pub max_tags: usize,
    pub secondary_cap: usize,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            enrich: true,
            max_tags: 3,
            secondary_cap: 30,
        }
    }
}

pub struct PreferenceAggregator {
    catalog: Arc<dyn Catalog>,
    settings: AggregatorSettings,
}

impl PreferenceAggregator {
    pub fn new(catalog: Arc<dyn Catalog>, settings: AggregatorSettings) -> Self {
        Self { catalog, settings }
    }

    pub async fn aggregate(&self, config: &Configuration) -> RunResult<CandidatePools> {
        let valid = valid_turns(&config.user_selections);
        if valid.is_empty() {
            return Err(RunError::NoValidSelections);
        }

        let primary: Vec<Item> = valid
            .iter()
            .flat_map(|turn| turn.items.iter().cloned())
            .collect();
        let moods_by_user = valid
            .iter()
            .map(|turn| turn.mood.map(|m| m.to_string()).unwrap_or_default())
            .collect();

        let secondary = if self.settings.enrich {
            self.enrich(&primary).await
        } else {
            Vec::new()
        };

        info!(
            users = valid.len(),
            primary = primary.len(),
            secondary = secondary.len(),
            "candidate pools ready"
        );
        Ok(CandidatePools {
            primary,
            secondary,
            moods_by_user,
        })
    }

    /// Popular titles plus titles from the most referenced genres. A failing source is skipped.
    async fn enrich(&self, primary: &[Item]) -> Vec<Item> {
        let tags = referenced_tags(primary, self.settings.max_tags);
        let mut fetched = Vec::new();

        match self.catalog.fetch_popular(1).await {
            Ok(page) => fetched.extend(page.results),
            Err(e) => warn!(error = %e, "popular titles unavailable for enrichment"),
        }

        for tag in tags {
            match self.catalog.fetch_by_tag(tag, 1).await {
                Ok(page) => fetched.extend(page.results),
                Err(e) => warn!(tag, error = %e, "genre titles unavailable for enrichment"),
            }
        }

        secondary_pool(primary, fetched, self.settings.secondary_cap)
    }
}

/// Saved turns that actually hold movies
fn valid_turns(selections: &[Option<UserTurn>]) -> Vec<&UserTurn> {
    selections
        .iter()
        .flatten()
        .filter(|turn| !turn.items.is_empty())
        .collect()
}

/// Genres referenced by `items`, most referenced first (ties keep first appearance), at most `max`.
fn referenced_tags(items: &[Item], max: usize) -> Vec<TagId> {
    let mut counts: Vec<(TagId, usize)> = Vec::new();
    for tag in items.iter().flat_map(|item| item.genre_ids.iter().copied()) {
        match counts.iter_mut().find(|(seen, _)| *seen == tag) {
            Some((_, count)) => *count += 1,
            None => counts.push((tag, 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().take(max).map(|(tag, _)| tag).collect()
}

/// Dedupe `fetched`, drop anything already in `primary` and keep at most `cap`.
fn secondary_pool(primary: &[Item], fetched: Vec<Item>, cap: usize) -> Vec<Item> {
    let mut seen: HashSet<ItemId> = primary.iter().map(|item| item.id.clone()).collect();
    fetched
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .take(cap)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MockCatalog;
    use crate::error::FetchError;
    use crate::models::{Mood, PagedItems};
    use mockall::predicate::eq;

    fn movie(id: i64, genres: &[TagId]) -> Item {
        let mut item = Item::new(id, format!("Movie {id}"));
        item.genre_ids = genres.to_vec();
        item
    }

    fn page(items: Vec<Item>) -> PagedItems {
        PagedItems {
            page: 1,
            results: items,
            ..PagedItems::default()
        }
    }

    fn unavailable() -> FetchError {
        FetchError::Status {
            service: "catalog",
            status: 503,
            body: "unavailable".into(),
        }
    }

    fn config_with(turns: Vec<Option<UserTurn>>) -> Configuration {
        let mut config = Configuration::new(turns.len(), 5, 2, true).unwrap();
        config.current_user_index = turns.len();
        config.user_selections = turns;
        config
    }

    fn turn(items: Vec<Item>, mood: Option<Mood>) -> Option<UserTurn> {
        Some(UserTurn { items, mood })
    }

    #[tokio::test]
    async fn test_no_valid_selections() {
        let aggregator =
            PreferenceAggregator::new(Arc::new(MockCatalog::new()), AggregatorSettings::default());
        let config = config_with(vec![None, turn(vec![], Some(Mood::Sad))]);

        assert!(matches!(
            aggregator.aggregate(&config).await,
            Err(RunError::NoValidSelections)
        ));
    }

    #[tokio::test]
    async fn test_primary_pool_skips_absent_and_empty_turns() {
        let settings = AggregatorSettings {
            enrich: false,
            ..AggregatorSettings::default()
        };
        let aggregator = PreferenceAggregator::new(Arc::new(MockCatalog::new()), settings);
        let config = config_with(vec![
            turn(vec![movie(1, &[]), movie(2, &[])], Some(Mood::Happy)),
            None,
            turn(vec![], Some(Mood::Sad)),
            turn(vec![movie(2, &[]), movie(3, &[])], None),
        ]);

        let pools = aggregator.aggregate(&config).await.unwrap();
        let ids: Vec<_> = pools.primary.iter().map(|i| i.id.to_string()).collect();
        assert_eq!(ids, vec!["1", "2", "2", "3"]);
        assert_eq!(pools.moods_by_user, vec!["Happy".to_string(), String::new()]);
        assert!(pools.secondary.is_empty());
    }

    #[tokio::test]
    async fn test_enrichment_excludes_primary_and_caps() {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_fetch_popular()
            .with(eq(1))
            .returning(|_| Ok(page((1..=40).map(|id| movie(id, &[])).collect())));
        catalog
            .expect_fetch_by_tag()
            .with(eq(18), eq(1))
            .returning(|_, _| Ok(page(vec![movie(2, &[18]), movie(100, &[18])])));

        let aggregator = PreferenceAggregator::new(
            Arc::new(catalog),
            AggregatorSettings {
                secondary_cap: 10,
                ..AggregatorSettings::default()
            },
        );
        let config = config_with(vec![turn(
            vec![movie(1, &[18]), movie(2, &[18])],
            Some(Mood::Calm),
        )]);

        let pools = aggregator.aggregate(&config).await.unwrap();
        assert_eq!(pools.secondary.len(), 10);
        let primary_ids: HashSet<_> = pools.primary.iter().map(|i| i.id.clone()).collect();
        assert!(pools.secondary.iter().all(|i| !primary_ids.contains(&i.id)));
        assert_eq!(pools.secondary[0].id, ItemId::Number(3));
    }

    #[tokio::test]
    async fn test_enrichment_uses_top_three_tags() {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_fetch_popular()
            .returning(|_| Ok(page(vec![])));
        for tag in [35, 18, 28] {
            catalog
                .expect_fetch_by_tag()
                .with(eq(tag), eq(1))
                .times(1)
                .returning(move |tag, _| Ok(page(vec![movie(1000 + tag as i64, &[tag])])));
        }

        let aggregator =
            PreferenceAggregator::new(Arc::new(catalog), AggregatorSettings::default());
        let config = config_with(vec![
            turn(vec![movie(1, &[18, 35]), movie(2, &[35, 99])], None),
            turn(vec![movie(3, &[28, 35]), movie(4, &[18, 28])], None),
        ]);

        let pools = aggregator.aggregate(&config).await.unwrap();
        assert_eq!(pools.secondary.len(), 3);
    }

    #[tokio::test]
    async fn test_all_enrichment_sources_failing_is_not_fatal() {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_fetch_popular()
            .returning(|_| Err(unavailable()));
        catalog
            .expect_fetch_by_tag()
            .times(3)
            .returning(|_, _| Err(unavailable()));

        let aggregator =
            PreferenceAggregator::new(Arc::new(catalog), AggregatorSettings::default());
        let config = config_with(vec![turn(
            vec![movie(1, &[12, 16]), movie(2, &[10751])],
            Some(Mood::Excited),
        )]);

        let pools = aggregator.aggregate(&config).await.unwrap();
        assert_eq!(pools.primary.len(), 2);
        assert!(pools.secondary.is_empty());
    }

    #[test]
    fn test_referenced_tags_order() {
        let items = vec![movie(1, &[5, 7]), movie(2, &[7, 9]), movie(3, &[9, 7, 4])];
        assert_eq!(referenced_tags(&items, 3), vec![7, 9, 5]);
        assert_eq!(referenced_tags(&items, 1), vec![7]);
        assert!(referenced_tags(&[movie(1, &[])], 3).is_empty());
    }
}
