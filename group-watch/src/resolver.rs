//! Turns candidate pools into the group's watch list.
//!
//! The oracle is asked once. Its reply is read with the first strategy that works:
//! 1. the first balanced `[...]` literal, decoded as movie records
//! 2. quoted titles, matched case-insensitively against the pools. Titles may carry apostrophes
//!    (`'Schindler's List'`). A single-quoted title that ends in one (`'Charlies' Angels'`) is
//!    cut at that apostrophe.
//! 3. the users' own picks, deduplicated, in order
//!
//! Transport errors and timeouts fall through to 3 as well, so a non-empty primary pool always
//! yields a non-empty result.

use std::{
    collections::HashSet,
    sync::{Arc, LazyLock},
    time::Duration,
};

use regex::Regex;
use tracing::{info, warn};

use crate::{
    error::{FetchError, RunError, RunResult},
    models::Item,
    oracle::Oracle,
};

pub const MAX_RECOMMENDATIONS: usize = 5;

static DOUBLE_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"\n]+)""#).expect("double quoted pattern"));

// an apostrophe after a letter ("I'd") never opens a literal, and one followed by a letter
// ("Schindler's List") never closes it
static SINGLE_QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w'])'((?:[^'\n]|'\w)+)'").expect("single quoted pattern")
});

/// How much of the oracle's reply could be used
#[derive(Debug, Clone, PartialEq)]
pub enum OracleReply {
    ParsedArray(Vec<Item>),
    ExtractedTitles(Vec<String>),
    Unparsable,
}

impl OracleReply {
    pub fn parse(raw: &str) -> Self {
        let decoded = first_array_literal(raw)
            .and_then(|literal| serde_json::from_str::<Vec<Item>>(literal).ok())
            .filter(|items| !items.is_empty());
        if let Some(items) = decoded {
            return OracleReply::ParsedArray(items);
        }

        let titles: Vec<String> = DOUBLE_QUOTED
            .captures_iter(raw)
            .chain(SINGLE_QUOTED.captures_iter(raw))
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|title| !title.is_empty())
            .collect();
        if !titles.is_empty() {
            return OracleReply::ExtractedTitles(titles);
        }

        OracleReply::Unparsable
    }
}

/// The first `[` ... `]` span whose brackets balance, ignoring brackets inside JSON strings.
fn first_array_literal(raw: &str) -> Option<&str> {
    raw.match_indices('[')
        .find_map(|(start, _)| balanced_end(&raw[start..]).map(|end| &raw[start..start + end]))
}

/// Byte length of the balanced array starting at the beginning of `text`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// First occurrence of each id wins; at most [`MAX_RECOMMENDATIONS`].
fn dedupe_capped<'a>(items: impl IntoIterator<Item = &'a Item>) -> Vec<Item> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .take(MAX_RECOMMENDATIONS)
        .cloned()
        .collect()
}

fn system_instruction(has_secondary: bool) -> String {
    let exclusion = if has_secondary {
        "\nDo NOT recommend any movie from the group's own picks. Choose only from the additional candidates."
    } else {
        ""
    };
    format!(
        r#"You are a movie recommendation expert helping a group pick what to watch together.
Based on the movies each user picked and the mood each user is in, recommend exactly {MAX_RECOMMENDATIONS} movies that the entire group would enjoy.
Find common themes, genres or styles across their picks, and weigh every user's mood.{exclusion}
Reply with ONLY a JSON array of the {MAX_RECOMMENDATIONS} complete movie objects you recommend, copied exactly from the lists provided. No other text."#
    )
}

fn user_prompt(primary: &[Item], secondary: &[Item], moods_by_user: &[String]) -> String {
    let moods = moods_by_user
        .iter()
        .enumerate()
        .map(|(i, mood)| {
            if mood.is_empty() {
                format!("User {} did not share a mood", i + 1)
            } else {
                format!("User {} is feeling {}", i + 1, mood)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let picks = serde_json::to_string(primary).unwrap_or_default();
    let mut prompt = format!("Moods:\n{moods}\n\nMovies the group picked:\n{picks}");
    if !secondary.is_empty() {
        let extra = serde_json::to_string(secondary).unwrap_or_default();
        prompt.push_str(&format!("\n\nAdditional candidates:\n{extra}"));
    }
    prompt
}

pub struct RecommendationResolver {
    oracle: Arc<dyn Oracle>,
    timeout: Duration,
}

impl RecommendationResolver {
    pub fn new(oracle: Arc<dyn Oracle>, timeout: Duration) -> Self {
        Self { oracle, timeout }
    }

    /// Between one and five unique movies for the group.
    pub async fn resolve(
        &self,
        primary: &[Item],
        secondary: &[Item],
        moods_by_user: &[String],
    ) -> RunResult<Vec<Item>> {
        if primary.is_empty() && secondary.is_empty() {
            return Err(RunError::NoCandidates);
        }

        let system = system_instruction(!secondary.is_empty());
        let prompt = user_prompt(primary, secondary, moods_by_user);

        let reply = match self.ask(&system, &prompt).await {
            Ok(text) => OracleReply::parse(&text),
            Err(e) if primary.is_empty() => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "oracle unavailable, using the group's own picks");
                OracleReply::Unparsable
            }
        };

        let mut picked = select(&reply, primary, secondary);
        if picked.is_empty() {
            info!(reply = ?reply_kind(&reply), "oracle reply unusable, using the group's own picks");
            picked = dedupe_capped(primary);
        }
        if picked.is_empty() {
            return Err(RunError::NoCandidates);
        }

        info!(
            strategy = reply_kind(&reply),
            count = picked.len(),
            "recommendations resolved"
        );
        Ok(picked)
    }

    async fn ask(&self, system: &str, prompt: &str) -> Result<String, FetchError> {
        match tokio::time::timeout(self.timeout, self.oracle.invoke(system, prompt)).await {
            Ok(answer) => answer,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        }
    }
}

fn select(reply: &OracleReply, primary: &[Item], secondary: &[Item]) -> Vec<Item> {
    match reply {
        OracleReply::ParsedArray(items) => dedupe_capped(items),
        OracleReply::ExtractedTitles(titles) => {
            let wanted: HashSet<String> = titles.iter().map(|t| t.to_lowercase()).collect();
            dedupe_capped(
                primary
                    .iter()
                    .chain(secondary)
                    .filter(|item| wanted.contains(&item.title.trim().to_lowercase())),
            )
        }
        OracleReply::Unparsable => Vec::new(),
    }
}

fn reply_kind(reply: &OracleReply) -> &'static str {
    match reply {
        OracleReply::ParsedArray(_) => "parsed_array",
        OracleReply::ExtractedTitles(_) => "extracted_titles",
        OracleReply::Unparsable => "unparsable",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemId;
    use crate::oracle::MockOracle;
    use async_trait::async_trait;

    fn movie(id: i64, title: &str) -> Item {
        Item::new(id, title)
    }

    fn ids(items: &[Item]) -> Vec<ItemId> {
        items.iter().map(|i| i.id.clone()).collect()
    }

    fn oracle_answering(answer: &'static str) -> Arc<dyn Oracle> {
        let mut oracle = MockOracle::new();
        oracle
            .expect_invoke()
            .times(1)
            .returning(move |_, _| Ok(answer.to_string()));
        Arc::new(oracle)
    }

    fn failing_oracle() -> Arc<dyn Oracle> {
        let mut oracle = MockOracle::new();
        oracle
            .expect_invoke()
            .returning(|_, _| Err(FetchError::Oracle("401 Unauthorized".into())));
        Arc::new(oracle)
    }

    fn resolver(oracle: Arc<dyn Oracle>) -> RecommendationResolver {
        RecommendationResolver::new(oracle, Duration::from_secs(30))
    }

    fn seven_picks() -> Vec<Item> {
        vec![
            movie(1, "Alien"),
            movie(2, "Heat"),
            movie(1, "Alien"),
            movie(3, "Up"),
            movie(4, "Jaws"),
            movie(5, "Rocky"),
            movie(6, "Fargo"),
        ]
    }

    #[test]
    fn test_parse_finds_array_in_prose() {
        let raw = r#"Sure! Here you go:
```json
[{"id": 7, "title": "Se7en [Director's Cut]", "genre_ids": [80, 53]},
 {"id": 8, "title": "Oldboy"}]
```
Enjoy [the show]."#;
        match OracleReply::parse(raw) {
            OracleReply::ParsedArray(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].title, "Se7en [Director's Cut]");
                assert_eq!(items[0].genre_ids, vec![80, 53]);
            }
            other => panic!("expected parsed array, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_skips_unbalanced_bracket() {
        let raw = r#"[note: picks follow [{"id": 1, "title": "Up"}]"#;
        assert_eq!(
            OracleReply::parse(raw),
            OracleReply::ParsedArray(vec![movie(1, "Up")])
        );
    }

    #[test]
    fn test_parse_falls_back_to_titles() {
        let raw = r#"I'd go with "Heat" and 'Up'. [] is all I have."#;
        match OracleReply::parse(raw) {
            OracleReply::ExtractedTitles(titles) => {
                assert!(titles.contains(&"Heat".to_string()));
                assert!(titles.contains(&"Up".to_string()));
            }
            other => panic!("expected titles, got {other:?}"),
        }
    }

    #[test]
    fn test_single_quoted_titles_keep_inner_apostrophes() {
        let raw = "Try 'Schindler's List' or 'Ocean's Eleven', I'd say 'Heat'.";
        assert_eq!(
            OracleReply::parse(raw),
            OracleReply::ExtractedTitles(vec![
                "Schindler's List".to_string(),
                "Ocean's Eleven".to_string(),
                "Heat".to_string(),
            ])
        );
    }

    #[tokio::test]
    async fn test_title_with_apostrophe_matches_pool() {
        let primary = vec![movie(1, "Heat"), movie(424, "Schindler's List")];
        let picked = resolver(oracle_answering("You should watch 'schindler's list' tonight."))
            .resolve(&primary, &[], &[])
            .await
            .unwrap();

        assert_eq!(ids(&picked), vec![ItemId::Number(424)]);
    }

    #[test]
    fn test_parse_plain_prose_is_unparsable() {
        assert_eq!(
            OracleReply::parse("Watch something fun together tonight."),
            OracleReply::Unparsable
        );
    }

    #[tokio::test]
    async fn test_parsed_array_is_deduped_and_capped() {
        let answer = r#"[{"id":1,"title":"Alien"},{"id":1,"title":"Alien"},{"id":2,"title":"Heat"},
            {"id":3,"title":"Up"},{"id":4,"title":"Jaws"},{"id":5,"title":"Rocky"},{"id":6,"title":"Fargo"}]"#;
        let picked = resolver(oracle_answering(answer))
            .resolve(&seven_picks(), &[], &["Happy".into()])
            .await
            .unwrap();

        assert_eq!(picked.len(), 5);
        assert_eq!(
            ids(&picked),
            (1..=5).map(ItemId::Number).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_titles_match_across_both_pools() {
        let secondary = vec![movie(10, "The Thing"), movie(11, "Arrival")];
        let picked = resolver(oracle_answering(
            r#"My picks: "the thing", "ARRIVAL" and "Not A Real Movie"."#,
        ))
        .resolve(&[movie(1, "Alien")], &secondary, &["Anxious".into()])
        .await
        .unwrap();

        assert_eq!(ids(&picked), vec![ItemId::Number(10), ItemId::Number(11)]);
    }

    #[tokio::test]
    async fn test_prose_reply_falls_back_to_primary_order() {
        let picked = resolver(oracle_answering(
            "Honestly, anything with popcorn works for this crowd.",
        ))
        .resolve(&seven_picks(), &[], &[])
        .await
        .unwrap();

        assert_eq!(
            ids(&picked),
            (1..=5).map(ItemId::Number).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_unreachable_oracle_with_small_pool() {
        let primary = vec![movie(1, "Alien"), movie(2, "Heat"), movie(1, "Alien"), movie(3, "Up")];
        let picked = resolver(failing_oracle())
            .resolve(&primary, &[], &["Calm".into()])
            .await
            .unwrap();

        assert_eq!(
            ids(&picked),
            vec![ItemId::Number(1), ItemId::Number(2), ItemId::Number(3)]
        );
    }

    #[tokio::test]
    async fn test_empty_decoded_array_and_no_titles_uses_fallback() {
        let picked = resolver(oracle_answering("[]"))
            .resolve(&[movie(9, "Heat")], &[movie(10, "Up")], &[])
            .await
            .unwrap();
        assert_eq!(ids(&picked), vec![ItemId::Number(9)]);
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let mut oracle = MockOracle::new();
        oracle.expect_invoke().never();
        let err = resolver(Arc::new(oracle))
            .resolve(&[], &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::NoCandidates));
    }

    #[tokio::test]
    async fn test_oracle_failure_without_primary_pool_is_fatal() {
        let err = resolver(failing_oracle())
            .resolve(&[], &[movie(10, "Up")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Fetch(FetchError::Oracle(_))));
    }

    #[tokio::test]
    async fn test_instruction_forbids_own_picks_only_with_secondary_pool() {
        let mut oracle = MockOracle::new();
        oracle
            .expect_invoke()
            .withf(|system, prompt| {
                system.contains("Do NOT recommend any movie from the group's own picks")
                    && prompt.contains("User 1 is feeling Sad")
                    && prompt.contains("User 2 did not share a mood")
                    && prompt.contains("Additional candidates")
            })
            .times(1)
            .returning(|_, _| Ok(r#"[{"id": 10, "title": "Up"}]"#.to_string()));

        let picked = resolver(Arc::new(oracle))
            .resolve(
                &[movie(1, "Alien")],
                &[movie(10, "Up")],
                &["Sad".into(), String::new()],
            )
            .await
            .unwrap();
        assert_eq!(ids(&picked), vec![ItemId::Number(10)]);

        assert!(!system_instruction(false).contains("Do NOT"));
    }

    struct SlowOracle;

    #[async_trait]
    impl Oracle for SlowOracle {
        async fn invoke(&self, _: &str, _: &str) -> Result<String, FetchError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(r#"[{"id": 99, "title": "Too Late"}]"#.to_string())
        }
    }

    #[tokio::test]
    async fn test_slow_oracle_times_out_into_fallback() {
        let resolver = RecommendationResolver::new(Arc::new(SlowOracle), Duration::from_millis(20));
        let picked = resolver
            .resolve(&[movie(1, "Alien"), movie(2, "Heat")], &[], &[])
            .await
            .unwrap();
        assert_eq!(ids(&picked), vec![ItemId::Number(1), ItemId::Number(2)]);
    }
}
