//! Scenario catalog: flavor-text templates grouped by category.
//!
//! Storage layout is one JSON file per category (`direct_kill.json`,
//! `self.json`, ...), each a list of `{ "text": "..." }` objects. Templates
//! name their participants with `[Character A]`, `[Character B]`, ...

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ScenarioError, SkipReason};
use crate::logging::{log, obj, v_str, Domain, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    DirectKill,
    #[serde(rename = "self")]
    SelfInflicted,
    Environmental,
    Group,
    Story,
    Comeback,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::DirectKill,
        Category::SelfInflicted,
        Category::Environmental,
        Category::Group,
        Category::Story,
        Category::Comeback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::DirectKill => "direct_kill",
            Category::SelfInflicted => "self",
            Category::Environmental => "environmental",
            Category::Group => "group",
            Category::Story => "story",
            Category::Comeback => "comeback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioTemplate {
    pub id: String,
    pub category: Category,
    pub text: String,
}

impl ScenarioTemplate {
    pub fn new(category: Category, index: usize, text: impl Into<String>) -> Self {
        Self {
            id: format!("{}_{:03}", category.as_str(), index),
            category,
            text: text.into(),
        }
    }

    pub fn placeholder_count(&self) -> usize {
        placeholder_count(&self.text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScenarioCatalog {
    by_category: BTreeMap<Category, Vec<ScenarioTemplate>>,
}

impl ScenarioCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw texts; ids are assigned by position.
    pub fn from_texts<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Category, Vec<S>)>,
        S: Into<String>,
    {
        let mut catalog = Self::new();
        for (category, texts) in entries {
            let templates = texts
                .into_iter()
                .enumerate()
                .map(|(i, t)| ScenarioTemplate::new(category, i, t))
                .collect();
            catalog.insert(category, templates);
        }
        catalog
    }

    pub fn insert(&mut self, category: Category, templates: Vec<ScenarioTemplate>) {
        self.by_category.insert(category, templates);
    }

    pub fn get(&self, category: Category) -> &[ScenarioTemplate] {
        self.by_category
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_category.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load every `<category>.json` under `dir`.
    ///
    /// Bad entries, unknown files and unreadable files are logged and
    /// skipped; a missing directory yields an empty catalog.
    pub fn load_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let mut catalog = Self::new();

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                log(
                    Level::Error,
                    Domain::Scenario,
                    "scenario_directory_unreadable",
                    obj(&[
                        ("scenario_dir", v_str(&dir.to_string_lossy())),
                        ("error", v_str(&err.to_string())),
                    ]),
                );
                return catalog;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            let Some(category) = Category::parse(stem) else {
                log(
                    Level::Warn,
                    Domain::Scenario,
                    "unexpected_scenario_file",
                    obj(&[("filepath", v_str(&path.to_string_lossy()))]),
                );
                continue;
            };
            match load_file(&path, category) {
                Ok(templates) => {
                    log(
                        Level::Info,
                        Domain::Scenario,
                        "scenarios_loaded",
                        obj(&[
                            ("filepath", v_str(&path.to_string_lossy())),
                            ("count", json!(templates.len())),
                        ]),
                    );
                    catalog.insert(category, templates);
                }
                Err(err) => log(
                    Level::Error,
                    Domain::Scenario,
                    "scenario_file_error",
                    obj(&[
                        ("filepath", v_str(&path.to_string_lossy())),
                        ("error", v_str(&err.to_string())),
                    ]),
                ),
            }
        }

        for category in Category::ALL {
            // comeback has a generated fallback line
            if category != Category::Comeback && catalog.get(category).is_empty() {
                log(
                    Level::Warn,
                    Domain::Scenario,
                    "no_valid_scenarios_for_category",
                    obj(&[("category", v_str(category.as_str()))]),
                );
            }
        }
        catalog
    }
}

fn load_file(path: &Path, category: Category) -> Result<Vec<ScenarioTemplate>, ScenarioError> {
    let raw = fs::read_to_string(path)?;
    let data: Value = serde_json::from_str(&raw)?;
    let Value::Array(items) = data else {
        return Err(ScenarioError::NotAList);
    };

    let mut templates = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match item.get("text").and_then(Value::as_str) {
            Some(text) => templates.push(ScenarioTemplate::new(category, i, text)),
            None => log(
                Level::Warn,
                Domain::Scenario,
                "invalid_scenario_format",
                obj(&[
                    ("filepath", v_str(&path.to_string_lossy())),
                    ("item_index", json!(i)),
                ]),
            ),
        }
    }
    Ok(templates)
}

// =============================================================================
// Placeholders
// =============================================================================

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[Character ([A-Z])\]").expect("placeholder pattern is valid"))
}

/// Distinct placeholder letters in sorted order.
fn placeholder_letters(text: &str) -> Vec<char> {
    let mut letters: Vec<char> = placeholder_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1).and_then(|m| m.as_str().chars().next()))
        .collect();
    letters.sort_unstable();
    letters.dedup();
    letters
}

/// Number of distinct `[Character X]` placeholders.
pub fn placeholder_count(text: &str) -> usize {
    placeholder_letters(text).len()
}

/// Replace each distinct placeholder (in letter order) with the matching
/// name (in draw order). Every occurrence of a placeholder gets the same name.
pub fn substitute(text: &str, names: &[&str]) -> Result<String, SkipReason> {
    let letters = placeholder_letters(text);
    if names.len() < letters.len() {
        return Err(SkipReason::InsufficientParticipants {
            needed: letters.len(),
            available: names.len(),
        });
    }
    let out = placeholder_re().replace_all(text, |caps: &regex::Captures| {
        let letter = caps.get(1).and_then(|m| m.as_str().chars().next());
        match letter.and_then(|l| letters.iter().position(|&x| x == l)) {
            Some(i) => names[i].to_string(),
            None => caps[0].to_string(),
        }
    });
    Ok(out.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_count_distinct() {
        assert_eq!(placeholder_count("[Character A] eliminates [Character B]."), 2);
        assert_eq!(placeholder_count("[Character A] sees [Character A] in a mirror."), 1);
        assert_eq!(placeholder_count("A quiet night passes."), 0);
        assert_eq!(placeholder_count("[Character a] is not a placeholder"), 0);
    }

    #[test]
    fn test_substitute_in_letter_order() {
        let out = substitute("[Character B] is ambushed by [Character A].", &["Ace", "Echo"]).unwrap();
        assert_eq!(out, "Echo is ambushed by Ace.");
    }

    #[test]
    fn test_substitute_repeated_placeholder() {
        let out = substitute("[Character A] waves. [Character A] leaves.", &["Jinx"]).unwrap();
        assert_eq!(out, "Jinx waves. Jinx leaves.");
    }

    #[test]
    fn test_substitute_insufficient() {
        let err = substitute("[Character A] and [Character B]", &["Solo"]).unwrap_err();
        assert_eq!(err, SkipReason::InsufficientParticipants { needed: 2, available: 1 });
    }

    #[test]
    fn test_template_ids() {
        let t = ScenarioTemplate::new(Category::SelfInflicted, 7, "x");
        assert_eq!(t.id, "self_007");
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("direct_kill.json"),
            r#"[{"text": "[Character A] attacks [Character B]."}, {"nope": 1}, {"text": "[Character A] wins a duel with [Character B]."}]"#,
        )
        .unwrap();
        fs::write(dir.path().join("story.json"), r#"{"text": "not a list"}"#).unwrap();
        fs::write(dir.path().join("weather.json"), r#"[{"text": "rain"}]"#).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let catalog = ScenarioCatalog::load_dir(dir.path());
        let kills = catalog.get(Category::DirectKill);
        assert_eq!(kills.len(), 2);
        assert_eq!(kills[0].id, "direct_kill_000");
        // index follows file position, including the skipped entry
        assert_eq!(kills[1].id, "direct_kill_002");
        assert!(catalog.get(Category::Story).is_empty());
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_load_missing_dir() {
        let catalog = ScenarioCatalog::load_dir("/definitely/not/here");
        assert!(catalog.is_empty());
    }
}
