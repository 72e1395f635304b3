//! Status and type vocabularies.
//!
//! User input resolves in three steps: canonical name, then synonym, then
//! an [`Error::InvalidArgument`] naming the nearest known word. Spaces and
//! dashes are read as underscores, so `in progress` and `in-progress` both
//! resolve to `in_progress`.

use crate::error::Error;

/// Suggestions further than this many edits away are not offered.
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// Canonical names of one enum-like field plus accepted synonyms.
#[derive(Debug)]
pub struct Vocabulary {
    kind: &'static str,
    canonical: &'static [&'static str],
    synonyms: &'static [(&'static str, &'static str)],
}

pub const STATUSES: Vocabulary = Vocabulary {
    kind: "status",
    canonical: &[
        "backlog",
        "open",
        "ready",
        "in_progress",
        "blocked",
        "closed",
        "deferred",
    ],
    synonyms: &[
        ("done", "closed"),
        ("complete", "closed"),
        ("completed", "closed"),
        ("resolved", "closed"),
        ("fixed", "closed"),
        ("wontfix", "closed"),
        ("wip", "in_progress"),
        ("doing", "in_progress"),
        ("active", "in_progress"),
        ("started", "in_progress"),
        ("new", "open"),
        ("todo", "open"),
        ("to_do", "open"),
        ("triaged", "ready"),
        ("next", "ready"),
        ("waiting", "blocked"),
        ("icebox", "backlog"),
        ("someday", "backlog"),
        ("hold", "deferred"),
        ("on_hold", "deferred"),
        ("later", "deferred"),
    ],
};

pub const TYPES: Vocabulary = Vocabulary {
    kind: "type",
    canonical: &["task", "bug", "feature", "epic", "chore", "milestone"],
    synonyms: &[
        ("story", "feature"),
        ("enhancement", "feature"),
        ("request", "feature"),
        ("defect", "bug"),
        ("fix", "bug"),
        ("incident", "bug"),
        ("todo", "task"),
        ("subtask", "task"),
        ("cleanup", "chore"),
        ("refactor", "chore"),
        ("maintenance", "chore"),
        ("initiative", "epic"),
        ("theme", "epic"),
        ("release", "milestone"),
        ("version", "milestone"),
        ("sprint", "milestone"),
    ],
};

impl Vocabulary {
    /// Resolve `input` to a canonical name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when `input` is neither a
    /// canonical name nor a synonym. The message carries a suggestion
    /// when one is close enough.
    pub fn resolve(&self, input: &str) -> Result<&'static str, Error> {
        let wanted = input.trim().to_lowercase().replace(['-', ' '], "_");

        if let Some(name) = self.canonical.iter().find(|name| **name == wanted) {
            return Ok(name);
        }
        if let Some((_, name)) = self.synonyms.iter().find(|(alias, _)| *alias == wanted) {
            return Ok(name);
        }

        Err(Error::InvalidArgument(match self.suggest(&wanted) {
            Some(name) => format!("Invalid {} '{input}'. Did you mean '{name}'?", self.kind),
            None => format!(
                "Invalid {} '{input}' (expected one of: {})",
                self.kind,
                self.canonical.join(", ")
            ),
        }))
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    /// One-line summary of accepted words, used as an error hint.
    #[must_use]
    pub fn listing(&self) -> String {
        let aliases: Vec<String> = self
            .synonyms
            .iter()
            .take(3)
            .map(|(alias, name)| format!("{alias}→{name}"))
            .collect();
        format!(
            "Valid {}: {}. Synonyms include {}",
            self.kind,
            self.canonical.join(", "),
            aliases.join(", ")
        )
    }

    /// Canonical name behind the closest known word, first match on ties.
    fn suggest(&self, word: &str) -> Option<&'static str> {
        self.canonical
            .iter()
            .map(|name| (*name, *name))
            .chain(self.synonyms.iter().copied())
            .map(|(known, name)| (edit_distance(word, known), name))
            .filter(|(distance, _)| *distance <= MAX_SUGGESTION_DISTANCE)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, name)| name)
    }
}

/// Levenshtein distance over chars, two rows at a time.
#[must_use]
pub fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut next = Vec::with_capacity(row.len());
        next.push(i + 1);
        for (j, cb) in b.iter().enumerate() {
            let substitute = row[j] + usize::from(ca != *cb);
            let delete = row[j + 1] + 1;
            let insert = next[j] + 1;
            next.push(substitute.min(delete).min(insert));
        }
        row = next;
    }

    row[b.len()]
}

/// Up to `max` of `existing` within suggestion distance of `searched`,
/// nearest first, ties alphabetical.
#[must_use]
pub fn find_similar_ids(searched: &str, existing: &[String], max: usize) -> Vec<String> {
    let mut near: Vec<(usize, &String)> = existing
        .iter()
        .map(|id| (edit_distance(searched, id), id))
        .filter(|(distance, _)| *distance <= MAX_SUGGESTION_DISTANCE)
        .collect();
    near.sort();
    near.into_iter().take(max).map(|(_, id)| id.clone()).collect()
}
