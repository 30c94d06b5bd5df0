/*!
This module defines the label model shared by the whole crate: the hierarchical
[`Label`] value type, the [`LabelMatcher`] pattern type and the aliases for the
collections built out of them.

A label is a three part value: a label name, an optional sublabel name and an
optional sublabel value. The string form uses `|` as the delimiter between the
parts, so `"Cough|severity|mild"` is the label `Cough` with the sublabel
`severity` set to `mild`.
*/
use ahash::{HashMap as AHashMap, HashSet as AHashSet};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{self, Display};

/// Set of unique labels, unordered.
pub type LabelSet = AHashSet<Label>;

/// Set of note identifiers. Kept sorted so that iteration over a range of
/// notes is deterministic.
pub type NoteSet = BTreeSet<i64>;

/// Map of note identifier to every label asserted on that note. Usually used
/// in the context of a single annotator.
pub type Mentions = AHashMap<i64, LabelSet>;

/// Map of annotator identifier to human readable annotator name.
pub type AnnotatorMap = AHashMap<i64, String>;

/// Map of matcher to the labels asserted whenever the matcher matches.
pub type ImpliedLabels = AHashMap<LabelMatcher, LabelSet>;

/// Ordered list of `(group label, matcher)` pairs. The declared order is
/// significant when group matchers overlap: later groups only see the labels
/// left behind by earlier groups.
pub type GroupedLabels = Vec<(Label, LabelMatcher)>;

/// Errors raised when constructing a [`Label`] from invalid parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    /// The label or sublabel name contains the `|` delimiter.
    InvalidCharacter(String),
    /// A sublabel name was given without a sublabel value.
    MissingSublabelValue(String),
}

impl Display for LabelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCharacter(part) => {
                write!(f, "Invalid character '|' found in label name: '{}'", part)
            }
            Self::MissingSublabelValue(name) => {
                write!(f, "Sublabel name but no sublabel value provided: '{}'", name)
            }
        }
    }
}
impl Error for LabelError {}

/// Splits a label expression on `|` into exactly three parts, padding missing
/// trailing parts with the empty string and trimming surrounding whitespace.
fn split_label(expression: &str) -> [String; 3] {
    let mut pieces = expression.splitn(3, '|').map(str::trim);
    [
        pieces.next().unwrap_or("").to_owned(),
        pieces.next().unwrap_or("").to_owned(),
        pieces.next().unwrap_or("").to_owned(),
    ]
}

/// A single hierarchical label, as asserted on a note by an annotator.
///
/// Labels are immutable values. Two invariants hold by construction: neither
/// the label nor the sublabel name may contain the `|` delimiter, and a
/// sublabel name without a sublabel value is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Label {
    label: String,
    // Empty string means "not provided" / "not used".
    sublabel_name: String,
    sublabel_value: String,
}

impl Label {
    /// Builds a label from its three parts, validating the invariants.
    pub fn new(
        label: impl Into<String>,
        sublabel_name: impl Into<String>,
        sublabel_value: impl Into<String>,
    ) -> Result<Self, LabelError> {
        let label = label.into();
        let sublabel_name = sublabel_name.into();
        let sublabel_value = sublabel_value.into();
        if label.contains('|') {
            return Err(LabelError::InvalidCharacter(label));
        }
        if sublabel_name.contains('|') {
            return Err(LabelError::InvalidCharacter(sublabel_name));
        }
        if !sublabel_name.is_empty() && sublabel_value.is_empty() {
            return Err(LabelError::MissingSublabelValue(sublabel_name));
        }
        Ok(Self {
            label,
            sublabel_name,
            sublabel_value,
        })
    }

    /// Parses a label string into a full [`Label`].
    ///
    /// The `|` characters are interpreted as delimiters between the label, the
    /// sublabel name and the sublabel value. Surrounding whitespace of any
    /// part is ignored.
    pub fn parse(label_str: &str) -> Result<Self, LabelError> {
        let [label, name, value] = split_label(label_str);
        Self::new(label, name, value)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn sublabel_name(&self) -> &str {
        &self.sublabel_name
    }

    pub fn sublabel_value(&self) -> &str {
        &self.sublabel_value
    }

    /// The canonical `|` delimited form of this label. Parsing the expression
    /// reconstructs an equal label.
    pub fn expression(&self) -> String {
        if self.sublabel_value.is_empty() {
            self.label.clone()
        } else {
            format!(
                "{}|{}|{}",
                self.label, self.sublabel_name, self.sublabel_value
            )
        }
    }

    /// Returns the "namespace" (i.e. "non-value") parts of the label.
    ///
    /// When a sublabel is present, that is the label and sublabel name but
    /// not the sublabel value. When not using a sublabel, it is just empty
    /// strings, because the label itself is a value in the same namespace as
    /// all other bare labels.
    ///
    /// This is mostly used for detecting when two labels "conflict", meaning
    /// they have the same namespace but different values.
    pub fn namespace(&self) -> (&str, &str) {
        if self.sublabel_name.is_empty() {
            ("", "")
        } else {
            (&self.label, &self.sublabel_name)
        }
    }

    fn casefold_key(&self) -> (String, String, String) {
        (
            self.label.to_lowercase(),
            self.sublabel_name.to_lowercase(),
            self.sublabel_value.to_lowercase(),
        )
    }
}

/// Suitable for presenting to a user, though it may be long.
impl Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sublabel_name.is_empty() {
            return write!(f, "{}", self.label);
        }
        let prefix = format!("{} ", self.label);
        let short_name = self
            .sublabel_name
            .strip_prefix(&prefix)
            .unwrap_or(&self.sublabel_name);
        if short_name.is_empty() || self.label == self.sublabel_name {
            write!(f, "{} → {}", self.label, self.sublabel_value)
        } else {
            write!(f, "{} → {} → {}", self.label, short_name, self.sublabel_value)
        }
    }
}

/// Case-insensitive ordering over the three parts, useful for presentation.
/// Ties are broken with the exact parts so that the ordering stays consistent
/// with equality.
impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        self.casefold_key().cmp(&other.casefold_key()).then_with(|| {
            (&self.label, &self.sublabel_name, &self.sublabel_value).cmp(&(
                &other.label,
                &other.sublabel_name,
                &other.sublabel_value,
            ))
        })
    }
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Matches a specific label or a whole class of labels.
///
/// Each pattern has the same three part shape as a label, but any part left
/// empty acts as a wildcard:
///
/// * `"A|B|C"` matches `A|B|C` but not `A|B|D`
/// * `"A|B"` matches both `A|B|C` and `A|B|D` but not `A|E|F`
/// * `"A"` matches `A|B|C`, `A|E|F` and `A`, but not `X`
///
/// Equality and hashing are structural over the underlying pattern set, so
/// two matchers built from the same expressions in a different order compare
/// equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelMatcher {
    patterns: BTreeSet<[String; 3]>,
}

impl LabelMatcher {
    pub fn new<I, S>(expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: expressions
                .into_iter()
                .map(|e| split_label(e.as_ref()))
                .collect(),
        }
    }

    /// True if any pattern's non-empty parts all equal the corresponding
    /// parts of `other`.
    pub fn is_match(&self, other: &Label) -> bool {
        self.patterns.iter().any(|pattern| {
            pattern[0] == other.label
                && (pattern[1].is_empty() || pattern[1] == other.sublabel_name)
                && (pattern[2].is_empty() || pattern[2] == other.sublabel_value)
        })
    }

    /// The subset of `others` matching any pattern.
    pub fn matches_in_set(&self, others: &LabelSet) -> LabelSet {
        others
            .iter()
            .filter(|label| self.is_match(label))
            .cloned()
            .collect()
    }
}

impl From<&str> for LabelMatcher {
    fn from(expression: &str) -> Self {
        Self::new([expression])
    }
}

/// One highlighted span of text and the labels attached to it. Kept around
/// for term frequency reporting, the agreement math only ever sees the
/// note-wide [`Mentions`].
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledText {
    pub text: Option<String>,
    pub labels: LabelSet,
}

/// Everything parsed out of an annotation export for one project: the label
/// universe and each annotator's note-wide mentions.
///
/// Built once by the export parser, then mutated exactly twice (implied-label
/// expansion, grouped-label collapsing) before being queried.
#[derive(Debug, Clone, Default)]
pub struct ProjectAnnotations {
    /// The valid label universe.
    pub labels: LabelSet,
    /// Annotator name to that annotator's mentions.
    pub mentions: AHashMap<String, Mentions>,
    /// We usually deal with note-wide labels, but sometimes it is helpful to
    /// keep the original text-to-label associations available, for term
    /// frequency analysis. Annotator name to note to text/label combos.
    pub original_text_mentions: AHashMap<String, AHashMap<i64, Vec<LabeledText>>>,
}

impl ProjectAnnotations {
    /// Removes any trace of the given note from the store.
    pub fn remove(&mut self, note_id: i64) {
        for mentions in self.mentions.values_mut() {
            mentions.remove(&note_id);
        }
        for mentions in self.original_text_mentions.values_mut() {
            mentions.remove(&note_id);
        }
    }
}
