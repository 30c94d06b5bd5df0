/*!
Note range expressions and external identifier resolution.

A note range describes which notes are "in scope" for an annotator or a
comparison. Configs write ranges as bare integers, numeric strings, inclusive
`"a-b"` spans, references to other named ranges, or lists combining any of
those. This module parses that little language into an explicit [`RangeExpr`]
tree and resolves trees into concrete [`NoteSet`]s.

It also resolves external resource identifiers (`Encounter/...`,
`DocumentReference/...`) against the metadata carried by an annotation
export, which is how ignored notes may be spelled in a config.
*/
use crate::labels::NoteSet;
use ahash::{HashMap as AHashMap, HashSet as AHashSet};
use either::Either;
use tracing::warn;

/// One note range expression, as declared in a project config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeExpr {
    /// A single note identifier.
    Note(i64),
    /// An inclusive span of note identifiers.
    Span(i64, i64),
    /// A reference to another named range.
    Reference(String),
    /// A list combining any of the above.
    Many(Vec<RangeExpr>),
}

impl RangeExpr {
    /// Parses a scalar range expression: all-digits strings are note
    /// identifiers, `"a-b"` is an inclusive span, anything else is a
    /// reference to a named range.
    pub fn parse_scalar(value: &str) -> Self {
        let trimmed = value.trim();
        if is_number(trimmed) {
            // Guaranteed to fit by is_number, barring absurdly long inputs.
            if let Ok(note_id) = trimmed.parse::<i64>() {
                return Self::Note(note_id);
            }
        }
        if let Some((low, high)) = trimmed.split_once('-') {
            if is_number(low) && is_number(high) {
                if let (Ok(low), Ok(high)) = (low.parse::<i64>(), high.parse::<i64>()) {
                    return Self::Span(low, high);
                }
            }
        }
        Self::Reference(trimmed.to_owned())
    }

    /// Resolves this expression into a concrete set of note identifiers.
    ///
    /// References are looked up in `named` and followed with a visited set:
    /// each named range contributes at most once, so reference cycles
    /// terminate instead of recursing forever. An unknown reference is a soft
    /// failure: it is logged and contributes nothing.
    pub fn resolve(&self, named: &AHashMap<String, RangeExpr>) -> NoteSet {
        let mut notes = NoteSet::new();
        let mut seen: AHashSet<&str> = AHashSet::default();
        let mut pending: Vec<&RangeExpr> = vec![self];

        while let Some(expr) = pending.pop() {
            match expr {
                Self::Note(note_id) => {
                    notes.insert(*note_id);
                }
                Self::Span(low, high) => {
                    notes.extend(*low..=*high);
                }
                Self::Many(exprs) => {
                    pending.extend(exprs.iter());
                }
                Self::Reference(name) => {
                    if !seen.insert(name.as_str()) {
                        continue; // already contributed (or cyclic)
                    }
                    match named.get(name) {
                        Some(target) => pending.push(target),
                        None => warn!(range = name.as_str(), "Unknown note range"),
                    }
                }
            }
        }

        notes
    }
}

fn is_number(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

/// An entry of a config's ignore list: either a raw note identifier or an
/// external resource reference that still needs resolving.
pub type IgnoreEntry = Either<i64, String>;

/// The kind of external resource an identifier points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentifierType {
    Encounter,
    DocRef,
}

/// The per-note metadata carried by an annotation export, used to map
/// external resource identifiers back to note identifiers.
#[derive(Debug, Clone, Default)]
pub struct NoteMetadata {
    pub note_id: i64,
    pub encounter_id: Option<String>,
    pub anon_encounter_id: Option<String>,
    /// Real document reference identifier to its anonymized form.
    pub docref_mappings: AHashMap<String, String>,
}

impl NoteMetadata {
    pub fn new(note_id: i64) -> Self {
        Self {
            note_id,
            ..Self::default()
        }
    }
}

/// Metadata for every note in an annotation export.
#[derive(Debug, Clone, Default)]
pub struct ExportMetadata {
    notes: Vec<NoteMetadata>,
}

impl ExportMetadata {
    pub fn new(notes: Vec<NoteMetadata>) -> Self {
        Self { notes }
    }

    /// Metadata-free constructor for exports identified by note id alone.
    pub fn from_note_ids<I: IntoIterator<Item = i64>>(note_ids: I) -> Self {
        Self {
            notes: note_ids.into_iter().map(NoteMetadata::new).collect(),
        }
    }

    /// Every note identifier present in the export.
    pub fn note_ids(&self) -> NoteSet {
        self.notes.iter().map(|note| note.note_id).collect()
    }

    /// Maps an external identifier to the note that holds it, if any.
    ///
    /// A `Encounter/` or `DocumentReference/` prefix selects the identifier
    /// kind; a bare identifier is assumed to be an encounter. Both real and
    /// anonymized identifiers are accepted, collisions between the two
    /// being very unlikely.
    pub fn resolve_external_id(&self, external_id: &str) -> Option<i64> {
        let (id_type, bare_id) = match external_id.split_once('/') {
            Some(("Encounter", rest)) => (IdentifierType::Encounter, rest),
            Some(("DocumentReference", rest)) => (IdentifierType::DocRef, rest),
            _ => (IdentifierType::Encounter, external_id),
        };

        match id_type {
            IdentifierType::Encounter => self
                .notes
                .iter()
                .find(|note| {
                    note.encounter_id.as_deref() == Some(bare_id)
                        || note.anon_encounter_id.as_deref() == Some(bare_id)
                })
                .map(|note| note.note_id),
            IdentifierType::DocRef => self
                .notes
                .iter()
                .find(|note| {
                    note.docref_mappings
                        .iter()
                        .any(|(real, anon)| real == bare_id || anon == bare_id)
                })
                .map(|note| note.note_id),
        }
    }
}

/// Resolves a config's ignore list into concrete note identifiers.
///
/// External references go through the export metadata. Raw note identifiers
/// are also tried against the metadata first, in case a project uses purely
/// numeric external identifiers. Entries that resolve to nothing are dropped
/// (over-zealous excluding is common when ignore lists are generated), and
/// the result is limited to notes that actually exist in the export.
pub fn resolve_ignored(
    entries: &[IgnoreEntry],
    metadata: &ExportMetadata,
    all_notes: &NoteSet,
) -> NoteSet {
    let mut ignored = NoteSet::new();
    for entry in entries {
        let note_id = match entry {
            Either::Left(note_id) => metadata
                .resolve_external_id(&note_id.to_string())
                .or(Some(*note_id)),
            Either::Right(external_id) => metadata.resolve_external_id(external_id),
        };
        if let Some(note_id) = note_id {
            if all_notes.contains(&note_id) {
                ignored.insert(note_id);
            }
        }
    }
    ignored
}
