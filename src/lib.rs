/*!
This library computes inter-annotator agreement statistics for labelled
clinical chart annotations. Given an export of per-note labels from several
annotators and a small project configuration, it prepares the annotations
(implied-label expansion, grouped-label collapsing, note range and ignore
resolution) and then answers agreement queries: confusion matrices, the
derived accuracy scores (F1, sensitivity, specificity, PPV, NPV, Cohen's
kappa), contingency tables of two annotators against a shared truth, and
McNemar's test over those tables.

# Terminology
* An annotator is anyone (or anything) that labelled notes: a human reviewer,
    an NLP pipeline, a set of ICD10 codes.
* A note is the unit of comparison, identified by an integer id. Annotations
    made anywhere inside a note count as one mention of that label on that
    note.
* A label is a three part value written `name|sublabel|value`, for example
    `Cough|severity|mild`. The sublabel parts are optional.
* An implied label is asserted automatically whenever another label matching
    a configured pattern is present. Implications chain until a fixed point.
* A grouped label replaces a configured set of labels with a single combined
    label, after all implications have run.
* A note range is the set of notes an annotator is responsible for. Ranges
    are configured as ids, inclusive `a-b` spans, references to other named
    ranges, or lists of those; an annotator without one is assumed to have
    seen exactly the notes they labelled.
* A cohort is the prepared, immutable result of all of the above, ready to
    be queried.

Absence of a label on an in-range note is a negative call, so every
`(note, label)` pair classifies into exactly one confusion matrix cell.
*/
mod agree;
mod cohort;
mod config;
mod labels;
mod mcnemar;
mod ranges;
mod simplify;

// The public api starts here
pub use labels::{
    AnnotatorMap, GroupedLabels, ImpliedLabels, Label, LabelError, LabelMatcher, LabelSet,
    LabeledText, Mentions, NoteSet, ProjectAnnotations,
};

pub use config::{ConfigError, ProjectConfig};

pub use ranges::{
    resolve_ignored, ExportMetadata, IgnoreEntry, NoteMetadata, RangeExpr,
};

pub use simplify::{
    convert_grouped_mentions, find_implied_labels, find_implied_mentions, simplify_mentions,
};

pub use agree::{
    append_matrix, confusion_matrix, contingency_table, score_kappa, score_matrix,
    score_reviewer, true_prevalence, ConfusionMatrix, ContingencyCell, ContingencyTable,
    MatrixCell, NoteLabel, Score,
};

pub use cohort::Cohort;

pub use mcnemar::{mcnemar, mcnemar_from_table, McNemarResult};

/// Main entrypoint for accuracy scoring. Compares one annotator against
/// another treated as the truth, over the notes both of them were responsible
/// for, and returns the full set of agreement scores. Pass a label to score
/// a single class instead of the whole label universe.
///
/// # Example
/// ```rust
/// use chart_agree::{score_annotator, Cohort, ExportMetadata, Label, LabelSet,
///                   ProjectAnnotations, ProjectConfig};
///
/// let labels = |exprs: &[&str]| -> LabelSet {
///     exprs.iter().map(|e| Label::parse(e).unwrap()).collect()
/// };
///
/// let mut annotations = ProjectAnnotations::default();
/// annotations.labels = labels(&["A", "B", "C"]);
/// annotations.mentions.insert(
///     String::from("alice"),
///     [(1, labels(&["A", "B"])), (2, labels(&["A"])), (3, labels(&["C"]))]
///         .into_iter()
///         .collect(),
/// );
/// annotations.mentions.insert(
///     String::from("bob"),
///     [(1, labels(&["A", "B"])), (2, labels(&["B"])), (3, labels(&["A", "C"]))]
///         .into_iter()
///         .collect(),
/// );
///
/// let cohort = Cohort::new(
///     annotations,
///     &ProjectConfig::default(),
///     &ExportMetadata::from_note_ids(1..=3),
/// );
/// let score = score_annotator(&cohort, "alice", "bob", None);
///
/// assert!((score.f1 - 2.0 / 3.0).abs() < 1e-9);
/// assert!((score.sens - 0.75).abs() < 1e-9);
/// assert!((score.spec - 0.6).abs() < 1e-9);
/// assert!((score.kappa - 14.0 / 41.0).abs() < 1e-9);
/// ```
pub fn score_annotator(
    cohort: &Cohort,
    truth: &str,
    annotator: &str,
    label_pick: Option<&Label>,
) -> Score {
    let empty = NoteSet::new();
    let truth_notes = cohort.note_range(truth).unwrap_or(&empty);
    let annotator_notes = cohort.note_range(annotator).unwrap_or(&empty);
    let shared: NoteSet = truth_notes.intersection(annotator_notes).copied().collect();
    score_matrix(&cohort.confusion_matrix(truth, annotator, &shared, label_pick))
}
