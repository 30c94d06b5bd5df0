/*!
The mention store: one project's annotations after the full preparation
pipeline has run.

Construction is a linear, side-effect-free pipeline: raw mentions are
implied-expanded, then grouped-collapsed, then stripped of ignored notes.
After that the cohort never changes; confusion matrices and contingency
tables are computed freshly per query and never mutate the store.
*/
use crate::agree::{self, ConfusionMatrix, ContingencyTable};
use crate::config::ProjectConfig;
use crate::labels::{Label, LabelSet, Mentions, NoteSet, ProjectAnnotations};
use crate::ranges::{self, ExportMetadata};
use crate::simplify;
use ahash::HashMap as AHashMap;
use tracing::debug;

/// A prepared cohort of notes and annotators, ready to be queried.
#[derive(Debug, Clone)]
pub struct Cohort {
    annotations: ProjectAnnotations,
    note_ranges: AHashMap<String, NoteSet>,
    ignored_notes: NoteSet,
}

impl Cohort {
    /// Runs the preparation pipeline over freshly parsed annotations:
    ///
    /// 1. a configured label list replaces the universe detected from the
    ///    export;
    /// 2. every configured annotator gets an entry, even with no mentions;
    /// 3. implied labels are expanded, then grouped labels collapsed;
    /// 4. each annotator's note range is taken from the config when
    ///    declared, otherwise defaulted to the notes they annotated;
    /// 5. ignored notes are resolved against the export metadata and
    ///    removed from every range and from the store itself. Ranges are
    ///    also limited to notes that exist in the export.
    pub fn new(
        mut annotations: ProjectAnnotations,
        config: &ProjectConfig,
        metadata: &ExportMetadata,
    ) -> Self {
        if !config.class_labels.is_empty() {
            annotations.labels = config.class_labels.clone();
        }

        // Placeholder for any annotators that don't have mentions, so they
        // are still comparable (as all-negative) and still get a note range.
        for name in config.annotators.values() {
            annotations.mentions.entry(name.clone()).or_insert_with(Mentions::default);
        }

        simplify::simplify_mentions(
            &mut annotations,
            &config.implied_labels,
            &config.grouped_labels,
        );

        let all_notes = metadata.note_ids();

        // Every configured range resolves, helper ranges included; the
        // annotators without one default to the notes they touched.
        let mut note_ranges: AHashMap<String, NoteSet> = config
            .note_ranges
            .iter()
            .map(|(name, expr)| (name.clone(), expr.resolve(&config.note_ranges)))
            .collect();
        for (annotator, mentions) in &annotations.mentions {
            note_ranges
                .entry(annotator.clone())
                .or_insert_with(|| mentions.keys().copied().collect());
        }

        let ignored_notes = ranges::resolve_ignored(&config.ignore, metadata, &all_notes);
        for range in note_ranges.values_mut() {
            range.retain(|note_id| all_notes.contains(note_id) && !ignored_notes.contains(note_id));
        }
        for &note_id in &ignored_notes {
            annotations.remove(note_id);
        }

        debug!(
            annotators = annotations.mentions.len(),
            ignored = ignored_notes.len(),
            "prepared cohort"
        );

        Self {
            annotations,
            note_ranges,
            ignored_notes,
        }
    }

    /// The label universe after grouped-label collapsing.
    pub fn class_labels(&self) -> &LabelSet {
        &self.annotations.labels
    }

    /// The prepared annotations themselves.
    pub fn annotations(&self) -> &ProjectAnnotations {
        &self.annotations
    }

    /// The notes in scope for one annotator, if known.
    pub fn note_range(&self, annotator: &str) -> Option<&NoteSet> {
        self.note_ranges.get(annotator)
    }

    /// Every annotator with a note range, configured or detected.
    pub fn annotators(&self) -> impl Iterator<Item = &str> {
        self.annotations.mentions.keys().map(String::as_str)
    }

    pub fn ignored_notes(&self) -> &NoteSet {
        &self.ignored_notes
    }

    /// Either the single picked label, or the whole class-label universe.
    fn select_labels(&self, label_pick: Option<&Label>) -> LabelSet {
        match label_pick {
            Some(label) => std::iter::once(label.clone()).collect(),
            None => self.annotations.labels.clone(),
        }
    }

    /// Confusion matrix of `annotator` against `truth` over `note_range`,
    /// optionally for a single class label.
    pub fn confusion_matrix(
        &self,
        truth: &str,
        annotator: &str,
        note_range: &NoteSet,
        label_pick: Option<&Label>,
    ) -> ConfusionMatrix {
        agree::confusion_matrix(
            &self.annotations,
            truth,
            annotator,
            note_range,
            Some(&self.select_labels(label_pick)),
        )
    }

    /// Contingency table of two annotators against `truth` over
    /// `note_range`, optionally for a single class label.
    pub fn contingency_table(
        &self,
        truth: &str,
        annotator1: &str,
        annotator2: &str,
        note_range: &NoteSet,
        label_pick: Option<&Label>,
    ) -> ContingencyTable {
        agree::contingency_table(
            &self.annotations,
            truth,
            annotator1,
            annotator2,
            note_range,
            Some(&self.select_labels(label_pick)),
        )
    }
}
