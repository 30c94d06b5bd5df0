/*!
Agreement math between annotators: confusion matrices, contingency tables and
the scores derived from them (F1, sensitivity, specificity, PPV, NPV and
Cohen's kappa).

Everything here is computed freshly per query from an immutable
[`ProjectAnnotations`] and never mutates its inputs. The matrices keep a full
audit trail: each cell is the list of `(note, label)` pairs classified into
it, not just a count.
*/
use crate::labels::{Label, LabelSet, Mentions, NoteSet, ProjectAnnotations};
use enum_iterator::Sequence;
use itertools::Itertools;
use serde::Serialize;
use std::fmt::{self, Display};

/// One classified `(note, label)` pair.
pub type NoteLabel = (i64, Label);

/// The four cells of a confusion matrix, in reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Sequence)]
pub enum MatrixCell {
    TruePos,
    FalseNeg,
    FalsePos,
    TrueNeg,
}

impl Display for MatrixCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = match self {
            Self::TruePos => "TP",
            Self::FalseNeg => "FN",
            Self::FalsePos => "FP",
            Self::TrueNeg => "TN",
        };
        write!(f, "{}", short)
    }
}

/// Per-note, per-label classification of agreement between a truth annotator
/// and another annotator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfusionMatrix {
    /// Both annotators asserted the label.
    #[serde(rename = "TP")]
    pub true_pos: Vec<NoteLabel>,
    /// Only the truth annotator asserted the label.
    #[serde(rename = "FN")]
    pub false_neg: Vec<NoteLabel>,
    /// Only the compared annotator asserted the label.
    #[serde(rename = "FP")]
    pub false_pos: Vec<NoteLabel>,
    /// Neither annotator asserted the label.
    #[serde(rename = "TN")]
    pub true_neg: Vec<NoteLabel>,
}

impl ConfusionMatrix {
    pub fn cell(&self, cell: MatrixCell) -> &[NoteLabel] {
        match cell {
            MatrixCell::TruePos => &self.true_pos,
            MatrixCell::FalseNeg => &self.false_neg,
            MatrixCell::FalsePos => &self.false_pos,
            MatrixCell::TrueNeg => &self.true_neg,
        }
    }

    pub fn count(&self, cell: MatrixCell) -> usize {
        self.cell(cell).len()
    }

    /// Total number of classified `(note, label)` pairs, across all cells.
    pub fn total(&self) -> usize {
        enum_iterator::all::<MatrixCell>()
            .map(|cell| self.count(cell))
            .sum()
    }
}

/// The four cells of a contingency table comparing two annotators against a
/// shared truth, in reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Sequence)]
pub enum ContingencyCell {
    BothCorrect,
    OnlyFirst,
    OnlySecond,
    BothWrong,
}

impl Display for ContingencyCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = match self {
            Self::BothCorrect => "BC",
            Self::OnlyFirst => "OL",
            Self::OnlySecond => "OR",
            Self::BothWrong => "BW",
        };
        write!(f, "{}", short)
    }
}

/// Per-note, per-label classification of two annotators' correctness
/// relative to a shared truth annotator. Input to McNemar's test.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContingencyTable {
    /// Both annotators made the same call as truth.
    #[serde(rename = "BC")]
    pub both_correct: Vec<NoteLabel>,
    /// Only the first annotator matched truth.
    #[serde(rename = "OL")]
    pub only_first: Vec<NoteLabel>,
    /// Only the second annotator matched truth.
    #[serde(rename = "OR")]
    pub only_second: Vec<NoteLabel>,
    /// Neither annotator matched truth.
    #[serde(rename = "BW")]
    pub both_wrong: Vec<NoteLabel>,
}

impl ContingencyTable {
    pub fn cell(&self, cell: ContingencyCell) -> &[NoteLabel] {
        match cell {
            ContingencyCell::BothCorrect => &self.both_correct,
            ContingencyCell::OnlyFirst => &self.only_first,
            ContingencyCell::OnlySecond => &self.only_second,
            ContingencyCell::BothWrong => &self.both_wrong,
        }
    }

    pub fn count(&self, cell: ContingencyCell) -> usize {
        self.cell(cell).len()
    }
}

/// Collects every label used by any of the given annotators on any note, then
/// applies the optional filter. An empty filter means "no filter", matching
/// how an unconfigured label universe behaves upstream of this crate.
fn used_labels<'a, I>(mention_maps: I, labels: Option<&LabelSet>) -> Vec<Label>
where
    I: IntoIterator<Item = Option<&'a Mentions>>,
{
    let mut label_set = LabelSet::default();
    for mentions in mention_maps.into_iter().flatten() {
        for note_labels in mentions.values() {
            label_set.extend(note_labels.iter().cloned());
        }
    }
    if let Some(filter) = labels {
        if !filter.is_empty() {
            label_set.retain(|label| filter.contains(label));
        }
    }
    label_set.into_iter().sorted().collect()
}

/// Builds the confusion matrix of `annotator` against `truth`.
///
/// The label universe considered is the union of labels used by either
/// annotator across **all** their notes (not restricted to `note_range`),
/// intersected with the optional `labels` filter. Every `(note, label)` pair
/// of `note_range x universe` lands in exactly one cell, so
/// `matrix.total() == note_range.len() * universe.len()`.
///
/// Swapping `truth` and `annotator` exchanges the FP and FN cells and leaves
/// TP and TN unchanged.
pub fn confusion_matrix(
    annotations: &ProjectAnnotations,
    truth: &str,
    annotator: &str,
    note_range: &NoteSet,
    labels: Option<&LabelSet>,
) -> ConfusionMatrix {
    let truth_mentions = annotations.mentions.get(truth);
    let annotator_mentions = annotations.mentions.get(annotator);

    // Only examine labels used by a compared annotator at least once.
    let label_universe = used_labels([truth_mentions, annotator_mentions], labels);

    let mut matrix = ConfusionMatrix::default();
    for &note_id in note_range {
        let truth_note = truth_mentions.and_then(|mentions| mentions.get(&note_id));
        let annotator_note = annotator_mentions.and_then(|mentions| mentions.get(&note_id));

        for label in &label_universe {
            let truth_positive = truth_note.is_some_and(|labels| labels.contains(label));
            let annotator_positive = annotator_note.is_some_and(|labels| labels.contains(label));
            let key = (note_id, label.clone());

            match (truth_positive, annotator_positive) {
                (true, true) => matrix.true_pos.push(key),
                (true, false) => matrix.false_neg.push(key),
                (false, true) => matrix.false_pos.push(key),
                (false, false) => matrix.true_neg.push(key),
            }
        }
    }
    matrix
}

/// Builds the contingency table of two annotators against a shared truth.
///
/// For every `(note, label)` pair, each annotator is "correct" when their
/// presence/absence call for the label matches truth's call. The label
/// universe is the union of labels used by any of the three annotators,
/// intersected with the optional `labels` filter.
pub fn contingency_table(
    annotations: &ProjectAnnotations,
    truth: &str,
    annotator1: &str,
    annotator2: &str,
    note_range: &NoteSet,
    labels: Option<&LabelSet>,
) -> ContingencyTable {
    let truth_mentions = annotations.mentions.get(truth);
    let first_mentions = annotations.mentions.get(annotator1);
    let second_mentions = annotations.mentions.get(annotator2);

    let label_universe = used_labels([truth_mentions, first_mentions, second_mentions], labels);

    let mut table = ContingencyTable::default();
    for &note_id in note_range {
        let truth_note = truth_mentions.and_then(|mentions| mentions.get(&note_id));
        let first_note = first_mentions.and_then(|mentions| mentions.get(&note_id));
        let second_note = second_mentions.and_then(|mentions| mentions.get(&note_id));

        for label in &label_universe {
            let truth_positive = truth_note.is_some_and(|labels| labels.contains(label));
            let first_correct =
                first_note.is_some_and(|labels| labels.contains(label)) == truth_positive;
            let second_correct =
                second_note.is_some_and(|labels| labels.contains(label)) == truth_positive;
            let key = (note_id, label.clone());

            match (first_correct, second_correct) {
                (true, true) => table.both_correct.push(key),
                (true, false) => table.only_first.push(key),
                (false, true) => table.only_second.push(key),
                (false, false) => table.both_wrong.push(key),
            }
        }
    }
    table
}

/// Appends two confusion matrices, for example (annotator1 vs NLP) appended
/// to (annotator2 vs NLP). The caller guarantees the two matrices cover
/// disjoint note ranges.
pub fn append_matrix(first: &ConfusionMatrix, second: &ConfusionMatrix) -> ConfusionMatrix {
    let join = |left: &[NoteLabel], right: &[NoteLabel]| {
        left.iter().chain(right.iter()).cloned().collect()
    };
    ConfusionMatrix {
        true_pos: join(&first.true_pos, &second.true_pos),
        false_neg: join(&first.false_neg, &second.false_neg),
        false_pos: join(&first.false_pos, &second.false_pos),
        true_neg: join(&first.true_neg, &second.true_neg),
    }
}

/// Scores derived from one confusion matrix. Counts are exact; the rates are
/// raw, unrounded floats. Rounding to significant digits is presentation
/// work and happens in whatever renders these values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Score {
    #[serde(rename = "F1")]
    pub f1: f64,
    #[serde(rename = "Sens")]
    pub sens: f64,
    #[serde(rename = "Spec")]
    pub spec: f64,
    #[serde(rename = "PPV")]
    pub ppv: f64,
    #[serde(rename = "NPV")]
    pub npv: f64,
    #[serde(rename = "Kappa")]
    pub kappa: f64,
    #[serde(rename = "TP")]
    pub true_pos: usize,
    #[serde(rename = "FN")]
    pub false_neg: usize,
    #[serde(rename = "FP")]
    pub false_pos: usize,
    #[serde(rename = "TN")]
    pub true_neg: usize,
}

impl Score {
    /// True when the matrix had no true positives or no true negatives, in
    /// which case every rate was reported as 0 rather than left undefined.
    /// Callers that need to tell "no data" apart from a genuine zero score
    /// should check this before trusting the zeros.
    pub fn is_degenerate(&self) -> bool {
        self.true_pos == 0 || self.true_neg == 0
    }
}

/// Computes Cohen's kappa from the four confusion matrix counts: observed
/// agreement beyond the agreement expected from each annotator's marginal
/// rates.
pub fn score_kappa(matrix: &ConfusionMatrix) -> f64 {
    let true_pos = matrix.true_pos.len() as f64;
    let false_neg = matrix.false_neg.len() as f64;
    let false_pos = matrix.false_pos.len() as f64;
    let true_neg = matrix.true_neg.len() as f64;
    let total = true_pos + false_neg + false_pos + true_neg;
    if total == 0.0 {
        return 0.0;
    }

    let observed = (true_pos + true_neg) / total;
    let expected = ((true_pos + false_pos) / total) * ((true_pos + false_neg) / total)
        + ((true_neg + false_pos) / total) * ((true_neg + false_neg) / total);
    if expected == 1.0 {
        // Chance agreement is already total, there is nothing beyond it.
        return 0.0;
    }
    (observed - expected) / (1.0 - expected)
}

/// Scores a confusion matrix.
///
/// When the matrix has no true positives or no true negatives, every rate
/// (and kappa) is reported as 0 rather than left undefined. This avoids any
/// division by zero at the cost of conflating "no data" with "zero score";
/// [`Score::is_degenerate`] recovers the distinction.
pub fn score_matrix(matrix: &ConfusionMatrix) -> Score {
    let true_pos = matrix.true_pos.len();
    let false_neg = matrix.false_neg.len();
    let false_pos = matrix.false_pos.len();
    let true_neg = matrix.true_neg.len();

    let (sens, spec, ppv, npv, f1, kappa) = if true_pos == 0 || true_neg == 0 {
        (0.0, 0.0, 0.0, 0.0, 0.0, 0.0)
    } else {
        let tp = true_pos as f64;
        let fn_count = false_neg as f64;
        let fp = false_pos as f64;
        let tn = true_neg as f64;
        let sens = tp / (tp + fn_count);
        let spec = tn / (tn + fp);
        let ppv = tp / (tp + fp);
        let npv = tn / (tn + fn_count);
        let f1 = (2.0 * ppv * sens) / (ppv + sens);
        (sens, spec, ppv, npv, f1, score_kappa(matrix))
    };

    Score {
        f1,
        sens,
        spec,
        ppv,
        npv,
        kappa,
        true_pos,
        false_neg,
        false_pos,
        true_neg,
    }
}

/// Scores the reliability of an annotator against a truth annotator in one
/// step.
pub fn score_reviewer(
    annotations: &ProjectAnnotations,
    truth: &str,
    annotator: &str,
    note_range: &NoteSet,
    labels: Option<&LabelSet>,
) -> Score {
    score_matrix(&confusion_matrix(
        annotations,
        truth,
        annotator,
        note_range,
        labels,
    ))
}

/// Adjusts an apparent prevalence for the sensitivity and specificity of the
/// instrument that measured it (the Rogan-Gladen estimate):
/// `(apparent + specificity - 1) / (sensitivity + specificity - 1)`.
pub fn true_prevalence(prevalence_apparent: f64, sensitivity: f64, specificity: f64) -> f64 {
    (prevalence_apparent + specificity - 1.0) / (sensitivity + specificity - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelSet;
    use quickcheck::QuickCheck;
    use rstest::rstest;

    fn label(expression: &str) -> Label {
        Label::parse(expression).unwrap()
    }

    fn label_set(expressions: &[&str]) -> LabelSet {
        expressions.iter().map(|e| label(e)).collect()
    }

    fn sample_annotations() -> ProjectAnnotations {
        let mut annotations = ProjectAnnotations {
            labels: label_set(&["Cough", "Fever", "Headache"]),
            ..ProjectAnnotations::default()
        };
        annotations.mentions.insert(
            String::from("alice"),
            [(1, label_set(&["Cough"])), (2, label_set(&["Fever"]))]
                .into_iter()
                .collect(),
        );
        annotations.mentions.insert(
            String::from("bob"),
            [
                (1, label_set(&["Headache"])),
                (2, label_set(&["Cough", "Fever"])),
            ]
            .into_iter()
            .collect(),
        );
        annotations
    }

    fn entries(pairs: &[(i64, &str)]) -> Vec<NoteLabel> {
        pairs.iter().map(|(note, l)| (*note, label(l))).collect()
    }

    #[test]
    fn test_confusion_matrix_counts() {
        let annotations = sample_annotations();
        let notes = NoteSet::from_iter([1, 2]);

        let matrix = confusion_matrix(&annotations, "alice", "bob", &notes, None);
        assert_eq!(
            matrix,
            ConfusionMatrix {
                true_pos: entries(&[(2, "Fever")]),
                false_neg: entries(&[(1, "Cough")]),
                false_pos: entries(&[(1, "Headache"), (2, "Cough")]),
                true_neg: entries(&[(1, "Fever"), (2, "Headache")]),
            }
        );
    }

    #[test]
    fn test_confusion_matrix_swapped_truth() {
        let annotations = sample_annotations();
        let notes = NoteSet::from_iter([1, 2]);

        let matrix = confusion_matrix(&annotations, "bob", "alice", &notes, None);
        assert_eq!(
            matrix,
            ConfusionMatrix {
                true_pos: entries(&[(2, "Fever")]),
                false_neg: entries(&[(1, "Headache"), (2, "Cough")]),
                false_pos: entries(&[(1, "Cough")]),
                true_neg: entries(&[(1, "Fever"), (2, "Headache")]),
            }
        );
    }

    #[test]
    fn test_confusion_matrix_label_filter() {
        let annotations = sample_annotations();
        let notes = NoteSet::from_iter([1, 2]);
        let filter = label_set(&["Cough"]);

        let matrix = confusion_matrix(&annotations, "alice", "bob", &notes, Some(&filter));
        assert_eq!(
            matrix,
            ConfusionMatrix {
                true_pos: vec![],
                false_neg: entries(&[(1, "Cough")]),
                false_pos: entries(&[(2, "Cough")]),
                true_neg: vec![],
            }
        );
    }

    #[test]
    fn test_empty_filter_means_no_filter() {
        let annotations = sample_annotations();
        let notes = NoteSet::from_iter([1, 2]);

        let unfiltered = confusion_matrix(&annotations, "alice", "bob", &notes, None);
        let empty_filter =
            confusion_matrix(&annotations, "alice", "bob", &notes, Some(&LabelSet::default()));
        assert_eq!(unfiltered, empty_filter);
    }

    #[test]
    fn test_universe_not_restricted_to_note_range() {
        // Note 2's labels still count toward the universe even when only
        // note 1 is scored.
        let annotations = sample_annotations();
        let notes = NoteSet::from_iter([1]);

        let matrix = confusion_matrix(&annotations, "alice", "bob", &notes, None);
        assert_eq!(matrix.total(), 3); // 1 note x 3 used labels
    }

    #[test]
    fn test_unknown_annotator_is_all_negative() {
        let annotations = sample_annotations();
        let notes = NoteSet::from_iter([1, 2]);

        let matrix = confusion_matrix(&annotations, "alice", "nobody", &notes, None);
        assert!(matrix.false_pos.is_empty());
        assert!(matrix.true_pos.is_empty());
        assert_eq!(matrix.false_neg.len() + matrix.true_neg.len(), 4);
    }

    #[test]
    fn test_partition_and_symmetry_properties() {
        fn property(truth_notes: Vec<(u8, Vec<u8>)>, annotator_notes: Vec<(u8, Vec<u8>)>) -> bool {
            let pool = ["A", "B", "C", "D", "E"];
            let pick = |index: u8| label(pool[index as usize % pool.len()]);
            let to_mentions = |notes: Vec<(u8, Vec<u8>)>| -> Mentions {
                notes
                    .into_iter()
                    .map(|(note_id, labels)| {
                        (i64::from(note_id), labels.into_iter().map(pick).collect())
                    })
                    .collect()
            };

            let mut annotations = ProjectAnnotations::default();
            let truth_mentions = to_mentions(truth_notes);
            let annotator_mentions = to_mentions(annotator_notes);
            let universe: LabelSet = truth_mentions
                .values()
                .chain(annotator_mentions.values())
                .flatten()
                .cloned()
                .collect();
            annotations.mentions.insert(String::from("truth"), truth_mentions);
            annotations.mentions.insert(String::from("other"), annotator_mentions);

            let note_range = NoteSet::from_iter(0..16);
            let forward = confusion_matrix(&annotations, "truth", "other", &note_range, None);
            let backward = confusion_matrix(&annotations, "other", "truth", &note_range, None);

            let partitioned = forward.total() == note_range.len() * universe.len();
            let symmetric = forward.true_pos == backward.true_pos
                && forward.true_neg == backward.true_neg
                && forward.false_pos == backward.false_neg
                && forward.false_neg == backward.false_pos;
            partitioned && symmetric
        }
        QuickCheck::new()
            .tests(300)
            .quickcheck(property as fn(Vec<(u8, Vec<u8>)>, Vec<(u8, Vec<u8>)>) -> bool);
    }

    #[test]
    fn test_contingency_table() {
        let mut annotations = ProjectAnnotations::default();
        annotations
            .mentions
            .insert(String::from("truth"), [(1, label_set(&["A"]))].into_iter().collect());
        annotations
            .mentions
            .insert(String::from("first"), [(1, label_set(&["A", "B"]))].into_iter().collect());
        annotations
            .mentions
            .insert(String::from("second"), [(1, label_set(&["B"]))].into_iter().collect());
        let notes = NoteSet::from_iter([1]);

        let table = contingency_table(&annotations, "truth", "first", "second", &notes, None);
        // Label A: first said yes (correct), second said no (wrong).
        assert_eq!(table.only_first, entries(&[(1, "A")]));
        // Label B: truth said no, both said yes, both wrong.
        assert_eq!(table.both_wrong, entries(&[(1, "B")]));
        assert!(table.both_correct.is_empty());
        assert!(table.only_second.is_empty());
    }

    fn matrix_with_counts(
        true_pos: usize,
        false_neg: usize,
        false_pos: usize,
        true_neg: usize,
    ) -> ConfusionMatrix {
        let fill = |count: usize| -> Vec<NoteLabel> {
            (0..count).map(|i| (i as i64, label("Label"))).collect()
        };
        ConfusionMatrix {
            true_pos: fill(true_pos),
            false_neg: fill(false_neg),
            false_pos: fill(false_pos),
            true_neg: fill(true_neg),
        }
    }

    // Reference values from the literature on Cohen's kappa.
    #[rstest]
    #[case(20, 5, 10, 15, 0.4)]
    #[case(45, 15, 25, 15, 0.1304)]
    #[case(25, 35, 5, 35, 0.2593)]
    #[case(15, 6, 9, 26, 0.4444)]
    fn test_kappa_reference_values(
        #[case] true_pos: usize,
        #[case] false_neg: usize,
        #[case] false_pos: usize,
        #[case] true_neg: usize,
        #[case] expected: f64,
    ) {
        let matrix = matrix_with_counts(true_pos, false_neg, false_pos, true_neg);
        let kappa = score_kappa(&matrix);
        assert!(
            (kappa - expected).abs() < 5e-5,
            "kappa {} != {}",
            kappa,
            expected
        );
    }

    #[test]
    fn test_score_matrix() {
        let matrix = matrix_with_counts(3, 1, 2, 3);
        let score = score_matrix(&matrix);
        assert!((score.sens - 0.75).abs() < 1e-9);
        assert!((score.spec - 0.6).abs() < 1e-9);
        assert!((score.ppv - 0.6).abs() < 1e-9);
        assert!((score.npv - 0.75).abs() < 1e-9);
        assert!((score.f1 - 2.0 / 3.0).abs() < 1e-9);
        assert!((score.kappa - 0.341).abs() < 5e-4);
        assert_eq!(
            (score.true_pos, score.false_neg, score.false_pos, score.true_neg),
            (3, 1, 2, 3)
        );
        assert!(!score.is_degenerate());
    }

    #[rstest]
    #[case(0, 5, 5, 10)]
    #[case(10, 5, 5, 0)]
    #[case(0, 0, 0, 0)]
    fn test_degenerate_matrices_score_zero(
        #[case] true_pos: usize,
        #[case] false_neg: usize,
        #[case] false_pos: usize,
        #[case] true_neg: usize,
    ) {
        let score = score_matrix(&matrix_with_counts(true_pos, false_neg, false_pos, true_neg));
        assert_eq!(
            (score.f1, score.sens, score.spec, score.ppv, score.npv, score.kappa),
            (0.0, 0.0, 0.0, 0.0, 0.0, 0.0)
        );
        assert!(score.is_degenerate());
    }

    #[test]
    fn test_append_matrix() {
        let first = matrix_with_counts(1, 0, 2, 0);
        let second = matrix_with_counts(2, 1, 0, 3);
        let joined = append_matrix(&first, &second);
        assert_eq!(joined.true_pos.len(), 3);
        assert_eq!(joined.false_neg.len(), 1);
        assert_eq!(joined.false_pos.len(), 2);
        assert_eq!(joined.true_neg.len(), 3);
    }

    #[test]
    fn test_true_prevalence() {
        let adjusted = true_prevalence(0.5, 0.9, 0.8);
        assert!((adjusted - (0.5 + 0.8 - 1.0) / (0.9 + 0.8 - 1.0)).abs() < 1e-9);
    }
}
