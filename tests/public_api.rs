use chart_agree::{
    mcnemar_from_table, score_annotator, Cohort, ExportMetadata, Label, LabelSet, NoteSet,
    ProjectAnnotations, ProjectConfig,
};

fn close(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-9
}

fn labels(expressions: &[&str]) -> LabelSet {
    expressions
        .iter()
        .map(|e| Label::parse(e).unwrap())
        .collect()
}

#[test]
fn accuracy_pipeline_from_config_to_scores() {
    let config = ProjectConfig::parse(
        "
labels: [Cough, Fever, Infection]
annotators:
  alice: 0
  bob: 1
ranges:
  alice: 1-4
  bob: alice
implied-labels:
  Cough|severity: Cough
grouped-labels:
  Infection: [Influenza, Covid]
ignore: [4]
",
    )
    .unwrap();

    let mut annotations = ProjectAnnotations::default();
    annotations.labels = labels(&["Cough", "Fever", "Influenza", "Covid"]);
    annotations.mentions.insert(
        String::from("alice"),
        [
            (1, labels(&["Cough|severity|mild", "Influenza"])),
            (2, labels(&["Fever"])),
            (3, labels(&["Covid"])),
            (4, labels(&["Fever"])),
        ]
        .into_iter()
        .collect(),
    );
    annotations.mentions.insert(
        String::from("bob"),
        [
            (1, labels(&["Cough", "Influenza"])),
            (2, labels(&["Fever", "Covid"])),
            (4, labels(&["Cough"])),
        ]
        .into_iter()
        .collect(),
    );

    let cohort = Cohort::new(annotations, &config, &ExportMetadata::from_note_ids(1..=4));

    // The configured label list wins over the detected one, and simplifying
    // never resurrects the grouped-away labels.
    assert_eq!(cohort.class_labels(), &labels(&["Cough", "Fever", "Infection"]));

    // Note 4 is ignored; both configured ranges cover what is left of 1-4.
    assert_eq!(cohort.ignored_notes(), &NoteSet::from_iter([4]));
    assert_eq!(cohort.note_range("alice"), Some(&NoteSet::from_iter([1, 2, 3])));
    assert_eq!(cohort.note_range("bob"), Some(&NoteSet::from_iter([1, 2, 3])));

    // Per note and label, with alice as truth:
    //   note 1: Cough TP (via the severity sublabel), Fever TN,
    //           Infection TP (both Influenzas collapsed)
    //   note 2: Cough TN, Fever TP, Infection FP (bob's Covid collapsed)
    //   note 3: Cough TN, Fever TN, Infection FN (bob never opened note 3)
    let range = NoteSet::from_iter([1, 2, 3]);
    let matrix = cohort.confusion_matrix("alice", "bob", &range, None);
    assert_eq!(matrix.true_pos.len(), 3);
    assert_eq!(matrix.false_neg.len(), 1);
    assert_eq!(matrix.false_pos.len(), 1);
    assert_eq!(matrix.true_neg.len(), 4);

    let score = score_annotator(&cohort, "alice", "bob", None);
    assert!(close(score.f1, 0.75));
    assert!(close(score.sens, 0.75));
    assert!(close(score.spec, 0.8));
    assert!(close(score.ppv, 0.75));
    assert!(close(score.npv, 0.8));
    assert!(close(score.kappa, 0.55));
    assert!(!score.is_degenerate());

    // Scoring a single label narrows the universe to it: Fever alone is
    // three clean calls out of three notes.
    let fever = Label::parse("Fever").unwrap();
    let fever_score = score_annotator(&cohort, "alice", "bob", Some(&fever));
    assert!(close(fever_score.f1, 1.0));
}

#[test]
fn contingency_table_feeds_mcnemar() {
    let mut annotations = ProjectAnnotations::default();
    annotations.labels = labels(&["A", "B"]);
    annotations.mentions.insert(
        String::from("alice"),
        [(1, labels(&["A"])), (2, labels(&["B"]))].into_iter().collect(),
    );
    annotations.mentions.insert(
        String::from("bob"),
        [(1, labels(&["A"]))].into_iter().collect(),
    );
    annotations.mentions.insert(
        String::from("carla"),
        [(2, labels(&["B"]))].into_iter().collect(),
    );

    let cohort = Cohort::new(
        annotations,
        &ProjectConfig::default(),
        &ExportMetadata::from_note_ids(1..=2),
    );

    let range = NoteSet::from_iter([1, 2]);
    let table = cohort.contingency_table("alice", "bob", "carla", &range, None);
    assert_eq!(table.both_correct.len(), 2);
    assert_eq!(table.only_first.len(), 1);
    assert_eq!(table.only_second.len(), 1);
    assert_eq!(table.both_wrong.len(), 0);

    // One disagreement each way: the exact test finds no difference at all.
    let result = mcnemar_from_table(&table, true);
    assert_eq!(result.statistic, None);
    assert!(close(result.p_value, 1.0));
}
