/*!
Transforms applied to freshly parsed mentions before any agreement math runs:
implied-label expansion followed by grouped-label collapsing.

Both transforms are pure: they take a set of mentions and produce a new one.
[`simplify_mentions`] applies them in the only valid order (expansion reaches
its fixed point before any collapsing happens) and keeps the global label
universe in sync.
*/
use crate::labels::{GroupedLabels, ImpliedLabels, Label, LabelSet, Mentions, ProjectAnnotations};
use tracing::debug;

/// Expands the source label into the set of all implied labels.
///
/// The closure is reflexive (the source label is always a member) and
/// computed with a work list and a visited set, so it stays finite even when
/// the implication graph has a cycle: a label already in the closure is never
/// re-expanded.
pub fn find_implied_labels(source_label: &Label, implied_labels: &ImpliedLabels) -> LabelSet {
    let mut found = LabelSet::default();
    let mut pending = vec![source_label.clone()];

    while let Some(label) = pending.pop() {
        if !found.insert(label.clone()) {
            continue;
        }
        for (matcher, implied) in implied_labels {
            if matcher.is_match(&label) {
                for implied_label in implied {
                    if !found.contains(implied_label) {
                        pending.push(implied_label.clone());
                    }
                }
            }
        }
    }

    found
}

/// For every note, expands its labels into the set of all implied labels for
/// that note. Each label is expanded independently and the closures unioned.
pub fn find_implied_mentions(mentions: &Mentions, implied_labels: &ImpliedLabels) -> Mentions {
    mentions
        .iter()
        .map(|(note_id, labels)| {
            let mut expanded = LabelSet::default();
            for label in labels {
                expanded.extend(find_implied_labels(label, implied_labels));
            }
            (*note_id, expanded)
        })
        .collect()
}

/// For every note, converts all labels in a group into one label for the
/// group name.
///
/// This is a single pass, explicitly not recursive: a group label added here
/// is never fed back into another group's matcher through its own group.
/// Groups are processed in their declared order, so when matchers overlap a
/// later group only sees the labels left behind by the earlier ones.
pub fn convert_grouped_mentions(mentions: &Mentions, grouped_labels: &GroupedLabels) -> Mentions {
    mentions
        .iter()
        .map(|(note_id, labels)| {
            let mut labels = labels.clone();
            for (group_label, matcher) in grouped_labels {
                let matched = matcher.matches_in_set(&labels);
                if !matched.is_empty() {
                    for label in &matched {
                        labels.remove(label);
                    }
                    labels.insert(group_label.clone());
                }
            }
            (*note_id, labels)
        })
        .collect()
}

/// Applies implied-label expansion and then grouped-label collapsing to every
/// annotator's mentions, updating the global label universe to match: group
/// labels are added and every label matched by any group matcher is removed.
pub fn simplify_mentions(
    annotations: &mut ProjectAnnotations,
    implied_labels: &ImpliedLabels,
    grouped_labels: &GroupedLabels,
) {
    // ** Expand all implied labels.
    for mentions in annotations.mentions.values_mut() {
        *mentions = find_implied_mentions(mentions, implied_labels);
    }

    // ** Convert all grouped labels.
    // First, calculate the new set of valid labels, adding the groups and
    // removing the groupees.
    annotations
        .labels
        .extend(grouped_labels.iter().map(|(group, _)| group.clone()));
    let grouped_away: LabelSet = grouped_labels
        .iter()
        .flat_map(|(_, matcher)| matcher.matches_in_set(&annotations.labels))
        .collect();
    for label in &grouped_away {
        annotations.labels.remove(label);
    }
    // Next, convert old labels to the new group labels.
    for mentions in annotations.mentions.values_mut() {
        *mentions = convert_grouped_mentions(mentions, grouped_labels);
    }

    debug!(
        labels = annotations.labels.len(),
        annotators = annotations.mentions.len(),
        "simplified mentions"
    );
}
