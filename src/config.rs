/*!
Typed project configuration.

Project files are small YAML (or JSON, which the YAML parser also accepts)
documents naming the class labels, the annotators, their note ranges, the
implied/grouped label rules and the notes to ignore. The loose scalar-or-list
tree is validated once, here, into explicit structures; nothing downstream
ever touches a dynamic value again.

```yaml
labels: [Cough, Fever]
annotators:
  alice: 3
  bob: 7
ranges:
  alice: [1-40, 45]
  bob: alice
implied-labels:
  Cough|severity: Cough
grouped-labels:
  Respiratory: [Cough, Dyspnea]
ignore:
  - 3
  - Encounter/xyz
```
*/
use crate::labels::{
    AnnotatorMap, GroupedLabels, ImpliedLabels, Label, LabelError, LabelMatcher, LabelSet,
};
use crate::ranges::{IgnoreEntry, RangeExpr};
use ahash::HashMap as AHashMap;
use either::Either;
use serde_yaml::{Mapping, Value};
use std::error::Error;
use std::fmt::{self, Display};

/// Errors raised while validating a project configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The document is not valid YAML/JSON.
    Parse(serde_yaml::Error),
    /// The document is not a mapping at the top level.
    NotAMapping,
    /// A label in the config is malformed.
    Label(LabelError),
    /// A config entry has an unexpected shape.
    InvalidEntry { key: String, detail: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "Config file could not be parsed: {}", err),
            Self::NotAMapping => write!(f, "Config file is not in the expected mapping format"),
            Self::Label(err) => Display::fmt(err, f),
            Self::InvalidEntry { key, detail } => {
                write!(f, "Did not understand config entry '{}': {}", key, detail)
            }
        }
    }
}
impl Error for ConfigError {}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Parse(err)
    }
}

impl From<LabelError> for ConfigError {
    fn from(err: LabelError) -> Self {
        Self::Label(err)
    }
}

/// A fully validated project configuration. All the knobs the agreement
/// engine needs travel in this value; there is no ambient or global state.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    /// The valid label universe. Empty means "use every label the export
    /// mentions".
    pub class_labels: LabelSet,
    /// Annotator identifier (as stored in the export) to human name. Configs
    /// spell this the other way around (`name: id`) because that reads
    /// better; it is reversed here.
    pub annotators: AnnotatorMap,
    /// External annotator name to the CSV file holding its labels, to be
    /// injected by the caller before building a cohort.
    pub external_annotations: AHashMap<String, String>,
    /// Named note ranges, annotator names among them.
    pub note_ranges: AHashMap<String, RangeExpr>,
    pub implied_labels: ImpliedLabels,
    /// Kept in document order, which is significant when group matchers
    /// overlap.
    pub grouped_labels: GroupedLabels,
    /// Notes to drop from the whole project, possibly spelled as external
    /// resource references.
    pub ignore: Vec<IgnoreEntry>,
}

impl ProjectConfig {
    /// Parses and validates a project configuration document.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let document: Value = serde_yaml::from_str(text)?;
        if document.is_null() {
            return Ok(Self::default());
        }
        let mapping = document.as_mapping().ok_or(ConfigError::NotAMapping)?;

        let mut config = Self::default();
        config.parse_labels(mapping)?;
        config.parse_annotators(mapping)?;
        config.parse_ranges(mapping)?;
        config.parse_implied_labels(mapping)?;
        config.parse_grouped_labels(mapping)?;
        config.parse_ignore(mapping)?;
        Ok(config)
    }

    fn parse_labels(&mut self, mapping: &Mapping) -> Result<(), ConfigError> {
        for expression in string_items(mapping.get("labels"), "labels")? {
            self.class_labels.insert(Label::parse(&expression)?);
        }
        Ok(())
    }

    fn parse_annotators(&mut self, mapping: &Mapping) -> Result<(), ConfigError> {
        for (name, value) in mapping_items(mapping.get("annotators"), "annotators")? {
            match value {
                Value::Number(number) => match number.as_i64() {
                    // A real annotation layer in the export.
                    Some(id) => {
                        self.annotators.insert(id, name);
                    }
                    None => {
                        return Err(invalid("annotators", "annotator id is not an integer"));
                    }
                },
                // A fake/external annotation layer that the caller will
                // inject from a file.
                Value::Mapping(external) => {
                    let filename = external
                        .get("filename")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            invalid("annotators", "external annotator needs a filename")
                        })?;
                    self.external_annotations.insert(name, filename.to_owned());
                }
                _ => {
                    return Err(invalid(
                        "annotators",
                        "expected an annotator id or an external annotation mapping",
                    ));
                }
            }
        }
        Ok(())
    }

    fn parse_ranges(&mut self, mapping: &Mapping) -> Result<(), ConfigError> {
        for (name, value) in mapping_items(mapping.get("ranges"), "ranges")? {
            let expr = range_expr(&value, "ranges")?;
            self.note_ranges.insert(name, expr);
        }
        Ok(())
    }

    fn parse_implied_labels(&mut self, mapping: &Mapping) -> Result<(), ConfigError> {
        for (expression, value) in mapping_items(mapping.get("implied-labels"), "implied-labels")?
        {
            let mut implied = LabelSet::default();
            for item in string_items(Some(&value), "implied-labels")? {
                implied.insert(Label::parse(&item)?);
            }
            self.implied_labels
                .insert(LabelMatcher::new([expression]), implied);
        }
        Ok(())
    }

    fn parse_grouped_labels(&mut self, mapping: &Mapping) -> Result<(), ConfigError> {
        // Document order is preserved: later groups only see what earlier
        // groups left behind.
        for (name, value) in mapping_items(mapping.get("grouped-labels"), "grouped-labels")? {
            let group = Label::parse(&name)?;
            let members = string_items(Some(&value), "grouped-labels")?;
            self.grouped_labels.push((group, LabelMatcher::new(members)));
        }
        Ok(())
    }

    fn parse_ignore(&mut self, mapping: &Mapping) -> Result<(), ConfigError> {
        let Some(value) = mapping.get("ignore") else {
            return Ok(());
        };
        let items = value
            .as_sequence()
            .ok_or_else(|| invalid("ignore", "expected a list"))?;
        for item in items {
            match item {
                Value::Number(number) => match number.as_i64() {
                    Some(note_id) => self.ignore.push(Either::Left(note_id)),
                    None => return Err(invalid("ignore", "note id is not an integer")),
                },
                Value::String(external_id) => {
                    self.ignore.push(Either::Right(external_id.clone()));
                }
                _ => return Err(invalid("ignore", "expected a note id or an external id")),
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidEntry {
        key: key.to_owned(),
        detail: detail.to_owned(),
    }
}

/// Renders a scalar config value as a string. Numbers are accepted because
/// YAML happily parses unquoted labels like `102` as integers.
fn value_to_string(value: &Value, key: &str) -> Result<String, ConfigError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        _ => Err(invalid(key, "expected a string")),
    }
}

/// Coerces a missing, scalar or list value into a list of strings.
fn string_items(value: Option<&Value>, key: &str) -> Result<Vec<String>, ConfigError> {
    match value {
        None | Some(Value::Null) => Ok(vec![]),
        Some(Value::Sequence(items)) => {
            items.iter().map(|item| value_to_string(item, key)).collect()
        }
        Some(scalar) => Ok(vec![value_to_string(scalar, key)?]),
    }
}

/// Iterates a mapping-valued config entry as owned `(name, value)` pairs, in
/// document order.
fn mapping_items(
    value: Option<&Value>,
    key: &str,
) -> Result<Vec<(String, Value)>, ConfigError> {
    match value {
        None | Some(Value::Null) => Ok(vec![]),
        Some(Value::Mapping(mapping)) => mapping
            .iter()
            .map(|(name, value)| Ok((value_to_string(name, key)?, value.clone())))
            .collect(),
        Some(_) => Err(invalid(key, "expected a mapping")),
    }
}

fn range_expr(value: &Value, key: &str) -> Result<RangeExpr, ConfigError> {
    match value {
        Value::Number(number) => match number.as_i64() {
            Some(note_id) => Ok(RangeExpr::Note(note_id)),
            None => Err(invalid(key, "note id is not an integer")),
        },
        Value::String(text) => Ok(RangeExpr::parse_scalar(text)),
        Value::Sequence(items) => {
            let parsed: Result<Vec<RangeExpr>, ConfigError> =
                items.iter().map(|item| range_expr(item, key)).collect();
            Ok(RangeExpr::Many(parsed?))
        }
        _ => Err(invalid(key, "expected a note id, range string or list")),
    }
}
