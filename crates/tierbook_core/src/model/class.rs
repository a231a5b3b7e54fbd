//! Per-class tier descriptors and the default hierarchy.

use crate::meta::{AttrDescriptor, LogicalType, MetaError, SchemaHandle, SchemaRegistry, Visibility};
use crate::model::tier::TierKind;
use once_cell::sync::OnceCell;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Placeholder in a name part template, replaced by the tier id.
pub const ID_PLACEHOLDER: &str = "{}";

/// Errors from class construction and schema connection.
#[derive(Debug)]
pub enum ClassError {
    /// The child id pattern is not a valid regular expression.
    InvalidIdPattern { pattern: String, source: regex::Error },
    /// The class is already connected to a schema registry.
    SchemaAlreadyConnected(String),
    /// Attribute declaration failed while building a default schema.
    Meta(MetaError),
}

impl Display for ClassError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdPattern { pattern, source } => {
                write!(f, "invalid id pattern `{pattern}`: {source}")
            }
            Self::SchemaAlreadyConnected(name) => {
                write!(f, "class `{name}` is already connected to a schema registry")
            }
            Self::Meta(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ClassError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidIdPattern { source, .. } => Some(source),
            Self::Meta(err) => Some(err),
            Self::SchemaAlreadyConnected(_) => None,
        }
    }
}

impl From<MetaError> for ClassError {
    fn from(value: MetaError) -> Self {
        Self::Meta(value)
    }
}

/// Descriptor for one depth of the hierarchy.
///
/// Holds the naming rules for children of this class and, for content-bearing
/// classes, the available content templates and the metadata schema.
#[derive(Debug)]
pub struct TierClass {
    pretty_type: String,
    kind: TierKind,
    id_regex: String,
    id_pattern: Regex,
    name_part_template: String,
    templates: Vec<String>,
    schema: OnceCell<SchemaHandle>,
}

impl TierClass {
    /// Creates a class descriptor.
    ///
    /// `id_regex` is the unanchored pattern a child id of this class must
    /// satisfy; `name_part_template` turns an id into the class's contribution
    /// to the display name (e.g. `WP{}`).
    pub fn new(
        pretty_type: impl Into<String>,
        kind: TierKind,
        id_regex: impl Into<String>,
        name_part_template: impl Into<String>,
    ) -> Result<Self, ClassError> {
        let id_regex = id_regex.into();
        let id_pattern =
            Regex::new(&format!("^(?:{id_regex})$")).map_err(|source| ClassError::InvalidIdPattern {
                pattern: id_regex.clone(),
                source,
            })?;
        Ok(Self {
            pretty_type: pretty_type.into(),
            kind,
            id_regex,
            id_pattern,
            name_part_template: name_part_template.into(),
            templates: Vec::new(),
            schema: OnceCell::new(),
        })
    }

    /// Declares the content templates available for new tiers of this class.
    pub fn with_templates<I, S>(mut self, templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.templates = templates.into_iter().map(Into::into).collect();
        self
    }

    /// Connects this class to its schema registry.
    ///
    /// A class connects at most once; the same handle may be shared across
    /// cooperating classes.
    pub fn connect_schema(&self, handle: SchemaHandle) -> Result<(), ClassError> {
        self.schema
            .set(handle)
            .map_err(|_| ClassError::SchemaAlreadyConnected(self.pretty_type.clone()))
    }

    /// Convenience for the up-front registration style.
    pub fn with_schema(self, registry: SchemaRegistry) -> Result<Self, ClassError> {
        self.connect_schema(registry.into_handle())?;
        Ok(self)
    }

    pub fn pretty_type(&self) -> &str {
        &self.pretty_type
    }

    pub fn kind(&self) -> TierKind {
        self.kind
    }

    pub fn id_regex(&self) -> &str {
        &self.id_regex
    }

    pub fn name_part_template(&self) -> &str {
        &self.name_part_template
    }

    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    pub fn schema(&self) -> Option<&SchemaHandle> {
        self.schema.get()
    }

    /// Whether `segment` is an acceptable child id for this class.
    pub fn matches_id(&self, segment: &str) -> bool {
        self.id_pattern.is_match(segment)
    }

    /// Renders this class's contribution to a display name.
    pub fn name_part(&self, id: &str) -> String {
        self.name_part_template.replacen(ID_PLACEHOLDER, id, 1)
    }

    /// This class's contribution to a name-parsing pattern: the template with
    /// literals escaped and the placeholder replaced by a capture group.
    pub fn name_part_pattern(&self) -> String {
        match self.name_part_template.split_once(ID_PLACEHOLDER) {
            Some((before, after)) => format!(
                "{}({}){}",
                regex::escape(before),
                self.id_regex,
                regex::escape(after)
            ),
            None => regex::escape(&self.name_part_template),
        }
    }
}

fn notebook_schema() -> Result<SchemaRegistry, MetaError> {
    let mut registry = SchemaRegistry::new();
    registry.register(
        "started",
        AttrDescriptor::new("Started", LogicalType::DateTime, Visibility::Core),
    )?;
    registry.register(
        "description",
        AttrDescriptor::new("Description", LogicalType::Str, Visibility::Core),
    )?;
    registry.register(
        "conclusion",
        AttrDescriptor::new("Conclusion", LogicalType::Str, Visibility::Core),
    )?;
    Ok(registry)
}

/// The stock research hierarchy: Home -> WorkPackage -> Experiment -> Sample
/// -> Dataset.
///
/// WorkPackage, Experiment and Sample are content-bearing; Dataset is a plain
/// folder and, being last, has no child class.
pub fn default_hierarchy() -> Result<Vec<TierClass>, ClassError> {
    let home = TierClass::new("Home", TierKind::Container, "", "Home")?;
    let work_package = TierClass::new("WorkPackage", TierKind::ContentBearing, r"\d+", "WP{}")?
        .with_templates(["WorkPackage.ipynb"])
        .with_schema(notebook_schema()?)?;
    let experiment = TierClass::new("Experiment", TierKind::ContentBearing, r"\d+", ".{}")?
        .with_templates(["Experiment.ipynb"])
        .with_schema(notebook_schema()?)?;
    let sample = TierClass::new(
        "Sample",
        TierKind::ContentBearing,
        r"[a-zA-Z][a-zA-Z0-9]*",
        "{}",
    )?
    .with_templates(["Sample.ipynb"])
    .with_schema(notebook_schema()?)?;
    let dataset = TierClass::new("Dataset", TierKind::Container, r"[a-zA-Z0-9]+", "-{}")?;
    Ok(vec![home, work_package, experiment, sample, dataset])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_parts_render_from_templates() {
        let classes = default_hierarchy().unwrap();
        assert_eq!(classes[1].name_part("1"), "WP1");
        assert_eq!(classes[2].name_part("3"), ".3");
        assert_eq!(classes[3].name_part("a"), "a");
    }

    #[test]
    fn id_patterns_are_anchored() {
        let classes = default_hierarchy().unwrap();
        assert!(classes[1].matches_id("12"));
        assert!(!classes[1].matches_id("12a"));
        assert!(!classes[1].matches_id(""));
    }

    #[test]
    fn name_part_pattern_escapes_literals() {
        let classes = default_hierarchy().unwrap();
        assert_eq!(classes[2].name_part_pattern(), r"\.(\d+)");
    }

    #[test]
    fn schema_connects_at_most_once() {
        let class = TierClass::new("Spare", TierKind::ContentBearing, r"\d+", "S{}").unwrap();
        class
            .connect_schema(SchemaRegistry::new().into_handle())
            .unwrap();
        let err = class
            .connect_schema(SchemaRegistry::new().into_handle())
            .unwrap_err();
        assert!(matches!(err, ClassError::SchemaAlreadyConnected(name) if name == "Spare"));
    }
}
