//! Course catalog and definition store
//!
//! The catalog is a YAML file mapping course ids to course scripts, with an
//! optional `ext_courses` include that merges another catalog file (later
//! keys override). A course script is an ordered YAML mapping of element id
//! to element spec; that order *is* the traversal order, so definitions
//! load into an insertion-ordered map.

use async_trait::async_trait;
use indexmap::IndexMap;
use sdk::errors::EngineError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::element::ElementSpec;

/// Catalog id reserved for the course started without an explicit id
pub const DEFAULT_COURSE_ID: &str = "default";

/// Catalog key whose entry is an include, not a course
const EXT_ID: &str = "ext_courses";

/// Where a course definition lives
///
/// Database-backed definitions arrive through the same trait but keep their
/// source marked: the reverse module walk is not implemented for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseSource {
    File,
    Database,
}

/// One loaded course: an ordered element-id → spec mapping
#[derive(Debug, Clone)]
pub struct CourseDefinition {
    pub course_id: String,
    pub source: CourseSource,

    /// Element to start from instead of the first, when the catalog says so
    pub start_element: Option<String>,

    elements: IndexMap<String, ElementSpec>,
}

impl CourseDefinition {
    pub fn new(
        course_id: impl Into<String>,
        source: CourseSource,
        elements: IndexMap<String, ElementSpec>,
    ) -> Self {
        Self {
            course_id: course_id.into(),
            source,
            start_element: None,
            elements,
        }
    }

    pub fn with_start(mut self, start_element: Option<String>) -> Self {
        self.start_element = start_element;
        self
    }

    pub fn get(&self, element_id: &str) -> Option<&ElementSpec> {
        self.elements.get(element_id)
    }

    /// The element the course starts from: the catalog override, or the
    /// first of the definition order
    pub fn start(&self) -> Result<(&str, &ElementSpec), EngineError> {
        if let Some(start) = &self.start_element {
            return self
                .elements
                .get_key_value(start.as_str())
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| {
                    EngineError::Definition(format!(
                        "start element '{}' not in course '{}'",
                        start, self.course_id
                    ))
                });
        }
        self.elements
            .first()
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| {
                EngineError::Definition(format!("course '{}' has no elements", self.course_id))
            })
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.elements.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ElementSpec)> {
        self.elements.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// One catalog entry
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    /// Course script path, relative to the catalog file, or "db" for a
    /// database-backed course
    pub path: String,

    /// Optional start-element override
    #[serde(default)]
    pub element: Option<String>,
}

/// The parsed catalog, includes merged
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: IndexMap<String, CatalogEntry>,
    base_dir: PathBuf,
}

impl Catalog {
    /// Load a catalog file, merging its `ext_courses` include if present
    ///
    /// Included entries override same-keyed ones, which allows even the
    /// default course to be swapped out.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();

        let contents = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read catalog {}: {}", path.display(), e))
        })?;
        let mut entries: IndexMap<String, CatalogEntry> = serde_yaml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse catalog: {}", e)))?;

        if let Some(ext) = entries.shift_remove(EXT_ID) {
            let ext_path = base_dir.join(&ext.path);
            let ext_contents = std::fs::read_to_string(&ext_path).map_err(|e| {
                EngineError::Config(format!(
                    "Failed to read extra catalog {}: {}",
                    ext_path.display(),
                    e
                ))
            })?;
            let ext_entries: IndexMap<String, CatalogEntry> = serde_yaml::from_str(&ext_contents)
                .map_err(|e| EngineError::Config(format!("Failed to parse extra catalog: {}", e)))?;

            info!(count = ext_entries.len(), "merging extra catalog entries");
            for (key, value) in ext_entries {
                entries.insert(key, value);
            }
        }

        Ok(Self { entries, base_dir })
    }

    pub fn get(&self, course_id: &str) -> Option<&CatalogEntry> {
        self.entries.get(course_id)
    }

    pub fn course_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Absolute path of a course script
    pub fn script_path(&self, entry: &CatalogEntry) -> PathBuf {
        self.base_dir.join(&entry.path)
    }
}

/// The course definition contract the engine consumes
#[async_trait]
pub trait CourseStore: Send + Sync {
    async fn load(&self, course_id: &str) -> Result<CourseDefinition, EngineError>;
}

/// File-backed course store driven by a catalog
pub struct FileCourseStore {
    catalog: Catalog,
}

impl FileCourseStore {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}

#[async_trait]
impl CourseStore for FileCourseStore {
    async fn load(&self, course_id: &str) -> Result<CourseDefinition, EngineError> {
        let entry = self.catalog.get(course_id).ok_or_else(|| {
            EngineError::NotFound(format!("course '{}' not in catalog", course_id))
        })?;

        if entry.path == "db" {
            return Err(EngineError::Unsupported(format!(
                "course '{}' is database-backed; no database store is configured",
                course_id
            )));
        }

        let path = self.catalog.script_path(entry);
        let definition = load_course_file(course_id, &path)?;
        Ok(definition.with_start(entry.element.clone()))
    }
}

/// Parse one course script file into an ordered definition
pub fn load_course_file(course_id: &str, path: &Path) -> Result<CourseDefinition, EngineError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        EngineError::Definition(format!(
            "Failed to read course script {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_course(course_id, &contents)
}

/// Parse course YAML; duplicate element ids are a definition error
pub fn parse_course(course_id: &str, yaml: &str) -> Result<CourseDefinition, EngineError> {
    let elements: IndexMap<String, ElementSpec> = serde_yaml::from_str(yaml)
        .map_err(|e| EngineError::Definition(format!("course '{}': {}", course_id, e)))?;

    if elements.is_empty() {
        return Err(EngineError::Definition(format!(
            "course '{}' has no elements",
            course_id
        )));
    }

    Ok(CourseDefinition::new(course_id, CourseSource::File, elements))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SAMPLE_COURSE: &str = "\
intro_0:
  type: message
  text: Welcome!
intro_1:
  type: quiz
  text: Ready?
  answers:
    - text: Yes
      correct: yes
    - text: No
e_end:
  type: end
";

    #[test]
    fn course_preserves_definition_order() {
        let course = parse_course("demo", SAMPLE_COURSE).unwrap();
        let ids: Vec<&str> = course.ids().collect();
        assert_eq!(ids, vec!["intro_0", "intro_1", "e_end"]);
        assert_eq!(course.start().unwrap().0, "intro_0");
    }

    #[test]
    fn start_override_wins() {
        let course = parse_course("demo", SAMPLE_COURSE)
            .unwrap()
            .with_start(Some("intro_1".to_string()));
        assert_eq!(course.start().unwrap().0, "intro_1");
    }

    #[test]
    fn missing_start_override_is_a_definition_error() {
        let course = parse_course("demo", SAMPLE_COURSE)
            .unwrap()
            .with_start(Some("nope".to_string()));
        assert!(course.start().is_err());
    }

    #[tokio::test]
    async fn catalog_resolves_and_loads_courses() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("demo.yml"), SAMPLE_COURSE).unwrap();
        fs::write(
            dir.path().join("courses.yml"),
            "default:\n  path: demo.yml\n  element: intro_1\n",
        )
        .unwrap();

        let catalog = Catalog::load(&dir.path().join("courses.yml")).unwrap();
        let store = FileCourseStore::new(catalog);

        let course = store.load("default").await.unwrap();
        assert_eq!(course.len(), 3);
        assert_eq!(course.start().unwrap().0, "intro_1");

        assert!(matches!(
            store.load("missing").await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn ext_courses_merge_overrides_existing_entries() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("demo.yml"), SAMPLE_COURSE).unwrap();
        fs::write(dir.path().join("other.yml"), SAMPLE_COURSE).unwrap();
        fs::write(
            dir.path().join("courses.yml"),
            "default:\n  path: demo.yml\next_courses:\n  path: extra.yml\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("extra.yml"),
            "default:\n  path: other.yml\nbonus:\n  path: other.yml\n",
        )
        .unwrap();

        let catalog = Catalog::load(&dir.path().join("courses.yml")).unwrap();
        assert_eq!(catalog.get("default").unwrap().path, "other.yml");
        assert!(catalog.get("bonus").is_some());
        assert!(catalog.get(EXT_ID).is_none());
    }

    #[tokio::test]
    async fn db_backed_courses_are_signaled_as_unsupported() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("courses.yml"), "remote:\n  path: db\n").unwrap();

        let catalog = Catalog::load(&dir.path().join("courses.yml")).unwrap();
        let store = FileCourseStore::new(catalog);
        assert!(matches!(
            store.load("remote").await,
            Err(EngineError::Unsupported(_))
        ));
    }
}
