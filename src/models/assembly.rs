//! Assembly and test identity models
//!
//! Defines assemblies, execution modes, test descriptors and the
//! descriptor catalog the collector resolves test ids against.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;

/// Identifier of a test assembly (path or logical name)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssemblyDescriptor(String);

impl AssemblyDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Resolve a relative path against the given base directory.
    /// Rooted paths and logical names with a root are left untouched.
    pub fn resolve_against(self, base: &Path) -> Self {
        let path = Path::new(&self.0);
        if path.is_absolute() {
            self
        } else {
            Self(base.join(path).to_string_lossy().into_owned())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssemblyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssemblyDescriptor {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// How an assembly is scheduled
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Parallel => write!(f, "parallel"),
        }
    }
}

/// Stable identity of a single test case
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestDescriptor {
    /// Framework-level unique name, the lookup key
    pub unique_name: String,
    pub display_name: String,
    pub fully_qualified_name: String,
    /// Assembly the test lives in
    pub source: AssemblyDescriptor,
}

impl TestDescriptor {
    #[cfg(test)]
    pub fn new(
        unique_name: impl Into<String>,
        fully_qualified_name: impl Into<String>,
        source: impl Into<AssemblyDescriptor>,
    ) -> Self {
        let fully_qualified_name = fully_qualified_name.into();
        let display_name = fully_qualified_name
            .rsplit('.')
            .next()
            .unwrap_or(&fully_qualified_name)
            .to_string();
        Self {
            unique_name: unique_name.into(),
            display_name,
            fully_qualified_name,
            source: source.into(),
        }
    }

}

impl From<String> for AssemblyDescriptor {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for TestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fully_qualified_name)
    }
}

/// Lookup table of registered test descriptors keyed by unique name
#[derive(Clone, Debug, Default)]
pub struct TestCatalog {
    tests: HashMap<String, TestDescriptor>,
}

impl TestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from a JSON array of descriptors
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read catalog {}", path.as_ref().display()))?;
        let tests: Vec<TestDescriptor> =
            serde_json::from_str(&content).context("Failed to parse test catalog")?;
        Ok(tests.into_iter().collect())
    }

    pub fn insert(&mut self, test: TestDescriptor) {
        self.tests.insert(test.unique_name.clone(), test);
    }

    pub fn resolve(&self, unique_name: &str) -> Option<&TestDescriptor> {
        self.tests.get(unique_name)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Pick the descriptors for the given ids, silently skipping unknown ones
    pub fn select<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Vec<TestDescriptor> {
        ids.into_iter()
            .filter_map(|id| self.resolve(id).cloned())
            .collect()
    }
}

impl FromIterator<TestDescriptor> for TestCatalog {
    fn from_iter<I: IntoIterator<Item = TestDescriptor>>(iter: I) -> Self {
        let mut catalog = TestCatalog::new();
        for test in iter {
            catalog.insert(test);
        }
        catalog
    }
}

/// Explicit test selection handed to a runner
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestFilter {
    names: HashSet<String>,
}

impl TestFilter {
    #[cfg(test)]
    pub fn contains(&self, unique_name: &str) -> bool {
        self.names.contains(unique_name)
    }

    /// Names in sorted order, for passing to external runners
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<'a> FromIterator<&'a TestDescriptor> for TestFilter {
    fn from_iter<I: IntoIterator<Item = &'a TestDescriptor>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(|t| t.unique_name.clone()).collect(),
        }
    }
}

/// Group a test selection by source assembly, preserving first-seen order
pub fn group_by_source(tests: &[TestDescriptor]) -> Vec<(AssemblyDescriptor, Vec<TestDescriptor>)> {
    let mut order: Vec<AssemblyDescriptor> = Vec::new();
    let mut groups: BTreeMap<AssemblyDescriptor, Vec<TestDescriptor>> = BTreeMap::new();

    for test in tests {
        groups
            .entry(test.source.clone())
            .or_insert_with(|| {
                order.push(test.source.clone());
                Vec::new()
            })
            .push(test.clone());
    }

    order
        .into_iter()
        .filter_map(|source| groups.remove(&source).map(|tests| (source, tests)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_resolve_relative_assembly() {
        let assembly = AssemblyDescriptor::new("bin/Foo.Tests.dll");
        let resolved = assembly.resolve_against(Path::new("/work"));
        assert_eq!(resolved.as_str(), "/work/bin/Foo.Tests.dll");
    }

    #[test]
    fn test_resolve_absolute_assembly() {
        let assembly = AssemblyDescriptor::new("/opt/Foo.Tests.dll");
        let resolved = assembly.clone().resolve_against(Path::new("/work"));
        assert_eq!(resolved, assembly);
    }

    #[test]
    fn test_descriptor_display_name() {
        let test = TestDescriptor::new("1-1001", "Foo.Tests.MathTests.Adds", "Foo.Tests.dll");
        assert_eq!(test.display_name, "Adds");
        assert_eq!(test.to_string(), "Foo.Tests.MathTests.Adds");
    }

    #[test]
    fn test_catalog_resolve() {
        let catalog: TestCatalog = vec![
            TestDescriptor::new("T1", "A.One", "A.dll"),
            TestDescriptor::new("T2", "A.Two", "A.dll"),
        ]
        .into_iter()
        .collect();

        assert_eq!(catalog.len(), 2);
        assert!(!catalog.is_empty());
        assert!(TestCatalog::new().is_empty());
        assert_eq!(catalog.resolve("T2").map(|t| t.display_name.as_str()), Some("Two"));
        assert!(catalog.resolve("T3").is_none());
        assert_eq!(catalog.select(["T1", "missing"]).len(), 1);
    }

    #[test]
    fn test_catalog_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"unique_name":"T1","display_name":"One","fully_qualified_name":"A.One","source":"A.dll"}}]"#
        )
        .unwrap();

        let catalog = TestCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.resolve("T1").unwrap().source.as_str(), "A.dll");
    }

    #[test]
    fn test_group_by_source_keeps_order() {
        let tests = vec![
            TestDescriptor::new("b1", "B.One", "B.dll"),
            TestDescriptor::new("a1", "A.One", "A.dll"),
            TestDescriptor::new("b2", "B.Two", "B.dll"),
        ];

        let groups = group_by_source(&tests);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.as_str(), "B.dll");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0.as_str(), "A.dll");
    }

    #[test]
    fn test_filter_from_descriptors() {
        let tests = vec![
            TestDescriptor::new("T2", "A.Two", "A.dll"),
            TestDescriptor::new("T1", "A.One", "A.dll"),
        ];
        let filter: TestFilter = tests.iter().collect();
        assert!(filter.contains("T1"));
        assert!(!filter.contains("T3"));
        assert_eq!(filter.names(), vec!["T1", "T2"]);
    }
}
