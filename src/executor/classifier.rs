//! Assembly classification
//!
//! Decides whether an assembly runs in the parallel or sequential phase:
//! name patterns first, assembly metadata second, sequential otherwise.
//! Pattern matching comes first so the common case never reads metadata.

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::RunSettings;
use crate::models::{AssemblyDescriptor, ExecutionMode};
use crate::sink::HostLogger;

/// Case-insensitive, whole-string glob (`*` any run, `?` one character)
#[derive(Clone, Debug)]
pub struct GlobPattern {
    pattern: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let escaped = regex::escape(pattern)
            .replace(r"\*", ".*")
            .replace(r"\?", ".");
        let regex = RegexBuilder::new(&format!("^{escaped}$"))
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
            .with_context(|| format!("Invalid assembly name pattern: {pattern}"))?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

/// Static assembly metadata, read without executing any assembly code
pub trait MetadataReader: Send + Sync {
    /// Textual form of every custom attribute declared on the assembly
    fn custom_attributes(&self, assembly: &AssemblyDescriptor) -> Result<Vec<String>>;

    /// First attribute whose text contains `name`
    fn find_marker_attribute(
        &self,
        assembly: &AssemblyDescriptor,
        name: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .custom_attributes(assembly)?
            .into_iter()
            .find(|attribute| attribute.contains(name)))
    }
}

/// Reads attributes from a `<assembly>.meta.json` sidecar file.
/// A missing sidecar means the assembly declares no attributes.
#[derive(Clone, Debug, Default)]
pub struct SidecarMetadataReader;

#[derive(Debug, Deserialize)]
struct Sidecar {
    #[serde(default)]
    attributes: Vec<String>,
}

impl SidecarMetadataReader {
    pub fn sidecar_path(assembly: &AssemblyDescriptor) -> PathBuf {
        PathBuf::from(format!("{assembly}.meta.json"))
    }
}

impl MetadataReader for SidecarMetadataReader {
    fn custom_attributes(&self, assembly: &AssemblyDescriptor) -> Result<Vec<String>> {
        let path = Self::sidecar_path(assembly);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read metadata {}", path.display()))?;
        let sidecar: Sidecar = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse metadata {}", path.display()))?;
        Ok(sidecar.attributes)
    }
}

/// Why an assembly landed in its phase
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassificationReason {
    ParallelDisabled,
    NamePattern(String),
    MarkerAttribute(String),
    NotMarked,
    MetadataUnavailable(String),
}

impl fmt::Display for ClassificationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationReason::ParallelDisabled => write!(f, "parallel execution disabled"),
            ClassificationReason::NamePattern(p) => write!(f, "name pattern '{p}'"),
            ClassificationReason::MarkerAttribute(a) => write!(f, "assembly attribute '{a}'"),
            ClassificationReason::NotMarked => write!(f, "not marked"),
            ClassificationReason::MetadataUnavailable(e) => write!(f, "metadata unavailable: {e}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub mode: ExecutionMode,
    pub reason: ClassificationReason,
}

impl Classification {
    fn sequential(reason: ClassificationReason) -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            reason,
        }
    }

    fn parallel(reason: ClassificationReason) -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            reason,
        }
    }
}

pub struct Classifier {
    enabled: bool,
    patterns: Vec<GlobPattern>,
    marker_attribute: String,
    metadata: Arc<dyn MetadataReader>,
}

impl Classifier {
    pub fn new(settings: &RunSettings, metadata: Arc<dyn MetadataReader>) -> Result<Self> {
        let patterns = settings
            .parallelize_assemblies_names
            .iter()
            .map(|p| GlobPattern::new(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            enabled: settings.parallelize_assemblies,
            patterns,
            marker_attribute: settings.parallelize_assemblies_marker_attribute.clone(),
            metadata,
        })
    }

    /// Classify one assembly, logging the decision to the host
    pub fn classify(&self, assembly: &AssemblyDescriptor, logger: &HostLogger) -> Classification {
        if !self.enabled {
            return Classification::sequential(ClassificationReason::ParallelDisabled);
        }

        if let Some(pattern) = self.patterns.iter().find(|p| p.is_match(assembly.as_str())) {
            logger.info(format!(
                "Assembly '{}' marked for parallel testing (by name pattern match '{}').",
                assembly,
                pattern.as_str()
            ));
            return Classification::parallel(ClassificationReason::NamePattern(
                pattern.as_str().to_string(),
            ));
        }

        match self
            .metadata
            .find_marker_attribute(assembly, &self.marker_attribute)
        {
            Ok(Some(attribute)) => {
                logger.info(format!(
                    "Assembly '{assembly}' marked for parallel testing (by assembly attribute match '{attribute}')."
                ));
                Classification::parallel(ClassificationReason::MarkerAttribute(attribute))
            }
            Ok(None) => {
                logger.info(format!(
                    "Assembly '{assembly}' marked for sequential testing."
                ));
                Classification::sequential(ClassificationReason::NotMarked)
            }
            Err(e) => {
                logger.error(format!(
                    "Failed to read metadata of assembly '{assembly}', running it sequentially: {e:#}"
                ));
                Classification::sequential(ClassificationReason::MetadataUnavailable(format!(
                    "{e:#}"
                )))
            }
        }
    }

    /// Split assemblies into (parallel, sequential), keeping input order
    pub fn partition(
        &self,
        assemblies: Vec<AssemblyDescriptor>,
        logger: &HostLogger,
    ) -> (Vec<AssemblyDescriptor>, Vec<AssemblyDescriptor>) {
        assemblies
            .into_iter()
            .partition(|assembly| self.classify(assembly, logger).mode == ExecutionMode::Parallel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{RecordingSink, StaticMetadata};
    use crate::sink::MessageLevel;

    fn logger() -> (HostLogger, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (HostLogger::new(sink.clone(), 0), sink)
    }

    fn classifier(patterns: &[&str], metadata: StaticMetadata) -> Classifier {
        let settings = RunSettings::default()
            .with_parallel(true)
            .with_patterns(patterns.iter().copied());
        Classifier::new(&settings, Arc::new(metadata)).unwrap()
    }

    #[test]
    fn test_glob_matching() {
        let glob = GlobPattern::new("*.Tests.dll").unwrap();
        assert!(glob.is_match("Foo.Tests.dll"));
        assert!(glob.is_match("/bin/foo.tests.DLL"));
        assert!(!glob.is_match("Foo.Tests.dll.config"));
        assert!(!glob.is_match("FooXTests.dll"));

        let single = GlobPattern::new("Unit?.dll").unwrap();
        assert!(single.is_match("Unit1.dll"));
        assert!(!single.is_match("Unit12.dll"));

        let literal = GlobPattern::new("a+b(c).dll").unwrap();
        assert!(literal.is_match("A+B(C).dll"));
        assert!(!literal.is_match("aab(c).dll"));
    }

    #[test]
    fn test_pattern_match_is_parallel() {
        let (logger, sink) = logger();
        let classifier = classifier(&["*.Tests.dll"], StaticMetadata::default());

        let result = classifier.classify(&"Foo.Tests.dll".into(), &logger);
        assert_eq!(result.mode, ExecutionMode::Parallel);
        assert_eq!(
            result.reason,
            ClassificationReason::NamePattern("*.Tests.dll".to_string())
        );
        assert!(sink.messages()[0].1.contains("by name pattern match '*.Tests.dll'"));
    }

    #[test]
    fn test_pattern_match_skips_metadata() {
        let (logger, _) = logger();
        let metadata = StaticMetadata::default().failing("Foo.Tests.dll");
        let classifier = classifier(&["*.tests.dll"], metadata);

        let result = classifier.classify(&"Foo.Tests.dll".into(), &logger);
        assert_eq!(result.mode, ExecutionMode::Parallel);
    }

    #[test]
    fn test_marker_attribute_is_parallel() {
        let (logger, _) = logger();
        let metadata = StaticMetadata::default().with_attributes(
            "Core.dll",
            &["[AssemblyTitle(\"Core\")]", "[AssemblyParallelizeAttribute()]"],
        );
        let classifier = classifier(&["*.Tests.dll"], metadata);

        let result = classifier.classify(&"Core.dll".into(), &logger);
        assert_eq!(result.mode, ExecutionMode::Parallel);
        assert_eq!(
            result.reason,
            ClassificationReason::MarkerAttribute("[AssemblyParallelizeAttribute()]".to_string())
        );
    }

    #[test]
    fn test_unmarked_is_sequential() {
        let (logger, sink) = logger();
        let classifier = classifier(&["*.Tests.dll"], StaticMetadata::default());

        let result = classifier.classify(&"Core.dll".into(), &logger);
        assert_eq!(result.mode, ExecutionMode::Sequential);
        assert_eq!(result.reason, ClassificationReason::NotMarked);
        assert_eq!(
            sink.messages(),
            vec![(
                MessageLevel::Informational,
                "Assembly 'Core.dll' marked for sequential testing.".to_string()
            )]
        );
    }

    #[test]
    fn test_disabled_is_always_sequential() {
        let (logger, sink) = logger();
        let settings = RunSettings::default().with_patterns(["*"]);
        let classifier = Classifier::new(&settings, Arc::new(StaticMetadata::default())).unwrap();

        let result = classifier.classify(&"Foo.Tests.dll".into(), &logger);
        assert_eq!(result.mode, ExecutionMode::Sequential);
        assert_eq!(result.reason, ClassificationReason::ParallelDisabled);
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn test_metadata_failure_falls_back_to_sequential() {
        let (logger, sink) = logger();
        let classifier = classifier(&[], StaticMetadata::default().failing("Broken.dll"));

        let result = classifier.classify(&"Broken.dll".into(), &logger);
        assert_eq!(result.mode, ExecutionMode::Sequential);
        assert!(matches!(
            result.reason,
            ClassificationReason::MetadataUnavailable(_)
        ));
        assert_eq!(sink.messages()[0].0, MessageLevel::Error);
    }

    #[test]
    fn test_partition_keeps_order() {
        let (logger, _) = logger();
        let classifier = classifier(&["*.Tests.dll"], StaticMetadata::default());

        let (parallel, sequential) = classifier.partition(
            vec!["A.Tests.dll".into(), "B.dll".into(), "C.Tests.dll".into()],
            &logger,
        );
        assert_eq!(
            parallel,
            vec![
                AssemblyDescriptor::new("A.Tests.dll"),
                AssemblyDescriptor::new("C.Tests.dll")
            ]
        );
        assert_eq!(sequential, vec![AssemblyDescriptor::new("B.dll")]);
    }

    #[test]
    fn test_sidecar_reader() {
        let dir = tempfile::tempdir().unwrap();
        let assembly = AssemblyDescriptor::new(dir.path().join("Core.dll").to_string_lossy());
        let reader = SidecarMetadataReader;

        assert!(reader.custom_attributes(&assembly).unwrap().is_empty());

        std::fs::write(
            SidecarMetadataReader::sidecar_path(&assembly),
            r#"{"attributes": ["[AssemblyParallelize]"]}"#,
        )
        .unwrap();
        assert_eq!(
            reader
                .find_marker_attribute(&assembly, "AssemblyParallelize")
                .unwrap(),
            Some("[AssemblyParallelize]".to_string())
        );
    }
}
