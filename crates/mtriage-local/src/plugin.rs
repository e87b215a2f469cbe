//! Selector wrapper for local folder import

use crate::{entry_files, scan_files, scan_source, LocalConfig, AGGREGATE_MARKER};
use mtriage_core::config::parse_config;
use mtriage_core::{
    ArgSpec, ConfigError, ElementContext, ElementError, ElementIndex, Etype, IndexRow,
    LocalElement, ModuleConfig, ModuleManifest, PhaseContext, Registry, Selector,
};
use std::path::PathBuf;
use tracing::debug;

pub const NAME: &str = "Local";

pub struct LocalSelector {
    config: LocalConfig,
}

impl LocalSelector {
    pub fn new(config: LocalConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &ModuleConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(parse_config(NAME, config)?))
    }

    fn source_name(&self) -> String {
        self.config
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| NAME.to_string())
    }
}

pub fn manifest() -> ModuleManifest {
    ModuleManifest::new(NAME, "Import files from a local folder")
        .arg(ArgSpec::required("source", "folder to import, scanned recursively"))
        .arg(ArgSpec::optional("exclude", "file names to leave out"))
        .arg(ArgSpec::optional("aggregate", "import every file as one element"))
}

pub fn register(registry: &mut Registry) {
    registry.register_selector(manifest(), |config, _| {
        Ok(Box::new(LocalSelector::from_config(config)?) as Box<dyn Selector>)
    });
}

impl Selector for LocalSelector {
    // The source folder belongs to the user
    fn delete_local_on_write(&self) -> bool {
        false
    }

    fn index(&mut self, ctx: &PhaseContext<'_>) -> anyhow::Result<Option<ElementIndex>> {
        ctx.log("Indexing local folder...");
        let entries = scan_source(&self.config.source, &self.config.exclude)?;

        let mut index = ElementIndex::new(["id", "path"])?;
        if self.config.aggregate {
            index.push([self.source_name(), AGGREGATE_MARKER.to_string()])?;
            ctx.log(format!(
                "aggregating {} elements as {}",
                entries.len(),
                self.source_name()
            ));
            return Ok(Some(index));
        }

        for entry in entries {
            ctx.log(format!("indexed file {} as: {}", entry.path.display(), entry.id));
            index.push([entry.id, entry.path.to_string_lossy().into_owned()])?;
        }
        Ok(Some(index))
    }

    fn retrieve_element(
        &self,
        row: &IndexRow,
        _ctx: &ElementContext<'_>,
    ) -> Result<LocalElement, ElementError> {
        let path = row
            .get("path")
            .ok_or_else(|| ElementError::skip("index row has no path"))?;

        let paths = if path == AGGREGATE_MARKER {
            scan_files(&self.config.source, &self.config.exclude)
                .map_err(|e| ElementError::skip(e.to_string()))?
        } else {
            entry_files(&PathBuf::from(path), &self.config.exclude)?
        };
        if paths.is_empty() {
            return Err(ElementError::skip("no files left to import"));
        }
        debug!("Importing {} files as {}", paths.len(), row.id());
        Ok(LocalElement::new(row.id(), paths, Etype::Any))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtriage_core::{Context, LocalStorage, Location, PipelineStage, SelectorRunner};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup(aggregate: bool) -> (TempDir, Arc<LocalStorage>, SelectorRunner) {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("first.png"), b"1").unwrap();
        fs::write(source.join("second.txt"), b"2").unwrap();

        let storage = Arc::new(LocalStorage::new(dir.path().join("media")).unwrap());
        let yaml = format!("source: {}\naggregate: {}", source.display(), aggregate);
        let config: ModuleConfig = serde_yaml::from_str(&yaml).unwrap();
        let selector = LocalSelector::from_config(&config).unwrap();
        let runner = SelectorRunner::new(
            NAME,
            Box::new(selector),
            Arc::clone(&storage),
            config,
            Context::production().with_parallelism(2),
        );
        (dir, storage, runner)
    }

    #[test]
    fn test_two_files_become_two_elements() {
        let (dir, storage, mut runner) = setup(false);
        assert_eq!(runner.start_indexing().unwrap(), Some(2));
        let index = fs::read_to_string(storage.index_path(NAME)).unwrap();
        assert_eq!(index.lines().count(), 3);

        runner.start_retrieving().unwrap();
        let data = storage.location_dir(&Location::data(NAME));
        assert!(data.join("first/first.png").is_file());
        assert!(data.join("second/second.txt").is_file());
        // Originals stay in place
        assert!(dir.path().join("in/first.png").is_file());
    }

    #[test]
    fn test_aggregate_is_one_element() {
        let (_dir, storage, mut runner) = setup(true);
        runner.run().unwrap();
        let media = storage.read_all_media().unwrap();
        let data = &media[NAME].data;
        assert_eq!(data.keys().collect::<Vec<_>>(), vec!["in"]);
        assert!(data["in"].join("0.png").is_file());
        assert!(data["in"].join("1.txt").is_file());
    }

    #[test]
    fn test_hidden_files_do_not_abort_development_runs() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("clip.mp4"), b"1").unwrap();
        fs::write(source.join(".DS_Store"), b"junk").unwrap();

        let storage = Arc::new(LocalStorage::new(dir.path().join("media")).unwrap());
        let config: ModuleConfig =
            serde_yaml::from_str(&format!("source: {}", source.display())).unwrap();
        let mut runner = SelectorRunner::new(
            NAME,
            Box::new(LocalSelector::from_config(&config).unwrap()),
            Arc::clone(&storage),
            config,
            Context::development(),
        );
        runner.run().unwrap();

        let media = storage.read_all_media().unwrap();
        assert_eq!(media[NAME].data.keys().collect::<Vec<_>>(), vec!["clip"]);
    }

    #[test]
    fn test_missing_source_fails_index() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path()).unwrap());
        let config: ModuleConfig = serde_yaml::from_str("source: /definitely/not/here").unwrap();
        let mut runner = SelectorRunner::new(
            NAME,
            Box::new(LocalSelector::from_config(&config).unwrap()),
            storage,
            config,
            Context::production(),
        );
        let err = runner.start_indexing().unwrap_err();
        assert!(err.to_string().contains("could not be found"));
    }
}
