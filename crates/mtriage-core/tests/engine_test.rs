//! End-to-end tests for selectors, analysers and resumable phases

use mtriage_core::{
    Analyser, AnalyserRunner, Context, ElementContext, ElementError, ElementIndex, Etype,
    IndexRow, Items, LocalElement, LocalStorage, Location, ModuleBase, PhaseContext,
    PipelineError, PipelineStage, Selector, SelectorRunner, MAX_ATTEMPTS,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn storage() -> (TempDir, Arc<LocalStorage>) {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(LocalStorage::new(dir.path().join("media")).unwrap());
    (dir, storage)
}

fn log_lines(storage: &LocalStorage, module: &str) -> Vec<String> {
    fs::read_to_string(storage.logs_dir().join(format!("{module}.txt")))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Indexes `el0..el{n}` and retrieves each as a text file
struct Numbers {
    count: usize,
    retrieve_calls: Arc<AtomicUsize>,
    always_retry: bool,
}

impl Numbers {
    fn new(count: usize) -> Self {
        Self {
            count,
            retrieve_calls: Arc::new(AtomicUsize::new(0)),
            always_retry: false,
        }
    }
}

impl Selector for Numbers {
    fn index(&mut self, _ctx: &PhaseContext<'_>) -> anyhow::Result<Option<ElementIndex>> {
        let mut index = ElementIndex::new(["id", "value"])?;
        for i in 0..self.count {
            index.push([format!("el{i}"), i.to_string()])?;
        }
        Ok(Some(index))
    }

    fn retrieve_element(
        &self,
        row: &IndexRow,
        ctx: &ElementContext<'_>,
    ) -> Result<LocalElement, ElementError> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        if self.always_retry {
            return Err(ElementError::retry("source unavailable"));
        }
        let path = ctx.scratch_dir()?.join("value.txt");
        fs::write(&path, row.get("value").unwrap_or_default())?;
        Ok(LocalElement::new(row.id(), vec![path], Etype::Any))
    }
}

/// Copies its input to `out.json`, skipping the ids it is told to and
/// failing with an unknown error on the ids it is told to crash on
#[derive(Default)]
struct ToJson {
    skip: Vec<String>,
    crash: Vec<String>,
}

impl ToJson {
    fn crashing_on(ids: &[&str]) -> Self {
        Self {
            crash: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }
}

impl Analyser for ToJson {
    fn out_etype(&self) -> Etype {
        Etype::Json
    }

    fn analyse_element(
        &self,
        element: &LocalElement,
        ctx: &ElementContext<'_>,
    ) -> Result<Option<LocalElement>, ElementError> {
        if self.skip.contains(&element.id) {
            return Err(ElementError::skip("told to skip"));
        }
        if self.crash.contains(&element.id) {
            return Err(ElementError::Other(anyhow::anyhow!("decoder crashed")));
        }
        let src = element
            .first_path()
            .ok_or_else(|| ElementError::skip("no input"))?;
        let out = ctx.scratch_dir()?.join("out.json");
        let value = fs::read_to_string(src)?;
        fs::write(&out, format!("{{\"value\": {value}}}"))?;
        Ok(Some(LocalElement::new(&element.id, vec![out], Etype::Json)))
    }
}

fn retrieve(storage: &Arc<LocalStorage>, count: usize) {
    retrieve_as(storage, "sel1", count);
}

fn retrieve_as(storage: &Arc<LocalStorage>, selector: &str, count: usize) {
    let mut runner = SelectorRunner::new(
        selector,
        Box::new(Numbers::new(count)),
        Arc::clone(storage),
        serde_yaml::Value::Null,
        Context::production().with_parallelism(2),
    );
    runner.run().unwrap();
}

fn analyser(
    storage: &Arc<LocalStorage>,
    name: &str,
    elements_in: &[&str],
    skip: &[&str],
) -> AnalyserRunner {
    let elements_in: Vec<String> = elements_in.iter().map(|s| s.to_string()).collect();
    AnalyserRunner::new(
        name,
        Box::new(ToJson {
            skip: skip.iter().map(|s| s.to_string()).collect(),
            ..ToJson::default()
        }),
        &elements_in,
        Arc::clone(storage),
        serde_yaml::Value::Null,
        Context::production().with_parallelism(2),
    )
    .unwrap()
}

/// Crash at `crash_at` under one parallelism, then resume under another
fn resume_scenario(parallelism: usize, resume_parallelism: usize, crash_at: u32) {
    let (_dir, storage) = storage();
    let total = 10u32;
    let config: serde_yaml::Value = serde_yaml::from_str("kind: resume").unwrap();
    let context = Context::production().with_parallelism(parallelism);
    let calls = AtomicUsize::new(0);

    let first = ModuleBase::new("Batch", Arc::clone(&storage), config.clone(), context);
    let result = first.phase_over("analyse", Items::streamed(0..total), true, |logger, i| {
        calls.fetch_add(1, Ordering::SeqCst);
        if i == crash_at {
            return Err(PipelineError::WorkerPanicked);
        }
        logger.log(format!("processed {i}"));
        Ok(())
    });
    assert!(result.is_err());
    assert!(first.ledger("analyse").exists());
    let completed_first = log_lines(&storage, "Batch").len();
    assert!(completed_first < total as usize);

    calls.store(0, Ordering::SeqCst);
    let context = Context::production().with_parallelism(resume_parallelism);
    let second = ModuleBase::new("Batch", Arc::clone(&storage), config, context);
    let report = second
        .phase_over("analyse", Items::streamed(0..total), true, |logger, i| {
            calls.fetch_add(1, Ordering::SeqCst);
            logger.log(format!("processed {i}"));
            Ok(())
        })
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), total as usize - completed_first);
    assert_eq!(report.resumed, completed_first);
    // Every item was processed exactly once across both runs
    let mut lines = log_lines(&storage, "Batch");
    assert_eq!(lines.len(), total as usize);
    lines.sort();
    lines.dedup();
    assert_eq!(lines.len(), total as usize);
    assert!(!second.ledger("analyse").exists());
}

#[test]
fn test_resume_single_worker() {
    resume_scenario(1, 1, 6);
}

#[test]
fn test_resume_two_workers() {
    resume_scenario(2, 2, 7);
}

#[test]
fn test_resume_with_fewer_workers() {
    resume_scenario(3, 2, 4);
}

#[test]
fn test_resume_with_more_workers() {
    resume_scenario(1, 4, 3);
}

fn crashing_analyser(
    storage: &Arc<LocalStorage>,
    elements_in: &str,
    config: &str,
    crash: &[&str],
) -> AnalyserRunner {
    AnalyserRunner::new(
        "an1",
        Box::new(ToJson::crashing_on(crash)),
        &[elements_in.to_string()],
        Arc::clone(storage),
        serde_yaml::from_str(config).unwrap(),
        Context::development().with_parallelism(1),
    )
    .unwrap()
}

#[test]
fn test_ledger_is_not_shared_across_inputs() {
    let (_dir, storage) = storage();
    retrieve_as(&storage, "sel1", 4);
    retrieve_as(&storage, "sel2", 4);

    let mut first = crashing_analyser(&storage, "sel1", "mode: a", &["el2"]);
    assert!(matches!(first.run(), Err(PipelineError::Element { .. })));
    assert!(first.base().ledger("analyse").exists());

    // Same module and configuration over another selector starts fresh
    let mut second = crashing_analyser(&storage, "sel2", "mode: a", &[]);
    let report = second.run().unwrap();
    assert_eq!(report.resumed, 0);
    assert_eq!(report.processed, 4);
    let derived = storage.location_dir(&Location::derived("sel2", "an1"));
    for i in 0..4 {
        assert!(derived.join(format!("el{i}/out.json")).is_file());
    }
    assert_ne!(
        first.base().unique_id("analyse"),
        second.base().unique_id("analyse")
    );
}

#[test]
fn test_ledger_is_not_shared_across_configs() {
    let (_dir, storage) = storage();
    retrieve(&storage, 4);

    let mut first = crashing_analyser(&storage, "sel1", "mode: a", &["el2"]);
    assert!(first.run().is_err());

    let mut changed = crashing_analyser(&storage, "sel1", "mode: b", &[]);
    assert_eq!(changed.run().unwrap().resumed, 0);

    // The original configuration still resumes from its own ledger
    let mut same = crashing_analyser(&storage, "sel1", "mode: a", &[]);
    let report = same.run().unwrap();
    assert_eq!(report.resumed, 2);
    assert_eq!(report.processed, 2);
}

/// Indexes the given ids verbatim
struct Rows(Vec<&'static str>);

impl Selector for Rows {
    fn index(&mut self, _ctx: &PhaseContext<'_>) -> anyhow::Result<Option<ElementIndex>> {
        let mut index = ElementIndex::new(["id", "value"])?;
        for id in &self.0 {
            index.push([id.to_string(), "1".to_string()])?;
        }
        Ok(Some(index))
    }

    fn retrieve_element(
        &self,
        row: &IndexRow,
        ctx: &ElementContext<'_>,
    ) -> Result<LocalElement, ElementError> {
        let path = ctx.scratch_dir()?.join("value.txt");
        fs::write(&path, row.get("value").unwrap_or_default())?;
        Ok(LocalElement::new(row.id(), vec![path], Etype::Any))
    }
}

#[test]
fn test_invalid_row_id_leaves_other_elements() {
    let (_dir, storage) = storage();
    let mut runner = SelectorRunner::new(
        "sel1",
        Box::new(Rows(vec!["a", "b", "", ".."])),
        Arc::clone(&storage),
        serde_yaml::Value::Null,
        Context::production().with_parallelism(2),
    );
    runner.run().unwrap();

    let data = storage.location_dir(&Location::data("sel1"));
    assert!(data.join("a/value.txt").is_file());
    assert!(data.join("b/value.txt").is_file());
    assert!(storage.index_path("sel1").is_file());
    let log = log_lines(&storage, "sel1").join("\n");
    assert!(log.contains("invalid element id ''"));
    assert!(log.contains("invalid element id '..'"));
}

#[test]
fn test_streamed_input_runs_serially_when_parallel_disabled() {
    let (_dir, storage) = storage();
    let base = ModuleBase::new(
        "Serial",
        Arc::clone(&storage),
        serde_yaml::Value::Null,
        Context::production().with_parallelism(4),
    );
    let report = base
        .phase_over("analyse", Items::streamed(0..5u32), false, |logger, i| {
            logger.log(i);
            Ok(())
        })
        .unwrap();
    assert_eq!(report.batches, 1);
    // Serial runs keep input order
    assert_eq!(
        log_lines(&storage, "Serial"),
        (0..5).map(|i| format!("Serial: analyse: {i}")).collect::<Vec<_>>()
    );
}

#[test]
fn test_local_style_selector_retrieves_every_row() {
    let (_dir, storage) = storage();
    let mut runner = SelectorRunner::new(
        "sel1",
        Box::new(Numbers::new(2)),
        Arc::clone(&storage),
        serde_yaml::Value::Null,
        Context::production(),
    );
    assert_eq!(runner.start_indexing().unwrap(), Some(2));
    let csv = fs::read_to_string(storage.index_path("sel1")).unwrap();
    assert_eq!(csv.lines().count(), 3);

    let report = runner.start_retrieving().unwrap();
    assert_eq!(report.processed, 2);
    let media = storage.read_all_media().unwrap();
    assert_eq!(media["sel1"].data.len(), 2);
    assert!(media["sel1"].data["el1"].join("value.txt").is_file());
    assert!(!storage.base().join(".scratch/sel1/el0").exists());
}

#[test]
fn test_retry_ceiling_leaves_no_folder() {
    let (_dir, storage) = storage();
    let selector = Numbers {
        always_retry: true,
        ..Numbers::new(1)
    };
    let calls = Arc::clone(&selector.retrieve_calls);
    let mut runner = SelectorRunner::new(
        "sel1",
        Box::new(selector),
        Arc::clone(&storage),
        serde_yaml::Value::Null,
        Context::development(),
    );
    runner.run().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    assert!(!storage.element_dir(&Location::data("sel1"), "el0").exists());
    let log = log_lines(&storage, "sel1").join("\n");
    assert!(log.contains("source unavailable - attempt retry"));
}

#[test]
fn test_skip_rolls_back_derived_folder() {
    let (_dir, storage) = storage();
    retrieve(&storage, 3);
    let mut runner = analyser(&storage, "an1", &["sel1"], &["el1"]);
    let report = runner.run().unwrap();
    assert_eq!(report.total, 3);

    let derived = storage.location_dir(&Location::derived("sel1", "an1"));
    assert!(derived.join("el0/out.json").is_file());
    assert!(!derived.join("el1").exists());
    assert!(derived.join("el2/out.json").is_file());
    let log = log_lines(&storage, "an1").join("\n");
    assert!(log.contains("ERROR: an1: analyse: el1: told to skip - skipping element"));
}

#[test]
fn test_elements_in_resolves_only_present_outputs() {
    let (_dir, storage) = storage();
    retrieve(&storage, 3);
    analyser(&storage, "an1", &["sel1"], &["el1"]).run().unwrap();
    analyser(&storage, "an2", &["sel1"], &[]).run().unwrap();

    let downstream = analyser(&storage, "an3", &["sel1/an1"], &[]);
    let logger = downstream.base().logger("analyse");
    let resolved = downstream.resolve_elements(&logger).unwrap();
    let ids: Vec<&str> = resolved.iter().map(|r| r.element.id.as_str()).collect();
    assert_eq!(ids, vec!["el0", "el2"]);
    assert_eq!(resolved[0].location, Location::derived("sel1", "an3"));
    assert_eq!(resolved[0].element.etype, Etype::Any);
}

#[test]
fn test_missing_elements_in_folder_is_fatal() {
    let (_dir, storage) = storage();
    retrieve(&storage, 1);
    let mut runner = analyser(&storage, "an1", &["sel1/nope"], &[]);
    assert!(matches!(
        runner.run(),
        Err(PipelineError::Config(mtriage_core::ConfigError::InvalidElementsIn { .. }))
    ));
    assert!(AnalyserRunner::new(
        "an1",
        Box::new(ToJson::default()),
        &["a/b/c".to_string()],
        Arc::clone(&storage),
        serde_yaml::Value::Null,
        Context::production(),
    )
    .is_err());
}

/// Accepts only images, which the numbers selector never produces
struct ImagesOnly;

impl Analyser for ImagesOnly {
    fn in_etype(&self) -> Etype {
        Etype::Image
    }

    fn analyse_element(
        &self,
        element: &LocalElement,
        _ctx: &ElementContext<'_>,
    ) -> Result<Option<LocalElement>, ElementError> {
        Ok(Some(element.clone()))
    }
}

#[test]
fn test_nothing_castable_is_an_error() {
    let (_dir, storage) = storage();
    retrieve(&storage, 2);
    let mut runner = AnalyserRunner::new(
        "images",
        Box::new(ImagesOnly),
        &["sel1".to_string()],
        Arc::clone(&storage),
        serde_yaml::Value::Null,
        Context::production(),
    )
    .unwrap();
    assert!(matches!(
        runner.run(),
        Err(PipelineError::NoCastableElements { .. })
    ));
    let log = log_lines(&storage, "images").join("\n");
    assert!(log.contains("could not cast element 'el0' to Image"));
}

/// Writes a summary file in post-analyse
struct Summarise;

impl Analyser for Summarise {
    fn delete_local_on_write(&self) -> bool {
        false
    }

    fn analyse_element(
        &self,
        element: &LocalElement,
        _ctx: &ElementContext<'_>,
    ) -> Result<Option<LocalElement>, ElementError> {
        Ok(Some(element.clone()))
    }

    fn post_analyse(
        &mut self,
        ctx: &PhaseContext<'_>,
        derived_dirs: &[PathBuf],
    ) -> anyhow::Result<Option<LocalElement>> {
        let out = ctx.scratch_dir("__SUMMARY")?.join("summary.json");
        fs::write(&out, format!("{{\"dirs\": {}}}", derived_dirs.len()))?;
        Ok(Some(LocalElement::new("__SUMMARY", vec![out], Etype::Json)))
    }
}

#[test]
fn test_post_analyse_output_lands_in_derived_dir() {
    let (_dir, storage) = storage();
    retrieve(&storage, 2);
    let mut runner = AnalyserRunner::new(
        "summary",
        Box::new(Summarise),
        &["sel1".to_string()],
        Arc::clone(&storage),
        serde_yaml::Value::Null,
        Context::production(),
    )
    .unwrap();
    runner.run().unwrap();

    let derived = storage.location_dir(&Location::derived("sel1", "summary"));
    let summary: &Path = &derived.join("__SUMMARY/summary.json");
    assert_eq!(fs::read_to_string(summary).unwrap(), "{\"dirs\": 1}");
    assert!(!storage.base().join(".scratch/summary/__SUMMARY").exists());
    // Inputs were passed through as copies
    assert!(storage
        .element_dir(&Location::data("sel1"), "el0")
        .join("value.txt")
        .is_file());
}
