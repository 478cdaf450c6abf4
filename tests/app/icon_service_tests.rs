use super::*;
use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use tempfile::TempDir;

struct SetProbe(HashSet<String>);

impl SetProbe {
    fn of(paths: &[&str]) -> Self {
        Self(paths.iter().map(|path| (*path).to_string()).collect())
    }

    fn empty() -> Self {
        Self(HashSet::new())
    }
}

impl FsProbe for SetProbe {
    fn exists(&self, path: &str) -> bool {
        self.0.contains(path)
    }
}

enum FakeOutcome {
    Extracted(PathBuf),
    Unavailable,
    Fail,
}

struct FakeExtractor {
    outcome: FakeOutcome,
    calls: AtomicUsize,
    indices: Mutex<Vec<u32>>,
}

impl FakeExtractor {
    fn new(outcome: FakeOutcome) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            outcome,
            calls: AtomicUsize::new(0),
            indices: Mutex::new(Vec::new()),
        })
    }
}

impl IconExtractor for std::sync::Arc<FakeExtractor> {
    fn extract(&self, _source: &Path, index: u32) -> AppResult<IconExtraction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.indices.lock().unwrap().push(index);
        match &self.outcome {
            FakeOutcome::Extracted(path) => Ok(IconExtraction::Extracted(path.clone())),
            FakeOutcome::Unavailable => {
                Ok(IconExtraction::Unavailable("no icon".to_string()))
            }
            FakeOutcome::Fail => Err(AppError::new("icon_tool_missing", "图标提取工具不存在")),
        }
    }
}

struct Fixture {
    _workdir: TempDir,
    store_dir: PathBuf,
    default_icon: PathBuf,
    extracted_png: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let workdir = tempfile::tempdir().expect("tempdir");
        let store_dir = workdir.path().join("iconcache");
        let default_icon = workdir.path().join("default.png");
        fs::write(&default_icon, b"default-bytes").expect("write default icon");
        let extracted_png = workdir.path().join("extracted.png");
        fs::write(&extracted_png, b"extracted-bytes").expect("write extracted png");
        Self {
            _workdir: workdir,
            store_dir,
            default_icon,
            extracted_png,
        }
    }

    fn service(
        &self,
        extractor: std::sync::Arc<FakeExtractor>,
        probe: SetProbe,
    ) -> IconService {
        let store = DirIconStore::new(&self.store_dir).expect("store");
        IconService::new(Box::new(store), Box::new(extractor), &self.default_icon)
            .with_probe(Box::new(probe))
    }
}

const SOURCE: &str = "C:\\Apps\\tool.exe";

#[test]
fn second_resolution_for_same_key_skips_extraction() {
    let fixture = Fixture::new();
    let extractor = FakeExtractor::new(FakeOutcome::Extracted(fixture.extracted_png.clone()));
    let service = fixture.service(extractor.clone(), SetProbe::of(&[SOURCE]));

    let first = service.resolve_icon(SOURCE);
    let second = service.resolve_icon(SOURCE);

    assert_eq!(first, second);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    let key = cache_key(SOURCE, 0);
    let stored = fs::read(fixture.store_dir.join(format!("{key}.png"))).expect("cached entry");
    assert_eq!(stored, b"extracted-bytes");
}

#[test]
fn persisted_entry_survives_a_new_service_instance() {
    let fixture = Fixture::new();
    let warm = FakeExtractor::new(FakeOutcome::Extracted(fixture.extracted_png.clone()));
    fixture
        .service(warm.clone(), SetProbe::of(&[SOURCE]))
        .resolve_icon(SOURCE);
    assert_eq!(warm.calls.load(Ordering::SeqCst), 1);

    let cold = FakeExtractor::new(FakeOutcome::Extracted(fixture.extracted_png.clone()));
    let locator = fixture
        .service(cold.clone(), SetProbe::of(&[SOURCE]))
        .resolve_icon(SOURCE);
    assert_eq!(cold.calls.load(Ordering::SeqCst), 0);
    assert!(locator.starts_with("app-icon://"));
}

#[test]
fn missing_source_returns_default_and_is_not_memoized() {
    let fixture = Fixture::new();
    let extractor = FakeExtractor::new(FakeOutcome::Extracted(fixture.extracted_png.clone()));
    let service = fixture.service(extractor.clone(), SetProbe::empty());

    let first = service.resolve_icon(SOURCE);
    let second = service.resolve_icon(SOURCE);

    assert_eq!(first, service.default_locator());
    assert_eq!(second, service.default_locator());
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    let key = cache_key(SOURCE, 0);
    assert!(!fixture.store_dir.join(format!("{key}.png")).exists());
}

#[test]
fn unavailable_source_memoizes_the_default_icon() {
    let fixture = Fixture::new();
    let extractor = FakeExtractor::new(FakeOutcome::Unavailable);
    let service = fixture.service(extractor.clone(), SetProbe::of(&[SOURCE]));

    let first = service.resolve_icon(SOURCE);
    let second = service.resolve_icon(SOURCE);

    assert_eq!(first, second);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    let key = cache_key(SOURCE, 0);
    let stored = fs::read(fixture.store_dir.join(format!("{key}.png"))).expect("cached entry");
    assert_eq!(stored, b"default-bytes");
}

#[test]
fn extractor_transport_error_is_not_memoized() {
    let fixture = Fixture::new();
    let extractor = FakeExtractor::new(FakeOutcome::Fail);
    let service = fixture.service(extractor.clone(), SetProbe::of(&[SOURCE]));

    let first = service.resolve_icon(SOURCE);
    let second = service.resolve_icon(SOURCE);

    assert_eq!(first, service.default_locator());
    assert_eq!(second, service.default_locator());
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    let key = cache_key(SOURCE, 0);
    assert!(!fixture.store_dir.join(format!("{key}.png")).exists());
}

#[test]
fn ico_reference_bypasses_extraction() {
    let fixture = Fixture::new();
    let extractor = FakeExtractor::new(FakeOutcome::Unavailable);
    let service = fixture.service(extractor.clone(), SetProbe::of(&["C:\\Icons\\app.ICO"]));

    let locator = service.resolve_icon("C:\\Icons\\app.ICO");

    assert_eq!(locator, file_locator("C:\\Icons\\app.ICO"));
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_ico_reference_falls_back_to_default() {
    let fixture = Fixture::new();
    let extractor = FakeExtractor::new(FakeOutcome::Unavailable);
    let service = fixture.service(extractor.clone(), SetProbe::empty());

    let locator = service.resolve_icon("C:\\Icons\\gone.ico");

    assert_eq!(locator, service.default_locator());
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn empty_reference_resolves_to_default() {
    let fixture = Fixture::new();
    let extractor = FakeExtractor::new(FakeOutcome::Unavailable);
    let service = fixture.service(extractor.clone(), SetProbe::empty());
    assert_eq!(service.resolve_icon(""), service.default_locator());
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn comma_suffix_selects_icon_index() {
    let fixture = Fixture::new();
    let extractor = FakeExtractor::new(FakeOutcome::Extracted(fixture.extracted_png.clone()));
    let service = fixture.service(extractor.clone(), SetProbe::of(&[SOURCE]));

    service.resolve_icon("C:\\Apps\\tool.exe,2");
    assert_eq!(extractor.indices.lock().unwrap().as_slice(), &[2]);
}

#[test]
fn unparsable_index_defaults_to_zero() {
    let fixture = Fixture::new();
    let extractor = FakeExtractor::new(FakeOutcome::Extracted(fixture.extracted_png.clone()));
    let service = fixture.service(extractor.clone(), SetProbe::of(&[SOURCE]));

    service.resolve_icon("C:\\Apps\\tool.exe,junk");
    assert_eq!(extractor.indices.lock().unwrap().as_slice(), &[0]);
}

#[test]
fn embedded_quotes_are_stripped_before_resolution() {
    let fixture = Fixture::new();
    let extractor = FakeExtractor::new(FakeOutcome::Extracted(fixture.extracted_png.clone()));
    let service = fixture.service(extractor.clone(), SetProbe::of(&[SOURCE]));

    service.resolve_icon("\"C:\\Apps\\tool.exe\",1");
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(extractor.indices.lock().unwrap().as_slice(), &[1]);
}

#[test]
fn cache_keys_are_deterministic_and_index_sensitive() {
    assert_eq!(cache_key(SOURCE, 0), cache_key(SOURCE, 0));
    assert_ne!(cache_key(SOURCE, 0), cache_key(SOURCE, 1));
    assert_ne!(cache_key(SOURCE, 0), cache_key("C:\\Apps\\other.exe", 0));
    assert_eq!(cache_key(SOURCE, 0), cache_key("  C:\\Apps\\tool.exe  ", 0));
}

#[test]
fn dir_store_roundtrip_leaves_no_temp_files() {
    let workdir = tempfile::tempdir().expect("tempdir");
    let store = DirIconStore::new(workdir.path().join("cache")).expect("store");

    assert!(!store.has("k"));
    assert_eq!(store.get("k"), None);

    let path = store.put("k", b"first").expect("put");
    assert!(store.has("k"));
    assert_eq!(store.get("k"), Some(path.clone()));
    assert_eq!(fs::read(&path).expect("read"), b"first");

    // Last complete write wins; the entry is replaced, never torn.
    store.put("k", b"second").expect("overwrite");
    assert_eq!(fs::read(&path).expect("read"), b"second");

    let leftovers: Vec<_> = fs::read_dir(workdir.path().join("cache"))
        .expect("read_dir")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains("tmp"))
        .collect();
    assert!(leftovers.is_empty(), "stray temp files: {leftovers:?}");
}
