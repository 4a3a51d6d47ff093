use super::*;
use modernize_core::inference::{InferenceError, Prompt};
use modernize_core::test_util::{MockInference, tempdir};
use std::fs::{self, File};
use std::time::{Duration, SystemTime};

const INVOICE: &str = "class Invoice:\n    \"\"\"A sales invoice.\"\"\"\n\n    def __init__(self, customer):\n        self.customer = customer\n\n    def total(self, items):\n        return sum(i.amount for i in items)\n";
const TAX: &str = "def calculate_tax(amount, rate):\n    return amount * rate / 100\n";
const UTILS: &str = "import math\n\n\ndef round_half_up(value):\n    return math.floor(value + 0.5)\n";

/// Config for a run from `input` into `output` with the toolchain disabled and a short retry
/// budget. `extra` is appended to the TOML.
fn config(input: &Path, output: &Path, extra: &str) -> Config {
    let toml = format!(
        r#"
            input = ""
            output = ""
            workers = 2
            [tools.go_validator]
            use_toolchain = false
            [tools.semantic_index]
            dimension = 64
            [tools.llm_translation]
            max_retries = 1
            {extra}
        "#
    );
    let mut config: Config = config::Config::builder()
        .add_source(config::File::from_str(&toml, config::FileFormat::Toml))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap();
    config.input = input.to_path_buf();
    config.output = output.to_path_buf();
    config
}

fn write_sources(root: &Path) {
    fs::write(root.join("invoice.py"), INVOICE).unwrap();
    fs::write(root.join("tax_calc.py"), TAX).unwrap();
    fs::write(root.join("utils.py"), UTILS).unwrap();
}

fn responder(_: &Prompt, call: usize) -> Result<String, InferenceError> {
    Ok(format!(
        "```go\npackage common\n\nfunc Generated{call}() int {{\n\treturn {call}\n}}\n```\n"
    ))
}

fn set_old_mtime(path: &Path) -> SystemTime {
    let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000);
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(old)
        .unwrap();
    old
}

fn mtime(path: &Path) -> SystemTime {
    fs::metadata(path).unwrap().modified().unwrap()
}

#[test]
fn second_run_reuses_unchanged_files() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_sources(input.path());
    let config = config(input.path(), output.path(), "");

    let mock = Arc::new(MockInference::new().respond(responder));
    let first = convert(&config, mock.clone(), &CancellationToken::new()).unwrap();
    assert_eq!(mock.calls(), 3);
    assert_eq!(first.files_total, 3);
    assert_eq!((first.cache_hits, first.cache_misses, first.translated), (0, 3, 3));
    assert!(!first.cancelled);

    let invoice_go = output.path().join("invoice").join("invoice.go");
    let tax_go = output.path().join("tax").join("tax_calc.go");
    let utils_go = output.path().join("common").join("utils.go");
    for path in [&invoice_go, &tax_go, &utils_go] {
        assert!(path.exists(), "{} missing", path.display());
    }
    assert!(fs::read_to_string(&tax_go).unwrap().starts_with("package tax\n"));
    assert!(output.path().join("go.mod").exists());
    assert!(output.path().join(REPORT_FILE_NAME).exists());
    let old = [&invoice_go, &tax_go, &utils_go].map(|p| set_old_mtime(p));

    fs::write(
        input.path().join("tax_calc.py"),
        format!("{TAX}\n\ndef tax_free(amount):\n    return amount\n"),
    )
    .unwrap();
    let mock = Arc::new(MockInference::new().respond(responder));
    let second = convert(&config, mock.clone(), &CancellationToken::new()).unwrap();
    assert_eq!(mock.calls(), 1);
    assert_eq!((second.cache_hits, second.cache_misses), (2, 1));
    assert_eq!(mtime(&invoice_go), old[0]);
    assert_ne!(mtime(&tax_go), old[1]);
    assert_eq!(mtime(&utils_go), old[2]);

    let tax = second.file(&input.path().join("tax_calc.py")).unwrap();
    assert_eq!(tax.status, FileStatus::Translated);
    assert_eq!(tax.module, "tax");
    assert_eq!(tax.attempts, 1);
    let invoice = second.file(&input.path().join("invoice.py")).unwrap();
    assert_eq!(invoice.status, FileStatus::Cached);
    assert_eq!(invoice.attempts, 0);
    assert!(invoice.validation.is_some());

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.path().join(REPORT_FILE_NAME)).unwrap())
            .unwrap();
    assert_eq!(json["cache_hits"], 2);
    assert_eq!(json["files"].as_array().unwrap().len(), 3);
}

#[test]
fn force_ignores_the_cache() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_sources(input.path());
    let mut config = config(input.path(), output.path(), "");
    convert(&config, Arc::new(MockInference::new()), &CancellationToken::new()).unwrap();

    config.force = true;
    let mock = Arc::new(MockInference::new());
    let report = convert(&config, mock.clone(), &CancellationToken::new()).unwrap();
    assert_eq!(mock.calls(), 3);
    assert_eq!(report.cache_hits, 0);
    assert!(report.settings.force);
}

#[test]
fn failing_inference_writes_skeletons() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    fs::write(input.path().join("invoice.py"), INVOICE).unwrap();
    let config = config(input.path(), output.path(), "");

    let mock = Arc::new(
        MockInference::new().respond(|_, _| Err(InferenceError::Timeout(Duration::from_secs(180)))),
    );
    let report = convert(&config, mock.clone(), &CancellationToken::new()).unwrap();
    // One request plus the single configured retry.
    assert_eq!(mock.calls(), 2);
    assert_eq!(report.fallbacks, 1);
    let file = &report.files[0];
    assert_eq!(file.status, FileStatus::Fallback);
    assert_eq!(file.attempt_failures.len(), 2);

    let skeleton = fs::read_to_string(output.path().join("invoice").join("invoice.go")).unwrap();
    assert!(skeleton.contains("package invoice\n"));
    assert!(skeleton.contains("type Invoice struct"));
    assert!(skeleton.contains("func NewInvoice(customer any) (*Invoice, error)"));

    // Skeletons are not cached, so the model is asked again on the next run.
    let mock = Arc::new(MockInference::new());
    let report = convert(&config, mock.clone(), &CancellationToken::new()).unwrap();
    assert_eq!(mock.calls(), 1);
    assert_eq!(report.files[0].status, FileStatus::Translated);
}

#[test]
fn cancelled_run_writes_no_go_files() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_sources(input.path());
    let config = config(input.path(), output.path(), "");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mock = Arc::new(MockInference::new());
    let report = convert(&config, mock.clone(), &cancel).unwrap();
    assert!(report.cancelled);
    assert_eq!(mock.calls(), 0);
    assert!(report.files.iter().all(|f| f.status == FileStatus::Cancelled));
    assert!(report.files.iter().all(|f| f.target_path.is_none()));
    assert!(!output.path().join("go.mod").exists());
    assert!(!output.path().join("common").exists());
    assert!(output.path().join(REPORT_FILE_NAME).exists());
}

#[test]
fn unparseable_files_are_reported() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    fs::write(input.path().join("broken.py"), "def (:\n").unwrap();
    fs::write(input.path().join("utils.py"), UTILS).unwrap();
    let config = config(input.path(), output.path(), "");

    let mock = Arc::new(MockInference::new());
    let report = convert(&config, mock.clone(), &CancellationToken::new()).unwrap();
    assert_eq!(mock.calls(), 1);
    assert_eq!(report.failed, 1);
    let broken = report.file(&input.path().join("broken.py")).unwrap();
    assert_eq!(broken.status, FileStatus::ParseFailed);
    assert!(broken.failure.as_deref().unwrap().starts_with("syntax error"));
    assert!(broken.target_path.is_none());
    assert_eq!(
        report.file(&input.path().join("utils.py")).unwrap().status,
        FileStatus::Translated
    );
}

#[test]
fn same_named_files_keep_their_own_targets() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    for (dir, source) in [("a", UTILS), ("b", TAX)] {
        fs::create_dir(input.path().join(dir)).unwrap();
        fs::write(input.path().join(dir).join("utils.py"), source).unwrap();
    }
    let config = config(input.path(), output.path(), "");

    let mock = Arc::new(MockInference::new().respond(responder));
    let first = convert(&config, mock.clone(), &CancellationToken::new()).unwrap();
    assert_eq!(first.translated, 2);
    let a_go = output.path().join("common").join("a_utils.go");
    let b_go = output.path().join("common").join("b_utils.go");
    for (source, target) in [("a", &a_go), ("b", &b_go)] {
        let file = first.file(&input.path().join(source).join("utils.py")).unwrap();
        assert_eq!(file.target_path.as_ref(), Some(target));
    }
    assert!(!output.path().join("common").join("utils.go").exists());
    let contents = [&a_go, &b_go].map(|p| fs::read_to_string(p).unwrap());
    assert_ne!(contents[0], contents[1]);
    let old = [&a_go, &b_go].map(|p| set_old_mtime(p));

    // Nothing changed, so nothing is rewritten.
    let mock = Arc::new(MockInference::new().respond(responder));
    let second = convert(&config, mock.clone(), &CancellationToken::new()).unwrap();
    assert_eq!(mock.calls(), 0);
    assert_eq!(second.cache_hits, 2);
    assert_eq!([mtime(&a_go), mtime(&b_go)], old);
    assert_eq!([&a_go, &b_go].map(|p| fs::read_to_string(p).unwrap()), contents);
}

#[test]
fn cached_translation_moves_with_the_rules() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    fs::write(input.path().join("tax_calc.py"), TAX).unwrap();
    let first = config(input.path(), output.path(), "");
    convert(&first, Arc::new(MockInference::new()), &CancellationToken::new()).unwrap();
    let tax_go = output.path().join("tax").join("tax_calc.go");
    assert!(fs::read_to_string(&tax_go).unwrap().starts_with("package tax\n"));

    let second = config(input.path(), output.path(), "[tools.organize_output]\nrules = []");
    let mock = Arc::new(MockInference::new());
    let report = convert(&second, mock.clone(), &CancellationToken::new()).unwrap();
    assert_eq!(mock.calls(), 0);
    let file = &report.files[0];
    assert_eq!(file.status, FileStatus::Cached);
    assert_eq!(file.module, "common");
    let common_go = output.path().join("common").join("tax_calc.go");
    assert!(fs::read_to_string(&common_go).unwrap().starts_with("package common\n"));
}

#[test]
fn deleted_files_leave_the_index() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_sources(input.path());
    let config = config(input.path(), output.path(), "");
    let first = convert(&config, Arc::new(MockInference::new()), &CancellationToken::new()).unwrap();
    assert_eq!(first.index.files, 3);

    let deleted = input.path().join("tax_calc.py");
    fs::remove_file(&deleted).unwrap();
    let second = convert(&config, Arc::new(MockInference::new()), &CancellationToken::new()).unwrap();
    assert_eq!(second.files_total, 2);
    assert_eq!(second.index.files, 2);

    let tools = ToolConfigs::load(&config).unwrap();
    let index = SemanticIndex::open(&tools.semantic_index, &config.state_dir());
    assert!(index.file_meaning(&deleted).is_none());
    assert!(index.file_meaning(&input.path().join("utils.py")).is_some());
}

#[test]
fn cancellation_after_translation_is_reported_as_cancelled() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    fs::write(input.path().join("utils.py"), UTILS).unwrap();
    let config = config(input.path(), output.path(), "");
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    // The answer arrives, then the run is cancelled before it can be written.
    let mock = Arc::new(MockInference::new().respond(move |prompt, call| {
        token.cancel();
        responder(prompt, call)
    }));

    let report = convert(&config, mock.clone(), &cancel).unwrap();
    assert!(report.cancelled);
    assert_eq!(mock.calls(), 1);
    let file = &report.files[0];
    assert_eq!(file.status, FileStatus::Cancelled);
    assert!(file.target_path.is_none());
    assert!(!output.path().join("common").join("utils.go").exists());
    assert!(!output.path().join("go.mod").exists());
}

#[test]
fn missing_toolchain_is_a_run_warning() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    fs::write(input.path().join("utils.py"), UTILS).unwrap();
    let config = config(input.path(), output.path(), "");
    let mut tools = ToolConfigs::load(&config).unwrap();
    let go = input.path().join("no-such-go").display().to_string();
    tools.go_validator.use_toolchain = true;
    tools.go_validator.go_binary = go.clone();

    let services = open_services(&config, &tools, Arc::new(MockInference::new()));
    assert!(!services.validator.has_toolchain());
    let report = convert_with(&config, &tools, services, &CancellationToken::new()).unwrap();
    assert!(report.warnings.iter().any(|w| w.contains(&go)), "{:?}", report.warnings);
    assert_eq!(report.files[0].status, FileStatus::Translated);
}

#[test]
fn missing_input_is_an_error() {
    let output = tempdir().unwrap();
    let config = config(&output.path().join("absent"), output.path(), "");
    assert!(matches!(
        convert(&config, Arc::new(MockInference::new()), &CancellationToken::new()),
        Err(ConvertError::Input(ScanError::InputNotFound(_)))
    ));
}

#[test]
fn invalid_tool_config_is_an_error() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_sources(input.path());
    let config = config(
        input.path(),
        output.path(),
        "[tools.structural_cache]\nbackend = \"floppy\"",
    );
    assert!(matches!(
        convert(&config, Arc::new(MockInference::new()), &CancellationToken::new()),
        Err(ConvertError::Config(_))
    ));
}
