use super::*;

/// Toolchain double with canned results.
#[derive(Default)]
struct FakeToolchain {
    compiles: bool,
    format_errors: Vec<String>,
    vet: Vec<String>,
    tests: TestResult,
}

impl GoToolchain for FakeToolchain {
    fn name(&self) -> &str {
        "fake"
    }

    fn format_check(&self, path: &Path) -> Result<FormatCheck, ValidateError> {
        assert!(path.exists());
        Ok(FormatCheck {
            errors: self.format_errors.clone(),
            unformatted: false,
        })
    }

    fn compile(&self, _dir: &Path) -> Result<CompileResult, ValidateError> {
        Ok(CompileResult {
            success: self.compiles,
            diagnostics: vec![],
        })
    }

    fn vet(&self, _dir: &Path) -> Result<Vec<String>, ValidateError> {
        Ok(self.vet.clone())
    }

    fn test(&self, _dir: &Path) -> Result<TestResult, ValidateError> {
        Ok(self.tests)
    }
}

const GO: &str = "package tax\n\nfunc CalculateTax(amount int64, rate int64) int64 {\n\treturn amount * rate / 100\n}\n";

fn analysis() -> AnalysisRecord {
    python_analyzer::analyze("def calculate_tax(amount, rate):\n    return amount * rate / 100\n")
        .unwrap()
}

#[test]
fn without_toolchain_only_static_signals_score() {
    let validator = Validator::open(&Config::mock());
    assert!(!validator.has_toolchain());
    assert!(matches!(
        validator.validate_compilation(Path::new(".")),
        Err(ValidateError::NoToolchain)
    ));
    let module = validator.check_module(Path::new("."));
    let assessment = validator.assess(GO, "tax.go", Some(&analysis()), &module, None);
    assert_eq!(
        assessment.signals,
        Signals {
            syntax_valid: Some(true),
            compiles: None,
            unit_tests: None,
            integration_tests: None,
            business_rules: Some(1.0),
            lint: Some(1.0),
        }
    );
    assert_eq!(assessment.confidence.score, 40.0);
    assert_eq!(assessment.confidence.review, ReviewLevel::FullReview);
}

#[test]
fn toolchain_signals_feed_the_score() {
    let toolchain = FakeToolchain {
        compiles: true,
        vet: vec!["./tax.go:3:1: suspicious shift".into(), "./other.go:1:1: x".into()],
        tests: TestResult {
            passed: 4,
            failed: 0,
        },
        ..FakeToolchain::default()
    };
    let config = Config {
        run_tests: true,
        ..Config::mock()
    };
    let validator = Validator::new(&config, Some(Box::new(toolchain)));
    let module = validator.check_module(Path::new("/out/tax"));
    assert_eq!(module.vet_diagnostics_for("tax.go"), Some(1));
    let assessment =
        validator.assess(GO, "tax.go", Some(&analysis()), &module, Some(1.0));
    // Everything passes except one vet diagnostic: lint 0.9.
    assert_eq!(assessment.confidence.score, 99.0);
    assert_eq!(assessment.confidence.review, ReviewLevel::NoReview);
}

#[test]
fn gofmt_errors_invalidate_syntax() {
    let toolchain = FakeToolchain {
        format_errors: vec!["/tmp/x.go:4:9: expected ';', found 'IDENT'".into()],
        ..FakeToolchain::default()
    };
    let validator = Validator::new(&Config::mock(), Some(Box::new(toolchain)));
    let result = validator.validate_syntax(GO);
    assert!(!result.valid);
    assert_eq!(result.diagnostics[0].line, 4);
    // The free function only runs the built-in check.
    assert!(validate_syntax(GO).valid);
}

#[test]
fn thresholds_come_from_config() {
    let config = Config {
        thresholds: Thresholds {
            no_review: 30.0,
            spot_check: 20.0,
            focused_review: 10.0,
        },
        ..Config::mock()
    };
    let validator = Validator::new(&config, None);
    let assessment = validator.assess(GO, "tax.go", Some(&analysis()), &ModuleCheck::default(), None);
    assert_eq!(assessment.confidence.review, ReviewLevel::NoReview);
}

#[test]
fn missing_config_table_uses_defaults() {
    let value: Config = modernize_core::config::Config::mock()
        .tool_config("absent", Config::FIELDS)
        .unwrap();
    assert!(value.use_toolchain);
    assert_eq!(value.weights, Weights::default());
}
