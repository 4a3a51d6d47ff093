use super::*;
use modernize_core::test_util::tempdir;

fn index() -> SemanticIndex {
    SemanticIndex::open(&Config::mock(), Path::new("unused"))
}

fn analysis(source: &str) -> AnalysisRecord {
    python_analyzer::analyze(source).unwrap()
}

const LEDGER: &str = r#""""General ledger posting."""
from erpnext.accounts import utils

def make_gl_entries(gl_map, cancel=False):
    """Posts ledger entries for a voucher."""
    merge_similar_entries(gl_map)

def merge_similar_entries(gl_map):
    return gl_map

class LedgerValidator:
    def check(self):
        pass
"#;

const TAX: &str = r#"def calculate_tax(amount, rate):
    return amount * rate
"#;

#[test]
fn index_analysis_writes_every_subject() {
    let index = index();
    let path = Path::new("/src/general_ledger.py");
    let summary = index
        .index_analysis(path, "general_ledger", &analysis(LEDGER))
        .unwrap();
    assert_eq!(
        summary,
        IndexSummary {
            files: 1,
            functions: 3,
            classes: 1,
            relations: 1,
        }
    );
    let stats = index.stats();
    assert_eq!((stats.files, stats.functions, stats.relations), (1, 4, 1));
    assert_eq!(
        index.file_meaning(path).unwrap(),
        "File general_ledger: Ledger management. General ledger posting. \
         Contains 3 functions and 1 classes."
    );

    // Re-indexing replaces rather than duplicates.
    index
        .index_analysis(path, "general_ledger", &analysis(LEDGER))
        .unwrap();
    assert_eq!(index.stats().functions, 4);
}

#[test]
fn search_is_ordered_and_bounded() {
    let index = index();
    index
        .index_analysis(Path::new("/src/gl.py"), "gl", &analysis(LEDGER))
        .unwrap();
    index
        .index_analysis(Path::new("/src/tax.py"), "tax", &analysis(TAX))
        .unwrap();

    let matches = index.search("calculate_tax amount rate", 3).unwrap();
    assert_eq!(matches.len(), 3);
    assert!(matches.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(matches[0].name.as_deref(), Some("calculate_tax"));
    assert_eq!(matches[0].subject, SubjectType::Function);

    let related = index.related(Path::new("/src/tax.py"), "calculate_tax", 10);
    assert!(!related.is_empty());
    assert!(related.iter().all(|m| m.source_path != Path::new("/src/tax.py")));
}

#[test]
fn remove_file_only_touches_that_file() {
    let index = index();
    index
        .index_analysis(Path::new("/src/gl.py"), "gl", &analysis(LEDGER))
        .unwrap();
    index
        .index_analysis(Path::new("/src/tax.py"), "tax", &analysis(TAX))
        .unwrap();
    assert_eq!(index.remove_file(Path::new("/src/gl.py")).unwrap(), 6);
    let stats = index.stats();
    assert_eq!((stats.files, stats.functions), (1, 1));
}

#[test]
fn disabled_index_is_empty() {
    let index = SemanticIndex::open(
        &Config {
            enabled: false,
            ..Config::mock()
        },
        Path::new("unused"),
    );
    let summary = index
        .index_analysis(Path::new("/src/tax.py"), "tax", &analysis(TAX))
        .unwrap();
    assert_eq!(summary, IndexSummary::default());
    assert!(index.search("tax", 5).unwrap().is_empty());
}

#[test]
fn persisted_index_survives_reopen() {
    let dir = tempdir().unwrap();
    let config = Config {
        persist: true,
        ..Config::mock()
    };
    let index = SemanticIndex::open(&config, dir.path());
    index
        .index_analysis(Path::new("/src/tax.py"), "tax", &analysis(TAX))
        .unwrap();
    index.flush().unwrap();
    assert!(dir.path().join(INDEX_FILE).exists());

    let reopened = SemanticIndex::open(&config, dir.path());
    assert_eq!(reopened.stats().files, 1);
}

#[test]
fn prune_drops_files_that_are_gone() {
    let dir = tempdir().unwrap();
    let config = Config {
        persist: true,
        ..Config::mock()
    };
    let index = SemanticIndex::open(&config, dir.path());
    index
        .index_analysis(Path::new("/src/gl.py"), "gl", &analysis(LEDGER))
        .unwrap();
    index
        .index_analysis(Path::new("/src/tax.py"), "tax", &analysis(TAX))
        .unwrap();
    index.flush().unwrap();

    // The next run only finds tax.py.
    let reopened = SemanticIndex::open(&config, dir.path());
    let keep = HashSet::from([Path::new("/src/tax.py")]);
    assert!(reopened.prune(&keep).unwrap() > 0);
    assert_eq!(reopened.stats().files, 1);
    assert!(reopened.file_meaning(Path::new("/src/gl.py")).is_none());
    assert!(reopened.file_meaning(Path::new("/src/tax.py")).is_some());
    assert_eq!(reopened.prune(&keep).unwrap(), 0);
}
