//! Places translated Go files into per-package directories under the output root.
//!
//! The package for a file is picked by keyword matching on its file name against an ordered rule
//! table; the first matching rule wins. Inputs that would land on the same Go file are told apart
//! by their directories, so every input has its own target on every run. Writes replace existing
//! files of the same name.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write as _};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Maps file names containing any of `keywords` to the Go package `module`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ModuleRule {
    pub keywords: Vec<String>,
    pub module: String,
}

impl ModuleRule {
    fn new(keywords: &[&str], module: &str) -> ModuleRule {
        ModuleRule {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            module: module.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Checked in order.
    pub rules: Vec<ModuleRule>,
    pub default_module: String,
    /// Module path written to `go.mod` when the output root has none.
    pub go_module_path: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            rules: vec![
                ModuleRule::new(&["invoice"], "invoice"),
                ModuleRule::new(&["ledger", "journal"], "ledger"),
                ModuleRule::new(&["tax"], "tax"),
                ModuleRule::new(&["party"], "party"),
                ModuleRule::new(&["payment"], "payment"),
            ],
            default_module: "common".into(),
            go_module_path: "modernized".into(),
        }
    }
}

impl Config {
    pub const FIELDS: &[&str] = &["rules", "default_module", "go_module_path"];

    /// Returns a mock config for testing.
    pub fn mock() -> Config {
        Config::default()
    }

    pub fn validate(&self) {
        let modules = self.rules.iter().map(|r| &r.module);
        for module in modules.chain([&self.default_module]) {
            if !is_package_name(module) {
                warn!("tools.organize_output: `{module}` is not a valid Go package name");
            }
        }
        if self.rules.iter().any(|r| r.keywords.is_empty()) {
            warn!("tools.organize_output: a rule without keywords never matches");
        }
    }
}

fn is_package_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> OrganizeError + '_ {
    move |source| OrganizeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// First rule whose keyword occurs in `file_name` (case-insensitively), else `default`.
pub fn classify<'r>(file_name: &str, rules: &'r [ModuleRule], default: &'r str) -> &'r str {
    let lower = file_name.to_lowercase();
    rules
        .iter()
        .find(|rule| rule.keywords.iter().any(|k| lower.contains(&k.to_lowercase())))
        .map_or(default, |rule| rule.module.as_str())
}

/// Go file name for a Python file name: the stem without surrounding underscores, plus `.go`.
/// Stems ending in `_test` get a suffix so Go does not treat the file as a test.
pub fn go_file_name(python_file_name: &str) -> String {
    with_go_extension(&go_stem(python_file_name))
}

fn go_stem(python_file_name: &str) -> String {
    let stem = Path::new(python_file_name)
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    match stem.trim_matches('_') {
        "" => "module".into(),
        stem => stem.to_string(),
    }
}

fn with_go_extension(stem: &str) -> String {
    if stem.ends_with("_test") {
        format!("{stem}_py.go")
    } else {
        format!("{stem}.go")
    }
}

/// Directory names of `source`, outermost first, reduced to characters valid in a Go file name.
fn dir_names(source: &Path) -> Vec<String> {
    let Some(parent) = source.parent() else {
        return Vec::new();
    };
    parent
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(sanitize(&name.to_string_lossy())),
            _ => None,
        })
        .filter(|name| !name.is_empty())
        .collect()
}

fn sanitize(name: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    name.trim_matches('_').to_string()
}

/// `stem` behind the innermost `depth` directory names.
fn prefixed(stem: &str, dirs: &[String], depth: usize) -> String {
    let start = dirs.len().saturating_sub(depth);
    let mut parts: Vec<&str> = dirs[start..].iter().map(String::as_str).collect();
    parts.push(stem);
    parts.join("_")
}

fn all_distinct(names: &[String]) -> bool {
    names.iter().collect::<HashSet<_>>().len() == names.len()
}

/// Where one input goes: the Go package directory and the file name inside it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub module: String,
    pub file_name: String,
}

pub struct Organizer {
    root: PathBuf,
    rules: Vec<ModuleRule>,
    default_module: String,
    go_module_path: String,
}

impl Organizer {
    pub fn new(root: &Path, config: &Config) -> Organizer {
        Organizer {
            root: root.to_path_buf(),
            rules: config.rules.clone(),
            default_module: config.default_module.clone(),
            go_module_path: config.go_module_path.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn classify(&self, file_name: &str) -> &str {
        classify(file_name, &self.rules, &self.default_module)
    }

    /// Placements for `sources`, given relative to the input root, in the same order.
    ///
    /// A file keeps the plain name from [go_file_name] unless another input maps to the same
    /// target. Colliding inputs are prefixed with as many of their innermost directory names as it
    /// takes to tell them apart (`a/utils.py` becomes `a_utils.go`), and any name still taken gets
    /// a numeric suffix in path order. The result depends only on the set of sources.
    pub fn place(&self, sources: &[&Path]) -> Vec<Placement> {
        let mut groups: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
        for (i, source) in sources.iter().enumerate() {
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let module = self.classify(&name).to_string();
            groups.entry((module, go_stem(&name))).or_default().push(i);
        }

        // (module, stem, renamed) per source.
        let mut stems: Vec<(String, String, bool)> = vec![Default::default(); sources.len()];
        for ((module, stem), members) in groups {
            if let [only] = members.as_slice() {
                stems[*only] = (module, stem, false);
                continue;
            }
            let dirs: Vec<Vec<String>> = members.iter().map(|&i| dir_names(sources[i])).collect();
            let deepest = dirs.iter().map(Vec::len).max().unwrap_or(0);
            let mut names = Vec::new();
            for depth in 1..=deepest.max(1) {
                names = dirs.iter().map(|d| prefixed(&stem, d, depth)).collect();
                if all_distinct(&names) {
                    break;
                }
            }
            for (&i, name) in members.iter().zip(names) {
                let renamed = name != stem;
                stems[i] = (module.clone(), name, renamed);
            }
        }

        // Unrenamed files claim their names first, then everything in path order.
        let mut order: Vec<usize> = (0..sources.len()).collect();
        order.sort_by(|&a, &b| (stems[a].2, sources[a]).cmp(&(stems[b].2, sources[b])));
        let mut taken: HashSet<(String, String)> = HashSet::new();
        let mut placements: Vec<Option<Placement>> = vec![None; sources.len()];
        for i in order {
            let (ref module, ref stem, renamed) = stems[i];
            let mut file_name = with_go_extension(stem);
            let mut n = 2;
            while !taken.insert((module.clone(), file_name.clone())) {
                file_name = with_go_extension(&format!("{stem}_{n}"));
                n += 1;
            }
            if renamed || n > 2 {
                info!(
                    "{} shares its name with another input; writing it as {module}/{file_name}",
                    sources[i].display()
                );
            }
            placements[i] = Some(Placement {
                module: module.clone(),
                file_name,
            });
        }
        placements.into_iter().flatten().collect()
    }

    pub fn module_dir(&self, module: &str) -> PathBuf {
        self.root.join(module)
    }

    /// Where `write` puts `file_name` in `module`.
    pub fn target_path(&self, module: &str, file_name: &str) -> PathBuf {
        self.module_dir(module).join(file_name)
    }

    /// Writes `content` to `<root>/<module>/<file_name>`, creating the directory when needed and
    /// replacing any existing file. The content goes to a temporary file in the same directory
    /// first, so the target is never observed half-written.
    pub fn write(&self, module: &str, file_name: &str, content: &str) -> Result<PathBuf, OrganizeError> {
        let dir = self.module_dir(module);
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        let path = dir.join(file_name);
        let mut file = tempfile::NamedTempFile::new_in(&dir).map_err(io_error(&dir))?;
        file.write_all(content.as_bytes()).map_err(io_error(&path))?;
        file.persist(&path).map_err(|e| io_error(&path)(e.error))?;
        debug!("Wrote {}", path.display());
        Ok(path)
    }

    /// Like [Organizer::write], but leaves the file untouched when it already holds `content`.
    /// Returns the path and whether it was written.
    pub fn write_if_changed(
        &self,
        module: &str,
        file_name: &str,
        content: &str,
    ) -> Result<(PathBuf, bool), OrganizeError> {
        let path = self.target_path(module, file_name);
        match fs::read(&path) {
            Ok(existing) if existing == content.as_bytes() => Ok((path, false)),
            _ => Ok((self.write(module, file_name, content)?, true)),
        }
    }

    /// Writes a minimal `go.mod` at the root unless one exists. Returns whether it was written.
    pub fn ensure_go_mod(&self) -> Result<bool, OrganizeError> {
        let path = self.root.join("go.mod");
        if path.exists() {
            return Ok(false);
        }
        fs::create_dir_all(&self.root).map_err(io_error(&self.root))?;
        let content = format!("module {}\n\ngo 1.21\n", self.go_module_path);
        fs::write(&path, content).map_err(io_error(&path))?;
        info!("Created {}", path.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modernize_core::test_util::tempdir;

    #[test]
    fn classification_is_ordered_and_pure() {
        let config = Config::default();
        let classify = |name| classify(name, &config.rules, &config.default_module);
        assert_eq!(classify("sales_invoice.py"), "invoice");
        // `invoice` comes before `tax` in the table.
        assert_eq!(classify("invoice_tax.py"), "invoice");
        assert_eq!(classify("Journal_Entry.py"), "ledger");
        assert_eq!(classify("gst_tax_report.py"), "tax");
        assert_eq!(classify("party.py"), "party");
        assert_eq!(classify("payment_entry.py"), "payment");
        assert_eq!(classify("utils.py"), "common");
        for _ in 0..3 {
            assert_eq!(classify("tax_rule.py"), "tax");
        }
    }

    #[test]
    fn custom_rules() {
        let config = Config {
            rules: vec![ModuleRule::new(&["budget"], "budget")],
            default_module: "misc".into(),
            ..Config::default()
        };
        let organizer = Organizer::new(Path::new("/out"), &config);
        assert_eq!(organizer.classify("budget.py"), "budget");
        assert_eq!(organizer.classify("invoice.py"), "misc");
    }

    #[test]
    fn go_file_names() {
        assert_eq!(go_file_name("sales_invoice.py"), "sales_invoice.go");
        assert_eq!(go_file_name("__init__.py"), "init.go");
        assert_eq!(go_file_name("invoice_test.py"), "invoice_test_py.go");
        assert_eq!(go_file_name("_private.py"), "private.go");
        assert_eq!(go_file_name("__.py"), "module.go");
    }

    #[test]
    fn colliding_inputs_get_their_own_names() {
        let organizer = Organizer::new(Path::new("/out"), &Config::mock());
        let place = |sources: &[&str]| -> Vec<(String, String)> {
            let sources: Vec<&Path> = sources.iter().map(Path::new).collect();
            organizer
                .place(&sources)
                .into_iter()
                .map(|p| (p.module, p.file_name))
                .collect()
        };
        let pair = |module: &str, name: &str| (module.to_string(), name.to_string());

        assert_eq!(
            place(&["a/utils.py", "b/utils.py", "sales_invoice.py"]),
            [
                pair("common", "a_utils.go"),
                pair("common", "b_utils.go"),
                pair("invoice", "sales_invoice.go"),
            ]
        );
        // Input order does not matter.
        assert_eq!(
            place(&["b/utils.py", "a/utils.py"]),
            [pair("common", "b_utils.go"), pair("common", "a_utils.go")]
        );
        // One directory level is not always enough.
        assert_eq!(
            place(&["x/core/utils.py", "y/core/utils.py", "z/utils.py"]),
            [
                pair("common", "x_core_utils.go"),
                pair("common", "y_core_utils.go"),
                pair("common", "z_utils.go"),
            ]
        );
        // A file at the root keeps the plain name.
        assert_eq!(
            place(&["utils.py", "a/utils.py"]),
            [pair("common", "utils.go"), pair("common", "a_utils.go")]
        );
        // A prefixed name never takes one that an input already owns.
        assert_eq!(
            place(&["a/utils.py", "b/utils.py", "a_utils.py"]),
            [
                pair("common", "a_utils_2.go"),
                pair("common", "b_utils.go"),
                pair("common", "a_utils.go"),
            ]
        );
        // Prefixing keeps Go from reading the result as a test file.
        assert_eq!(
            place(&["pkg/test.py", "lib/test.py"]),
            [pair("common", "pkg_test_py.go"), pair("common", "lib_test_py.go")]
        );
        // Sources that differ only in characters Go file names avoid still separate.
        assert_eq!(
            place(&["my-app/utils.py", "my_app/utils.py"]),
            [pair("common", "my_app_utils.go"), pair("common", "my_app_utils_2.go")]
        );
        // Different packages do not collide.
        assert_eq!(
            place(&["a/tax.py", "b/ledger.py"]),
            [pair("tax", "tax.go"), pair("ledger", "ledger.go")]
        );
    }

    #[test]
    fn write_creates_and_overwrites() {
        let dir = tempdir().unwrap();
        let organizer = Organizer::new(dir.path(), &Config::mock());
        let path = organizer.write("tax", "tax.go", "package tax\n").unwrap();
        assert_eq!(path, dir.path().join("tax").join("tax.go"));
        organizer.write("tax", "tax.go", "package tax\n\nvar X = 1\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "package tax\n\nvar X = 1\n");
        // No temporary files are left next to the output.
        assert_eq!(fs::read_dir(dir.path().join("tax")).unwrap().count(), 1);
    }

    #[test]
    fn unchanged_content_is_not_rewritten() {
        let dir = tempdir().unwrap();
        let organizer = Organizer::new(dir.path(), &Config::mock());
        let (path, written) = organizer.write_if_changed("tax", "tax.go", "package tax\n").unwrap();
        assert!(written);
        let modified = fs::metadata(&path).unwrap().modified().unwrap();
        let (_, written) = organizer.write_if_changed("tax", "tax.go", "package tax\n").unwrap();
        assert!(!written);
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), modified);
        let (_, written) = organizer.write_if_changed("tax", "tax.go", "package tax\n\n").unwrap();
        assert!(written);
    }

    #[test]
    fn go_mod_is_written_once() {
        let dir = tempdir().unwrap();
        let organizer = Organizer::new(&dir.path().join("out"), &Config::mock());
        assert!(organizer.ensure_go_mod().unwrap());
        assert!(!organizer.ensure_go_mod().unwrap());
        assert_eq!(
            fs::read_to_string(dir.path().join("out").join("go.mod")).unwrap(),
            "module modernized\n\ngo 1.21\n"
        );
    }
}
