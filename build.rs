use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Source roots that belong to this crate. Anything else under the package
// directory (reference material, target/) is not scanned.
const SOURCE_ROOTS: [&str; 4] = ["predict", "src", "tests", "benches"];

// One rule of the source hygiene gate: a line pattern plus the message shown
// when it matches.
struct Rule {
    pattern: &'static str,
    description: &'static str,
    comments_only: bool,
}

const RULES: [Rule; 3] = [
    Rule {
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        description: "#[allow(dead_code)] attributes are not allowed. Use the code or delete it.",
        comments_only: false,
    },
    Rule {
        pattern: r"(?:let|for|\(|,|\|)\s*(?:mut\s+)?\b_[a-zA-Z0-9_]+\b",
        description: "Underscore-prefixed bindings are not allowed. Use the value or remove it.",
        comments_only: false,
    },
    Rule {
        pattern: r"//.*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)",
        description: "Edit-history markers in comments are not allowed. Describe the code, not its history.",
        comments_only: true,
    },
];

// Collects every matching line of one file for a single rule.
struct ViolationCollector {
    violations: Vec<String>,
    file_path: PathBuf,
    comments_only: bool,
}

impl ViolationCollector {
    fn new(file_path: &Path, comments_only: bool) -> Self {
        Self {
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
            comments_only,
        }
    }

    fn check_and_get_error_message(&self, description: &str) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\nERROR: Found {} violation(s) in {}:\n",
            self.violations.len(),
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n{description}\n"));
        Some(error_msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        let is_comment = line_text.trim_start().starts_with("//");
        if self.comments_only != is_comment {
            return Ok(true);
        }

        self.violations.push(format!("{line_number}:{line_text}"));
        Ok(true)
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for root in SOURCE_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }

    if let Err(e) = scan_sources() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn scan_sources() -> Result<(), Box<dyn Error>> {
    let mut searcher = Searcher::new();

    for rule in &RULES {
        let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;

        for root in SOURCE_ROOTS {
            for entry in WalkDir::new(root)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
            {
                let path = entry.path();
                let mut collector = ViolationCollector::new(path, rule.comments_only);
                searcher.search_path(&matcher, path, &mut collector)?;

                if let Some(error_message) = collector.check_and_get_error_message(rule.description)
                {
                    return Err(error_message.into());
                }
            }
        }
    }

    Ok(())
}
