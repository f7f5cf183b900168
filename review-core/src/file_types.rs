//! File-type registry: classifies a changed path into a review category and
//! returns category-specific review guidance. Path patterns are checked
//! before extensions so that e.g. `**/k8s/**/*.yaml` resolves to
//! [`Category::Kubernetes`] rather than the generic yaml extension match.
//!
//! The registry is built once (its pattern/extension tables are immutable
//! after construction) and held by the application context; classification
//! results are memoized in a bounded LRU so repeated paths in the same PR
//! don't re-run glob matching.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use globset::{Glob, GlobSet, GlobSetBuilder};

pub const MAX_PATH_LENGTH: usize = 2000;
pub const FILE_CATEGORY_CACHE_SIZE: usize = 1000;
pub const DEFAULT_TOKEN_ESTIMATE: u32 = 350;

/// Closed set of review categories a file path can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Python,
    JavaScriptTypeScript,
    Go,
    Rust,
    Java,
    Terraform,
    Kubernetes,
    Dockerfile,
    CiCd,
    ConfigFormat,
    Web,
    DataQuery,
    Scripts,
    Docs,
    BuildPackage,
    Generic,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Python => "python",
            Category::JavaScriptTypeScript => "javascript_typescript",
            Category::Go => "go",
            Category::Rust => "rust",
            Category::Java => "java",
            Category::Terraform => "terraform",
            Category::Kubernetes => "kubernetes",
            Category::Dockerfile => "dockerfile",
            Category::CiCd => "ci_cd",
            Category::ConfigFormat => "config",
            Category::Web => "web",
            Category::DataQuery => "data_query",
            Category::Scripts => "scripts",
            Category::Docs => "docs",
            Category::BuildPackage => "build_package",
            Category::Generic => "generic",
        }
    }
}

/// Structured review guidance for one category.
#[derive(Debug, Clone)]
pub struct BestPractices {
    pub focus_areas: Vec<&'static str>,
    pub security_checks: Vec<&'static str>,
    pub common_issues: Vec<&'static str>,
    pub style_guidelines: Vec<&'static str>,
    pub performance_tips: Vec<&'static str>,
}

struct PatternRule {
    set: GlobSet,
    category: Category,
}

pub struct FileTypeRegistry {
    path_rules: Vec<PatternRule>,
    extensions: HashMap<&'static str, Category>,
    practices: HashMap<Category, BestPractices>,
    token_estimates: HashMap<Category, u32>,
    cache: Mutex<LruCache>,
}

impl FileTypeRegistry {
    /// Builds the full registry: path-pattern rules (checked first, in
    /// declaration order), the extension fallback map, and per-category
    /// guidance tables.
    pub fn new() -> Self {
        let path_rules = vec![
            pattern_rule(&["**/k8s/**/*.yaml", "**/k8s/**/*.yml", "**/kubernetes/**/*.yaml", "**/kubernetes/**/*.yml"], Category::Kubernetes),
            pattern_rule(&["**/.github/workflows/*.yml", "**/.github/workflows/*.yaml", "**/.gitlab-ci.yml", "**/Jenkinsfile"], Category::CiCd),
            pattern_rule(&["**/Dockerfile", "**/Dockerfile.*", "**/*.dockerfile"], Category::Dockerfile),
            pattern_rule(&["**/docs/**/*.md", "**/*.rst"], Category::Docs),
        ];

        let mut extensions: HashMap<&'static str, Category> = HashMap::new();
        for ext in ["py", "pyi"] {
            extensions.insert(ext, Category::Python);
        }
        for ext in ["js", "jsx", "ts", "tsx", "mjs", "cjs"] {
            extensions.insert(ext, Category::JavaScriptTypeScript);
        }
        extensions.insert("go", Category::Go);
        extensions.insert("rs", Category::Rust);
        for ext in ["java", "kt"] {
            extensions.insert(ext, Category::Java);
        }
        for ext in ["tf", "tfvars"] {
            extensions.insert(ext, Category::Terraform);
        }
        for ext in ["yaml", "yml", "json", "toml", "ini", "cfg"] {
            extensions.insert(ext, Category::ConfigFormat);
        }
        for ext in ["html", "css", "scss"] {
            extensions.insert(ext, Category::Web);
        }
        for ext in ["sql", "graphql"] {
            extensions.insert(ext, Category::DataQuery);
        }
        for ext in ["sh", "bash", "zsh"] {
            extensions.insert(ext, Category::Scripts);
        }
        for ext in ["md", "rst", "txt"] {
            extensions.insert(ext, Category::Docs);
        }
        for ext in ["lock", "gradle", "gemfile"] {
            extensions.insert(ext, Category::BuildPackage);
        }

        Self {
            path_rules,
            extensions,
            practices: default_practices(),
            token_estimates: default_token_estimates(),
            cache: Mutex::new(LruCache::new(FILE_CATEGORY_CACHE_SIZE)),
        }
    }

    /// Classifies `path` into a [`Category`]. Oversized or malformed paths
    /// (caller's responsibility to have already rejected via model
    /// validation) still resolve to [`Category::Generic`] rather than
    /// panicking.
    pub fn classify(&self, path: &str) -> Category {
        if path.len() > MAX_PATH_LENGTH || path.contains('\0') {
            return Category::Generic;
        }

        if let Some(hit) = self.cache.lock().unwrap().get(path) {
            return hit;
        }

        let category = self
            .path_rules
            .iter()
            .find(|rule| rule.set.is_match(path))
            .map(|rule| rule.category)
            .or_else(|| {
                let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
                self.extensions.get(ext.as_str()).copied()
            })
            .unwrap_or(Category::Generic);

        self.cache.lock().unwrap().put(path.to_string(), category);
        category
    }

    pub fn best_practices(&self, category: Category) -> &BestPractices {
        self.practices
            .get(&category)
            .unwrap_or_else(|| self.practices.get(&Category::Generic).expect("generic practices always present"))
    }

    pub fn token_estimate(&self, category: Category) -> u32 {
        self.token_estimates.get(&category).copied().unwrap_or(DEFAULT_TOKEN_ESTIMATE)
    }

    /// Renders best-practice guidance for a set of categories, capping the
    /// number of bullet points emitted per section at `max_practices`.
    pub fn format_best_practices_for_prompt(&self, categories: &[Category], max_practices: usize) -> String {
        let mut seen = std::collections::HashSet::new();
        let mut out = String::new();
        for &category in categories {
            if !seen.insert(category) {
                continue;
            }
            let bp = self.best_practices(category);
            out.push_str(&format!("### {}\n", category.as_str()));
            push_section(&mut out, "Focus areas", &bp.focus_areas, max_practices);
            push_section(&mut out, "Security checks", &bp.security_checks, max_practices);
            push_section(&mut out, "Common issues", &bp.common_issues, max_practices);
            push_section(&mut out, "Style", &bp.style_guidelines, max_practices);
            push_section(&mut out, "Performance", &bp.performance_tips, max_practices);
        }
        out
    }
}

impl Default for FileTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn push_section(out: &mut String, label: &str, items: &[&'static str], max: usize) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("{label}:\n"));
    for item in items.iter().take(max) {
        out.push_str(&format!("- {item}\n"));
    }
}

fn pattern_rule(patterns: &[&str], category: Category) -> PatternRule {
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        builder.add(Glob::new(p).expect("static glob pattern must compile"));
    }
    PatternRule {
        set: builder.build().expect("static glob set must compile"),
        category,
    }
}

/// Minimal LRU keyed by path: a hash map plus a recency queue, evicting the
/// least-recently-used entry once the cache exceeds its capacity.
struct LruCache {
    capacity: usize,
    map: HashMap<String, Category>,
    order: VecDeque<String>,
}

impl LruCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<Category> {
        let value = self.map.get(key).copied()?;
        self.touch(key);
        Some(value)
    }

    fn put(&mut self, key: String, value: Category) {
        if self.map.insert(key.clone(), value).is_some() {
            self.touch(&key);
            return;
        }
        self.order.push_back(key);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            }
        }
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).unwrap();
            self.order.push_back(k);
        }
    }
}

fn default_token_estimates() -> HashMap<Category, u32> {
    let mut m = HashMap::new();
    m.insert(Category::Python, 400);
    m.insert(Category::JavaScriptTypeScript, 380);
    m.insert(Category::Go, 360);
    m.insert(Category::Rust, 400);
    m.insert(Category::Java, 420);
    m.insert(Category::Terraform, 350);
    m.insert(Category::Kubernetes, 300);
    m.insert(Category::Dockerfile, 250);
    m.insert(Category::CiCd, 280);
    m.insert(Category::ConfigFormat, 200);
    m.insert(Category::Web, 300);
    m.insert(Category::DataQuery, 320);
    m.insert(Category::Scripts, 260);
    m.insert(Category::Docs, 200);
    m.insert(Category::BuildPackage, 220);
    m.insert(Category::Generic, DEFAULT_TOKEN_ESTIMATE);
    m
}

fn default_practices() -> HashMap<Category, BestPractices> {
    let mut m = HashMap::new();
    m.insert(
        Category::Python,
        BestPractices {
            focus_areas: vec!["type hints", "exception handling", "resource cleanup"],
            security_checks: vec!["injection via string formatting", "unsafe deserialization (pickle/yaml.load)", "subprocess with shell=True"],
            common_issues: vec!["mutable default arguments", "broad except clauses", "missing context managers"],
            style_guidelines: vec!["PEP 8 naming", "docstrings on public functions"],
            performance_tips: vec!["avoid quadratic list operations", "prefer generators for large iterables"],
        },
    );
    m.insert(
        Category::JavaScriptTypeScript,
        BestPractices {
            focus_areas: vec!["async/await error handling", "type soundness"],
            security_checks: vec!["XSS via unescaped interpolation", "eval/Function constructor usage"],
            common_issues: vec!["unhandled promise rejections", "== instead of ==="],
            style_guidelines: vec!["consistent module import style"],
            performance_tips: vec!["avoid unnecessary re-renders", "debounce expensive handlers"],
        },
    );
    m.insert(
        Category::Go,
        BestPractices {
            focus_areas: vec!["error wrapping", "goroutine lifecycle"],
            security_checks: vec!["unchecked error from crypto/rand", "command injection via exec.Command"],
            common_issues: vec!["ignored errors", "goroutine leaks"],
            style_guidelines: vec!["gofmt conformance"],
            performance_tips: vec!["avoid unnecessary allocations in hot loops"],
        },
    );
    m.insert(
        Category::Rust,
        BestPractices {
            focus_areas: vec!["ownership/borrowing correctness", "error propagation"],
            security_checks: vec!["unsafe blocks without justification", "unchecked integer casts"],
            common_issues: vec!["unwrap/expect in library code", "needless clone"],
            style_guidelines: vec!["idiomatic iterator chains"],
            performance_tips: vec!["avoid unnecessary heap allocation"],
        },
    );
    m.insert(
        Category::Java,
        BestPractices {
            focus_areas: vec!["exception hierarchy", "null handling"],
            security_checks: vec!["deserialization of untrusted data", "SQL built via string concatenation"],
            common_issues: vec!["resource leaks (unclosed streams)", "mutable shared state"],
            style_guidelines: vec!["standard Java naming conventions"],
            performance_tips: vec!["avoid boxing in hot paths"],
        },
    );
    m.insert(
        Category::Terraform,
        BestPractices {
            focus_areas: vec!["state management", "variable validation"],
            security_checks: vec!["hardcoded credentials", "overly permissive IAM policies"],
            common_issues: vec!["missing lifecycle blocks on stateful resources"],
            style_guidelines: vec!["consistent resource naming"],
            performance_tips: vec!["avoid unnecessary resource recreation"],
        },
    );
    m.insert(
        Category::Kubernetes,
        BestPractices {
            focus_areas: vec!["resource limits/requests", "liveness/readiness probes"],
            security_checks: vec!["privileged containers", "hostPath mounts", "missing securityContext"],
            common_issues: vec!["missing resource limits", "latest image tags"],
            style_guidelines: vec!["consistent label/selector schemes"],
            performance_tips: vec!["right-sized resource requests"],
        },
    );
    m.insert(
        Category::Dockerfile,
        BestPractices {
            focus_areas: vec!["layer caching", "image size"],
            security_checks: vec!["running as root", "embedding secrets in layers"],
            common_issues: vec!["unpinned base image tags"],
            style_guidelines: vec!["multi-stage build structure"],
            performance_tips: vec!["combine RUN layers where sensible"],
        },
    );
    m.insert(
        Category::CiCd,
        BestPractices {
            focus_areas: vec!["pipeline secret handling", "job dependency correctness"],
            security_checks: vec!["secrets printed in logs", "untrusted script execution"],
            common_issues: vec!["missing concurrency/cancel-in-progress guards"],
            style_guidelines: vec!["consistent job naming"],
            performance_tips: vec!["cache dependencies between runs"],
        },
    );
    m.insert(
        Category::ConfigFormat,
        BestPractices {
            focus_areas: vec!["schema correctness"],
            security_checks: vec!["plaintext secrets in config"],
            common_issues: vec!["duplicate keys", "inconsistent indentation"],
            style_guidelines: vec!["stable key ordering where it matters"],
            performance_tips: vec![],
        },
    );
    m.insert(
        Category::Web,
        BestPractices {
            focus_areas: vec!["accessibility", "responsive layout"],
            security_checks: vec!["inline event handlers from untrusted content"],
            common_issues: vec!["missing alt text", "unscoped CSS"],
            style_guidelines: vec!["BEM-style class naming"],
            performance_tips: vec!["avoid layout thrashing"],
        },
    );
    m.insert(
        Category::DataQuery,
        BestPractices {
            focus_areas: vec!["query correctness", "index usage"],
            security_checks: vec!["string-concatenated SQL", "missing parameterization"],
            common_issues: vec!["N+1 query patterns"],
            style_guidelines: vec!["consistent keyword casing"],
            performance_tips: vec!["avoid SELECT *", "verify index coverage for filters"],
        },
    );
    m.insert(
        Category::Scripts,
        BestPractices {
            focus_areas: vec!["error propagation (set -e)", "quoting"],
            security_checks: vec!["unquoted variable expansion", "curl | sh patterns"],
            common_issues: vec!["missing set -euo pipefail"],
            style_guidelines: vec!["shellcheck-clean"],
            performance_tips: vec![],
        },
    );
    m.insert(
        Category::Docs,
        BestPractices {
            focus_areas: vec!["accuracy relative to code", "broken links"],
            security_checks: vec![],
            common_issues: vec!["outdated examples"],
            style_guidelines: vec!["consistent heading levels"],
            performance_tips: vec![],
        },
    );
    m.insert(
        Category::BuildPackage,
        BestPractices {
            focus_areas: vec!["dependency pinning", "lockfile consistency"],
            security_checks: vec!["dependency confusion risk from unscoped packages"],
            common_issues: vec!["unpinned transitive dependencies"],
            style_guidelines: vec![],
            performance_tips: vec![],
        },
    );
    m.insert(
        Category::Generic,
        BestPractices {
            focus_areas: vec!["general correctness and readability"],
            security_checks: vec!["hardcoded secrets"],
            common_issues: vec!["dead code", "unclear naming"],
            style_guidelines: vec!["project-consistent formatting"],
            performance_tips: vec![],
        },
    );
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_pattern_takes_priority_over_extension() {
        let registry = FileTypeRegistry::new();
        assert_eq!(registry.classify("deploy/k8s/base/service.yaml"), Category::Kubernetes);
        assert_eq!(registry.classify("config/app.yaml"), Category::ConfigFormat);
    }

    #[test]
    fn test_classify_falls_back_to_generic_for_unknown_extension() {
        let registry = FileTypeRegistry::new();
        assert_eq!(registry.classify("weird.xyz123"), Category::Generic);
    }

    #[test]
    fn test_classify_rejects_oversized_path() {
        let registry = FileTypeRegistry::new();
        let long_path = "a".repeat(MAX_PATH_LENGTH + 1);
        assert_eq!(registry.classify(&long_path), Category::Generic);
    }

    #[test]
    fn test_classify_is_cached_and_stable() {
        let registry = FileTypeRegistry::new();
        let first = registry.classify("src/main.rs");
        let second = registry.classify("src/main.rs");
        assert_eq!(first, second);
        assert_eq!(first, Category::Rust);
    }

    #[test]
    fn test_lru_cache_evicts_oldest_entry_beyond_capacity() {
        let registry = FileTypeRegistry::new();
        for i in 0..FILE_CATEGORY_CACHE_SIZE + 10 {
            registry.classify(&format!("pkg/file_{i}.py"));
        }
        let cache = registry.cache.lock().unwrap();
        assert!(cache.map.len() <= FILE_CATEGORY_CACHE_SIZE);
    }

    #[test]
    fn test_format_best_practices_respects_max_practices_cap() {
        let registry = FileTypeRegistry::new();
        let rendered = registry.format_best_practices_for_prompt(&[Category::Python], 1);
        assert_eq!(rendered.matches("- ").count(), 3);
    }
}
