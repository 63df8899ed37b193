#![forbid(unsafe_code)]

//! Per-language capability bundles.
//!
//! Every supported language maps to one grammar and three tree-sitter queries.
//! Capture conventions: `@name` marks a declared or called identifier and
//! `@path` marks an import specifier literal.

use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tree_sitter::Query;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    JavaScript,
    Jsx,
    TypeScript,
    Tsx,
    Python,
    Rust,
    Go,
    Java,
    C,
    Cpp,
}

/// How an import specifier is spelled in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecifierStyle {
    /// Already a relative or bare path (`./a`, `../lib/b.js`, `foo.h`).
    Path,
    /// Dotted module path with leading dots for relative levels (`..pkg.mod`).
    DottedRelative,
    /// Dotted fully-qualified name (`com.acme.Foo`).
    Dotted,
}

/// Query sources for one language, before compilation.
#[derive(Debug, Clone, Copy)]
pub struct QuerySources {
    pub symbol: &'static str,
    pub import: &'static str,
    pub call: &'static str,
}

/// Grammar plus the three compiled structural queries. A query that fails to
/// compile is kept as its error so only that query degrades.
pub struct LanguageBundle {
    pub language: Language,
    pub grammar: tree_sitter::Language,
    pub symbol_query: Result<Query, String>,
    pub import_query: Result<Query, String>,
    pub call_query: Result<Query, String>,
    pub specifier_style: SpecifierStyle,
}

impl std::fmt::Debug for LanguageBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageBundle")
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

impl LanguageBundle {
    pub fn new(language: Language, sources: QuerySources) -> Self {
        let grammar = language.grammar();
        let compile = |source: &str| Query::new(&grammar, source).map_err(|err| err.to_string());
        Self {
            language,
            symbol_query: compile(sources.symbol),
            import_query: compile(sources.import),
            call_query: compile(sources.call),
            specifier_style: language.specifier_style(),
            grammar,
        }
    }
}

static BUNDLES: [OnceLock<LanguageBundle>; Language::ALL.len()] =
    [const { OnceLock::new() }; Language::ALL.len()];

impl Language {
    pub const ALL: [Self; 10] = [
        Self::JavaScript,
        Self::Jsx,
        Self::TypeScript,
        Self::Tsx,
        Self::Python,
        Self::Rust,
        Self::Go,
        Self::Java,
        Self::C,
        Self::Cpp,
    ];

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "js" | "mjs" | "cjs" => Some(Self::JavaScript),
            "jsx" => Some(Self::Jsx),
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "py" => Some(Self::Python),
            "rs" => Some(Self::Rust),
            "go" => Some(Self::Go),
            "java" => Some(Self::Java),
            "c" | "h" => Some(Self::C),
            "cpp" | "cc" | "cxx" | "hpp" | "hh" => Some(Self::Cpp),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|v| v.to_str())
            .and_then(Self::from_extension)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::Jsx => "jsx",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Python => "python",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
        }
    }

    pub fn grammar(self) -> tree_sitter::Language {
        match self {
            Self::JavaScript | Self::Jsx => {
                tree_sitter::Language::new(tree_sitter_javascript::LANGUAGE)
            }
            Self::TypeScript => {
                tree_sitter::Language::new(tree_sitter_typescript::LANGUAGE_TYPESCRIPT)
            }
            Self::Tsx => tree_sitter::Language::new(tree_sitter_typescript::LANGUAGE_TSX),
            Self::Python => tree_sitter::Language::new(tree_sitter_python::LANGUAGE),
            Self::Rust => tree_sitter::Language::new(tree_sitter_rust::LANGUAGE),
            Self::Go => tree_sitter::Language::new(tree_sitter_go::LANGUAGE),
            Self::Java => tree_sitter::Language::new(tree_sitter_java::LANGUAGE),
            Self::C => tree_sitter::Language::new(tree_sitter_c::LANGUAGE),
            Self::Cpp => tree_sitter::Language::new(tree_sitter_cpp::LANGUAGE),
        }
    }

    pub fn query_sources(self) -> QuerySources {
        let (symbol, import, call) = match self {
            Self::JavaScript | Self::Jsx => (JS_SYMBOLS, JS_IMPORTS, JS_CALLS),
            Self::TypeScript | Self::Tsx => (TS_SYMBOLS, JS_IMPORTS, JS_CALLS),
            Self::Python => (PY_SYMBOLS, PY_IMPORTS, PY_CALLS),
            Self::Rust => (RS_SYMBOLS, RS_IMPORTS, RS_CALLS),
            Self::Go => (GO_SYMBOLS, GO_IMPORTS, GO_CALLS),
            Self::Java => (JAVA_SYMBOLS, JAVA_IMPORTS, JAVA_CALLS),
            Self::C => (C_SYMBOLS, C_IMPORTS, C_CALLS),
            Self::Cpp => (CPP_SYMBOLS, C_IMPORTS, C_CALLS),
        };
        QuerySources { symbol, import, call }
    }

    pub const fn specifier_style(self) -> SpecifierStyle {
        match self {
            Self::Python => SpecifierStyle::DottedRelative,
            Self::Java => SpecifierStyle::Dotted,
            _ => SpecifierStyle::Path,
        }
    }

    /// The shared bundle for this language, compiled on first use.
    pub fn bundle(self) -> &'static LanguageBundle {
        BUNDLES[self as usize].get_or_init(|| LanguageBundle::new(self, self.query_sources()))
    }
}

/// Bundle for a file path, or `None` for the unknown-language fallback.
pub fn bundle_for_path(path: &Path) -> Option<&'static LanguageBundle> {
    Language::from_path(path).map(Language::bundle)
}

/// Rewrites a specifier into the slash form the resolver understands.
pub fn normalize_specifier(specifier: &str, style: SpecifierStyle) -> String {
    match style {
        SpecifierStyle::Path => specifier.to_string(),
        SpecifierStyle::Dotted => specifier.replace('.', "/"),
        SpecifierStyle::DottedRelative => {
            let dots = specifier.chars().take_while(|c| *c == '.').count();
            let rest = specifier[dots..].replace('.', "/");
            match dots {
                0 => rest,
                1 if rest.is_empty() => ".".to_string(),
                1 => format!("./{rest}"),
                n => {
                    let up = vec![".."; n - 1].join("/");
                    if rest.is_empty() {
                        up
                    } else {
                        format!("{up}/{rest}")
                    }
                }
            }
        }
    }
}

const JS_SYMBOLS: &str = r#"
(function_declaration name: (identifier) @name)
(generator_function_declaration name: (identifier) @name)
(variable_declarator
    name: (identifier) @name
    value: [(arrow_function) (function_expression)])
(method_definition name: (property_identifier) @name)
"#;

const TS_SYMBOLS: &str = r#"
(function_declaration name: (identifier) @name)
(variable_declarator
    name: (identifier) @name
    value: [(arrow_function) (function_expression)])
(method_definition name: (property_identifier) @name)
"#;

const JS_IMPORTS: &str = r#"
(import_statement source: (string) @path)
(export_statement source: (string) @path)
(call_expression
    function: (identifier) @_fn
    arguments: (arguments (string) @path)
    (#eq? @_fn "require"))
"#;

const JS_CALLS: &str = r#"
(call_expression function: (identifier) @name)
(call_expression
    function: (member_expression property: (property_identifier) @name))
"#;

const PY_SYMBOLS: &str = r#"
(function_definition name: (identifier) @name)
"#;

const PY_IMPORTS: &str = r#"
(import_statement name: (dotted_name) @path)
(import_from_statement module_name: (dotted_name) @path)
(import_from_statement module_name: (relative_import) @path)
"#;

const PY_CALLS: &str = r#"
(call function: (identifier) @name)
(call function: (attribute attribute: (identifier) @name))
"#;

const RS_SYMBOLS: &str = r#"
(function_item name: (identifier) @name)
"#;

const RS_IMPORTS: &str = r#"
(mod_item name: (identifier) @path !body)
"#;

const RS_CALLS: &str = r#"
(call_expression function: (identifier) @name)
(call_expression function: (scoped_identifier name: (identifier) @name))
(call_expression function: (field_expression field: (field_identifier) @name))
"#;

const GO_SYMBOLS: &str = r#"
(function_declaration name: (identifier) @name)
(method_declaration name: (field_identifier) @name)
"#;

const GO_IMPORTS: &str = r#"
(import_spec path: (interpreted_string_literal) @path)
"#;

const GO_CALLS: &str = r#"
(call_expression function: (identifier) @name)
(call_expression function: (selector_expression field: (field_identifier) @name))
"#;

const JAVA_SYMBOLS: &str = r#"
(method_declaration name: (identifier) @name)
(constructor_declaration name: (identifier) @name)
"#;

const JAVA_IMPORTS: &str = r#"
(import_declaration (scoped_identifier) @path)
"#;

const JAVA_CALLS: &str = r#"
(method_invocation name: (identifier) @name)
"#;

const C_SYMBOLS: &str = r#"
(function_definition
    declarator: (function_declarator declarator: (identifier) @name))
"#;

const CPP_SYMBOLS: &str = r#"
(function_definition
    declarator: (function_declarator declarator: (identifier) @name))
(function_definition
    declarator: (function_declarator
        declarator: (qualified_identifier name: (identifier) @name)))
"#;

const C_IMPORTS: &str = r#"
(preproc_include path: (string_literal) @path)
"#;

const C_CALLS: &str = r#"
(call_expression function: (identifier) @name)
"#;
