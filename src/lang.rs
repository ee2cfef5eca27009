//! Language detection and tree-sitter grammar loading

use std::path::Path;
use tree_sitter::Language;

use crate::preprocess::BlockKind;

/// Languages codewatch recognises in a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    TypeScript,
    Tsx,
    JavaScript,
    Jsx,
    Rust,
    Python,
    Go,
    Java,
    C,
    Cpp,
    CSharp,
    Kotlin,
    Bash,
    // Tagged only; no structural parser
    Ruby,
    Php,
    Swift,
    Sql,
    Html,
    Css,
    Json,
    Yaml,
    Toml,
    Xml,
    Markdown,
}

impl Lang {
    /// Detect language from file path extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension().and_then(|e| e.to_str())?;
        Self::from_extension(ext)
    }

    /// Detect language from file extension string
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "js" | "mjs" | "cjs" => Some(Self::JavaScript),
            "jsx" => Some(Self::Jsx),
            "rs" => Some(Self::Rust),
            "py" | "pyi" => Some(Self::Python),
            "go" => Some(Self::Go),
            "java" => Some(Self::Java),
            "c" | "h" => Some(Self::C),
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Some(Self::Cpp),
            "cs" => Some(Self::CSharp),
            "kt" | "kts" => Some(Self::Kotlin),
            "sh" | "bash" | "zsh" => Some(Self::Bash),
            "rb" => Some(Self::Ruby),
            "php" => Some(Self::Php),
            "swift" => Some(Self::Swift),
            "sql" => Some(Self::Sql),
            "html" | "htm" => Some(Self::Html),
            "css" | "scss" | "sass" => Some(Self::Css),
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            "xml" | "pom" | "csproj" => Some(Self::Xml),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }

    /// Detect language from a code-fence info string (```python, ```ts ...)
    pub fn from_fence_tag(tag: &str) -> Option<Self> {
        let tag = tag.split_whitespace().next()?.to_lowercase();
        match tag.as_str() {
            "typescript" => Some(Self::TypeScript),
            "javascript" => Some(Self::JavaScript),
            "rust" => Some(Self::Rust),
            "python" => Some(Self::Python),
            "golang" => Some(Self::Go),
            "csharp" | "c#" => Some(Self::CSharp),
            "kotlin" => Some(Self::Kotlin),
            "shell" | "zsh" => Some(Self::Bash),
            "ruby" => Some(Self::Ruby),
            "markdown" => Some(Self::Markdown),
            "c++" => Some(Self::Cpp),
            other => Self::from_extension(other),
        }
    }

    /// Get the canonical name of the language
    pub fn name(&self) -> &'static str {
        match self {
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::JavaScript => "javascript",
            Self::Jsx => "jsx",
            Self::Rust => "rust",
            Self::Python => "python",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Kotlin => "kotlin",
            Self::Bash => "bash",
            Self::Ruby => "ruby",
            Self::Php => "php",
            Self::Swift => "swift",
            Self::Sql => "sql",
            Self::Html => "html",
            Self::Css => "css",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
            Self::Xml => "xml",
            Self::Markdown => "markdown",
        }
    }

    /// Get the tree-sitter Language, if structural parsing is available
    pub fn tree_sitter_language(&self) -> Option<Language> {
        let language = match self {
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::JavaScript | Self::Jsx => tree_sitter_javascript::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
            Self::Java => tree_sitter_java::LANGUAGE.into(),
            Self::C => tree_sitter_c::LANGUAGE.into(),
            Self::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Self::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
            Self::Kotlin => tree_sitter_kotlin_ng::LANGUAGE.into(),
            Self::Bash => tree_sitter_bash::LANGUAGE.into(),
            _ => return None,
        };
        Some(language)
    }

    /// Get the language family for shared block rules
    pub fn family(&self) -> LangFamily {
        match self {
            Self::TypeScript | Self::Tsx | Self::JavaScript | Self::Jsx => LangFamily::JavaScript,
            Self::Rust => LangFamily::Rust,
            Self::Python => LangFamily::Python,
            Self::Go => LangFamily::Go,
            Self::Java | Self::CSharp | Self::Kotlin => LangFamily::Jvm,
            Self::C | Self::Cpp => LangFamily::CFamily,
            Self::Bash => LangFamily::Shell,
            _ => LangFamily::Unstructured,
        }
    }

    /// How a top-level syntax node participates in block splitting
    pub fn node_role(&self, node_kind: &str) -> NodeRole {
        use BlockKind::{Class, Function, Module};
        match (self.family(), node_kind) {
            (LangFamily::Rust, "function_item") => NodeRole::Block(Function),
            (
                LangFamily::Rust,
                "struct_item" | "enum_item" | "trait_item" | "impl_item" | "union_item",
            ) => NodeRole::Block(Class),
            (LangFamily::Rust, "mod_item" | "macro_definition") => NodeRole::Block(Module),

            (LangFamily::Python, "function_definition") => NodeRole::Block(Function),
            (LangFamily::Python, "class_definition") => NodeRole::Block(Class),
            (LangFamily::Python, "decorated_definition") => NodeRole::Wrapper,

            (
                LangFamily::JavaScript,
                "function_declaration" | "generator_function_declaration",
            ) => NodeRole::Block(Function),
            (
                LangFamily::JavaScript,
                "class_declaration"
                | "abstract_class_declaration"
                | "interface_declaration"
                | "enum_declaration",
            ) => NodeRole::Block(Class),
            (LangFamily::JavaScript, "internal_module" | "module") => NodeRole::Block(Module),
            (LangFamily::JavaScript, "lexical_declaration" | "variable_declaration") => {
                NodeRole::Binding
            }
            (LangFamily::JavaScript, "export_statement") => NodeRole::Wrapper,

            (LangFamily::Go, "function_declaration" | "method_declaration") => {
                NodeRole::Block(Function)
            }
            (LangFamily::Go, "type_declaration") => NodeRole::Block(Class),

            (
                LangFamily::Jvm,
                "class_declaration"
                | "interface_declaration"
                | "enum_declaration"
                | "record_declaration"
                | "struct_declaration"
                | "object_declaration"
                | "annotation_type_declaration",
            ) => NodeRole::Block(Class),
            (LangFamily::Jvm, "function_declaration" | "method_declaration") => {
                NodeRole::Block(Function)
            }
            (LangFamily::Jvm, "namespace_declaration" | "file_scoped_namespace_declaration") => {
                NodeRole::Container
            }

            (LangFamily::CFamily, "function_definition") => NodeRole::Block(Function),
            (LangFamily::CFamily, "class_specifier" | "struct_specifier" | "enum_specifier") => {
                NodeRole::Block(Class)
            }
            (LangFamily::CFamily, "namespace_definition") => NodeRole::Container,
            (LangFamily::CFamily, "template_declaration") => NodeRole::Wrapper,

            (LangFamily::Shell, "function_definition") => NodeRole::Block(Function),

            _ => NodeRole::Other,
        }
    }
}

/// Language families for grouping block rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LangFamily {
    /// JavaScript, TypeScript, JSX, TSX
    JavaScript,
    Rust,
    Python,
    Go,
    /// Java, C#, Kotlin
    Jvm,
    /// C and C++
    CFamily,
    Shell,
    /// Recognised but never split structurally
    Unstructured,
}

/// Role of a top-level node during block splitting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// The node itself is a block
    Block(BlockKind),
    /// Look at the wrapped declaration (export, decorator, template)
    Wrapper,
    /// Descend into the body (namespaces)
    Container,
    /// Variable binding that is a block only if it holds a function value
    Binding,
    /// Not a block boundary
    Other,
}
