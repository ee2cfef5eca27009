//! Structural splitting of one file into function/class blocks

use std::path::Path;

use tree_sitter::{Language, Node, Parser};

use super::{BlockKind, BundleFile, CodeBlock};
use crate::lang::{Lang, NodeRole};

/// A block boundary found in the syntax tree
struct Found {
    kind: BlockKind,
    name: String,
    start_byte: usize,
    end_byte: usize,
    start_line: usize,
}

/// Split one bundle file into blocks
///
/// - Languages with a grammar are cut at top-level function/class boundaries;
///   meaningful top-level code outside those blocks becomes one `module` block.
/// - A parsed file with no such boundaries becomes a single `module` block.
/// - Everything else (no grammar, parser failure) is one `unknown` block.
pub fn split_file(repository: &str, file: &BundleFile) -> Vec<CodeBlock> {
    let lang = Lang::from_path(Path::new(&file.path))
        .or_else(|| file.fence_tag.as_deref().and_then(Lang::from_fence_tag));
    let language = lang.map(|l| l.name()).unwrap_or("text");

    let structural = lang.and_then(|l| l.tree_sitter_language().map(|ts| (l, ts)));
    let Some((lang, ts_language)) = structural else {
        return vec![whole_file(repository, file, language, BlockKind::Unknown)];
    };

    match split_structural(repository, file, lang, &ts_language) {
        Some(blocks) if !blocks.is_empty() => blocks,
        Some(_) => vec![whole_file(repository, file, language, BlockKind::Module)],
        None => {
            tracing::debug!(
                "[PREPROCESS] {}: structural parse unavailable, keeping whole file",
                file.path
            );
            vec![whole_file(repository, file, language, BlockKind::Unknown)]
        }
    }
}

fn whole_file(repository: &str, file: &BundleFile, language: &str, kind: BlockKind) -> CodeBlock {
    CodeBlock::new(
        repository,
        &file.path,
        language,
        kind,
        file_stem(&file.path),
        file.content.clone(),
        1,
    )
}

fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

fn split_structural(
    repository: &str,
    file: &BundleFile,
    lang: Lang,
    ts_language: &Language,
) -> Option<Vec<CodeBlock>> {
    let mut parser = Parser::new();
    parser.set_language(ts_language).ok()?;
    let tree = parser.parse(&file.content, None)?;
    let source = file.content.as_bytes();

    let mut found = Vec::new();
    collect_blocks(lang, tree.root_node(), source, &mut found);
    if found.is_empty() {
        return Some(Vec::new());
    }

    let mut blocks = Vec::with_capacity(found.len() + 1);
    if let Some(remainder) = remainder_text(&file.content, &found) {
        blocks.push(CodeBlock::new(
            repository,
            &file.path,
            lang.name(),
            BlockKind::Module,
            file_stem(&file.path),
            remainder,
            1,
        ));
    }

    for block in found {
        let content = file.content.get(block.start_byte..block.end_byte)?.to_string();
        blocks.push(CodeBlock::new(
            repository,
            &file.path,
            lang.name(),
            block.kind,
            block.name,
            content,
            block.start_line,
        ));
    }

    Some(blocks)
}

fn collect_blocks(lang: Lang, parent: Node, source: &[u8], out: &mut Vec<Found>) {
    let mut cursor = parent.walk();
    for child in parent.named_children(&mut cursor) {
        match lang.node_role(child.kind()) {
            NodeRole::Block(kind) => {
                if child.kind() == "mod_item" && child.child_by_field_name("body").is_none() {
                    continue;
                }
                out.push(found(child, kind, node_name(lang, child, source)));
            }
            NodeRole::Wrapper => {
                if let Some((kind, name)) = unwrap_declaration(lang, child, source) {
                    out.push(found(child, kind, name));
                }
            }
            NodeRole::Container => {
                let body = child.child_by_field_name("body").unwrap_or(child);
                collect_blocks(lang, body, source, out);
            }
            NodeRole::Binding => {
                if let Some(name) = function_binding_name(child, source) {
                    out.push(found(child, BlockKind::Function, name));
                }
            }
            NodeRole::Other => {}
        }
    }
}

fn found(node: Node, kind: BlockKind, name: String) -> Found {
    Found {
        kind,
        name,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        start_line: node.start_position().row + 1,
    }
}

/// Resolve what an export/decorator/template wrapper actually declares
fn unwrap_declaration(lang: Lang, node: Node, source: &[u8]) -> Option<(BlockKind, String)> {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match lang.node_role(child.kind()) {
            NodeRole::Block(kind) => return Some((kind, node_name(lang, child, source))),
            NodeRole::Binding => {
                if let Some(name) = function_binding_name(child, source) {
                    return Some((BlockKind::Function, name));
                }
            }
            NodeRole::Wrapper => {
                if let Some(inner) = unwrap_declaration(lang, child, source) {
                    return Some(inner);
                }
            }
            _ => match child.kind() {
                // export default function () {} / export default class {}
                "function_expression" | "arrow_function" | "function" => {
                    return Some((BlockKind::Function, "default".to_string()))
                }
                "class" => return Some((BlockKind::Class, "default".to_string())),
                _ => {}
            },
        }
    }
    None
}

/// `const handler = (req) => …` and friends
fn function_binding_name(node: Node, source: &[u8]) -> Option<String> {
    let mut cursor = node.walk();
    for declarator in node.named_children(&mut cursor) {
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let value = declarator.child_by_field_name("value")?;
        if matches!(
            value.kind(),
            "arrow_function" | "function_expression" | "function" | "generator_function"
        ) {
            return declarator
                .child_by_field_name("name")
                .and_then(|n| text(n, source));
        }
    }
    None
}

fn node_name(lang: Lang, node: Node, source: &[u8]) -> String {
    let name = match node.kind() {
        "impl_item" => {
            let ty = node.child_by_field_name("type").and_then(|n| text(n, source));
            let tr = node.child_by_field_name("trait").and_then(|n| text(n, source));
            match (tr, ty) {
                (Some(tr), Some(ty)) => Some(format!("impl {} for {}", tr, ty)),
                (None, Some(ty)) => Some(format!("impl {}", ty)),
                _ => None,
            }
        }
        "type_declaration" if lang == Lang::Go => {
            let mut cursor = node.walk();
            let spec = node
                .named_children(&mut cursor)
                .find(|c| c.kind() == "type_spec" || c.kind() == "type_alias");
            spec.and_then(|s| s.child_by_field_name("name"))
                .and_then(|n| text(n, source))
        }
        _ => node
            .child_by_field_name("name")
            .and_then(|n| text(n, source))
            .or_else(|| {
                node.child_by_field_name("declarator")
                    .and_then(|d| declarator_name(d, source))
            })
            .or_else(|| first_identifier(node, source)),
    };
    name.unwrap_or_else(|| "<anonymous>".to_string())
}

/// Dig through C/C++ declarators (`*foo(int)`, `ns::foo()`) for the name
fn declarator_name(mut node: Node, source: &[u8]) -> Option<String> {
    loop {
        match node.kind() {
            "identifier" | "field_identifier" | "qualified_identifier" | "destructor_name"
            | "operator_name" | "type_identifier" => return text(node, source),
            _ => node = node.child_by_field_name("declarator")?,
        }
    }
}

fn first_identifier(node: Node, source: &[u8]) -> Option<String> {
    let mut cursor = node.walk();
    let ident = node
        .named_children(&mut cursor)
        .find(|c| c.kind().ends_with("identifier"));
    ident.and_then(|n| text(n, source))
}

fn text(node: Node, source: &[u8]) -> Option<String> {
    node.utf8_text(source).ok().map(|s| s.to_string())
}

/// Top-level code outside every block, if any of it is more than imports/comments
fn remainder_text(content: &str, found: &[Found]) -> Option<String> {
    let mut remainder = String::new();
    let mut cursor = 0;
    for block in found {
        if block.start_byte > cursor {
            remainder.push_str(content.get(cursor..block.start_byte)?);
        }
        cursor = cursor.max(block.end_byte);
    }
    if cursor < content.len() {
        remainder.push_str(content.get(cursor..)?);
    }

    let meaningful = remainder.lines().any(|line| !is_boilerplate_line(line));
    meaningful.then(|| remainder.trim().to_string())
}

fn is_boilerplate_line(line: &str) -> bool {
    const PREFIXES: &[&str] = &[
        "import ", "from ", "use ", "#", "//", "/*", "*", "package ", "using ", "extern crate",
        "\"use strict\"", "'use strict'", "require(", "export {", "export *",
    ];
    let trimmed = line.trim();
    trimmed.is_empty()
        || PREFIXES.iter().any(|p| trimmed.starts_with(p))
        || trimmed.chars().all(|c| "{}()[];,".contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, content: &str) -> BundleFile {
        BundleFile {
            path: path.to_string(),
            fence_tag: None,
            content: content.to_string(),
        }
    }

    fn kinds_and_names(blocks: &[CodeBlock]) -> Vec<(BlockKind, String)> {
        blocks.iter().map(|b| (b.kind, b.name.clone())).collect()
    }

    #[test]
    fn test_rust_items() {
        let src = "use std::fmt;\n\npub struct Point { x: i32 }\n\nimpl fmt::Display for Point {\n    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, \"{}\", self.x) }\n}\n\nfn origin() -> Point { Point { x: 0 } }\n\nmod inline { pub fn a() {} }\nmod external;\n";
        let blocks = split_file("r", &file("src/point.rs", src));
        assert_eq!(
            kinds_and_names(&blocks),
            vec![
                (BlockKind::Class, "Point".to_string()),
                (BlockKind::Class, "impl fmt::Display for Point".to_string()),
                (BlockKind::Function, "origin".to_string()),
                (BlockKind::Module, "inline".to_string()),
            ]
        );
        assert_eq!(blocks[2].start_line, 9);
        assert!(blocks.iter().all(|b| b.language == "rust"));
    }

    #[test]
    fn test_python_decorators_and_module_remainder() {
        let src = "import os\n\n@dataclass\nclass Config:\n    path: str\n\ndef load():\n    return Config(os.getcwd())\n\nif __name__ == \"__main__\":\n    load()\n";
        let blocks = split_file("r", &file("app.py", src));
        assert_eq!(
            kinds_and_names(&blocks),
            vec![
                (BlockKind::Module, "app".to_string()),
                (BlockKind::Class, "Config".to_string()),
                (BlockKind::Function, "load".to_string()),
            ]
        );
        assert!(blocks[0].content.contains("__main__"));
        assert!(blocks[1].content.starts_with("@dataclass"));
    }

    #[test]
    fn test_javascript_exports_and_arrow_bindings() {
        let src = "import x from 'x';\nexport const handler = async (req) => { return x(req); };\nexport default class Store {}\nfunction helper() {}\nconst LIMIT = 10;\n";
        let blocks = split_file("r", &file("web/api.js", src));
        let names: Vec<_> = kinds_and_names(&blocks);
        assert!(names.contains(&(BlockKind::Function, "handler".to_string())));
        assert!(names.contains(&(BlockKind::Class, "Store".to_string())));
        assert!(names.contains(&(BlockKind::Function, "helper".to_string())));
        // LIMIT is top-level code outside blocks
        assert_eq!(blocks[0].kind, BlockKind::Module);
    }

    #[test]
    fn test_cpp_namespace_descends() {
        let src = "#include <vector>\nnamespace geo {\nclass Shape { public: virtual double area() const = 0; };\ndouble scale(double v) { return v * 2; }\n}\n";
        let blocks = split_file("r", &file("geo.cpp", src));
        assert_eq!(
            kinds_and_names(&blocks),
            vec![
                (BlockKind::Class, "Shape".to_string()),
                (BlockKind::Function, "scale".to_string()),
            ]
        );
    }

    #[test]
    fn test_go_type_and_methods() {
        let src = "package store\n\ntype Store struct{ n int }\n\nfunc (s *Store) Inc() { s.n++ }\n";
        let blocks = split_file("r", &file("store.go", src));
        assert_eq!(
            kinds_and_names(&blocks),
            vec![
                (BlockKind::Class, "Store".to_string()),
                (BlockKind::Function, "Inc".to_string()),
            ]
        );
    }

    #[test]
    fn test_unstructured_language_is_single_unknown_block() {
        let blocks = split_file("r", &file("docker-compose.yml", "services:\n  web: {}\n"));
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Unknown);
        assert_eq!(blocks[0].language, "yaml");
    }

    #[test]
    fn test_unknown_extension_uses_fence_tag() {
        let mut f = file("Dockerfile", "FROM rust:1\n");
        f.fence_tag = Some("dockerfile".to_string());
        let blocks = split_file("r", &f);
        assert_eq!(blocks[0].language, "text");

        let mut script = file("bin/run", "deploy() {\n  echo hi\n}\n");
        script.fence_tag = Some("bash".to_string());
        let blocks = split_file("r", &script);
        assert_eq!(blocks[0].language, "bash");
        assert_eq!(blocks[0].kind, BlockKind::Function);
    }

    #[test]
    fn test_script_without_definitions_is_module_block() {
        let blocks = split_file("r", &file("setup.py", "print('hello')\n"));
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Module);
        assert_eq!(blocks[0].name, "setup");
    }
}
