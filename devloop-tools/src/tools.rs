//! Tool implementations behind `tools/call`.
//!
//! File tools are confined to the workspace directory: paths must be relative
//! and may not climb out with `..`.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde_json::json;
use tracing::{debug, info, instrument};

use devloop::io::config::ToolServerConfig;
use devloop::io::protocol::{ToolArgs, ToolDefinition, tool_names};

use crate::docs::DocsIndex;
use crate::sandbox::Sandbox;

/// Canned pointers returned by `search_github`.
const GITHUB_POINTERS: [&str; 3] = [
    "github.com/python/cpython: reference implementation examples",
    "github.com/TheAlgorithms/Python: algorithm implementations in Python",
    "github.com/vinta/awesome-python: curated Python resources",
];

const DEFAULT_DOCS_RESULTS: i64 = 3;

pub struct Toolbox {
    workspace: PathBuf,
    docs: DocsIndex,
    sandbox: Sandbox,
}

impl Toolbox {
    pub fn new(cfg: &ToolServerConfig) -> Result<Self> {
        fs::create_dir_all(&cfg.workspace)
            .with_context(|| format!("create workspace {}", cfg.workspace.display()))?;
        Ok(Self {
            workspace: cfg.workspace.clone(),
            docs: DocsIndex::new(cfg.docs_dir.clone()),
            sandbox: Sandbox::from_config(cfg),
        })
    }

    pub fn knows(name: &str) -> bool {
        tool_names::ALL.contains(&name)
    }

    /// Run tool `name`. The caller checks [`Toolbox::knows`] first.
    #[instrument(skip_all, fields(tool = name))]
    pub fn call(&self, name: &str, args: &ToolArgs) -> Result<String> {
        debug!(args = args.len(), "tool call");
        match name {
            tool_names::WRITE_FILE => self.write_file(args),
            tool_names::READ_FILE => self.read_file(args),
            tool_names::LIST_DIRECTORY => self.list_directory(args),
            tool_names::EXECUTE_CODE => self.sandbox.execute(text_arg(args, &["code"])?),
            tool_names::QUERY_DOCS => {
                let query = text_arg(args, &["query"])?;
                let limit = match args.get("n_results") {
                    None => DEFAULT_DOCS_RESULTS,
                    Some(value) => value
                        .as_i64()
                        .ok_or_else(|| anyhow!("n_results must be an integer"))?,
                };
                self.docs.query(query, usize::try_from(limit.max(1)).unwrap_or(1))
            }
            tool_names::SEARCH_GITHUB => Ok(search_github(text_arg(args, &["keyword", "query"])?)),
            other => bail!("unknown tool: {other}"),
        }
    }

    fn write_file(&self, args: &ToolArgs) -> Result<String> {
        let name = text_arg(args, &["filename", "path"])?;
        let content = text_arg(args, &["content"])?;
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory for {name}"))?;
        }
        fs::write(&path, content).with_context(|| format!("write {name}"))?;
        info!(file = name, bytes = content.len(), "wrote workspace file");
        Ok(format!("Written {} chars to {name}", content.chars().count()))
    }

    fn read_file(&self, args: &ToolArgs) -> Result<String> {
        let name = text_arg(args, &["filename", "path"])?;
        let path = self.resolve(name)?;
        if !path.is_file() {
            bail!("{name} not found");
        }
        fs::read_to_string(&path).with_context(|| format!("read {name}"))
    }

    fn list_directory(&self, args: &ToolArgs) -> Result<String> {
        let rel = match args.get("path") {
            Some(value) => value
                .as_str()
                .ok_or_else(|| anyhow!("path must be a string"))?,
            None => ".",
        };
        let dir = self.resolve(rel)?;
        if !dir.is_dir() {
            bail!("{rel} is not a directory");
        }
        let mut names = fs::read_dir(&dir)
            .with_context(|| format!("list {rel}"))?
            .map(|entry| {
                let entry = entry?;
                let mut name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type()?.is_dir() {
                    name.push('/');
                }
                Ok(name)
            })
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("read entries of {rel}"))?;
        names.sort();

        let label = if rel == "." { "workspace" } else { rel };
        if names.is_empty() {
            return Ok(format!("{label}/ is empty."));
        }
        let lines: Vec<String> = names.iter().map(|name| format!("  - {name}")).collect();
        Ok(format!("{label}/ contents:\n{}", lines.join("\n")))
    }

    /// Map a workspace-relative path to a real path, refusing escapes.
    fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let rel_path = Path::new(rel);
        for component in rel_path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    bail!("path {rel:?} escapes the workspace");
                }
            }
        }
        Ok(self.workspace.join(rel_path))
    }
}

/// First of `keys` present in `args`, as text.
fn text_arg<'a>(args: &'a ToolArgs, keys: &[&str]) -> Result<&'a str> {
    let (key, value) = keys
        .iter()
        .find_map(|key| args.get(*key).map(|value| (*key, value)))
        .ok_or_else(|| anyhow!("missing argument {}", keys.join(" or ")))?;
    value
        .as_str()
        .ok_or_else(|| anyhow!("argument {key} must be a string"))
}

fn search_github(keyword: &str) -> String {
    let mut out = format!("GitHub search results for '{keyword}':\n");
    for (idx, pointer) in GITHUB_POINTERS.iter().enumerate() {
        out.push_str(&format!("{}. {pointer}\n", idx + 1));
    }
    out.push_str(&format!(
        "(Tip: search 'site:github.com python {keyword}' for live results)"
    ));
    out
}

/// `tools/list` catalog.
pub fn definitions() -> Vec<ToolDefinition> {
    let string = |description: &str| json!({"type": "string", "description": description});
    vec![
        ToolDefinition {
            name: tool_names::WRITE_FILE.to_string(),
            description: "Write content to a file in the workspace.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "filename": string("Workspace-relative file name (alias: path)"),
                    "content": string("Content to write"),
                },
                "required": ["content"],
            }),
        },
        ToolDefinition {
            name: tool_names::READ_FILE.to_string(),
            description: "Read a file from the workspace.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"filename": string("Workspace-relative file name (alias: path)")},
            }),
        },
        ToolDefinition {
            name: tool_names::LIST_DIRECTORY.to_string(),
            description: "List files in the workspace or one of its subdirectories.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"path": string("Workspace-relative directory (default: root)")},
            }),
        },
        ToolDefinition {
            name: tool_names::EXECUTE_CODE.to_string(),
            description: "Execute Python code in a network-less, resource-capped container."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"code": string("Python source to run")},
                "required": ["code"],
            }),
        },
        ToolDefinition {
            name: tool_names::QUERY_DOCS.to_string(),
            description: "Search the local knowledge base for coding best practices.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": string("What to search for"),
                    "n_results": {
                        "type": "integer",
                        "description": "Number of results",
                        "default": DEFAULT_DOCS_RESULTS,
                    },
                },
                "required": ["query"],
            }),
        },
        ToolDefinition {
            name: tool_names::SEARCH_GITHUB.to_string(),
            description: "Suggest GitHub repositories with examples for a keyword.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"keyword": string("Search keyword (alias: query)")},
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use devloop::io::protocol::{ToolValue, tool_args};

    fn toolbox(root: &Path) -> Toolbox {
        let cfg = ToolServerConfig {
            workspace: root.join("workspace"),
            docs_dir: root.join("docs"),
            ..ToolServerConfig::default()
        };
        Toolbox::new(&cfg).expect("toolbox")
    }

    #[test]
    fn write_then_read_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tools = toolbox(temp.path());
        let reply = tools
            .call(
                tool_names::WRITE_FILE,
                &tool_args([("filename", "pkg/mod.py"), ("content", "x = 1\n")]),
            )
            .expect("write");
        assert_eq!(reply, "Written 6 chars to pkg/mod.py");
        let read = tools
            .call(tool_names::READ_FILE, &tool_args([("path", "pkg/mod.py")]))
            .expect("read");
        assert_eq!(read, "x = 1\n");
    }

    #[test]
    fn refuses_paths_outside_workspace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tools = toolbox(temp.path());
        for bad in ["../escape.py", "/etc/passwd", "a/../../b"] {
            let err = tools
                .call(
                    tool_names::WRITE_FILE,
                    &tool_args([("filename", bad), ("content", "x")]),
                )
                .expect_err(bad);
            assert!(err.to_string().contains("escapes the workspace"), "{bad}");
        }
        assert!(!temp.path().join("escape.py").exists());
    }

    #[test]
    fn missing_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = toolbox(temp.path())
            .call(tool_names::READ_FILE, &tool_args([("filename", "nope.py")]))
            .expect_err("missing");
        assert_eq!(err.to_string(), "nope.py not found");
    }

    #[test]
    fn lists_sorted_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tools = toolbox(temp.path());
        assert_eq!(
            tools
                .call(tool_names::LIST_DIRECTORY, &ToolArgs::new())
                .expect("list"),
            "workspace/ is empty."
        );
        for name in ["b.py", "a.py", "sub/c.py"] {
            tools
                .call(
                    tool_names::WRITE_FILE,
                    &tool_args([("filename", name), ("content", "")]),
                )
                .expect("write");
        }
        let listing = tools
            .call(tool_names::LIST_DIRECTORY, &ToolArgs::new())
            .expect("list");
        assert_eq!(listing, "workspace/ contents:\n  - a.py\n  - b.py\n  - sub/");
    }

    #[test]
    fn argument_types_are_checked() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tools = toolbox(temp.path());
        let args = ToolArgs::from([("filename".to_string(), ToolValue::Int(3))]);
        let err = tools.call(tool_names::READ_FILE, &args).expect_err("type");
        assert!(err.to_string().contains("must be a string"));
        let err = tools
            .call(tool_names::WRITE_FILE, &tool_args([("content", "x")]))
            .expect_err("missing");
        assert!(err.to_string().contains("missing argument filename or path"));
    }

    #[test]
    fn search_github_accepts_either_key() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tools = toolbox(temp.path());
        let by_keyword = tools
            .call(tool_names::SEARCH_GITHUB, &tool_args([("keyword", "sorting")]))
            .expect("search");
        let by_query = tools
            .call(tool_names::SEARCH_GITHUB, &tool_args([("query", "sorting")]))
            .expect("search");
        assert_eq!(by_keyword, by_query);
        assert!(by_keyword.starts_with("GitHub search results for 'sorting':"));
    }

    #[test]
    fn catalog_covers_every_tool() {
        let names: Vec<_> = definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names.len(), tool_names::ALL.len());
        for name in tool_names::ALL {
            assert!(names.iter().any(|n| n == name), "{name}");
            assert!(Toolbox::knows(name));
        }
        assert!(!Toolbox::knows("rm_rf"));
    }
}
