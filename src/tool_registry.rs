//! Tool registry and precondition table.
//!
//! Every tool declares, once, what it needs before it may run: nothing, a
//! live session, or a live session with a project attached. The dispatcher
//! enforces these uniformly, so handlers never re-check session state.
//! All tools are exposed in tools/list; `tool_catalog` is still recommended
//! for discovery.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Tool category for grouping related tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Session lifecycle and introspection
    Session,
    /// Project open/save/close
    Project,
    /// PLC block listing, export and import
    Blocks,
    /// Catalog and help
    Discovery,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Project => "project",
            Self::Blocks => "blocks",
            Self::Discovery => "discovery",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Session => "Create, inspect, close and terminate engineering sessions",
            Self::Project => "Open, save, inspect and close the session's project",
            Self::Blocks => "List, export and import PLC blocks",
            Self::Discovery => "Find tools and read their documentation",
        }
    }

    pub fn all() -> &'static [ToolCategory] {
        &[Self::Session, Self::Project, Self::Blocks, Self::Discovery]
    }
}

impl FromStr for ToolCategory {
    type Err = ();

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "session" | "sessions" => Ok(Self::Session),
            "project" | "projects" => Ok(Self::Project),
            "blocks" | "block" | "plc" => Ok(Self::Blocks),
            "discovery" | "help" | "catalog" => Ok(Self::Discovery),
            _ => Err(()),
        }
    }
}

/// What must hold before a tool's work is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    /// No session involved.
    None,
    /// `session_id` must name a live session.
    SessionOnly,
    /// Live session in `ResourceAttached`.
    SessionAndResource,
}

/// Session state change applied when a tool succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    None,
    /// `Created` -> `ResourceAttached`.
    Attach,
    /// `ResourceAttached` -> `Created`.
    Detach,
}

/// Metadata for a single tool
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: &'static str,
    pub category: ToolCategory,
    pub precondition: Precondition,
    pub on_success: Transition,
    /// Short description (1 line, <100 chars) - used in tool_catalog results
    pub short_desc: &'static str,
    /// Full description with usage details - used in tool_help
    pub full_desc: &'static str,
    /// Example invocation (JSON)
    pub example: &'static str,
    /// Keywords for semantic search
    pub keywords: &'static [&'static str],
}

/// Static registry of all tools
pub static TOOL_REGISTRY: &[ToolInfo] = &[
    // === SESSION ===
    ToolInfo {
        name: "create_session",
        category: ToolCategory::Session,
        precondition: Precondition::None,
        on_success: Transition::None,
        short_desc: "Start a new engineering session",
        full_desc: "Start a new session with its own dedicated worker. Every later call for this \
                    session runs on that worker, one at a time, in the order it was received. \
                    Optional metadata is stored verbatim and returned by session_info. \
                    Fails with capacity_exceeded when the configured session limit is reached; \
                    close an existing session first.",
        example: r#"{"metadata": {"owner": "line-3"}}"#,
        keywords: &["session", "create", "new", "start", "open"],
    },
    ToolInfo {
        name: "list_sessions",
        category: ToolCategory::Session,
        precondition: Precondition::None,
        on_success: Transition::None,
        short_desc: "List all sessions with age, idle time and state",
        full_desc: "Return a snapshot of every session: id, state, attached project, creation \
                    and last activity times, age and idle seconds, suspect flag, queued \
                    operations and metadata. Also returns aggregate statistics.",
        example: r#"{}"#,
        keywords: &["session", "list", "all", "status", "stats"],
    },
    ToolInfo {
        name: "session_info",
        category: ToolCategory::Session,
        precondition: Precondition::SessionOnly,
        on_success: Transition::None,
        short_desc: "Show one session's state and metadata",
        full_desc: "Return the snapshot for one session. Does not count as activity, so it \
                    never delays idle eviction.",
        example: r#"{"session_id": "3f2a..."}"#,
        keywords: &["session", "info", "status", "details"],
    },
    ToolInfo {
        name: "close_session",
        category: ToolCategory::Session,
        precondition: Precondition::SessionOnly,
        on_success: Transition::None,
        short_desc: "Close a session and release its project",
        full_desc: "Close a session gracefully. Queued operations finish first, then the open \
                    project (if any) is saved when modified and closed on the session's worker, \
                    and the worker stops. Closing a session that is already closing succeeds.",
        example: r#"{"session_id": "3f2a..."}"#,
        keywords: &["session", "close", "end", "release", "stop"],
    },
    ToolInfo {
        name: "terminate_session",
        category: ToolCategory::Session,
        precondition: Precondition::SessionOnly,
        on_success: Transition::None,
        short_desc: "Force-remove a session without waiting for it",
        full_desc: "Operator path for a stuck session. The session is removed at once and its \
                    slot freed. Release is queued behind any running operation but not awaited; \
                    a long native call keeps running until it returns on its own.",
        example: r#"{"session_id": "3f2a..."}"#,
        keywords: &["session", "terminate", "kill", "force", "stuck"],
    },
    // === PROJECT ===
    ToolInfo {
        name: "open_project",
        category: ToolCategory::Project,
        precondition: Precondition::SessionOnly,
        on_success: Transition::Attach,
        short_desc: "Open a project in a session",
        full_desc: "Open a project on the session's worker. project_path may point at an .ap* \
                    project file or at a directory; with a directory, project_name selects a \
                    sub-directory, otherwise the first .ap* file below it decides. A session holds \
                    at most one project; close_project first to switch.",
        example: r#"{"session_id": "3f2a...", "project_path": "C:/Projects/Plant/Plant.ap18"}"#,
        keywords: &["project", "open", "load", "ap18", "ap19"],
    },
    ToolInfo {
        name: "close_project",
        category: ToolCategory::Project,
        precondition: Precondition::SessionAndResource,
        on_success: Transition::Detach,
        short_desc: "Close the session's project",
        full_desc: "Close the project attached to the session. Unsaved changes are saved first \
                    unless save is false. The session stays open and can open another project.",
        example: r#"{"session_id": "3f2a...", "save": true}"#,
        keywords: &["project", "close", "detach"],
    },
    ToolInfo {
        name: "save_project",
        category: ToolCategory::Project,
        precondition: Precondition::SessionAndResource,
        on_success: Transition::None,
        short_desc: "Save the session's project",
        full_desc: "Persist the attached project and clear its modified flag.",
        example: r#"{"session_id": "3f2a..."}"#,
        keywords: &["project", "save", "persist", "write"],
    },
    ToolInfo {
        name: "get_project_info",
        category: ToolCategory::Project,
        precondition: Precondition::SessionAndResource,
        on_success: Transition::None,
        short_desc: "Name, path, modified flag and block count of the project",
        full_desc: "Return information about the attached project: name, store path, project \
                    directory, whether it has unsaved changes and how many blocks it holds.",
        example: r#"{"session_id": "3f2a..."}"#,
        keywords: &["project", "info", "metadata", "modified"],
    },
    // === BLOCKS ===
    ToolInfo {
        name: "list_blocks",
        category: ToolCategory::Blocks,
        precondition: Precondition::SessionAndResource,
        on_success: Transition::None,
        short_desc: "List PLC blocks in the project",
        full_desc: "List every block of the attached project with its name, type (OB, FB, FC, \
                    DB, UDT, SCL) and folder path. Optional block_type filters by type.",
        example: r#"{"session_id": "3f2a...", "block_type": "FB"}"#,
        keywords: &["blocks", "list", "plc", "ob", "fb", "fc", "db", "udt"],
    },
    ToolInfo {
        name: "export_blocks",
        category: ToolCategory::Blocks,
        precondition: Precondition::SessionAndResource,
        on_success: Transition::None,
        short_desc: "Export blocks to a folder",
        full_desc: "Export the named blocks, or all blocks when block_names is omitted, to \
                    output_path (defaults to the configured export directory). Returns the \
                    written files and per-block errors.",
        example: r#"{"session_id": "3f2a...", "block_names": ["Main", "Conveyor_FB"], "output_path": "./exports"}"#,
        keywords: &["blocks", "export", "xml", "scl", "backup"],
    },
    ToolInfo {
        name: "import_blocks",
        category: ToolCategory::Blocks,
        precondition: Precondition::SessionAndResource,
        on_success: Transition::None,
        short_desc: "Import block files into the project",
        full_desc: "Import block files (.xml, .scl, .udt, .db) into the attached project, \
                    optionally under target_folder. Marks the project modified. Returns \
                    imported blocks and per-file errors.",
        example: r#"{"session_id": "3f2a...", "paths": ["./exports/Main.xml"], "target_folder": "Imported"}"#,
        keywords: &["blocks", "import", "xml", "scl", "restore"],
    },
    // === DISCOVERY ===
    ToolInfo {
        name: "tool_catalog",
        category: ToolCategory::Discovery,
        precondition: Precondition::None,
        on_success: Transition::None,
        short_desc: "Discover tools by query or category",
        full_desc: "Search the tool registry by free-text query and/or category. Returns tool \
                    names, short descriptions, precondition and matched keywords.",
        example: r#"{"query": "export blocks"}"#,
        keywords: &["tools", "catalog", "discover", "search", "find"],
    },
    ToolInfo {
        name: "tool_help",
        category: ToolCategory::Discovery,
        precondition: Precondition::None,
        on_success: Transition::None,
        short_desc: "Full documentation for one tool",
        full_desc: "Return the full description, example invocation, category and \
                    precondition for a tool.",
        example: r#"{"name": "open_project"}"#,
        keywords: &["help", "docs", "documentation", "usage"],
    },
];

/// Get all tools
pub fn all_tools() -> impl Iterator<Item = &'static ToolInfo> {
    TOOL_REGISTRY.iter()
}

/// Get tool by name
pub fn get_tool(name: &str) -> Option<&'static ToolInfo> {
    TOOL_REGISTRY.iter().find(|t| t.name == name)
}

/// Get tools by category
pub fn tools_by_category(category: ToolCategory) -> impl Iterator<Item = &'static ToolInfo> {
    TOOL_REGISTRY.iter().filter(move |t| t.category == category)
}

/// Search tools by query (simple keyword matching)
pub fn search_tools(query: &str, limit: usize) -> Vec<(&'static ToolInfo, Vec<&'static str>)> {
    let query_lower = query.to_lowercase();
    let query_words: Vec<&str> = query_lower.split_whitespace().collect();

    let mut results: Vec<(&'static ToolInfo, Vec<&'static str>, usize)> = Vec::new();

    for tool in TOOL_REGISTRY.iter() {
        let mut matched = Vec::new();
        let mut score = 0usize;

        for word in &query_words {
            if tool.name.contains(word) {
                score += 10;
                if !matched.contains(&"name match") {
                    matched.push("name match");
                }
            }
            if tool.short_desc.to_lowercase().contains(word) {
                score += 5;
            }
            if tool.category.as_str().contains(word) {
                score += 2;
                if !matched.contains(&tool.category.as_str()) {
                    matched.push(tool.category.as_str());
                }
            }
        }

        for keyword in tool.keywords {
            if query_words
                .iter()
                .any(|word| keyword.contains(word) || word.contains(keyword))
            {
                score += 3;
                if !matched.contains(keyword) {
                    matched.push(*keyword);
                }
            }
        }

        if score > 0 {
            results.push((tool, matched, score));
        }
    }

    // Stable sort keeps registry order among equal scores.
    results.sort_by(|a, b| b.2.cmp(&a.2));

    results
        .into_iter()
        .take(limit)
        .map(|(tool, keywords, _)| (tool, keywords))
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::tool_registry::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<_> = all_tools().map(|t| t.name).collect();
        assert_eq!(names.len(), TOOL_REGISTRY.len());
    }

    #[test]
    fn test_precondition_table() {
        for name in ["create_session", "list_sessions", "tool_catalog", "tool_help"] {
            assert_eq!(get_tool(name).unwrap().precondition, Precondition::None, "{name}");
        }
        for name in ["session_info", "close_session", "terminate_session", "open_project"] {
            assert_eq!(get_tool(name).unwrap().precondition, Precondition::SessionOnly, "{name}");
        }
        for name in [
            "close_project",
            "save_project",
            "get_project_info",
            "list_blocks",
            "export_blocks",
            "import_blocks",
        ] {
            assert_eq!(
                get_tool(name).unwrap().precondition,
                Precondition::SessionAndResource,
                "{name}"
            );
        }
    }

    #[test]
    fn test_transitions() {
        assert_eq!(get_tool("open_project").unwrap().on_success, Transition::Attach);
        assert_eq!(get_tool("close_project").unwrap().on_success, Transition::Detach);
        let others = all_tools()
            .filter(|t| !matches!(t.name, "open_project" | "close_project"))
            .all(|t| t.on_success == Transition::None);
        assert!(others);
    }

    #[test]
    fn test_search_tools() {
        let results = search_tools("export blocks", 5);
        assert!(!results.is_empty());
        assert_eq!(results[0].0.name, "export_blocks");
        assert!(search_tools("zzzz", 5).is_empty());
    }

    #[test]
    fn test_get_tool() {
        assert!(get_tool("open_project").is_some());
        assert!(get_tool("open_idb").is_none());
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("Blocks".parse::<ToolCategory>(), Ok(ToolCategory::Blocks));
        assert_eq!(" sessions ".parse::<ToolCategory>(), Ok(ToolCategory::Session));
        assert!("debugger".parse::<ToolCategory>().is_err());
        for category in ToolCategory::all() {
            assert!(tools_by_category(*category).count() > 0);
        }
    }
}
