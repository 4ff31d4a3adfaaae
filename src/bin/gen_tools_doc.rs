use std::collections::HashMap;
use std::fmt::Write as _;
use tia_mcp::tool_registry::{Precondition, Transition};
use tia_mcp::{ToolCategory, ToolInfo, TOOL_REGISTRY};

fn category_title(cat: ToolCategory) -> &'static str {
    match cat {
        ToolCategory::Session => "Session",
        ToolCategory::Project => "Project",
        ToolCategory::Blocks => "Blocks",
        ToolCategory::Discovery => "Discovery",
    }
}

fn precondition_label(pre: Precondition) -> &'static str {
    match pre {
        Precondition::None => "none",
        Precondition::SessionOnly => "session",
        Precondition::SessionAndResource => "session + open project",
    }
}

fn transition_label(t: Transition) -> &'static str {
    match t {
        Transition::None => "",
        Transition::Attach => "attaches project",
        Transition::Detach => "detaches project",
    }
}

fn main() {
    let mut groups: HashMap<ToolCategory, Vec<&ToolInfo>> = HashMap::new();
    for tool in TOOL_REGISTRY {
        groups.entry(tool.category).or_default().push(tool);
    }
    for tools in groups.values_mut() {
        tools.sort_by_key(|t| t.name);
    }

    let tool_count = TOOL_REGISTRY.len();

    let mut out = String::new();
    let _ = writeln!(out, "# Tools\n");
    let _ = writeln!(
        out,
        "> Auto-generated from `src/tool_registry.rs`. Do not edit by hand."
    );
    let _ = writeln!(
        out,
        "> Regenerate with: `cargo run --bin gen_tools_doc -- docs/TOOLS.md`.\n"
    );

    let _ = writeln!(out, "## Workflow\n");
    let _ = writeln!(
        out,
        "- `tools/list` returns the full tool set (currently {tool_count} tools)"
    );
    let _ = writeln!(
        out,
        "- `create_session` returns the `id` every other session tool takes as `session_id`"
    );
    let _ = writeln!(
        out,
        "- `open_project` attaches a project; block tools require one"
    );
    let _ = writeln!(
        out,
        "- `close_session` releases the engineering connection; idle sessions are swept"
    );
    let _ = writeln!(out);

    for &cat in ToolCategory::all() {
        let Some(tools) = groups.get(&cat) else {
            continue;
        };
        if tools.is_empty() {
            continue;
        }
        let _ = writeln!(out, "## {} (`{}`)\n", category_title(cat), cat.as_str());
        let _ = writeln!(out, "{}", cat.description());
        let _ = writeln!(out, "\n| Tool | Requires | Effect | Description |");
        let _ = writeln!(out, "|------|----------|--------|-------------|");
        for tool in tools {
            let _ = writeln!(
                out,
                "| `{}` | {} | {} | {} |",
                tool.name,
                precondition_label(tool.precondition),
                transition_label(tool.on_success),
                tool.short_desc
            );
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "## Notes\n");
    let _ = writeln!(
        out,
        "- Every response is an envelope: `success`, `message`, `data`, `error`, `error_code`"
    );
    let _ = writeln!(
        out,
        "- Calls on one session run in order; different sessions run in parallel"
    );
    let _ = writeln!(
        out,
        "- `timeout_secs` bounds how long a call is awaited (1-600); the operation itself is not cancelled"
    );

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        if let Err(err) = std::fs::write(&args[1], out) {
            eprintln!("failed to write {}: {}", args[1], err);
            std::process::exit(1);
        }
    } else {
        print!("{out}");
    }
}
