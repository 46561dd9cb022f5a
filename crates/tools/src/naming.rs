//! Federated tool names.
//!
//! `mcp_<server>_<tool>`, `skill_<id>`, and the fixed `rag_query` /
//! `rag_ingest`. Names are lowercased; characters outside
//! `[a-z0-9_-]` become `_`.

pub const RAG_QUERY: &str = "rag_query";
pub const RAG_INGEST: &str = "rag_ingest";

/// Lowercase and replace characters that are not legal in a function name.
pub fn sanitize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn mcp_prefix(server: &str) -> String {
    format!("mcp_{}_", sanitize(server))
}

pub fn mcp_tool_name(server: &str, tool: &str) -> String {
    format!("{}{}", mcp_prefix(server), sanitize(tool))
}

pub fn skill_tool_name(id: &str) -> String {
    format!("skill_{}", sanitize(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_tool_names() {
        assert_eq!(mcp_tool_name("clock", "now"), "mcp_clock_now");
        assert_eq!(mcp_tool_name("FileSystem", "read_file"), "mcp_filesystem_read_file");
        assert_eq!(mcp_tool_name("web", "fetch.url"), "mcp_web_fetch_url");
    }

    #[test]
    fn skill_names_keep_hyphens() {
        assert_eq!(skill_tool_name("Code-Review"), "skill_code-review");
        assert_eq!(skill_tool_name("git commit"), "skill_git_commit");
    }
}
