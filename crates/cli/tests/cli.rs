//! Runs the `rago` binary against a throwaway home directory.

use rago_mcp::test_support::{CLOCK_SCRIPT, write_script};
use std::path::Path;
use std::process::{Command, Output};

struct Home {
    dir: tempfile::TempDir,
}

impl Home {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".rago")).unwrap();
        std::fs::create_dir_all(dir.path().join("work")).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn config_dir(&self) -> std::path::PathBuf {
        self.path().join(".rago")
    }

    /// Put the mock clock server in the catalog.
    fn with_clock(self) -> Self {
        let script = write_script(self.path(), "clock.sh", CLOCK_SCRIPT);
        let catalog = serde_json::json!({
            "mcpServers": {"clock": {"command": "sh", "args": [script.display().to_string()]}}
        });
        std::fs::write(self.config_dir().join("mcpServers.json"), catalog.to_string()).unwrap();
        self
    }

    fn with_skill(self, id: &str, document: &str) -> Self {
        let dir = self.config_dir().join("skills").join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("SKILL.md"), document).unwrap();
        let config = format!(
            "[skills]\ndirs = [\"{}\"]\n",
            self.config_dir().join("skills").display()
        );
        std::fs::write(self.config_dir().join("config.toml"), config).unwrap();
        self
    }

    fn rago(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_rago"))
            .args(args)
            .current_dir(self.path().join("work"))
            .env("HOME", self.path())
            .env("RAGO_CONFIG_DIR", self.config_dir())
            .env_remove("RAGO_CONFIG")
            .env("RUST_LOG", "warn")
            .output()
            .unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn tools_lists_server_catalog() {
    let home = Home::new().with_clock();
    let output = home.rago(&["tools"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("mcp_clock_now"));
}

#[test]
fn call_prints_tool_output() {
    let home = Home::new().with_clock();
    let output = home.rago(&["call", "mcp_clock_now"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "2024-01-01T00:00:00Z");
}

#[test]
fn unknown_tool_fails() {
    let home = Home::new();
    let output = home.rago(&["call", "mcp_nowhere_nothing", "{}"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("tool_not_found"));
}

#[test]
fn bad_arguments_are_rejected() {
    let home = Home::new().with_clock();
    let output = home.rago(&["call", "mcp_clock_now", "not json"]);
    assert!(!output.status.success());
}

#[test]
fn servers_reports_health() {
    let home = Home::new().with_clock();
    let output = home.rago(&["servers"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("clock"));
    assert!(text.contains("running"));
}

#[test]
fn skills_are_listed() {
    let home = Home::new().with_skill(
        "greet",
        "---\nname: Greet\ndescription: Say hello\nvariables:\n  - name: who\n    required: true\n---\n## Hello\nGreet {{who}}.\n",
    );
    let output = home.rago(&["skills"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("[greet] Greet: Say hello"));
    assert!(text.contains("{{who}} required"));
}

#[test]
fn empty_memory_search() {
    let home = Home::new();
    let output = home.rago(&["memory", "search", "anything"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("No memories found."));
}
