use anyhow::Context as _;
use std::path::Path;
use std::process::{Command, Output, Stdio};

pub const PETSTORE_YAML: &str = r"openapi: 3.0.3
info:
  title: Petstore
  version: 1.0.0
paths:
  /pets/{petId}:
    get:
      operationId: getPet
      parameters:
        - name: petId
          in: path
          required: true
          schema:
            type: string
      responses:
        '200':
          description: ok
";

pub fn run_cli(args: &[&str], cwd: &Path) -> anyhow::Result<Output> {
    let bin = env!("CARGO_BIN_EXE_unrelated-tooldoc");
    Command::new(bin)
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .env_remove("TOOLDOC_CONFIG")
        .stdin(Stdio::null())
        .output()
        .context("run unrelated-tooldoc")
}

pub fn run_cli_with_stdin(args: &[&str], cwd: &Path, stdin: &str) -> anyhow::Result<Output> {
    use std::io::Write as _;

    let bin = env!("CARGO_BIN_EXE_unrelated-tooldoc");
    let mut child = Command::new(bin)
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .env_remove("TOOLDOC_CONFIG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("spawn unrelated-tooldoc")?;
    child
        .stdin
        .take()
        .context("stdin handle")?
        .write_all(stdin.as_bytes())
        .context("write stdin")?;
    child.wait_with_output().context("wait for unrelated-tooldoc")
}
