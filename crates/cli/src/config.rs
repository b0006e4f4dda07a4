use anyhow::Context as _;
use std::path::Path;
use unrelated_tooldoc::ConversionConfig;

/// Load a conversion config (YAML or JSON). No path means defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ConversionConfig> {
    let Some(path) = path else {
        return Ok(ConversionConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    let cfg = ConversionConfig::from_yaml_str(&text)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

/// Read the source document from stdin.
pub fn read_stdin() -> anyhow::Result<String> {
    std::io::read_to_string(std::io::stdin()).context("read input from stdin")
}

/// Write `text` to a file, or stdout when no path is given.
pub fn write_output(path: Option<&Path>, text: &str) -> anyhow::Result<()> {
    match path {
        Some(p) => {
            if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create dir {}", parent.display()))?;
            }
            std::fs::write(p, text).with_context(|| format!("write {}", p.display()))
        }
        None => {
            use std::io::Write as _;
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(text.as_bytes())
                .and_then(|()| stdout.write_all(b"\n"))
                .context("write output to stdout")
        }
    }
}
