//! File-type detection and text extraction.
//!
//! Native formats (text, code, config, markdown, CSV, JSON) are decoded
//! in-process. Binary formats (PDF, HTML, DOCX) are handed to external
//! extractors invoked by well-known name — `pdftotext` and `pandoc` — with a
//! caller-supplied deadline. A missing tool surfaces as `ParseUnavailable`
//! so ingest can decide to skip or fall back to raw bytes.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tokio::process::Command;

use crate::error::RagError;

/// File categories recognized by ingest. The category picks both the
/// extraction path and the default chunk strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Markdown,
    Text,
    Pdf,
    Html,
    Docx,
    Csv,
    Json,
    Code,
    Config,
    Unknown,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Markdown => "markdown",
            FileType::Text => "text",
            FileType::Pdf => "pdf",
            FileType::Html => "html",
            FileType::Docx => "docx",
            FileType::Csv => "csv",
            FileType::Json => "json",
            FileType::Code => "code",
            FileType::Config => "config",
            FileType::Unknown => "unknown",
        }
    }
}

const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "go", "rs", "java", "c", "cpp", "h", "hpp", "rb", "php",
    "swift", "kt", "scala", "sh", "bash", "zsh", "r", "jl", "lua", "pl",
];

const CONFIG_EXTENSIONS: &[&str] = &["toml", "ini", "cfg", "conf", "yaml", "yml", "env"];

/// Classify a file by suffix, falling back to a best-effort `file --mime-type`
/// probe for unknown extensions. The probe being absent is tolerated.
pub fn detect(path: &Path) -> FileType {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "md" | "markdown" => FileType::Markdown,
        "txt" | "text" | "log" => FileType::Text,
        "pdf" => FileType::Pdf,
        "html" | "htm" => FileType::Html,
        "docx" => FileType::Docx,
        "csv" => FileType::Csv,
        "json" | "jsonl" => FileType::Json,
        e if CODE_EXTENSIONS.contains(&e) => FileType::Code,
        e if CONFIG_EXTENSIONS.contains(&e) => FileType::Config,
        _ => probe_mime(path),
    }
}

fn probe_mime(path: &Path) -> FileType {
    let output = std::process::Command::new("file")
        .arg("--brief")
        .arg("--mime-type")
        .arg(path)
        .output();
    let Ok(output) = output else {
        return FileType::Unknown;
    };
    if !output.status.success() {
        return FileType::Unknown;
    }
    let mime = String::from_utf8_lossy(&output.stdout).trim().to_string();
    match mime.as_str() {
        "application/pdf" => FileType::Pdf,
        "text/html" => FileType::Html,
        "application/json" => FileType::Json,
        "text/csv" => FileType::Csv,
        "text/markdown" => FileType::Markdown,
        m if m.starts_with("text/") => FileType::Text,
        _ => FileType::Unknown,
    }
}

/// Extract a file's text according to its detected type.
///
/// `deadline` bounds each external decoder invocation; expiry returns
/// [`RagError::Timeout`] and leaves the store untouched.
pub async fn parse_file(path: &Path, ftype: FileType, deadline: Duration) -> Result<String> {
    match ftype {
        FileType::Text | FileType::Code | FileType::Config | FileType::Unknown => {
            Ok(read_lossy(path)?)
        }
        FileType::Markdown => {
            let text = read_lossy(path)?;
            Ok(strip_frontmatter(&text).to_string())
        }
        FileType::Csv => Ok(parse_csv(path)?),
        FileType::Json => {
            let text = read_lossy(path)?;
            Ok(flatten_json_text(&text))
        }
        FileType::Pdf => {
            run_extractor("pdftotext", &[path.as_os_str(), "-".as_ref()], path, deadline).await
        }
        FileType::Docx => {
            run_extractor(
                "pandoc",
                &["-t".as_ref(), "plain".as_ref(), path.as_os_str()],
                path,
                deadline,
            )
            .await
        }
        FileType::Html => parse_html(path, deadline).await,
    }
}

/// Read a file as UTF-8 with lossy replacement on decode errors.
pub fn read_lossy(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Strip a leading YAML frontmatter block: lines between a first-line `---`
/// and the next `---`. Anything else passes through unchanged.
pub fn strip_frontmatter(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("---") else {
        return text;
    };
    let Some(end) = rest.find("\n---") else {
        return text;
    };
    let after = &rest[end + 4..];
    // Skip the remainder of the closing delimiter line.
    match after.find('\n') {
        Some(nl) => after[nl + 1..].trim_start_matches('\n'),
        None => "",
    }
}

/// Render CSV rows as `--- Record N ---` blocks of `header: value` lines.
/// The first row supplies headers; quoted fields arrive unquoted.
fn parse_csv(path: &Path) -> Result<String> {
    let mut reader = match csv::ReaderBuilder::new().flexible(true).from_path(path) {
        Ok(r) => r,
        Err(_) => return read_lossy(path),
    };
    let headers = match reader.headers() {
        Ok(h) => h.clone(),
        Err(_) => return read_lossy(path),
    };

    let mut lines = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let Ok(record) = record else {
            return read_lossy(path);
        };
        lines.push(format!("--- Record {} ---", i + 1));
        for (header, field) in headers.iter().zip(record.iter()) {
            if !field.is_empty() {
                lines.push(format!("{}: {}", header, field));
            }
        }
    }
    Ok(lines.join("\n"))
}

/// Flatten scalar JSON leaves to `dotted.path: value` lines; on parse
/// failure the raw text is returned instead.
fn flatten_json_text(text: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return text.to_string();
    };
    let mut lines = Vec::new();
    flatten_json(&value, "", &mut lines);
    lines.join("\n")
}

fn flatten_json(value: &Value, prefix: &str, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten_json(v, &format!("{}{}.", prefix, k), out);
            }
        }
        Value::Array(arr) => {
            for (i, v) in arr.iter().enumerate() {
                flatten_json(v, &format!("{}{}.", prefix, i), out);
            }
        }
        scalar => {
            let key = prefix.trim_end_matches('.');
            let rendered = match scalar {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push(format!("{}: {}", key, rendered));
        }
    }
}

async fn parse_html(path: &Path, deadline: Duration) -> Result<String> {
    match run_extractor(
        "pandoc",
        &["-t".as_ref(), "plain".as_ref(), path.as_os_str()],
        path,
        deadline,
    )
    .await
    {
        Ok(text) => Ok(text),
        Err(e) => {
            if matches!(e.downcast_ref::<RagError>(), Some(RagError::Timeout(_))) {
                return Err(e);
            }
            // Tag-stripping fallback keeps HTML ingest working without pandoc.
            let raw = read_lossy(path)?;
            Ok(strip_html(&raw))
        }
    }
}

/// Run a named external extractor, bounded by `deadline`.
async fn run_extractor(
    program: &str,
    args: &[&std::ffi::OsStr],
    source: &Path,
    deadline: Duration,
) -> Result<String> {
    let mut command = Command::new(program);
    command.args(args);
    let output = match tokio::time::timeout(deadline, command.output()).await {
        Err(_) => return Err(RagError::Timeout(deadline).into()),
        Ok(Err(e)) => {
            return Err(RagError::ParseUnavailable {
                path: source.to_path_buf(),
                reason: format!("{} not available: {}", program, e),
            }
            .into())
        }
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        return Err(RagError::ParseUnavailable {
            path: source.to_path_buf(),
            reason: format!("{} exited with {}", program, output.status),
        }
        .into());
    }
    let text = String::from_utf8_lossy(&output.stdout).into_owned();
    if text.trim().is_empty() {
        return Err(RagError::ParseUnavailable {
            path: source.to_path_buf(),
            reason: format!("{} produced no text", program),
        }
        .into());
    }
    Ok(text)
}

/// Remove script/style blocks and all tags, collapsing whitespace.
fn strip_html(html: &str) -> String {
    let without_scripts = strip_element(html, "script");
    let without_styles = strip_element(&without_scripts, "style");

    let mut out = String::with_capacity(without_styles.len());
    let mut in_tag = false;
    for c in without_styles.chars() {
        match c {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' if in_tag => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop `<tag ...> ... </tag>` blocks, case-insensitively. ASCII-lowercase
/// search keeps byte offsets aligned with the original string.
fn strip_element(html: &str, tag: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);

    let mut out = String::with_capacity(html.len());
    let mut pos = 0;
    while let Some(start) = lower[pos..].find(&open) {
        let start = pos + start;
        out.push_str(&html[pos..start]);
        match lower[start..].find(&close) {
            Some(end) => pos = start + end + close.len(),
            None => return out, // unterminated block: drop the rest
        }
    }
    out.push_str(&html[pos..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_detect_by_suffix() {
        assert_eq!(detect(&PathBuf::from("a.md")), FileType::Markdown);
        assert_eq!(detect(&PathBuf::from("a.rs")), FileType::Code);
        assert_eq!(detect(&PathBuf::from("a.yaml")), FileType::Config);
        assert_eq!(detect(&PathBuf::from("a.jsonl")), FileType::Json);
        assert_eq!(detect(&PathBuf::from("A.CSV")), FileType::Csv);
    }

    #[test]
    fn test_strip_frontmatter() {
        let doc = "---\ntitle: x\ntags: [a]\n---\n# Body\n\ntext\n";
        assert_eq!(strip_frontmatter(doc), "# Body\n\ntext\n");
    }

    #[test]
    fn test_strip_frontmatter_absent() {
        let doc = "# Body\n\ntext\n";
        assert_eq!(strip_frontmatter(doc), doc);
    }

    #[test]
    fn test_strip_frontmatter_unterminated() {
        let doc = "---\ntitle: x\nno closing";
        assert_eq!(strip_frontmatter(doc), doc);
    }

    #[test]
    fn test_flatten_json() {
        let text = r#"{"a": {"b": 1, "c": "two"}, "list": [true, null]}"#;
        let flat = flatten_json_text(text);
        assert!(flat.contains("a.b: 1"));
        assert!(flat.contains("a.c: two"));
        assert!(flat.contains("list.0: true"));
        assert!(flat.contains("list.1: null"));
    }

    #[test]
    fn test_flatten_json_invalid_returns_raw() {
        let text = "not json at all";
        assert_eq!(flatten_json_text(text), text);
    }

    #[test]
    fn test_parse_csv_records() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("t.csv");
        std::fs::write(&path, "name,city\n\"Ada\",London\nAlan,\n").unwrap();
        let text = parse_csv(&path).unwrap();
        assert!(text.contains("--- Record 1 ---"));
        assert!(text.contains("name: Ada"));
        assert!(text.contains("city: London"));
        assert!(text.contains("--- Record 2 ---"));
        assert!(text.contains("name: Alan"));
        // Empty field is skipped entirely.
        assert!(!text.contains("city: \n"));
    }

    #[test]
    fn test_strip_html_tags_and_scripts() {
        let html = "<html><script>var x = '<b>';</script><style>p{}</style>\
                    <p>Hello <b>world</b></p></html>";
        assert_eq!(strip_html(html), "Hello world");
    }

    #[tokio::test]
    async fn test_parse_plain_text_lossy() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("t.txt");
        std::fs::write(&path, b"ok \xFF bytes").unwrap();
        let text = parse_file(&path, FileType::Text, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(text.starts_with("ok "));
        assert!(text.contains('\u{FFFD}'));
    }
}
