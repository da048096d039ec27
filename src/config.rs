//! Sectioned INI config store (`.config` at the store root).
//!
//! The format is deliberately plain: `[section]` headers, `key = value`
//! lines, `#`/`;` comments. Reads tolerate malformed lines; writes rewrite
//! the whole file through a sibling temp file and rename so a crash never
//! leaves a half-written config.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::RagError;

/// Defaults written by `init`, in file order.
pub const DEFAULTS: &[(&str, &[(&str, &str)])] = &[
    (
        "general",
        &[
            ("chunk_strategy", "heading"),
            ("chunk_size", "1000"),
            ("chunk_overlap", "100"),
        ],
    ),
    (
        "embedding",
        &[
            ("provider", "none"),
            ("model", "text-embedding-3-small"),
            ("dimensions", "1536"),
        ],
    ),
    (
        "llm",
        &[
            ("provider", "none"),
            ("model", "gpt-4o-mini"),
            ("max_context", "8000"),
        ],
    ),
    (
        "search",
        &[
            ("default_mode", "hybrid"),
            ("top_k", "10"),
            ("keyword_weight", "0.3"),
            ("vector_weight", "0.7"),
        ],
    ),
    (
        "edges",
        &[
            ("auto_relate", "false"),
            ("relate_threshold", "0.8"),
            ("record_queries", "false"),
        ],
    ),
];

/// Handle on one store's `.config` file.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(store_root: &Path) -> Self {
        Self {
            path: store_root.join(".config"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the default config if the file does not exist yet.
    pub fn write_defaults(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        let mut out = String::new();
        for (i, (section, keys)) in DEFAULTS.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!("[{}]\n", section));
            for (k, v) in keys.iter() {
                out.push_str(&format!("{} = {}\n", k, v));
            }
        }
        write_atomic(&self.path, &out)
    }

    /// Value of the last `key` occurrence inside `[section]`, or `default`.
    ///
    /// `key` is a dotted `section.key` pair; anything else yields the default
    /// (reads never fail on malformed input, only writes do).
    pub fn get(&self, key: &str, default: &str) -> String {
        let Some((section, key)) = key.split_once('.') else {
            return default.to_string();
        };
        let Ok(text) = std::fs::read_to_string(&self.path) else {
            return default.to_string();
        };

        let mut in_section = false;
        let mut value: Option<String> = None;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                in_section = &line[1..line.len() - 1] == section;
                continue;
            }
            if in_section {
                if let Some((k, v)) = line.split_once('=') {
                    if k.trim() == key {
                        value = Some(v.trim().to_string());
                    }
                }
            }
        }
        value.unwrap_or_else(|| default.to_string())
    }

    pub fn get_usize(&self, key: &str, default: usize) -> usize {
        self.get(key, &default.to_string())
            .parse()
            .unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.get(key, &default.to_string())
            .parse()
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self
            .get(key, if default { "true" } else { "false" })
            .as_str()
        {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => default,
        }
    }

    /// Set `section.key` to `value`, rewriting the file atomically.
    ///
    /// Replaces the first matching key in the section; inserts before the
    /// next section header (or EOF) when the key is new; appends the section
    /// when it does not exist at all.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let (section, key) = key
            .split_once('.')
            .ok_or_else(|| RagError::BadConfig(key.to_string()))?;
        if section.is_empty() || key.is_empty() {
            return Err(RagError::BadConfig(format!("{}.{}", section, key)).into());
        }

        let text = std::fs::read_to_string(&self.path).unwrap_or_default();
        let mut lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();

        let mut in_section = false;
        let mut section_end: Option<usize> = None;
        let mut replaced = false;
        let mut found_section = false;

        for i in 0..lines.len() {
            let trimmed = lines[i].trim().to_string();
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                if in_section && section_end.is_none() {
                    section_end = Some(i);
                }
                in_section = &trimmed[1..trimmed.len() - 1] == section;
                if in_section {
                    found_section = true;
                }
                continue;
            }
            if in_section && !replaced {
                if let Some((k, _)) = trimmed.split_once('=') {
                    if k.trim() == key {
                        lines[i] = format!("{} = {}", key, value);
                        replaced = true;
                    }
                }
            }
        }

        if !replaced {
            let new_line = format!("{} = {}", key, value);
            if found_section {
                // Insert just before the next section header, skipping back
                // over trailing blank lines so the section stays compact.
                let mut insert_at = section_end.unwrap_or(lines.len());
                while insert_at > 0 && lines[insert_at - 1].trim().is_empty() {
                    insert_at -= 1;
                }
                lines.insert(insert_at, new_line);
            } else {
                if !lines.is_empty() && !lines.last().map(|l| l.is_empty()).unwrap_or(true) {
                    lines.push(String::new());
                }
                lines.push(format!("[{}]", section));
                lines.push(new_line);
            }
        }

        let mut out = lines.join("\n");
        out.push('\n');
        write_atomic(&self.path, &out)
    }
}

/// Write `content` to `path` via a sibling temp file + rename.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    std::fs::write(&tmp, content).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in_tmp() -> (tempfile::TempDir, ConfigFile) {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = ConfigFile::new(tmp.path());
        (tmp, cfg)
    }

    #[test]
    fn test_defaults_roundtrip() {
        let (_tmp, cfg) = config_in_tmp();
        cfg.write_defaults().unwrap();
        assert_eq!(cfg.get("general.chunk_strategy", ""), "heading");
        assert_eq!(cfg.get("search.default_mode", ""), "hybrid");
        assert_eq!(cfg.get_usize("llm.max_context", 0), 8000);
        assert_eq!(cfg.get_f64("search.vector_weight", 0.0), 0.7);
        assert!(!cfg.get_bool("edges.record_queries", true));
    }

    #[test]
    fn test_get_missing_returns_default() {
        let (_tmp, cfg) = config_in_tmp();
        cfg.write_defaults().unwrap();
        assert_eq!(cfg.get("general.nope", "fallback"), "fallback");
        assert_eq!(cfg.get("nosection.key", "d"), "d");
    }

    #[test]
    fn test_get_last_occurrence_wins() {
        let (_tmp, cfg) = config_in_tmp();
        std::fs::write(cfg.path(), "[a]\nk = 1\nk = 2\n").unwrap();
        assert_eq!(cfg.get("a.k", ""), "2");
    }

    #[test]
    fn test_sections_isolated() {
        let (_tmp, cfg) = config_in_tmp();
        std::fs::write(
            cfg.path(),
            "[general]\nname = general_val\n\n[embedding]\nname = embedding_val\n",
        )
        .unwrap();
        assert_eq!(cfg.get("general.name", ""), "general_val");
        assert_eq!(cfg.get("embedding.name", ""), "embedding_val");
    }

    #[test]
    fn test_comments_and_malformed_ignored() {
        let (_tmp, cfg) = config_in_tmp();
        std::fs::write(
            cfg.path(),
            "[a]\n# comment\n; also comment\nnot a kv line\nk = v\n",
        )
        .unwrap();
        assert_eq!(cfg.get("a.k", ""), "v");
    }

    #[test]
    fn test_set_replaces_existing() {
        let (_tmp, cfg) = config_in_tmp();
        cfg.write_defaults().unwrap();
        cfg.set("general.chunk_size", "500").unwrap();
        assert_eq!(cfg.get("general.chunk_size", ""), "500");
        // Other keys in the section are untouched.
        assert_eq!(cfg.get("general.chunk_overlap", ""), "100");
    }

    #[test]
    fn test_set_inserts_into_existing_section() {
        let (_tmp, cfg) = config_in_tmp();
        std::fs::write(cfg.path(), "[a]\nk = 1\n\n[b]\nx = 2\n").unwrap();
        cfg.set("a.newkey", "nv").unwrap();
        assert_eq!(cfg.get("a.newkey", ""), "nv");
        assert_eq!(cfg.get("b.x", ""), "2");
        // The new key must land inside [a], before the [b] header.
        let text = std::fs::read_to_string(cfg.path()).unwrap();
        let a_pos = text.find("newkey").unwrap();
        let b_pos = text.find("[b]").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn test_set_appends_new_section() {
        let (_tmp, cfg) = config_in_tmp();
        std::fs::write(cfg.path(), "[a]\nk = 1\n").unwrap();
        cfg.set("zz.key", "val").unwrap();
        assert_eq!(cfg.get("zz.key", ""), "val");
        assert_eq!(cfg.get("a.k", ""), "1");
    }

    #[test]
    fn test_set_rejects_undotted_key() {
        let (_tmp, cfg) = config_in_tmp();
        assert!(cfg.set("nodot", "v").is_err());
    }
}
