//! Skill manifests — parsed from `SKILL.md` frontmatter.
//!
//! The frontmatter block is delimited by `---` lines at the top of the
//! file. Manifests in the wild are sloppier than strict YAML allows:
//! descriptions carry bare colons, metadata shows up as JSON5-ish inline
//! maps, and block scalars appear with both `|` and `>`. The parser is
//! therefore tolerant — it splits entries on the first colon of each
//! top-level key and keeps every entry's raw lines, so reserializing a
//! parsed document reproduces it byte for byte.

use std::path::Path;

use crate::runtime::cron::SkillCatalog;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Name validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validates a skill name: `^[a-z0-9]+(-[a-z0-9]+)*$`
pub fn is_valid_skill_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let mut expect_alnum = true;
    for ch in name.chars() {
        if expect_alnum {
            if !ch.is_ascii_lowercase() && !ch.is_ascii_digit() {
                return false;
            }
            expect_alnum = false;
        } else if ch == '-' {
            expect_alnum = true;
        } else if !ch.is_ascii_lowercase() && !ch.is_ascii_digit() {
            return false;
        }
    }
    !expect_alnum
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frontmatter document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One top-level frontmatter entry: its key, the inline value (text after
/// the first colon, may itself contain colons or JSON5-ish braces), and the
/// raw continuation lines (block scalars, nested maps, list items).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontmatterEntry {
    pub key: String,
    pub inline: String,
    /// Raw lines exactly as written, indentation included.
    pub raw_lines: Vec<String>,
}

impl FrontmatterEntry {
    /// List items under this entry (`- value` continuation lines).
    pub fn list_items(&self) -> Vec<String> {
        let mut items: Vec<String> = self
            .raw_lines
            .iter()
            .skip(1)
            .filter_map(|line| line.trim_start().strip_prefix("- "))
            .map(|item| item.trim().to_string())
            .collect();
        // Inline `[a, b]` form.
        if items.is_empty() {
            let inline = self.inline.trim();
            if let Some(body) = inline.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                items = body
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
        }
        items
    }

    /// The scalar value: inline text, or joined block-scalar lines when the
    /// inline part is a `|`/`>` indicator.
    pub fn scalar(&self) -> String {
        let inline = self.inline.trim();
        if inline == "|" || inline == ">" || inline == "|-" || inline == ">-" {
            let lines: Vec<&str> = self
                .raw_lines
                .iter()
                .skip(1)
                .map(|l| l.trim_start())
                .collect();
            let sep = if inline.starts_with('|') { "\n" } else { " " };
            lines.join(sep)
        } else {
            inline.to_string()
        }
    }
}

/// A parsed frontmatter document plus the markdown body after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillDocument {
    pub entries: Vec<FrontmatterEntry>,
    pub body: String,
}

impl SkillDocument {
    pub fn get(&self, key: &str) -> Option<&FrontmatterEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn name(&self) -> Option<String> {
        self.get("name").map(|e| e.scalar()).filter(|s| !s.is_empty())
    }

    pub fn description(&self) -> Option<String> {
        self.get("description")
            .map(|e| e.scalar())
            .filter(|s| !s.is_empty())
    }

    /// Reconstruct the full document. Byte-identical to the parsed input.
    pub fn serialize(&self) -> String {
        let mut out = String::from("---\n");
        for entry in &self.entries {
            for line in &entry.raw_lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push_str("---\n");
        out.push_str(&self.body);
        out
    }
}

/// Parse a SKILL.md. Returns `None` when the file has no frontmatter block.
pub fn parse_skill_document(content: &str) -> Option<SkillDocument> {
    let mut lines = content.lines();
    if lines.next()? != "---" {
        return None;
    }

    let mut entries: Vec<FrontmatterEntry> = Vec::new();
    let mut closed = false;
    let mut consumed = 1usize; // the opening delimiter

    for line in lines.by_ref() {
        consumed += 1;
        if line == "---" {
            closed = true;
            break;
        }
        let is_continuation =
            line.starts_with(' ') || line.starts_with('\t') || line.is_empty();
        if is_continuation {
            match entries.last_mut() {
                Some(entry) => entry.raw_lines.push(line.to_string()),
                None => {
                    // Stray leading continuation: keep it attached to a
                    // synthetic entry so serialization stays lossless.
                    entries.push(FrontmatterEntry {
                        key: String::new(),
                        inline: String::new(),
                        raw_lines: vec![line.to_string()],
                    });
                }
            }
            continue;
        }
        // Top-level entry: split on the FIRST colon only; everything after
        // it is opaque (colons, braces, quotes all welcome).
        match line.split_once(':') {
            Some((key, rest)) => entries.push(FrontmatterEntry {
                key: key.trim().to_string(),
                inline: rest.trim_start().to_string(),
                raw_lines: vec![line.to_string()],
            }),
            None => match entries.last_mut() {
                Some(entry) => entry.raw_lines.push(line.to_string()),
                None => {
                    entries.push(FrontmatterEntry {
                        key: String::new(),
                        inline: String::new(),
                        raw_lines: vec![line.to_string()],
                    });
                }
            },
        }
    }

    if !closed {
        return None;
    }

    let body: String = content
        .split_inclusive('\n')
        .skip(consumed)
        .collect::<String>();
    Some(SkillDocument { entries, body })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog loading
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Scan `<dir>/<skill>/SKILL.md` files into a catalog. The catalog version
/// is a digest of the manifest contents, so any edit bumps it and
/// invalidates cached snapshots.
pub fn load_catalog(dir: &Path) -> SkillCatalog {
    use sha2::{Digest, Sha256};

    let mut skills: Vec<String> = Vec::new();
    let mut hasher = Sha256::new();

    if let Ok(entries) = std::fs::read_dir(dir) {
        let mut paths: Vec<_> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        paths.sort();
        for path in paths {
            let manifest_path = path.join("SKILL.md");
            let Ok(content) = std::fs::read_to_string(&manifest_path) else {
                continue;
            };
            let Some(doc) = parse_skill_document(&content) else {
                tracing::warn!(path = %manifest_path.display(), "SKILL.md has no frontmatter");
                continue;
            };
            match doc.name() {
                Some(name) if is_valid_skill_name(&name) => {
                    hasher.update(content.as_bytes());
                    skills.push(name);
                }
                Some(name) => {
                    tracing::warn!(skill = %name, "invalid skill name; skipping");
                }
                None => {
                    tracing::warn!(path = %manifest_path.display(), "SKILL.md missing name");
                }
            }
        }
    }

    let digest = hasher.finalize();
    let version = u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ]);
    tracing::info!(skills = skills.len(), "skill catalog loaded");
    SkillCatalog::new(version, skills)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Name validation ─────────────────────────────────────────────

    #[test]
    fn valid_skill_names() {
        assert!(is_valid_skill_name("git-helper"));
        assert!(is_valid_skill_name("a"));
        assert!(is_valid_skill_name("my-cool-skill-3"));
    }

    #[test]
    fn invalid_skill_names() {
        assert!(!is_valid_skill_name(""));
        assert!(!is_valid_skill_name("Git-Helper"));
        assert!(!is_valid_skill_name("my_skill"));
        assert!(!is_valid_skill_name("my--skill"));
        assert!(!is_valid_skill_name("-leading"));
        assert!(!is_valid_skill_name("trailing-"));
    }

    // ── Parsing ─────────────────────────────────────────────────────

    #[test]
    fn parses_basic_manifest() {
        let md = "---\nname: git-helper\ndescription: Git workflow automation\ntools: [exec, web.search]\n---\n# Git helper\n";
        let doc = parse_skill_document(md).unwrap();
        assert_eq!(doc.name().as_deref(), Some("git-helper"));
        assert_eq!(doc.description().as_deref(), Some("Git workflow automation"));
        assert_eq!(
            doc.get("tools").unwrap().list_items(),
            vec!["exec", "web.search"]
        );
        assert_eq!(doc.body, "# Git helper\n");
    }

    #[test]
    fn no_frontmatter_returns_none() {
        assert!(parse_skill_document("# just markdown\n").is_none());
        assert!(parse_skill_document("---\nname: x\nno closing delimiter\n").is_none());
    }

    #[test]
    fn inline_description_with_colons_survives() {
        let md = "---\nname: memo\ndescription: Manage notes: create, list, and search: fast\n---\nbody\n";
        let doc = parse_skill_document(md).unwrap();
        assert_eq!(
            doc.description().as_deref(),
            Some("Manage notes: create, list, and search: fast")
        );
        assert_eq!(doc.serialize(), md);
    }

    #[test]
    fn block_scalar_round_trips() {
        let md = "---\nname: memo\ndescription: |\n  Long form text.\n  With a second line.\n---\nbody\n";
        let doc = parse_skill_document(md).unwrap();
        assert_eq!(
            doc.description().as_deref(),
            Some("Long form text.\nWith a second line.")
        );
        assert_eq!(doc.serialize(), md);
    }

    #[test]
    fn nested_map_round_trips() {
        let md = "---\nname: sonoscli\nrequires:\n  bins: [sonos]\n  env: [SONOS_DEVICE]\n  os:\n    - macos\n    - linux\n---\n";
        let doc = parse_skill_document(md).unwrap();
        let requires = doc.get("requires").unwrap();
        assert_eq!(requires.raw_lines.len(), 6);
        assert_eq!(doc.serialize(), md);
    }

    #[test]
    fn json5_like_metadata_round_trips() {
        let md = "---\nname: viz\nmetadata: {author: \"claw\", tags: [charts, color], rank: 3}\n---\n";
        let doc = parse_skill_document(md).unwrap();
        assert_eq!(
            doc.get("metadata").unwrap().inline,
            "{author: \"claw\", tags: [charts, color], rank: 3}"
        );
        assert_eq!(doc.serialize(), md);
    }

    #[test]
    fn dashed_list_items() {
        let md = "---\nname: x\naliases:\n  - clawd\n  - crabbot\n---\n";
        let doc = parse_skill_document(md).unwrap();
        assert_eq!(doc.get("aliases").unwrap().list_items(), vec!["clawd", "crabbot"]);
        assert_eq!(doc.serialize(), md);
    }

    // ── Catalog loading ─────────────────────────────────────────────

    #[test]
    fn loads_catalog_and_versions_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let skill = dir.path().join("git-helper");
        std::fs::create_dir_all(&skill).unwrap();
        std::fs::write(
            skill.join("SKILL.md"),
            "---\nname: git-helper\ndescription: d\n---\n",
        )
        .unwrap();

        let first = load_catalog(dir.path());
        assert_eq!(first.skills, vec!["git-helper".to_string()]);

        std::fs::write(
            skill.join("SKILL.md"),
            "---\nname: git-helper\ndescription: changed\n---\n",
        )
        .unwrap();
        let second = load_catalog(dir.path());
        assert_ne!(first.version, second.version);
    }

    #[test]
    fn invalid_names_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let skill = dir.path().join("Bad_Name");
        std::fs::create_dir_all(&skill).unwrap();
        std::fs::write(skill.join("SKILL.md"), "---\nname: Bad_Name\n---\n").unwrap();
        let catalog = load_catalog(dir.path());
        assert!(catalog.skills.is_empty());
    }
}
