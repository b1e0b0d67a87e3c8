//! Recovery of file blocks from generated-code documents.
//!
//! The coder is asked to emit ``## File: `path` `` followed by a fenced block,
//! but models drift between heading styles. Every pattern below is matched
//! against the whole document, in order; the first extraction of a path wins
//! and later matches for the same path are discarded.
//!
//! This module only matches text. Resolving paths against a workspace and
//! enforcing the sandbox happen in [`crate::io::workspace`].

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::core::types::FileBlock;

/// Extraction patterns in priority order. Capture 1 is the path, capture 2 the body.
static PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("file-heading", r"(?s)## File:\s*`([^`\n]+)`\s*```[^\n`]*\n(.*?)```"),
        ("code-heading", r"(?s)###\s*`([^`\n]+)`\s*```[^\n`]*\n(.*?)```"),
        ("bold-path", r"(?s)\*\*([^*\n]+\.\w+)\*\*\s*```[^\n`]*\n(.*?)```"),
        ("path-colon", r"(?sm)^([a-zA-Z0-9_\-./]+\.\w+):\s*```[^\n`]*\n(.*?)```"),
        ("comment-path", r"(?sm)^# ([a-zA-Z0-9_\-./]+\.\w+)\s*```[^\n`]*\n(.*?)```"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("extraction pattern")))
    .collect()
});

/// Extract all file blocks from `document`.
///
/// Paths are trimmed and normalized (see [`normalize_path`]); contents are
/// trimmed. Matches whose path normalizes to nothing are skipped.
pub fn extract_blocks(document: &str) -> Vec<FileBlock> {
    let mut seen = HashSet::new();
    let mut blocks = Vec::new();

    for (name, pattern) in &*PATTERNS {
        for caps in pattern.captures_iter(document) {
            let (Some(raw_path), Some(body)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let Some(path) = normalize_path(raw_path.as_str()) else {
                continue;
            };
            if !seen.insert(path.clone()) {
                debug!(pattern = name, path = %path, "duplicate block discarded");
                continue;
            }
            debug!(pattern = name, path = %path, "extracted block");
            blocks.push(FileBlock {
                path,
                content: body.as_str().trim().to_string(),
            });
        }
    }

    blocks
}

/// Trim whitespace and stray markdown from a captured path and drop leading `./`.
pub fn normalize_path(raw: &str) -> Option<String> {
    let mut path = raw.trim().trim_matches(|c| matches!(c, '`' | '"' | '\''));
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    Some(path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_file_heading_block() {
        let doc = "## File: `a/b.py`\n```python\nprint(1)\n```";
        let blocks = extract_blocks(doc);
        assert_eq!(
            blocks,
            vec![FileBlock {
                path: "a/b.py".to_string(),
                content: "print(1)".to_string(),
            }]
        );
    }

    #[test]
    fn extracts_multiple_files_in_document_order() {
        let doc = "\
## File: `index.html`
```html
<h1>Hi</h1>
```

## Explanation
Static page.

## File: `static/app.js`
```javascript
console.log(1);
```
";
        let blocks = extract_blocks(doc);
        let paths: Vec<&str> = blocks.iter().map(|b| b.path.as_str()).collect();
        assert_eq!(paths, vec!["index.html", "static/app.js"]);
        assert_eq!(blocks[1].content, "console.log(1);");
    }

    #[test]
    fn same_path_from_later_pattern_is_discarded() {
        let doc = "\
**app.py**
```python
print('bold')
```

## File: `app.py`
```python
print('heading')
```
";
        let blocks = extract_blocks(doc);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].content, "print('heading')");
    }

    #[test]
    fn repeated_path_in_same_pattern_keeps_first() {
        let doc = "## File: `a.txt`\n```\none\n```\n## File: `./a.txt`\n```\ntwo\n```";
        let blocks = extract_blocks(doc);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].content, "one");
    }

    #[test]
    fn recognizes_alternate_styles() {
        let doc = "\
### `src/lib.rs`
```rust
pub fn f() {}
```

**README.md**
```markdown
# Title
```

setup.cfg:
```
[metadata]
```

# tools/run.sh
```bash
echo hi
```
";
        let blocks = extract_blocks(doc);
        let paths: Vec<&str> = blocks.iter().map(|b| b.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["src/lib.rs", "README.md", "setup.cfg", "tools/run.sh"]
        );
    }

    #[test]
    fn unfenced_text_yields_nothing() {
        assert!(extract_blocks("Here is my plan: write main.py and test it.").is_empty());
    }

    #[test]
    fn normalize_strips_markup_and_dot_prefix() {
        assert_eq!(normalize_path("  ./src/main.rs "), Some("src/main.rs".to_string()));
        assert_eq!(normalize_path("`x.py`"), Some("x.py".to_string()));
        assert_eq!(normalize_path("/abs/x.py"), Some("/abs/x.py".to_string()));
        assert_eq!(normalize_path(" ./ "), None);
    }
}
