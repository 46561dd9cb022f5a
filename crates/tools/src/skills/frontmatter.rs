//! Reader for the YAML subset used in `SKILL.md` frontmatter.
//!
//! Supported: `key: value` scalars (bare, single- or double-quoted),
//! booleans, null, numbers, inline lists `[a, b]`, block lists of
//! scalars, block lists of maps, and nested maps by indentation. The
//! result is a JSON object so it can be deserialized with serde.

use serde_json::{Map, Number, Value};

/// Split a document into `(frontmatter, body)`. Documents without a
/// leading `---` line have no frontmatter.
pub fn split(document: &str) -> Result<(Option<&str>, &str), String> {
    let trimmed = document.trim_start_matches('\u{feff}');
    let Some(rest) = trimmed
        .strip_prefix("---\n")
        .or_else(|| trimmed.strip_prefix("---\r\n"))
    else {
        return Ok((None, trimmed));
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let body = &rest[offset + line.len()..];
            return Ok((Some(&rest[..offset]), body));
        }
        offset += line.len();
    }
    Err("frontmatter is not closed by a '---' line".into())
}

struct Line<'a> {
    number: usize,
    indent: usize,
    text: &'a str,
}

pub fn parse(source: &str) -> Result<Map<String, Value>, String> {
    let lines: Vec<Line<'_>> = source
        .lines()
        .enumerate()
        .filter_map(|(i, raw)| {
            let text = raw.trim_end();
            let content = text.trim_start();
            if content.is_empty() || content.starts_with('#') {
                return None;
            }
            Some(Line {
                number: i + 1,
                indent: text.len() - content.len(),
                text: content,
            })
        })
        .collect();

    let mut pos = 0;
    let map = parse_map(&lines, &mut pos, 0)?;
    if let Some(line) = lines.get(pos) {
        return Err(format!("line {}: unexpected indentation", line.number));
    }
    Ok(map)
}

fn is_list_item(text: &str) -> bool {
    text == "-" || text.starts_with("- ")
}

/// `key: rest` or `key:`. Quoted scalars and inline lists are never keys.
fn split_key(text: &str) -> Option<(&str, &str)> {
    if text.starts_with(['"', '\'', '[', '{']) {
        return None;
    }
    if let Some(key) = text.strip_suffix(':') {
        return Some((key.trim(), ""));
    }
    text.split_once(": ").map(|(k, v)| (k.trim(), v.trim()))
}

fn parse_map(lines: &[Line<'_>], pos: &mut usize, indent: usize) -> Result<Map<String, Value>, String> {
    let mut map = Map::new();
    while let Some(line) = lines.get(*pos) {
        if line.indent < indent || (line.indent == indent && is_list_item(line.text)) {
            break;
        }
        if line.indent > indent {
            return Err(format!("line {}: unexpected indentation", line.number));
        }
        let (key, rest) = split_key(line.text)
            .ok_or_else(|| format!("line {}: expected 'key: value'", line.number))?;
        *pos += 1;
        let value = parse_entry(rest, lines, pos, indent)?;
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

/// The value of an entry whose key sits at `indent`: inline, or a nested
/// block on the following lines.
fn parse_entry(rest: &str, lines: &[Line<'_>], pos: &mut usize, indent: usize) -> Result<Value, String> {
    if !rest.is_empty() {
        return Ok(scalar(rest));
    }
    match lines.get(*pos) {
        Some(next) if next.indent > indent => {
            if is_list_item(next.text) {
                parse_list(lines, pos, next.indent).map(Value::Array)
            } else {
                parse_map(lines, pos, next.indent).map(Value::Object)
            }
        }
        // `key:` followed by `- item` at the same indentation.
        Some(next) if next.indent == indent && is_list_item(next.text) => {
            parse_list(lines, pos, indent).map(Value::Array)
        }
        _ => Ok(Value::Null),
    }
}

fn parse_list(lines: &[Line<'_>], pos: &mut usize, indent: usize) -> Result<Vec<Value>, String> {
    let mut items = Vec::new();
    while let Some(line) = lines.get(*pos) {
        if line.indent != indent || !is_list_item(line.text) {
            break;
        }
        let item = line.text[1..].trim_start();
        // Column of the item's first character.
        let item_indent = indent + (line.text.len() - item.len());
        *pos += 1;

        if item.is_empty() {
            items.push(parse_entry("", lines, pos, indent)?);
            continue;
        }
        match split_key(item) {
            Some((key, rest)) => {
                let mut map = Map::new();
                map.insert(key.to_string(), parse_entry(rest, lines, pos, item_indent)?);
                if lines.get(*pos).is_some_and(|l| l.indent == item_indent) {
                    map.extend(parse_map(lines, pos, item_indent)?);
                }
                items.push(Value::Object(map));
            }
            None => items.push(scalar(item)),
        }
    }
    Ok(items)
}

fn strip_comment(text: &str) -> &str {
    match text.find(" #") {
        Some(i) => text[..i].trim_end(),
        None => text,
    }
}

fn unquote(text: &str) -> Option<String> {
    let inner = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .map(|t| t.replace("\\\"", "\"").replace("\\n", "\n"));
    inner.or_else(|| {
        text.strip_prefix('\'')
            .and_then(|t| t.strip_suffix('\''))
            .map(|t| t.replace("''", "'"))
    })
}

fn scalar(text: &str) -> Value {
    let text = text.trim();
    if let Some(s) = unquote(text) {
        return Value::String(s);
    }
    if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        return Value::Array(split_inline(inner).into_iter().map(scalar).collect());
    }
    let text = strip_comment(text);
    match text {
        "true" | "True" | "yes" => return Value::Bool(true),
        "false" | "False" | "no" => return Value::Bool(false),
        "null" | "~" | "" => return Value::Null,
        _ => {}
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    Value::String(text.to_string())
}

/// Split the inside of `[...]` on commas outside quotes.
fn split_inline(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, ',') => {
                parts.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = inner[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_frontmatter_from_body() {
        let (front, body) = split("---\nname: x\n---\n# Title\n").unwrap();
        assert_eq!(front, Some("name: x\n"));
        assert_eq!(body, "# Title\n");

        let (front, body) = split("# No frontmatter").unwrap();
        assert!(front.is_none());
        assert_eq!(body, "# No frontmatter");

        assert!(split("---\nname: x\n").is_err());
    }

    #[test]
    fn scalars_and_inline_lists() {
        let map = parse(
            "name: code-review\n\
             description: \"Review: the diff\"\n\
             version: 1.2\n\
             fork_mode: false\n\
             tags: [rust, 'code review', 3]\n\
             author: Jane # maintainer\n",
        )
        .unwrap();
        assert_eq!(map["name"], "code-review");
        assert_eq!(map["description"], "Review: the diff");
        assert_eq!(map["version"], json!(1.2));
        assert_eq!(map["fork_mode"], false);
        assert_eq!(map["tags"], json!(["rust", "code review", 3]));
        assert_eq!(map["author"], "Jane");
    }

    #[test]
    fn block_lists_of_scalars_and_maps() {
        let map = parse(
            "tags:\n\
             \x20 - git\n\
             \x20 - vcs\n\
             variables:\n\
             \x20 - name: branch\n\
             \x20   type: string\n\
             \x20   required: true\n\
             \x20   pattern: \"^[a-z/-]+$\"\n\
             \x20 - name: count\n\
             \x20   type: integer\n\
             \x20   default: 3\n",
        )
        .unwrap();
        assert_eq!(map["tags"], json!(["git", "vcs"]));
        assert_eq!(
            map["variables"],
            json!([
                {"name": "branch", "type": "string", "required": true, "pattern": "^[a-z/-]+$"},
                {"name": "count", "type": "integer", "default": 3}
            ])
        );
    }

    #[test]
    fn list_at_key_indentation() {
        let map = parse("tags:\n- a\n- b\nname: x\n").unwrap();
        assert_eq!(map["tags"], json!(["a", "b"]));
        assert_eq!(map["name"], "x");
    }

    #[test]
    fn nested_map() {
        let map = parse("meta:\n  owner: ops\n  tier: 2\n").unwrap();
        assert_eq!(map["meta"], json!({"owner": "ops", "tier": 2}));
    }

    #[test]
    fn rejects_stray_indentation() {
        let err = parse("name: x\n   oops: y\n").unwrap_err();
        assert!(err.contains("line 2"));
    }
}
