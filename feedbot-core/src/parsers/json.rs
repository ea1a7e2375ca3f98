use std::collections::HashMap;

use serde_json::Value;

use crate::entry::FeedEntry;
use crate::error::ParseError;

use super::Parsed;

/// JSON extraction. `select` is a dotted path to an array of entry objects;
/// each object needs `title` and `url` keys, may carry `summary` and
/// `categories`, and its remaining scalar fields are kept as raw fields.
/// `follow` is a dotted path to a string or array of strings.
pub fn parse(select: &str, follow: Option<&str>, content: &[u8]) -> Result<Parsed, ParseError> {
    let doc: Value = serde_json::from_slice(content)?;
    let selected =
        lookup_path(&doc, select).ok_or_else(|| ParseError::NoMatch(select.to_string()))?;
    let items = selected
        .as_array()
        .ok_or_else(|| ParseError::Selector(format!("{select} does not select an array")))?;
    let entries = items.iter().filter_map(entry_from_object).collect();

    let mut follow_urls = Vec::new();
    if let Some(path) = follow {
        match lookup_path(&doc, path) {
            Some(Value::String(url)) => follow_urls.push(url.clone()),
            Some(Value::Array(urls)) => follow_urls.extend(
                urls.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string),
            ),
            Some(Value::Null) | None => {}
            Some(other) => {
                return Err(ParseError::Selector(format!(
                    "{path} selects {other:?}, expected url or url array"
                )))
            }
        }
    }
    Ok(Parsed {
        entries,
        follow_urls,
    })
}

fn entry_from_object(item: &Value) -> Option<FeedEntry> {
    let object = item.as_object()?;
    let title = object.get("title")?.as_str()?.to_string();
    let long_url = object
        .get("url")
        .or_else(|| object.get("link"))?
        .as_str()?
        .to_string();
    let summary = object
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let categories = match object.get("categories") {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    let mut raw_fields = HashMap::new();
    for (key, value) in object {
        if matches!(key.as_str(), "title" | "url" | "link" | "summary" | "categories") {
            continue;
        }
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        raw_fields.insert(key.clone(), rendered);
    }
    Some(FeedEntry {
        title,
        long_url,
        summary,
        categories,
        raw_fields,
        ..FeedEntry::default()
    })
}

/// Walk a dotted path; numeric segments index into arrays.
fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match (current, segment.parse::<usize>()) {
            (Value::Array(items), Ok(index)) => items.get(index)?,
            (Value::Object(map), _) => map.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::parse;

    const DOC: &str = r#"{
        "data": {
            "next": "https://api.example.com/page/2",
            "children": [
                {"title": "Alpha", "url": "https://example.com/a", "score": 42},
                {"title": "Beta", "link": "https://example.com/b",
                 "summary": "second", "categories": ["x", "y"]},
                {"title": "no url, skipped"}
            ]
        }
    }"#;

    #[test]
    fn selects_entries_and_follow_url() {
        let parsed = parse("data.children", Some("data.next"), DOC.as_bytes()).unwrap();
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].title, "Alpha");
        assert_eq!(parsed.entries[0].raw_fields.get("score").map(String::as_str), Some("42"));
        assert_eq!(parsed.entries[1].long_url, "https://example.com/b");
        assert_eq!(parsed.entries[1].categories, vec!["x", "y"]);
        assert_eq!(parsed.follow_urls, vec!["https://api.example.com/page/2"]);
    }

    #[test]
    fn indexes_arrays_by_number() {
        let parsed = parse("data.children.1.categories", None, DOC.as_bytes());
        // categories is an array of strings, not entry objects
        assert_eq!(parsed.unwrap().entries.len(), 0);
    }

    #[test]
    fn missing_path_is_an_error() {
        assert!(parse("data.nothing", None, DOC.as_bytes()).is_err());
    }
}
