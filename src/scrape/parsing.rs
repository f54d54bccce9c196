//! Response-shape normalization for scrape and search payloads.
//!
//! The service's response shapes drift across versions (`data` as object or
//! list, counts under four different keys), so extraction is breadth-first
//! over whatever arrives.

use crate::scrape::SearchItem;
use serde_json::Value;

fn normalize_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Total result count from any of the keys the service has used.
pub fn extract_total_results(payload: &Value) -> Option<u64> {
    let mut queue = vec![payload];
    while let Some(current) = queue.pop() {
        match current {
            Value::Object(map) => {
                for key in ["totalResults", "total_results", "numResults", "total"] {
                    if let Some(count) = map.get(key).and_then(Value::as_u64) {
                        return Some(count);
                    }
                }
                if let Some(nested) = map.get("data") {
                    queue.push(nested);
                }
            }
            Value::Array(items) => queue.extend(items.iter()),
            _ => {}
        }
    }
    None
}

/// First error message found in the payload, descending into `data`.
pub fn extract_error_message(payload: &Value) -> Option<String> {
    match payload {
        Value::Object(map) => {
            for key in ["error", "message"] {
                if let Some(Value::String(s)) = map.get(key) {
                    let trimmed = s.trim();
                    if !trimmed.is_empty() {
                        return Some(trimmed.to_string());
                    }
                }
            }
            map.get("data").and_then(extract_error_message)
        }
        Value::Array(items) => items.iter().find_map(extract_error_message),
        _ => None,
    }
}

fn has_url_field(item: &Value) -> bool {
    ["url", "link", "sourceUrl"].iter().any(|key| {
        item.get(key)
            .and_then(Value::as_str)
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false)
    })
}

/// Locate the list of result items wherever the service nested it.
pub fn extract_result_items(payload: &Value) -> Vec<Value> {
    let mut queue = vec![payload];
    while let Some(current) = queue.pop() {
        match current {
            Value::Array(items) => {
                let url_items: Vec<Value> = items
                    .iter()
                    .filter(|item| item.is_object() && has_url_field(item))
                    .cloned()
                    .collect();
                if !url_items.is_empty() {
                    return url_items;
                }
                queue.extend(items.iter());
            }
            Value::Object(map) => {
                if has_url_field(current) {
                    return vec![current.clone()];
                }
                for key in ["results", "items", "data", "matches"] {
                    if let Some(nested) = map.get(key) {
                        queue.push(nested);
                    }
                }
            }
            _ => {}
        }
    }
    Vec::new()
}

/// Normalize one raw search item; returns `None` without a usable URL.
///
/// Title falls back to the URL; snippet collapses whitespace; `source` and
/// `published` tolerate dict- and list-shaped values.
pub fn normalize_search_item(raw: &Value) -> Option<SearchItem> {
    let url = ["url", "link", "sourceUrl", "permalink"]
        .iter()
        .find_map(|key| raw.get(key).and_then(|v| normalize_text(v)))?;

    let title = ["title", "name", "headline"]
        .iter()
        .find_map(|key| raw.get(key).and_then(|v| normalize_text(v)))
        .unwrap_or_else(|| url.clone());

    let snippet = ["snippet", "description", "summary", "content"]
        .iter()
        .find_map(|key| raw.get(key).and_then(|v| normalize_text(v)))
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "));

    let source = ["source", "site", "publisher"].iter().find_map(|key| {
        let value = raw.get(key)?;
        match value {
            Value::Object(map) => map
                .get("name")
                .or_else(|| map.get("title"))
                .and_then(normalize_text),
            Value::Array(parts) => {
                let joined: Vec<String> = parts.iter().filter_map(normalize_text).collect();
                (!joined.is_empty()).then(|| joined.join(", "))
            }
            other => normalize_text(other),
        }
    });

    let published_at = ["published_at", "publishedAt", "published", "date"]
        .iter()
        .find_map(|key| {
            let value = raw.get(key)?;
            match value {
                Value::Object(map) => map
                    .get("iso")
                    .or_else(|| map.get("value"))
                    .and_then(normalize_text),
                other => normalize_text(other),
            }
        });

    Some(SearchItem {
        title,
        url,
        snippet,
        source,
        published_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_total_results_key_variants() {
        assert_eq!(extract_total_results(&json!({"totalResults": 5})), Some(5));
        assert_eq!(extract_total_results(&json!({"total_results": 6})), Some(6));
        assert_eq!(
            extract_total_results(&json!({"data": {"numResults": 7}})),
            Some(7)
        );
        assert_eq!(extract_total_results(&json!({"nothing": true})), None);
    }

    #[test]
    fn test_error_message_nested_in_data() {
        let payload = json!({"data": [{"error": "  blocked  "}]});
        assert_eq!(extract_error_message(&payload).unwrap(), "blocked");
        assert!(extract_error_message(&json!({"ok": true})).is_none());
    }

    #[test]
    fn test_result_items_found_in_nested_list() {
        let payload = json!({"data": {"results": [
            {"url": "https://a.example", "title": "A"},
            {"url": "https://b.example"},
            {"noturl": true}
        ]}});
        let items = extract_result_items(&payload);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_normalize_item_title_falls_back_to_url() {
        let item = normalize_search_item(&json!({"url": "https://a.example"})).unwrap();
        assert_eq!(item.title, "https://a.example");
    }

    #[test]
    fn test_normalize_item_snippet_whitespace_collapsed() {
        let item = normalize_search_item(&json!({
            "url": "https://a.example",
            "description": "  multi \n  line   text "
        }))
        .unwrap();
        assert_eq!(item.snippet.unwrap(), "multi line text");
    }

    #[test]
    fn test_normalize_item_dict_source_and_published() {
        let item = normalize_search_item(&json!({
            "url": "https://a.example",
            "publisher": {"name": "The Site"},
            "publishedAt": {"iso": "2024-05-01T00:00:00Z"}
        }))
        .unwrap();
        assert_eq!(item.source.unwrap(), "The Site");
        assert_eq!(item.published_at.unwrap(), "2024-05-01T00:00:00Z");
    }

    #[test]
    fn test_normalize_item_list_source_joined() {
        let item = normalize_search_item(&json!({
            "url": "https://a.example",
            "source": ["One", "Two"]
        }))
        .unwrap();
        assert_eq!(item.source.unwrap(), "One, Two");
    }

    #[test]
    fn test_normalize_item_requires_url() {
        assert!(normalize_search_item(&json!({"title": "no url"})).is_none());
    }
}
