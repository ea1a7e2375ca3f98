use std::collections::HashMap;

use thiserror::Error;

const ELLIPSIS: &str = "…";

/// Truncate `text` to at most `max_bytes` of UTF-8, breaking on a word
/// boundary where possible and appending an ellipsis within the budget.
pub fn shorten_to_bytes_width(text: &str, max_bytes: usize) -> String {
    let text = text.trim();
    if text.len() <= max_bytes {
        return text.to_string();
    }
    if max_bytes < ELLIPSIS.len() {
        return text
            .char_indices()
            .take_while(|(i, c)| i + c.len_utf8() <= max_bytes)
            .map(|(_, c)| c)
            .collect();
    }
    let budget = max_bytes - ELLIPSIS.len();
    let mut cut = 0;
    for (i, _) in text.char_indices() {
        if i <= budget {
            cut = i;
        } else {
            break;
        }
    }
    let head = &text[..cut];
    // Prefer ending on a word boundary unless that would discard everything.
    let head = match head.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => &head[..pos],
        _ => head,
    };
    let mut out = head.trim_end().to_string();
    out.push_str(ELLIPSIS);
    out
}

/// Lowercase everything except the first character, which is uppercased.
pub fn sentence_case(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// True when the text has at least one letter and no lowercase letters.
pub fn is_all_caps(text: &str) -> bool {
    text.chars().any(|c| c.is_alphabetic()) && !text.chars().any(|c| c.is_lowercase())
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unclosed brace in template")]
    Unclosed,
    #[error("template references unknown field {0:?}")]
    MissingKey(String),
}

/// `{field}` substitution with `{{`/`}}` escapes, after Python's
/// `str.format_map`.
pub fn render_template(
    template: &str,
    params: &HashMap<String, String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        match c {
            '{' => {
                if matches!(chars.peek(), Some((_, '{'))) {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let key_start = start + 1;
                let mut key_end = None;
                for (j, c2) in chars.by_ref() {
                    if c2 == '}' {
                        key_end = Some(j);
                        break;
                    }
                }
                let key_end = key_end.ok_or(TemplateError::Unclosed)?;
                let key = &template[key_start..key_end];
                match params.get(key) {
                    Some(value) => out.push_str(value),
                    None => return Err(TemplateError::MissingKey(key.to_string())),
                }
            }
            '}' => {
                if matches!(chars.peek(), Some((_, '}'))) {
                    chars.next();
                }
                out.push('}');
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorten_respects_byte_budget() {
        let title = "Intermittent fasting and cardiometabolic outcomes in adults";
        for width in [10, 20, 30, 200] {
            assert!(shorten_to_bytes_width(title, width).len() <= width);
        }
    }

    #[test]
    fn shorten_keeps_short_titles_intact() {
        assert_eq!(shorten_to_bytes_width("short", 200), "short");
    }

    #[test]
    fn shorten_breaks_on_word_boundary() {
        let out = shorten_to_bytes_width("alpha beta gamma delta", 15);
        assert_eq!(out, "alpha beta…");
    }

    #[test]
    fn shorten_handles_multibyte_boundaries() {
        let out = shorten_to_bytes_width("éééééééééééééé", 9);
        assert!(out.len() <= 9);
        assert!(out.ends_with(ELLIPSIS));
    }

    #[test]
    fn sentence_case_examples() {
        assert_eq!(sentence_case("BREAKING NEWS TODAY"), "Breaking news today");
        assert_eq!(sentence_case(""), "");
    }

    #[test]
    fn all_caps_detection() {
        assert!(is_all_caps("SHOUTING WORDS"));
        assert!(!is_all_caps("Mixed Case"));
        assert!(!is_all_caps("1234"));
    }

    #[test]
    fn template_substitutes_and_escapes() {
        let params = HashMap::from([
            ("title".to_string(), "t".to_string()),
            ("url".to_string(), "u".to_string()),
        ]);
        assert_eq!(
            render_template("{title} -> {url}", &params).unwrap(),
            "t -> u"
        );
        assert_eq!(render_template("{{literal}}", &params).unwrap(), "{literal}");
        assert!(matches!(
            render_template("{nope}", &params),
            Err(TemplateError::MissingKey(_))
        ));
        assert!(matches!(
            render_template("{title", &params),
            Err(TemplateError::Unclosed)
        ));
    }
}
