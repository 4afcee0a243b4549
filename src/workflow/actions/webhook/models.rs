use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
pub enum HttpMethod {
    GET,
    #[default]
    POST,
    PUT,
    PATCH,
    DELETE,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContentType {
    #[default]
    Json,
    Text,
    Form,
}

impl ContentType {
    pub fn mime(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::Text => "text/plain; charset=utf-8",
            ContentType::Form => "application/x-www-form-urlencoded",
        }
    }
}

/// Best-effort header parsing.
///
/// Accepts a JSON object (`{"Key": "Value"}`) or newline-separated
/// `Key: Value` lines. Lines that cannot be parsed are skipped and
/// reported in the returned warnings.
pub fn parse_headers(text: &str) -> (Vec<(String, String)>, Vec<String>) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return (Vec::new(), Vec::new());
    }

    if trimmed.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            let headers = map
                .into_iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k.trim().to_string(), v)
                })
                .collect();
            return (headers, Vec::new());
        }
    }

    let mut headers = Vec::new();
    let mut warnings = Vec::new();
    for line in trimmed.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match line.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() && !key.trim().contains(char::is_whitespace) => {
                headers.push((key.trim().to_string(), value.trim().to_string()));
            }
            _ => warnings.push(format!("ignored malformed header line '{}'", line)),
        }
    }
    (headers, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_lines() {
        let (headers, warnings) = parse_headers("Content-Type: application/json\n\nX-Api-Key:  abc:def \nnot a header\n");
        assert_eq!(
            headers,
            vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("X-Api-Key".to_string(), "abc:def".to_string())
            ]
        );
        assert_eq!(warnings, vec!["ignored malformed header line 'not a header'".to_string()]);
    }

    #[test]
    fn test_parse_header_json_object() {
        let (headers, warnings) = parse_headers("{\n  \"Authorization\": \"Bearer t\",\n  \"X-Retry\": 3\n}");
        assert!(warnings.is_empty());
        assert!(headers.contains(&("Authorization".to_string(), "Bearer t".to_string())));
        assert!(headers.contains(&("X-Retry".to_string(), "3".to_string())));
    }

    #[test]
    fn test_parse_header_empty() {
        assert_eq!(parse_headers("  \n "), (Vec::new(), Vec::new()));
    }
}
