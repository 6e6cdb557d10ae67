use std::str::FromStr;
use tokio::time::Duration;

/// Parses a duration string in the format "30s", "10m", "5h", "3d".
///
/// Supported units:
/// - `s` for seconds
/// - `m` for minutes
/// - `h` for hours
/// - `d` for days
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    let Some(unit_char) = s.chars().last() else {
        return Err("Duration string cannot be empty".to_string());
    };
    let value_str = &s[..s.len() - unit_char.len_utf8()];

    let value = u64::from_str(value_str)
        .map_err(|_| format!("Invalid numeric value in duration: '{}'", value_str))?;

    let seconds = match unit_char {
        's' => value,
        'm' => value * 60,
        'h' => value * 60 * 60,
        'd' => value * 24 * 60 * 60,
        _ => {
            return Err(format!(
                "Unknown duration unit: '{}'. Use 's', 'm', 'h', or 'd'.",
                unit_char
            ))
        }
    };
    Ok(Duration::from_secs(seconds))
}

/// Parses a comma-separated header string with support for escaped commas.
///
/// Use `\,` to include a literal comma in a header value.
/// Example: "x-ms-client-request-id:abc,Prefer:return=minimal\,strict"
pub fn parse_headers_with_escapes(headers_str: &str) -> Vec<String> {
    let mut headers = Vec::new();
    let mut current_header = String::new();
    let mut chars = headers_str.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&',') => {
                current_header.push(',');
                chars.next();
            }
            ',' => {
                if !current_header.trim().is_empty() {
                    headers.push(std::mem::take(&mut current_header));
                }
                current_header.clear();
            }
            _ => current_header.push(ch),
        }
    }

    if !current_header.trim().is_empty() {
        headers.push(current_header);
    }

    headers
}

/// Splits a query string such as `queryType=full&$count=true` into pairs.
///
/// A leading `?` is ignored, empty segments are skipped and a key without
/// `=` gets an empty value. Values are taken verbatim.
pub fn parse_query_params(query: &str) -> Vec<(String, String)> {
    query
        .trim()
        .trim_start_matches('?')
        .split('&')
        .filter(|segment| !segment.trim().is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
            None => (segment.trim().to_string(), String::new()),
        })
        .collect()
}

/// Splits a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}
