//! Prometheus text exposition parsing
//!
//! Only the sample lines matter to the collector; `# HELP`, `# TYPE` and
//! other comment lines are skipped.

use std::collections::HashMap;

/// One sample line: metric name, labels and value
#[derive(Debug, Clone, PartialEq)]
pub struct RawMetricSample {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub value: f64,
}

/// Parsed payload plus the number of lines that could not be understood
#[derive(Debug, Default)]
pub struct ParsedExposition {
    pub samples: Vec<RawMetricSample>,
    pub malformed_lines: usize,
}

/// Parse a full exposition payload.
///
/// Lines that fail to parse are counted and skipped, so one bad line does not
/// discard the rest of the payload.
pub fn parse_exposition(text: &str) -> ParsedExposition {
    let mut parsed = ParsedExposition::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_sample(line) {
            Some(sample) => parsed.samples.push(sample),
            None => {
                tracing::debug!(line = %line, "Skipping malformed exposition line");
                parsed.malformed_lines += 1;
            }
        }
    }

    parsed
}

/// Parse a single sample line: `name[{labels}] value [timestamp]`
pub fn parse_sample(line: &str) -> Option<RawMetricSample> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if !is_valid_metric_name(name) {
        return None;
    }

    let mut rest = line[name_end..].trim_start();
    let labels = if rest.starts_with('{') {
        let (labels, consumed) = parse_labels(&rest[1..])?;
        rest = &rest[1 + consumed..];
        labels
    } else {
        HashMap::new()
    };

    let mut fields = rest.split_whitespace();
    let value = parse_value(fields.next()?)?;

    // Optional timestamp, ignored but must be an integer when present
    if let Some(ts) = fields.next() {
        ts.parse::<i64>().ok()?;
    }
    if fields.next().is_some() {
        return None;
    }

    Some(RawMetricSample {
        name: name.to_string(),
        labels,
        value,
    })
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Parse the label block after the opening brace.
/// Returns the labels and the number of bytes consumed including the closing brace.
fn parse_labels(input: &str) -> Option<(HashMap<String, String>, usize)> {
    let mut labels = HashMap::new();
    let bytes = input.as_bytes();
    let mut pos = 0;

    loop {
        while pos < bytes.len() && (bytes[pos] == b' ' || bytes[pos] == b',') {
            pos += 1;
        }
        if pos >= bytes.len() {
            return None;
        }
        if bytes[pos] == b'}' {
            return Some((labels, pos + 1));
        }

        let key_start = pos;
        while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
            pos += 1;
        }
        let key = &input[key_start..pos];
        if key.is_empty() {
            return None;
        }

        while pos < bytes.len() && bytes[pos] == b' ' {
            pos += 1;
        }
        if bytes.get(pos) != Some(&b'=') {
            return None;
        }
        pos += 1;
        while pos < bytes.len() && bytes[pos] == b' ' {
            pos += 1;
        }
        if bytes.get(pos) != Some(&b'"') {
            return None;
        }
        pos += 1;

        let mut value = String::new();
        let mut chars = input[pos..].char_indices();
        let mut closed = false;
        while let Some((offset, c)) = chars.next() {
            match c {
                '"' => {
                    pos += offset + 1;
                    closed = true;
                    break;
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return None,
                },
                other => value.push(other),
            }
        }
        if !closed {
            return None;
        }

        labels.insert(key.to_string(), value);

        while pos < bytes.len() && bytes[pos] == b' ' {
            pos += 1;
        }
        match bytes.get(pos) {
            Some(b',') => pos += 1,
            Some(b'}') => return Some((labels, pos + 1)),
            _ => return None,
        }
    }
}

fn parse_value(token: &str) -> Option<f64> {
    match token {
        "NaN" => Some(f64::NAN),
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        _ => token.parse::<f64>().ok(),
    }
}
