//! Text document codec: a `---` delimited YAML header followed by a markdown body.
//!
//! Task bodies carry two sections, a free-text description and a progress checklist.
//! Decoding never fails; anything that does not parse degrades to an empty value.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::Result;

pub const HEADER_DELIMITER: &str = "---";

pub const DESCRIPTION_HEADING: &str = "## Description";
pub const PROGRESS_HEADING: &str = "## Progress";

// Headings written by older data files, accepted on read only.
const LEGACY_DESCRIPTION_HEADING: &str = "## 任务描述";
const LEGACY_PROGRESS_HEADING: &str = "## 进展记录";
const LEGACY_EMPTY_DESCRIPTION: &str = "（暂无描述）";

pub const PROGRESS_SEPARATOR: char = ':';
const LEGACY_PROGRESS_SEPARATOR: char = '：';

// Prefixed to description lines that would otherwise read back as headings.
const LINE_ESCAPE: char = '\\';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub date: String,
    pub content: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskBody {
    pub description: String,
    pub progress: Vec<ProgressRecord>,
}

/// Splits `text` into its header mapping and body.
///
/// Missing delimiters, invalid YAML, or a header that is not a mapping all yield an
/// empty mapping and the original text as body.
pub fn decode(text: &str) -> (Mapping, String) {
    let Some((header, body)) = split_header(text) else {
        return (Mapping::new(), text.to_string());
    };
    match parse_header(header) {
        Some(metadata) => (metadata, body.to_string()),
        None => {
            tracing::warn!("document header is not a valid mapping; treating as plain body");
            (Mapping::new(), text.to_string())
        }
    }
}

pub fn encode(metadata: &Mapping, body: &str) -> Result<String> {
    let header = if metadata.is_empty() {
        String::new()
    } else {
        serde_yaml::to_string(metadata)?
    };
    Ok(format!(
        "{delim}\n{header}{delim}\n\n{body}",
        delim = HEADER_DELIMITER
    ))
}

/// The body after a delimited header block, whether or not the header parses.
pub fn strip_header(text: &str) -> &str {
    split_header(text).map(|(_, body)| body).unwrap_or(text)
}

fn split_header(text: &str) -> Option<(&str, &str)> {
    let mut lines = text.split_inclusive('\n');
    let first = lines.next()?;
    if first.trim_end() != HEADER_DELIMITER {
        return None;
    }
    let header_start = first.len();
    let mut offset = header_start;
    for line in lines {
        if line.trim_end() == HEADER_DELIMITER {
            let header = &text[header_start..offset];
            let rest = &text[offset + line.len()..];
            // `encode` puts one blank line between header and body.
            let body = rest
                .strip_prefix("\r\n")
                .or_else(|| rest.strip_prefix('\n'))
                .unwrap_or(rest);
            return Some((header, body));
        }
        offset += line.len();
    }
    None
}

fn parse_header(header: &str) -> Option<Mapping> {
    if header.trim().is_empty() {
        return Some(Mapping::new());
    }
    match serde_yaml::from_str::<Value>(header) {
        Ok(Value::Mapping(map)) => Some(map),
        Ok(Value::Null) => Some(Mapping::new()),
        Ok(_) | Err(_) => None,
    }
}

pub fn parse_task_body(body: &str) -> TaskBody {
    let lines: Vec<&str> = body.lines().collect();

    let description = section_range(&lines, &[DESCRIPTION_HEADING, LEGACY_DESCRIPTION_HEADING])
        .map(|(start, end)| unescape_description(&join_trimmed(&lines[start..end])))
        .unwrap_or_default();
    let description = if description == LEGACY_EMPTY_DESCRIPTION {
        String::new()
    } else {
        description
    };

    let progress = section_range(&lines, &[PROGRESS_HEADING, LEGACY_PROGRESS_HEADING])
        .map(|(start, end)| {
            lines[start..end]
                .iter()
                .filter(|line| !line.trim().is_empty())
                .filter_map(|line| {
                    let parsed = parse_progress_line(line);
                    if parsed.is_none() {
                        tracing::warn!(line = %line, "skipping malformed progress line");
                    }
                    parsed
                })
                .collect()
        })
        .unwrap_or_default();

    TaskBody {
        description,
        progress,
    }
}

pub fn render_task_body(title: &str, description: &str, progress: &[ProgressRecord]) -> String {
    let mut lines = Vec::new();
    lines.push(format!("# {}", title.replace(&['\r', '\n'][..], " ").trim()));
    lines.push(String::new());
    lines.push(DESCRIPTION_HEADING.to_string());
    let description = description.trim_matches('\n');
    if !description.is_empty() {
        lines.extend(description.lines().map(escape_description_line));
    }
    if !progress.is_empty() {
        lines.push(String::new());
        lines.push(PROGRESS_HEADING.to_string());
        lines.extend(progress.iter().map(render_progress_line));
    }
    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

pub fn render_progress_line(record: &ProgressRecord) -> String {
    let marker = if record.completed { 'x' } else { ' ' };
    let content = record.content.replace(&['\r', '\n'][..], " ");
    format!(
        "- [{}] {}{} {}",
        marker,
        record.date.trim(),
        PROGRESS_SEPARATOR,
        content.trim()
    )
}

/// Parses `- [x] <date>: <content>`. The line splits at the first separator, so the
/// date can never contain one while the content may.
pub fn parse_progress_line(line: &str) -> Option<ProgressRecord> {
    let rest = line.trim_start().strip_prefix("- [")?;
    let mut chars = rest.chars();
    let completed = match chars.next()? {
        'x' | 'X' => true,
        ' ' => false,
        _ => return None,
    };
    let rest = chars.as_str().strip_prefix(']')?;
    let split_at = rest.find(is_progress_separator)?;
    let separator_len = rest[split_at..].chars().next()?.len_utf8();
    let date = rest[..split_at].trim();
    let content = rest[split_at + separator_len..].trim();
    Some(ProgressRecord {
        date: date.to_string(),
        content: content.to_string(),
        completed,
    })
}

pub fn is_progress_separator(c: char) -> bool {
    c == PROGRESS_SEPARATOR || c == LEGACY_PROGRESS_SEPARATOR
}

/// Escapes a description line that starts with `#` (a heading to any reader) or with
/// the escape character itself.
fn escape_description_line(line: &str) -> String {
    if line.starts_with(LINE_ESCAPE) || line.trim_start().starts_with('#') {
        format!("{LINE_ESCAPE}{line}")
    } else {
        line.to_string()
    }
}

fn unescape_description(text: &str) -> String {
    text.lines()
        .map(|line| line.strip_prefix(LINE_ESCAPE).unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_section_heading(line: &str) -> bool {
    line.trim_start().starts_with("## ")
}

/// Line range `[start, end)` of the first section whose heading is one of `headings`,
/// excluding the heading itself.
pub(crate) fn section_range(lines: &[&str], headings: &[&str]) -> Option<(usize, usize)> {
    let heading_idx = lines
        .iter()
        .position(|line| headings.iter().any(|heading| line.trim() == *heading))?;
    let start = heading_idx + 1;
    let end = lines[start..]
        .iter()
        .position(|line| is_section_heading(line))
        .map(|offset| start + offset)
        .unwrap_or(lines.len());
    Some((start, end))
}

fn join_trimmed(lines: &[&str]) -> String {
    let first = lines.iter().position(|line| !line.trim().is_empty());
    let last = lines.iter().rposition(|line| !line.trim().is_empty());
    match (first, last) {
        (Some(first), Some(last)) => lines[first..=last]
            .iter()
            .map(|line| line.trim_end())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
