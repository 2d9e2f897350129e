use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

// Block separator and fixed-field headers of the dump format:
//   De: / Para: / Data: / Assunto: / Mensagem: blocks between long `-` rules.
static SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-{70,}").unwrap());
static FROM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^De:\s*(.+)$").unwrap());
static TO_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^Para:\s*(.+)$").unwrap());
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^Data:\s*(.+)$").unwrap());
static SUBJECT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^Assunto:\s*(.+)$").unwrap());
static MESSAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^Mensagem:\s*$").unwrap());

/// How far an approximate line lookup may drift from the recorded offset.
const LINE_TOLERANCE: usize = 20;

/// One parsed message from the corporate dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub date: String,
    pub subject: String,
    pub body: String,
    /// Approximate starting line in the source file, kept for citation.
    pub source_line: usize,
}

/// Parser over the whole email dump. Pure and reusable across queries.
#[derive(Debug, Clone, Default)]
pub struct EmailParser {
    emails: Vec<Email>,
}

impl EmailParser {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading email dump {}", path.display()))?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut emails = Vec::new();
        let mut current_line = 1usize;

        for block in SEPARATOR.split(content) {
            let line_count = block.matches('\n').count() + 1;
            let trimmed = block.trim();

            // Skip blanks and the dump's own file header
            if !trimmed.is_empty()
                && !trimmed.contains("DUMP DE SERVIDOR")
                && !trimmed.contains("PERÍODO:")
            {
                if let Some(email) = parse_block(trimmed, current_line) {
                    emails.push(email);
                }
            }
            current_line += line_count;
        }

        Self { emails }
    }

    pub fn emails(&self) -> &[Email] {
        &self.emails
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }

    pub fn search_by_sender(&self, sender: &str) -> Vec<&Email> {
        let needle = sender.to_lowercase();
        self.emails
            .iter()
            .filter(|e| e.from.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn search_by_recipient(&self, recipient: &str) -> Vec<&Email> {
        let needle = recipient.to_lowercase();
        self.emails
            .iter()
            .filter(|e| e.to.to_lowercase().contains(&needle))
            .collect()
    }

    /// Emails where the person appears as sender or recipient.
    pub fn search_by_person(&self, person: &str) -> Vec<&Email> {
        let needle = person.to_lowercase();
        self.emails
            .iter()
            .filter(|e| {
                e.from.to_lowercase().contains(&needle) || e.to.to_lowercase().contains(&needle)
            })
            .collect()
    }

    pub fn search_by_content(&self, keyword: &str) -> Vec<&Email> {
        let needle = keyword.to_lowercase();
        self.emails
            .iter()
            .filter(|e| {
                e.subject.to_lowercase().contains(&needle)
                    || e.body.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Inclusive date-range filter over the `YYYY-MM-DD` prefix.
    pub fn search_by_date_range(&self, start: &str, end: &str) -> Vec<&Email> {
        self.emails
            .iter()
            .filter(|e| {
                let day = e.date.get(..10).unwrap_or(&e.date);
                start <= day && day <= end
            })
            .collect()
    }

    /// Looks an email up by its approximate source line.
    pub fn get_by_line(&self, line: usize) -> Option<&Email> {
        self.emails
            .iter()
            .find(|e| e.source_line.abs_diff(line) < LINE_TOLERANCE)
    }
}

fn parse_block(block: &str, start_line: usize) -> Option<Email> {
    let mut from = String::new();
    let mut to = String::new();
    let mut date = String::new();
    let mut subject = String::new();
    let mut body_lines: Vec<&str> = Vec::new();
    let mut in_message = false;

    for line in block.lines() {
        let line = line.trim();

        if let Some(caps) = FROM_RE.captures(line) {
            from = caps[1].trim().to_string();
            in_message = false;
        } else if let Some(caps) = TO_RE.captures(line) {
            to = caps[1].trim().to_string();
            in_message = false;
        } else if let Some(caps) = DATE_RE.captures(line) {
            date = caps[1].trim().to_string();
            in_message = false;
        } else if let Some(caps) = SUBJECT_RE.captures(line) {
            subject = caps[1].trim().to_string();
            in_message = false;
        } else if MESSAGE_RE.is_match(line) {
            in_message = true;
        } else if in_message {
            body_lines.push(line);
        }
    }

    // A block without both endpoints is not an email
    if from.is_empty() || to.is_empty() {
        return None;
    }

    Some(Email {
        from,
        to,
        date,
        subject,
        body: body_lines.join("\n").trim().to_string(),
        source_line: start_line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dump() -> String {
        let rule = "-".repeat(79);
        format!(
            "DUMP DE SERVIDOR DE EMAIL\nPERÍODO: 2024-01-01 a 2024-03-31\n{rule}\nDe: Ryan Howard <ryan@dundermifflin.com>\nPara: Kelly Kapoor <kelly@dundermifflin.com>\nData: 2024-03-10 14:22\nAssunto: WUPHF está quase pronto\nMensagem:\nSó preciso de mais um aporte para o lançamento.\nNão conta para o Michael.\n{rule}\nDe: Angela Martin <angela@dundermifflin.com>\nPara: Oscar Martinez <oscar@dundermifflin.com>\nData: 2024-03-11 09:05\nAssunto: Relatório de despesas\nMensagem:\nOs recibos de março estão inconsistentes.\n{rule}\n"
        )
    }

    #[test]
    fn parses_all_blocks_and_skips_header() {
        let parser = EmailParser::parse(&sample_dump());
        assert_eq!(parser.len(), 2);
        let first = &parser.emails()[0];
        assert!(first.from.starts_with("Ryan Howard"));
        assert_eq!(first.subject, "WUPHF está quase pronto");
        assert!(first.body.contains("aporte"));
    }

    #[test]
    fn source_lines_are_monotonic_and_approximate() {
        let parser = EmailParser::parse(&sample_dump());
        let lines: Vec<usize> = parser.emails().iter().map(|e| e.source_line).collect();
        assert!(lines[0] < lines[1]);
        assert!(parser.get_by_line(lines[1] + 5).is_some());
        assert!(parser.get_by_line(lines[1] + 500).is_none());
    }

    #[test]
    fn person_search_matches_either_endpoint() {
        let parser = EmailParser::parse(&sample_dump());
        assert_eq!(parser.search_by_person("kelly").len(), 1);
        assert_eq!(parser.search_by_person("angela").len(), 1);
        assert_eq!(parser.search_by_sender("kelly").len(), 0);
    }

    #[test]
    fn content_search_covers_subject_and_body() {
        let parser = EmailParser::parse(&sample_dump());
        assert_eq!(parser.search_by_content("wuphf").len(), 1);
        assert_eq!(parser.search_by_content("recibos").len(), 1);
    }

    #[test]
    fn incomplete_block_is_dropped() {
        let rule = "-".repeat(79);
        let dump = format!("{rule}\nDe: someone\nMensagem:\norphan text\n{rule}\n");
        let parser = EmailParser::parse(&dump);
        assert!(parser.is_empty());
    }
}
