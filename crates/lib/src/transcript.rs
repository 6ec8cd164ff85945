//! HTML transcripts: one self-contained document per conversation.
//!
//! A transcript holds the welcome block, one block per message, and a JSON data block with the
//! logical messages so a reload gets back exactly what was said. Files are named
//! `chat_<YYYYmmddHHMMSS>.html` and live in one flat directory.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::session::{Message, Role};

/// Files this small or smaller hold no conversation and are left out of listings.
pub const MIN_TRANSCRIPT_BYTES: u64 = 200;

const FILE_PREFIX: &str = "chat_";
const FILE_SUFFIX: &str = ".html";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const DATA_BLOCK_OPEN: &str = r#"<script type="application/json" id="transcript-data">"#;
const DATA_BLOCK_CLOSE: &str = "</script>";
const DATA_VERSION: u32 = 1;

const STYLE: &str = r#"body { font-family: sans-serif; margin: 0; padding: 16px; }
body[data-mode="light"] { background: #f5f5f5; color: #222; }
body[data-mode="dark"] { background: #1e1e1e; color: #ddd; }
.message-container { display: flex; align-items: flex-start; margin-bottom: 10px; }
.avatar { font-size: 12px; opacity: 0.7; width: 72px; flex-shrink: 0; padding-top: 8px; }
.user-message-box, .assistant-message-box { border-radius: 8px; padding: 8px 12px; max-width: 80%; }
body[data-mode="light"] .user-message-box { background: #d7f0c9; }
body[data-mode="light"] .assistant-message-box { background: #ffffff; }
body[data-mode="dark"] .user-message-box { background: #2f4f2a; }
body[data-mode="dark"] .assistant-message-box { background: #2d2d2d; }
p { margin: 0; }"#;

#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("transcript io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("transcript not found: {0}")]
    NotFound(String),
    #[error("invalid transcript file name: {0}")]
    InvalidName(String),
    #[error("transcript has no readable message data: {0}")]
    Decode(String),
}

/// Light or dark rendering, stored as the `data-mode` attribute on `<body>`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThemeMode {
    #[default]
    Light,
    Dark,
}

impl ThemeMode {
    pub fn from_dark(is_dark: bool) -> Self {
        if is_dark {
            ThemeMode::Dark
        } else {
            ThemeMode::Light
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThemeMode::Light => "light",
            ThemeMode::Dark => "dark",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TranscriptData {
    version: u32,
    messages: Vec<Message>,
}

/// Escape text for use inside HTML element content.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Markup for a message body. Content that already starts with a tag is used as-is; user text is
/// escaped; assistant text may carry inline markup and is only wrapped.
fn message_body(message: &Message) -> String {
    let content = message.content.trim();
    if content.starts_with('<') {
        return content.to_string();
    }
    let text = match message.role {
        Role::User => escape_html(content),
        Role::Assistant => content.to_string(),
    };
    format!("<p>{}</p>", text.replace('\n', "<br>"))
}

fn message_block(role: Role, body: &str) -> String {
    let (label, class) = match role {
        Role::User => ("You", "user-message-box"),
        Role::Assistant => ("Assistant", "assistant-message-box"),
    };
    format!(
        "<div class=\"message-container\" data-role=\"{}\">\n<div class=\"avatar\">{}</div>\n<div class=\"{}\">\n{}\n</div>\n</div>\n",
        role, label, class, body
    )
}

/// Render a complete transcript document: welcome block first, then one block per message.
pub fn render(welcome: &str, messages: &[Message], mode: ThemeMode) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Chat transcript</title>\n<style>\n");
    html.push_str(STYLE);
    html.push_str("\n</style>\n</head>\n");
    html.push_str(&format!("<body data-mode=\"{}\">\n", mode.as_str()));
    html.push_str(&message_block(Role::Assistant, welcome));
    for message in messages {
        html.push_str(&message_block(message.role, &message_body(message)));
    }
    let data = TranscriptData {
        version: DATA_VERSION,
        messages: messages.to_vec(),
    };
    // Serializing plain strings cannot fail.
    let json = serde_json::to_string(&data).unwrap_or_default();
    html.push_str(DATA_BLOCK_OPEN);
    html.push_str(&json.replace("</", "<\\/").replace("<!--", "<\\u0021--"));
    html.push_str(DATA_BLOCK_CLOSE);
    html.push_str("\n</body>\n</html>\n");
    html
}

/// Recover the logical messages from a rendered transcript. The data block is written last, so
/// the last marker wins over any copy of it inside message markup.
pub fn parse(html: &str) -> Result<Vec<Message>, TranscriptError> {
    let start = html
        .rfind(DATA_BLOCK_OPEN)
        .ok_or_else(|| TranscriptError::Decode("missing data block".to_string()))?
        + DATA_BLOCK_OPEN.len();
    let len = html[start..]
        .find(DATA_BLOCK_CLOSE)
        .ok_or_else(|| TranscriptError::Decode("unterminated data block".to_string()))?;
    let data: TranscriptData = serde_json::from_str(&html[start..start + len])
        .map_err(|e| TranscriptError::Decode(e.to_string()))?;
    Ok(data.messages)
}

/// Rewrite the `data-mode` attribute of `<body>` (adding it if absent).
pub fn apply_mode(html: &str, mode: ThemeMode) -> String {
    let Some(body_start) = html.find("<body") else {
        return html.to_string();
    };
    let Some(tag_len) = html[body_start..].find('>') else {
        return html.to_string();
    };
    let tag_end = body_start + tag_len;
    let tag = &html[body_start..tag_end];
    let new_tag = match tag.find("data-mode=") {
        Some(attr) => {
            let value_start = attr + "data-mode=".len();
            let quote = tag[value_start..].chars().next();
            match quote {
                Some(q @ ('"' | '\'')) => {
                    let rest = &tag[value_start + 1..];
                    let value_len = rest.find(q).unwrap_or(rest.len());
                    let after = &rest[(value_len + 1).min(rest.len())..];
                    format!(
                        "{}\"{}\"{}",
                        &tag[..value_start],
                        mode.as_str(),
                        after
                    )
                }
                _ => return html.to_string(),
            }
        }
        None => format!("<body data-mode=\"{}\"{}", mode.as_str(), &tag["<body".len()..]),
    };
    format!("{}{}{}", &html[..body_start], new_tag, &html[tag_end..])
}

/// Reduce HTML-ish message content to display text: tags dropped, line breaks kept, common
/// entities decoded.
pub fn plain_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut chars = html.chars();
    while let Some(c) = chars.next() {
        if c != '<' {
            out.push(c);
            continue;
        }
        let mut tag = String::new();
        for t in chars.by_ref() {
            if t == '>' {
                break;
            }
            tag.push(t);
        }
        let name: String = tag
            .trim()
            .trim_end_matches('/')
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        match name.as_str() {
            "br" | "/p" | "/div" | "/li" | "/h1" | "/h2" | "/h3" | "/h4" | "/tr" => out.push('\n'),
            "li" => out.push_str("• "),
            _ => {}
        }
    }
    let decoded = out
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    let mut text = String::with_capacity(decoded.len());
    let mut newlines = 0;
    for c in decoded.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines > 2 {
                continue;
            }
        } else {
            newlines = 0;
        }
        text.push(c);
    }
    text.trim().to_string()
}

/// Display title for a transcript file: its timestamp, or the file stem.
pub fn title_for(file_name: &str) -> String {
    let stem = file_name.strip_suffix(FILE_SUFFIX).unwrap_or(file_name);
    stem.strip_prefix(FILE_PREFIX)
        .filter(|ts| ts.len() == 14 && ts.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|ts| NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok())
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| stem.to_string())
}

/// File name for a transcript started at `at`.
pub fn file_name_for(at: NaiveDateTime) -> String {
    format!("{}{}{}", FILE_PREFIX, at.format(TIMESTAMP_FORMAT), FILE_SUFFIX)
}

/// One entry in the history list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub file_name: String,
    pub title: String,
    pub len: u64,
}

/// A transcript read back from disk.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub file_name: String,
    pub html: String,
    pub messages: Vec<Message>,
}

/// Directory of transcript files.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, file_name: &str) -> Result<PathBuf, TranscriptError> {
        let valid = file_name.ends_with(FILE_SUFFIX)
            && !file_name.contains('/')
            && !file_name.contains('\\')
            && !file_name.starts_with('.');
        if !valid {
            return Err(TranscriptError::InvalidName(file_name.to_string()));
        }
        Ok(self.dir.join(file_name))
    }

    fn io_error(path: &Path, source: std::io::Error) -> TranscriptError {
        TranscriptError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// A file name for a session starting at `at`; moves forward one second at a time past
    /// names that are already taken.
    pub fn allocate_name(&self, at: NaiveDateTime) -> String {
        let mut at = at;
        loop {
            let name = file_name_for(at);
            if !self.dir.join(&name).exists() {
                return name;
            }
            at += Duration::seconds(1);
        }
    }

    /// Write (or overwrite) a transcript.
    pub fn save(
        &self,
        file_name: &str,
        welcome: &str,
        messages: &[Message],
        mode: ThemeMode,
    ) -> Result<PathBuf, TranscriptError> {
        let path = self.path_for(file_name)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;
        std::fs::write(&path, render(welcome, messages, mode))
            .map_err(|e| Self::io_error(&path, e))?;
        Ok(path)
    }

    pub fn load(&self, file_name: &str) -> Result<Transcript, TranscriptError> {
        let path = self.path_for(file_name)?;
        if !path.exists() {
            return Err(TranscriptError::NotFound(file_name.to_string()));
        }
        let html = std::fs::read_to_string(&path).map_err(|e| Self::io_error(&path, e))?;
        let messages = parse(&html)?;
        Ok(Transcript {
            file_name: file_name.to_string(),
            html,
            messages,
        })
    }

    pub fn delete(&self, file_name: &str) -> Result<(), TranscriptError> {
        let path = self.path_for(file_name)?;
        if !path.exists() {
            return Err(TranscriptError::NotFound(file_name.to_string()));
        }
        std::fs::remove_file(&path).map_err(|e| Self::io_error(&path, e))
    }

    /// Transcripts newest first, skipping trivially small files. A missing directory is created
    /// and yields an empty list.
    pub fn list(&self) -> Result<Vec<TranscriptEntry>, TranscriptError> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;
            return Ok(Vec::new());
        }
        let read = std::fs::read_dir(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;
        let mut entries = Vec::new();
        for entry in read.flatten() {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !file_name.ends_with(FILE_SUFFIX) {
                continue;
            }
            let len = match entry.metadata() {
                Ok(m) if m.is_file() => m.len(),
                _ => continue,
            };
            if len <= MIN_TRANSCRIPT_BYTES {
                continue;
            }
            entries.push(TranscriptEntry {
                title: title_for(&file_name),
                file_name,
                len,
            });
        }
        entries.sort_by(|a, b| b.file_name.cmp(&a.file_name));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::WELCOME_MESSAGE;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn temp_store(tag: &str) -> TranscriptStore {
        let dir = std::env::temp_dir().join(format!(
            "finch-transcript-{}-{}",
            tag,
            uuid::Uuid::new_v4()
        ));
        TranscriptStore::new(dir)
    }

    #[test]
    fn parse_ignores_data_marker_inside_message() {
        let messages = vec![
            Message::user("How is the transcript stored?"),
            Message::assistant(format!(
                "<p>It ends with</p>{}{{\"version\":1,\"messages\":[]}}</script>",
                DATA_BLOCK_OPEN
            )),
        ];
        let html = render(WELCOME_MESSAGE, &messages, ThemeMode::Light);
        assert_eq!(parse(&html).unwrap(), messages);

        let user_markup = vec![Message::user(format!("<i>see</i> {}[]</script>", DATA_BLOCK_OPEN))];
        let html = render(WELCOME_MESSAGE, &user_markup, ThemeMode::Dark);
        assert_eq!(parse(&html).unwrap(), user_markup);
    }

    #[test]
    fn render_then_parse_keeps_messages() {
        let messages = vec![
            Message::user("What is <b>ROE</b> & why?"),
            Message::assistant("<p>Return on equity.</p><script>x</script>"),
            Message::user("thanks </script><!-- done"),
            Message::assistant("plain\nanswer"),
        ];
        let html = render(WELCOME_MESSAGE, &messages, ThemeMode::Dark);
        assert!(html.contains("<body data-mode=\"dark\">"));
        let welcome_at = html.find(WELCOME_MESSAGE).unwrap();
        let first_message_at = html.find("What is &lt;b&gt;ROE&lt;/b&gt; &amp; why?").unwrap();
        assert!(welcome_at < first_message_at);
        assert!(html.contains("<p>plain<br>answer</p>"));
        assert_eq!(parse(&html).unwrap(), messages);
    }

    #[test]
    fn welcome_is_not_in_data() {
        let html = render(WELCOME_MESSAGE, &[], ThemeMode::Light);
        assert!(parse(&html).unwrap().is_empty());
    }

    #[test]
    fn parse_rejects_foreign_html() {
        assert!(matches!(
            parse("<html><body>hi</body></html>"),
            Err(TranscriptError::Decode(_))
        ));
    }

    #[test]
    fn apply_mode_rewrites_body_attribute() {
        let html = render("hi", &[Message::user("q")], ThemeMode::Light);
        let dark = apply_mode(&html, ThemeMode::Dark);
        assert!(dark.contains("<body data-mode=\"dark\">"));
        assert!(!dark.contains("<body data-mode=\"light\""));
        assert_eq!(parse(&dark).unwrap(), vec![Message::user("q")]);

        assert_eq!(
            apply_mode("<html><body class=\"x\">a</body></html>", ThemeMode::Dark),
            "<html><body data-mode=\"dark\" class=\"x\">a</body></html>"
        );
        assert_eq!(
            apply_mode("<body data-mode='light' id=\"b\">", ThemeMode::Dark),
            "<body data-mode=\"dark\" id=\"b\">"
        );
    }

    #[test]
    fn plain_text_strips_markup() {
        assert_eq!(
            plain_text("<b>Hi</b> there<br>line two<p>para &amp; more</p>"),
            "Hi there\nline twopara & more"
        );
        assert_eq!(plain_text("a &lt;b&gt;"), "a <b>");
    }

    #[test]
    fn titles() {
        assert_eq!(title_for("chat_20250304101112.html"), "2025-03-04 10:11:12");
        assert_eq!(title_for("notes.html"), "notes");
        assert_eq!(title_for("chat_2025.html"), "chat_2025");
        assert_eq!(file_name_for(at(9, 8, 7)), "chat_20250304090807.html");
    }

    #[test]
    fn store_save_list_load_delete() {
        let store = temp_store("crud");
        assert!(store.list().unwrap().is_empty());

        let older = store.allocate_name(at(10, 0, 0));
        store
            .save(&older, WELCOME_MESSAGE, &[Message::user("one")], ThemeMode::Light)
            .unwrap();
        let newer = store.allocate_name(at(11, 0, 0));
        store
            .save(&newer, WELCOME_MESSAGE, &[Message::user("two")], ThemeMode::Light)
            .unwrap();
        std::fs::write(store.dir().join("chat_20990101000000.html"), "tiny").unwrap();
        std::fs::write(store.dir().join("notes.txt"), "x".repeat(500)).unwrap();

        let names: Vec<String> = store.list().unwrap().into_iter().map(|e| e.file_name).collect();
        assert_eq!(names, vec![newer.clone(), older.clone()]);

        let loaded = store.load(&older).unwrap();
        assert_eq!(loaded.messages, vec![Message::user("one")]);

        store.delete(&older).unwrap();
        assert!(matches!(store.delete(&older), Err(TranscriptError::NotFound(_))));
        assert!(matches!(store.load(&older), Err(TranscriptError::NotFound(_))));
        assert_eq!(store.list().unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn allocate_name_skips_taken_seconds() {
        let store = temp_store("alloc");
        let first = store.allocate_name(at(12, 0, 0));
        store.save(&first, "w", &[], ThemeMode::Light).unwrap();
        let second = store.allocate_name(at(12, 0, 0));
        assert_eq!(second, "chat_20250304120001.html");
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn rejects_path_like_names() {
        let store = temp_store("names");
        for name in ["../x.html", "a/b.html", ".hidden.html", "chat.txt"] {
            assert!(matches!(
                store.load(name),
                Err(TranscriptError::InvalidName(_))
            ));
        }
    }
}
