//! Flat text + offset annotations → nested Telegram HTML.
//!
//! Annotation offsets are measured in UTF-16 code units, the encoding the
//! transport reports entity positions in. The converter walks the boundary
//! positions (annotation starts/ends, newlines, text edges) and emits close
//! tags, line breaks, open tags and escaped literal text at each one, so
//! overlapping annotations still nest properly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One formatting span over the flat text.
#[derive(Debug, Clone)]
pub struct Annotation {
    /// Transport entity type ("bold", "text_link", ...). Unknown kinds are
    /// dropped; their text is preserved untagged.
    pub kind: String,
    /// Start offset in UTF-16 code units.
    pub offset: usize,
    /// Length in UTF-16 code units.
    pub length: usize,
    /// Link target for "text_link" annotations.
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
struct Tag {
    open: String,
    close: String,
}

#[derive(Default)]
struct Boundary {
    to_open: Vec<Tag>,
    to_close: Vec<Tag>,
    line_break: bool,
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn tag_for(annotation: &Annotation, covered: &[u16]) -> Option<Tag> {
    fn fixed(open: &str, close: &str) -> Option<Tag> {
        Some(Tag {
            open: open.to_string(),
            close: close.to_string(),
        })
    }

    match annotation.kind.as_str() {
        "bold" => fixed("<b>", "</b>"),
        "italic" => fixed("<i>", "</i>"),
        "code" => fixed("<code>", "</code>"),
        "pre" => fixed("<pre>", "</pre>"),
        "strikethrough" => fixed("<s>", "</s>"),
        "spoiler" => fixed("<tg-spoiler>", "</tg-spoiler>"),
        "underline" => fixed("<u>", "</u>"),
        "blockquote" => fixed("<blockquote>", "</blockquote>"),
        "text_link" => {
            let url = annotation.url.as_deref().unwrap_or("");
            Some(Tag {
                open: format!("<a href=\"{}\">", escape(url)),
                close: "</a>".to_string(),
            })
        }
        // A bare URL links to its own literal text.
        "url" => {
            let href = String::from_utf16_lossy(covered);
            Some(Tag {
                open: format!("<a href=\"{}\">", escape(&href)),
                close: "</a>".to_string(),
            })
        }
        _ => None,
    }
}

/// Convert text plus annotations into Telegram-flavored HTML.
///
/// With no annotations the text is returned unchanged: the caller contract is
/// that unannotated text is already safe or pre-formatted.
pub fn to_html(text: &str, entities: &[Annotation]) -> String {
    if text.is_empty() {
        return String::new();
    }
    if entities.is_empty() {
        return text.to_string();
    }

    let units: Vec<u16> = text.encode_utf16().collect();
    let mut positions: BTreeMap<usize, Boundary> = BTreeMap::new();
    positions.entry(0).or_default();
    positions.entry(units.len()).or_default();

    for (i, unit) in units.iter().enumerate() {
        if *unit == u16::from(b'\n') {
            positions.entry(i).or_default().line_break = true;
        }
    }

    // Spans are processed outermost-first so shared boundaries nest even
    // when the input arrives in arbitrary order.
    let mut ordered: Vec<&Annotation> = entities.iter().collect();
    ordered.sort_by(|a, b| {
        a.offset
            .cmp(&b.offset)
            .then((b.offset + b.length).cmp(&(a.offset + a.length)))
    });

    for entity in ordered {
        let start = entity.offset.min(units.len());
        let end = (entity.offset + entity.length).min(units.len());
        positions.entry(start).or_default();
        positions.entry(end).or_default();
        let Some(tag) = tag_for(entity, &units[start..end]) else {
            continue;
        };
        positions
            .entry(start)
            .or_default()
            .to_open
            .push(tag.clone());
        // Inner spans close first at a shared end boundary.
        positions.entry(end).or_default().to_close.insert(0, tag);
    }

    let boundaries: Vec<usize> = positions.keys().copied().collect();
    let mut html = String::new();
    for (i, &pos) in boundaries.iter().enumerate() {
        let next = boundaries.get(i + 1).copied().unwrap_or(units.len());
        let change = &positions[&pos];
        for tag in &change.to_close {
            html.push_str(&tag.close);
        }
        if change.line_break {
            html.push('\n');
        }
        for tag in &change.to_open {
            html.push_str(&tag.open);
        }
        let literal = String::from_utf16_lossy(&units[pos..next]);
        html.push_str(&escape(&literal.replace('\n', "")));
    }
    html
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
}

/// Logical button before transport mapping.
#[derive(Debug, Clone)]
pub struct ButtonSpec {
    pub text: String,
    pub action: ButtonAction,
}

#[derive(Debug, Clone)]
pub enum ButtonAction {
    Url(String),
    Callback(String),
}

impl ButtonSpec {
    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: ButtonAction::Url(url.into()),
        }
    }

    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: ButtonAction::Callback(data.into()),
        }
    }
}

/// Map a logical button layout into the transport's inline-keyboard shape.
///
/// Rows that end up with zero valid buttons are dropped; a layout with no
/// valid rows yields `None`. URLs without a scheme get "https://" prefixed.
pub fn keyboard(rows: &[Vec<ButtonSpec>]) -> Option<InlineKeyboardMarkup> {
    let mut processed = Vec::new();
    for row in rows {
        let mut buttons = Vec::new();
        for spec in row {
            match &spec.action {
                ButtonAction::Url(url) if !url.is_empty() => {
                    let url = if url.starts_with("http://") || url.starts_with("https://") {
                        url.clone()
                    } else {
                        format!("https://{}", url)
                    };
                    buttons.push(InlineKeyboardButton {
                        text: spec.text.clone(),
                        url: Some(url),
                        callback_data: None,
                    });
                }
                ButtonAction::Callback(data) if !data.is_empty() => {
                    buttons.push(InlineKeyboardButton {
                        text: spec.text.clone(),
                        url: None,
                        callback_data: Some(data.clone()),
                    });
                }
                _ => log::warn!("Dropping button '{}' with empty target", spec.text),
            }
        }
        if !buttons.is_empty() {
            processed.push(buttons);
        }
    }
    if processed.is_empty() {
        None
    } else {
        Some(InlineKeyboardMarkup {
            inline_keyboard: processed,
        })
    }
}
