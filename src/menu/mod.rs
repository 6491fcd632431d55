//! Client-facing menu flow and the callback-data schema for both the client
//! menu and the staff thread actions.
//!
//! Screens are pure renderers returning text plus an inline keyboard; the
//! webhook router owns sending and dialog-state bookkeeping.

use crate::kb::{self, Topic, ALL_TOPICS, SUPPORTED_LANGUAGES};
use crate::markup::{keyboard, ButtonSpec, InlineKeyboardMarkup};

/// Where a user is inside the menu conversation. Absent means not in a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    /// Topic chosen, waiting for the free-text problem description.
    AwaitingDescription(Topic),
}

/// Parsed callback-query payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    SelectLanguage(String),
    SelectTopic(Topic),
    ShowFaq(Topic, usize),
    ContactOperator(Topic),
    BackToTopics,
    // Staff-side actions carry the ticket owner's user id.
    CloseTicket(i64),
    TechCreate(i64),
    TechConfirm(i64),
    TechCancel(i64),
    TechClose(i64),
    TechReopen(i64),
}

impl Callback {
    pub fn parse(data: &str) -> Option<Callback> {
        if let Some(lang) = data.strip_prefix("lang_") {
            return Some(Callback::SelectLanguage(lang.to_string()));
        }
        if let Some(raw) = data.strip_prefix("topic_") {
            return Topic::parse(raw).map(Callback::SelectTopic);
        }
        if let Some(rest) = data.strip_prefix("faq_") {
            let (raw_topic, raw_index) = rest.rsplit_once('_')?;
            let topic = Topic::parse(raw_topic)?;
            let index = raw_index.parse().ok()?;
            return Some(Callback::ShowFaq(topic, index));
        }
        if let Some(raw) = data.strip_prefix("contact_") {
            return Topic::parse(raw).map(Callback::ContactOperator);
        }
        if data == "back_to_topics" {
            return Some(Callback::BackToTopics);
        }
        if let Some(raw) = data.strip_prefix("close_ticket_") {
            return raw.parse().ok().map(Callback::CloseTicket);
        }
        if let Some(raw) = data.strip_prefix("tech_create_") {
            return raw.parse().ok().map(Callback::TechCreate);
        }
        if let Some(raw) = data.strip_prefix("tech_confirm_") {
            return raw.parse().ok().map(Callback::TechConfirm);
        }
        if let Some(raw) = data.strip_prefix("tech_cancel_") {
            return raw.parse().ok().map(Callback::TechCancel);
        }
        if let Some(raw) = data.strip_prefix("tech_close_") {
            return raw.parse().ok().map(Callback::TechClose);
        }
        if let Some(raw) = data.strip_prefix("tech_reopen_") {
            return raw.parse().ok().map(Callback::TechReopen);
        }
        None
    }
}

pub fn tech_reopen_data(user_id: i64) -> String {
    format!("tech_reopen_{}", user_id)
}

pub fn start_screen(lang: &str) -> (String, Option<InlineKeyboardMarkup>) {
    let messages = kb::messages(lang);
    let rows: Vec<Vec<ButtonSpec>> = ALL_TOPICS
        .iter()
        .map(|topic| {
            vec![ButtonSpec::callback(
                topic.label(lang),
                format!("topic_{}", topic.as_str()),
            )]
        })
        .collect();
    (messages.start_screen.to_string(), keyboard(&rows))
}

pub fn language_screen(lang: &str) -> (String, Option<InlineKeyboardMarkup>) {
    let messages = kb::messages(lang);
    let row = SUPPORTED_LANGUAGES
        .iter()
        .map(|code| {
            let label = match *code {
                "ru" => "🇷🇺 Русский",
                _ => "🇬🇧 English",
            };
            ButtonSpec::callback(label, format!("lang_{}", code))
        })
        .collect();
    (messages.select_language.to_string(), keyboard(&[row]))
}

/// FAQ sub-menu for one topic. Cooperation renders its static contact text
/// instead of questions.
pub fn topic_screen(topic: Topic, lang: &str) -> (String, Option<InlineKeyboardMarkup>) {
    let messages = kb::messages(lang);
    if topic == Topic::Cooperation {
        let rows = vec![vec![ButtonSpec::callback(messages.back, "back_to_topics")]];
        return (messages.cooperation_message.to_string(), keyboard(&rows));
    }

    let mut rows: Vec<Vec<ButtonSpec>> = kb::faq_entries(topic, lang)
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let data = if entry.answer.is_empty() {
                format!("contact_{}", topic.as_str())
            } else {
                format!("faq_{}_{}", topic.as_str(), index)
            };
            vec![ButtonSpec::callback(entry.question, data)]
        })
        .collect();
    rows.push(vec![ButtonSpec::callback(
        messages.contact_operator,
        format!("contact_{}", topic.as_str()),
    )]);
    rows.push(vec![ButtonSpec::callback(messages.back, "back_to_topics")]);
    (messages.select_topic.to_string(), keyboard(&rows))
}

/// A single FAQ answer with contact/back navigation. `None` for an index out
/// of range or a contact-only entry.
pub fn faq_screen(
    topic: Topic,
    index: usize,
    lang: &str,
) -> Option<(String, Option<InlineKeyboardMarkup>)> {
    let entry = kb::faq_entries(topic, lang).get(index)?;
    if entry.answer.is_empty() {
        return None;
    }
    let messages = kb::messages(lang);
    let rows = vec![
        vec![ButtonSpec::callback(
            messages.contact_operator,
            format!("contact_{}", topic.as_str()),
        )],
        vec![ButtonSpec::callback(
            messages.back,
            format!("topic_{}", topic.as_str()),
        )],
    ];
    Some((entry.answer.to_string(), keyboard(&rows)))
}

/// Buttons attached to a new ticket's header card in the support thread.
pub fn staff_header_keyboard(user_id: i64, has_tech_chat: bool) -> Option<InlineKeyboardMarkup> {
    let mut rows = vec![vec![ButtonSpec::callback(
        "🔒 Закрыть тикет",
        format!("close_ticket_{}", user_id),
    )]];
    if has_tech_chat {
        rows.push(vec![ButtonSpec::callback(
            "🔧 Подключить тех. специалистов",
            format!("tech_create_{}", user_id),
        )]);
    }
    keyboard(&rows)
}

/// Confirm/cancel step before a technical thread is actually created.
pub fn tech_confirm_keyboard(user_id: i64) -> Option<InlineKeyboardMarkup> {
    keyboard(&[vec![
        ButtonSpec::callback("✅ Да", format!("tech_confirm_{}", user_id)),
        ButtonSpec::callback("✖️ Отмена", format!("tech_cancel_{}", user_id)),
    ]])
}

/// Posted in the tech thread so tech staff can close their part.
pub fn tech_thread_keyboard(user_id: i64) -> Option<InlineKeyboardMarkup> {
    keyboard(&[vec![ButtonSpec::callback(
        "✅ Закрыть тех. тред",
        format!("tech_close_{}", user_id),
    )]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_round_trip() {
        assert_eq!(
            Callback::parse("lang_ru"),
            Some(Callback::SelectLanguage("ru".into()))
        );
        assert_eq!(
            Callback::parse("topic_balance"),
            Some(Callback::SelectTopic(Topic::Balance))
        );
        assert_eq!(
            Callback::parse("faq_withdrop_1"),
            Some(Callback::ShowFaq(Topic::Withdrawal, 1))
        );
        assert_eq!(
            Callback::parse("contact_bugs"),
            Some(Callback::ContactOperator(Topic::Bugs))
        );
        assert_eq!(
            Callback::parse("close_ticket_42"),
            Some(Callback::CloseTicket(42))
        );
        assert_eq!(
            Callback::parse("tech_confirm_42"),
            Some(Callback::TechConfirm(42))
        );
        assert_eq!(Callback::parse("bogus_payload"), None);
    }

    #[test]
    fn bug_questions_route_to_contact() {
        let (_, markup) = topic_screen(Topic::Bugs, "en");
        let markup = markup.unwrap();
        let first = &markup.inline_keyboard[0][0];
        assert!(first
            .callback_data
            .as_deref()
            .unwrap()
            .starts_with("contact_"));
    }

    #[test]
    fn faq_screen_rejects_out_of_range() {
        assert!(faq_screen(Topic::Balance, 99, "en").is_none());
    }

    #[test]
    fn start_screen_lists_all_topics() {
        let (_, markup) = start_screen("en");
        assert_eq!(markup.unwrap().inline_keyboard.len(), ALL_TOPICS.len());
    }
}
