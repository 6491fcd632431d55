//! Deterministic, stateless classifiers deciding when a conversation must be
//! handed to a human instead of (or in addition to) an automatic reply.
//!
//! Both checks run over lowercased text and are language-mixed (ru/en),
//! matching where the user base actually writes from. Phrase lists mirror
//! what the support staff flagged in the field; keep additions lowercase.

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

/// Profanity and abuse terms. Any hit escalates immediately.
static PROFANITY: &[&str] = &[
    "блять", "бля", "блядь", "ебать", "ебал", "хуй", "пизд", "сука", "гавно", "говно", "дерьм",
    "fuck", "shit", "damn", "asshole",
];

/// Strong negative sentiment; two distinct hits escalate.
static STRONG_NEGATIVE: &[&str] = &[
    "ненавижу", "отвратительн", "ужасн", "кошмар", "отстой", "мошенник", "развод", "обман",
    "украл", "жалоб", "суд", "возмущён", "возмущен", "бред", "дебил", "scam", "fraud", "stole",
    "terrible", "awful",
];

/// Error texts surfaced by the product that only an operator can act on.
static TECHNICAL_FAILURE: &[&str] = &[
    "обратитесь в поддержку",
    "обратитесь в службу",
    "обратитесь к поддержке",
    "свяжитесь с поддержкой",
    "ошибка",
    "не могу вывести",
    "не могу поставить на вывод",
    "не выводится",
    "не работает вывод",
    "contact support",
    "error",
    "can't withdraw",
    "cannot withdraw",
];

/// "When will a human look at this" questions.
static WAITING_QUESTIONS: &[&str] = &[
    "как скоро проверят",
    "когда проверят",
    "сколько ждать",
    "когда ответ",
    "когда решат",
    "долго ждать",
    "когда рассмотрят",
    "how long until",
    "when will you check",
    "how long do i wait",
];

/// A waiting word within short distance of a time-unit word reads as a
/// duration complaint ("уже три часа жду", "waiting for 2 days").
static DURATION_COMPLAINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(уже|жду|ждем|ждём|waiting|still)[^\n]{0,40}?(час|день|дня|дней|недел|сутки|сутк|hour|day|week)")
        .expect("duration complaint pattern")
});

/// True when the message shows distress that warrants a human: profanity, a
/// technical-failure phrase, a review-latency question, co-occurring strong
/// negatives, or a duration complaint. Sub-checks short-circuit in order.
pub fn detects_distress(text: &str) -> bool {
    let lower = text.to_lowercase();

    for word in PROFANITY {
        if lower.contains(word) {
            debug!("distress: profanity '{}'", word);
            return true;
        }
    }

    for phrase in TECHNICAL_FAILURE {
        if lower.contains(phrase) {
            debug!("distress: technical failure '{}'", phrase);
            return true;
        }
    }

    for phrase in WAITING_QUESTIONS {
        if lower.contains(phrase) {
            debug!("distress: waiting question '{}'", phrase);
            return true;
        }
    }

    let negative_hits = STRONG_NEGATIVE
        .iter()
        .filter(|word| lower.contains(*word))
        .count();
    if negative_hits >= 2 {
        debug!("distress: {} strong negative terms", negative_hits);
        return true;
    }

    if DURATION_COMPLAINT.is_match(&lower) {
        debug!("distress: duration complaint");
        return true;
    }

    false
}

/// Phrases a generated reply uses when it is effectively deferring to a
/// human ("передаю коллегам", "a specialist will look into it").
static HANDOFF_PHRASES: &[&str] = &[
    "передаю",
    "передам",
    "уточню",
    "уточн",
    "коллег",
    "специалист",
    "оператор",
    "рассмотр",
    "занимаемся",
    "изучением",
    "вернёмся",
    "вернемся",
    "решением",
    "operator",
    "specialist",
    "will forward",
    "will look into it",
    "colleague",
];

/// True when the generated reply itself requests a handoff; such a reply is
/// suppressed and the ticket is left for staff.
pub fn requests_handoff(reply: &str) -> bool {
    let lower = reply.to_lowercase();
    HANDOFF_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profanity_escalates() {
        assert!(detects_distress("да что за ХУЙня опять"));
    }

    #[test]
    fn technical_failure_phrase_escalates() {
        assert!(detects_distress("пишет ошибка при выводе"));
        assert!(detects_distress("it shows an ERROR on withdrawal"));
    }

    #[test]
    fn waiting_question_escalates() {
        assert!(detects_distress("как скоро проверят мою заявку?"));
    }

    #[test]
    fn single_negative_term_is_not_enough() {
        assert!(!detects_distress("это какой-то кошмар"));
        assert!(detects_distress("это кошмар и развод"));
    }

    #[test]
    fn duration_complaint_escalates() {
        assert!(detects_distress("я уже три часа жду ответа"));
        assert!(detects_distress("still waiting for 2 days now"));
    }

    #[test]
    fn calm_message_passes() {
        assert!(!detects_distress("как пополнить баланс?"));
        assert!(!detects_distress("how to top up my balance"));
    }

    #[test]
    fn handoff_phrases_detected_in_replies() {
        assert!(requests_handoff("Передаю ваш вопрос коллегам."));
        assert!(requests_handoff("A specialist will look into it shortly."));
        assert!(!requests_handoff(
            "Транзакции могут занять до 15 минут. Проверьте позже."
        ));
    }
}
