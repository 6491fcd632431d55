//! Topic catalogue, FAQ knowledge base and user-facing strings (en/ru).
//!
//! The FAQ pairs are compiled into the assistant's system prompt and drive
//! the topic → question → answer menu flow. Entries with an empty answer are
//! contact-only subtopics: selecting one goes straight to the operator flow.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Balance,
    Withdrawal,
    Bugs,
    Other,
    Cooperation,
}

pub const ALL_TOPICS: [Topic; 5] = [
    Topic::Balance,
    Topic::Withdrawal,
    Topic::Bugs,
    Topic::Other,
    Topic::Cooperation,
];

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Balance => "balance",
            Topic::Withdrawal => "withdrop",
            Topic::Bugs => "bugs",
            Topic::Other => "other",
            Topic::Cooperation => "cooperation",
        }
    }

    pub fn parse(raw: &str) -> Option<Topic> {
        match raw {
            "balance" => Some(Topic::Balance),
            "withdrop" => Some(Topic::Withdrawal),
            "bugs" => Some(Topic::Bugs),
            "other" => Some(Topic::Other),
            "cooperation" => Some(Topic::Cooperation),
            _ => None,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Topic::Balance => "💰",
            Topic::Withdrawal => "🎁",
            Topic::Bugs => "🆘",
            Topic::Other => "📣",
            Topic::Cooperation => "📬",
        }
    }

    pub fn label(&self, lang: &str) -> &'static str {
        match (self, lang) {
            (Topic::Balance, "ru") => "💰 Баланс",
            (Topic::Balance, _) => "💰 Balance",
            (Topic::Withdrawal, "ru") => "🎁 Вывод подарков",
            (Topic::Withdrawal, _) => "🎁 Withdrawal",
            (Topic::Bugs, "ru") => "🆘 Ошибки",
            (Topic::Bugs, _) => "🆘 Bugs",
            (Topic::Other, "ru") => "📣 Другое",
            (Topic::Other, _) => "📣 Other",
            (Topic::Cooperation, "ru") => "📬 Сотрудничество",
            (Topic::Cooperation, _) => "📬 Cooperation",
        }
    }
}

pub const SUPPORTED_LANGUAGES: [&str; 2] = ["en", "ru"];

pub fn is_supported_language(lang: &str) -> bool {
    SUPPORTED_LANGUAGES.contains(&lang)
}

#[derive(Debug, Clone, Copy)]
pub struct FaqEntry {
    pub question: &'static str,
    pub answer: &'static str,
}

pub fn faq_entries(topic: Topic, lang: &str) -> &'static [FaqEntry] {
    match (topic, lang) {
        (Topic::Balance, "ru") => &[
            FaqEntry {
                question: "Как пополнить баланс?",
                answer: "Чтобы пополнить баланс, перейдите в раздел <b>Профиль</b>, нажмите кнопку <b>«Пополнить»</b> и выберите удобный способ:\n\n<blockquote><b>Telegram Stars\nToncoin\nTelegram Подарки</b></blockquote>",
            },
            FaqEntry {
                question: "Что делать, если пополнение не пришло?",
                answer: "<b>Пожалуйста, подождите несколько минут и обновите страницу.</b> Если средства не начислились в течение 15 минут, свяжитесь с поддержкой, и мы оперативно все проверим.",
            },
        ],
        (Topic::Balance, _) => &[
            FaqEntry {
                question: "How to top up your balance?",
                answer: "To top up your balance, go to the <b>Profile</b> section, click the <b>\"Deposit\"</b> button and choose a convenient method:\n\n<blockquote><b>Telegram Stars\nToncoin\nTelegram Gifts</b></blockquote>",
            },
            FaqEntry {
                question: "What should I do if the top-up didn't arrive?",
                answer: "<b>Please wait a few minutes and refresh the page.</b> If the funds don't appear within 15 minutes, contact support and we'll check everything promptly.",
            },
        ],
        (Topic::Withdrawal, "ru") => &[
            FaqEntry {
                question: "Почему не вывели мой подарок?",
                answer: "Вывод подарков осуществляется автоматически, как правило, в течение нескольких минут. Из-за высокой нагрузки возможны задержки до 24 часов; отдельные виды подарков доставляются до 21 дня.",
            },
            FaqEntry {
                question: "Как вывести подарки?",
                answer: "<blockquote><b>Чтобы вывести подарок:</b>\n1. Перейдите в раздел <b>«Мои подарки»</b>.\n2. Выберите подарок, который хотите вывести.\n3. Нажмите кнопку <b>«Вывести»</b>.</blockquote>\n\nСтатус обработки можно отслеживать прямо в этом разделе.",
            },
        ],
        (Topic::Withdrawal, _) => &[
            FaqEntry {
                question: "Why hasn't my gift been withdrawn?",
                answer: "Gift withdrawals are processed automatically, usually within a few minutes. Under high load delays of up to 24 hours may occur; some gift types take up to 21 days.",
            },
            FaqEntry {
                question: "How to withdraw gifts?",
                answer: "<blockquote><b>To withdraw a gift:</b>\n1. Go to the <b>\"My gifts\"</b> section.\n2. Select the gift you want to withdraw.\n3. Click the <b>\"Withdraw\"</b> button.</blockquote>\n\nYou can track its processing right in that section.",
            },
        ],
        // Bug reports have no canned answer: every entry routes to an operator.
        (Topic::Bugs, "ru") => &[
            FaqEntry { question: "Неточное описание или картинка", answer: "" },
            FaqEntry { question: "Техническая ошибка", answer: "" },
            FaqEntry { question: "Другая ошибка", answer: "" },
        ],
        (Topic::Bugs, _) => &[
            FaqEntry { question: "Description inaccuracy or visual", answer: "" },
            FaqEntry { question: "Technical bug", answer: "" },
            FaqEntry { question: "Another bug", answer: "" },
        ],
        (Topic::Other, "ru") => &[
            FaqEntry {
                question: "Рефералы",
                answer: "<b>Зарабатывайте больше!</b> Приглашайте друзей по уникальной ссылке и получайте <b>10% от всех пополнений</b> каждого приглашённого. Ссылка — во вкладке «Друзья».",
            },
            FaqEntry {
                question: "Язык",
                answer: "Переключение языка доступно в настройках профиля, внизу страницы.",
            },
        ],
        (Topic::Other, _) => &[
            FaqEntry {
                question: "Referral Program",
                answer: "Earn more! Invite friends via your unique link from the \"Friends\" tab and get <b>10% of their top-ups</b> in Telegram Stars.",
            },
            FaqEntry {
                question: "Language",
                answer: "The language toggle lives in the profile settings, at the bottom of the page.",
            },
        ],
        (Topic::Cooperation, _) => &[],
    }
}

/// User-visible strings for one language.
#[derive(Debug)]
pub struct Messages {
    pub start_screen: &'static str,
    pub select_language: &'static str,
    pub select_topic: &'static str,
    pub describe_issue: &'static str,
    pub cooperation_message: &'static str,
    pub error: &'static str,
    pub back: &'static str,
    pub contact_operator: &'static str,
    pub ticket_submitted: &'static str,
    pub ticket_closed: &'static str,
    pub ticket_closed_message: &'static str,
    pub ticket_already_open: &'static str,
    pub close_warning: &'static str,
    pub command_start: &'static str,
    pub command_lang: &'static str,
}

static EN: Messages = Messages {
    start_screen: "Greetings! Here you can reach out to our support team.\n\nPlease select a contact topic.",
    select_language: "Please select a language:",
    select_topic: "Select the most appropriate question from the list below.",
    describe_issue: "📝 Please describe your problem in as much detail as possible. This will help us to solve your issue faster and more accurately.",
    cooperation_message: "<b>📬 Cooperation</b>\n\nThank you for your interest!\n\nFor any collaboration inquiries, please reach out to our PR department.",
    error: "An error occurred. Please try again.",
    back: "‹ Back",
    contact_operator: "Contact operator",
    ticket_submitted: "Thank you for your request, our support team will review it in the order received.",
    ticket_closed: "Thank you for contacting us. Based on our information, your issue has been resolved.\n\nIf you still need help, you can start a new conversation through the menu by sending /start.",
    ticket_closed_message: "Your previous request has been closed, so the support team did not receive your last message. If you have any remaining questions, please contact us again by selecting the appropriate section in the menu below.",
    ticket_already_open: "❌ <b>You already have an open support request.</b>\n\nWe are already working on it and will contact you as soon as possible. Thank you for your patience!",
    close_warning: "Has your issue been resolved? If we do not hear back from you, this request will be closed automatically.",
    command_start: "Start the bot",
    command_lang: "Change language",
};

static RU: Messages = Messages {
    start_screen: "Приветствуем! Здесь вы можете связаться с поддержкой.\n\nПожалуйста, выберите тему обращения.",
    select_language: "Пожалуйста, выберите язык:",
    select_topic: "Выберите наиболее подходящий вопрос из списка ниже.",
    describe_issue: "📝 Пожалуйста, опишите вашу проблему максимально подробно. Это поможет нам быстрее и точнее решить ваш вопрос.",
    cooperation_message: "<b>📬 Сотрудничество</b>\n\nБлагодарим вас за интерес!\n\nПо всем вопросам сотрудничества, пожалуйста, обращайтесь в наш PR-отдел.",
    error: "Произошла ошибка. Попробуйте снова.",
    back: "‹ Назад",
    contact_operator: "Связаться с оператором",
    ticket_submitted: "Спасибо за ваше обращение, наша команда поддержки рассмотрит его в порядке очереди.",
    ticket_closed: "Спасибо, что связались с нами. На основании нашей информации, ваш вопрос решен.\n\nЕсли вам все еще нужна помощь, вы можете начать новый разговор через меню, отправив /start.",
    ticket_closed_message: "Ваше предыдущее обращение закрыто, поэтому команда поддержки не получила ваше последнее сообщение. Если у вас остались вопросы, пожалуйста, свяжитесь с нами снова, выбрав соответствующую тему в меню ниже.",
    ticket_already_open: "❌ <b>У вас есть открытый запрос в поддержке.</b>\n\nМы уже работаем над ним и свяжемся с вами в ближайшее время. Спасибо за терпение!",
    close_warning: "Ваш вопрос решен? Если мы не получим от вас ответа, обращение будет закрыто автоматически.",
    command_start: "Запустить бота",
    command_lang: "Сменить язык",
};

pub fn messages(lang: &str) -> &'static Messages {
    match lang {
        "ru" => &RU,
        _ => &EN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_round_trip() {
        for topic in ALL_TOPICS {
            assert_eq!(Topic::parse(topic.as_str()), Some(topic));
        }
        assert_eq!(Topic::parse("nonsense"), None);
    }

    #[test]
    fn bug_entries_are_contact_only() {
        for entry in faq_entries(Topic::Bugs, "en") {
            assert!(entry.answer.is_empty());
        }
    }

    #[test]
    fn unknown_language_falls_back_to_english() {
        assert_eq!(messages("de").command_start, messages("en").command_start);
    }
}
