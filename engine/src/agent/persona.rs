//! Persona text
//!
//! System prompt template, fixed reply pools and chat commands. Every
//! user-visible string the engine produces on its own (as opposed to model
//! output) comes from here, so failures read in the same voice as normal
//! replies.

use rand::seq::SliceRandom;
use rand::Rng;
use sdk::errors::EngineError;

use crate::mood::Mood;

/// Default system prompt. `{name}` is the bot's name, `{user_info}` the user-info line.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are {name}, an exciting, vibrant and super cool human! 🌟

{user_info}

PERSONALITY:
- You're a fun-loving, energetic and knowledgeable girl with natural Hinglish vibes
- You're smart, witty, sometimes sassy, but always caring
- Mix Hindi and English like a true Indian, never forced

SPECIAL POWERS:
- You can send voice messages! Users can ask for \"voice\" or \"bolo\"
- You remember your conversations with users
- Your mood changes over the day: chatty, excited, lazy, sleepy or normal

RESPONSE STYLE:
- Keep it real: 20-100 words, mostly one-liners
- Use natural Hinglish: yaar, arre, bas, acha, bilkul, ekdum
- 1-3 emojis at most
- Unknown stuff: \"pata nahi yaar, Google kar lo 😅\"

In group chats each message starts with <id><display name>: so you know who is talking.";

const USER_INFO_PREFIX: &str = "USER INFO:";

pub const INPUT_TRUNCATION_SUFFIX: &str = "... (bahut lamba message tha yaar! 😅)";
pub const REPLY_TRUNCATION_SUFFIX: &str = "... aur bhi kuch puchna hai? 😊";

/// Room left for the suffix when a reply is cut
const REPLY_CUT_MARGIN: usize = 30;

pub const OCR_PLACEHOLDER: &str = "Image dekha, par text nahi mila yaar 🖼️";
pub const RESET_CONFIRMATION: &str = "🧹 Memory saaf kar diya! Fresh start ho gaya! ✨";
pub const RESET_FAILED: &str = "Arre, memory saaf nahi ho payi 😅 Thodi der baad try karo!";
pub const UNKNOWN_COMMAND: &str = "Ye command samajh nahi aaya yaar 🤔 !help bhejo, sab bata dungi!";

const GREETINGS: &[&str] = &[
    "Heyyy! 🌟 Main {bot} hun - tumhari nayi dost! Tumhara naam kya hai?",
    "Hiii there! ✨ {bot} here - smart, sassy aur bilkul ready to chat! Naam batao?",
    "Namaste! 🙏 Main {bot} - tumhara cool buddy! Kya naam hai tumhara?",
    "Hey gorgeous! 😄 {bot} speaking - ready for some fun chats! What's your name?",
];

const NAME_ACKNOWLEDGMENTS: &[&str] = &[
    "Wow {name}! 🌟 What a lovely name! Kaise ho aap?",
    "{name}! ✨ Nice to meet you officially! How's your day going?",
    "Hello {name}! 😊 Ab lag raha hai proper dosti ho gayi!",
    "{name} - beautiful name! 💕 Main excited hun to chat with you!",
];

const EMPTY_REPLIES: &[&str] = &[
    "Arre yaar kuch toh bolo! 😄",
    "Samjha nahi main... explain karo",
    "Haan bolo bolo! 👂",
    "Kya hua? Cat got your tongue? 😸",
];

const ERROR_REPLIES: &[&str] = &[
    "Oops! Server thoda slow hai yaar 😅",
    "Arre yaar net issues aa rahe hain!",
    "Thoda wait karo... technical difficulties! 🔧",
    "AI brain processing... please wait! 🤖",
];

/// Chat commands handled without the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reset,
    Mood,
    Help,
}

impl Command {
    /// Parse a whole message as a command
    ///
    /// Bare words (`reset`) and prefixed forms (`!reset`, `/reset`) are both
    /// accepted, case-insensitively. A prefixed unknown word is an
    /// [`EngineError::InvalidCommand`]; any other text is `Ok(None)`.
    pub fn parse(text: &str) -> Result<Option<Command>, EngineError> {
        let lowered = text.trim().to_lowercase();
        let (prefixed, word) = match lowered.strip_prefix(['!', '/']) {
            Some(rest) => (true, rest),
            None => (false, lowered.as_str()),
        };

        // Telegram appends the bot name to commands in groups: /help@sakhi_bot
        let word = if prefixed {
            word.split('@').next().unwrap_or(word)
        } else {
            word
        };

        match word {
            "reset" => Ok(Some(Command::Reset)),
            "mood" => Ok(Some(Command::Mood)),
            "help" | "start" if prefixed || word == "help" => Ok(Some(Command::Help)),
            _ if prefixed && !word.is_empty() && word.chars().all(|c| c.is_ascii_alphabetic()) => {
                Err(EngineError::InvalidCommand(word.to_string()))
            }
            _ => Ok(None),
        }
    }
}

/// The user-info line for the system prompt
pub fn user_info(name: Option<&str>) -> String {
    match name {
        Some(name) => format!(
            "{} This amazing person's name is {}! Use their name naturally in conversations.",
            USER_INFO_PREFIX, name
        ),
        None => format!(
            "{} You haven't learned this person's name yet - but you're excited to!",
            USER_INFO_PREFIX
        ),
    }
}

/// Fill in the system prompt template
pub fn render_system_prompt(template: &str, bot_name: &str, user_name: Option<&str>) -> String {
    template
        .replace("{name}", bot_name)
        .replace("{user_info}", &user_info(user_name))
}

/// Replace the user-info line of a rendered system prompt
///
/// Appends the line when the prompt has none.
pub fn rewrite_user_info(system: &str, line: &str) -> String {
    let mut replaced = false;
    let rewritten: Vec<String> = system
        .lines()
        .map(|l| {
            let trimmed = l.trim_start();
            if !replaced && trimmed.starts_with(USER_INFO_PREFIX) {
                replaced = true;
                format!("{}{}", &l[..l.len() - trimmed.len()], line)
            } else {
                l.to_string()
            }
        })
        .collect();

    if replaced {
        rewritten.join("\n")
    } else {
        format!("{}\n\n{}", system, line)
    }
}

fn pick<'a, R: Rng + ?Sized>(pool: &[&'a str], rng: &mut R) -> &'a str {
    pool.choose(rng).copied().unwrap_or_default()
}

pub fn greeting<R: Rng + ?Sized>(bot_name: &str, rng: &mut R) -> String {
    pick(GREETINGS, rng).replace("{bot}", bot_name)
}

pub fn name_acknowledgment<R: Rng + ?Sized>(name: &str, rng: &mut R) -> String {
    pick(NAME_ACKNOWLEDGMENTS, rng).replace("{name}", name)
}

pub fn empty_reply<R: Rng + ?Sized>(rng: &mut R) -> String {
    pick(EMPTY_REPLIES, rng).to_string()
}

pub fn error_reply<R: Rng + ?Sized>(rng: &mut R) -> String {
    pick(ERROR_REPLIES, rng).to_string()
}

/// Whether `text` is one of the fixed error replies
pub fn is_error_reply(text: &str) -> bool {
    ERROR_REPLIES.contains(&text)
}

pub fn mood_report(mood: Mood) -> String {
    format!(
        "🎭 Current mood: {}\n\nAvailable moods:\n• Chatty 🗣️\n• Excited 🎉\n• Lazy 😴\n• Sleepy 💤\n• Normal 😊",
        mood.as_str().to_uppercase()
    )
}

pub fn help_text(bot_name: &str) -> String {
    format!(
        "🌟 {} Ki Guide:\n\n\
         • Normal chat karo - main samjh jaungi!\n\
         • \"Voice\" ya \"bolo\" kehke voice message manga sakte ho 🎤\n\
         • !reset - memory clear\n\
         • !mood - current mood check\n\
         • Images bhej sakte ho - main text padh lungi 📷\n\n\
         Bas enjoy karo! 😄",
        bot_name
    )
}

/// Cut inbound text to `max_chars` characters
pub fn truncate_input(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}{}", head, INPUT_TRUNCATION_SUFFIX)
}

/// Cut an over-long model reply, leaving room for the suffix
pub fn cap_reply(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(REPLY_CUT_MARGIN).max(1);
    let head: String = text.chars().take(keep).collect();
    format!("{}{}", head.trim_end(), REPLY_TRUNCATION_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("reset").unwrap(), Some(Command::Reset));
        assert_eq!(Command::parse("  !RESET ").unwrap(), Some(Command::Reset));
        assert_eq!(Command::parse("/mood").unwrap(), Some(Command::Mood));
        assert_eq!(Command::parse("Help").unwrap(), Some(Command::Help));
        assert_eq!(Command::parse("/start").unwrap(), Some(Command::Help));
        assert_eq!(Command::parse("/help@sakhi_bot").unwrap(), Some(Command::Help));
    }

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(Command::parse("reset my phone please").unwrap(), None);
        assert_eq!(Command::parse("start").unwrap(), None);
        assert_eq!(Command::parse("!!!").unwrap(), None);
        assert_eq!(Command::parse("! wow").unwrap(), None);
    }

    #[test]
    fn test_unknown_prefixed_command() {
        let err = Command::parse("!dance").unwrap_err();
        assert!(matches!(err, EngineError::InvalidCommand(w) if w == "dance"));
    }

    #[test]
    fn test_render_and_rewrite_user_info() {
        let prompt = render_system_prompt(DEFAULT_SYSTEM_PROMPT, "Mohini", None);
        assert!(prompt.starts_with("You are Mohini"));
        assert!(prompt.contains("haven't learned this person's name"));

        let rewritten = rewrite_user_info(&prompt, &user_info(Some("Zoya")));
        assert!(rewritten.contains("name is Zoya!"));
        assert!(!rewritten.contains("haven't learned"));
        assert_eq!(rewritten.lines().count(), prompt.lines().count());
    }

    #[test]
    fn test_rewrite_appends_when_missing() {
        let rewritten = rewrite_user_info("Be nice.", &user_info(Some("Ravi")));
        assert!(rewritten.starts_with("Be nice.\n\nUSER INFO:"));
    }

    #[test]
    fn test_truncate_input() {
        assert_eq!(truncate_input("short", 500), "short");
        let long = "a".repeat(600);
        let cut = truncate_input(&long, 500);
        assert!(cut.ends_with(INPUT_TRUNCATION_SUFFIX));
        assert_eq!(cut.chars().filter(|c| *c == 'a').count(), 500);
    }

    #[test]
    fn test_cap_reply_counts_chars_not_bytes() {
        let long = "ü".repeat(300);
        let cut = cap_reply(&long, 250);
        assert!(cut.ends_with(REPLY_TRUNCATION_SUFFIX));
        assert_eq!(cut.chars().filter(|c| *c == 'ü').count(), 220);
    }

    #[test]
    fn test_pools() {
        let mut rng = StdRng::seed_from_u64(5);
        assert!(name_acknowledgment("Zoya", &mut rng).contains("Zoya"));
        assert!(greeting("Mohini", &mut rng).contains("Mohini"));
        assert!(is_error_reply(&error_reply(&mut rng)));
        assert!(!empty_reply(&mut rng).is_empty());
        assert!(mood_report(Mood::Sleepy).contains("SLEEPY"));
    }
}
