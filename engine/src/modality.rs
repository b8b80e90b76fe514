//! Text-or-voice decision
//!
//! Rules, in priority order:
//!
//! 1. An explicit voice request always wins.
//! 2. If the recent assistant turns already hold too many voice notes, answer in text.
//! 3. Otherwise the mood decides: lively moods lean voice, tired moods lean
//!    text, and `normal` weighs the reply length.
//!
//! Rule 3 is a draw against tunable probabilities; rules 1 and 2 are exact.

use rand::Rng;
use tracing::debug;

use crate::memory::{Conversation, Modality};
use crate::mood::Mood;

/// Phrases that ask for a voice reply (matched as substrings, case-insensitive)
const VOICE_KEYWORDS: &[&str] = &[
    "voice",
    "audio",
    "bolo",
    "sunao",
    "voice note",
    "voice message",
    "awaaz",
    "voice mein",
    "voice me",
    "speak",
    "say it",
    "record",
    "voice mai",
    "voice main",
    "bolke",
    "bol ke",
    "sun kar",
];

/// Whether the inbound text asks for a voice reply
pub fn is_voice_requested(text: &str) -> bool {
    let lowered = text.to_lowercase();
    VOICE_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Tunable thresholds for [`ModalityPolicy::decide`]
#[derive(Debug, Clone)]
pub struct ModalityPolicy {
    /// Assistant turns inspected by the anti-repetition guard
    pub recent_window: usize,
    /// Voice notes within the window that force text
    pub repetition_limit: usize,
    /// Replies shorter than this count as short (chars)
    pub short_reply: usize,
    /// Replies longer than this are always text in `normal` mood (chars)
    pub long_reply: usize,
    /// Voice probability for `chatty` and `excited`
    pub lively_voice: f64,
    /// Voice probability for `lazy` and `sleepy`
    pub quiet_voice: f64,
    /// Voice probability for short replies in `normal`
    pub short_voice: f64,
    /// Voice probability for medium replies in `normal`
    pub medium_voice: f64,
}

impl Default for ModalityPolicy {
    fn default() -> Self {
        Self {
            recent_window: 5,
            repetition_limit: 2,
            short_reply: 50,
            long_reply: 150,
            lively_voice: 0.7,
            quiet_voice: 0.2,
            short_voice: 0.5,
            medium_voice: 0.4,
        }
    }
}

impl ModalityPolicy {
    /// Whether the anti-repetition guard is active for `history`
    pub fn voice_saturated(&self, history: &Conversation) -> bool {
        history
            .recent_assistant_modalities(self.recent_window)
            .iter()
            .filter(|m| **m == Modality::Voice)
            .count()
            >= self.repetition_limit
    }

    /// Pick the delivery channel for a reply of `reply_len` characters
    pub fn decide<R: Rng + ?Sized>(
        &self,
        reply_len: usize,
        history: &Conversation,
        requested: bool,
        mood: Mood,
        rng: &mut R,
    ) -> Modality {
        if requested {
            debug!("Voice explicitly requested");
            return Modality::Voice;
        }

        if self.voice_saturated(history) {
            debug!("Too many recent voice notes, answering in text");
            return Modality::Text;
        }

        let p_voice = match mood {
            Mood::Chatty | Mood::Excited => self.lively_voice,
            Mood::Lazy | Mood::Sleepy => self.quiet_voice,
            Mood::Normal if reply_len > self.long_reply => 0.0,
            Mood::Normal if reply_len < self.short_reply => self.short_voice,
            Mood::Normal => self.medium_voice,
        };

        let modality = if rng.gen_bool(p_voice.clamp(0.0, 1.0)) {
            Modality::Voice
        } else {
            Modality::Text
        };

        debug!(%mood, reply_len, p_voice, %modality, "Modality decided");
        modality
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Turn;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn history(modalities: &[Modality]) -> Conversation {
        let mut conversation = Conversation::new();
        conversation.ensure_system("sys");
        for (i, m) in modalities.iter().enumerate() {
            conversation.push(Turn::user(format!("q{}", i)));
            conversation.push(Turn::assistant(format!("a{}", i), *m));
        }
        conversation
    }

    #[test]
    fn test_voice_keywords() {
        assert!(is_voice_requested("Ek gaana SUNAO na"));
        assert!(is_voice_requested("send a voice note"));
        assert!(is_voice_requested("bol ke batao"));
        assert!(!is_voice_requested("kya haal hai"));
    }

    #[test]
    fn test_anti_repetition_beats_excited_mood() {
        use Modality::*;
        let policy = ModalityPolicy::default();
        let history = history(&[Text, Voice, Voice, Text, Text]);
        let mut rng = StdRng::seed_from_u64(0);

        for _ in 0..200 {
            assert_eq!(policy.decide(40, &history, false, Mood::Excited, &mut rng), Text);
        }
    }

    #[test]
    fn test_explicit_request_beats_anti_repetition() {
        use Modality::*;
        let policy = ModalityPolicy::default();
        let history = history(&[Voice, Voice, Voice, Voice, Voice]);
        let mut rng = StdRng::seed_from_u64(0);

        assert_eq!(policy.decide(400, &history, true, Mood::Sleepy, &mut rng), Voice);
    }

    #[test]
    fn test_window_only_sees_last_five() {
        use Modality::*;
        let policy = ModalityPolicy::default();
        let old_voices = history(&[Voice, Voice, Text, Text, Text, Text, Text]);
        assert!(!policy.voice_saturated(&old_voices));

        let recent_voices = history(&[Text, Text, Text, Voice, Voice]);
        assert!(policy.voice_saturated(&recent_voices));
    }

    #[test]
    fn test_pending_turn_not_counted() {
        use Modality::*;
        let policy = ModalityPolicy::default();
        let mut h = history(&[Text, Voice, Text, Text]);
        h.push(Turn::user("x"));
        h.push(Turn::assistant("y", Pending));
        assert!(!policy.voice_saturated(&h));
    }

    #[test]
    fn test_long_normal_reply_is_text() {
        let policy = ModalityPolicy::default();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..200 {
            assert_eq!(
                policy.decide(151, &Conversation::new(), false, Mood::Normal, &mut rng),
                Modality::Text
            );
        }
    }

    #[test]
    fn test_mood_bias_rates() {
        let policy = ModalityPolicy::default();
        let mut rng = StdRng::seed_from_u64(42);
        let empty = Conversation::new();

        let voice_rate = |mood: Mood, rng: &mut StdRng| {
            (0..2000)
                .filter(|_| policy.decide(100, &empty, false, mood, rng) == Modality::Voice)
                .count() as f64
                / 2000.0
        };

        let excited = voice_rate(Mood::Excited, &mut rng);
        let sleepy = voice_rate(Mood::Sleepy, &mut rng);
        assert!((0.62..0.78).contains(&excited), "excited voice rate {}", excited);
        assert!((0.14..0.26).contains(&sleepy), "sleepy voice rate {}", sleepy);
    }
}
