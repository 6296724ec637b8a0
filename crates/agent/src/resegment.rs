//! Chunk resegmentation.
//!
//! The backend emits text in uneven bursts. Each burst is cut into sentence
//! pieces, or into fixed-size word groups when sentence cutting does not
//! produce several short pieces. Bursts are handled independently; nothing is
//! carried over from one burst to the next.

use regex_lite::Regex;
use std::sync::LazyLock;

/// Terminal punctuation followed by whitespace or end of text. `\s` is ASCII
/// only here, so the Unicode space separators are listed explicitly.
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[.!?]+(?:[\s\x{1C}-\x{1F}\x{85}\x{A0}\x{1680}\x{2000}-\x{200A}\x{2028}\x{2029}\x{202F}\x{205F}\x{3000}]+|$)",
    )
    .expect("sentence pattern compiles")
});

/// Splits raw text payloads into delivery-sized pieces.
#[derive(Debug, Clone, Copy)]
pub struct Resegmenter {
    max_sentence_chars: usize,
    words_per_piece: usize,
}

impl Default for Resegmenter {
    fn default() -> Self {
        Self::new(100, 8)
    }
}

impl Resegmenter {
    pub fn new(max_sentence_chars: usize, words_per_piece: usize) -> Self {
        Self {
            max_sentence_chars,
            words_per_piece: words_per_piece.max(1),
        }
    }

    pub fn from_config(config: &kbrelay_config::OrchestratorConfig) -> Self {
        Self::new(config.max_sentence_chars, config.words_per_piece)
    }

    /// Cut one payload into pieces, in order. Blank payloads give no pieces.
    pub fn segment(&self, payload: &str) -> Vec<String> {
        if payload.trim().is_empty() {
            return Vec::new();
        }

        let sentences = self.sentences(payload);
        let needs_fallback = sentences.len() <= 1
            || sentences
                .iter()
                .any(|s| s.chars().count() > self.max_sentence_chars);

        let pieces = if needs_fallback {
            self.word_groups(payload)
        } else {
            sentences
        };

        pieces
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect()
    }

    /// Sentence pieces with their punctuation and trailing whitespace.
    fn sentences(&self, payload: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut start = 0;

        for m in SENTENCE_END.find_iter(payload) {
            pieces.push(&payload[start..m.end()]);
            start = m.end();
        }
        if start < payload.len() {
            pieces.push(&payload[start..]);
        }

        pieces
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Groups of `words_per_piece` words. Every group but the last keeps a
    /// trailing space.
    fn word_groups(&self, payload: &str) -> Vec<String> {
        let words: Vec<&str> = payload
            .split(' ')
            .filter(|w| !w.trim().is_empty())
            .collect();

        if words.is_empty() {
            return vec![payload.to_string()];
        }

        let groups = words.chunks(self.words_per_piece);
        let last = groups.len() - 1;
        groups
            .enumerate()
            .map(|(i, group)| {
                let mut piece = group.join(" ");
                if i < last {
                    piece.push(' ');
                }
                piece
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(payload: &str) -> Vec<String> {
        Resegmenter::default().segment(payload)
    }

    #[test]
    fn three_sentences() {
        assert_eq!(
            seg("Hello there. How are you today? I am fine."),
            vec!["Hello there. ", "How are you today? ", "I am fine."]
        );
    }

    #[test]
    fn twenty_words_no_punctuation() {
        let words: Vec<String> = (1..=20).map(|i| format!("w{i}")).collect();
        let pieces = seg(&words.join(" "));

        let sizes: Vec<usize> = pieces
            .iter()
            .map(|p| p.split_whitespace().count())
            .collect();
        assert_eq!(sizes, vec![8, 8, 4]);
        assert!(pieces[0].ends_with(' '));
        assert!(pieces[1].ends_with(' '));
        assert!(!pieces[2].ends_with(' '));
        assert_eq!(pieces.concat(), words.join(" "));
    }

    #[test]
    fn single_sentence_falls_back_to_words() {
        let pieces = seg("Just one short sentence here.");
        assert_eq!(pieces, vec!["Just one short sentence here."]);
    }

    #[test]
    fn long_sentence_triggers_fallback() {
        let long = "word ".repeat(30);
        let payload = format!("Short one. {}end.", long);
        let pieces = seg(&payload);
        assert!(pieces.len() > 2);
        assert!(pieces.iter().all(|p| p.split_whitespace().count() <= 8));
    }

    #[test]
    fn punctuation_stays_with_its_sentence() {
        let pieces = seg("Wait!! Really?! Yes.");
        assert_eq!(pieces, vec!["Wait!! ", "Really?! ", "Yes."]);
    }

    #[test]
    fn sentence_pieces_preserve_content() {
        let payload = "First line.\nSecond line!  Third?";
        assert_eq!(seg(payload).concat(), payload);
    }

    #[test]
    fn decimal_point_is_not_a_sentence_end() {
        let pieces = seg("Costs rose 2.5 percent. Then fell.");
        assert_eq!(pieces, vec!["Costs rose 2.5 percent. ", "Then fell."]);
    }

    #[test]
    fn blank_payloads_produce_nothing() {
        assert!(seg("").is_empty());
        assert!(seg("   \n ").is_empty());
    }

    #[test]
    fn length_limit_counts_characters() {
        // 60 two-byte characters: 120 bytes but under the 100-char limit
        let a = "é".repeat(60);
        let payload = format!("{a}. Next.");
        assert_eq!(seg(&payload).len(), 2);
    }

    #[test]
    fn unicode_space_ends_a_sentence() {
        assert_eq!(
            seg("Hi.\u{2003}There. Bye."),
            vec!["Hi.\u{2003}", "There. ", "Bye."]
        );
        assert_eq!(seg("Ok.\u{00A0}Go."), vec!["Ok.\u{00A0}", "Go."]);
    }

    #[test]
    fn sentence_of_exactly_max_chars_is_kept() {
        // 98 letters plus ". " is 100 characters
        let at_limit = format!("{}. ", "x".repeat(98));
        assert_eq!(at_limit.chars().count(), 100);
        assert_eq!(seg(&format!("{at_limit}Next.")), vec![at_limit, "Next.".to_string()]);

        let over_limit = format!("{}. ", "x".repeat(99));
        let payload = format!("{over_limit}Next.");
        assert_eq!(seg(&payload), vec![payload.clone()]);
    }

    #[test]
    fn lone_piece_loses_padding_in_word_fallback() {
        assert_eq!(seg(" ! "), vec!["!"]);
    }
}
