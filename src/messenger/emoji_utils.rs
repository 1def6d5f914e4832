use crate::messenger::error::MessengerError;

/// Validates reaction content and returns the emoji to store.
///
/// `+` and `-` map to 👍 and 👎. With `normalize_emoji` skin tones and variation
/// selectors are stripped so that "👍🏽" and "👍" count as the same reaction.
pub fn validate_and_normalize_reaction(
    content: &str,
    normalize_emoji: bool,
) -> Result<String, MessengerError> {
    match content {
        "+" => Ok("👍".to_string()),
        "-" => Ok("👎".to_string()),
        emoji if is_valid_emoji(emoji) => {
            if normalize_emoji {
                Ok(normalize_emoji_string(emoji))
            } else {
                Ok(emoji.to_string())
            }
        }
        _ => {
            tracing::warn!(target: "messenger::emoji_utils", "Invalid reaction content: {:?}", content);
            Err(MessengerError::InvalidReaction)
        }
    }
}

/// Checks if a string is a single emoji or emoji sequence.
pub fn is_valid_emoji(s: &str) -> bool {
    if s.is_empty() || s.len() > 50 {
        return false;
    }
    if is_keycap(s) {
        return true;
    }

    // Letters, digits and spaces are never emoji chars, so text with an emoji
    // sprinkled in is rejected here too
    s.chars().any(is_emoji_char) && s.chars().all(|ch| is_emoji_char(ch) || is_emoji_modifier(ch))
}

/// `0`-`9`, `#` or `*`, an optional variation selector, then the enclosing keycap.
fn is_keycap(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(base) = chars.next() else {
        return false;
    };
    matches!(base, '0'..='9' | '#' | '*') && matches!(chars.as_str(), "\u{20E3}" | "\u{FE0F}\u{20E3}")
}

/// Checks if a character is in emoji unicode ranges
fn is_emoji_char(ch: char) -> bool {
    let code = ch as u32;

    matches!(code,
        0x00A9 | 0x00AE |   // Copyright, registered
        0x203C | 0x2049 |   // Double exclamation, exclamation question
        0x2122 | 0x2139 |   // Trade mark, information
        0x2190..=0x21FF |   // Arrows
        0x2300..=0x23FF |   // Misc technical (watch, hourglass, play controls)
        0x24C2 |            // Circled M
        0x25A0..=0x25FF |   // Geometric shapes
        0x2600..=0x26FF |   // Misc symbols
        0x2700..=0x27BF |   // Dingbats
        0x2900..=0x297F |   // Supplemental arrows
        0x2B00..=0x2BFF |   // Misc symbols and arrows
        0x3030 | 0x303D |   // Wavy dash, part alternation mark
        0x3297 | 0x3299 |   // Circled ideographs
        0x1F000..=0x1F0FF | // Mahjong, dominoes, playing cards
        0x1F100..=0x1F1FF | // Enclosed alphanumerics, regional indicators
        0x1F200..=0x1F2FF | // Enclosed ideographic supplement
        0x1F300..=0x1F5FF | // Misc Symbols and Pictographs
        0x1F600..=0x1F64F | // Emoticons
        0x1F680..=0x1F6FF | // Transport and Map
        0x1F780..=0x1F7FF | // Geometric shapes extended (colored circles and squares)
        0x1F900..=0x1F9FF | // Supplemental Symbols and Pictographs
        0x1FA00..=0x1FAFF   // Chess symbols, Symbols and Pictographs Extended-A
    )
}

/// Joiners, selectors, skin tones and tags that only appear inside a sequence.
fn is_emoji_modifier(ch: char) -> bool {
    matches!(ch as u32,
        0xFE00..=0xFE0F |   // Variation selectors
        0x1F3FB..=0x1F3FF | // Skin tones
        0x200D |            // Zero width joiner
        0x20E3 |            // Combining enclosing keycap
        0xE0020..=0xE007F   // Tags (subdivision flags)
    )
}

/// Removes skin tone modifiers and variation selectors.
pub fn normalize_emoji_string(emoji: &str) -> String {
    emoji
        .chars()
        .filter(|c| !matches!(*c as u32, 0x1F3FB..=0x1F3FF | 0xFE0F))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_plus_minus() {
        assert_eq!(validate_and_normalize_reaction("+", false).unwrap(), "👍");
        assert_eq!(validate_and_normalize_reaction("-", true).unwrap(), "👎");
    }

    #[test]
    fn test_valid_emoji() {
        assert!(is_valid_emoji("👍"));
        assert!(is_valid_emoji("😀"));
        assert!(is_valid_emoji("❤️"));
        assert!(is_valid_emoji("🤔"));
        assert!(is_valid_emoji("👍🏽"));
        assert!(is_valid_emoji("👩‍💻"));
        assert!(!is_valid_emoji(""));
        assert!(!is_valid_emoji("not an emoji"));
        assert!(!is_valid_emoji("ok👍"));
        assert!(!is_valid_emoji("\u{FE0F}"));
    }

    #[test]
    fn test_symbol_and_keycap_emoji() {
        for emoji in ["🟢", "🟥", "⬆️", "↩️", "1️⃣", "#️⃣", "*⃣", "©️", "®", "⌛", "⏰", "🅰️", "🆗", "🈁", "🀄", "▶️", "🏴󠁧󠁢󠁳󠁣󠁴󠁿", "🪩"] {
            assert!(is_valid_emoji(emoji), "{emoji:?} should be accepted");
            assert_eq!(validate_and_normalize_reaction(emoji, false).unwrap(), emoji);
        }

        assert!(!is_valid_emoji("1"));
        assert!(!is_valid_emoji("12⃣"));
        assert!(!is_valid_emoji("a⃣"));
        assert!(!is_valid_emoji("\u{20E3}"));
        assert!(!is_valid_emoji("⬆️ up"));
    }

    #[test]
    fn test_heart_kept_verbatim_without_normalization() {
        assert_eq!(validate_and_normalize_reaction("❤️", false).unwrap(), "❤️");
        assert_eq!(validate_and_normalize_reaction("❤️", true).unwrap(), "❤");
    }

    #[test]
    fn test_normalize_emoji() {
        assert_eq!(normalize_emoji_string("👋🏽"), "👋");
        assert_eq!(normalize_emoji_string("👍🏿"), "👍");
        assert_eq!(normalize_emoji_string("😀"), "😀");
    }

    #[test]
    fn test_invalid_reactions() {
        assert!(matches!(
            validate_and_normalize_reaction("invalid", true),
            Err(MessengerError::InvalidReaction)
        ));
        assert!(validate_and_normalize_reaction("", false).is_err());
        assert!(validate_and_normalize_reaction("👍👍👍👍👍👍👍👍👍👍👍👍👍", false).is_err());
    }
}
