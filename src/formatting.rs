// src/formatting.rs

use crate::core::MAX_MESSAGE_LENGTH;

/// Expands `:shortcode:` emoji markup into the emoji itself.
///
/// Unknown shortcodes and stray colons are left untouched, so timestamps like
/// `10:30:00` survive.
pub fn expand_emoji(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(':') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        match after.find(':') {
            Some(end) => {
                let candidate = &after[..end];
                match lookup_shortcode(candidate) {
                    Some(emoji) => {
                        out.push_str(emoji);
                        rest = &after[end + 1..];
                    }
                    None => {
                        // The closing colon may open the next shortcode.
                        out.push(':');
                        rest = after;
                    }
                }
            }
            None => {
                out.push(':');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn lookup_shortcode(candidate: &str) -> Option<&'static str> {
    if candidate.is_empty()
        || !candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-'))
    {
        return None;
    }
    emojis::get_by_shortcode(candidate).map(|e| e.as_str())
}

/// Cuts messages longer than `MAX_MESSAGE_LENGTH` characters down to
/// `MAX_MESSAGE_LENGTH - 1` characters. Returns whether anything was cut.
pub fn truncate_message(message: &mut String) -> bool {
    if message.chars().count() <= MAX_MESSAGE_LENGTH {
        return false;
    }
    let cut = message
        .char_indices()
        .nth(MAX_MESSAGE_LENGTH - 1)
        .map(|(idx, _)| idx)
        .unwrap_or(message.len());
    message.truncate(cut);
    true
}
