use crate::{catalog::EmoteCatalog, emote::Emote};

const STRIPPED: &[char] = &['.', ',', '!', '?', ';', ':', '(', ')', '[', ']', '{', '}', '\'', '"'];

fn clean_token(token: &str) -> String {
    token.chars().filter(|c| !STRIPPED.contains(c)).collect()
}

/// Emotes in `message`, one per matching token, in the order they appear.
pub fn match_emotes(catalog: &EmoteCatalog, message: &str) -> Vec<Emote> {
    message
        .split_whitespace()
        .map(clean_token)
        .filter(|token| !token.is_empty())
        .filter_map(|token| resolve(catalog, &token))
        .collect()
}

fn resolve(catalog: &EmoteCatalog, token: &str) -> Option<Emote> {
    if let Some(emote) = catalog.lookup_exact(token) {
        return Some(emote);
    }

    let mut candidates = catalog.lookup_fold(token);
    match candidates.len() {
        0 => None,
        1 => candidates.pop(),
        _ => {
            let exact = candidates.iter().position(|e| e.name == token).unwrap_or(0);
            Some(candidates.swap_remove(exact))
        }
    }
}
