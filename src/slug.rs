use rand::Rng;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Folds a title into a lowercase ASCII slug: diacritics dropped, every run of
/// non-word characters collapsed to one hyphen, no leading or trailing hyphen.
/// Word characters are `[a-z0-9_]`.
/// Returns an empty string when nothing usable remains.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for ch in title.nfd().filter(|ch| !is_combining_mark(*ch)) {
        let folded = fold_letter(ch);
        for ch in folded.chars().flat_map(char::to_lowercase) {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                if pending_hyphen && !slug.is_empty() {
                    slug.push('-');
                }
                pending_hyphen = false;
                slug.push(ch);
            } else {
                pending_hyphen = true;
            }
        }
    }

    slug
}

/// Builds a public sharing slug from a title plus a random suffix.
pub fn public_slug(title: &str, fallback: &str, suffix_len: usize) -> String {
    let base = match slugify(title) {
        base if base.is_empty() => slugify(fallback),
        base => base,
    };
    let base = if base.is_empty() { "note".to_string() } else { base };
    format!("{}-{}", base, random_suffix(suffix_len))
}

fn random_suffix(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

// Letters that do not decompose under NFD.
fn fold_letter(ch: char) -> String {
    match ch {
        'ß' => "ss".to_string(),
        'æ' | 'Æ' => "ae".to_string(),
        'œ' | 'Œ' => "oe".to_string(),
        'ø' | 'Ø' => "o".to_string(),
        'đ' | 'Đ' => "d".to_string(),
        'ł' | 'Ł' => "l".to_string(),
        'þ' | 'Þ' => "th".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{public_slug, slugify};

    #[test]
    fn folds_diacritics_and_collapses_separators() {
        assert_eq!(slugify("Crème Brûlée  --  Recipe!"), "creme-brulee-recipe");
        assert_eq!(slugify("Ação e Reação"), "acao-e-reacao");
        assert_eq!(slugify("Straße & Smørrebrød"), "strasse-smorrebrod");
    }

    #[test]
    fn trims_edge_hyphens() {
        assert_eq!(slugify("  ...Hello, World...  "), "hello-world");
    }

    #[test]
    fn underscores_are_kept() {
        assert_eq!(slugify("snake_case_title"), "snake_case_title");
        assert_eq!(slugify("__init__ notes"), "__init__-notes");
    }

    #[test]
    fn unusable_titles_become_empty() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("日本語"), "");
        assert_eq!(slugify("#!?"), "");
    }

    #[test]
    fn public_slug_appends_random_suffix() {
        let slug = public_slug("Groceries #food", "note", 6);
        let (base, suffix) = slug.rsplit_once('-').expect("suffix separator");
        assert_eq!(base, "groceries-food");
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit()));
    }

    #[test]
    fn empty_title_uses_fallback_base() {
        let slug = public_slug("   ", "note", 6);
        assert!(slug.starts_with("note-"));
        assert_eq!(slug.len(), "note-".len() + 6);
    }

    #[test]
    fn repeated_slugs_differ() {
        let first = public_slug("Same title", "note", 8);
        let second = public_slug("Same title", "note", 8);
        assert_ne!(first, second);
    }
}
