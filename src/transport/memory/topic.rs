//! Сопоставление routing key с binding key topic-exchange.
//!
//! Ключи разбиваются на слова по `.`:
//! - `*` совпадает ровно с одним словом;
//! - `#` совпадает с любым числом слов, включая ноль.

/// Проверяет, совпадает ли `routing_key` с шаблоном `binding_key`.
pub fn topic_matches(
    binding_key: &str,
    routing_key: &str,
) -> bool {
    let pattern: Vec<&str> = binding_key.split('.').collect();
    let words: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &words)
}

fn match_words(
    pattern: &[&str],
    words: &[&str],
) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => {
            // подряд идущие `#` эквивалентны одному
            if rest.first() == Some(&"#") {
                return match_words(rest, words);
            }
            (0..=words.len()).any(|skip| match_words(rest, &words[skip..]))
        }
        Some((&"*", rest)) => !words.is_empty() && match_words(rest, &words[1..]),
        Some((literal, rest)) => {
            words.first() == Some(literal) && match_words(rest, &words[1..])
        }
    }
}
