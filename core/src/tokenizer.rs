/// Tokenize text into lowercase whitespace-delimited words.
///
/// This is the only tokenizer in the crate: the index is built with it and
/// queries are scored with it, so both sides always agree on what a term is.
/// Punctuation is kept as part of the word (`"dog."` stays `"dog."`).
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}
