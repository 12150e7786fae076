//! Okapi BM25 scoring over an in-memory corpus

use std::collections::HashMap;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Lowercased alphanumeric tokens
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Score every document against the query; documents without a matching
/// term are omitted. Returns `(doc_index, score)` pairs in input order.
pub fn score_documents(query: &str, documents: &[&str]) -> Vec<(usize, f32)> {
    let query_terms = {
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();
        terms
    };
    if query_terms.is_empty() || documents.is_empty() {
        return Vec::new();
    }

    let docs: Vec<Vec<String>> = documents.iter().map(|d| tokenize(d)).collect();
    let n = docs.len() as f32;
    let avgdl = docs.iter().map(|d| d.len() as f32).sum::<f32>() / n;

    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for doc in &docs {
        let mut seen: Vec<&str> = doc.iter().map(String::as_str).collect();
        seen.sort_unstable();
        seen.dedup();
        for term in seen {
            *doc_freq.entry(term).or_insert(0) += 1;
        }
    }

    docs.iter()
        .enumerate()
        .filter_map(|(i, doc)| {
            let dl = doc.len() as f32;
            let mut score = 0.0;
            for term in &query_terms {
                let tf = doc.iter().filter(|t| *t == term).count() as f32;
                if tf == 0.0 {
                    continue;
                }
                let df = *doc_freq.get(term.as_str()).unwrap_or(&0) as f32;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                let norm = if avgdl > 0.0 { dl / avgdl } else { 1.0 };
                score += idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * norm));
            }
            (score > 0.0).then_some((i, score))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Hello, World! 42"), vec!["hello", "world", "42"]);
    }

    #[test]
    fn test_rare_terms_score_higher() {
        let docs = [
            "rust ownership and borrowing",
            "rust async runtime",
            "rust macros",
            "sourdough starter feeding",
        ];
        let scores = score_documents("rust sourdough", &docs);
        let sourdough = scores.iter().find(|(i, _)| *i == 3).unwrap().1;
        let rust = scores.iter().find(|(i, _)| *i == 2).unwrap().1;
        assert!(sourdough > rust);
    }

    #[test]
    fn test_non_matching_documents_omitted() {
        let scores = score_documents("quantum", &["rust", "bread"]);
        assert!(scores.is_empty());
    }
}
