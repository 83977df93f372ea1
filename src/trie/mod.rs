use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub mod store;

pub use store::TrieStore;

/// Completions returned per prefix lookup.
const MAX_COMPLETIONS: usize = 10;

/// One trie node. Edges are whole lowercase tokens, not characters, so a
/// path through the tree spells a product title word by word.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrieNode {
    pub word: String,
    pub is_end: bool,
    pub children: HashMap<String, TrieNode>,
}

impl TrieNode {
    fn new(word: &str) -> Self {
        TrieNode {
            word: word.to_string(),
            ..Default::default()
        }
    }
}

/// Autocomplete trie over whitespace-tokenized titles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trie {
    pub root: TrieNode,
}

fn tokens_of(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

impl Trie {
    pub fn new() -> Self {
        Trie::default()
    }

    pub fn insert(&mut self, title: &str) {
        let words = tokens_of(title);
        if words.is_empty() {
            return;
        }
        let mut node = &mut self.root;
        for word in &words {
            node = node
                .children
                .entry(word.clone())
                .or_insert_with(|| TrieNode::new(word));
        }
        node.is_end = true;
    }

    /// Exact membership of a full title.
    pub fn contains(&self, title: &str) -> bool {
        let mut node = &self.root;
        for word in tokens_of(title) {
            match node.children.get(&word) {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.is_end
    }

    /// Up to ten stored titles extending `prefix`. All but the last token
    /// must match an edge exactly; the last token matches any edge it is
    /// a prefix of, so a half-typed word still completes. An empty prefix
    /// samples the whole tree.
    pub fn find_all_by_prefix(&self, prefix: &str) -> Vec<String> {
        let words = tokens_of(prefix);
        let mut completions = Vec::new();

        if words.is_empty() {
            Self::dfs(&self.root, &mut Vec::new(), &mut completions);
            return completions;
        }

        let mut node = &self.root;
        for word in &words[..words.len() - 1] {
            match node.children.get(word) {
                Some(child) => node = child,
                None => return completions,
            }
        }

        let last = &words[words.len() - 1];
        let mut path: Vec<String> = words[..words.len() - 1].to_vec();
        let mut edges: Vec<&String> = node
            .children
            .keys()
            .filter(|edge| edge.starts_with(last))
            .collect();
        edges.sort();
        for edge in edges {
            path.push(edge.clone());
            Self::dfs(&node.children[edge], &mut path, &mut completions);
            path.pop();
            if completions.len() >= MAX_COMPLETIONS {
                break;
            }
        }
        completions
    }

    fn dfs(node: &TrieNode, path: &mut Vec<String>, out: &mut Vec<String>) {
        if out.len() >= MAX_COMPLETIONS {
            return;
        }
        if node.is_end {
            let title = path.join(" ");
            if !out.contains(&title) {
                out.push(title);
            }
        }
        let mut edges: Vec<&String> = node.children.keys().collect();
        edges.sort();
        for edge in edges {
            path.push(edge.clone());
            Self::dfs(&node.children[edge], path, out);
            path.pop();
            if out.len() >= MAX_COMPLETIONS {
                return;
            }
        }
    }

    /// Merge another trie into this one, union of titles.
    pub fn merge(&mut self, other: Trie) {
        fn merge_nodes(into: &mut TrieNode, from: TrieNode) {
            into.is_end |= from.is_end;
            for (word, child) in from.children {
                match into.children.get_mut(&word) {
                    Some(existing) => merge_nodes(existing, child),
                    None => {
                        into.children.insert(word, child);
                    }
                }
            }
        }
        merge_nodes(&mut self.root, other.root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Trie {
        let mut trie = Trie::new();
        trie.insert("lloyd inverter ac");
        trie.insert("lg inverter ac");
        trie.insert("lg dual inverter");
        trie
    }

    #[test]
    fn insert_lowercases_and_contains_checks_ends() {
        let trie = sample();
        assert!(trie.contains("LG Inverter AC"));
        assert!(trie.contains("lg dual inverter"));
        assert!(!trie.contains("lg dual"));
        assert!(!trie.contains("samsung tv"));
    }

    #[test]
    fn prefix_lookup_matches_last_token_as_prefix() {
        let trie = sample();
        let mut hits = trie.find_all_by_prefix("lg");
        hits.sort();
        assert_eq!(
            hits,
            vec!["lg dual inverter".to_string(), "lg inverter ac".to_string()]
        );
    }

    #[test]
    fn multi_token_prefix_walks_exact_edges_first() {
        let trie = sample();
        assert_eq!(
            trie.find_all_by_prefix("lg inv"),
            vec!["lg inverter ac".to_string()]
        );
        assert!(trie.find_all_by_prefix("lg xyz").is_empty());
        assert!(trie.find_all_by_prefix("sony tv").is_empty());
    }

    #[test]
    fn completions_are_capped_at_ten() {
        let mut trie = Trie::new();
        for i in 0..25 {
            trie.insert(&format!("phone model{i:02}"));
        }
        assert_eq!(trie.find_all_by_prefix("phone").len(), 10);
    }

    #[test]
    fn empty_prefix_samples_the_tree() {
        let trie = sample();
        assert_eq!(trie.find_all_by_prefix("  ").len(), 3);
    }

    #[test]
    fn merge_unions_titles() {
        let mut a = sample();
        let mut b = Trie::new();
        b.insert("lg oled tv");
        b.insert("lg inverter ac");
        a.merge(b);
        let mut hits = a.find_all_by_prefix("lg");
        hits.sort();
        assert_eq!(hits.len(), 3);
    }
}
