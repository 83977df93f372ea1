use serde::{Deserialize, Serialize};

/// A single indexable term, qualified by the document field it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Keyword {
    pub field: String,
    pub word: String,
}

impl Keyword {
    pub fn new(field: &str, word: &str) -> Self {
        Keyword {
            field: field.to_string(),
            word: word.to_string(),
        }
    }

    /// Flat table key. The separator cannot occur in tokenized words.
    pub fn to_key(&self) -> String {
        format!("{}\u{1}{}", self.field, self.word)
    }
}

/// The unit stored in a shard. `payload` is an opaque encoded product
/// record; the index layers never look inside it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    /// Globally unique id, typically a random 128-bit value rendered as hex.
    pub id: String,
    /// Shard-local insertion ordinal, assigned by the indexer. Never reused.
    pub ordinal: u64,
    /// Category summary for cheap bitmask filtering.
    pub bits_feature: u64,
    pub keywords: Vec<Keyword>,
    pub payload: Vec<u8>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Document {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_keyword(mut self, field: &str, word: &str) -> Self {
        self.keywords.push(Keyword::new(field, word));
        self
    }

    pub fn with_bits(mut self, bits: u64) -> Self {
        self.bits_feature = bits;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

/// Typed product record, the payload carried through the forward index.
/// Produced by ingestion, decoded again by the search facade.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub category: String,
    pub image: String,
    pub ratings: f64,
    pub no_ratings: u32,
    pub discount_price: f64,
    pub actual_price: f64,
}
