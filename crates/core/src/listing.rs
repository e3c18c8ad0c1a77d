//! Property listings and the naive similarity search used to pick the
//! candidates handed to the advisor.
//!
//! Texts are embedded with the hashing trick (bag of lowercase tokens folded
//! into a fixed-size vector) and compared by cosine similarity over a linear
//! scan of the catalog.

use serde::{Deserialize, Serialize};

/// Dimension of the hashed bag-of-words vectors.
pub const EMBEDDING_DIM: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub neighborhood: String,
    pub city: String,
    /// Asking price in whole reais.
    pub price: u64,
    pub bedrooms: u32,
    pub area_m2: f32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Listing {
    /// Text the listing is embedded from.
    pub fn search_text(&self) -> String {
        format!(
            "{} {} {} {} quartos {}",
            self.title, self.neighborhood, self.city, self.bedrooms, self.description
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScoredListing<'a> {
    pub listing: &'a Listing,
    pub score: f32,
}

/// Lowercased alphanumeric tokens of `text`.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Hashed bag-of-words embedding, L2-normalised. Empty text maps to zeros.
pub fn embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    for token in tokenize(text) {
        let slot = (fnv1a(token.as_bytes()) % EMBEDDING_DIM as u64) as usize;
        v[slot] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// cosine(a, b) = dot(a, b) / (|a| * |b|)
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0;
    let mut a_norm = 0.0;
    let mut b_norm = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    dot / (a_norm.sqrt() * b_norm.sqrt()).max(f32::EPSILON)
}

/// Top `limit` listings by similarity to `query`, skipping `excluded` ids.
///
/// Ties keep catalog order, so a query with no overlap returns the head of
/// the catalog.
pub fn rank<'a>(
    query: &str,
    listings: &'a [Listing],
    excluded: &[String],
    limit: usize,
) -> Vec<ScoredListing<'a>> {
    let q = embed(query);
    let mut scored: Vec<ScoredListing<'a>> = listings
        .iter()
        .filter(|l| !excluded.iter().any(|id| id == &l.id))
        .map(|listing| ScoredListing {
            listing,
            score: cosine(&q, &embed(&listing.search_text())),
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(limit);
    scored
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
pub(crate) fn sample_listing(id: &str, title: &str, neighborhood: &str) -> Listing {
    Listing {
        id: id.to_string(),
        title: title.to_string(),
        neighborhood: neighborhood.to_string(),
        city: "São Paulo".to_string(),
        price: 850_000,
        bedrooms: 3,
        area_m2: 92.0,
        description: String::new(),
        image_url: None,
    }
}
