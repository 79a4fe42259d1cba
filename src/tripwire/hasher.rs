//! CE-014: BLAKE3 hashing for entity definitions and identities.

use serde::Serialize;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash the canonical JSON form of a value. Struct fields serialize in
/// declaration order, so equal values always hash the same.
pub fn hash_json<T: Serialize>(value: &T) -> Result<String, String> {
    let bytes = serde_json::to_vec(value).map_err(|e| format!("JSON serialize error: {}", e))?;
    Ok(format!("blake3:{}", blake3::hash(&bytes).to_hex()))
}

/// Short hex digest, used as the suffix of provider resource ids.
pub fn short_digest(s: &str) -> String {
    let hex = blake3::hash(s.as_bytes()).to_hex();
    hex[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ce014_hash_string() {
        let h1 = hash_string("hello");
        let h2 = hash_string("hello");
        let h3 = hash_string("world");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert!(h1.starts_with("blake3:"));
        assert_eq!(h1.len(), 7 + 64); // "blake3:" + 64 hex chars
    }

    #[test]
    fn test_ce014_hash_json_deterministic() {
        #[derive(Serialize)]
        struct Def {
            name: &'static str,
            size: u32,
        }
        let a = hash_json(&Def { name: "a", size: 1 }).unwrap();
        let b = hash_json(&Def { name: "a", size: 1 }).unwrap();
        let c = hash_json(&Def { name: "a", size: 2 }).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_ce014_short_digest() {
        let d = short_digest("subnet/public-1a");
        assert_eq!(d.len(), 12);
        assert_eq!(d, short_digest("subnet/public-1a"));
        assert_ne!(d, short_digest("subnet/public-1b"));
    }
}
