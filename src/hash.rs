use sha2::{Digest, Sha256};

pub fn hash_content(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// File stem used for a stored photo: the first 16 hex digits of its hash.
pub fn photo_stem(data: &[u8]) -> String {
    let mut hash = hash_content(data);
    hash.truncate(16);
    hash
}
