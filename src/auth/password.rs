use super::AuthError;

/// bcrypt is CPU bound, so hashing and verification run on the blocking pool.
pub async fn hash_password(password: String, cost: u32) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AuthError::Hash(e.to_string()))?
        .map_err(|e| AuthError::Hash(e.to_string()))
}

pub async fn verify_password(password: String, hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AuthError::Hash(e.to_string()))?
        .map_err(|e| AuthError::Hash(e.to_string()))
}

/// Hash of a throwaway password at `cost`. Logins for unknown emails verify
/// against it so they take as long as a real check.
pub fn dummy_hash(cost: u32) -> Option<String> {
    bcrypt::hash("quire-dummy-password", cost).ok()
}

/// Burn the same bcrypt work a real verification costs.
pub async fn verify_dummy(password: String, dummy_hash: Option<&str>) {
    if let Some(hash) = dummy_hash {
        let _ = verify_password(password, hash.to_string()).await;
    }
}
