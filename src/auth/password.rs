use crate::error::AppResult;

// Register and login sit on the request path; cost 12 is noticeably slow.
const BCRYPT_COST: u32 = 10;

pub fn hash_password(password: &str) -> AppResult<String> {
    Ok(bcrypt::hash(password, BCRYPT_COST)?)
}

pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    Ok(bcrypt::verify(password, hash)?)
}
