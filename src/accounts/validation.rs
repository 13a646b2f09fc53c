use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use rand::{Rng, RngCore};
use regex::Regex;

use crate::error::{Error, Result};

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 64;
pub const PASSWORD_MIN: usize = 8;
pub const PASSWORD_MAX: usize = 64;
pub const EMAIL_MAX: usize = 254;
pub const API_KEY_LEN: usize = 32;
pub const PROFILE_NAME_MAX: usize = 64;

pub fn valid_email(email: &str) -> bool {
    email.len() <= EMAIL_MAX
        && Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").map_or(false, |re| re.is_match(email))
}

pub fn valid_username(username: &str) -> bool {
    (USERNAME_MIN..=USERNAME_MAX).contains(&username.chars().count())
        && Regex::new(r"^[A-Za-z0-9_.\-]+$").map_or(false, |re| re.is_match(username))
}

pub fn valid_password(password: &str) -> bool {
    (PASSWORD_MIN..=PASSWORD_MAX).contains(&password.chars().count())
}

pub fn valid_api_key(key: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9+/=]{32}$").map_or(false, |re| re.is_match(key))
}

/// Gateway resource ids accept `[A-Za-z0-9_.-]`.
pub fn valid_profile_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= PROFILE_NAME_MAX
        && Regex::new(r"^[A-Za-z0-9_.\-]+$").map_or(false, |re| re.is_match(name))
}

pub(crate) fn ensure(valid: bool, message: &str) -> Result<()> {
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(message.to_string()))
    }
}

/// First three and last three characters, never enough to rebuild the key.
#[must_use]
pub fn api_key_preview(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 6 {
        return "...".to_string();
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{head}...{tail}")
}

/// 24 random bytes, standard base64: 32 characters.
#[must_use]
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    Base64::encode_string(&bytes)
}

#[must_use]
pub fn generate_verification_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// 24 random bytes, URL-safe base64 without padding: 32 characters.
#[must_use]
pub fn generate_recovery_token() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// Random password for consumers whose users authenticate elsewhere.
#[must_use]
pub fn generate_password() -> String {
    generate_recovery_token()
}
