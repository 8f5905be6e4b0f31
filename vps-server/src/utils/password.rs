//! Host password generation
//!
//! The executor gets its randomness through [`SecretSource`] so tests can
//! pin passwords; production uses the OS CSPRNG.

use rand::Rng;
use rand::rngs::OsRng;

/// Alphabet without the ambiguous glyphs `I`, `O`, `l`, `0`, `1`
pub const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789!@#$%";

pub const SYS_PASSWORD_LEN: usize = 12;
pub const VNC_PASSWORD_LEN: usize = 8;

pub trait SecretSource: Send + Sync {
    fn password(&self, len: usize) -> String;
}

/// [`SecretSource`] backed by [`OsRng`]
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSecretSource;

impl SecretSource for OsSecretSource {
    fn password(&self, len: usize) -> String {
        let mut rng = OsRng;
        (0..len)
            .map(|_| PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())] as char)
            .collect()
    }
}
