use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Envelope-encrypted key material as persisted in the `sealed_key` column.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    encrypted_dek: String,
    dek_nonce: String,
    encrypted_secret: String,
    secret_nonce: String,
}

/// AES-256-GCM envelope encryption for provider API keys.
///
/// Each key gets its own random data-encryption key (DEK); the DEK is
/// encrypted with the master key-encryption key (KEK) from config.
pub struct VaultCrypto {
    kek: Zeroizing<[u8; 32]>,
}

impl VaultCrypto {
    pub fn new(master_key_hex: &str) -> anyhow::Result<Self> {
        let kek = parse_master_key(master_key_hex)?;
        Ok(Self {
            kek: Zeroizing::new(kek),
        })
    }

    /// Encrypts a plaintext key and returns the serialized envelope.
    pub fn seal(&self, plaintext: &str) -> anyhow::Result<String> {
        // 1. Generate a random DEK
        let mut dek = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut dek[..]);

        // 2. Encrypt the secret with the DEK
        let secret_cipher = Aes256Gcm::new_from_slice(&dek[..])
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let secret_nonce_bytes = generate_nonce();
        let encrypted_secret = secret_cipher
            .encrypt(Nonce::from_slice(&secret_nonce_bytes), plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("secret encryption failed: {}", e))?;

        // 3. Encrypt the DEK with the master KEK
        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek[..])
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let dek_nonce_bytes = generate_nonce();
        let encrypted_dek = kek_cipher
            .encrypt(Nonce::from_slice(&dek_nonce_bytes), &dek[..])
            .map_err(|e| anyhow::anyhow!("DEK encryption failed: {}", e))?;

        let envelope = Envelope {
            encrypted_dek: STANDARD.encode(&encrypted_dek),
            dek_nonce: STANDARD.encode(dek_nonce_bytes),
            encrypted_secret: STANDARD.encode(&encrypted_secret),
            secret_nonce: STANDARD.encode(secret_nonce_bytes),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Decrypts an envelope produced by [`VaultCrypto::seal`].
    pub fn open(&self, sealed: &str) -> anyhow::Result<Zeroizing<String>> {
        let envelope: Envelope = serde_json::from_str(sealed)?;
        let encrypted_dek = STANDARD.decode(&envelope.encrypted_dek)?;
        let dek_nonce = STANDARD.decode(&envelope.dek_nonce)?;
        let encrypted_secret = STANDARD.decode(&envelope.encrypted_secret)?;
        let secret_nonce = STANDARD.decode(&envelope.secret_nonce)?;
        if dek_nonce.len() != 12 || secret_nonce.len() != 12 {
            anyhow::bail!("malformed key envelope: bad nonce length");
        }

        // 1. Decrypt DEK with master KEK
        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek[..])
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let dek_bytes = Zeroizing::new(
            kek_cipher
                .decrypt(Nonce::from_slice(&dek_nonce), encrypted_dek.as_slice())
                .map_err(|e| anyhow::anyhow!("DEK decryption failed: {}", e))?,
        );

        // 2. Decrypt secret with DEK
        let secret_cipher = Aes256Gcm::new_from_slice(&dek_bytes[..])
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let plaintext_bytes = secret_cipher
            .decrypt(Nonce::from_slice(&secret_nonce), encrypted_secret.as_slice())
            .map_err(|e| anyhow::anyhow!("secret decryption failed: {}", e))?;

        Ok(Zeroizing::new(String::from_utf8(plaintext_bytes)?))
    }
}

fn generate_nonce() -> [u8; 12] {
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn parse_master_key(hex: &str) -> anyhow::Result<[u8; 32]> {
    if hex.len() != 64 {
        anyhow::bail!(
            "SWITCHBOARD_MASTER_KEY must be 64 hex chars (32 bytes), got {} chars",
            hex.len()
        );
    }
    let bytes = hex::decode(hex)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_sealed_key_hides_plaintext() {
        let crypto = VaultCrypto::new(MASTER_KEY).unwrap();
        let sealed = crypto.seal("sk-live-123456789").unwrap();
        assert!(!sealed.contains("sk-live-123456789"));
        assert_eq!(crypto.open(&sealed).unwrap().as_str(), "sk-live-123456789");
    }

    #[test]
    fn test_open_with_wrong_master_key_fails() {
        let sealed = VaultCrypto::new(MASTER_KEY).unwrap().seal("sk-abc12345").unwrap();
        let other = VaultCrypto::new(&"ff".repeat(32)).unwrap();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn test_master_key_length_checked() {
        assert!(VaultCrypto::new("abcd").is_err());
    }
}
