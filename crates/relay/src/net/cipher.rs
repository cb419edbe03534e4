use cfb8::cipher::generic_array::GenericArray;
use cfb8::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

pub const SHARED_SECRET_LEN: usize = 16;

type Aes128Cfb8Enc = cfb8::Encryptor<aes::Aes128>;
type Aes128Cfb8Dec = cfb8::Decryptor<aes::Aes128>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("shared secret must be {SHARED_SECRET_LEN} bytes, got {0}")]
pub struct InvalidSecret(pub usize);

/// AES-128/CFB8 stream cipher pair keyed by the handshake's shared secret,
/// which doubles as the IV. Each direction keeps its own running state.
pub struct StreamCipher {
    encryptor: Aes128Cfb8Enc,
    decryptor: Aes128Cfb8Dec,
}

impl StreamCipher {
    pub fn new(secret: &[u8]) -> Result<Self, InvalidSecret> {
        if secret.len() != SHARED_SECRET_LEN {
            return Err(InvalidSecret(secret.len()));
        }
        let encryptor =
            Aes128Cfb8Enc::new_from_slices(secret, secret).map_err(|_| InvalidSecret(secret.len()))?;
        let decryptor =
            Aes128Cfb8Dec::new_from_slices(secret, secret).map_err(|_| InvalidSecret(secret.len()))?;
        Ok(Self {
            encryptor,
            decryptor,
        })
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            let block = GenericArray::from_mut_slice(std::slice::from_mut(byte));
            self.encryptor.encrypt_block_mut(block);
        }
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            let block = GenericArray::from_mut_slice(std::slice::from_mut(byte));
            self.decryptor.decrypt_block_mut(block);
        }
    }
}
