//! Wire framing for sealed messages.
//!
//! Authenticated layouts (AEAD and encrypt-then-MAC):
//!
//! ```text
//! [nonce: 12 | 16] [ad_len: u32 BE] [associated data] [ciphertext] [tag: 16]
//! ```
//!
//! Unauthenticated layouts (ChaCha20, AES-CBC) carry no AD and no tag:
//!
//! ```text
//! [nonce: 12 | 16] [ciphertext]
//! ```
//!
//! Framing is structural only. A frame that decodes cleanly still has to be
//! opened by the matching cipher before any of it is trusted.

use bytes::{Buf, BufMut};

use crate::error::{CryptoError, Result};
use crate::transport::{Sealed, TAG_SIZE};

const AD_LEN_SIZE: usize = 4;

/// How to split an encoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameLayout {
    pub nonce_len: usize,
    pub authenticated: bool,
}

impl FrameLayout {
    /// AES-GCM / ChaCha20-Poly1305.
    pub const AEAD: Self = Self {
        nonce_len: 12,
        authenticated: true,
    };
    /// AES-CBC + HMAC with a 16-byte IV.
    pub const ENCRYPT_THEN_MAC: Self = Self {
        nonce_len: 16,
        authenticated: true,
    };
    pub const CHACHA20: Self = Self {
        nonce_len: 12,
        authenticated: false,
    };
    /// ChaCha20 with an explicit 4-byte initial counter.
    pub const CHACHA20_COUNTER: Self = Self {
        nonce_len: 16,
        authenticated: false,
    };
    pub const AES_CBC: Self = Self {
        nonce_len: 16,
        authenticated: false,
    };

    const fn is_supported(self) -> bool {
        self.nonce_len == 12 || self.nonce_len == 16
    }

    const fn min_len(self) -> usize {
        if self.authenticated {
            self.nonce_len + AD_LEN_SIZE + TAG_SIZE
        } else {
            self.nonce_len
        }
    }
}

/// One message unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub nonce: Vec<u8>,
    pub associated_data: Vec<u8>,
    pub ciphertext: Vec<u8>,
    /// Present exactly when the layout is authenticated.
    pub tag: Option<[u8; TAG_SIZE]>,
}

impl Frame {
    /// Frame an AEAD or encrypt-then-MAC result.
    pub fn authenticated(nonce: &[u8], associated_data: &[u8], sealed: Sealed) -> Self {
        Self {
            nonce: nonce.to_vec(),
            associated_data: associated_data.to_vec(),
            ciphertext: sealed.ciphertext,
            tag: Some(sealed.tag),
        }
    }

    /// Frame output of a confidentiality-only cipher.
    pub fn unauthenticated(nonce: &[u8], ciphertext: Vec<u8>) -> Self {
        Self {
            nonce: nonce.to_vec(),
            associated_data: Vec::new(),
            ciphertext,
            tag: None,
        }
    }

    pub fn layout(&self) -> FrameLayout {
        FrameLayout {
            nonce_len: self.nonce.len(),
            authenticated: self.tag.is_some(),
        }
    }

    /// Ciphertext and tag as a [`Sealed`], for authenticated frames.
    pub fn sealed(&self) -> Option<Sealed> {
        self.tag.map(|tag| Sealed {
            ciphertext: self.ciphertext.clone(),
            tag,
        })
    }

    pub fn encoded_len(&self) -> usize {
        let mut len = self.nonce.len() + self.ciphertext.len();
        if self.tag.is_some() {
            len += AD_LEN_SIZE + self.associated_data.len() + TAG_SIZE;
        }
        len
    }

    /// Write the frame into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if !self.layout().is_supported() {
            return Err(malformed(format!(
                "nonce must be 12 or 16 bytes, got {}",
                self.nonce.len()
            )));
        }

        dst.put_slice(&self.nonce);
        match &self.tag {
            Some(tag) => {
                let ad_len = u32::try_from(self.associated_data.len()).map_err(|_| {
                    malformed(format!(
                        "associated data of {} bytes does not fit a u32 length",
                        self.associated_data.len()
                    ))
                })?;
                dst.put_u32(ad_len);
                dst.put_slice(&self.associated_data);
                dst.put_slice(&self.ciphertext);
                dst.put_slice(tag);
            }
            None => {
                if !self.associated_data.is_empty() {
                    return Err(malformed(
                        "unauthenticated frames cannot carry associated data".to_string(),
                    ));
                }
                dst.put_slice(&self.ciphertext);
            }
        }
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out)?;
        Ok(out)
    }

    /// Parse `bytes` according to `layout`. Every declared length is checked
    /// against what is actually present.
    pub fn decode(bytes: &[u8], layout: FrameLayout) -> Result<Self> {
        if !layout.is_supported() {
            return Err(malformed(format!(
                "unsupported nonce length {}",
                layout.nonce_len
            )));
        }
        if bytes.len() < layout.min_len() {
            return Err(malformed(format!(
                "frame of {} bytes is shorter than the {}-byte minimum",
                bytes.len(),
                layout.min_len()
            )));
        }

        let mut buf = bytes;
        let nonce = buf.copy_to_bytes(layout.nonce_len).to_vec();

        if !layout.authenticated {
            return Ok(Self::unauthenticated(&nonce, buf.to_vec()));
        }

        let ad_len = usize::try_from(buf.get_u32())
            .map_err(|_| malformed("associated data length overflows usize".to_string()))?;
        let Some(body_len) = buf
            .remaining()
            .checked_sub(TAG_SIZE)
            .and_then(|rest| rest.checked_sub(ad_len))
        else {
            return Err(malformed(format!(
                "declared {ad_len} bytes of associated data, only {} remain",
                buf.remaining().saturating_sub(TAG_SIZE)
            )));
        };

        let associated_data = buf.copy_to_bytes(ad_len).to_vec();
        let ciphertext = buf.copy_to_bytes(body_len).to_vec();
        let mut tag = [0u8; TAG_SIZE];
        buf.copy_to_slice(&mut tag);

        Ok(Self {
            nonce,
            associated_data,
            ciphertext,
            tag: Some(tag),
        })
    }
}

fn malformed(reason: String) -> CryptoError {
    tracing::debug!(%reason, "rejecting frame");
    CryptoError::MalformedFrame(reason)
}
