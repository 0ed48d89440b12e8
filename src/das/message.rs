//! Decoder for the encrypted message format of activity stream payloads.
//!
//! Payloads use the AWS Encryption SDK message format, version 1, with one of
//! the AES-256-GCM algorithm suites. The message data key is wrapped with the
//! plaintext KMS data key as a raw AES key, under the provider `BC` and the key
//! name `DataKey`.
use crate::error::RuntimeError;
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{
    digest::{crypto_common::BlockSizeUser, Digest},
    Mac, SimpleHmac,
};
use p384::ecdsa::{signature::Verifier, Signature, VerifyingKey};
use sha2::{Sha256, Sha384};
use std::collections::BTreeMap;

const PROVIDER_ID: &[u8] = b"BC";
const KEY_NAME: &[u8] = b"DataKey";
const PUBLIC_KEY_FIELD: &str = "aws-crypto-public-key";

const VERSION: u8 = 0x01;
const CUSTOMER_AUTHENTICATED_DATA: u8 = 0x80;
const MESSAGE_ID_LEN: usize = 16;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const FINAL_FRAME: u32 = u32::MAX;

const FRAME_LABEL: &[u8] = b"AWSKMSEncryptionClient Frame";
const FINAL_FRAME_LABEL: &[u8] = b"AWSKMSEncryptionClient Final Frame";
const SINGLE_BLOCK_LABEL: &[u8] = b"AWSKMSEncryptionClient Single Block";

#[derive(Clone, Copy, Debug, PartialEq)]
enum Suite {
    NoKdf,
    HkdfSha256,
    HkdfSha384Ecdsa,
}

impl Suite {
    fn from_id(id: u16) -> Result<Suite, RuntimeError> {
        match id {
            0x0014 => Ok(Suite::NoKdf),
            0x0178 => Ok(Suite::HkdfSha256),
            0x0378 => Ok(Suite::HkdfSha384Ecdsa),
            other => Err(error(format!("unsupported algorithm suite {other:#06x}"))),
        }
    }

    fn id(self) -> u16 {
        match self {
            Suite::NoKdf => 0x0014,
            Suite::HkdfSha256 => 0x0178,
            Suite::HkdfSha384Ecdsa => 0x0378,
        }
    }

    fn signed(self) -> bool {
        self == Suite::HkdfSha384Ecdsa
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], RuntimeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| error("truncated message"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn uint(&mut self, len: usize) -> Result<u64, RuntimeError> {
        Ok(self
            .take(len)?
            .iter()
            .fold(0, |acc, b| acc << 8 | u64::from(*b)))
    }

    fn u8(&mut self) -> Result<u8, RuntimeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, RuntimeError> {
        Ok(self.uint(2)? as u16)
    }

    fn u32(&mut self) -> Result<u32, RuntimeError> {
        Ok(self.uint(4)? as u32)
    }

    fn u64(&mut self) -> Result<u64, RuntimeError> {
        self.uint(8)
    }

    /// Bytes prefixed with their u16 length
    fn short_bytes(&mut self) -> Result<&'a [u8], RuntimeError> {
        let len = self.u16()?;
        self.take(usize::from(len))
    }

    fn consumed(&self) -> &'a [u8] {
        &self.buf[..self.pos]
    }

    fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }
}

struct EncryptedKey<'a> {
    provider: &'a [u8],
    info: &'a [u8],
    ciphertext: &'a [u8],
}

struct Header<'a> {
    suite: Suite,
    message_id: &'a [u8],
    context: BTreeMap<String, String>,
    context_bytes: &'a [u8],
    keys: Vec<EncryptedKey<'a>>,
    framed: bool,
    frame_len: u32,
}

impl<'a> Header<'a> {
    fn read(r: &mut Reader<'a>) -> Result<Header<'a>, RuntimeError> {
        let version = r.u8()?;
        if version != VERSION {
            return Err(error(format!("unsupported message version {version}")));
        }
        if r.u8()? != CUSTOMER_AUTHENTICATED_DATA {
            return Err(error("unsupported message type"));
        }
        let suite = Suite::from_id(r.u16()?)?;
        let message_id = r.take(MESSAGE_ID_LEN)?;
        let context_bytes = r.short_bytes()?;
        let context = read_context(context_bytes)?;

        let count = r.u16()?;
        if count == 0 {
            return Err(error("message has no encrypted data key"));
        }
        let keys = (0..count)
            .map(|_| {
                Ok(EncryptedKey {
                    provider: r.short_bytes()?,
                    info: r.short_bytes()?,
                    ciphertext: r.short_bytes()?,
                })
            })
            .collect::<Result<Vec<_>, RuntimeError>>()?;

        let framed = match r.u8()? {
            0x01 => false,
            0x02 => true,
            other => return Err(error(format!("unknown content type {other}"))),
        };
        r.take(4)?; // reserved
        if usize::from(r.u8()?) != IV_LEN {
            return Err(error("unsupported IV length"));
        }
        let frame_len = r.u32()?;
        if framed && frame_len == 0 {
            return Err(error("framed message with frame length 0"));
        }

        Ok(Header {
            suite,
            message_id,
            context,
            context_bytes,
            keys,
            framed,
            frame_len,
        })
    }
}

fn read_context(bytes: &[u8]) -> Result<BTreeMap<String, String>, RuntimeError> {
    let mut context = BTreeMap::new();
    if bytes.is_empty() {
        return Ok(context);
    }
    let mut r = Reader::new(bytes);
    for _ in 0..r.u16()? {
        let key = utf8(r.short_bytes()?)?;
        let value = utf8(r.short_bytes()?)?;
        context.insert(key, value);
    }
    if !r.is_empty() {
        return Err(error("trailing bytes in encryption context"));
    }
    Ok(context)
}

fn utf8(bytes: &[u8]) -> Result<String, RuntimeError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| error("encryption context is not UTF-8"))
}

/// Decrypt `message` with the plaintext KMS data key `wrapping_key`.
///
/// The header tag, every frame tag and, for signed suites, the footer
/// signature must verify before any plaintext is returned.
pub fn decrypt(wrapping_key: &[u8], message: &[u8]) -> Result<Vec<u8>, RuntimeError> {
    let mut r = Reader::new(message);
    let header = Header::read(&mut r)?;
    let header_bytes = r.consumed();

    let data_key = unwrap_data_key(wrapping_key, &header)?;
    let key = derive_key(header.suite, &data_key, header.message_id)?;

    let iv = r.take(IV_LEN)?;
    let tag = r.take(TAG_LEN)?;
    open(&key, iv, tag, &[], header_bytes)
        .map_err(|_| error("header authentication failed"))?;

    let plaintext = if header.framed {
        read_frames(&mut r, &key, &header)?
    } else {
        read_single_block(&mut r, &key, &header)?
    };

    if header.suite.signed() {
        let signed = r.consumed();
        verify_footer(&header, signed, r.short_bytes()?)?;
    }
    if !r.is_empty() {
        return Err(error("trailing bytes after message"));
    }
    Ok(plaintext)
}

fn unwrap_data_key(wrapping_key: &[u8], header: &Header) -> Result<Vec<u8>, RuntimeError> {
    for key in header.keys.iter().filter(|k| k.provider == PROVIDER_ID) {
        let Some(info) = key.info.strip_prefix(KEY_NAME) else {
            continue;
        };
        let mut r = Reader::new(info);
        if r.u32()? != (TAG_LEN * 8) as u32 || r.u32()? != IV_LEN as u32 {
            return Err(error("unsupported data key wrapping"));
        }
        let iv = r.take(IV_LEN)?;
        let split = key
            .ciphertext
            .len()
            .checked_sub(TAG_LEN)
            .ok_or_else(|| error("encrypted data key is too short"))?;
        let (ciphertext, tag) = key.ciphertext.split_at(split);

        let data_key = open(wrapping_key, iv, tag, ciphertext, header.context_bytes)
            .map_err(|_| error("cannot unwrap the message data key"))?;
        if data_key.len() != KEY_LEN {
            return Err(error("unexpected data key length"));
        }
        return Ok(data_key);
    }
    Err(error("no data key wrapped for provider BC"))
}

fn derive_key(suite: Suite, data_key: &[u8], message_id: &[u8]) -> Result<Vec<u8>, RuntimeError> {
    let mut info = suite.id().to_be_bytes().to_vec();
    info.extend_from_slice(message_id);
    match suite {
        Suite::NoKdf => Ok(data_key.to_vec()),
        Suite::HkdfSha256 => hkdf::<Sha256>(data_key, &info),
        Suite::HkdfSha384Ecdsa => hkdf::<Sha384>(data_key, &info),
    }
}

// HKDF with a zero salt, one expand block is enough for a 32 byte key
fn hkdf<D: Digest + BlockSizeUser>(ikm: &[u8], info: &[u8]) -> Result<Vec<u8>, RuntimeError> {
    let salt = vec![0; <D as Digest>::output_size()];
    let mut extract =
        <SimpleHmac<D> as Mac>::new_from_slice(&salt).map_err(|_| error("invalid HKDF salt"))?;
    extract.update(ikm);
    let prk = extract.finalize().into_bytes();

    let mut expand =
        <SimpleHmac<D> as Mac>::new_from_slice(&prk).map_err(|_| error("invalid HKDF key"))?;
    expand.update(info);
    expand.update(&[1]);
    let mut okm = expand.finalize().into_bytes().to_vec();
    okm.truncate(KEY_LEN);
    Ok(okm)
}

fn open(
    key: &[u8],
    iv: &[u8],
    tag: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, RuntimeError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| error("invalid key length"))?;
    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);
    cipher
        .decrypt(Nonce::from_slice(iv), Payload { msg: &sealed, aad })
        .map_err(|_| error("authentication tag mismatch"))
}

fn body_aad(message_id: &[u8], label: &[u8], seq: u32, len: u64) -> Vec<u8> {
    let mut aad = Vec::with_capacity(message_id.len() + label.len() + 12);
    aad.extend_from_slice(message_id);
    aad.extend_from_slice(label);
    aad.extend_from_slice(&seq.to_be_bytes());
    aad.extend_from_slice(&len.to_be_bytes());
    aad
}

fn read_frames(r: &mut Reader, key: &[u8], header: &Header) -> Result<Vec<u8>, RuntimeError> {
    let mut plaintext = Vec::new();
    let mut expected = 1u32;
    loop {
        let marker = r.u32()?;
        let last = marker == FINAL_FRAME;
        let seq = if last { r.u32()? } else { marker };
        if seq != expected {
            return Err(error(format!("frame {seq} out of sequence")));
        }
        let iv = r.take(IV_LEN)?;
        let len = if last { r.u32()? } else { header.frame_len };
        if len > header.frame_len {
            return Err(error("final frame is longer than the frame length"));
        }
        let content = r.take(len as usize)?;
        let tag = r.take(TAG_LEN)?;

        let label = if last { FINAL_FRAME_LABEL } else { FRAME_LABEL };
        let aad = body_aad(header.message_id, label, seq, u64::from(len));
        plaintext.extend(open(key, iv, tag, content, &aad)?);

        if last {
            return Ok(plaintext);
        }
        expected = expected
            .checked_add(1)
            .filter(|seq| *seq != FINAL_FRAME)
            .ok_or_else(|| error("too many frames"))?;
    }
}

fn read_single_block(
    r: &mut Reader,
    key: &[u8],
    header: &Header,
) -> Result<Vec<u8>, RuntimeError> {
    let iv = r.take(IV_LEN)?;
    let len = r.u64()?;
    let content = r.take(usize::try_from(len).map_err(|_| error("content is too long"))?)?;
    let tag = r.take(TAG_LEN)?;
    let aad = body_aad(header.message_id, SINGLE_BLOCK_LABEL, 1, len);
    open(key, iv, tag, content, &aad)
}

fn verify_footer(header: &Header, signed: &[u8], signature: &[u8]) -> Result<(), RuntimeError> {
    let public_key = header
        .context
        .get(PUBLIC_KEY_FIELD)
        .ok_or_else(|| error("signed message without a public key"))?;
    let public_key = BASE64.decode(public_key)?;
    let public_key =
        VerifyingKey::from_sec1_bytes(&public_key).map_err(|_| error("invalid public key"))?;
    let signature = Signature::from_der(signature).map_err(|_| error("invalid signature"))?;
    public_key
        .verify(signed, &signature)
        .map_err(|_| error("signature mismatch"))
}

fn error(reason: impl Into<String>) -> RuntimeError {
    RuntimeError::Decrypt(reason.into())
}

/// Encrypt `plaintext` the way an activity stream does, for tests.
/// A `frame_len` of 0 writes a single block message.
#[cfg(test)]
pub(crate) fn seal(
    wrapping_key: &[u8],
    data_key: &[u8],
    suite_id: u16,
    frame_len: u32,
    plaintext: &[u8],
) -> Vec<u8> {
    use p384::ecdsa::{signature::Signer, SigningKey};

    fn put_short(out: &mut Vec<u8>, bytes: &[u8]) {
        out.extend((bytes.len() as u16).to_be_bytes());
        out.extend(bytes);
    }

    let suite = Suite::from_id(suite_id).unwrap();
    let signer = suite
        .signed()
        .then(|| SigningKey::from_slice(&[7; 48]).unwrap());

    let mut context = vec![("aws:rds:dbc-id".to_string(), "cluster-TESTCLUSTER".to_string())];
    if let Some(signer) = &signer {
        let point = signer.verifying_key().to_encoded_point(true);
        context.push((PUBLIC_KEY_FIELD.to_string(), BASE64.encode(point.as_bytes())));
    }
    context.sort();
    let mut context_bytes = (context.len() as u16).to_be_bytes().to_vec();
    for (k, v) in &context {
        put_short(&mut context_bytes, k.as_bytes());
        put_short(&mut context_bytes, v.as_bytes());
    }

    let message_id = [3; MESSAGE_ID_LEN];
    let wrap_iv = [9; IV_LEN];
    let wrapped = Aes256Gcm::new_from_slice(wrapping_key)
        .unwrap()
        .encrypt(
            Nonce::from_slice(&wrap_iv),
            Payload {
                msg: data_key,
                aad: &context_bytes,
            },
        )
        .unwrap();
    let mut info = KEY_NAME.to_vec();
    info.extend(((TAG_LEN * 8) as u32).to_be_bytes());
    info.extend((IV_LEN as u32).to_be_bytes());
    info.extend(wrap_iv);

    let mut out = vec![VERSION, CUSTOMER_AUTHENTICATED_DATA];
    out.extend(suite_id.to_be_bytes());
    out.extend(message_id);
    put_short(&mut out, &context_bytes);
    out.extend(1u16.to_be_bytes());
    put_short(&mut out, PROVIDER_ID);
    put_short(&mut out, &info);
    put_short(&mut out, &wrapped);
    out.push(if frame_len > 0 { 0x02 } else { 0x01 });
    out.extend([0; 4]);
    out.push(IV_LEN as u8);
    out.extend(frame_len.to_be_bytes());

    let cipher = Aes256Gcm::new_from_slice(&derive_key(suite, data_key, &message_id).unwrap()).unwrap();
    let seal_part = |seq: u32, msg: &[u8], aad: &[u8]| {
        let mut iv = [0; IV_LEN];
        iv[8..].copy_from_slice(&seq.to_be_bytes());
        let mut ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), Payload { msg, aad })
            .unwrap();
        let tag = ciphertext.split_off(ciphertext.len() - TAG_LEN);
        (iv, ciphertext, tag)
    };

    let (iv, _, tag) = seal_part(0, &[], &out);
    out.extend(iv);
    out.extend(tag);

    if frame_len == 0 {
        let len = plaintext.len() as u64;
        let (iv, ciphertext, tag) =
            seal_part(1, plaintext, &body_aad(&message_id, SINGLE_BLOCK_LABEL, 1, len));
        out.extend(iv);
        out.extend(len.to_be_bytes());
        out.extend(ciphertext);
        out.extend(tag);
    } else {
        let mut frames: Vec<&[u8]> = plaintext.chunks(frame_len as usize).collect();
        let last = frames.pop().unwrap_or(&[]);
        for (i, frame) in frames.iter().enumerate() {
            let seq = i as u32 + 1;
            let aad = body_aad(&message_id, FRAME_LABEL, seq, frame.len() as u64);
            let (iv, ciphertext, tag) = seal_part(seq, frame, &aad);
            out.extend(seq.to_be_bytes());
            out.extend(iv);
            out.extend(ciphertext);
            out.extend(tag);
        }
        let seq = frames.len() as u32 + 1;
        let aad = body_aad(&message_id, FINAL_FRAME_LABEL, seq, last.len() as u64);
        let (iv, ciphertext, tag) = seal_part(seq, last, &aad);
        out.extend(FINAL_FRAME.to_be_bytes());
        out.extend(seq.to_be_bytes());
        out.extend(iv);
        out.extend((last.len() as u32).to_be_bytes());
        out.extend(ciphertext);
        out.extend(tag);
    }

    if let Some(signer) = signer {
        let signature: Signature = signer.sign(&out);
        put_short(&mut out, signature.to_der().as_bytes());
    }
    out
}
