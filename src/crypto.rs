//! AES-128 building blocks shared by the handshake and secure messaging
//!
//! - CMAC-AES128 (key diversification, session keys, command MACs)
//! - single-block AES (IV derivation)
//! - AES-CBC without padding (handshake tokens, command payloads)
//! - ISO/IEC 9797-1 method 2 padding, the "ISO 7816-4" 0x80 padding

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use aes::Aes128;
use cmac::{Cmac, Mac};

use crate::error::{Error, Result};

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// 16-byte AES-128 key
pub type AesKey = [u8; 16];

/// All-zero IV used throughout the handshake
pub const ZERO_IV: [u8; BLOCK_SIZE] = [0u8; BLOCK_SIZE];

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// CMAC-AES128 over `data`, full 16-byte tag
pub fn cmac(key: &AesKey, data: &[u8]) -> [u8; BLOCK_SIZE] {
    let mut mac = <Cmac<Aes128> as KeyInit>::new(GenericArray::from_slice(key));
    mac.update(data);
    let tag = mac.finalize().into_bytes();

    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&tag);
    out
}

/// Encrypt exactly one block, no chaining
pub fn encrypt_block(key: &AesKey, input: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut block = GenericArray::clone_from_slice(input);
    cipher.encrypt_block(&mut block);

    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&block);
    out
}

/// AES-CBC encryption of block-aligned data
pub fn cbc_encrypt(key: &AesKey, iv: &[u8; BLOCK_SIZE], data: &[u8]) -> Result<Vec<u8>> {
    check_aligned(data)?;

    let mut cipher = Aes128CbcEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));
    let mut buf = data.to_vec();
    for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
    }
    Ok(buf)
}

/// AES-CBC decryption of block-aligned data
pub fn cbc_decrypt(key: &AesKey, iv: &[u8; BLOCK_SIZE], data: &[u8]) -> Result<Vec<u8>> {
    check_aligned(data)?;

    let mut cipher = Aes128CbcDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));
    let mut buf = data.to_vec();
    for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block_mut(GenericArray::from_mut_slice(chunk));
    }
    Ok(buf)
}

fn check_aligned(data: &[u8]) -> Result<()> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(Error::InvalidParameter(format!(
            "{} bytes is not a multiple of the AES block size",
            data.len()
        )));
    }
    Ok(())
}

/// Append 0x80 then zero-fill to the next block boundary
///
/// Block-aligned input still gets a full padding block.
pub fn iso7816_pad(data: &[u8]) -> Vec<u8> {
    let padded_len = (data.len() / BLOCK_SIZE + 1) * BLOCK_SIZE;
    let mut out = Vec::with_capacity(padded_len);
    out.extend_from_slice(data);
    out.push(0x80);
    out.resize(padded_len, 0x00);
    out
}

/// Strip 0x80 padding; the marker must sit inside the last block
pub fn iso7816_unpad(data: &[u8]) -> Result<&[u8]> {
    let marker = data
        .iter()
        .rposition(|&b| b != 0x00)
        .filter(|&i| data[i] == 0x80 && data.len() - i <= BLOCK_SIZE)
        .ok_or_else(|| Error::Protocol("missing ISO 7816-4 padding marker".to_string()))?;
    Ok(&data[..marker])
}

/// Rotate a block left by one byte (byte 0 moves to the end)
pub fn rotate_left(block: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let mut out = *block;
    out.rotate_left(1);
    out
}
