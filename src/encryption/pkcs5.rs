use log::warn;

/// Strip PKCS#5 padding (RFC 2898) from decrypted AES data.
///
/// A pad consists of `n` bytes of value `n`, 1 <= n <= 16. Data whose tail is not a valid pad
/// is returned unchanged, since files with broken padding are common.
pub fn unpad(data: &[u8]) -> &[u8] {
    let Some(&n) = data.last() else {
        return data;
    };
    let n = n as usize;
    if (1..=16).contains(&n) && n <= data.len() && data[data.len() - n..].iter().all(|&v| v as usize == n) {
        return &data[..data.len() - n];
    }
    warn!("invalid PKCS#5 padding byte {:#04x}, keeping decrypted data as is", n);
    data
}
