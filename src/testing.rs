//! Fixtures for unit tests: synthetic files, encrypted documents and ciphertexts.

use crate::encryption::crypt_filters::{CryptFilter, Rc4CryptFilter};
use crate::encryption::rc4::Rc4;
use crate::encryption::{PasswordAlgorithm, Permissions};
use crate::{Dictionary, Object, ObjectId, StringFormat, dictionary};
use aes::cipher::{BlockEncryptMut as _, KeyIvInit as _};

mod builder;
pub(crate) use builder::{PdfBuilder, Row, deflate, hex};

pub(crate) const FILE_ID: &[u8] = b"\x3a\x91\x0c\x5e\x72\xd4\x18\x66\xb0\x2f\x43\x9e\x07\xc1\x55\xe8";

// Everything but modifying, with the reserved high bits set as writers do.
const PERMISSIONS: i64 = -3900;

const IV: [u8; 16] = *b"fixed test iv 16";

fn hex_string(bytes: &[u8]) -> Object {
    Object::String(bytes.to_vec(), StringFormat::Hexadecimal)
}

fn algorithm(version: i64, revision: i64, length: usize) -> PasswordAlgorithm {
    PasswordAlgorithm {
        encrypt_metadata: true,
        length: Some(length),
        version,
        revision,
        permissions: Permissions::from_bits_retain(PERMISSIONS as u64),
        ..Default::default()
    }
}

fn standard_dictionary(algorithm: &PasswordAlgorithm) -> Dictionary {
    let mut dict = dictionary! {
        "Filter" => "Standard",
        "V" => algorithm.version,
        "R" => algorithm.revision,
        "O" => hex_string(&algorithm.owner_value),
        "U" => hex_string(&algorithm.user_value),
        "P" => PERMISSIONS,
    };
    if let Some(length) = algorithm.length {
        dict.set("Length", length as i64);
    }
    dict
}

/// Fill in `/O` and `/U` for revisions 2 to 4 and return the file key.
fn seal_r4(algorithm: &mut PasswordAlgorithm, owner: &str, user: &str) -> Vec<u8> {
    let owner = algorithm.sanitize_password_r4(owner);
    let user = algorithm.sanitize_password_r4(user);
    algorithm.owner_value = algorithm.compute_hashed_owner_password_r4(&owner, &user).unwrap();
    algorithm.user_value = algorithm.compute_hashed_user_password_r4(FILE_ID, &user).unwrap();
    algorithm.compute_file_encryption_key_r4(FILE_ID, &user).unwrap()
}

/// `/V 2 /R 3` with a 128-bit RC4 key.
pub(crate) fn rc4_encryption(owner: &str, user: &str) -> (Dictionary, Vec<u8>) {
    let mut algorithm = algorithm(2, 3, 128);
    let key = seal_r4(&mut algorithm, owner, user);
    (standard_dictionary(&algorithm), key)
}

/// `/V 4 /R 4` with the `StdCF` crypt filter using AESV2 for strings and streams.
pub(crate) fn aes128_encryption(owner: &str, user: &str) -> (Dictionary, Vec<u8>) {
    let mut algorithm = algorithm(4, 4, 128);
    let key = seal_r4(&mut algorithm, owner, user);
    let mut dict = standard_dictionary(&algorithm);
    dict.set(
        "CF",
        dictionary! {
            "StdCF" => dictionary! { "CFM" => "AESV2", "AuthEvent" => "DocOpen", "Length" => 16 },
        },
    );
    dict.set("StmF", "StdCF");
    dict.set("StrF", "StdCF");
    (dict, key)
}

/// `/V 5 /R 6` (AESV3) around a fixed file key.
pub(crate) fn aes256_encryption(owner: &str, user: &str) -> (Dictionary, Vec<u8>) {
    let mut algorithm = algorithm(5, 6, 256);
    let key: Vec<u8> = (0..32u8).map(|i| i.wrapping_mul(53).wrapping_add(7)).collect();

    let owner = algorithm.sanitize_password_r6(owner).unwrap();
    let user = algorithm.sanitize_password_r6(user).unwrap();
    let (user_value, user_encrypted) = algorithm
        .compute_hashed_user_password_r6(&key, &user, *b"usersaltuserkeys")
        .unwrap();
    algorithm.user_value = user_value;
    algorithm.user_encrypted = user_encrypted;
    let (owner_value, owner_encrypted) = algorithm
        .compute_hashed_owner_password_r6(&key, &owner, *b"ownrsaltownrkeys")
        .unwrap();
    algorithm.owner_value = owner_value;
    algorithm.owner_encrypted = owner_encrypted;
    algorithm.permission_encrypted = algorithm.compute_permissions(&key);

    let mut dict = standard_dictionary(&algorithm);
    dict.set("OE", hex_string(&algorithm.owner_encrypted));
    dict.set("UE", hex_string(&algorithm.user_encrypted));
    dict.set("Perms", hex_string(&algorithm.permission_encrypted));
    dict.set("CF", dictionary! { "StdCF" => dictionary! { "CFM" => "AESV3" } });
    dict.set("StmF", "StdCF");
    dict.set("StrF", "StdCF");
    (dict, key)
}

/// RC4 under the key of object `id`.
pub(crate) fn encrypt_rc4(file_key: &[u8], id: ObjectId, plaintext: &[u8]) -> Vec<u8> {
    Rc4::new(&Rc4CryptFilter.compute_key(file_key, id)).apply(plaintext)
}

/// AES-CBC with PKCS#5 padding, IV first. The key length picks AES-128 or AES-256.
pub(crate) fn encrypt_aes(object_key: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let mut data = plaintext.to_vec();
    let pad = 16 - data.len() % 16;
    data.extend(std::iter::repeat_n(pad as u8, pad));

    if object_key.len() == 16 {
        let mut encryptor = cbc::Encryptor::<aes::Aes128>::new(object_key.into(), &IV.into());
        for block in data.chunks_exact_mut(16) {
            encryptor.encrypt_block_mut(block.into());
        }
    } else {
        let mut encryptor = cbc::Encryptor::<aes::Aes256>::new(object_key.into(), &IV.into());
        for block in data.chunks_exact_mut(16) {
            encryptor.encrypt_block_mut(block.into());
        }
    }

    let mut out = IV.to_vec();
    out.extend(data);
    out
}

/// PDF syntax for a direct object. Strings are written in hex.
pub(crate) fn pdf_syntax(object: &Object) -> String {
    match object {
        Object::Null => "null".to_string(),
        Object::Boolean(value) => value.to_string(),
        Object::Integer(value) => value.to_string(),
        Object::Real(value) => value.to_string(),
        Object::Name(name) => format!("/{}", String::from_utf8_lossy(name)),
        Object::String(bytes, _) => hex(bytes),
        Object::Array(items) => format!("[{}]", items.iter().map(pdf_syntax).collect::<Vec<_>>().join(" ")),
        Object::Dictionary(dict) => {
            let entries: Vec<String> = dict
                .iter()
                .map(|(key, value)| format!("/{} {}", String::from_utf8_lossy(key), pdf_syntax(value)))
                .collect();
            format!("<<{}>>", entries.join(" "))
        }
        Object::Reference((number, generation)) => format!("{number} {generation} R"),
        Object::Stream(_) => panic!("streams cannot be written as direct objects"),
    }
}

pub(crate) const TITLE: &[u8] = b"Quarterly report";
pub(crate) const CONTENT: &[u8] = b"BT /F1 12 Tf 72 712 Td (Hello, world) Tj ET";

/// Catalog with an encrypted `/Title` (object 1), an encrypted flate content stream
/// (object 3) and the encryption dictionary itself (object 4).
pub(crate) fn encrypted_pdf(encrypt: &Dictionary, seal: impl Fn(ObjectId, &[u8]) -> Vec<u8>) -> Vec<u8> {
    let mut pdf = PdfBuilder::new();
    pdf.object(1, &format!("<< /Type /Catalog /Pages 2 0 R /Title {} >>", hex(&seal((1, 0), TITLE))));
    pdf.object(2, "<< /Type /Pages /Kids [] /Count 0 >>");
    pdf.stream(3, "/Filter /FlateDecode", &seal((3, 0), &deflate(CONTENT)));
    pdf.object(4, &pdf_syntax(&Object::Dictionary(encrypt.clone())));
    let id = hex(FILE_ID);
    let xref = pdf.xref_table(&format!("/Size 5 /Root 1 0 R /Encrypt 4 0 R /ID [{id} {id}]"));
    pdf.startxref(xref);
    pdf.build()
}
