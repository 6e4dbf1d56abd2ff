/*!
 * @file scram.rs
 * @brief SCRAM-SHA-1 authentication (RFC 5802, MongoDB digest quirks)
 */

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bson::{doc, spec::BinarySubtype, Bson, Document};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::config::Credential;
use crate::connection::Connection;
use crate::error::{AuthErrorKind, Error, Result};
use crate::{fauxdb_client_debug, fauxdb_client_info};

type HmacSha1 = Hmac<Sha1>;

const CLIENT_NONCE_LEN: usize = 24;
const GS2_HEADER: &str = "n,,";

/// Alphabet the legacy client used, with the SCRAM delimiters `,` and
/// `=` removed — the only two characters the nonce must never contain.
const NONCE_ALPHABET: &[u8] = {
    const RAW: &[u8] =
        b"!\"#'$%&()*+-./0123456789:;<=>?@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\\]^_";
    RAW
};

fn generate_nonce() -> String {
    let mut rng = rand::thread_rng();
    let filtered: Vec<u8> = NONCE_ALPHABET
        .iter()
        .copied()
        .filter(|&b| b != b',' && b != b'=')
        .collect();
    (0..CLIENT_NONCE_LEN)
        .map(|_| filtered[(rng.next_u32() as usize) % filtered.len()] as char)
        .collect()
}

fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts a key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha1(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

fn mongo_password_digest(username: &str, password: &str) -> String {
    let input = format!("{username}:mongo:{password}");
    format!("{:x}", md5::compute(input))
}

/// RFC 5802 `Hi()` — here specialized to a single 20-byte (SHA-1)
/// block, since PBKDF2's output length equals the HMAC's block output.
fn salted_password(mongo_hash: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut output = [0u8; 20];
    pbkdf2::pbkdf2_hmac::<Sha1>(mongo_hash.as_bytes(), salt, iterations, &mut output);
    output.to_vec()
}

struct ServerFirst {
    server_nonce: String,
    salt: Vec<u8>,
    iterations: u32,
}

fn parse_server_first(payload: &[u8], client_nonce: &str) -> Result<(ServerFirst, String)> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| Error::Auth(AuthErrorKind::UnexpectedPayload))?
        .to_string();

    let mut server_nonce = None;
    let mut salt = None;
    let mut iterations = None;

    for part in text.split(',') {
        if let Some(rest) = part.strip_prefix("r=") {
            server_nonce = Some(rest.to_string());
        } else if let Some(rest) = part.strip_prefix("s=") {
            salt = Some(
                BASE64
                    .decode(rest)
                    .map_err(|_| Error::Auth(AuthErrorKind::Base64Failure))?,
            );
        } else if let Some(rest) = part.strip_prefix("i=") {
            iterations = Some(
                rest.parse::<u32>()
                    .map_err(|_| Error::Auth(AuthErrorKind::UnexpectedPayload))?,
            );
        }
    }

    let server_nonce = server_nonce.ok_or(Error::Auth(AuthErrorKind::UnexpectedPayload))?;
    let salt = salt.ok_or(Error::Auth(AuthErrorKind::UnexpectedPayload))?;
    let iterations = iterations.ok_or(Error::Auth(AuthErrorKind::UnexpectedPayload))?;

    if !server_nonce.starts_with(client_nonce) {
        return Err(Error::Auth(AuthErrorKind::NonceMismatch));
    }

    Ok((
        ServerFirst {
            server_nonce,
            salt,
            iterations,
        },
        text,
    ))
}

fn binary_payload(bytes: Vec<u8>) -> Bson {
    Bson::Binary(bson::Binary {
        subtype: BinarySubtype::Generic,
        bytes,
    })
}

/// Drives `Start -> SentFirst -> SentProof -> AwaitingDone -> Done | Failed`
/// to completion, returning an error that leaves the connection
/// unauthenticated if any step fails.
pub async fn authenticate(connection: &Connection, credential: &Credential) -> Result<()> {
    let client_nonce = generate_nonce();
    let escaped_user = escape_username(&credential.username);
    let client_first_bare = format!("n={escaped_user},r={client_nonce}");
    let client_first = format!("{GS2_HEADER}{client_first_bare}");

    fauxdb_client_debug!("SCRAM-SHA-1: sending saslStart for user {}", credential.username);

    let sasl_start = doc! {
        "saslStart": 1,
        "mechanism": "SCRAM-SHA-1",
        "payload": binary_payload(client_first.into_bytes()),
    };

    let server_first_reply = connection
        .run_command(&credential.source, sasl_start)
        .await?;
    require_ok(&server_first_reply)?;

    let conversation_id = server_first_reply
        .get("conversationId")
        .cloned()
        .ok_or(Error::Auth(AuthErrorKind::UnexpectedPayload))?;

    let payload = server_first_reply
        .get_binary_generic("payload")
        .map_err(|_| Error::Auth(AuthErrorKind::UnexpectedPayload))?;

    let (server_first, server_first_text) = parse_server_first(payload, &client_nonce)?;

    let mongo_hash = mongo_password_digest(&credential.username, &credential.password);
    let salted_password = salted_password(&mongo_hash, &server_first.salt, server_first.iterations);

    let client_key = hmac_sha1(&salted_password, b"Client Key");
    let stored_key = sha1(&client_key);

    let channel_binding = format!("c={}", BASE64.encode(GS2_HEADER.as_bytes()));
    let client_final_without_proof =
        format!("{channel_binding},r={}", server_first.server_nonce);
    let auth_message = format!(
        "{client_first_bare},{server_first_text},{client_final_without_proof}"
    );

    let client_signature = hmac_sha1(&stored_key, auth_message.as_bytes());
    let client_proof = xor(&client_key, &client_signature);

    let server_key = hmac_sha1(&salted_password, b"Server Key");
    let expected_server_signature = hmac_sha1(&server_key, auth_message.as_bytes());

    let client_final = format!(
        "{client_final_without_proof},p={}",
        BASE64.encode(&client_proof)
    );

    fauxdb_client_debug!("SCRAM-SHA-1: sending saslContinue (proof) for user {}", credential.username);

    let sasl_continue = doc! {
        "saslContinue": 1,
        "conversationId": conversation_id.clone(),
        "payload": binary_payload(client_final.into_bytes()),
    };

    let server_final_reply = connection
        .run_command(&credential.source, sasl_continue)
        .await?;
    require_ok(&server_final_reply)?;

    if server_final_reply.get_bool("done").unwrap_or(false) {
        fauxdb_client_info!("SCRAM-SHA-1 authentication succeeded for {}", credential.username);
        return Ok(());
    }

    let final_payload = server_final_reply
        .get_binary_generic("payload")
        .map_err(|_| Error::Auth(AuthErrorKind::UnexpectedPayload))?;
    let final_text = std::str::from_utf8(final_payload)
        .map_err(|_| Error::Auth(AuthErrorKind::UnexpectedPayload))?;

    let v = final_text
        .strip_prefix("v=")
        .ok_or(Error::Auth(AuthErrorKind::UnexpectedPayload))?;
    let server_signature = BASE64
        .decode(v)
        .map_err(|_| Error::Auth(AuthErrorKind::Base64Failure))?;

    if server_signature != expected_server_signature {
        return Err(Error::Auth(AuthErrorKind::ServerSignatureInvalid));
    }

    // MongoDB-specific: the conversation isn't over once we've verified
    // the server signature — an empty saslContinue is required to close it.
    let noop = doc! {
        "saslContinue": 1,
        "conversationId": conversation_id,
        "payload": binary_payload(Vec::new()),
    };
    let done_reply = connection.run_command(&credential.source, noop).await?;
    require_ok(&done_reply)?;

    if !done_reply.get_bool("done").unwrap_or(false) {
        return Err(Error::Auth(AuthErrorKind::UnexpectedPayload));
    }

    fauxdb_client_info!("SCRAM-SHA-1 authentication succeeded for {}", credential.username);
    Ok(())
}

fn require_ok(reply: &Document) -> Result<()> {
    let ok = reply
        .get_f64("ok")
        .or_else(|_| reply.get_i32("ok").map(|v| v as f64))
        .unwrap_or(0.0);
    if ok == 1.0 {
        Ok(())
    } else {
        Err(Error::Auth(AuthErrorKind::IncorrectCredentials))
    }
}
