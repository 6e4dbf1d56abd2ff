/*!
 * @file op_msg.rs
 * @brief OP_MSG (2013) encoding and parsing
 *
 * Only section kind 0 (a single BSON body) is emitted by this client;
 * kind 1 document sequences are accepted when parsing replies (some
 * servers attach them) but the core never needs to build one, since
 * every command here fits in a single document.
 */

use bson::Document;

use crate::error::{Error, Result};
use crate::wire::header::{Header, OP_MSG};

const SECTION_KIND_BODY: u8 = 0;
const SECTION_KIND_DOC_SEQUENCE: u8 = 1;

/// Encodes a full OP_MSG frame carrying a single section-kind-0 body.
pub fn encode(request_id: i32, command: &Document) -> Result<Vec<u8>> {
    let body_bytes = bson::to_vec(command)?;

    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_le_bytes()); // flagBits, checksum bit never set
    body.push(SECTION_KIND_BODY);
    body.extend_from_slice(&body_bytes);

    let mut frame = Vec::with_capacity(16 + body.len());
    let header = Header {
        message_length: (16 + body.len()) as i32,
        request_id,
        response_to: 0,
        op_code: OP_MSG,
    };
    header.write(&mut frame);
    frame.extend_from_slice(&body);

    Ok(frame)
}

/// A decoded OP_MSG payload: the primary (kind 0) document plus any
/// document sequences attached under their field identifiers.
#[derive(Debug, Clone, Default)]
pub struct OpMsg {
    pub flag_bits: u32,
    pub body: Document,
    pub sequences: Vec<(String, Vec<Document>)>,
}

pub fn parse(body: &[u8]) -> Result<OpMsg> {
    if body.len() < 4 {
        return Err(Error::Protocol("OP_MSG body too short".to_string()));
    }

    let flag_bits = u32::from_le_bytes(body[0..4].try_into().unwrap());
    let mut cursor = std::io::Cursor::new(&body[4..]);
    let remaining = body.len() - 4;

    let mut primary: Option<Document> = None;
    let mut sequences = Vec::new();

    while (cursor.position() as usize) < remaining {
        let kind = body[4 + cursor.position() as usize];
        cursor.set_position(cursor.position() + 1);

        match kind {
            SECTION_KIND_BODY => {
                let doc = Document::from_reader(&mut cursor)
                    .map_err(|e| Error::Protocol(format!("truncated OP_MSG body: {e}")))?;
                primary = Some(doc);
            }
            SECTION_KIND_DOC_SEQUENCE => {
                let pos_before = cursor.position();
                let mut size_buf = [0u8; 4];
                std::io::Read::read_exact(&mut cursor, &mut size_buf)
                    .map_err(|e| Error::Protocol(format!("truncated doc sequence size: {e}")))?;
                let size = i32::from_le_bytes(size_buf) as u64;
                let section_end = pos_before + size;

                let ident_start = cursor.position() as usize;
                let slice = &body[4 + ident_start..];
                let nul = slice
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| Error::Protocol("doc sequence identifier not NUL-terminated".to_string()))?;
                let identifier = String::from_utf8_lossy(&slice[..nul]).to_string();
                cursor.set_position(cursor.position() + nul as u64 + 1);

                let mut docs = Vec::new();
                while cursor.position() < section_end {
                    let doc = Document::from_reader(&mut cursor).map_err(|e| {
                        Error::Protocol(format!("truncated doc sequence document: {e}"))
                    })?;
                    docs.push(doc);
                }
                sequences.push((identifier, docs));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unsupported OP_MSG section kind {other}"
                )))
            }
        }
    }

    Ok(OpMsg {
        flag_bits,
        body: primary.ok_or_else(|| Error::Protocol("OP_MSG had no body section".to_string()))?,
        sequences,
    })
}
