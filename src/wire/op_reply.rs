/*!
 * @file op_reply.rs
 * @brief OP_REPLY (1) parsing — legacy reply to an OP_QUERY command
 */

use bson::Document;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct OpReply {
    pub response_flags: i32,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub number_returned: i32,
    pub documents: Vec<Document>,
}

/// Parses an OP_REPLY body (the bytes following the 16-byte header).
pub fn parse(body: &[u8]) -> Result<OpReply> {
    if body.len() < 20 {
        return Err(Error::Protocol("OP_REPLY body too short".to_string()));
    }

    let response_flags = i32::from_le_bytes(body[0..4].try_into().unwrap());
    let cursor_id = i64::from_le_bytes(body[4..12].try_into().unwrap());
    let starting_from = i32::from_le_bytes(body[12..16].try_into().unwrap());
    let number_returned = i32::from_le_bytes(body[16..20].try_into().unwrap());

    let mut documents = Vec::with_capacity(number_returned.max(0) as usize);
    let mut cursor = std::io::Cursor::new(&body[20..]);
    while (cursor.position() as usize) < body[20..].len() {
        let doc = Document::from_reader(&mut cursor)
            .map_err(|e| Error::Protocol(format!("truncated OP_REPLY document: {e}")))?;
        documents.push(doc);
    }

    Ok(OpReply {
        response_flags,
        cursor_id,
        starting_from,
        number_returned,
        documents,
    })
}
