/*!
 * @file op_query.rs
 * @brief OP_QUERY (2004) encoding — legacy `runCommand` against `db.$cmd`
 */

use bson::Document;

use crate::error::Result;
use crate::wire::header::{Header, OP_QUERY};

/// Encodes a full OP_QUERY frame (header + body) for a legacy command
/// dispatched with `numberToReturn = 1` against `db.$cmd`.
pub fn encode(request_id: i32, full_collection_name: &str, query: &Document) -> Result<Vec<u8>> {
    let query_bytes = bson::to_vec(query)?;

    let mut body = Vec::new();
    body.extend_from_slice(&0i32.to_le_bytes()); // flags
    body.extend_from_slice(full_collection_name.as_bytes());
    body.push(0); // cstring NUL terminator
    body.extend_from_slice(&0i32.to_le_bytes()); // numberToSkip
    body.extend_from_slice(&1i32.to_le_bytes()); // numberToReturn
    body.extend_from_slice(&query_bytes);

    let mut frame = Vec::with_capacity(16 + body.len());
    let header = Header {
        message_length: (16 + body.len()) as i32,
        request_id,
        response_to: 0,
        op_code: OP_QUERY,
    };
    header.write(&mut frame);
    frame.extend_from_slice(&body);

    Ok(frame)
}
