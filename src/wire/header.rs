/*!
 * @file header.rs
 * @brief 16-byte MongoDB wire protocol message header
 */

use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 16;

pub const OP_REPLY: i32 = 1;
pub const OP_QUERY: i32 = 2004;
pub const OP_MSG: i32 = 2013;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl Header {
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < HEADER_LEN {
            return Err(Error::Protocol("message header too short".to_string()));
        }

        let message_length = i32::from_le_bytes(buffer[0..4].try_into().unwrap());
        let request_id = i32::from_le_bytes(buffer[4..8].try_into().unwrap());
        let response_to = i32::from_le_bytes(buffer[8..12].try_into().unwrap());
        let op_code = i32::from_le_bytes(buffer[12..16].try_into().unwrap());

        if message_length < HEADER_LEN as i32 {
            return Err(Error::Protocol(format!(
                "message length {message_length} smaller than header"
            )));
        }

        Ok(Self {
            message_length,
            request_id,
            response_to,
            op_code,
        })
    }

    pub fn write(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.message_length.to_le_bytes());
        buffer.extend_from_slice(&self.request_id.to_le_bytes());
        buffer.extend_from_slice(&self.response_to.to_le_bytes());
        buffer.extend_from_slice(&self.op_code.to_le_bytes());
    }

    pub fn body_len(&self) -> usize {
        self.message_length as usize - HEADER_LEN
    }
}

/// Patches the `messageLength` field of an already-serialized frame in
/// place once the full body length is known.
pub fn patch_message_length(buffer: &mut [u8]) {
    let len = buffer.len() as i32;
    buffer[0..4].copy_from_slice(&len.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_short_buffers() {
        let buf = [0u8; 10];
        assert!(Header::parse(&buf).is_err());
    }

    #[test]
    fn write_then_parse_round_trips() {
        let header = Header {
            message_length: 42,
            request_id: 7,
            response_to: 0,
            op_code: OP_MSG,
        };
        let mut buffer = Vec::new();
        header.write(&mut buffer);
        assert_eq!(buffer.len(), HEADER_LEN);
        let parsed = Header::parse(&buffer).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn patch_message_length_sets_total_len() {
        let mut buffer = vec![0u8; HEADER_LEN];
        buffer.extend_from_slice(b"extra");
        patch_message_length(&mut buffer);
        let len = i32::from_le_bytes(buffer[0..4].try_into().unwrap());
        assert_eq!(len as usize, buffer.len());
    }
}
