/*!
 * @file mod.rs
 * @brief Wire Codec: frame header plus OP_QUERY/OP_REPLY/OP_MSG bodies
 */

pub mod header;
pub mod op_msg;
pub mod op_query;
pub mod op_reply;

pub use header::{Header, OP_MSG, OP_QUERY, OP_REPLY};

use crate::error::{Error, Result};

/// Default `maxBsonObjectSize` a connection enforces until a real
/// value is learned from the server's `isMaster`/`hello` handshake.
pub const DEFAULT_MAX_BSON_OBJECT_SIZE: i64 = 16 * 1024 * 1024;

/// A frame read off the wire: header plus the raw, not-yet-decoded body.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: Header,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn check_size(&self, max_bson_object_size: i64) -> Result<()> {
        // The frame carries one header plus at least one BSON document;
        // the header and the small amount of opcode-specific framing
        // around it should never push a single in-bounds document over
        // the limit by more than a few dozen bytes, so comparing the
        // whole frame against the limit (with slack) is sufficient to
        // catch a runaway or corrupt length field.
        if self.header.message_length as i64 > max_bson_object_size + 1024 {
            return Err(Error::Protocol(format!(
                "frame of {} bytes exceeds maxBsonObjectSize {}",
                self.header.message_length, max_bson_object_size
            )));
        }
        Ok(())
    }
}
