//! Minimal fake-`mongod` scaffolding shared by the integration tests:
//! read one OP_MSG command frame, write one OP_MSG reply frame. Each
//! test drives its own accept loop on top of these two primitives so
//! it can script exactly the replies its scenario needs.

use bson::Document;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use mongowire::wire::{self, Header};

pub async fn read_command(stream: &mut TcpStream) -> (i32, Document) {
    let mut header_buf = [0u8; 16];
    stream.read_exact(&mut header_buf).await.expect("read header");
    let header = Header::parse(&header_buf).expect("parse header");
    let mut body = vec![0u8; header.body_len()];
    stream.read_exact(&mut body).await.expect("read body");
    let msg = wire::op_msg::parse(&body).expect("parse OP_MSG");
    (header.request_id, msg.body)
}

pub async fn write_reply(stream: &mut TcpStream, response_to: i32, reply: Document) {
    let mut frame = wire::op_msg::encode(0, &reply).expect("encode reply");
    frame[8..12].copy_from_slice(&response_to.to_le_bytes());
    stream.write_all(&frame).await.expect("write reply");
}

pub fn ismaster_reply() -> Document {
    bson::doc! {
        "ok": 1.0,
        "ismaster": true,
        "maxWireVersion": 13,
        "maxBsonObjectSize": 16_777_216i64,
        "maxMessageSizeBytes": 48_000_000i64,
        "maxWriteBatchSize": 100_000i64,
    }
}
