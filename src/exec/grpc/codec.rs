//! A tonic codec for messages whose shape is only known at runtime.
//!
//! Generated clients get a codec per message type; here both directions are
//! [`DynamicMessage`]s, with the decoder carrying the response descriptor
//! picked out of the compiled pool.

use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::Status;

#[derive(Debug, Clone)]
pub struct DynamicCodec {
    response: MessageDescriptor,
}

impl DynamicCodec {
    pub fn new(response: MessageDescriptor) -> Self {
        Self { response }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder {
            response: self.response.clone(),
        }
    }
}

pub struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: DynamicMessage, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
        item.encode(dst)
            .map_err(|e| Status::internal(format!("failed to encode request message: {e}")))
    }
}

pub struct DynamicDecoder {
    response: MessageDescriptor,
}

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<DynamicMessage>, Status> {
        let message = DynamicMessage::decode(self.response.clone(), src)
            .map_err(|e| Status::internal(format!("failed to decode response message: {e}")))?;
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_reflect::Value;

    fn reply_descriptor() -> MessageDescriptor {
        let pool = super::super::descriptor::compile(
            r#"
            syntax = "proto3";
            package demo.v1;
            message HelloReply { string message = 1; }
            "#,
        )
        .unwrap();
        pool.get_message_by_name("demo.v1.HelloReply").unwrap()
    }

    #[test]
    fn encoder_and_decoder_round_trip_a_message() {
        let desc = reply_descriptor();
        let mut msg = DynamicMessage::new(desc.clone());
        msg.set_field_by_name("message", Value::String("hi".into()));

        let bytes = msg.encode_to_vec();
        let decoded = DynamicMessage::decode(desc, bytes.as_slice()).unwrap();
        assert_eq!(
            decoded.get_field_by_name("message").as_deref(),
            Some(&Value::String("hi".into()))
        );
    }
}
