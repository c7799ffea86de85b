use std::collections::HashMap;
use std::convert::TryFrom;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::Error;

pub const HEADER_FIXED_LENGTH: usize = 4 + 4;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive)]
pub enum LanguageCode {
    JAVA = 0,
    CPP = 1,
    DOTNET = 2,
    PYTHON = 3,
    DELPHI = 4,
    ERLANG = 5,
    RUBY = 6,
    OTHER = 7,
    HTTP = 8,
    GO = 9,
    PHP = 10,
    OMS = 11,
}

/// Which of the two header codecs a wire frame uses, packed into the top byte of the
/// header-length field (see `RemotingCommand::encode_codec_type`).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum HeaderCodecType {
    Json = 0,
    RocketMQ = 1,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub code: i16,
    pub language: LanguageCode,
    pub version: i32,
    pub opaque: i32,
    pub flag: i32,
    pub remark: String,
    #[serde(rename = "extFields", default)]
    pub ext_fields: HashMap<String, String>,
}

pub trait HeaderCodec {
    fn codec_type(&self) -> HeaderCodecType;
    fn encode(&self, header: &Header) -> Result<Vec<u8>, Error>;
    fn decode(&self, buf: &[u8]) -> Result<Header, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JsonHeaderCodec;

impl HeaderCodec for JsonHeaderCodec {
    fn codec_type(&self) -> HeaderCodecType {
        HeaderCodecType::Json
    }

    fn encode(&self, header: &Header) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(header)?)
    }

    fn decode(&self, buf: &[u8]) -> Result<Header, Error> {
        Ok(serde_json::from_slice(buf)?)
    }
}

/// The custom RocketMQ binary header codec, mirroring `RocketMQSerializable` in the Java
/// client: every length-prefixed field is big-endian, extension fields are a flat list of
/// (short keyLen, key, int valueLen, value) triples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RocketMQHeaderCodec;

impl HeaderCodec for RocketMQHeaderCodec {
    fn codec_type(&self) -> HeaderCodecType {
        HeaderCodecType::RocketMQ
    }

    fn encode(&self, header: &Header) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        buf.write_i16::<BigEndian>(header.code)?;
        buf.write_u8(header.language as u8)?;
        buf.write_i32::<BigEndian>(header.version)?;
        buf.write_i32::<BigEndian>(header.opaque)?;
        buf.write_i32::<BigEndian>(header.flag)?;
        let remark_bytes = header.remark.as_bytes();
        buf.write_i32::<BigEndian>(remark_bytes.len() as i32)?;
        buf.extend_from_slice(remark_bytes);
        let mut ext_buf = Vec::new();
        for (key, value) in &header.ext_fields {
            let key_bytes = key.as_bytes();
            let value_bytes = value.as_bytes();
            ext_buf.write_i16::<BigEndian>(key_bytes.len() as i16)?;
            ext_buf.extend_from_slice(key_bytes);
            ext_buf.write_i32::<BigEndian>(value_bytes.len() as i32)?;
            ext_buf.extend_from_slice(value_bytes);
        }
        buf.write_i32::<BigEndian>(ext_buf.len() as i32)?;
        buf.extend_from_slice(&ext_buf);
        Ok(buf)
    }

    fn decode(&self, buf: &[u8]) -> Result<Header, Error> {
        let mut rdr = Cursor::new(buf);
        let code = rdr.read_i16::<BigEndian>()?;
        let language = LanguageCode::try_from(rdr.read_u8()?)
            .map_err(|_| Error::InvalidHeader("unknown language code".to_string()))?;
        let version = rdr.read_i32::<BigEndian>()?;
        let opaque = rdr.read_i32::<BigEndian>()?;
        let flag = rdr.read_i32::<BigEndian>()?;
        let remark_len = rdr.read_i32::<BigEndian>()? as usize;
        let mut remark_buf = vec![0u8; remark_len];
        rdr.read_exact(&mut remark_buf)?;
        let remark = String::from_utf8(remark_buf)?;
        let ext_len = rdr.read_i32::<BigEndian>()? as usize;
        let mut ext_fields = HashMap::new();
        let ext_end = rdr.position() + ext_len as u64;
        while rdr.position() < ext_end {
            let key_len = rdr.read_i16::<BigEndian>()? as usize;
            let mut key_buf = vec![0u8; key_len];
            rdr.read_exact(&mut key_buf)?;
            let value_len = rdr.read_i32::<BigEndian>()? as usize;
            let mut value_buf = vec![0u8; value_len];
            rdr.read_exact(&mut value_buf)?;
            ext_fields.insert(String::from_utf8(key_buf)?, String::from_utf8(value_buf)?);
        }
        Ok(Header {
            code,
            language,
            version,
            opaque,
            flag,
            remark,
            ext_fields,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_header() -> Header {
        let mut ext_fields = HashMap::new();
        ext_fields.insert("queueId".to_string(), "0".to_string());
        Header {
            code: 10,
            language: LanguageCode::OTHER,
            version: 431,
            opaque: 7,
            flag: 0,
            remark: "ok".to_string(),
            ext_fields,
        }
    }

    #[test]
    fn test_rocketmq_header_codec_roundtrip() {
        let header = sample_header();
        let codec = RocketMQHeaderCodec;
        let encoded = codec.encode(&header).unwrap();
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn test_json_header_codec_roundtrip() {
        let header = sample_header();
        let codec = JsonHeaderCodec;
        let encoded = codec.encode(&header).unwrap();
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(header, decoded);
    }
}
