//! The TCPROS wire format: length-prefixed message frames, the service-response framing
//! variant, and the connection-header handshake block.
//!
//! Two framings share the same underlying "4 little-endian length bytes + N payload bytes"
//! primitive (see [`read_frame`]/[`write_frame`]): a plain message frame, and a
//! service-response frame which additionally carries a leading success/failure byte
//! (see [`read_service_response_frame`]). The header block used during connection handshakes
//! is itself one length-prefixed frame whose payload is a concatenation of length-prefixed
//! `key=value` fields (see [`ConnectionHeader`]).

use crate::error::TcprosError;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

lazy_static! {
    static ref FIELD_RE: Regex = Regex::new(r"^\w+=[\s\S]+$").unwrap();
}

/// Reads one length-prefixed frame from `stream`.
///
/// Frame reassembly across arbitrary TCP chunk boundaries is handled by `read_exact`'s
/// internal retry loop: it only returns once the requested number of bytes have arrived,
/// regardless of how many individual `read()` syscalls that took, and returns `UnexpectedEof`
/// if the stream closes mid-frame.
///
/// Empty frames (length == 0) are valid and return `Ok(Vec::new())`, which callers must treat
/// as a "message received" event, not an error.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut payload).await?;
    }
    Ok(payload)
}

/// Writes `payload` as one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    payload: &[u8],
) -> std::io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame too large"))?;
    stream.write_all(&len.to_le_bytes()).await?;
    stream.write_all(payload).await?;
    Ok(())
}

/// Result of reading one service-response frame: `Ok(payload)` on success (status byte 1),
/// `Err(error_text)` on failure (status byte 0).
pub type ServiceResponseFrame = Result<Vec<u8>, String>;

/// Reads a service-response frame: status byte first, then the length-prefixed payload.
/// The status byte must be read before the length, not after (per the wire format).
pub async fn read_service_response_frame<R: AsyncRead + Unpin>(
    stream: &mut R,
) -> std::io::Result<ServiceResponseFrame> {
    let mut status = [0u8; 1];
    stream.read_exact(&mut status).await?;
    let payload = read_frame(stream).await?;
    if status[0] == 1 {
        Ok(Ok(payload))
    } else {
        let text = String::from_utf8_lossy(&payload).into_owned();
        Ok(Err(text))
    }
}

/// Writes a service-response frame.
pub async fn write_service_response_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    response: &ServiceResponseFrame,
) -> std::io::Result<()> {
    match response {
        Ok(payload) => {
            stream.write_all(&[1u8]).await?;
            write_frame(stream, payload).await
        }
        Err(message) => {
            stream.write_all(&[0u8]).await?;
            write_frame(stream, message.as_bytes()).await
        }
    }
}

/// The connection-header handshake block exchanged at the start of every TCPROS stream.
///
/// Field presence varies by connection kind: `topic` is set for pub/sub connections,
/// `service` for service connections; `latching`/`persistent`/`tcp_nodelay` are booleans
/// encoded as the literal string `"1"` when present at all (ROS convention — absence means
/// false, the value itself is never checked).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionHeader {
    pub caller_id: String,
    pub topic: Option<String>,
    pub service: Option<String>,
    pub topic_type: String,
    pub md5sum: Option<String>,
    pub message_definition: String,
    pub latching: bool,
    pub persistent: bool,
    pub tcp_nodelay: bool,
    pub error: Option<String>,
}

impl ConnectionHeader {
    /// Encodes this header into the length-prefixed frame format used on the wire.
    pub fn to_bytes(&self) -> std::io::Result<Vec<u8>> {
        let mut fields = Vec::new();
        fields.push(format!("callerid={}", self.caller_id));
        if let Some(md5) = &self.md5sum {
            fields.push(format!("md5sum={md5}"));
        }
        if let Some(topic) = &self.topic {
            fields.push(format!("topic={topic}"));
        }
        if let Some(service) = &self.service {
            fields.push(format!("service={service}"));
        }
        if !self.topic_type.is_empty() {
            fields.push(format!("type={}", self.topic_type));
        }
        if !self.message_definition.is_empty() {
            fields.push(format!("message_definition={}", self.message_definition));
        }
        if self.latching {
            fields.push("latching=1".to_string());
        }
        if self.persistent {
            fields.push("persistent=1".to_string());
        }
        if self.tcp_nodelay {
            fields.push("tcp_nodelay=1".to_string());
        }
        if let Some(error) = &self.error {
            fields.push(format!("error={error}"));
        }

        let mut body = Vec::new();
        for field in fields {
            let bytes = field.into_bytes();
            body.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            body.extend_from_slice(&bytes);
        }
        Ok(body)
    }

    /// Writes this header as a full frame (length-prefixed outer block containing the
    /// length-prefixed fields produced by [`Self::to_bytes`]).
    pub async fn write<W: AsyncWrite + Unpin>(&self, stream: &mut W) -> std::io::Result<()> {
        let body = self.to_bytes()?;
        write_frame(stream, &body).await
    }

    /// Reads and parses one connection-header frame from `stream`.
    pub async fn read<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Self, TcprosError> {
        let body = read_frame(stream).await?;
        Self::from_bytes(&body)
    }

    /// Parses a header from the raw (already outer-frame-stripped) field block.
    pub fn from_bytes(body: &[u8]) -> Result<Self, TcprosError> {
        let mut cursor = &body[..];
        let mut fields: HashMap<String, String> = HashMap::new();
        while !cursor.is_empty() {
            if cursor.len() < 4 {
                return Err(TcprosError::MalformedField(
                    "truncated field length prefix".to_string(),
                ));
            }
            let (len_bytes, rest) = cursor.split_at(4);
            let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
            if rest.len() < len {
                return Err(TcprosError::MalformedField(
                    "truncated field payload".to_string(),
                ));
            }
            let (field_bytes, rest) = rest.split_at(len);
            let field = String::from_utf8_lossy(field_bytes).into_owned();
            if !FIELD_RE.is_match(&field) {
                return Err(TcprosError::MalformedField(field));
            }
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| TcprosError::MalformedField(field.clone()))?;
            fields.insert(key.to_string(), value.to_string());
            cursor = rest;
        }

        Ok(ConnectionHeader {
            caller_id: fields.get("callerid").cloned().unwrap_or_default(),
            topic: fields.get("topic").cloned(),
            service: fields.get("service").cloned(),
            topic_type: fields.get("type").cloned().unwrap_or_default(),
            md5sum: fields.get("md5sum").cloned(),
            message_definition: fields.get("message_definition").cloned().unwrap_or_default(),
            latching: fields.get("latching").map(|v| v == "1").unwrap_or(false),
            persistent: fields.get("persistent").map(|v| v == "1").unwrap_or(false),
            tcp_nodelay: fields.get("tcp_nodelay").map(|v| v == "1").unwrap_or(false),
            error: fields.get("error").cloned(),
        })
    }

    /// `true` if `md5sum` is absent, `"*"`, or equal to `expected` — the handshake's
    /// "accept any" compatibility rule used by introspection tools like `rostopic echo`.
    pub fn md5_compatible(&self, expected: &str) -> bool {
        match &self.md5sum {
            None => true,
            Some(md5) => md5 == "*" || md5 == expected,
        }
    }

    /// `true` if `topic_type` is `"*"` or equal to `expected`.
    pub fn type_compatible(&self, expected: &str) -> bool {
        self.topic_type == "*" || self.topic_type == expected
    }
}

/// Reads a connection header, returning a [`TcprosError::PeerError`] if the peer's header
/// itself carried an `error` field (used right after a handshake response is read).
pub async fn receive_header<R: AsyncRead + Unpin>(
    stream: &mut R,
) -> Result<ConnectionHeader, TcprosError> {
    let header = ConnectionHeader::read(stream).await?;
    if let Some(error) = &header.error {
        return Err(TcprosError::PeerError(error.clone()));
    }
    Ok(header)
}

/// The `requestTopic` negotiation header a UDPROS connection would use in place of
/// [`ConnectionHeader`]'s TCPROS fields. Only the header shape is modeled: no UDP socket, no
/// packet-fragmentation/reassembly layer, and no producer/subscriber engine consume this type
/// today. `Publisher`/`Subscriber` negotiate TCPROS exclusively (see `requestTopic` in
/// `node::slave_api`), which is the only protocol `rostopic`/`roscpp`/`rospy` peers expect
/// from this crate in practice.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UdprosHeader {
    pub caller_id: String,
    pub topic: String,
    pub topic_type: String,
    pub md5sum: String,
    pub message_definition: String,
}

impl UdprosHeader {
    /// Encodes the `["UDPROS", address, port, type, md5sum, message_definition]` tuple
    /// `requestTopic` would return for a UDPROS-negotiated connection.
    pub fn to_protocol_params(&self, address: &str, port: u16) -> Vec<serde_xmlrpc::Value> {
        use serde_xmlrpc::Value;
        vec![
            Value::String("UDPROS".to_string()),
            Value::String(address.to_string()),
            Value::Int(i32::from(port)),
            Value::String(self.topic_type.clone()),
            Value::String(self.md5sum.clone()),
            Value::String(self.message_definition.clone()),
        ]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello world").await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let out = read_frame(&mut cursor).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn empty_frame_roundtrips_to_empty_vec() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"").await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let out = read_frame(&mut cursor).await.unwrap();
        assert_eq!(out, Vec::<u8>::new());
    }

    #[tokio::test]
    async fn frame_reassembles_across_partial_reads() {
        // Simulate a stream that only yields the frame in 1-byte chunks at a time by
        // wrapping the buffer in a reader that tokio will call read() on repeatedly;
        // Cursor already exercises this since read_exact loops until satisfied.
        let mut buf = Vec::new();
        write_frame(&mut buf, b"chunked-payload").await.unwrap();
        // Split into two reads glued back together via chain to emulate separate TCP reads.
        let (a, b) = buf.split_at(3);
        let mut chained = std::io::Cursor::new(a.to_vec()).chain(std::io::Cursor::new(b.to_vec()));
        let out = read_frame(&mut chained).await.unwrap();
        assert_eq!(out, b"chunked-payload");
    }

    #[tokio::test]
    async fn service_response_success_then_failure() {
        let mut buf = Vec::new();
        write_service_response_frame(&mut buf, &Ok(b"result".to_vec()))
            .await
            .unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let out = read_service_response_frame(&mut cursor).await.unwrap();
        assert_eq!(out, Ok(b"result".to_vec()));

        let mut buf = Vec::new();
        write_service_response_frame(&mut buf, &Err("bad request".to_string()))
            .await
            .unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let out = read_service_response_frame(&mut cursor).await.unwrap();
        assert_eq!(out, Err("bad request".to_string()));
    }

    #[tokio::test]
    async fn connection_header_roundtrip() {
        let header = ConnectionHeader {
            caller_id: "/talker".to_string(),
            topic: Some("/chatter".to_string()),
            service: None,
            topic_type: "std_msgs/String".to_string(),
            md5sum: Some("992ce8a1687cec8c8bd883ec73ca41d1".to_string()),
            message_definition: "string data".to_string(),
            latching: true,
            persistent: false,
            tcp_nodelay: true,
            error: None,
        };
        let mut buf = Vec::new();
        header.write(&mut buf).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let decoded = ConnectionHeader::read(&mut cursor).await.unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn udpros_header_encodes_protocol_tuple() {
        let header = UdprosHeader {
            caller_id: "/talker".to_string(),
            topic: "/chatter".to_string(),
            topic_type: "std_msgs/String".to_string(),
            md5sum: "992ce8a1687cec8c8bd883ec73ca41d1".to_string(),
            message_definition: "string data".to_string(),
        };
        let params = header.to_protocol_params("127.0.0.1", 8000);
        assert_eq!(params[0], serde_xmlrpc::Value::String("UDPROS".to_string()));
        assert_eq!(params[2], serde_xmlrpc::Value::Int(8000));
    }

    #[test]
    fn rejects_malformed_field() {
        // Field with no '=' at all.
        let mut body = Vec::new();
        let bad = b"not_a_field";
        body.extend_from_slice(&(bad.len() as u32).to_le_bytes());
        body.extend_from_slice(bad);
        let result = ConnectionHeader::from_bytes(&body);
        assert!(result.is_err());
    }

    #[test]
    fn md5_and_type_wildcards_are_compatible() {
        let mut header = ConnectionHeader::default();
        header.md5sum = Some("*".to_string());
        header.topic_type = "*".to_string();
        assert!(header.md5_compatible("anything"));
        assert!(header.type_compatible("anything"));

        header.md5sum = None;
        assert!(header.md5_compatible("anything"));
    }
}
