//! Interaction codec
//!
//! Payload layout (little-endian):
//!
//! ```text
//! u64 sequence
//! request:  u16 method_len, method, u32 target_len, target, headers, u32 body_len, body
//! response: u16 status, u16 reason_len, reason, headers, u32 body_len, body
//! headers:  u16 count, then per entry u16 name_len, name, u32 value_len, value
//! ```

use bytes::{BufMut, Bytes};

use crate::interaction::{Headers, Interaction, RequestSnapshot, ResponseSnapshot};
use crate::{PlaybackError, Result};

const U16_LIMIT: usize = u16::MAX as usize;
const U32_LIMIT: usize = u32::MAX as usize;

/// Encode one interaction into a payload
///
/// # Errors
///
/// Returns `DataTooLarge` if a field does not fit its length prefix
pub fn encode(interaction: &Interaction) -> Result<Vec<u8>> {
    validate(interaction)?;

    let mut data = Vec::with_capacity(encoded_len(interaction));
    data.put_u64_le(interaction.sequence);

    let request = &interaction.request;
    put_str16(&mut data, &request.method);
    put_bytes32(&mut data, request.target.as_bytes());
    put_headers(&mut data, &request.headers);
    put_bytes32(&mut data, &request.body);

    let response = &interaction.response;
    data.put_u16_le(response.status);
    put_str16(&mut data, &response.reason);
    put_headers(&mut data, &response.headers);
    put_bytes32(&mut data, &response.body);

    Ok(data)
}

/// Decode a payload produced by [`encode`]
///
/// # Errors
///
/// Returns `Decode` with the offending offset if the payload is malformed
pub fn decode(data: &[u8]) -> Result<Interaction> {
    decode_at(data, 0)
}

/// Decode a payload that starts at absolute offset `base` of a larger stream
pub(crate) fn decode_at(data: &[u8], base: usize) -> Result<Interaction> {
    let mut reader = PayloadReader {
        data,
        pos: 0,
        base,
    };

    let sequence = reader.u64("sequence")?;

    let method = reader.str16("request method")?;
    let target = reader.str32("request target")?;
    let headers = reader.headers("request")?;
    let body = reader.bytes32("request body")?;
    let request = RequestSnapshot {
        method,
        target,
        headers,
        body,
    };

    let status = reader.u16("response status")?;
    let reason = reader.str16("response reason")?;
    let headers = reader.headers("response")?;
    let body = reader.bytes32("response body")?;
    let response = ResponseSnapshot {
        status,
        reason,
        headers,
        body,
    };

    if reader.pos != data.len() {
        return Err(reader.error(format!(
            "{} trailing bytes after interaction",
            data.len() - reader.pos
        )));
    }

    Ok(Interaction {
        sequence,
        request,
        response,
    })
}

/// Check that every field fits its length prefix
///
/// # Errors
///
/// Returns `DataTooLarge` for the first field that does not fit
pub fn validate(interaction: &Interaction) -> Result<()> {
    let request = &interaction.request;
    let response = &interaction.response;

    check_len(request.method.len(), U16_LIMIT)?;
    check_len(request.target.len(), U32_LIMIT)?;
    check_headers(&request.headers)?;
    check_len(request.body.len(), U32_LIMIT)?;

    check_len(response.reason.len(), U16_LIMIT)?;
    check_headers(&response.headers)?;
    check_len(response.body.len(), U32_LIMIT)?;

    Ok(())
}

fn check_headers(headers: &Headers) -> Result<()> {
    check_len(headers.len(), U16_LIMIT)?;
    for (name, value) in headers.iter() {
        check_len(name.len(), U16_LIMIT)?;
        check_len(value.len(), U32_LIMIT)?;
    }
    Ok(())
}

fn check_len(size: usize, limit: usize) -> Result<()> {
    if size > limit {
        return Err(PlaybackError::DataTooLarge { size, limit });
    }
    Ok(())
}

fn encoded_len(interaction: &Interaction) -> usize {
    let headers_len = |headers: &Headers| {
        2 + headers
            .iter()
            .map(|(n, v)| 2 + n.len() + 4 + v.len())
            .sum::<usize>()
    };
    let request = &interaction.request;
    let response = &interaction.response;

    8 + 2
        + request.method.len()
        + 4
        + request.target.len()
        + headers_len(&request.headers)
        + 4
        + request.body.len()
        + 2
        + 2
        + response.reason.len()
        + headers_len(&response.headers)
        + 4
        + response.body.len()
}

fn put_str16(data: &mut Vec<u8>, value: &str) {
    data.put_u16_le(value.len() as u16);
    data.put_slice(value.as_bytes());
}

fn put_bytes32(data: &mut Vec<u8>, value: &[u8]) {
    data.put_u32_le(value.len() as u32);
    data.put_slice(value);
}

fn put_headers(data: &mut Vec<u8>, headers: &Headers) {
    data.put_u16_le(headers.len() as u16);
    for (name, value) in headers.iter() {
        put_str16(data, name);
        put_bytes32(data, value);
    }
}

/// Bounds-checked cursor over one payload
struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> PayloadReader<'a> {
    fn error(&self, reason: String) -> PlaybackError {
        PlaybackError::decode(self.base + self.pos, reason)
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        let remaining = self.data.len() - self.pos;
        if len > remaining {
            return Err(self.error(format!(
                "{field}: need {len} bytes, only {remaining} left"
            )));
        }
        let data: &'a [u8] = self.data;
        let slice = &data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u16(&mut self, field: &str) -> Result<u16> {
        let raw = self.take(2, field)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self, field: &str) -> Result<u32> {
        let raw = self.take(4, field)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64(&mut self, field: &str) -> Result<u64> {
        let raw = self.take(8, field)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    fn utf8(&mut self, len: usize, field: &str) -> Result<String> {
        let start = self.pos;
        let raw = self.take(len, field)?;
        String::from_utf8(raw.to_vec()).map_err(|e| {
            PlaybackError::decode(self.base + start, format!("{field}: invalid UTF-8: {e}"))
        })
    }

    fn str16(&mut self, field: &str) -> Result<String> {
        let len = self.u16(field)? as usize;
        self.utf8(len, field)
    }

    fn str32(&mut self, field: &str) -> Result<String> {
        let len = self.u32(field)? as usize;
        self.utf8(len, field)
    }

    fn bytes32(&mut self, field: &str) -> Result<Bytes> {
        let len = self.u32(field)? as usize;
        Ok(Bytes::copy_from_slice(self.take(len, field)?))
    }

    fn headers(&mut self, side: &str) -> Result<Headers> {
        let count = self.u16(&format!("{side} header count"))?;
        let mut headers = Headers::new();
        for i in 0..count {
            let name = self.str16(&format!("{side} header {i} name"))?;
            let value = self.bytes32(&format!("{side} header {i} value"))?;
            headers.append(name, value);
        }
        Ok(headers)
    }
}
