//! Trace identity and the W3C `traceparent`/baggage wire format.

use std::collections::HashMap;

use arrayvec::ArrayVec;
use rand::RngCore;

use crate::error::{Error, Result};

/// 128-bit trace identifier, never all-zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(pub [u8; 16]);

/// 64-bit span identifier, never all-zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub [u8; 8]);

const HEX: &[u8; 16] = b"0123456789abcdef";

fn encode_hex<const N: usize, const OUT: usize>(bytes: &[u8; N]) -> ArrayVec<u8, OUT> {
    let mut out = ArrayVec::new();
    for b in bytes {
        out.push(HEX[(b >> 4) as usize]);
        out.push(HEX[(b & 0x0f) as usize]);
    }
    out
}

fn decode_hex<const N: usize>(s: &str) -> Result<[u8; N]> {
    let bytes = s.as_bytes();
    if bytes.len() != N * 2 {
        return Err(Error::new(
            crate::error::ErrorKind::InvalidConfiguration,
            format!("expected {} hex chars, got {}", N * 2, bytes.len()),
        ));
    }
    let mut out = [0u8; N];
    for i in 0..N {
        let hi = hex_val(bytes[i * 2])?;
        let lo = hex_val(bytes[i * 2 + 1])?;
        out[i] = (hi << 4) | lo;
    }
    Ok(out)
}

fn hex_val(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::new(
            crate::error::ErrorKind::InvalidConfiguration,
            "invalid hex digit in traceparent",
        )),
    }
}

impl TraceId {
    /// 128 random bits, resampled until non-zero.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let mut bytes = [0u8; 16];
            rng.fill_bytes(&mut bytes);
            if bytes != [0u8; 16] {
                return Self(bytes);
            }
        }
    }

    pub fn to_hex(self) -> String {
        let buf: ArrayVec<u8, 32> = encode_hex(&self.0);
        String::from_utf8(buf.into_iter().collect()).expect("hex is always valid utf8")
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes: [u8; 16] = decode_hex(s)?;
        if bytes == [0u8; 16] {
            return Err(Error::new(
                crate::error::ErrorKind::InvalidConfiguration,
                "trace_id must not be all-zero",
            ));
        }
        Ok(Self(bytes))
    }
}

impl SpanId {
    /// 64 random bits, resampled until non-zero.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let mut bytes = [0u8; 8];
            rng.fill_bytes(&mut bytes);
            if bytes != [0u8; 8] {
                return Self(bytes);
            }
        }
    }

    pub fn to_hex(self) -> String {
        let buf: ArrayVec<u8, 16> = encode_hex(&self.0);
        String::from_utf8(buf.into_iter().collect()).expect("hex is always valid utf8")
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes: [u8; 8] = decode_hex(s)?;
        if bytes == [0u8; 8] {
            return Err(Error::new(
                crate::error::ErrorKind::InvalidConfiguration,
                "span_id must not be all-zero",
            ));
        }
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for SpanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Propagatable trace identity: trace/span id, flags, and baggage, extracted
/// from or injected into a span (§4.9).
#[derive(Clone, Debug)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub trace_flags: u8,
    pub baggage: HashMap<String, String>,
}

const BAGGAGE_PREFIX: &str = "baggage-";

impl TraceContext {
    /// `"00-<32 hex>-<16 hex>-<2 hex>"`.
    pub fn to_w3c(&self) -> String {
        format!(
            "00-{}-{}-{:02x}",
            self.trace_id.to_hex(),
            self.span_id.to_hex(),
            self.trace_flags
        )
    }

    /// Parses a `traceparent` header value. Exactly four dash-separated
    /// fields are required; the version must be `00`.
    pub fn from_w3c(traceparent: &str) -> Result<(TraceId, SpanId, u8)> {
        let parts: Vec<&str> = traceparent.split('-').collect();
        if parts.len() != 4 {
            return Err(Error::new(
                crate::error::ErrorKind::InvalidConfiguration,
                "traceparent must have exactly four dash-separated fields",
            ));
        }
        if parts[0] != "00" {
            return Err(Error::new(
                crate::error::ErrorKind::InvalidConfiguration,
                "unsupported traceparent version",
            ));
        }
        let trace_id = TraceId::from_hex(parts[1])?;
        let span_id = SpanId::from_hex(parts[2])?;
        if parts[3].len() != 2 {
            return Err(Error::new(
                crate::error::ErrorKind::InvalidConfiguration,
                "trace flags must be exactly two hex chars",
            ));
        }
        let flags_bytes: [u8; 1] = decode_hex(parts[3])?;
        Ok((trace_id, span_id, flags_bytes[0]))
    }

    /// Writes `traceparent` and one `baggage-<k>` entry per baggage pair.
    pub fn inject(&self, carrier: &mut HashMap<String, String>) {
        let _ = carrier.insert("traceparent".to_string(), self.to_w3c());
        for (k, v) in &self.baggage {
            let _ = carrier.insert(format!("{BAGGAGE_PREFIX}{k}"), v.clone());
        }
    }

    /// Parses `traceparent` and collects all `baggage-*` entries.
    pub fn extract(carrier: &HashMap<String, String>) -> Result<Self> {
        let traceparent = carrier.get("traceparent").ok_or_else(|| {
            Error::new(
                crate::error::ErrorKind::NotFound,
                "carrier is missing traceparent",
            )
        })?;
        let (trace_id, span_id, trace_flags) = Self::from_w3c(traceparent)?;
        let baggage = carrier
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(BAGGAGE_PREFIX)
                    .map(|key| (key.to_string(), v.clone()))
            })
            .collect();
        Ok(Self {
            trace_id,
            span_id,
            trace_flags,
            baggage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // S3 from spec.md §8.
    #[test]
    fn scenario_s3_w3c_round_trip() {
        let ctx = TraceContext {
            trace_id: TraceId::from_hex("0af7651916cd43dd8448eb211c80319c").unwrap(),
            span_id: SpanId::from_hex("b7ad6b7169203331").unwrap(),
            trace_flags: 0x01,
            baggage: HashMap::new(),
        };
        assert_eq!(
            ctx.to_w3c(),
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
        );
        let (trace_id, span_id, flags) = TraceContext::from_w3c(&ctx.to_w3c()).unwrap();
        assert_eq!(trace_id, ctx.trace_id);
        assert_eq!(span_id, ctx.span_id);
        assert_eq!(flags, ctx.trace_flags);
    }

    #[test]
    fn malformed_traceparent_is_rejected() {
        assert!(TraceContext::from_w3c("not-enough-fields").is_err());
        assert!(TraceContext::from_w3c("01-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01").is_err());
    }

    #[test]
    fn generated_ids_are_never_zero() {
        for _ in 0..100 {
            assert_ne!(TraceId::generate().0, [0u8; 16]);
            assert_ne!(SpanId::generate().0, [0u8; 8]);
        }
    }

    #[test]
    fn baggage_round_trips_through_carrier() {
        let mut baggage = HashMap::new();
        let _ = baggage.insert("user_id".to_string(), "42".to_string());
        let ctx = TraceContext {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
            trace_flags: 0,
            baggage: baggage.clone(),
        };
        let mut carrier = HashMap::new();
        ctx.inject(&mut carrier);
        let extracted = TraceContext::extract(&carrier).unwrap();
        assert_eq!(extracted.baggage, baggage);
        assert_eq!(extracted.trace_id, ctx.trace_id);
    }
}
