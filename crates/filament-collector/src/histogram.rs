//! Lazy latency histogram
//!
//! Samples are microseconds. Small buckets keep a raw value list; once
//! enough samples arrive the list converts to an HdrHistogram with two
//! significant figures (~1% relative precision at every magnitude, values
//! well past 10^12 us via auto-resize). Encodes to a compact tagged byte
//! buffer either way.

use filament_core::{Error, Result};
use hdrhistogram::serialization::{Deserializer, Serializer, V2Serializer};
use hdrhistogram::Histogram;

/// Raw values kept before converting to a real histogram. Most aggregate
/// buckets never see this many samples in one interval.
const RAW_VALUE_LIMIT: usize = 1024;

const SIGNIFICANT_FIGURES: u8 = 2;

const ENCODING_RAW: u8 = 0;
const ENCODING_HDR: u8 = 1;

/// Latency histogram with O(1) update and bounded memory.
#[derive(Debug, Clone)]
pub struct LazyHistogram {
    raw: Vec<u64>,
    histogram: Option<Histogram<u64>>,
}

impl Default for LazyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LazyHistogram {
    pub fn new() -> Self {
        LazyHistogram {
            raw: Vec::new(),
            histogram: None,
        }
    }

    /// Record one sample in microseconds.
    pub fn add(&mut self, value_micros: u64) {
        if let Some(histogram) = &mut self.histogram {
            histogram.saturating_record(value_micros);
            return;
        }
        self.raw.push(value_micros);
        if self.raw.len() >= RAW_VALUE_LIMIT {
            self.convert_to_histogram();
        }
    }

    /// Total recorded samples.
    pub fn len(&self) -> u64 {
        match &self.histogram {
            Some(histogram) => histogram.len(),
            None => self.raw.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge another histogram's samples into this one.
    pub fn merge(&mut self, other: &LazyHistogram) {
        match &other.histogram {
            Some(other_histogram) => {
                self.ensure_histogram();
                let histogram = self.histogram.as_mut().expect("just ensured");
                for value in other_histogram.iter_recorded() {
                    histogram
                        .record_n(value.value_iterated_to(), value.count_at_value())
                        .ok();
                }
            }
            None => {
                if other.raw.is_empty() {
                    return;
                }
                match &mut self.histogram {
                    Some(histogram) => {
                        for value in &other.raw {
                            histogram.saturating_record(*value);
                        }
                    }
                    None => {
                        self.raw.extend_from_slice(&other.raw);
                        if self.raw.len() >= RAW_VALUE_LIMIT {
                            self.convert_to_histogram();
                        }
                    }
                }
            }
        }
    }

    /// Value at a quantile in [0, 1]. Exact while in raw mode, ~1% after
    /// conversion.
    pub fn value_at_quantile(&self, quantile: f64) -> u64 {
        match &self.histogram {
            Some(histogram) => histogram.value_at_quantile(quantile),
            None => {
                if self.raw.is_empty() {
                    return 0;
                }
                let mut sorted = self.raw.clone();
                sorted.sort_unstable();
                let rank = (quantile * sorted.len() as f64).ceil() as usize;
                sorted[rank.clamp(1, sorted.len()) - 1]
            }
        }
    }

    /// Encode to a compact tagged byte buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        match &self.histogram {
            Some(histogram) => {
                buffer.push(ENCODING_HDR);
                V2Serializer::new()
                    .serialize(histogram, &mut buffer)
                    .map_err(|err| Error::Histogram(err.to_string()))?;
            }
            None => {
                buffer.push(ENCODING_RAW);
                buffer.extend_from_slice(&(self.raw.len() as u32).to_le_bytes());
                for value in &self.raw {
                    buffer.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
        Ok(buffer)
    }

    /// Decode a buffer produced by [`encode`](LazyHistogram::encode).
    pub fn decode(bytes: &[u8]) -> Result<LazyHistogram> {
        let (tag, mut payload) = bytes
            .split_first()
            .ok_or_else(|| Error::Histogram("empty histogram buffer".to_string()))?;
        match *tag {
            ENCODING_RAW => {
                if payload.len() < 4 {
                    return Err(Error::Histogram("truncated raw histogram".to_string()));
                }
                let count = u32::from_le_bytes(payload[..4].try_into().expect("length checked"));
                payload = &payload[4..];
                if payload.len() != count as usize * 8 {
                    return Err(Error::Histogram("truncated raw histogram".to_string()));
                }
                let raw = payload
                    .chunks_exact(8)
                    .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("chunk is 8 bytes")))
                    .collect();
                Ok(LazyHistogram {
                    raw,
                    histogram: None,
                })
            }
            ENCODING_HDR => {
                let histogram = Deserializer::new()
                    .deserialize(&mut payload)
                    .map_err(|err| Error::Histogram(err.to_string()))?;
                Ok(LazyHistogram {
                    raw: Vec::new(),
                    histogram: Some(histogram),
                })
            }
            other => Err(Error::Histogram(format!(
                "unknown histogram encoding tag: {other}"
            ))),
        }
    }

    fn ensure_histogram(&mut self) {
        if self.histogram.is_none() {
            self.convert_to_histogram();
        }
    }

    fn convert_to_histogram(&mut self) {
        let mut histogram =
            Histogram::<u64>::new(SIGNIFICANT_FIGURES).expect("valid significant figures");
        histogram.auto(true);
        for value in self.raw.drain(..) {
            histogram.saturating_record(value);
        }
        self.histogram = Some(histogram);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_mode_exact_quantiles() {
        let mut histogram = LazyHistogram::new();
        for value in [100, 200, 500] {
            histogram.add(value);
        }
        assert_eq!(histogram.len(), 3);
        assert_eq!(histogram.value_at_quantile(0.0), 100);
        assert_eq!(histogram.value_at_quantile(0.5), 200);
        assert_eq!(histogram.value_at_quantile(1.0), 500);
    }

    #[test]
    fn test_converts_after_raw_limit() {
        let mut histogram = LazyHistogram::new();
        for value in 0..2000u64 {
            histogram.add(value);
        }
        assert_eq!(histogram.len(), 2000);
        // ~1% precision after conversion
        let median = histogram.value_at_quantile(0.5) as f64;
        assert!((median - 1000.0).abs() < 25.0, "median was {median}");
    }

    #[test]
    fn test_large_values_supported() {
        let mut histogram = LazyHistogram::new();
        for _ in 0..RAW_VALUE_LIMIT {
            histogram.add(1_000_000_000_000);
        }
        let p50 = histogram.value_at_quantile(0.5) as f64;
        let relative_error = (p50 - 1e12).abs() / 1e12;
        assert!(relative_error < 0.02, "relative error {relative_error}");
    }

    #[test]
    fn test_encode_decode_raw_roundtrip() {
        let mut histogram = LazyHistogram::new();
        for value in [100, 200, 500] {
            histogram.add(value);
        }
        let bytes = histogram.encode().unwrap();
        let decoded = LazyHistogram::decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded.value_at_quantile(0.5), 200);
        assert_eq!(decoded.encode().unwrap(), bytes);
    }

    #[test]
    fn test_encode_decode_hdr_roundtrip() {
        let mut histogram = LazyHistogram::new();
        for value in 0..2000u64 {
            histogram.add(value);
        }
        let bytes = histogram.encode().unwrap();
        assert_eq!(bytes[0], ENCODING_HDR);
        let decoded = LazyHistogram::decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 2000);
        assert_eq!(decoded.encode().unwrap(), bytes);
    }

    #[test]
    fn test_merge_with_empty_is_identity() {
        let mut histogram = LazyHistogram::new();
        for value in [100, 200, 500] {
            histogram.add(value);
        }
        let before = histogram.encode().unwrap();
        histogram.merge(&LazyHistogram::new());
        assert_eq!(histogram.encode().unwrap(), before);
    }

    #[test]
    fn test_merge_combines_samples() {
        let mut left = LazyHistogram::new();
        left.add(100);
        let mut right = LazyHistogram::new();
        right.add(300);
        left.merge(&right);
        assert_eq!(left.len(), 2);
        assert_eq!(left.value_at_quantile(1.0), 300);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(LazyHistogram::decode(&[]).is_err());
        assert!(LazyHistogram::decode(&[9, 1, 2]).is_err());
        assert!(LazyHistogram::decode(&[0, 1, 0, 0, 0]).is_err());
    }
}
