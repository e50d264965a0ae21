use crate::bloom::{BloomError, BloomResult};
use roaring::RoaringTreemap;
use sha2::{Digest, Sha256};
use std::f64::consts::LN_2;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// A single fixed-capacity bloom filter generation
///
/// Sizing follows the standard optimum for `max_n` elements at false-positive
/// rate `p`:
///
/// - `m = ceil(-max_n * ln(p) / ln(2)^2)` bits
/// - `k = max(1, round(m / max_n * ln(2)))` probes
///
/// Bits live in a [`RoaringTreemap`], so sparse generations stay small in memory
/// and on disk.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    max_n: u64,
    p: f64,
    p_digits: usize,
    n: u64,
    m: u64,
    k: u32,
    bits: RoaringTreemap,
}

impl BloomFilter {
    /// Creates an empty filter
    ///
    /// # Arguments
    ///
    /// * `max_n` - Capacity before `add` reports [`BloomError::Overflow`]
    /// * `p` - Target false-positive rate, in `(0, 1)`
    ///
    /// # Returns
    ///
    /// * `Ok(BloomFilter)` - The empty filter
    /// * `Err(BloomError::InvalidParameters)` - `max_n` is zero or `p` is out of range
    pub fn new(max_n: u64, p: f64) -> BloomResult<Self> {
        if max_n == 0 {
            return Err(BloomError::InvalidParameters(
                "max_n must be >= 1".to_string(),
            ));
        }

        if !(p > 0.0 && p < 1.0) {
            return Err(BloomError::InvalidParameters(format!(
                "p must be in (0, 1), got {}",
                p
            )));
        }

        let m = optimal_bit_count(max_n, p);

        Ok(Self {
            max_n,
            p,
            p_digits: decimal_digits(p),
            n: 0,
            m,
            k: optimal_hash_count(m, max_n),
            bits: RoaringTreemap::new(),
        })
    }

    /// Capacity of the filter
    pub fn max_n(&self) -> u64 {
        self.max_n
    }

    /// Target false-positive rate
    pub fn p(&self) -> f64 {
        self.p
    }

    /// Number of inserted elements (estimated after a load)
    pub fn len(&self) -> u64 {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Size of the bit array
    pub fn bit_len(&self) -> u64 {
        self.m
    }

    /// Number of probes per element
    pub fn hash_count(&self) -> u32 {
        self.k
    }

    /// Inserts one value
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The value is now represented
    /// * `Err(BloomError::Overflow)` - The filter already holds `max_n` elements
    /// * `Err(BloomError::ErrorRateExceeded)` - The estimated rate is above `p`
    pub fn add(&mut self, value: &[u8]) -> BloomResult<()> {
        self.add_many(&[value])
    }

    /// Inserts a batch of values
    ///
    /// Bounds are checked for the whole batch before any bit is set, so a failed
    /// call leaves the filter unchanged.
    pub fn add_many(&mut self, values: &[&[u8]]) -> BloomResult<()> {
        self.check_bounds(values.len() as u64)?;

        for value in values {
            let positions: Vec<u64> = self.probes(value).collect();
            self.bits.extend(positions);
        }

        self.n += values.len() as u64;
        Ok(())
    }

    /// True if every probe position of `value` is set
    pub fn contains(&self, value: &[u8]) -> bool {
        self.probes(value).all(|bit| self.bits.contains(bit))
    }

    /// Estimated false-positive rate at the current fill
    ///
    /// Computed as `(1 - e^(-k(n + 0.5)/(m - 1)))^k` and rounded at the decimal
    /// precision of `p`, so integer rounding of `k` alone never trips the bound.
    pub fn current_error_rate(&self) -> f64 {
        let k = self.k as f64;
        let m = (self.m.max(2) - 1) as f64;
        let raw = (1.0 - (-k * (self.n as f64 + 0.5) / m).exp()).powf(k);
        let scale = 10f64.powi(self.p_digits as i32);
        (raw * scale).round() / scale
    }

    fn check_bounds(&self, incoming: u64) -> BloomResult<()> {
        if self.n.saturating_add(incoming) > self.max_n {
            return Err(BloomError::Overflow { max_n: self.max_n });
        }

        let current = self.current_error_rate();
        if current > self.p {
            return Err(BloomError::ErrorRateExceeded {
                current,
                target: self.p,
            });
        }

        Ok(())
    }

    /// Probe positions: a SHA-256 digest split into two 64-bit halves, combined
    /// with a triangular-number step so consecutive probes never collapse onto
    /// one arithmetic progression
    fn probes(&self, value: &[u8]) -> impl Iterator<Item = u64> {
        let digest = Sha256::digest(value);
        let mut upper = [0u8; 8];
        let mut lower = [0u8; 8];
        upper.copy_from_slice(&digest[0..8]);
        lower.copy_from_slice(&digest[8..16]);
        let upper = u64::from_be_bytes(upper);
        let lower = u64::from_be_bytes(lower);
        let m = self.m;

        (0..self.k as u64).map(move |i| {
            let triangular = i.wrapping_mul(i + 1) / 2;
            lower
                .wrapping_add(i.wrapping_mul(upper))
                .wrapping_add(triangular)
                % m
        })
    }

    /// Serializes the filter
    ///
    /// Format: `max_n` and `p` as newline-terminated decimal lines (`p` at its
    /// original precision), followed by the portable roaring bitmap encoding.
    pub fn write_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writeln!(writer, "{}", self.max_n)?;
        writeln!(writer, "{:.*}", self.p_digits, self.p)?;
        self.bits.serialize_into(&mut writer)?;
        writer.flush()
    }

    /// Restores a filter written by [`BloomFilter::write_to`]
    ///
    /// The element count is not stored; it is estimated from the number of set bits.
    pub fn read_from<R: Read>(reader: R, origin: &Path) -> BloomResult<Self> {
        let malformed = |reason: String| BloomError::Malformed {
            path: origin.to_path_buf(),
            reason,
        };

        let mut reader = BufReader::new(reader);
        let max_n: u64 = read_line(&mut reader, origin)?
            .parse()
            .map_err(|e| malformed(format!("bad max_n: {}", e)))?;
        let p: f64 = read_line(&mut reader, origin)?
            .parse()
            .map_err(|e| malformed(format!("bad p: {}", e)))?;

        let mut filter = Self::new(max_n, p)?;
        filter.bits = RoaringTreemap::deserialize_from(&mut reader)
            .map_err(|e| malformed(format!("bad bitmap: {}", e)))?;
        filter.n = filter.estimate_count();

        Ok(filter)
    }

    /// Writes the filter to `path` through a temporary file and a rename
    pub fn save(&self, path: &Path) -> BloomResult<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(BloomError::io(parent))?;
        }

        let file = fs::File::create(&tmp).map_err(BloomError::io(&tmp))?;
        self.write_to(BufWriter::new(file))
            .map_err(BloomError::io(&tmp))?;
        fs::rename(&tmp, path).map_err(BloomError::io(path))?;

        tracing::debug!("Saved bloom filter to {}", path.display());
        Ok(())
    }

    /// Loads a filter saved with [`BloomFilter::save`]
    pub fn load(path: &Path) -> BloomResult<Self> {
        let file = fs::File::open(path).map_err(BloomError::io(path))?;
        Self::read_from(file, path)
    }

    fn estimate_count(&self) -> u64 {
        let set = self.bits.len() as f64;
        let m = self.m as f64;

        if set >= m {
            return self.max_n;
        }

        let estimate = -(m / self.k as f64) * (1.0 - set / m).ln();
        (estimate.round() as u64).min(self.max_n)
    }
}

fn read_line<R: BufRead>(reader: &mut R, origin: &Path) -> BloomResult<String> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(BloomError::io(origin))?;

    if !line.ends_with('\n') {
        return Err(BloomError::Malformed {
            path: origin.to_path_buf(),
            reason: "truncated header".to_string(),
        });
    }

    Ok(line.trim_end().to_string())
}

/// Optimal bit-array size for `n` elements at false-positive rate `p`
pub(crate) fn optimal_bit_count(n: u64, p: f64) -> u64 {
    let m = -(n as f64) * p.ln() / (LN_2 * LN_2);
    (m.ceil() as u64).max(1)
}

/// Optimal probe count for a bit array of size `m` holding `n` elements
pub(crate) fn optimal_hash_count(m: u64, n: u64) -> u32 {
    let k = (m as f64 / n as f64) * LN_2;
    (k.round() as u32).max(1)
}

/// Number of digits after the decimal point in the shortest form of `p`
fn decimal_digits(p: f64) -> usize {
    let text = format!("{}", p);
    text.split_once('.')
        .map(|(_, frac)| frac.len())
        .unwrap_or(0)
        .min(17)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_standard_sizing() {
        // 1000 elements at 1% needs ~9586 bits and 7 probes
        let filter = BloomFilter::new(1000, 0.01).unwrap();
        assert_eq!(filter.bit_len(), 9586);
        assert_eq!(filter.hash_count(), 7);
    }

    #[test]
    fn test_sizing_grows_as_p_shrinks() {
        let loose = BloomFilter::new(1000, 0.1).unwrap();
        let tight = BloomFilter::new(1000, 0.0001).unwrap();
        assert!(tight.bit_len() > loose.bit_len() * 3);
        assert!(tight.hash_count() > loose.hash_count());
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(BloomFilter::new(0, 0.1).is_err());
        assert!(BloomFilter::new(10, 0.0).is_err());
        assert!(BloomFilter::new(10, 1.0).is_err());
    }

    #[test]
    fn test_no_false_negatives() {
        let mut filter = BloomFilter::new(5000, 0.01).unwrap();
        let values: Vec<String> = (0..5000).map(|i| format!("https://example.com/{}", i)).collect();

        for value in &values {
            filter.add(value.as_bytes()).unwrap();
        }

        for value in &values {
            assert!(filter.contains(value.as_bytes()), "missing {}", value);
        }
        assert_eq!(filter.len(), 5000);
    }

    #[test]
    fn test_false_positive_rate_is_bounded() {
        let mut filter = BloomFilter::new(2000, 0.01).unwrap();
        for i in 0..2000 {
            filter.add(format!("in-{}", i).as_bytes()).unwrap();
        }

        let false_positives = (0..10_000)
            .filter(|i| filter.contains(format!("out-{}", i).as_bytes()))
            .count();

        // Generous bound: five times the target rate
        assert!(false_positives < 500, "{} false positives", false_positives);
    }

    #[test]
    fn test_overflow_on_excess_insert() {
        let mut filter = BloomFilter::new(2, 0.1).unwrap();
        filter.add(b"a").unwrap();
        filter.add(b"b").unwrap();

        let err = filter.add(b"c").unwrap_err();
        assert!(matches!(err, BloomError::Overflow { max_n: 2 }));
        assert_eq!(filter.len(), 2);
    }

    #[test]
    fn test_batch_overflow_sets_nothing() {
        let mut filter = BloomFilter::new(2, 0.1).unwrap();
        let err = filter
            .add_many(&[b"a".as_slice(), b"b".as_slice(), b"c".as_slice()])
            .unwrap_err();

        assert!(err.is_capacity());
        assert!(filter.is_empty());
        assert!(!filter.contains(b"a"));
    }

    #[test]
    fn test_error_rate_stays_under_target_until_capacity() {
        let mut filter = BloomFilter::new(100, 0.1).unwrap();
        for i in 0..100 {
            filter.add(format!("{}", i).as_bytes()).unwrap();
        }
        assert!(filter.current_error_rate() <= 0.11);
    }

    #[test]
    fn test_decimal_digits() {
        assert_eq!(decimal_digits(0.1), 1);
        assert_eq!(decimal_digits(0.01), 2);
        assert_eq!(decimal_digits(0.0001), 4);
        assert_eq!(decimal_digits(0.25), 2);
    }

    #[test]
    fn test_header_format() {
        let filter = BloomFilter::new(42, 0.05).unwrap();
        let mut buffer = Vec::new();
        filter.write_to(&mut buffer).unwrap();

        assert!(buffer.starts_with(b"42\n0.05\n"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gen0.bloom");

        let mut filter = BloomFilter::new(1000, 0.01).unwrap();
        for i in 0..300 {
            filter.add(format!("v{}", i).as_bytes()).unwrap();
        }
        filter.save(&path).unwrap();

        let loaded = BloomFilter::load(&path).unwrap();
        assert_eq!(loaded.max_n(), 1000);
        assert!((loaded.p() - 0.01).abs() < f64::EPSILON);
        assert_eq!(loaded.bit_len(), filter.bit_len());
        for i in 0..300 {
            assert!(loaded.contains(format!("v{}", i).as_bytes()));
        }

        // The count is estimated from set bits
        let estimate = loaded.len() as i64;
        assert!((estimate - 300).abs() < 30, "estimate {}", estimate);
    }

    #[test]
    fn test_load_truncated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.bloom");
        fs::write(&path, b"100").unwrap();

        assert!(matches!(
            BloomFilter::load(&path),
            Err(BloomError::Malformed { .. })
        ));
    }
}
