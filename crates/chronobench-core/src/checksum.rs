use sha2::{Digest, Sha256};

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Computes the content checksum identifying a benchmark definition.
///
/// The checksum is taken over a canonical serialization of the defining
/// code, not over an in-memory object: the name and description may change
/// freely without changing the benchmark's identity.
pub fn benchmark_checksum(code: &str, setup: Option<&str>) -> String {
    let parts = [
        format!("code={}", code),
        format!("setup={}", setup.unwrap_or("")),
    ];
    sha256_hex(&parts.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable() {
        let a = benchmark_checksum("x = sorted(data)", Some("data = range(100)"));
        let b = benchmark_checksum("x = sorted(data)", Some("data = range(100)"));
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_tracks_code_and_setup() {
        let base = benchmark_checksum("x = sorted(data)", None);
        assert_ne!(base, benchmark_checksum("x = list(data)", None));
        assert_ne!(base, benchmark_checksum("x = sorted(data)", Some("data = []")));
    }
}
