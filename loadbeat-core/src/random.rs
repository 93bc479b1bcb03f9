//! Seedable random data for payload variation.
//!
//! Every virtual user owns a [`RandomSource`] derived from the run seed and
//! its VU id, so a seeded run draws the same values per VU no matter how the
//! scheduler interleaves them. A process-wide source is available through
//! [`with_global`] for code that runs outside a VU (setup, CLI helpers).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crate::error::{HarnessError, Result};

/// Default charset for [`RandomSource::string`]
pub const DEFAULT_CHARSET: &str = "abcdefghijklmnopqrstuvwxyz0123456789";

/// Domains used by [`RandomSource::email`]
pub const EMAIL_DOMAINS: [&str; 4] = ["example.com", "test.com", "mailinator.com", "local.test"];

const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const DIGITS: &str = "0123456789";
const SPECIALS: &str = "!@#$%^&*()-_=+[]{}|;:,.<>?";

/// Seed accepted by [`RandomSource::seed`]: a number or a numeric string
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeedInput<'a> {
    Number(f64),
    Text(&'a str),
    Absent,
}

impl From<u64> for SeedInput<'_> {
    fn from(value: u64) -> Self {
        SeedInput::Number(value as f64)
    }
}

impl From<i64> for SeedInput<'_> {
    fn from(value: i64) -> Self {
        SeedInput::Number(value as f64)
    }
}

impl From<f64> for SeedInput<'_> {
    fn from(value: f64) -> Self {
        SeedInput::Number(value)
    }
}

impl<'a> From<&'a str> for SeedInput<'a> {
    fn from(value: &'a str) -> Self {
        SeedInput::Text(value)
    }
}

impl<'a> From<Option<&'a str>> for SeedInput<'a> {
    fn from(value: Option<&'a str>) -> Self {
        value.map_or(SeedInput::Absent, SeedInput::Text)
    }
}

impl SeedInput<'_> {
    /// Resolve to a 64-bit seed, or `None` when the input is not numeric
    pub fn resolve(self) -> Option<u64> {
        let number = match self {
            SeedInput::Number(n) => n,
            SeedInput::Text(s) => s.trim().parse::<f64>().ok()?,
            SeedInput::Absent => return None,
        };
        if !number.is_finite() {
            return None;
        }
        if number.fract() == 0.0 && number >= 0.0 && number <= u64::MAX as f64 {
            Some(number as u64)
        } else {
            Some(number.to_bits())
        }
    }
}

/// A random number generator with the draw helpers journeys need
#[derive(Debug, Clone)]
pub struct RandomSource {
    rng: StdRng,
    seed: Option<u64>,
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource {
    /// Entropy-seeded source
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            seed: None,
        }
    }

    /// Deterministic source
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed: Some(seed),
        }
    }

    /// Source for one virtual user. Seeded runs mix the VU id into the run
    /// seed; unseeded runs branch off the process-wide source, so a prior
    /// [`seed`] call still makes them reproducible.
    pub fn for_vu(run_seed: Option<u64>, vu_id: u64) -> Self {
        match run_seed {
            Some(seed) => {
                Self::seeded(seed ^ vu_id.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
            }
            None => Self {
                rng: with_global(|global| StdRng::seed_from_u64(global.rng.gen())),
                seed: None,
            },
        }
    }

    /// Reseed from a number or numeric string. Returns false (and leaves the
    /// source untouched) for absent or non-numeric input.
    pub fn seed<'a>(&mut self, input: impl Into<SeedInput<'a>>) -> bool {
        match input.into().resolve() {
            Some(seed) => {
                self.rng = StdRng::seed_from_u64(seed);
                self.seed = Some(seed);
                true
            }
            None => false,
        }
    }

    pub fn current_seed(&self) -> Option<u64> {
        self.seed
    }

    /// Uniform integer in `[min, max]`
    pub fn int(&mut self, min: i64, max: i64) -> Result<i64> {
        if min > max {
            return Err(HarnessError::invalid_range(min, max));
        }
        Ok(self.rng.gen_range(min..=max))
    }

    /// Uniform float in `[min, max]`
    pub fn float(&mut self, min: f64, max: f64) -> Result<f64> {
        if !(min <= max) || !min.is_finite() || !max.is_finite() {
            return Err(HarnessError::invalid_range(min, max));
        }
        if min == max {
            return Ok(min);
        }
        if !(max - min).is_finite() {
            // Span overflows f64; interpolate so neither term does
            let t: f64 = self.rng.gen_range(0.0..=1.0);
            return Ok((min * (1.0 - t) + max * t).clamp(min, max));
        }
        Ok(self.rng.gen_range(min..=max))
    }

    /// `length` characters drawn uniformly from `charset` (lowercase
    /// alphanumeric when `None`)
    pub fn string(&mut self, length: usize, charset: Option<&str>) -> Result<String> {
        let chars: Vec<char> = charset.unwrap_or(DEFAULT_CHARSET).chars().collect();
        if length == 0 {
            return Ok(String::new());
        }
        if chars.is_empty() {
            return Err(HarnessError::EmptyInput("charset".to_string()));
        }
        Ok((0..length)
            .map(|_| chars[self.rng.gen_range(0..chars.len())])
            .collect())
    }

    /// Uniform pick from a non-empty slice
    pub fn item<'a, T>(&mut self, items: &'a [T]) -> Result<&'a T> {
        if items.is_empty() {
            return Err(HarnessError::EmptyInput("item list".to_string()));
        }
        Ok(&items[self.rng.gen_range(0..items.len())])
    }

    /// Pick proportionally to `weights`. A non-positive total weight picks
    /// the first item; NaN or infinite weights are rejected.
    pub fn weighted_pick<'a, T>(&mut self, items: &'a [T], weights: &[f64]) -> Result<&'a T> {
        if items.len() != weights.len() {
            return Err(HarnessError::LengthMismatch {
                left: items.len(),
                right: weights.len(),
            });
        }
        if items.is_empty() {
            return Err(HarnessError::EmptyInput("weighted items".to_string()));
        }

        if let Some((index, weight)) = weights.iter().enumerate().find(|(_, w)| !w.is_finite()) {
            return Err(HarnessError::InvalidWeight {
                index,
                weight: weight.to_string(),
            });
        }

        let mut scale = 1.0;
        let mut total: f64 = weights.iter().sum();
        if !total.is_finite() {
            // Finite weights whose sum overflows: pick on a scaled copy
            scale = weights.iter().fold(0.0_f64, |acc, w| acc.max(w.abs()));
            total = weights.iter().map(|w| w / scale).sum();
        }
        if !(total > 0.0) {
            return Ok(&items[0]);
        }

        let draw = self.rng.gen_range(0.0..=total);
        let mut cumulative = 0.0;
        for (item, weight) in items.iter().zip(weights) {
            cumulative += weight / scale;
            if draw <= cumulative {
                return Ok(item);
            }
        }
        Ok(&items[items.len() - 1])
    }

    /// Fisher–Yates permutation of a copy of `items`
    pub fn shuffle<T: Clone>(&mut self, items: &[T]) -> Vec<T> {
        let mut shuffled = items.to_vec();
        for i in (1..shuffled.len()).rev() {
            let j = self.rng.gen_range(0..=i);
            shuffled.swap(i, j);
        }
        shuffled
    }

    /// `<prefix>.<8 random chars>@<domain>`
    pub fn email(&mut self, prefix: &str) -> String {
        let local: String = {
            let chars: Vec<char> = DEFAULT_CHARSET.chars().collect();
            (0..8)
                .map(|_| chars[self.rng.gen_range(0..chars.len())])
                .collect()
        };
        let domain = EMAIL_DOMAINS[self.rng.gen_range(0..EMAIL_DOMAINS.len())];
        format!("{prefix}.{local}@{domain}")
    }

    /// International phone number like `+1-555-123-4567`
    pub fn phone(&mut self) -> String {
        let country = self.rng.gen_range(1..=999);
        let area = self.rng.gen_range(100..=999);
        let exchange = self.rng.gen_range(100..=999);
        let line = self.rng.gen_range(1000..=9999);
        format!("+{country}-{area}-{exchange}-{line}")
    }

    /// Password of at least 8 characters with upper, lower, digit and special
    pub fn strong_password(&mut self, length: usize) -> String {
        let length = length.max(8);
        let pick = |rng: &mut StdRng, set: &str| {
            let chars: Vec<char> = set.chars().collect();
            chars[rng.gen_range(0..chars.len())]
        };

        let mut password: Vec<char> = vec![
            pick(&mut self.rng, UPPERCASE),
            pick(&mut self.rng, LOWERCASE),
            pick(&mut self.rng, DIGITS),
            pick(&mut self.rng, SPECIALS),
        ];
        let all = format!("{UPPERCASE}{LOWERCASE}{DIGITS}{SPECIALS}");
        while password.len() < length {
            password.push(pick(&mut self.rng, &all));
        }
        password.into_iter().collect()
    }

    /// Six-digit one-time code
    pub fn otp(&mut self) -> String {
        self.rng.gen_range(100_000..=999_999).to_string()
    }

    /// Think time between `min_secs` and `max_secs`
    pub fn think_time(&mut self, min_secs: f64, max_secs: f64) -> Result<Duration> {
        let secs = self.float(min_secs.max(0.0), max_secs.max(0.0))?;
        Duration::try_from_secs_f64(secs).map_err(|_| HarnessError::invalid_range(min_secs, max_secs))
    }
}

static GLOBAL: OnceLock<Mutex<RandomSource>> = OnceLock::new();

/// Run `f` against the process-wide source. It starts entropy-seeded.
pub fn with_global<T>(f: impl FnOnce(&mut RandomSource) -> T) -> T {
    let lock = GLOBAL.get_or_init(|| Mutex::new(RandomSource::new()));
    let mut guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard)
}

/// Reseed the process-wide source
pub fn seed<'a>(input: impl Into<SeedInput<'a>>) -> bool {
    let input = input.into();
    with_global(|source| source.seed(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_resolution() {
        assert_eq!(SeedInput::from("42").resolve(), Some(42));
        assert_eq!(SeedInput::from(42u64).resolve(), Some(42));
        assert_eq!(SeedInput::from(" 7 ").resolve(), Some(7));
        assert_eq!(SeedInput::from("abc").resolve(), None);
        assert_eq!(SeedInput::from("").resolve(), None);
        assert_eq!(SeedInput::from(None).resolve(), None);
        assert!(SeedInput::from("1.5").resolve().is_some());
    }

    #[test]
    fn test_seed_is_noop_on_garbage() {
        let mut source = RandomSource::seeded(9);
        assert!(!source.seed("not-a-number"));
        assert_eq!(source.current_seed(), Some(9));
    }

    #[test]
    fn test_int_bounds() {
        let mut source = RandomSource::seeded(1);
        for _ in 0..500 {
            let v = source.int(3, 5).unwrap();
            assert!((3..=5).contains(&v));
        }
        assert_eq!(source.int(4, 4).unwrap(), 4);
        assert!(matches!(source.int(5, 1), Err(HarnessError::InvalidRange { .. })));
    }

    #[test]
    fn test_float_bounds() {
        let mut source = RandomSource::seeded(2);
        for _ in 0..500 {
            let v = source.float(0.5, 1.0).unwrap();
            assert!((0.5..=1.0).contains(&v));
        }
        assert!(source.float(2.0, 1.0).is_err());
        assert!(source.float(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn test_float_full_range_does_not_overflow() {
        let mut source = RandomSource::seeded(1);
        for _ in 0..200 {
            let v = source.float(-f64::MAX, f64::MAX).unwrap();
            assert!(v.is_finite());
        }
        let v = source.float(f64::MIN, 0.0).unwrap();
        assert!(v <= 0.0);
    }

    #[test]
    fn test_string_charset_and_length() {
        let mut source = RandomSource::seeded(3);
        let s = source.string(30, None).unwrap();
        assert_eq!(s.len(), 30);
        assert!(s.chars().all(|c| DEFAULT_CHARSET.contains(c)));
        assert_eq!(source.string(0, None).unwrap(), "");
        assert_eq!(source.string(4, Some("x")).unwrap(), "xxxx");
        assert!(matches!(source.string(3, Some("")), Err(HarnessError::EmptyInput(_))));
    }

    #[test]
    fn test_item_empty() {
        let mut source = RandomSource::seeded(4);
        let empty: [u8; 0] = [];
        assert!(matches!(source.item(&empty), Err(HarnessError::EmptyInput(_))));
        assert_eq!(*source.item(&[7]).unwrap(), 7);
    }

    #[test]
    fn test_weighted_pick_zero_weights_returns_first() {
        let mut source = RandomSource::seeded(5);
        for _ in 0..50 {
            assert_eq!(*source.weighted_pick(&["a", "b", "c"], &[0.0, 0.0, 0.0]).unwrap(), "a");
        }
    }

    #[test]
    fn test_weighted_pick_respects_single_weight() {
        let mut source = RandomSource::seeded(6);
        for _ in 0..50 {
            assert_eq!(*source.weighted_pick(&["a", "b", "c"], &[0.0, 1.0, 0.0]).unwrap(), "b");
        }
    }

    #[test]
    fn test_weighted_pick_validation() {
        let mut source = RandomSource::seeded(7);
        assert!(matches!(
            source.weighted_pick(&["a", "b"], &[1.0]),
            Err(HarnessError::LengthMismatch { left: 2, right: 1 })
        ));
        let empty: [&str; 0] = [];
        assert!(matches!(source.weighted_pick(&empty, &[]), Err(HarnessError::EmptyInput(_))));
    }

    #[test]
    fn test_weighted_pick_overflowing_total() {
        let mut source = RandomSource::seeded(13);
        let mut seen_b = false;
        for _ in 0..200 {
            let picked = *source.weighted_pick(&["a", "b"], &[f64::MAX, f64::MAX]).unwrap();
            seen_b |= picked == "b";
        }
        assert!(seen_b);
        assert_eq!(*source.weighted_pick(&["a", "b"], &[0.0, f64::MAX]).unwrap(), "b");
    }

    #[test]
    fn test_weighted_pick_rejects_non_finite_weights() {
        let mut source = RandomSource::seeded(14);
        assert!(matches!(
            source.weighted_pick(&["a", "b"], &[1.0, f64::INFINITY]),
            Err(HarnessError::InvalidWeight { index: 1, .. })
        ));
        assert!(matches!(
            source.weighted_pick(&["a", "b"], &[f64::NAN, 1.0]),
            Err(HarnessError::InvalidWeight { index: 0, .. })
        ));
    }

    #[test]
    fn test_think_time_too_large() {
        let mut source = RandomSource::seeded(15);
        assert!(source.think_time(1e30, 1e30).is_err());
    }

    #[test]
    fn test_email_shape() {
        let mut source = RandomSource::seeded(8);
        let email = source.email("signup");
        let (local, domain) = email.split_once('@').unwrap();
        assert!(EMAIL_DOMAINS.contains(&domain));
        let suffix = local.strip_prefix("signup.").unwrap();
        assert_eq!(suffix.len(), 8);
    }

    #[test]
    fn test_phone_shape() {
        let mut source = RandomSource::seeded(10);
        let phone = source.phone();
        let parts: Vec<&str> = phone.trim_start_matches('+').split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[3].len(), 4);
    }

    #[test]
    fn test_strong_password_classes() {
        let mut source = RandomSource::seeded(11);
        let password = source.strong_password(4);
        assert_eq!(password.len(), 8);
        assert!(password.chars().any(|c| c.is_ascii_uppercase()));
        assert!(password.chars().any(|c| c.is_ascii_lowercase()));
        assert!(password.chars().any(|c| c.is_ascii_digit()));
        assert!(password.chars().any(|c| SPECIALS.contains(c)));
    }

    #[test]
    fn test_vu_sources_differ_but_reproduce() {
        let mut a1 = RandomSource::for_vu(Some(99), 1);
        let mut a2 = RandomSource::for_vu(Some(99), 1);
        let mut b = RandomSource::for_vu(Some(99), 2);
        let s1 = a1.string(16, None).unwrap();
        assert_eq!(s1, a2.string(16, None).unwrap());
        assert_ne!(s1, b.string(16, None).unwrap());
    }

    #[test]
    fn test_think_time_range() {
        let mut source = RandomSource::seeded(12);
        let d = source.think_time(1.0, 2.0).unwrap();
        assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(2));
        assert_eq!(source.think_time(0.0, 0.0).unwrap(), Duration::ZERO);
    }
}
