//! Equivalence classes over parameter values.
//!
//! Each factor's domain is abstracted into a small set of equivalence
//! classes; combinatorial generation and failure attribution both operate
//! on classes, not concrete values. `describe()` is the canonical identity
//! used as a solver symbol and as a key in the probability models.

use base64::Engine as _;
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::Value;

/// Sentinel returned for an unresolved binding; never sent on the wire.
pub const NOT_SET: &str = "__NOT_SET__";

#[derive(Debug, Clone, PartialEq)]
pub enum Equivalence {
    /// Parameter omitted entirely.
    Null,
    /// Container assembled from its children's values; only arrays and
    /// objects carry this class.
    Composite,
    /// Empty string.
    Empty,
    /// A concrete documented value (example, default, enum member,
    /// quoted description snippet).
    Enumerated(Value),
    RandomString { min_len: u32, max_len: u32 },
    RandomPassword { min_len: u32, max_len: u32 },
    RandomByte { min_len: u32, max_len: u32 },
    RandomBinary { min_len: u32, max_len: u32 },
    Zero,
    PositiveOne,
    NegativeOne,
    RandomInt { min: i64, max: i64 },
    RandomFloat { min: f64, max: f64 },
    RandomDate,
    RandomTime,
    RandomDateTime,
    /// Value drawn at request time from a stored resource:
    /// `node` is the producer's resource node, `field` the path inside a
    /// stored entry (`_item` descends into list elements).
    Binding { node: String, field: Vec<String> },
}

impl Equivalence {
    pub fn random_password() -> Self {
        Equivalence::RandomPassword {
            min_len: 5,
            max_len: 10,
        }
    }

    pub fn random_byte() -> Self {
        Equivalence::RandomByte {
            min_len: 1,
            max_len: 10,
        }
    }

    pub fn random_binary() -> Self {
        Equivalence::RandomBinary {
            min_len: 1,
            max_len: 10,
        }
    }

    pub fn is_binding(&self) -> bool {
        matches!(self, Equivalence::Binding { .. })
    }

    /// Canonical identity. Two classes with the same description are the
    /// same symbol for the solver and the probability models.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Equivalence::Null => "Null".to_string(),
            Equivalence::Composite => "Composite".to_string(),
            Equivalence::Empty => "Empty".to_string(),
            Equivalence::Enumerated(v) => format!("Enumerated({v})"),
            Equivalence::RandomString { min_len, max_len } => {
                format!("RandomString({min_len},{max_len})")
            }
            Equivalence::RandomPassword { min_len, max_len } => {
                format!("RandomPassword({min_len},{max_len})")
            }
            Equivalence::RandomByte { min_len, max_len } => {
                format!("RandomByte({min_len},{max_len})")
            }
            Equivalence::RandomBinary { min_len, max_len } => {
                format!("RandomBinary({min_len},{max_len})")
            }
            Equivalence::Zero => "Zero".to_string(),
            Equivalence::PositiveOne => "PositiveOne".to_string(),
            Equivalence::NegativeOne => "NegativeOne".to_string(),
            Equivalence::RandomInt { min, max } => format!("RandomInt({min},{max})"),
            Equivalence::RandomFloat { min, max } => format!("RandomFloat({min},{max})"),
            Equivalence::RandomDate => "RandomDate".to_string(),
            Equivalence::RandomTime => "RandomTime".to_string(),
            Equivalence::RandomDateTime => "RandomDateTime".to_string(),
            Equivalence::Binding { node, field } => {
                format!("Binding({node}, {})", field.join("."))
            }
        }
    }

    /// Generate a concrete value. `None` means the parameter is omitted.
    ///
    /// `Binding` classes are resolved against the resource store by the
    /// engine before generation and yield `None` here.
    pub fn generate<R: Rng>(&self, rng: &mut R) -> Option<Value> {
        match self {
            Equivalence::Null | Equivalence::Composite | Equivalence::Binding { .. } => None,
            Equivalence::Empty => Some(Value::String(String::new())),
            Equivalence::Enumerated(v) => Some(v.clone()),
            Equivalence::RandomString { min_len, max_len } => {
                let len = rng.gen_range(*min_len..=(*max_len).max(*min_len)) as usize;
                Some(Value::String(random_chars(rng, PRINTABLE, len)))
            }
            Equivalence::RandomPassword { min_len, max_len } => {
                Some(Value::String(random_password(rng, *min_len, *max_len)))
            }
            Equivalence::RandomByte { min_len, max_len } => {
                let len = rng.gen_range(*min_len..=(*max_len).max(*min_len)) as usize;
                let bytes: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
                Some(Value::String(
                    base64::engine::general_purpose::STANDARD.encode(bytes),
                ))
            }
            Equivalence::RandomBinary { min_len, max_len } => {
                let len = rng.gen_range(*min_len..=(*max_len).max(*min_len)) as usize;
                Some(Value::String(random_chars(rng, b"01", len)))
            }
            Equivalence::Zero => Some(Value::from(0)),
            Equivalence::PositiveOne => Some(Value::from(1)),
            Equivalence::NegativeOne => Some(Value::from(-1)),
            Equivalence::RandomInt { min, max } => {
                Some(Value::from(rng.gen_range(*min..=(*max).max(*min))))
            }
            Equivalence::RandomFloat { min, max } => {
                let v = rng.gen_range(*min..=(*max).max(*min));
                serde_json::Number::from_f64(v).map(Value::Number)
            }
            Equivalence::RandomDate => {
                let base = NaiveDate::from_ymd_opt(1970, 1, 1)?;
                let day = base + Duration::days(rng.gen_range(0..36500));
                Some(Value::String(day.format("%Y-%m-%d").to_string()))
            }
            Equivalence::RandomTime => {
                let base = NaiveDate::from_ymd_opt(1970, 1, 1)?.and_hms_opt(0, 0, 0)?;
                let t = base + Duration::seconds(rng.gen_range(0..86400));
                Some(Value::String(format!(
                    "{}Z",
                    t.format("%H:%M:%S%.6f")
                )))
            }
            Equivalence::RandomDateTime => {
                let begin = NaiveDate::from_ymd_opt(1970, 1, 1)?.and_hms_opt(0, 0, 0)?;
                let end: NaiveDateTime = Utc::now().naive_utc() + Duration::days(36500);
                let span = (end - begin).num_seconds().max(1);
                let t = begin + Duration::seconds(rng.gen_range(0..span));
                Some(Value::String(format!(
                    "{}Z",
                    t.format("%Y-%m-%dT%H:%M:%S%.6f")
                )))
            }
        }
    }
}

const PRINTABLE: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789\
      !\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

fn random_chars<R: Rng>(rng: &mut R, alphabet: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..alphabet.len());
            alphabet[idx] as char
        })
        .collect()
}

/// One guaranteed uppercase, lowercase, digit, and punctuation char,
/// padded with random printables and shuffled.
fn random_password<R: Rng>(rng: &mut R, min_len: u32, max_len: u32) -> String {
    const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    const DIGIT: &[u8] = b"0123456789";
    const PUNCT: &[u8] = b"!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

    let mut chars: Vec<char> = vec![
        UPPER[rng.gen_range(0..UPPER.len())] as char,
        LOWER[rng.gen_range(0..LOWER.len())] as char,
        DIGIT[rng.gen_range(0..DIGIT.len())] as char,
        PUNCT[rng.gen_range(0..PUNCT.len())] as char,
    ];
    let pad_max = max_len.saturating_sub(4).max(min_len);
    let pad = rng.gen_range(min_len..=pad_max) as usize;
    chars.extend(random_chars(rng, PRINTABLE, pad).chars());
    chars.shuffle(rng);
    chars.into_iter().collect()
}
