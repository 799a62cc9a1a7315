//! Validated resource limits for a form.

use std::fmt;

use bytesize::ByteSize;

use crate::{error::InvalidLimit, guard::FileGroup};

/// A raw, not yet validated limit value.
///
/// Integers are taken as-is. Strings made of digits are read as plain numbers and anything else
/// is parsed as a human readable size, e.g. `"8MB"` or `"512 KiB"`.
///
/// `KB`, `MB` and `GB` are decimal (`"8MB"` is 8 000 000 bytes) while `KiB`, `MiB` and `GiB` are
/// binary. The default field and file sizes are `"8KiB"` and `"8MiB"`.
#[derive(Debug, Clone, PartialEq)]
pub enum LimitValue {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
}

impl LimitValue {
    fn normalize(&self, key: &'static str) -> Result<u64, InvalidLimit> {
        let invalid = |value: String| InvalidLimit { key, value };

        match self {
            LimitValue::Unsigned(n) => Ok(*n),
            LimitValue::Signed(n) => u64::try_from(*n).map_err(|_| invalid(n.to_string())),
            LimitValue::Float(n) => float_to_limit(*n).ok_or_else(|| invalid(n.to_string())),
            LimitValue::Text(text) => {
                let trimmed = text.trim();

                if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit() || c == '.') {
                    let n = trimmed
                        .parse::<f64>()
                        .map_err(|_| invalid(text.clone()))?;
                    return float_to_limit(n).ok_or_else(|| invalid(n.to_string()));
                }

                trimmed
                    .parse::<ByteSize>()
                    .map(|size| size.as_u64())
                    .map_err(|_| invalid(text.clone()))
            }
        }
    }
}

fn float_to_limit(n: f64) -> Option<u64> {
    if n.is_finite() && n.fract() == 0.0 && n >= 0.0 && n <= u64::MAX as f64 {
        Some(n as u64)
    } else {
        None
    }
}

impl fmt::Display for LimitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitValue::Unsigned(n) => write!(f, "{n}"),
            LimitValue::Signed(n) => write!(f, "{n}"),
            LimitValue::Float(n) => write!(f, "{n}"),
            LimitValue::Text(text) => f.write_str(text),
        }
    }
}

macro_rules! limit_value_from {
    ($variant:ident as $target:ty: $($ty:ty),+) => {
        $(
            impl From<$ty> for LimitValue {
                fn from(value: $ty) -> Self {
                    LimitValue::$variant(value as $target)
                }
            }
        )+
    };
}

limit_value_from!(Unsigned as u64: u8, u16, u32, u64, usize);
limit_value_from!(Signed as i64: i8, i16, i32, i64, isize);
limit_value_from!(Float as f64: f32, f64);

impl From<&str> for LimitValue {
    fn from(value: &str) -> Self {
        LimitValue::Text(value.to_owned())
    }
}

impl From<String> for LimitValue {
    fn from(value: String) -> Self {
        LimitValue::Text(value)
    }
}

/// Unvalidated limit configuration. Unset limits fall back to their defaults.
///
/// ```
/// use actix_form_upload::LimitsConfig;
///
/// let limits = LimitsConfig::default()
///     .file_size("10MB")
///     .files(3)
///     .normalize()
///     .unwrap();
///
/// assert_eq!(limits.file_size, 10_000_000);
/// assert_eq!(limits.files, 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitsConfig {
    field_name_size: Option<LimitValue>,
    field_size: Option<LimitValue>,
    fields: Option<LimitValue>,
    file_size: Option<LimitValue>,
    files: Option<LimitValue>,
    header_pairs: Option<LimitValue>,
}

impl LimitsConfig {
    /// Sets maximum length of a field name in bytes. By default this limit is 100B.
    pub fn field_name_size(mut self, limit: impl Into<LimitValue>) -> Self {
        self.field_name_size = Some(limit.into());
        self
    }

    /// Sets maximum length of a text field's value in bytes. By default this limit is 8KiB.
    pub fn field_size(mut self, limit: impl Into<LimitValue>) -> Self {
        self.field_size = Some(limit.into());
        self
    }

    /// Sets maximum number of text fields. By default this limit is 1000.
    pub fn fields(mut self, limit: impl Into<LimitValue>) -> Self {
        self.fields = Some(limit.into());
        self
    }

    /// Sets maximum size of each file in bytes. By default this limit is 8MiB.
    pub fn file_size(mut self, limit: impl Into<LimitValue>) -> Self {
        self.file_size = Some(limit.into());
        self
    }

    /// Sets maximum number of files in the whole request. By default this limit is 10.
    pub fn files(mut self, limit: impl Into<LimitValue>) -> Self {
        self.files = Some(limit.into());
        self
    }

    /// Sets maximum number of header lines in a single part. By default this limit is 2000.
    pub fn header_pairs(mut self, limit: impl Into<LimitValue>) -> Self {
        self.header_pairs = Some(limit.into());
        self
    }

    /// Validates every limit, filling in defaults for the unset ones.
    pub fn normalize(&self) -> Result<Limits, InvalidLimit> {
        fn pick(
            value: &Option<LimitValue>,
            key: &'static str,
            default: u64,
        ) -> Result<u64, InvalidLimit> {
            value
                .as_ref()
                .map_or(Ok(default), |value| value.normalize(key))
        }

        Ok(Limits {
            field_name_size: pick(
                &self.field_name_size,
                "fieldNameSize",
                DEFAULT_LIMITS.field_name_size,
            )?,
            field_size: pick(&self.field_size, "fieldSize", DEFAULT_LIMITS.field_size)?,
            fields: pick(&self.fields, "fields", DEFAULT_LIMITS.fields)?,
            file_size: pick(&self.file_size, "fileSize", DEFAULT_LIMITS.file_size)?,
            files: pick(&self.files, "files", DEFAULT_LIMITS.files)?,
            header_pairs: pick(&self.header_pairs, "headerPairs", DEFAULT_LIMITS.header_pairs)?,
        })
    }
}

/// Normalized limits. Every value is a finite, non-negative integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub field_name_size: u64,
    pub field_size: u64,
    pub fields: u64,
    pub file_size: u64,
    pub files: u64,
    pub header_pairs: u64,
}

const DEFAULT_LIMITS: Limits = Limits {
    field_name_size: 100,
    field_size: 8_192, // 8 KiB
    fields: 1_000,
    file_size: 8_388_608, // 8 MiB
    files: 10,
    header_pairs: 2_000,
};

impl Limits {
    /// Request-wide file cap for a form accepting `groups`.
    ///
    /// When every group is bounded, the cap is raised above the sum of the per-group maxima so the
    /// field-attributed count error is always reported before the request-wide one.
    pub fn file_cap(&self, groups: Option<&[FileGroup]>) -> u64 {
        match groups.and_then(FileGroup::max_count_sum) {
            Some(sum) => self.files.max(sum.saturating_add(1)),
            None => self.files,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        DEFAULT_LIMITS
    }
}
