use crate::error::DatabaseError;
use strum_macros::{EnumIter, EnumString, IntoStaticStr};
use sysinfo::System;

const MB: u64 = 1024 * 1024;

/// Bundled database sizes, from the fastest to the most accurate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, EnumString, IntoStaticStr)]
#[strum(ascii_case_insensitive)]
pub enum SizeTier {
    #[strum(to_string = "small", serialize = "s")]
    Small,
    #[strum(to_string = "medium", serialize = "m")]
    Medium,
    #[strum(to_string = "large", serialize = "l")]
    Large,
    #[strum(to_string = "extralarge", serialize = "xl")]
    ExtraLarge,
}

impl SizeTier {
    /// File stem of the tier database
    #[inline]
    pub const fn stem(self) -> &'static str {
        match self {
            Self::Small => "ngrams-s",
            Self::Medium => "ngrams-m",
            Self::Large => "ngrams-l",
            Self::ExtraLarge => "ngrams-xl",
        }
    }

    /// Approximate memory needed to hold the tier as an in-memory table
    #[inline]
    pub const fn required_mb(self) -> u64 {
        match self {
            Self::Small => 64,
            Self::Medium => 256,
            Self::Large => 1024,
            Self::ExtraLarge => 2048,
        }
    }
}

/// Memory currently available to the process, `None` when it can't be measured
fn available_memory() -> Option<u64> {
    let mut system = System::new();
    system.refresh_memory();
    match system.available_memory() {
        0 => None,
        bytes => Some(bytes),
    }
}

/// Fails if an in-memory table of `tier` would not fit into `limit` bytes,
/// or into the available memory of the host when `limit` is not set
pub(crate) fn check_budget(tier: SizeTier, limit: Option<u64>) -> Result<(), DatabaseError> {
    let Some(available) = limit.or_else(available_memory) else {
        tracing::debug!("Available memory is unknown, skipping the budget check");
        return Ok(());
    };

    let available_mb = available / MB;
    if tier.required_mb() > available_mb {
        return Err(DatabaseError::MemoryBudget {
            tier: tier.into(),
            required_mb: tier.required_mb(),
            available_mb,
        });
    }
    Ok(())
}
