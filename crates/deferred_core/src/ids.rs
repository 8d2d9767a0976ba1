use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{DeferredError, DeferredResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl RecordId {
    pub fn as_i64(self) -> i64 {
        self.0
    }

    pub fn from_member(member: &str) -> DeferredResult<Self> {
        member
            .parse::<i64>()
            .map(Self)
            .map_err(|err| DeferredError::validation(format!("invalid record id '{member}': {err}")))
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<i32> for RecordId {
    fn from(value: i32) -> Self {
        Self(i64::from(value))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
