//! Security verdicts and lane selection. Pure functions of their inputs.

use codec::{HINT_CHALLENGED, HINT_RATE_LIMITED, HINT_WAF_BLOCKED};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityVerdict {
    pub waf: bool,
    pub ratelimit: bool,
    pub challenged: bool,
}

/// Processing lane as `(backend, class)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    CacheL2,
    CoreWrite,
    CoreRead,
}

impl Lane {
    pub fn backend(&self) -> &'static str {
        match self {
            Lane::CacheL2 => "cache",
            Lane::CoreWrite | Lane::CoreRead => "core",
        }
    }

    pub fn class(&self) -> &'static str {
        match self {
            Lane::CacheL2 => "l2",
            Lane::CoreWrite => "write",
            Lane::CoreRead => "read",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend(), self.class())
    }
}

pub fn security(edge_hints: u32) -> SecurityVerdict {
    SecurityVerdict {
        waf: edge_hints & HINT_WAF_BLOCKED != 0,
        ratelimit: edge_hints & HINT_RATE_LIMITED != 0,
        challenged: edge_hints & HINT_CHALLENGED != 0,
    }
}

pub fn pick_lane(path: &str, method: &str) -> Lane {
    if path.starts_with("/static/") {
        return Lane::CacheL2;
    }
    match method {
        "POST" | "PUT" | "PATCH" => Lane::CoreWrite,
        _ => Lane::CoreRead,
    }
}
