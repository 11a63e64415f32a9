//! The single-letter method selector shared by all three executables'
//! first positional argument. Modeled as a tagged variant rather than a
//! string, since the method is chosen once at start-up and never
//! reconfigured at runtime.

use crate::error::PerfError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Pipes,
    Shmem,
    Socket,
}

impl Method {
    pub fn parse(s: &str) -> Result<Self, PerfError> {
        match s {
            "p" => Ok(Method::Pipes),
            "m" => Ok(Method::Shmem),
            "s" => Ok(Method::Socket),
            other => Err(PerfError::Protocol(format!(
                "unrecognised method '{other}': expected one of p, m, s"
            ))),
        }
    }

    pub fn letter(self) -> &'static str {
        match self {
            Method::Pipes => "p",
            Method::Shmem => "m",
            Method::Socket => "s",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_letter_round_trips() {
        for m in [Method::Pipes, Method::Shmem, Method::Socket] {
            assert_eq!(Method::parse(m.letter()).unwrap(), m);
        }
    }

    #[test]
    fn unknown_letter_is_rejected() {
        assert!(Method::parse("x").is_err());
    }
}
