//! `KEY=VALUE` build options, as handed to make.
use std::fmt;

/// Flags which only select between builds of the same source and so never require a realclean when they change
/// between consecutive tests.
pub const REALCLEAN_SAFE_FLAGS: &[&str] = &["USE_CUDA", "USE_ACC", "USE_MPI", "USE_OMP", "DEBUG", "USE_GPU"];

/// An ordered set of `KEY=VALUE` pairs.
///
/// Keys are unique.  Setting a key which is already present replaces the value in place, so later sources of flags
/// override earlier ones without reordering the command line.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CompileFlags {
    entries: Vec<(String, String)>,
}

#[derive(Debug, thiserror::Error)]
#[error("`{token}` is not of the form KEY=VALUE")]
pub struct FlagParseError {
    pub token: String,
}

impl CompileFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a whitespace-separated list of `KEY=VALUE` tokens, honoring shell quoting.
    pub fn parse(text: &str) -> Result<Self, FlagParseError> {
        let tokens = shlex::split(text).ok_or_else(|| FlagParseError {
            token: text.to_string(),
        })?;

        let mut ret = CompileFlags::new();
        for token in tokens {
            let Some((key, value)) = token.split_once('=') else {
                return Err(FlagParseError { token });
            };
            if key.is_empty() {
                return Err(FlagParseError { token });
            }
            ret.set(key, value);
        }
        Ok(ret)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Merge `other` into `self`; `other` wins on conflicts.
    pub fn merge(&mut self, other: &CompileFlags) {
        for (k, v) in other.iter() {
            self.set(k, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if every flag is one which can change between tests without a realclean.
    pub fn is_realclean_safe(&self) -> bool {
        self.entries
            .iter()
            .all(|(k, _)| REALCLEAN_SAFE_FLAGS.contains(&k.as_str()))
    }
}

impl fmt::Display for CompileFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in self.entries.iter() {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            if v.contains(char::is_whitespace) {
                write!(f, "{k}=\"{v}\"")?;
            } else {
                write!(f, "{k}={v}")?;
            }
        }
        Ok(())
    }
}

/// Convert a boolean test option to the `TRUE`/`FALSE` spelling of the C++ build system.
pub fn c_flag(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// Convert a boolean test option to the `t`/empty spelling of the Fortran build system.
pub fn f_flag(value: bool) -> &'static str {
    if value {
        "t"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn later_values_replace_in_place() {
        let mut flags = CompileFlags::parse("DEBUG=FALSE DIM=2 USE_MPI=TRUE").unwrap();
        flags.merge(&CompileFlags::parse("DIM=3 EOS_DIR=gamma_law").unwrap());

        assert_eq!(
            flags.to_string(),
            "DEBUG=FALSE DIM=3 USE_MPI=TRUE EOS_DIR=gamma_law"
        );
        assert_eq!(flags.get("DIM"), Some("3"));
    }

    #[test]
    fn rejects_bare_tokens() {
        let err = CompileFlags::parse("DEBUG=TRUE oops").unwrap_err();
        assert_eq!(err.token, "oops");
        assert!(CompileFlags::parse("=value").is_err());
    }

    #[test]
    fn empty_string_is_empty_flags() {
        assert!(CompileFlags::parse("  ").unwrap().is_empty());
    }

    #[test]
    fn realclean_safety() {
        assert!(CompileFlags::parse("USE_MPI=TRUE DEBUG=TRUE")
            .unwrap()
            .is_realclean_safe());
        assert!(!CompileFlags::parse("USE_MPI=TRUE NETWORK_DIR=aprox13")
            .unwrap()
            .is_realclean_safe());
        assert!(CompileFlags::new().is_realclean_safe());
    }

    #[test]
    fn values_with_spaces_are_quoted() {
        let flags = CompileFlags::new().with("CXXFLAGS", "-O2 -g");
        assert_eq!(flags.to_string(), "CXXFLAGS=\"-O2 -g\"");
    }
}
