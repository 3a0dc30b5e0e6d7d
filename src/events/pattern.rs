use std::fmt;

/// Which side of the original call an event is signalled on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Before,
    After,
}

impl Phase {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Before => "BEFORE",
            Self::After => "AFTER",
        }
    }
}

/// Builds `<NAMESPACE>_ON_<SUBJECT>_<BEFORE|AFTER>`.
pub fn event_name(namespace: &str, subject: &str, phase: Phase) -> String {
    format!("{}_ON_{}_{}", namespace, subject, phase.suffix())
}

/// An exact event name, or a prefix followed by a trailing wildcard.
///
/// Both `NWNX_ON_LEVEL_UP_*` and `NWNX_ON_LEVEL_UP_.*` are read as the prefix
/// `NWNX_ON_LEVEL_UP_`. A wildcard anywhere else is part of the name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventPattern {
    Exact(String),
    Prefix(String),
}

impl EventPattern {
    pub fn parse(pattern: &str) -> Self {
        if let Some(prefix) = pattern.strip_suffix(".*") {
            Self::Prefix(prefix.to_owned())
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            Self::Prefix(prefix.to_owned())
        } else {
            Self::Exact(pattern.to_owned())
        }
    }

    pub fn matches(&self, event: &str) -> bool {
        match self {
            Self::Exact(name) => name == event,
            Self::Prefix(prefix) => event.starts_with(prefix.as_str()),
        }
    }
}

impl From<&str> for EventPattern {
    fn from(pattern: &str) -> Self {
        Self::parse(pattern)
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(name) => f.write_str(name),
            Self::Prefix(prefix) => write!(f, "{}*", prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_wildcards_become_prefixes() {
        assert_eq!(EventPattern::parse("X_*"), EventPattern::Prefix("X_".into()));
        assert_eq!(
            EventPattern::parse("NWNX_ON_LEVEL_UP_.*"),
            EventPattern::Prefix("NWNX_ON_LEVEL_UP_".into())
        );
        assert_eq!(EventPattern::parse("X_BEFORE"), EventPattern::Exact("X_BEFORE".into()));
    }

    #[test]
    fn prefix_matches_family() {
        let pattern = EventPattern::parse("NWNX_ON_LEVEL_UP_*");

        assert!(pattern.matches("NWNX_ON_LEVEL_UP_BEFORE"));
        assert!(pattern.matches("NWNX_ON_LEVEL_UP_AUTOMATIC_AFTER"));
        assert!(!pattern.matches("NWNX_ON_LEVEL_DOWN_BEFORE"));
    }

    #[test]
    fn exact_matches_only_itself() {
        let pattern = EventPattern::parse("X_BEFORE");

        assert!(pattern.matches("X_BEFORE"));
        assert!(!pattern.matches("X_BEFORE_2"));
    }

    #[test]
    fn builds_phase_names() {
        assert_eq!(event_name("NWNX", "LEVEL_DOWN", Phase::Before), "NWNX_ON_LEVEL_DOWN_BEFORE");
        assert_eq!(event_name("NWNX", "LEVEL_DOWN", Phase::After), "NWNX_ON_LEVEL_DOWN_AFTER");
    }
}
