//! Equality-based label selectors (`k=v`, `k==v`, `k!=v`, `k`, `!k`).
//!
//! Set-based expressions (`k in (a,b)`) are rejected; release storage only ever
//! needs plain equality.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::HoistError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k).map(|l| l == v).unwrap_or(false),
            Requirement::NotEquals(k, v) => labels.get(k).map(|l| l != v).unwrap_or(true),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    reqs: Vec<Requirement>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.reqs.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.reqs
    }

    /// Add `key=value`, replacing an earlier equality on the same key.
    pub fn and_equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.reqs.retain(|r| !matches!(r, Requirement::Equals(k, _) if *k == key));
        self.reqs.push(Requirement::Equals(key, value.into()));
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.reqs.iter().all(|r| r.matches(labels))
    }
}

fn check_key(key: &str, raw: &str) -> Result<String, HoistError> {
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(HoistError::validation(format!("invalid label selector term '{}'", raw)));
    }
    Ok(key.to_string())
}

impl FromStr for LabelSelector {
    type Err = HoistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('(') || s.contains(')') {
            return Err(HoistError::validation(format!("set-based label selectors are not supported: '{}'", s)));
        }
        let mut reqs = Vec::new();
        for raw in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let req = if let Some((k, v)) = raw.split_once("!=") {
                Requirement::NotEquals(check_key(k, raw)?, v.trim().to_string())
            } else if let Some((k, v)) = raw.split_once("==") {
                Requirement::Equals(check_key(k, raw)?, v.trim().to_string())
            } else if let Some((k, v)) = raw.split_once('=') {
                Requirement::Equals(check_key(k, raw)?, v.trim().to_string())
            } else if let Some(k) = raw.strip_prefix('!') {
                Requirement::NotExists(check_key(k, raw)?)
            } else {
                Requirement::Exists(check_key(raw, raw)?)
            };
            reqs.push(req);
        }
        Ok(Self { reqs })
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.reqs.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match r {
                Requirement::Equals(k, v) => write!(f, "{}={}", k, v)?,
                Requirement::NotEquals(k, v) => write!(f, "{}!={}", k, v)?,
                Requirement::Exists(k) => write!(f, "{}", k)?,
                Requirement::NotExists(k) => write!(f, "!{}", k)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_all_term_shapes() {
        let sel: LabelSelector = "OWNER=TILLER, env==prod,tier!=db,team,!skip".parse().unwrap();
        assert_eq!(
            sel.requirements(),
            &[
                Requirement::Equals("OWNER".into(), "TILLER".into()),
                Requirement::Equals("env".into(), "prod".into()),
                Requirement::NotEquals("tier".into(), "db".into()),
                Requirement::Exists("team".into()),
                Requirement::NotExists("skip".into()),
            ]
        );
        assert_eq!(sel.to_string(), "OWNER=TILLER,env=prod,tier!=db,team,!skip");
    }

    #[test]
    fn empty_selector_matches_everything() {
        let sel: LabelSelector = "".parse().unwrap();
        assert!(sel.is_empty());
        assert!(sel.matches(&labels(&[])));
        assert!(sel.matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn matching_follows_kubernetes_semantics() {
        let sel: LabelSelector = "OWNER=TILLER,STATUS!=SUPERSEDED".parse().unwrap();
        assert!(sel.matches(&labels(&[("OWNER", "TILLER"), ("STATUS", "DEPLOYED")])));
        assert!(sel.matches(&labels(&[("OWNER", "TILLER")])));
        assert!(!sel.matches(&labels(&[("OWNER", "none"), ("STATUS", "DEPLOYED")])));
        assert!(!sel.matches(&labels(&[("OWNER", "TILLER"), ("STATUS", "SUPERSEDED")])));
    }

    #[test]
    fn and_equals_replaces_same_key() {
        let sel: LabelSelector = "OWNER=TILLER,NAME=old".parse().unwrap();
        let sel = sel.and_equals("NAME", "myapp");
        assert_eq!(sel.to_string(), "OWNER=TILLER,NAME=myapp");
    }

    #[test]
    fn rejects_set_based_and_blank_keys() {
        assert!("env in (a,b)".parse::<LabelSelector>().is_err());
        assert!("=value".parse::<LabelSelector>().is_err());
        assert!("!".parse::<LabelSelector>().is_err());
    }
}
