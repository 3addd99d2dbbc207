//! PEP 440 versions, specifier sets and requirement lines.
//!
//! Covers what constraint reconciliation needs: release ordering with
//! pre/post/dev segments, the comparison operators, wildcard equality and
//! compatible-release clauses. Local version labels are parsed and ignored
//! for ordering.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{AgentEngineError, AgentEngineResult};

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?ix)^\s*v?
            (?:(?P<epoch>\d+)!)?
            (?P<release>\d+(?:\.\d+)*)
            (?:[-_.]?(?P<pre_l>alpha|a|beta|b|preview|pre|c|rc)[-_.]?(?P<pre_n>\d*))?
            (?:-(?P<post_n1>\d+)|[-_.]?(?P<post_l>post|rev|r)[-_.]?(?P<post_n2>\d*))?
            (?:[-_.]?(?P<dev_l>dev)[-_.]?(?P<dev_n>\d*))?
            (?:\+(?P<local>[a-z0-9]+(?:[-_.][a-z0-9]+)*))?
            \s*$",
        )
        .expect("version regex is valid")
    })
}

fn requirement_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[(?P<extras>[^\]]*)\])?\s*(?P<rest>[^;]*?)\s*(?:;(?P<marker>.*))?$",
        )
        .expect("requirement regex is valid")
    })
}

fn clause_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?P<op>~=|===|==|!=|<=|>=|<|>)\s*(?P<version>[^\s,]+)\s*$")
            .expect("clause regex is valid")
    })
}

/// Normalize a distribution name (lowercase, runs of `-_.` become `-`).
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_sep = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            if !in_sep {
                out.push('-');
            }
            in_sep = true;
        } else {
            out.extend(ch.to_lowercase());
            in_sep = false;
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PreKind {
    Alpha,
    Beta,
    Rc,
}

/// A parsed PEP 440 version.
#[derive(Debug, Clone)]
pub struct Version {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<(PreKind, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
    original: String,
}

impl Version {
    /// Parse a version string.
    pub fn parse(input: &str) -> AgentEngineResult<Self> {
        let caps = version_regex()
            .captures(input)
            .ok_or_else(|| AgentEngineError::validation(format!("invalid version: {input:?}")))?;
        let number = |name: &str| -> u64 {
            caps.name(name)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(0)
        };

        let release = caps
            .name("release")
            .map(|m| {
                m.as_str()
                    .split('.')
                    .filter_map(|s| s.parse::<u64>().ok())
                    .collect()
            })
            .unwrap_or_default();

        let pre = caps.name("pre_l").map(|l| {
            let kind = match l.as_str().to_ascii_lowercase().as_str() {
                "a" | "alpha" => PreKind::Alpha,
                "b" | "beta" => PreKind::Beta,
                _ => PreKind::Rc,
            };
            (kind, number("pre_n"))
        });

        let post = if caps.name("post_n1").is_some() {
            Some(number("post_n1"))
        } else if caps.name("post_l").is_some() {
            Some(number("post_n2"))
        } else {
            None
        };

        let dev = caps.name("dev_l").map(|_| number("dev_n"));

        Ok(Self {
            epoch: number("epoch"),
            release,
            pre,
            post,
            dev,
            original: input.trim().to_string(),
        })
    }

    /// Whether this is a pre- or dev-release.
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    /// Whether this is a post-release.
    pub fn is_postrelease(&self) -> bool {
        self.post.is_some()
    }

    fn trimmed_release(&self) -> &[u64] {
        let mut end = self.release.len();
        while end > 1 && self.release[end - 1] == 0 {
            end -= 1;
        }
        &self.release[..end]
    }

    fn base_equal(&self, other: &Version) -> bool {
        self.epoch == other.epoch && self.trimmed_release() == other.trimmed_release()
    }

    // (tier, kind, n): dev-only releases sort before pre-releases, which
    // sort before finals.
    fn pre_key(&self) -> (i8, Option<PreKind>, u64) {
        match (self.pre, self.post, self.dev) {
            (None, None, Some(_)) => (-1, None, 0),
            (Some((kind, n)), _, _) => (0, Some(kind), n),
            (None, _, _) => (1, None, 0),
        }
    }

    fn post_key(&self) -> (i8, u64) {
        match self.post {
            None => (-1, 0),
            Some(n) => (0, n),
        }
    }

    fn dev_key(&self) -> (i8, u64) {
        match self.dev {
            None => (1, 0),
            Some(n) => (0, n),
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| self.trimmed_release().cmp(other.trimmed_release()))
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post_key().cmp(&other.post_key()))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

/// Comparison operator of a specifier clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `~=`
    Compatible,
    /// `===`
    Arbitrary,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<=`
    LessEqual,
    /// `>=`
    GreaterEqual,
    /// `<`
    Less,
    /// `>`
    Greater,
}

impl Operator {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "~=" => Operator::Compatible,
            "===" => Operator::Arbitrary,
            "==" => Operator::Equal,
            "!=" => Operator::NotEqual,
            "<=" => Operator::LessEqual,
            ">=" => Operator::GreaterEqual,
            "<" => Operator::Less,
            ">" => Operator::Greater,
            _ => return None,
        })
    }

    fn as_str(&self) -> &'static str {
        match self {
            Operator::Compatible => "~=",
            Operator::Arbitrary => "===",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::LessEqual => "<=",
            Operator::GreaterEqual => ">=",
            Operator::Less => "<",
            Operator::Greater => ">",
        }
    }
}

/// One clause such as `>=1.2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specifier {
    operator: Operator,
    version: String,
}

impl Specifier {
    /// Parse a clause.
    pub fn parse(input: &str) -> AgentEngineResult<Self> {
        let caps = clause_regex()
            .captures(input)
            .ok_or_else(|| AgentEngineError::validation(format!("invalid specifier: {input:?}")))?;
        let operator = Operator::parse(&caps["op"])
            .ok_or_else(|| AgentEngineError::validation(format!("invalid operator in {input:?}")))?;
        let version = caps["version"].to_string();

        let wildcard = version.ends_with(".*");
        if wildcard && !matches!(operator, Operator::Equal | Operator::NotEqual) {
            return Err(AgentEngineError::validation(format!(
                "wildcards are only allowed with == and !=: {input:?}"
            )));
        }
        if operator != Operator::Arbitrary {
            let parsed = Version::parse(version.trim_end_matches(".*"))?;
            if operator == Operator::Compatible && parsed.release.len() < 2 {
                return Err(AgentEngineError::validation(format!(
                    "~= needs at least two release segments: {input:?}"
                )));
            }
        }
        Ok(Self { operator, version })
    }

    /// Whether the clause names a pre-release, which opts the whole set
    /// into accepting them.
    fn admits_prereleases(&self) -> bool {
        if self.operator == Operator::NotEqual {
            return false;
        }
        Version::parse(self.version.trim_end_matches(".*"))
            .map(|v| v.is_prerelease())
            .unwrap_or(false)
    }

    /// Whether `candidate` satisfies this clause.
    pub fn contains(&self, candidate: &Version) -> bool {
        if self.operator == Operator::Arbitrary {
            return candidate.original.eq_ignore_ascii_case(&self.version);
        }
        let (spec_text, wildcard) = match self.version.strip_suffix(".*") {
            Some(prefix) => (prefix, true),
            None => (self.version.as_str(), false),
        };
        let spec = match Version::parse(spec_text) {
            Ok(v) => v,
            Err(_) => return false,
        };
        match self.operator {
            Operator::Equal if wildcard => prefix_match(candidate, &spec),
            Operator::NotEqual if wildcard => !prefix_match(candidate, &spec),
            Operator::Equal => candidate == &spec,
            Operator::NotEqual => candidate != &spec,
            Operator::LessEqual => candidate <= &spec,
            Operator::GreaterEqual => candidate >= &spec,
            Operator::Less => {
                candidate < &spec
                    && (spec.is_prerelease()
                        || !(candidate.is_prerelease() && candidate.base_equal(&spec)))
            }
            Operator::Greater => {
                candidate > &spec
                    && (spec.is_postrelease()
                        || !(candidate.is_postrelease() && candidate.base_equal(&spec)))
            }
            Operator::Compatible => {
                let mut prefix = spec.clone();
                prefix.release.pop();
                candidate >= &spec && prefix_match(candidate, &prefix)
            }
            Operator::Arbitrary => unreachable!("handled above"),
        }
    }
}

fn prefix_match(candidate: &Version, prefix: &Version) -> bool {
    if candidate.epoch != prefix.epoch {
        return false;
    }
    prefix
        .release
        .iter()
        .enumerate()
        .all(|(i, seg)| candidate.release.get(i).copied().unwrap_or(0) == *seg)
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.operator.as_str(), self.version)
    }
}

/// Comma-separated set of clauses; empty means "any version".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecifierSet {
    clauses: Vec<Specifier>,
}

impl SpecifierSet {
    /// Parse `">=1.0,<2"`.
    pub fn parse(input: &str) -> AgentEngineResult<Self> {
        let inner = input.trim();
        let inner = inner
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(inner);
        let clauses = inner
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Specifier::parse)
            .collect::<AgentEngineResult<Vec<_>>>()?;
        Ok(Self { clauses })
    }

    /// True when there are no clauses.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Whether `version` satisfies every clause. Unparseable versions only
    /// satisfy an empty set.
    ///
    /// Pre-releases are rejected unless a clause names one.
    pub fn contains(&self, version: &str) -> bool {
        if self.clauses.is_empty() {
            return true;
        }
        let Ok(v) = Version::parse(version) else {
            return false;
        };
        if v.is_prerelease() && !self.clauses.iter().any(Specifier::admits_prereleases) {
            return false;
        }
        self.clauses.iter().all(|c| c.contains(&v))
    }
}

impl fmt::Display for SpecifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.clauses.iter().map(|c| c.to_string()).collect();
        parts.sort();
        f.write_str(&parts.join(","))
    }
}

/// A parsed requirement line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Normalized distribution name.
    pub name: String,
    /// Extras, as written.
    pub extras: Vec<String>,
    /// Version constraints.
    pub specifier: SpecifierSet,
    /// Environment marker, unevaluated.
    pub marker: Option<String>,
}

impl Requirement {
    /// Parse a requirement line such as `pkg[extra]>=1.0; python_version>"3"`.
    /// Direct references (`pkg @ url`) carry an empty specifier.
    pub fn parse(line: &str) -> AgentEngineResult<Self> {
        let caps = requirement_regex()
            .captures(line)
            .ok_or_else(|| AgentEngineError::validation(format!("invalid requirement: {line:?}")))?;
        let rest = caps.name("rest").map(|m| m.as_str().trim()).unwrap_or("");
        let specifier = if rest.starts_with('@') {
            SpecifierSet::default()
        } else {
            SpecifierSet::parse(rest)?
        };
        Ok(Self {
            name: normalize_name(&caps["name"]),
            extras: caps
                .name("extras")
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            specifier,
            marker: caps
                .name("marker")
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }
}
