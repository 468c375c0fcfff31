//! Declarative routing rules.
//!
//! # Responsibilities
//! - Load an ordered rule set from a TOML document
//! - Evaluate conditions against the typed request facts
//! - Return the routing group of the first matching rule
//!
//! # Rule File
//! ```toml
//! [[rules]]
//! name = "airflow"
//! description = "scheduled workloads go to the etl clusters"
//! routing_group = "etl"
//! condition = { header_equals = { name = "X-Trino-Source", value = "airflow" } }
//! ```
//!
//! # Design Decisions
//! - Rules are sorted by ascending `priority` with a stable sort, so equal
//!   priorities keep file order
//! - First match wins; evaluation returns the group instead of writing it
//!   into shared state
//! - The rule set is immutable after loading and shared across requests

use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::http::request::RequestContext;

/// Errors raised while loading a rule file.
#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("cannot read rules file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse rules: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("rule #{0} has an empty name")]
    EmptyName(usize),

    #[error("rule '{0}' has an empty routing group")]
    EmptyGroup(String),
}

/// Errors raised while evaluating one request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleEvaluationError {
    #[error("rule '{rule}': header '{header}' is not valid UTF-8")]
    InvalidHeader { rule: String, header: String },

    #[error("rule '{rule}': request body is not valid UTF-8")]
    InvalidBody { rule: String },
}

/// Failure inside a condition, before the rule name is attached.
#[derive(Debug)]
enum ConditionError {
    Header(String),
    Body,
}

/// A boolean condition over request facts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Constant result.
    Const(bool),
    /// Header is present with exactly this value.
    HeaderEquals { name: String, value: String },
    /// Header is present and contains this substring.
    HeaderContains { name: String, value: String },
    /// Header is present.
    HeaderPresent(String),
    /// Request path starts with this prefix.
    PathPrefix(String),
    /// Request method (case-insensitive).
    Method(String),
    /// Request body contains this substring.
    BodyContains(String),
    /// Client IP address, as text, starts with this prefix.
    ClientIpPrefix(String),
    /// Collaborator-injected attribute has this value.
    AttributeEquals { name: String, value: String },
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    fn evaluate(&self, ctx: &RequestContext) -> Result<bool, ConditionError> {
        let header = |name: &str| {
            ctx.header(name)
                .map_err(|_| ConditionError::Header(name.to_string()))
        };

        Ok(match self {
            Condition::Const(value) => *value,
            Condition::HeaderEquals { name, value } => header(name.as_str())? == Some(value.as_str()),
            Condition::HeaderContains { name, value } => {
                header(name.as_str())?.is_some_and(|h| h.contains(value.as_str()))
            }
            Condition::HeaderPresent(name) => ctx.headers.contains_key(name.as_str()),
            Condition::PathPrefix(prefix) => ctx.path.starts_with(prefix.as_str()),
            Condition::Method(method) => ctx.method.as_str().eq_ignore_ascii_case(method),
            Condition::BodyContains(needle) => std::str::from_utf8(&ctx.body)
                .map_err(|_| ConditionError::Body)?
                .contains(needle.as_str()),
            Condition::ClientIpPrefix(prefix) => ctx
                .client_addr
                .is_some_and(|addr| addr.ip().to_string().starts_with(prefix.as_str())),
            Condition::AttributeEquals { name, value } => {
                ctx.attributes.get(name) == Some(value)
            }
            Condition::All(conditions) => {
                for c in conditions {
                    if !c.evaluate(ctx)? {
                        return Ok(false);
                    }
                }
                true
            }
            Condition::Any(conditions) => {
                for c in conditions {
                    if c.evaluate(ctx)? {
                        return Ok(true);
                    }
                }
                false
            }
            Condition::Not(inner) => !inner.evaluate(ctx)?,
        })
    }
}

/// One rule: when `condition` holds, route to `routing_group`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoutingRule {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i32,
    pub condition: Condition,
    pub routing_group: String,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<RoutingRule>,
}

/// An ordered, immutable set of routing rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<RoutingRule>,
}

impl RuleSet {
    /// Build a rule set, ordering rules by priority (stable).
    pub fn new(mut rules: Vec<RoutingRule>) -> Self {
        rules.sort_by_key(|r| r.priority);
        Self { rules }
    }

    /// Parse a rule set from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, RuleLoadError> {
        let file: RuleFile = toml::from_str(content)?;
        for (i, rule) in file.rules.iter().enumerate() {
            if rule.name.trim().is_empty() {
                return Err(RuleLoadError::EmptyName(i));
            }
            if rule.routing_group.trim().is_empty() {
                return Err(RuleLoadError::EmptyGroup(rule.name.clone()));
            }
        }
        Ok(Self::new(file.rules))
    }

    /// Read and parse a rule file.
    pub fn load(path: &Path) -> Result<Self, RuleLoadError> {
        let content = fs::read_to_string(path).map_err(|source| RuleLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Routing group of the first matching rule, or `None` when no rule
    /// matches.
    pub fn evaluate(&self, ctx: &RequestContext) -> Result<Option<&str>, RuleEvaluationError> {
        for rule in &self.rules {
            let matched = rule.condition.evaluate(ctx).map_err(|e| match e {
                ConditionError::Header(header) => RuleEvaluationError::InvalidHeader {
                    rule: rule.name.clone(),
                    header,
                },
                ConditionError::Body => RuleEvaluationError::InvalidBody {
                    rule: rule.name.clone(),
                },
            })?;
            if matched {
                tracing::trace!(rule = %rule.name, group = %rule.routing_group, "Routing rule matched");
                return Ok(Some(rule.routing_group.as_str()));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, HeaderValue, Method};

    fn rule(name: &str, condition: Condition, group: &str) -> RoutingRule {
        RoutingRule {
            name: name.into(),
            description: None,
            priority: 0,
            condition,
            routing_group: group.into(),
        }
    }

    fn request(headers: &[(&'static str, &'static str)]) -> RequestContext {
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            map.insert(*k, HeaderValue::from_static(*v));
        }
        RequestContext::new(Method::POST, "/v1/statement", None, map)
    }

    #[test]
    fn first_match_wins() {
        let rules = RuleSet::new(vec![
            rule("r1", Condition::Const(false), "etl"),
            rule("r2", Condition::Const(true), "scheduled"),
            rule("r3", Condition::Const(true), "adhoc"),
        ]);
        for _ in 0..10 {
            assert_eq!(rules.evaluate(&request(&[])).unwrap(), Some("scheduled"));
        }
    }

    #[test]
    fn no_match_is_undetermined() {
        let rules = RuleSet::new(vec![rule("r1", Condition::Const(false), "etl")]);
        assert_eq!(rules.evaluate(&request(&[])).unwrap(), None);
        assert_eq!(RuleSet::default().evaluate(&request(&[])).unwrap(), None);
    }

    #[test]
    fn priority_orders_before_file_order() {
        let mut late = rule("late", Condition::Const(true), "adhoc");
        late.priority = 5;
        let mut early = rule("early", Condition::Const(true), "scheduled");
        early.priority = -1;
        let rules = RuleSet::new(vec![late, early]);
        assert_eq!(rules.evaluate(&request(&[])).unwrap(), Some("scheduled"));
    }

    #[test]
    fn header_and_composite_conditions() {
        let rules = RuleSet::new(vec![
            rule(
                "airflow",
                Condition::All(vec![
                    Condition::HeaderEquals {
                        name: "X-Trino-Source".into(),
                        value: "airflow".into(),
                    },
                    Condition::Not(Box::new(Condition::HeaderPresent("X-Trino-Client-Tags".into()))),
                ]),
                "etl",
            ),
            rule(
                "dashboards",
                Condition::Any(vec![
                    Condition::HeaderContains {
                        name: "X-Trino-Client-Tags".into(),
                        value: "dashboard".into(),
                    },
                    Condition::Method("GET".into()),
                ]),
                "bi",
            ),
        ]);

        assert_eq!(
            rules.evaluate(&request(&[("x-trino-source", "airflow")])).unwrap(),
            Some("etl")
        );
        assert_eq!(
            rules
                .evaluate(&request(&[
                    ("x-trino-source", "airflow"),
                    ("x-trino-client-tags", "team-a,dashboard"),
                ]))
                .unwrap(),
            Some("bi")
        );
        assert_eq!(rules.evaluate(&request(&[("x-trino-source", "cli")])).unwrap(), None);
    }

    #[test]
    fn body_path_client_and_attribute_conditions() {
        let ctx = request(&[])
            .with_body(Bytes::from_static(b"SELECT * FROM hive.sales.orders"))
            .with_client_addr("10.1.2.3:5555".parse().unwrap())
            .with_attribute("tenant", "finance");

        let matches = |c: Condition| {
            RuleSet::new(vec![rule("r", c, "g")])
                .evaluate(&ctx)
                .unwrap()
                .is_some()
        };
        assert!(matches(Condition::BodyContains("hive.sales".into())));
        assert!(matches(Condition::PathPrefix("/v1/".into())));
        assert!(matches(Condition::ClientIpPrefix("10.1.".into())));
        assert!(!matches(Condition::ClientIpPrefix("192.".into())));
        assert!(matches(Condition::AttributeEquals {
            name: "tenant".into(),
            value: "finance".into()
        }));
        assert!(!matches(Condition::AttributeEquals {
            name: "tenant".into(),
            value: "sales".into()
        }));
    }

    #[test]
    fn invalid_body_is_an_evaluation_error() {
        let ctx = request(&[]).with_body(Bytes::from_static(&[0xff, 0xfe]));
        let rules = RuleSet::new(vec![rule("body", Condition::BodyContains("x".into()), "g")]);
        assert_eq!(
            rules.evaluate(&ctx).unwrap_err(),
            RuleEvaluationError::InvalidBody { rule: "body".into() }
        );
    }

    #[test]
    fn parses_toml_rules() {
        let rules = RuleSet::from_toml(
            r#"
            [[rules]]
            name = "airflow"
            description = "airflow to etl"
            routing_group = "etl"
            condition = { header_equals = { name = "X-Trino-Source", value = "airflow" } }

            [[rules]]
            name = "select-one"
            routing_group = "adhoc"
            condition = { all = [ { method = "POST" }, { body_contains = "SELECT 1" } ] }

            [[rules]]
            name = "fallthrough"
            routing_group = "never"
            condition = { const = false }
            "#,
        )
        .unwrap();

        assert_eq!(rules.len(), 3);
        assert_eq!(rules.rules()[0].description.as_deref(), Some("airflow to etl"));

        let ctx = request(&[]).with_body(Bytes::from_static(b"SELECT 1"));
        assert_eq!(rules.evaluate(&ctx).unwrap(), Some("adhoc"));
    }

    #[test]
    fn rejects_malformed_rules() {
        assert!(matches!(
            RuleSet::from_toml("[[rules]]\nname = \"x\""),
            Err(RuleLoadError::Parse(_))
        ));
        assert!(matches!(
            RuleSet::from_toml(
                "[[rules]]\nname = \"x\"\nrouting_group = \"\"\ncondition = { const = true }"
            ),
            Err(RuleLoadError::EmptyGroup(_))
        ));
        assert!(matches!(
            RuleSet::load(Path::new("/no/such/rules.toml")),
            Err(RuleLoadError::Io { .. })
        ));
    }
}
