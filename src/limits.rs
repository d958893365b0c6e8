//! Per-route upload size limits.
//!
//! Limits come from a declarative YAML document with one global ceiling and
//! zero or more business-line entries, each optionally carrying sub-line
//! entries for specific routes:
//!
//! ```yaml
//! global: 1048576
//! configs:
//!   - bizLine: avatar
//!     maxLength: 2097152
//!     subs:
//!       - bizLine: /avatar/original
//!         maxLength: 8388608
//! ```
//!
//! Every line and sub-line lands in one flat table, so exact-route and
//! business-line-prefix lookups share a single data structure. Resolution is
//! total: anything unmatched falls back to the global ceiling.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Deserialize;
use thiserror::Error;

/// Table key under which the global ceiling is registered.
const GLOBAL_KEY: &str = "global";

/// Failure to build the rule table. Startup-fatal: no uploads can be
/// processed until the document is corrected.
///
/// `Clone` so the initialize-once loader can hand the same failure to every
/// concurrent first caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LimitsError {
    #[error("failed to read size rules {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse size rules {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Pluggable source of per-route size limits.
///
/// Must be total (no error path) and safe for concurrent reads; the
/// orchestrator calls it once per request.
pub trait SizeProvider: Send + Sync {
    /// Maximum allowed file size in bytes for `route_key`.
    fn size_for(&self, route_key: &str) -> i64;
}

#[derive(Debug, Clone, Deserialize)]
struct RulesDoc {
    #[serde(default)]
    global: i64,
    #[serde(default)]
    configs: Vec<BizLineDoc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BizLineDoc {
    biz_line: String,
    max_length: i64,
    #[serde(default)]
    subs: Vec<SubLineDoc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubLineDoc {
    biz_line: String,
    max_length: i64,
}

/// One registered rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeRule {
    /// First non-empty path segment of the configured route.
    pub biz_name: String,
    /// The route string as configured.
    pub route_key: String,
    /// Byte ceiling for matching routes.
    pub limit: i64,
}

/// Immutable flat rule table, shared read-only across all requests.
#[derive(Debug)]
pub struct SizeRules {
    rules: HashMap<String, SizeRule>,
}

impl SizeRules {
    /// Build the table from a YAML document on disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LimitsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| LimitsError::Read {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        Self::from_yaml(&text).map_err(|err| match err {
            LimitsError::Parse { reason, .. } => LimitsError::Parse {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Build the table from YAML text.
    ///
    /// The key `global` is reserved for the document-level ceiling; a line
    /// or sub-line configured with that name would silently replace it, so
    /// such documents are rejected.
    pub fn from_yaml(text: &str) -> Result<Self, LimitsError> {
        let doc: RulesDoc = serde_yaml::from_str(text).map_err(|err| LimitsError::Parse {
            path: "<inline>".to_string(),
            reason: err.to_string(),
        })?;

        let mut rules = HashMap::new();
        rules.insert(
            GLOBAL_KEY.to_string(),
            SizeRule {
                biz_name: GLOBAL_KEY.to_string(),
                route_key: String::new(),
                limit: doc.global,
            },
        );
        for line in doc.configs {
            for (route_key, limit) in std::iter::once((line.biz_line.clone(), line.max_length))
                .chain(line.subs.into_iter().map(|sub| (sub.biz_line, sub.max_length)))
            {
                if route_key == GLOBAL_KEY {
                    return Err(LimitsError::Parse {
                        path: "<inline>".to_string(),
                        reason: format!(
                            "line name {GLOBAL_KEY:?} is reserved for the global ceiling"
                        ),
                    });
                }
                let rule = SizeRule {
                    biz_name: biz_name_of(&route_key).to_string(),
                    route_key: route_key.clone(),
                    limit,
                };
                rules.insert(route_key, rule);
            }
        }
        Ok(Self { rules })
    }

    /// Resolve the limit for a route key.
    ///
    /// Lookup order: exact route match, business-line (first non-empty path
    /// segment) match, global. Never fails; an empty key resolves straight
    /// to the global ceiling.
    pub fn resolve(&self, route_key: &str) -> i64 {
        if route_key.is_empty() {
            return self.global();
        }
        if let Some(rule) = self.rules.get(route_key) {
            return rule.limit;
        }
        if let Some(rule) = self.rules.get(biz_name_of(route_key)) {
            return rule.limit;
        }
        self.global()
    }

    fn global(&self) -> i64 {
        // Inserted unconditionally by every constructor.
        self.rules[GLOBAL_KEY].limit
    }
}

impl SizeProvider for SizeRules {
    fn size_for(&self, route_key: &str) -> i64 {
        let limit = self.resolve(route_key);
        tracing::debug!(route = route_key, limit, "resolved upload size limit");
        limit
    }
}

/// First non-empty `/`-separated segment of a route, or `""`.
fn biz_name_of(route_key: &str) -> &str {
    route_key.split('/').find(|segment| !segment.is_empty()).unwrap_or("")
}

static SHARED_RULES: OnceCell<Result<Arc<SizeRules>, LimitsError>> = OnceCell::new();

/// Load the process-wide rule table, once.
///
/// The first caller performs the load; all callers, including concurrent
/// first callers, observe the same `Result`. A failed load stays failed for
/// the process lifetime, matching the startup-fatal contract. Subsequent
/// calls ignore `path`.
pub fn shared_from_file(path: impl AsRef<Path>) -> Result<Arc<SizeRules>, LimitsError> {
    SHARED_RULES
        .get_or_init(|| SizeRules::from_file(path).map(Arc::new))
        .clone()
}
