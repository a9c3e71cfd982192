//! Built-in catalog of read-only remote tools.
//!
//! A tool maps a name to an API path plus the arguments it accepts. Calling a
//! tool turns its (flat) JSON arguments into query parameters; arrays are
//! joined with commas.

use serde_json::{json, Map, Value};

use crate::traits::RemoteCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Boolean,
    /// A JSON array of strings, or an already comma-separated string.
    StringList,
}

impl ParamKind {
    fn schema(self) -> Value {
        match self {
            Self::String => json!({ "type": "string" }),
            Self::Integer => json!({ "type": "integer" }),
            Self::Boolean => json!({ "type": "boolean" }),
            Self::StringList => json!({ "type": "array", "items": { "type": "string" } }),
        }
    }

    fn expected(self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Integer => "an integer",
            Self::Boolean => "a boolean",
            Self::StringList => "an array of strings",
        }
    }
}

/// One argument accepted by a tool.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    /// Argument name as seen by the client.
    pub name: &'static str,
    /// Query parameter name sent to the remote API.
    pub query: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

const fn param(
    name: &'static str,
    query: &'static str,
    kind: ParamKind,
    required: bool,
    description: &'static str,
) -> ParamSpec {
    ParamSpec {
        name,
        query,
        kind,
        required,
        description,
    }
}

const PAGE: ParamSpec = param("p", "p", ParamKind::Integer, false, "Optional page number, starting at 1.");
const PAGE_SIZE: ParamSpec = param(
    "ps",
    "ps",
    ParamKind::Integer,
    false,
    "Optional page size, between 1 and 500.",
);
const PULL_REQUEST: ParamSpec = param(
    "pullRequest",
    "pullRequest",
    ParamKind::String,
    false,
    "Optional pull request identifier to scope the result to.",
);
const PROJECT_KEY: ParamSpec = param("projectKey", "projectKey", ParamKind::String, true, "The project key.");

/// A read-only remote tool.
#[derive(Debug)]
pub struct ToolSpec {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    /// API path relative to the remote base URL.
    pub path: &'static str,
    pub params: &'static [ParamSpec],
    /// Query parameters always sent with this tool.
    pub fixed_query: &'static [(&'static str, &'static str)],
}

/// Why a tool's arguments could not be turned into a remote call.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ArgumentError {
    #[error("Missing required argument: {name}")]
    Missing { name: &'static str },
    #[error("Argument `{name}` must be {expected}")]
    InvalidType {
        name: &'static str,
        expected: &'static str,
    },
}

impl ToolSpec {
    /// Tool definition as listed by `tools/list`.
    #[must_use]
    pub fn definition(&self) -> Value {
        let mut properties = Map::new();
        for p in self.params {
            let mut schema = p.kind.schema();
            schema["description"] = Value::from(p.description);
            properties.insert(p.name.to_string(), schema);
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();

        json!({
            "name": self.name,
            "title": self.title,
            "description": self.description,
            "inputSchema": {
                "type": "object",
                "properties": properties,
                "required": required,
            },
            "annotations": { "readOnlyHint": true },
        })
    }

    /// Builds the remote call for `arguments`. Arguments the tool does not
    /// declare are ignored; `null` counts as absent.
    ///
    /// # Errors
    ///
    /// Returns an [`ArgumentError`] for a missing required argument or one of
    /// the wrong JSON type.
    pub fn build_call(&self, arguments: &Map<String, Value>) -> Result<RemoteCall, ArgumentError> {
        let mut call = RemoteCall::new(self.path);
        for (key, value) in self.fixed_query {
            call = call.param(*key, *value);
        }
        for p in self.params {
            match arguments.get(p.name) {
                None | Some(Value::Null) if p.required => {
                    return Err(ArgumentError::Missing { name: p.name });
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    let rendered = render(p, value)?;
                    call = call.param(p.query, rendered);
                }
            }
        }
        Ok(call)
    }
}

fn render(p: &ParamSpec, value: &Value) -> Result<String, ArgumentError> {
    let invalid = || ArgumentError::InvalidType {
        name: p.name,
        expected: p.kind.expected(),
    };
    match (p.kind, value) {
        (ParamKind::String | ParamKind::StringList, Value::String(s)) => Ok(s.clone()),
        (ParamKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        (ParamKind::Boolean, Value::Bool(b)) => Ok(b.to_string()),
        (ParamKind::StringList, Value::Array(items)) => {
            let parts = items
                .iter()
                .map(|item| item.as_str().ok_or_else(invalid))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(parts.join(","))
        }
        _ => Err(invalid()),
    }
}

static BUILTIN_TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "search_my_sonarqube_projects",
        title: "Search My Projects",
        description: "Find projects visible to the caller, optionally filtered by a search query.",
        path: "api/components/search",
        params: &[
            param("q", "q", ParamKind::String, false, "Optional text to search project names and keys."),
            PAGE,
        ],
        fixed_query: &[("qualifiers", "TRK")],
    },
    ToolSpec {
        name: "search_sonar_issues_in_projects",
        title: "Search Issues in Projects",
        description: "Search for issues in the caller's projects.",
        path: "api/issues/search",
        params: &[
            param("projects", "projects", ParamKind::StringList, false, "Optional list of project keys to look in."),
            param("pullRequestId", "pullRequest", ParamKind::String, false, "Optional pull request to look in."),
            param(
                "severities",
                "impactSeverities",
                ParamKind::StringList,
                false,
                "Optional severities to filter by: INFO, LOW, MEDIUM, HIGH, BLOCKER.",
            ),
            PAGE,
            PAGE_SIZE,
        ],
        fixed_query: &[],
    },
    ToolSpec {
        name: "get_component_measures",
        title: "Get Component Measures",
        description: "Get measures for a project, directory or file.",
        path: "api/measures/component",
        params: &[
            param("projectKey", "component", ParamKind::String, true, "The component key."),
            param("metricKeys", "metricKeys", ParamKind::StringList, false, "Metric keys to return."),
            PULL_REQUEST,
        ],
        fixed_query: &[],
    },
    ToolSpec {
        name: "check_quality_gate_status",
        title: "Check Quality Gate Status",
        description: "Get the quality gate status of a project or pull request.",
        path: "api/qualitygates/project_status",
        params: &[PROJECT_KEY, PULL_REQUEST],
        fixed_query: &[],
    },
    ToolSpec {
        name: "list_quality_gates",
        title: "List Quality Gates",
        description: "List all quality gates.",
        path: "api/qualitygates/list",
        params: &[],
        fixed_query: &[],
    },
    ToolSpec {
        name: "search_security_hotspots",
        title: "Search Security Hotspots",
        description: "Search for security hotspots in a project.",
        path: "api/hotspots/search",
        params: &[
            PROJECT_KEY,
            param("status", "status", ParamKind::String, false, "Optional status: TO_REVIEW or REVIEWED."),
            PULL_REQUEST,
            PAGE,
            PAGE_SIZE,
        ],
        fixed_query: &[],
    },
    ToolSpec {
        name: "get_duplications",
        title: "Get Duplications",
        description: "Get duplicated blocks for a file.",
        path: "api/duplications/show",
        params: &[
            param("key", "key", ParamKind::String, true, "The file key."),
            PULL_REQUEST,
        ],
        fixed_query: &[],
    },
    ToolSpec {
        name: "show_rule",
        title: "Show Rule",
        description: "Show the details of a rule.",
        path: "api/rules/show",
        params: &[param("key", "key", ParamKind::String, true, "The rule key, e.g. `rust:S1481`.")],
        fixed_query: &[],
    },
    ToolSpec {
        name: "list_languages",
        title: "List Languages",
        description: "List the languages supported by the analysis service.",
        path: "api/languages/list",
        params: &[param("q", "q", ParamKind::String, false, "Optional pattern to match language keys or names.")],
        fixed_query: &[],
    },
    ToolSpec {
        name: "search_metrics",
        title: "Search Metrics",
        description: "List the metrics known to the analysis service.",
        path: "api/metrics/search",
        params: &[PAGE, PAGE_SIZE],
        fixed_query: &[],
    },
    ToolSpec {
        name: "get_system_health",
        title: "Get System Health",
        description: "Get the health status of the analysis service.",
        path: "api/system/health",
        params: &[],
        fixed_query: &[],
    },
];

/// Name-indexed set of tools exposed to clients.
#[derive(Debug)]
pub struct ToolCatalog {
    tools: &'static [ToolSpec],
}

impl ToolCatalog {
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            tools: BUILTIN_TOOLS,
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'static ToolSpec> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<Value> {
        self.tools.iter().map(ToolSpec::definition).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
