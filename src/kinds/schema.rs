//! Declarative schema validation for connection configs.
//!
//! Schemas are looked up by name through the [`SchemaValidator`] seam. The
//! built-in [`BuiltinSchemas`] covers every [`ConnectionKind`] with a compact
//! rule table; violations are reported in JSON-Schema style
//! (`"(root): url is required"`, `"token: Invalid type. Expected: string, given: integer"`)
//! and every violation is collected.
//!
//! [`ConnectionKind`]: super::ConnectionKind

use std::fmt;

use serde_json::Value;

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Dotted field path, or `(root)`.
    pub field: String,
    pub description: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.description)
    }
}

/// Validates a document against a named schema.
pub trait SchemaValidator: Send + Sync {
    fn has_schema(&self, schema: &str) -> bool;

    /// Returns `None` when no schema with that name is registered.
    fn validate(&self, schema: &str, document: &Value) -> Option<Vec<SchemaViolation>>;
}

#[derive(Debug, Clone, Copy)]
enum Ty {
    String,
    Boolean,
    Number,
    Integer,
    StringArray,
    ObjectArray,
    Object(&'static [Field]),
    /// Any object, unchecked.
    AnyObject,
}

impl Ty {
    fn name(self) -> &'static str {
        match self {
            Ty::String => "string",
            Ty::Boolean => "boolean",
            Ty::Number => "number",
            Ty::Integer => "integer",
            Ty::StringArray | Ty::ObjectArray => "array",
            Ty::Object(_) | Ty::AnyObject => "object",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Format {
    Uri,
}

#[derive(Debug, Clone, Copy)]
struct Field {
    name: &'static str,
    ty: Ty,
    required: bool,
    format: Option<Format>,
    min_length: usize,
}

const fn field(name: &'static str, ty: Ty) -> Field {
    Field {
        name,
        ty,
        required: false,
        format: None,
        min_length: 0,
    }
}

const fn required(name: &'static str, ty: Ty) -> Field {
    Field {
        name,
        ty,
        required: true,
        format: None,
        min_length: 0,
    }
}

const fn uri(mut f: Field) -> Field {
    f.format = Some(Format::Uri);
    f
}

const fn non_empty(mut f: Field) -> Field {
    f.min_length = 1;
    f
}

struct Schema {
    name: &'static str,
    fields: &'static [Field],
    additional_properties: bool,
}

const RATE_LIMIT: &[Field] = &[
    required("enabled", Ty::Boolean),
    required("requestsPerHour", Ty::Number),
];

const GITHUB_APP_DETAILS: &[Field] = &[
    field("appID", Ty::String),
    field("appId", Ty::String),
    field("installationID", Ty::Integer),
    field("installationId", Ty::Integer),
    field("baseURL", Ty::String),
    field("cloneAllRepositories", Ty::Boolean),
    field("privateKey", Ty::String),
];

const BITBUCKET_WEBHOOKS: &[Field] = &[required("secret", Ty::String)];
const BITBUCKET_PLUGIN: &[Field] = &[
    field("webhooks", Ty::Object(BITBUCKET_WEBHOOKS)),
    field("permissions", Ty::String),
];

const AWS_GIT_CREDENTIALS: &[Field] = &[
    non_empty(required("username", Ty::String)),
    non_empty(required("password", Ty::String)),
];

const SCHEMAS: &[Schema] = &[
    Schema {
        name: "github",
        fields: &[
            uri(field("url", Ty::String)),
            field("token", Ty::String),
            field("gitHubAppDetails", Ty::Object(GITHUB_APP_DETAILS)),
            field("repos", Ty::StringArray),
            field("orgs", Ty::StringArray),
            field("repositoryQuery", Ty::StringArray),
            field("exclude", Ty::ObjectArray),
            field("authorization", Ty::AnyObject),
            field("rateLimit", Ty::Object(RATE_LIMIT)),
            field("webhooks", Ty::ObjectArray),
            field("repositoryPathPattern", Ty::String),
            field("certificate", Ty::String),
            field("initialRepositoryEnablement", Ty::Boolean),
            field("cloudDefault", Ty::Boolean),
        ],
        additional_properties: false,
    },
    Schema {
        name: "gitlab",
        fields: &[
            uri(field("url", Ty::String)),
            non_empty(required("token", Ty::String)),
            field("token.type", Ty::String),
            field("token.oauth.refresh", Ty::String),
            field("token.oauth.expiry", Ty::Integer),
            field("projects", Ty::ObjectArray),
            field("projectQuery", Ty::StringArray),
            field("exclude", Ty::ObjectArray),
            field("authorization", Ty::AnyObject),
            field("rateLimit", Ty::Object(RATE_LIMIT)),
            field("webhooks", Ty::ObjectArray),
            field("repositoryPathPattern", Ty::String),
            field("nameTransformations", Ty::ObjectArray),
            field("certificate", Ty::String),
            field("cloudDefault", Ty::Boolean),
        ],
        additional_properties: false,
    },
    Schema {
        name: "bitbucket_server",
        fields: &[
            uri(required("url", Ty::String)),
            non_empty(required("username", Ty::String)),
            field("token", Ty::String),
            field("password", Ty::String),
            field("repos", Ty::StringArray),
            field("repositoryQuery", Ty::StringArray),
            field("exclude", Ty::ObjectArray),
            field("authorization", Ty::AnyObject),
            field("rateLimit", Ty::Object(RATE_LIMIT)),
            field("webhooks", Ty::Object(BITBUCKET_WEBHOOKS)),
            field("plugin", Ty::Object(BITBUCKET_PLUGIN)),
            field("repositoryPathPattern", Ty::String),
            field("certificate", Ty::String),
            field("gitURLType", Ty::String),
        ],
        additional_properties: false,
    },
    Schema {
        name: "bitbucket_cloud",
        fields: &[
            uri(field("url", Ty::String)),
            non_empty(required("username", Ty::String)),
            non_empty(required("appPassword", Ty::String)),
            field("teams", Ty::StringArray),
            field("exclude", Ty::ObjectArray),
            field("authorization", Ty::AnyObject),
            field("rateLimit", Ty::Object(RATE_LIMIT)),
            field("webhookSecret", Ty::String),
            field("repositoryPathPattern", Ty::String),
            field("gitURLType", Ty::String),
            field("apiURL", Ty::String),
        ],
        additional_properties: false,
    },
    Schema {
        name: "aws_codecommit",
        fields: &[
            non_empty(required("region", Ty::String)),
            non_empty(required("accessKeyID", Ty::String)),
            non_empty(required("secretAccessKey", Ty::String)),
            required("gitCredentials", Ty::Object(AWS_GIT_CREDENTIALS)),
            field("repositoryPathPattern", Ty::String),
            field("exclude", Ty::ObjectArray),
        ],
        additional_properties: false,
    },
    Schema {
        name: "gitolite",
        fields: &[
            non_empty(required("host", Ty::String)),
            required("prefix", Ty::String),
            field("exclude", Ty::ObjectArray),
            field("phabricator", Ty::AnyObject),
        ],
        additional_properties: false,
    },
    Schema {
        name: "perforce",
        fields: &[
            non_empty(required("p4.port", Ty::String)),
            non_empty(required("p4.user", Ty::String)),
            non_empty(required("p4.passwd", Ty::String)),
            field("depots", Ty::StringArray),
            field("maxChanges", Ty::Integer),
            field("authorization", Ty::AnyObject),
            field("rateLimit", Ty::Object(RATE_LIMIT)),
            field("repositoryPathPattern", Ty::String),
            field("fusionClientMapping", Ty::AnyObject),
        ],
        additional_properties: false,
    },
    Schema {
        name: "other",
        fields: &[
            uri(field("url", Ty::String)),
            required("repos", Ty::StringArray),
            field("repositoryPathPattern", Ty::String),
            field("exclude", Ty::ObjectArray),
        ],
        additional_properties: false,
    },
];

/// Rule-table schemas for every built-in connection kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinSchemas;

impl SchemaValidator for BuiltinSchemas {
    fn has_schema(&self, schema: &str) -> bool {
        SCHEMAS.iter().any(|s| s.name == schema)
    }

    fn validate(&self, schema: &str, document: &Value) -> Option<Vec<SchemaViolation>> {
        let schema = SCHEMAS.iter().find(|s| s.name == schema)?;
        let mut violations = Vec::new();
        check_object(
            "(root)",
            schema.fields,
            schema.additional_properties,
            document,
            &mut violations,
        );
        Some(violations)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "(root)" {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

fn invalid_type(path: String, expected: &str, value: &Value, out: &mut Vec<SchemaViolation>) {
    out.push(SchemaViolation {
        field: path,
        description: format!(
            "Invalid type. Expected: {}, given: {}",
            expected,
            json_type_name(value)
        ),
    });
}

fn check_object(
    path: &str,
    fields: &[Field],
    additional_properties: bool,
    value: &Value,
    out: &mut Vec<SchemaViolation>,
) {
    let Some(object) = value.as_object() else {
        invalid_type(path.to_string(), "object", value, out);
        return;
    };

    for f in fields.iter().filter(|f| f.required) {
        if !object.contains_key(f.name) {
            out.push(SchemaViolation {
                field: path.to_string(),
                description: format!("{} is required", f.name),
            });
        }
    }

    if !additional_properties {
        for key in object.keys() {
            if !fields.iter().any(|f| f.name == key) {
                out.push(SchemaViolation {
                    field: path.to_string(),
                    description: format!("Additional property {} is not allowed", key),
                });
            }
        }
    }

    for f in fields {
        if let Some(v) = object.get(f.name) {
            check_field(&child_path(path, f.name), f, v, out);
        }
    }
}

fn check_field(path: &str, f: &Field, value: &Value, out: &mut Vec<SchemaViolation>) {
    match f.ty {
        Ty::String => {
            let Some(s) = value.as_str() else {
                return invalid_type(path.to_string(), f.ty.name(), value, out);
            };
            if s.chars().count() < f.min_length {
                out.push(SchemaViolation {
                    field: path.to_string(),
                    description: format!(
                        "String length must be greater than or equal to {}",
                        f.min_length
                    ),
                });
            }
            if let Some(Format::Uri) = f.format {
                if url::Url::parse(s).is_err() {
                    out.push(SchemaViolation {
                        field: path.to_string(),
                        description: "Does not match format 'uri'".to_string(),
                    });
                }
            }
        }
        Ty::Boolean if !value.is_boolean() => invalid_type(path.to_string(), f.ty.name(), value, out),
        Ty::Number if !value.is_number() => invalid_type(path.to_string(), f.ty.name(), value, out),
        Ty::Integer if !(value.is_i64() || value.is_u64()) => {
            invalid_type(path.to_string(), f.ty.name(), value, out)
        }
        Ty::StringArray => match value.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    if !item.is_string() {
                        invalid_type(format!("{}.{}", path, i), "string", item, out);
                    }
                }
            }
            None => invalid_type(path.to_string(), f.ty.name(), value, out),
        },
        Ty::ObjectArray => match value.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    if !item.is_object() {
                        invalid_type(format!("{}.{}", path, i), "object", item, out);
                    }
                }
            }
            None => invalid_type(path.to_string(), f.ty.name(), value, out),
        },
        Ty::Object(children) => check_object(path, children, true, value, out),
        Ty::AnyObject if !value.is_object() => invalid_type(path.to_string(), f.ty.name(), value, out),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn violations(schema: &str, doc: Value) -> Vec<String> {
        BuiltinSchemas
            .validate(schema, &doc)
            .expect("schema exists")
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn unknown_schema_is_none() {
        assert!(!BuiltinSchemas.has_schema("phabricator"));
        assert!(BuiltinSchemas.validate("phabricator", &json!({})).is_none());
    }

    #[test]
    fn collects_every_violation() {
        let errs = violations(
            "bitbucket_server",
            json!({"url": 5, "token": true, "repos": "a/b", "bogus": 1}),
        );
        assert!(errs.contains(&"(root): username is required".to_string()));
        assert!(errs.contains(&"(root): Additional property bogus is not allowed".to_string()));
        assert!(errs.contains(&"url: Invalid type. Expected: string, given: integer".to_string()));
        assert!(errs.contains(&"token: Invalid type. Expected: string, given: boolean".to_string()));
        assert!(errs.contains(&"repos: Invalid type. Expected: array, given: string".to_string()));
        assert_eq!(errs.len(), 5);
    }

    #[test]
    fn nested_objects_are_checked() {
        let errs = violations(
            "github",
            json!({"token": "t", "rateLimit": {"enabled": "yes"}}),
        );
        assert_eq!(
            errs,
            vec![
                "rateLimit: requestsPerHour is required".to_string(),
                "rateLimit.enabled: Invalid type. Expected: boolean, given: string".to_string(),
            ]
        );
    }

    #[test]
    fn uri_format_and_min_length() {
        let errs = violations(
            "perforce",
            json!({"p4.port": "", "p4.user": "u", "p4.passwd": "p"}),
        );
        assert_eq!(
            errs,
            vec!["p4.port: String length must be greater than or equal to 1".to_string()]
        );

        let errs = violations("github", json!({"url": "not a url"}));
        assert_eq!(errs, vec!["url: Does not match format 'uri'".to_string()]);
    }

    #[test]
    fn valid_document_has_no_violations() {
        let errs = violations(
            "github",
            json!({"url": "https://github.com", "token": "t", "repos": ["a/b"], "authorization": {}}),
        );
        assert!(errs.is_empty());
    }
}
