use http::Method;
use serde_json::Value;

use super::{CorsConfigError, CorsPolicy};

/// Path-specific CORS policy.
///
/// - `Inherit`: use the global configuration
/// - `Disabled`: no CORS handling at all for matching paths
/// - `Custom`: replace methods, headers, credentials, exposed headers and
///   max-age; origins always come from the global configuration
#[derive(Debug, Clone)]
pub enum RouteCorsPolicy {
    Inherit,
    Disabled,
    Custom(RouteCorsConfig),
}

/// Override values for a `Custom` policy. `None` keeps the global value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteCorsConfig {
    pub allowed_headers: Option<Vec<String>>,
    pub allowed_methods: Option<Vec<Method>>,
    pub allow_credentials: Option<bool>,
    pub expose_headers: Option<Vec<String>>,
    pub max_age: Option<u32>,
}

impl RouteCorsConfig {
    /// Merge these overrides onto the global policy.
    ///
    /// # Errors
    ///
    /// Credentials cannot be switched on for a wildcard or empty origin set.
    pub(crate) fn apply(&self, global: &CorsPolicy) -> Result<CorsPolicy, CorsConfigError> {
        let mut policy = global.clone();
        if let Some(h) = &self.allowed_headers {
            policy.allowed_headers.clone_from(h);
        }
        if let Some(m) = &self.allowed_methods {
            policy.allowed_methods.clone_from(m);
        }
        if let Some(c) = self.allow_credentials {
            policy.allow_credentials = c;
        }
        if let Some(e) = &self.expose_headers {
            policy.expose_headers.clone_from(e);
        }
        if self.max_age.is_some() {
            policy.max_age = self.max_age;
        }
        policy.validate()?;
        Ok(policy)
    }
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value?.as_array().map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    })
}

/// Read a policy from a configuration value.
///
/// Supports multiple formats:
/// - Object: `{ allowedHeaders: [...], allowCredentials: true }` → `Custom`
/// - String: `"inherit"` → `Inherit`
/// - Boolean: `false` → `Disabled`, `true` → `Inherit`
///
/// # Errors
///
/// [`CorsConfigError::InvalidOverride`] for anything else, including
/// unknown methods.
pub fn parse_route_cors_policy(path: &str, value: &Value) -> Result<RouteCorsPolicy, CorsConfigError> {
    let invalid = |reason: String| CorsConfigError::InvalidOverride {
        path: path.to_string(),
        reason,
    };
    match value {
        Value::Bool(false) => Ok(RouteCorsPolicy::Disabled),
        Value::Bool(true) => Ok(RouteCorsPolicy::Inherit),
        Value::String(s) if s == "inherit" => Ok(RouteCorsPolicy::Inherit),
        Value::String(s) if s == "disabled" => Ok(RouteCorsPolicy::Disabled),
        Value::Object(obj) => {
            let allowed_methods = match string_list(obj.get("allowedMethods")) {
                Some(names) => Some(
                    names
                        .iter()
                        .map(|n| {
                            Method::from_bytes(n.to_ascii_uppercase().as_bytes())
                                .map_err(|_| invalid(format!("unknown method `{n}`")))
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                None => None,
            };
            let max_age = match obj.get("maxAge") {
                Some(v) => Some(
                    v.as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .ok_or_else(|| invalid("maxAge must be a non-negative integer".into()))?,
                ),
                None => None,
            };
            Ok(RouteCorsPolicy::Custom(RouteCorsConfig {
                allowed_headers: string_list(obj.get("allowedHeaders")),
                allowed_methods,
                allow_credentials: obj.get("allowCredentials").and_then(Value::as_bool),
                expose_headers: string_list(obj.get("exposeHeaders")),
                max_age,
            }))
        }
        other => Err(invalid(format!("unsupported value {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_forms() {
        assert!(matches!(
            parse_route_cors_policy("/a", &json!(false)),
            Ok(RouteCorsPolicy::Disabled)
        ));
        assert!(matches!(
            parse_route_cors_policy("/a", &json!("inherit")),
            Ok(RouteCorsPolicy::Inherit)
        ));
        match parse_route_cors_policy(
            "/a",
            &json!({"allowedMethods": ["get", "PATCH"], "maxAge": 60, "allowCredentials": true}),
        ) {
            Ok(RouteCorsPolicy::Custom(cfg)) => {
                assert_eq!(cfg.allowed_methods, Some(vec![Method::GET, Method::PATCH]));
                assert_eq!(cfg.max_age, Some(60));
                assert_eq!(cfg.allow_credentials, Some(true));
                assert_eq!(cfg.allowed_headers, None);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse_route_cors_policy("/a", &json!(42)).is_err());
        assert!(parse_route_cors_policy("/a", &json!({"allowedMethods": ["NOT A METHOD"]})).is_err());
    }
}
