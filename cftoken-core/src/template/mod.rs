//! Policy template rendering.
//!
//! A template is read from a file or taken inline, executed against a
//! variable context and must produce a JSON array of policy documents.

mod engine;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{Result, TokenError};
use crate::types::PolicyDocument;
use engine::Template;

/// Variable context passed to a template, keyed by variable name.
pub type TemplateVariables = BTreeMap<String, serde_json::Value>;

/// Where a zone's policy template lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateRef {
    File(String),
    Inline(String),
}

impl TemplateRef {
    pub fn render(&self, vars: &TemplateVariables) -> Result<Vec<PolicyDocument>> {
        match self {
            Self::File(path) => render(Some(path), None, vars),
            Self::Inline(text) => render(None, Some(text), vars),
        }
    }
}

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// Render policies from exactly one of a template file or inline template.
///
/// Blank sources count as absent. A file path has `~` and `$VAR` references
/// expanded before it is read. The template runs against `vars`, and its
/// trimmed output must be a non-empty JSON array of policy documents.
///
/// # Errors
///
/// - [`TokenError::NoTemplateSource`] or [`TokenError::AmbiguousTemplateSource`]
///   unless exactly one source is given.
/// - [`TokenError::TemplateRead`] when the file cannot be read.
/// - [`TokenError::TemplateSyntax`] or [`TokenError::TemplateExecution`] when
///   the template does not parse or fails while running.
/// - [`TokenError::TemplateOutputInvalid`] or [`TokenError::NoPolicies`] when
///   the output is not a usable policy list.
pub fn render(
    template_file: Option<&str>,
    template_inline: Option<&str>,
    vars: &TemplateVariables,
) -> Result<Vec<PolicyDocument>> {
    let template_file = template_file.filter(|s| !s.trim().is_empty());
    let template_inline = template_inline.filter(|s| !s.trim().is_empty());

    let source = match (template_file, template_inline) {
        (None, None) => return Err(TokenError::NoTemplateSource),
        (Some(_), Some(_)) => return Err(TokenError::AmbiguousTemplateSource),
        (None, Some(inline)) => inline.to_string(),
        (Some(file), None) => {
            let path = expand_path(file);
            log::debug!("reading policy template {}", path.display());
            std::fs::read_to_string(&path)
                .map_err(|source| TokenError::TemplateRead { path, source })?
        }
    };

    let rendered = render_text(&source, vars)?;
    parse_policies(rendered.trim())
}

/// Execute template text against `vars` without interpreting the output.
pub fn render_text(source: &str, vars: &TemplateVariables) -> Result<String> {
    let template = Template::parse(source)?;
    let context = serde_json::Value::Object(
        vars.iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );
    template.execute(&context)
}

fn parse_policies(rendered: &str) -> Result<Vec<PolicyDocument>> {
    let policies: Vec<PolicyDocument> =
        serde_json::from_str(rendered).map_err(|e| TokenError::TemplateOutputInvalid {
            rendered: rendered.to_string(),
            reason: e.to_string(),
        })?;
    if policies.is_empty() {
        return Err(TokenError::NoPolicies);
    }
    Ok(policies)
}

/// Expand a leading `~` to the home directory, then `$VAR`/`${VAR}`
/// references (unset variables expand to nothing).
pub fn expand_path(path: &str) -> PathBuf {
    let with_home = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => format!("{}{rest}", home.display()),
            None => {
                log::warn!("cannot determine home directory; leaving {path:?} unexpanded");
                path.to_string()
            }
        },
        _ => path.to_string(),
    };
    let expanded = ENV_VAR.replace_all(&with_home, |caps: &regex::Captures<'_>| {
        let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        std::env::var(name).unwrap_or_default()
    });
    PathBuf::from(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Effect, PermissionGroupRef};
    use serde_json::json;
    use serial_test::serial;
    use std::io::Write;

    const ZONE_TEMPLATE: &str = r#"[
  {
    "effect": "allow",
    "resources": {"com.cloudflare.api.account.zone.{{ .ZoneID }}": "*"},
    "permission_groups": [{"id": "{{ .PermID }}"}]
  }
]"#;

    fn vars(pairs: &[(&str, serde_json::Value)]) -> TemplateVariables {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_inline_template_renders_policies() {
        let policies = render(
            None,
            Some(ZONE_TEMPLATE),
            &vars(&[("ZoneID", json!("z1")), ("PermID", json!("p1"))]),
        )
        .unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].effect, Effect::Allow);
        assert_eq!(policies[0].resources["com.cloudflare.api.account.zone.z1"], "*");
        assert_eq!(
            policies[0].permission_groups,
            vec![PermissionGroupRef { id: "p1".into(), name: None }]
        );
    }

    #[test]
    fn test_file_template_renders_policies() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ZONE_TEMPLATE.as_bytes()).unwrap();
        let path = file.path().to_str().unwrap();

        let policies = render(
            Some(path),
            None,
            &vars(&[("ZoneID", json!("z2")), ("PermID", json!("p2"))]),
        )
        .unwrap();
        assert!(policies[0].resources.contains_key("com.cloudflare.api.account.zone.z2"));
    }

    #[test]
    fn test_source_selection_errors() {
        let empty = TemplateVariables::new();
        assert!(matches!(render(None, None, &empty), Err(TokenError::NoTemplateSource)));
        assert!(matches!(render(Some("  "), Some(""), &empty), Err(TokenError::NoTemplateSource)));
        assert!(matches!(
            render(Some("a.tmpl"), Some("[]"), &empty),
            Err(TokenError::AmbiguousTemplateSource)
        ));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.tmpl");
        match render(missing.to_str(), None, &TemplateVariables::new()) {
            Err(TokenError::TemplateRead { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected TemplateRead, got {other:?}"),
        }
    }

    #[test]
    fn test_non_policy_output_keeps_rendered_text() {
        let source = "\n{\"policy\": \"{{ .Missing }}\"}\n";
        let err = render(None, Some(source), &TemplateVariables::new()).unwrap_err();
        match err {
            TokenError::TemplateOutputInvalid { rendered, .. } => {
                assert_eq!(rendered, "{\"policy\": \"\"}");
            }
            other => panic!("expected TemplateOutputInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_variable_renders_empty_string_policy() {
        let err = render(None, Some(r#"["{{ .Foo }}"]"#), &TemplateVariables::new()).unwrap_err();
        match err {
            TokenError::TemplateOutputInvalid { rendered, .. } => assert_eq!(rendered, r#"[""]"#),
            other => panic!("expected TemplateOutputInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_json_is_output_error() {
        let err = render(None, Some(r#"[{"effect": "allow", }]"#), &TemplateVariables::new())
            .unwrap_err();
        match err {
            TokenError::TemplateOutputInvalid { rendered, .. } => {
                assert_eq!(rendered, r#"[{"effect": "allow", }]"#);
            }
            other => panic!("expected TemplateOutputInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_array_is_no_policies() {
        let err = render(None, Some("  []  "), &TemplateVariables::new()).unwrap_err();
        assert!(matches!(err, TokenError::NoPolicies));
    }

    #[test]
    fn test_syntax_error_is_distinct_from_output_error() {
        let err = render(None, Some("[{{ if .A }}]"), &TemplateVariables::new()).unwrap_err();
        assert!(matches!(err, TokenError::TemplateSyntax { .. }));
    }

    #[test]
    fn test_execution_error_is_reported() {
        let err = render(None, Some("[{{ index .Zones 3 }}]"), &vars(&[("Zones", json!([]))]))
            .unwrap_err();
        assert!(matches!(err, TokenError::TemplateExecution { .. }));
        assert!(err.to_string().starts_with("execute template: line 1: error calling index"));
    }

    #[test]
    fn test_range_emits_one_policy_per_zone() {
        let source = r#"[
  {{- range $i, $zone := .Zones }}{{ if $i }},{{ end }}
  {
    "effect": "allow",
    "resources": {"com.cloudflare.api.account.zone.{{ $zone }}": "*"},
    "permission_groups": [{{ range $j, $g := $.Groups }}{{ if $j }}, {{ end }}{"id": {{ printf "%q" $g }}}{{ end }}]
  }
  {{- end }}
]"#;
        let policies = render(
            None,
            Some(source),
            &vars(&[("Zones", json!(["z1", "z2"])), ("Groups", json!(["g1", "g2"]))]),
        )
        .unwrap();
        assert_eq!(policies.len(), 2);
        assert!(policies[1].resources.contains_key("com.cloudflare.api.account.zone.z2"));
        let ids: Vec<&str> = policies[0]
            .permission_groups
            .iter()
            .map(|g| g.id.as_str())
            .collect();
        assert_eq!(ids, ["g1", "g2"]);
    }

    #[test]
    fn test_render_is_deterministic() {
        let context = vars(&[("ZoneID", json!("z")), ("PermID", json!(7))]);
        let first = render_text(ZONE_TEMPLATE, &context).unwrap();
        let second = render_text(ZONE_TEMPLATE, &context).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_template_ref_dispatches_on_source() {
        let inline = TemplateRef::Inline(ZONE_TEMPLATE.to_string());
        let policies = inline
            .render(&vars(&[("ZoneID", json!("z3")), ("PermID", json!("p3"))]))
            .unwrap();
        assert_eq!(policies[0].permission_groups[0].id, "p3");
    }

    #[test]
    #[serial]
    fn test_expand_path_env_vars() {
        std::env::set_var("CFTOKEN_TEST_DIR", "/srv/templates");
        std::env::remove_var("CFTOKEN_TEST_UNSET");
        assert_eq!(
            expand_path("${CFTOKEN_TEST_DIR}/zone.tmpl"),
            PathBuf::from("/srv/templates/zone.tmpl")
        );
        assert_eq!(
            expand_path("$CFTOKEN_TEST_DIR/x$CFTOKEN_TEST_UNSET.tmpl"),
            PathBuf::from("/srv/templates/x.tmpl")
        );
        std::env::remove_var("CFTOKEN_TEST_DIR");
    }

    #[test]
    fn test_expand_path_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_path("~/tpl/a.tmpl"), home.join("tpl/a.tmpl"));
        assert_eq!(expand_path("~other/a.tmpl"), PathBuf::from("~other/a.tmpl"));
    }
}
