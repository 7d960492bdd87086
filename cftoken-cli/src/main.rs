//! `cftoken`: provision narrowly-scoped Cloudflare API tokens.

mod output;
mod provider;

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use cftoken_cloudflare::CloudflareClient;
use cftoken_core::config::{parse_duration, CONFIG_FILE};
use cftoken_core::{cidr, ConfigLoader, Overrides, TemplateVariables, TokenService};
use clap::{CommandFactory, Parser};

use provider::{Provider, MISSING_TOKEN};

const API_TOKEN_ENV: &str = "CLOUDFLARE_API_TOKEN";

#[derive(Parser, Debug)]
#[command(name = "cftoken", version)]
#[command(about = "Provision narrowly-scoped Cloudflare API tokens from zone names and permission names")]
#[command(after_help = "Environment:\n  CLOUDFLARE_API_TOKEN   Cloudflare API token with permission to create tokens.")]
struct Cli {
    /// Prefix for the new API token (defaults to the zone name; timestamp appended automatically)
    #[arg(long, value_name = "PREFIX")]
    token_prefix: Option<String>,

    /// Zone identifier the new token should access
    #[arg(long, value_name = "ID")]
    zone_id: Option<String>,

    /// Zone name or configured zone with extended settings
    #[arg(long, value_name = "NAME")]
    zone: Option<String>,

    /// Comma-separated permission group names or IDs (default: Zone:Read)
    #[arg(long, value_name = "LIST")]
    permissions: Option<String>,

    /// Token TTL such as 8h or 1h30m (0 for no expiration) [default: 8h]
    #[arg(long, value_name = "DURATION", value_parser = parse_ttl)]
    ttl: Option<chrono::Duration>,

    /// Comma-separated CIDRs allowed to use the token (0.0.0.0/32 disables IP restriction)
    #[arg(long, value_name = "LIST")]
    allow_cidrs: Option<String>,

    /// Template variable; repeatable, overrides zone variables
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// Preview the token without creating it
    #[arg(long)]
    dry_run: bool,

    /// List permission groups available to the current token and exit
    #[arg(long)]
    list_permissions: bool,

    /// List configured zones and exit
    #[arg(long)]
    list_zones: bool,

    /// Inspect token details: the new token when creating one, otherwise the
    /// management token or the value given with --inspect-token
    #[arg(long)]
    inspect: bool,

    /// Token value to inspect when used with --inspect outside of token creation
    #[arg(long, value_name = "TOKEN", requires = "inspect")]
    inspect_token: Option<String>,

    /// Request timeout (e.g. 15s, 1m)
    #[arg(long, value_name = "DURATION", default_value = "30s", value_parser = parse_timeout)]
    timeout: std::time::Duration,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[arg(long, env = "CLOUDFLARE_API_BASE_URL", hide = true)]
    api_base_url: Option<String>,
}

fn parse_ttl(s: &str) -> Result<chrono::Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

fn parse_timeout(s: &str) -> Result<std::time::Duration, String> {
    let timeout = parse_duration(s).map_err(|e| e.to_string())?;
    match timeout.to_std() {
        Ok(timeout) if !timeout.is_zero() => Ok(timeout),
        _ => Err(format!("timeout must be positive, got {s:?}")),
    }
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid format; expected key=value, got {s:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid format; empty key in {s:?}"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Management token from `CLOUDFLARE_API_TOKEN`. There is no flag for it so
/// the secret never appears in the process arguments.
fn api_token() -> Option<String> {
    let token = std::env::var(API_TOKEN_ENV).ok()?;
    non_blank(Some(token.as_str())).map(str::to_string)
}

impl Cli {
    fn creates_token(&self) -> bool {
        [&self.token_prefix, &self.zone, &self.zone_id]
            .into_iter()
            .any(|v| non_blank(v.as_deref()).is_some())
    }

    fn overrides(&self) -> Overrides {
        Overrides {
            token_prefix: self.token_prefix.clone(),
            zone_id: self.zone_id.clone(),
            zone: self.zone.clone(),
            permissions: self.permissions.as_deref().map(cidr::split_list),
            allowed_cidrs: self.allow_cidrs.as_deref().map(cidr::split_list),
            ttl: self.ttl,
            variables: self
                .vars
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect::<TemplateVariables>(),
        }
    }

    /// Client for the API, or `None` when no token is configured.
    fn client(&self) -> Result<Option<CloudflareClient>> {
        let Some(token) = api_token() else {
            return Ok(None);
        };
        let mut builder = CloudflareClient::builder(token).timeout(self.timeout);
        if let Some(base_url) = non_blank(self.api_base_url.as_deref()) {
            builder = builder.base_url(base_url);
        }
        Ok(Some(builder.build().context("initialize HTTP client")?))
    }

    fn require_client(&self) -> Result<CloudflareClient> {
        self.client()?.context(MISSING_TOKEN)
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args_os().len() <= 1 {
        Cli::command().print_help()?;
        return Ok(());
    }
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    run(&cli, &mut out).await?;
    out.flush()?;
    Ok(())
}

async fn run(cli: &Cli, out: &mut impl Write) -> Result<()> {
    if cli.list_permissions {
        let client = cli.require_client()?;
        let groups = client
            .permission_groups()
            .await
            .context("failed to fetch permission groups")?;
        return output::print_permission_groups(out, &groups);
    }

    let loader = ConfigLoader::from_env()?;
    log::debug!("configuration directory: {}", loader.dir().display());
    if cli.list_zones {
        let zones = loader
            .list_zones()
            .context("failed to load configured zones")?;
        if zones.is_empty() {
            bail!(
                "no zones configured; add a zones map to {}",
                loader.dir().join(CONFIG_FILE).display()
            );
        }
        return output::print_zones(out, &zones);
    }

    let creating = cli.creates_token();
    if creating && cli.inspect_token.is_some() {
        bail!("--inspect-token cannot be combined with token creation; the new token is inspected automatically");
    }
    if cli.inspect && !creating {
        let client = cli.require_client()?;
        return inspect(out, &client, non_blank(cli.inspect_token.as_deref())).await;
    }

    let client = cli.client()?;
    if client.is_none() && !cli.dry_run {
        bail!(MISSING_TOKEN);
    }
    let table = loader.load().context("load configuration")?;
    let provider = Provider::new(client.clone());
    let service = TokenService::new(provider.clone(), provider);

    let plan = service
        .plan(&cli.overrides(), &table)
        .await
        .context("resolve token request")?;
    if cli.dry_run {
        return output::print_dry_run(out, &plan);
    }

    let result = service.apply(&plan).await?;
    output::print_token_result(out, &result, &plan)?;

    if cli.inspect {
        let client = client.context(MISSING_TOKEN)?;
        let inspection = client
            .describe_token(&result.id)
            .await
            .context("inspect token")?;
        output::print_inspection(out, &inspection)?;
    }
    Ok(())
}

async fn inspect(
    out: &mut impl Write,
    management: &CloudflareClient,
    token: Option<&str>,
) -> Result<()> {
    let verification = match token {
        Some(token) => management.with_token(token).verify_token().await,
        None => management.verify_token().await,
    }
    .context("verify token")?;

    let inspection = management
        .describe_token(&verification.id)
        .await
        .context("describe token")?;
    output::print_inspection(out, &inspection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serial_test::serial;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("cftoken").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case("Env=prod", ("Env", "prod"))]
    #[case(" Owner = ops team ", ("Owner", "ops team"))]
    #[case("Expr=a=b", ("Expr", "a=b"))]
    fn test_parse_var(#[case] input: &str, #[case] want: (&str, &str)) {
        assert_eq!(parse_var(input).unwrap(), (want.0.to_string(), want.1.to_string()));
    }

    #[rstest]
    #[case("novalue")]
    #[case("=x")]
    fn test_parse_var_rejects(#[case] input: &str) {
        assert!(parse_var(input).is_err());
    }

    #[test]
    fn test_timeout_must_be_positive() {
        assert_eq!(parse_timeout("15s").unwrap(), std::time::Duration::from_secs(15));
        assert!(parse_timeout("0").is_err());
    }

    #[test]
    fn test_overrides_keep_explicit_empty_lists() {
        let cli = parse(&["--zone", "example.com", "--permissions", "", "--allow-cidrs", " 10.0.0.1/32 ,"]);
        let overrides = cli.overrides();
        assert_eq!(overrides.permissions, Some(Vec::new()));
        assert_eq!(overrides.allowed_cidrs, Some(vec!["10.0.0.1/32".to_string()]));
        assert_eq!(overrides.ttl, None);
    }

    #[test]
    fn test_vars_become_template_variables() {
        let cli = parse(&["--zone", "z", "--var", "A=1", "--var", "B=two", "--var", "A=3"]);
        let vars = cli.overrides().variables;
        assert_eq!(vars["A"], serde_json::json!("3"));
        assert_eq!(vars["B"], serde_json::json!("two"));
    }

    #[test]
    fn test_creates_token_ignores_blank_values() {
        assert!(!parse(&["--zone", "  ", "--inspect"]).creates_token());
        assert!(parse(&["--zone-id", "abc"]).creates_token());
    }

    #[test]
    fn test_api_token_is_not_a_flag() {
        let result = Cli::try_parse_from(["cftoken", "--api-token", "secret", "--list-zones"]);
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_api_token_comes_from_environment() {
        std::env::set_var(API_TOKEN_ENV, "  env-secret  ");
        assert_eq!(api_token().as_deref(), Some("env-secret"));
        std::env::set_var(API_TOKEN_ENV, "   ");
        assert_eq!(api_token(), None);
        std::env::remove_var(API_TOKEN_ENV);
        assert_eq!(api_token(), None);
    }

    #[test]
    fn test_inspect_token_requires_inspect() {
        let result = Cli::try_parse_from(["cftoken", "--inspect-token", "abc"]);
        assert!(result.is_err());
    }
}
