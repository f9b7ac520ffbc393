//! Request command implementation.

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use serde_json::Value;

use tessera_core::{ApiError, Method};
use tessera_http::{AuthService, RequestOptions};

use crate::output;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::Get,
            HttpMethod::Post => Method::Post,
            HttpMethod::Put => Method::Put,
            HttpMethod::Patch => Method::Patch,
            HttpMethod::Delete => Method::Delete,
        }
    }
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// HTTP method
    #[arg(value_enum, ignore_case = true)]
    pub method: HttpMethod,

    /// Endpoint path, relative to the API URL
    pub path: String,

    /// JSON request body
    #[arg(long, short)]
    pub data: Option<String>,

    /// Query parameter as KEY=VALUE (repeatable)
    #[arg(long = "query", short, value_parser = parse_pair)]
    pub query: Vec<(String, String)>,

    /// Extra header as NAME=VALUE (repeatable)
    #[arg(long = "header", short = 'H', value_parser = parse_pair)]
    pub headers: Vec<(String, String)>,

    /// Send without the stored token
    #[arg(long)]
    pub no_auth: bool,

    /// Print the response on one line
    #[arg(long)]
    pub compact: bool,
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))
}

pub async fn run(args: RequestArgs, session: &AuthService) -> Result<()> {
    let body = args
        .data
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--data is not valid JSON")?;

    let mut options = RequestOptions::new();
    for (name, value) in args.headers {
        options = options.header(name, value);
    }
    for (name, value) in args.query {
        options = options.query(name, value);
    }
    if args.no_auth {
        options = options.skip_auth();
    }

    let response = match session
        .api()
        .send_raw(args.method.into(), &args.path, body, options)
        .await
    {
        Ok(response) => response,
        Err(ApiError::Http(err)) => {
            if let Some(body) = &err.body {
                output::json_pretty(body)?;
            }
            bail!("Request failed: {err}");
        }
        Err(e) if e.is_auth_error() => {
            return Err(e).context("Not authorized. Run 'tessera login' to sign in again.");
        }
        Err(e) => return Err(e).context("Request failed"),
    };

    output::note(&format!("HTTP {}", response.status));
    if response.data.is_null() {
        return Ok(());
    }
    if args.compact {
        output::json(&response.data)
    } else {
        output::json_pretty(&response.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_pairs() {
        assert_eq!(
            parse_pair("page=2").unwrap(),
            ("page".to_string(), "2".to_string())
        );
        assert_eq!(
            parse_pair("filter=a=b").unwrap(),
            ("filter".to_string(), "a=b".to_string())
        );
        assert!(parse_pair("novalue").is_err());
        assert!(parse_pair("=x").is_err());
    }
}
